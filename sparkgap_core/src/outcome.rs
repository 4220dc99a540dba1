use std::fmt;

/// Groups every campaign declares, in results-column order.
pub const STANDARD_GROUPS: [&str; 4] = ["success", "reset", "normal", "skipped"];

/// The classification of one glitch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The glitch produced the effect the campaign is looking for.
    Success,
    /// The target crashed, hung or stopped answering.
    Reset,
    /// The target behaved as if no glitch had happened.
    Normal,
    /// The setting was not attempted (zero-crossing or bad-setting rule).
    Skipped,
    /// A campaign-specific group declared in the parameter space.
    Custom(String),
}

impl Outcome {
    /// The results column this outcome is counted under.
    pub fn group_name(&self) -> &str {
        match self {
            Outcome::Success => "success",
            Outcome::Reset => "reset",
            Outcome::Normal => "normal",
            Outcome::Skipped => "skipped",
            Outcome::Custom(name) => name,
        }
    }

    /// Inverse of [`Outcome::group_name`]; any non-standard name becomes `Custom`.
    pub fn from_group_name(name: &str) -> Self {
        match name {
            "success" => Outcome::Success,
            "reset" => Outcome::Reset,
            "normal" => Outcome::Normal,
            "skipped" => Outcome::Skipped,
            other => Outcome::Custom(other.to_string()),
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, Outcome::Reset)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

/// A `Classifier` maps the device's response to one attempt onto an [`Outcome`].
///
/// The decision of what counts as a crash or a success is target specific and
/// owned by the caller; the campaign only consumes the resulting group. A
/// classifier returning a `Custom` group must only use groups declared in the
/// campaign's parameter space.
pub trait Classifier<R> {
    /// Classifies the data read back after an attempt.
    ///
    /// # Arguments
    /// * `response`: whatever the device session returned from `read_response`.
    ///
    /// # Returns
    /// The outcome group to count the attempt under.
    fn classify(&mut self, response: &R) -> Outcome;
}

impl<R, F> Classifier<R> for F
where
    F: FnMut(&R) -> Outcome,
{
    fn classify(&mut self, response: &R) -> Outcome {
        self(response)
    }
}

/// Compares the response against the bytes an unglitched target sends.
///
/// A missing or wrong-length response means the target did not finish its
/// work and is classified as a reset; an exact match is normal; any other
/// payload of the right length is a success.
#[derive(Debug, Clone)]
pub struct ExpectedResponseClassifier {
    expected: Vec<u8>,
}

impl ExpectedResponseClassifier {
    pub fn new(expected: Vec<u8>) -> Self {
        Self { expected }
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }
}

impl Classifier<Option<Vec<u8>>> for ExpectedResponseClassifier {
    fn classify(&mut self, response: &Option<Vec<u8>>) -> Outcome {
        match response {
            None => Outcome::Reset,
            Some(data) if data.len() != self.expected.len() => Outcome::Reset,
            Some(data) if *data == self.expected => Outcome::Normal,
            Some(_) => Outcome::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_round_trip() {
        for name in STANDARD_GROUPS {
            assert_eq!(
                Outcome::from_group_name(name).group_name(),
                name,
                "standard group should map back to its own name"
            );
        }
        let custom = Outcome::from_group_name("interesting");
        assert_eq!(custom, Outcome::Custom("interesting".to_string()));
        assert_eq!(custom.to_string(), "interesting");
    }

    #[test]
    fn expected_response_classifier_distinguishes_all_cases() {
        let mut classifier = ExpectedResponseClassifier::new(b"2500".to_vec());

        assert_eq!(
            classifier.classify(&None),
            Outcome::Reset,
            "no data means the target reset"
        );
        assert_eq!(
            classifier.classify(&Some(b"25".to_vec())),
            Outcome::Reset,
            "truncated data means the target reset"
        );
        assert_eq!(
            classifier.classify(&Some(b"2500".to_vec())),
            Outcome::Normal,
            "expected data means the glitch had no effect"
        );
        assert_eq!(
            classifier.classify(&Some(b"2499".to_vec())),
            Outcome::Success,
            "different data of the right length is a successful glitch"
        );
    }

    #[test]
    fn closures_are_classifiers() {
        let mut seen = 0;
        let mut classifier = |response: &u32| {
            seen += 1;
            if *response > 10 {
                Outcome::Custom("odd".to_string())
            } else {
                Outcome::Normal
            }
        };
        assert_eq!(classifier.classify(&3), Outcome::Normal);
        assert_eq!(classifier.classify(&11), Outcome::Custom("odd".to_string()));
        drop(classifier);
        assert_eq!(seen, 2);
    }
}
