use crate::pacing::PacingPolicy;
use crate::results::ResultsStore;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTally {
    pub name: String,
    pub count: u64,
    /// Fraction of all counted attempts, in `0.0..=1.0`.
    pub rate: f64,
}

/// A point-in-time view of a campaign's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignStatus {
    pub attempts: u64,
    pub total_attempts: u64,
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
    pub groups: Vec<GroupTally>,
}

impl CampaignStatus {
    pub fn snapshot(
        results: &ResultsStore,
        pacing: &PacingPolicy,
        attempts: u64,
        total_attempts: u64,
        elapsed: Duration,
    ) -> Self {
        let total = results.total();
        let groups = results
            .group_counts()
            .map(|(name, count)| GroupTally {
                name: name.to_string(),
                count,
                rate: if total > 0 { count as f64 / total as f64 } else { 0.0 },
            })
            .collect();
        Self {
            attempts,
            total_attempts,
            elapsed,
            estimated_remaining: pacing.estimate_remaining(elapsed, attempts, total_attempts),
            groups,
        }
    }

    /// `success: 3 (1.5%), reset: 20 (10.0%), normal: 177 (88.5%), skipped: 0`
    pub fn counts_line(&self) -> String {
        self.groups
            .iter()
            .map(|group| {
                if group.count > 0 {
                    format!("{}: {} ({:.1}%)", group.name, group.count, group.rate * 100.0)
                } else {
                    format!("{}: {}", group.name, group.count)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Formats as `<minutes>m<seconds>s` with two-digit seconds.
pub fn format_minutes_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m{:02}s", secs / 60, secs % 60)
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = format_minutes_seconds(self.elapsed);
        match self.estimated_remaining {
            Some(eta) => write!(
                f,
                "[{} / {}] ({} / ETR: {}): {}",
                self.attempts,
                self.total_attempts,
                elapsed,
                format_minutes_seconds(eta),
                self.counts_line()
            ),
            None => write!(
                f,
                "[{} / {}] ({}, Est. unknown): {}",
                self.attempts,
                self.total_attempts,
                elapsed,
                self.counts_line()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CampaignOptions;
    use crate::outcome::Outcome;
    use crate::params::ParameterSpace;
    use crate::setting::Setting;

    fn results() -> ResultsStore {
        let mut results = ResultsStore::for_space(&ParameterSpace::new());
        let setting = Setting::new(vec![2.0, 3.0, 4.0, 5.0]);
        results.add(&Outcome::Success, &setting).unwrap();
        for _ in 0..3 {
            results.add(&Outcome::Normal, &setting).unwrap();
        }
        results
    }

    #[test]
    fn minutes_and_seconds_are_zero_padded() {
        assert_eq!(format_minutes_seconds(Duration::from_secs(0)), "0m00s");
        assert_eq!(format_minutes_seconds(Duration::from_secs(65)), "1m05s");
        assert_eq!(format_minutes_seconds(Duration::from_millis(3_599_900)), "59m59s");
    }

    #[test]
    fn early_status_has_no_estimate() {
        let pacing = PacingPolicy::from_options(&CampaignOptions::default());
        let status = CampaignStatus::snapshot(&results(), &pacing, 4, 100, Duration::from_secs(3));
        assert_eq!(status.estimated_remaining, None);
        assert_eq!(
            status.to_string(),
            "[4 / 100] (0m03s, Est. unknown): success: 1 (25.0%), reset: 0, normal: 3 (75.0%), skipped: 0"
        );
    }

    #[test]
    fn later_status_projects_remaining_time() {
        let pacing = PacingPolicy::from_options(&CampaignOptions::default());
        let status = CampaignStatus::snapshot(&results(), &pacing, 40, 100, Duration::from_secs(20));
        assert_eq!(status.estimated_remaining, Some(Duration::from_secs(30)));
        assert!(status.to_string().starts_with("[40 / 100] (0m20s / ETR: 0m30s): "));
        assert_eq!(status.groups[0].rate, 0.25);
    }
}
