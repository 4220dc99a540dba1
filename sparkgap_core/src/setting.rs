use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// One concrete combination of glitch parameter values.
///
/// Values are stored in the iteration order of the [`ParameterSpace`](crate::params::ParameterSpace)
/// that produced them. A `Setting` is the unit applied to the device and the key of the
/// results store, so equality and hashing are defined on the bit pattern of each value
/// (with `-0.0` folded into `0.0`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Setting(Vec<f64>);

impl Setting {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values.into_iter().map(fold_negative_zero).collect())
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn fold_negative_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}

impl From<Vec<f64>> for Setting {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

impl PartialEq for Setting {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for Setting {}

impl Hash for Setting {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for value in &self.0 {
            value.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}
