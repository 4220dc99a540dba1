//! The glitch parameter space: per-parameter ranges, step counting with the
//! zero-crossing skip rule, and ordered enumeration of every [`Setting`].

use crate::outcome::STANDARD_GROUPS;
use crate::setting::Setting;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Step used to extend a `[min, max]` range when no explicit step is given.
pub const DEFAULT_GLOBAL_STEP: f64 = 0.4;

/// Values with `|v| <= ZERO_CROSSING_LIMIT` count as "no glitch" for width and offset.
pub const ZERO_CROSSING_LIMIT: f64 = 1.0;

/// Absorbs float error in `(max - min) / step` so that a step landing exactly on
/// `max` is counted.
const STEP_EPSILON: f64 = 1e-9;

/// Generated values are snapped to this resolution to keep `min + k * step` clean.
const VALUE_RESOLUTION: f64 = 1e9;

/// Most values a single parameter may take. Enumeration materializes each axis.
pub const MAX_RANGE_VALUES: u64 = 1 << 24;

/// Defines errors raised while configuring a [`ParameterSpace`].
///
/// All of these are configuration-time errors; none can occur while a campaign runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    /// A range (or one of its components) is not acceptable for the parameter.
    #[error("invalid range for {param}: {reason}")]
    InvalidRange { param: ParamName, reason: String },

    /// The iteration order is not a permutation of the canonical parameter names.
    #[error("invalid parameter order {0:?}: must be a permutation of width, offset, ext_offset, repeat")]
    InvalidOrder(Vec<String>),

    /// A parameter name outside the canonical set was used.
    #[error("unknown glitch parameter '{0}'")]
    UnknownParameter(String),

    /// The global step must be a positive, finite number.
    #[error("invalid global step {0}: must be positive and finite")]
    InvalidGlobalStep(f64),

    /// A custom outcome group name collides with a reserved name or is malformed.
    #[error("invalid custom group '{name}': {reason}")]
    InvalidGroup { name: String, reason: String },

    /// The serialized form of a parameter space could not be parsed.
    #[error("malformed parameter space document: {0}")]
    Document(String),

    /// The cross product of all ranges does not fit in a `u64` count.
    #[error("parameter space has too many settings (setting {param} overflows the count)")]
    TooManySettings { param: ParamName },
}

/// The canonical glitch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    Width,
    Offset,
    ExtOffset,
    Repeat,
}

impl ParamName {
    /// Canonical order, also the default iteration order.
    pub const ALL: [ParamName; 4] = [
        ParamName::Width,
        ParamName::Offset,
        ParamName::ExtOffset,
        ParamName::Repeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamName::Width => "width",
            ParamName::Offset => "offset",
            ParamName::ExtOffset => "ext_offset",
            ParamName::Repeat => "repeat",
        }
    }

    /// Repeat counts and external offsets are whole numbers of clock cycles.
    pub fn is_integer_only(self) -> bool {
        matches!(self, ParamName::ExtOffset | ParamName::Repeat)
    }

    /// Width and offset are the continuous parameters subject to the zero-crossing rule.
    pub fn is_continuous(self) -> bool {
        matches!(self, ParamName::Width | ParamName::Offset)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamName {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "width" => Ok(ParamName::Width),
            "offset" => Ok(ParamName::Offset),
            "ext_offset" => Ok(ParamName::ExtOffset),
            "repeat" => Ok(ParamName::Repeat),
            other => Err(ParamError::UnknownParameter(other.to_string())),
        }
    }
}

/// True if `value` falls in the band where a width or offset is physically meaningless.
///
/// The band is closed: `-1`, `0` and `1` are all inside it.
pub fn in_zero_crossing_band(value: f64) -> bool {
    value.abs() <= ZERO_CROSSING_LIMIT
}

/// Step of a swept range: one step size, or several step regimes enumerated one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Fixed(f64),
    Regimes(Vec<f64>),
}

impl Step {
    pub fn sizes(&self) -> &[f64] {
        match self {
            Step::Fixed(step) => std::slice::from_ref(step),
            Step::Regimes(steps) => steps,
        }
    }
}

impl From<f64> for Step {
    fn from(step: f64) -> Self {
        Step::Fixed(step)
    }
}

impl From<Vec<f64>> for Step {
    fn from(steps: Vec<f64>) -> Self {
        Step::Regimes(steps)
    }
}

/// A range as supplied by a user: a scalar, `[min, max]`, or `[min, max, step]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Scalar(f64),
    Full(f64, f64, Step),
    Bounds(f64, f64),
}

impl From<f64> for RangeSpec {
    fn from(value: f64) -> Self {
        RangeSpec::Scalar(value)
    }
}

impl From<i64> for RangeSpec {
    fn from(value: i64) -> Self {
        RangeSpec::Scalar(value as f64)
    }
}

impl From<[f64; 2]> for RangeSpec {
    fn from([min, max]: [f64; 2]) -> Self {
        RangeSpec::Bounds(min, max)
    }
}

impl From<[f64; 3]> for RangeSpec {
    fn from([min, max, step]: [f64; 3]) -> Self {
        RangeSpec::Full(min, max, Step::Fixed(step))
    }
}

impl From<(f64, f64, Vec<f64>)> for RangeSpec {
    fn from((min, max, steps): (f64, f64, Vec<f64>)) -> Self {
        RangeSpec::Full(min, max, Step::Regimes(steps))
    }
}

/// A normalized parameter range.
///
/// A swept range always satisfies `min <= max` and has no zero step unless
/// `min == max == 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "RangeSpec")]
pub enum ParameterRange {
    Single(f64),
    Swept { min: f64, max: f64, step: Step },
}

impl From<ParameterRange> for RangeSpec {
    fn from(range: ParameterRange) -> Self {
        match range {
            ParameterRange::Single(value) => RangeSpec::Scalar(value),
            ParameterRange::Swept { min, max, step } => RangeSpec::Full(min, max, step),
        }
    }
}

impl ParameterRange {
    pub fn min(&self) -> f64 {
        match self {
            ParameterRange::Single(value) => *value,
            ParameterRange::Swept { min, .. } => *min,
        }
    }

    pub fn max(&self) -> f64 {
        match self {
            ParameterRange::Single(value) => *value,
            ParameterRange::Swept { max, .. } => *max,
        }
    }

    pub fn step(&self) -> Option<&Step> {
        match self {
            ParameterRange::Single(_) => None,
            ParameterRange::Swept { step, .. } => Some(step),
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            ParameterRange::Single(_) => true,
            ParameterRange::Swept { min, max, .. } => min == max,
        }
    }

    /// Every value this range takes, in enumeration order. Step regimes are
    /// enumerated one after another.
    pub fn values(&self) -> Vec<f64> {
        match self {
            ParameterRange::Single(value) => vec![*value],
            ParameterRange::Swept { min, max, step } => step
                .sizes()
                .iter()
                .flat_map(|size| stepped_values(*min, *max, *size))
                .collect(),
        }
    }
}

fn snap(value: f64) -> f64 {
    let snapped = (value * VALUE_RESOLUTION).round() / VALUE_RESOLUTION;
    if snapped == 0.0 { 0.0 } else { snapped }
}

fn stride_count(min: f64, max: f64, step: f64) -> u64 {
    if step <= 0.0 {
        return 0;
    }
    ((max - min) / step + STEP_EPSILON).floor() as u64
}

/// Values a range takes, or `None` if the count does not fit in a `u64`.
fn checked_value_count(range: &ParameterRange) -> Option<u64> {
    match range {
        ParameterRange::Single(_) => Some(1),
        ParameterRange::Swept { min, max, step } => {
            step.sizes().iter().try_fold(0u64, |total, size| {
                stride_count(*min, *max, *size)
                    .checked_add(1)
                    .and_then(|n| total.checked_add(n))
            })
        }
    }
}

fn stepped_values(min: f64, max: f64, step: f64) -> impl Iterator<Item = f64> {
    let strides = stride_count(min, max, step);
    (0..=strides).map(move |k| snap(min + k as f64 * step))
}

fn invalid(param: ParamName, reason: impl Into<String>) -> ParamError {
    ParamError::InvalidRange {
        param,
        reason: reason.into(),
    }
}

fn check_component(param: ParamName, value: f64) -> Result<f64, ParamError> {
    if !value.is_finite() {
        return Err(invalid(param, format!("{value} is not a finite number")));
    }
    if param.is_integer_only() && value.fract() != 0.0 {
        return Err(invalid(
            param,
            format!("{param} values must be integers, got {value}"),
        ));
    }
    Ok(value)
}

/// Step used when a `[min, max]` spec is extended with the global step.
fn extension_step(param: ParamName, global_step: f64) -> f64 {
    if param.is_integer_only() {
        global_step.round().max(1.0)
    } else {
        global_step
    }
}

fn normalize(
    param: ParamName,
    spec: RangeSpec,
    global_step: f64,
) -> Result<ParameterRange, ParamError> {
    match spec {
        RangeSpec::Scalar(value) => Ok(ParameterRange::Single(check_component(param, value)?)),
        RangeSpec::Bounds(a, b) => normalize(
            param,
            RangeSpec::Full(a, b, Step::Fixed(extension_step(param, global_step))),
            global_step,
        ),
        RangeSpec::Full(a, b, step) => {
            let a = check_component(param, a)?;
            let b = check_component(param, b)?;
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            let fix_step = |size: f64| -> Result<f64, ParamError> {
                let size = check_component(param, size)?.abs();
                if size != 0.0 {
                    Ok(size)
                } else if max != min {
                    Ok(max - min)
                } else {
                    Ok(min.abs())
                }
            };
            let step = match step {
                Step::Fixed(size) => Step::Fixed(fix_step(size)?),
                Step::Regimes(sizes) => {
                    if sizes.is_empty() {
                        return Err(invalid(param, "step regime list is empty"));
                    }
                    Step::Regimes(sizes.into_iter().map(fix_step).collect::<Result<_, _>>()?)
                }
            };
            Ok(ParameterRange::Swept { min, max, step })
        }
    }
}

/// Drops unknown and duplicate names, then appends missing parameters in canonical order.
pub fn normalize_order<S: AsRef<str>>(names: &[S]) -> Vec<ParamName> {
    let mut order: Vec<ParamName> = Vec::with_capacity(ParamName::ALL.len());
    for name in names {
        if let Ok(param) = name.as_ref().parse::<ParamName>() {
            if !order.contains(&param) {
                order.push(param);
            }
        }
    }
    for param in ParamName::ALL {
        if !order.contains(&param) {
            order.push(param);
        }
    }
    order
}

/// The full glitch parameter space of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SpaceDocument", try_from = "SpaceDocument")]
pub struct ParameterSpace {
    ranges: [ParameterRange; 4],
    global_step: f64,
    custom_groups: Vec<String>,
    param_order: Vec<ParamName>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        let continuous = ParameterRange::Swept {
            min: -44.9,
            max: 49.8,
            step: Step::Fixed(0.4),
        };
        Self {
            ranges: [
                continuous.clone(),
                continuous,
                ParameterRange::Swept {
                    min: 0.0,
                    max: 8192.0,
                    step: Step::Fixed(1.0),
                },
                ParameterRange::Swept {
                    min: 1.0,
                    max: 50.0,
                    step: Step::Fixed(1.0),
                },
            ],
            global_step: DEFAULT_GLOBAL_STEP,
            custom_groups: Vec::new(),
            param_order: ParamName::ALL.to_vec(),
        }
    }
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default ranges with a leniently normalized iteration order.
    pub fn with_order<S: AsRef<str>>(order: &[S]) -> Self {
        Self {
            param_order: normalize_order(order),
            ..Self::default()
        }
    }

    pub fn range(&self, name: ParamName) -> &ParameterRange {
        &self.ranges[name.slot()]
    }

    /// Sets a parameter from a scalar, `[min, max]` (extended with the global step)
    /// or `[min, max, step]` spec.
    pub fn set_range(&mut self, name: ParamName, spec: impl Into<RangeSpec>) -> Result<(), ParamError> {
        let range = normalize(name, spec.into(), self.global_step)?;
        self.install(name, range)
    }

    /// Replaces one range, provided the axis and the whole space stay countable.
    fn install(&mut self, name: ParamName, range: ParameterRange) -> Result<(), ParamError> {
        match checked_value_count(&range) {
            Some(count) if count <= MAX_RANGE_VALUES => {}
            _ => {
                return Err(invalid(
                    name,
                    format!("range takes more than {MAX_RANGE_VALUES} values"),
                ));
            }
        }
        let mut ranges = self.ranges.clone();
        ranges[name.slot()] = range;
        ranges
            .iter()
            .try_fold(1u64, |total, r| total.checked_mul(checked_value_count(r)?))
            .ok_or(ParamError::TooManySettings { param: name })?;
        self.ranges = ranges;
        Ok(())
    }

    /// Moves the lower bound. A scalar grows into a range ending at its old value.
    pub fn set_min(&mut self, name: ParamName, value: f64) -> Result<(), ParamError> {
        let value = check_component(name, value)?;
        let updated = match self.range(name) {
            ParameterRange::Swept { max, step, .. } => {
                if value > *max {
                    return Err(invalid(name, "min value must not exceed max value"));
                }
                ParameterRange::Swept {
                    min: value,
                    max: *max,
                    step: step.clone(),
                }
            }
            ParameterRange::Single(current) => {
                if value > *current {
                    return Err(invalid(name, "min value must not exceed max value"));
                }
                if value == *current {
                    ParameterRange::Single(value)
                } else {
                    normalize(name, RangeSpec::Bounds(value, *current), self.global_step)?
                }
            }
        };
        self.install(name, updated)
    }

    /// Moves the upper bound. A scalar grows into a range starting at its old value.
    pub fn set_max(&mut self, name: ParamName, value: f64) -> Result<(), ParamError> {
        let value = check_component(name, value)?;
        let updated = match self.range(name) {
            ParameterRange::Swept { min, step, .. } => {
                if value < *min {
                    return Err(invalid(name, "max value must not be below min value"));
                }
                ParameterRange::Swept {
                    min: *min,
                    max: value,
                    step: step.clone(),
                }
            }
            ParameterRange::Single(current) => {
                if value < *current {
                    return Err(invalid(name, "max value must not be below min value"));
                }
                if value == *current {
                    ParameterRange::Single(value)
                } else {
                    normalize(name, RangeSpec::Bounds(*current, value), self.global_step)?
                }
            }
        };
        self.install(name, updated)
    }

    /// Replaces the step. A scalar becomes a degenerate `[v, v, step]` range.
    pub fn set_step(&mut self, name: ParamName, step: impl Into<Step>) -> Result<(), ParamError> {
        let (min, max) = (self.range(name).min(), self.range(name).max());
        let range = normalize(name, RangeSpec::Full(min, max, step.into()), self.global_step)?;
        self.install(name, range)
    }

    pub fn global_step(&self) -> f64 {
        self.global_step
    }

    pub fn set_global_step(&mut self, step: f64) -> Result<(), ParamError> {
        if !step.is_finite() || step <= 0.0 {
            return Err(ParamError::InvalidGlobalStep(step));
        }
        self.global_step = step;
        Ok(())
    }

    pub fn custom_groups(&self) -> &[String] {
        &self.custom_groups
    }

    pub fn set_custom_groups(&mut self, groups: Vec<String>) -> Result<(), ParamError> {
        for (i, name) in groups.iter().enumerate() {
            let reason = if name.is_empty() {
                Some("name is empty")
            } else if name.contains([',', '"', '\n', '\r']) {
                Some("name contains a CSV delimiter")
            } else if STANDARD_GROUPS.contains(&name.as_str()) {
                Some("name is a standard group")
            } else if name.parse::<ParamName>().is_ok() {
                Some("name is a glitch parameter")
            } else if name == "total" || name.ends_with("_rate") {
                Some("name is reserved for results columns")
            } else if groups[..i].contains(name) {
                Some("name is declared twice")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ParamError::InvalidGroup {
                    name: name.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        self.custom_groups = groups;
        Ok(())
    }

    /// Standard groups followed by the campaign's custom groups.
    pub fn groups(&self) -> Vec<String> {
        STANDARD_GROUPS
            .iter()
            .map(|group| group.to_string())
            .chain(self.custom_groups.iter().cloned())
            .collect()
    }

    pub fn param_order(&self) -> &[ParamName] {
        &self.param_order
    }

    /// Sets the iteration order; it must be an exact permutation of the canonical names.
    pub fn set_param_order<S: AsRef<str>>(&mut self, order: &[S]) -> Result<(), ParamError> {
        let as_strings = || order.iter().map(|s| s.as_ref().to_string()).collect::<Vec<_>>();
        let mut parsed = Vec::with_capacity(order.len());
        for name in order {
            match name.as_ref().parse::<ParamName>() {
                Ok(param) if !parsed.contains(&param) => parsed.push(param),
                _ => return Err(ParamError::InvalidOrder(as_strings())),
            }
        }
        if parsed.len() != ParamName::ALL.len() {
            return Err(ParamError::InvalidOrder(as_strings()));
        }
        self.param_order = parsed;
        Ok(())
    }

    /// Position of `name` inside every [`Setting`] this space produces.
    pub fn param_index(&self, name: ParamName) -> usize {
        self.param_order
            .iter()
            .position(|param| *param == name)
            .unwrap_or(name.slot())
    }

    pub fn is_static(&self, name: ParamName) -> bool {
        self.range(name).is_static()
    }

    /// Number of values of `name` that fall inside the zero-crossing band.
    /// Always zero for scalars and for non-continuous parameters.
    pub fn skipped_steps(&self, name: ParamName) -> u64 {
        if !name.is_continuous() {
            return 0;
        }
        match self.range(name) {
            ParameterRange::Single(_) => 0,
            ParameterRange::Swept { min, max, step } => step
                .sizes()
                .iter()
                .map(|size| {
                    stepped_values(*min, *max, *size)
                        .filter(|value| in_zero_crossing_band(*value))
                        .count() as u64
                })
                .sum(),
        }
    }

    /// Number of distinct values `name` takes: `floor((max - min) / step) + 1` per
    /// step regime, minus the zero-crossing values when `skip_zero_crossing` is set.
    pub fn number_of_steps(&self, name: ParamName, skip_zero_crossing: bool) -> u64 {
        let steps: u64 = match self.range(name) {
            ParameterRange::Single(_) => return 1,
            ParameterRange::Swept { min, max, step } => step
                .sizes()
                .iter()
                .map(|size| stride_count(*min, *max, *size).saturating_add(1))
                .fold(0, u64::saturating_add),
        };
        if skip_zero_crossing {
            steps.saturating_sub(self.skipped_steps(name))
        } else {
            steps
        }
    }

    /// Product of every parameter's step count.
    pub fn number_of_iterations(&self, skip_zero_crossing: bool) -> u64 {
        self.param_order
            .iter()
            .map(|name| self.number_of_steps(*name, skip_zero_crossing))
            .fold(1, u64::saturating_mul)
    }

    /// Attempts made by a full pass with `tries_per_setting` tries at each setting.
    pub fn number_of_attempts(&self, skip_zero_crossing: bool, tries_per_setting: u64) -> u64 {
        self.number_of_iterations(skip_zero_crossing)
            .saturating_mul(tries_per_setting)
    }

    /// Enumerates the full cross product in iteration order; the last parameter
    /// in `param_order` varies fastest.
    pub fn glitch_values(&self) -> GlitchValues {
        let axes: Vec<Vec<f64>> = self
            .param_order
            .iter()
            .map(|name| self.range(*name).values())
            .collect();
        GlitchValues::new(axes)
    }

    /// Value of `name` inside a setting produced by this space.
    pub fn value_of(&self, setting: &Setting, name: ParamName) -> Option<f64> {
        setting.get(self.param_index(name))
    }

    /// Human-readable form used in log lines, e.g. `width: 1.20, offset: -3.40, ext_offset: 7, repeat: 2`.
    pub fn stringify_setting(&self, setting: &Setting) -> String {
        self.param_order
            .iter()
            .zip(setting.values())
            .map(|(name, value)| {
                if name.is_integer_only() {
                    format!("{name}: {value:.0}")
                } else {
                    format!("{name}: {value:.2}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ParamError> {
        serde_json::to_value(SpaceDocument::from(self.clone()))
            .map_err(|e| ParamError::Document(e.to_string()))
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, ParamError> {
        let document: SpaceDocument = serde_json::from_value(value.clone())
            .map_err(|e| ParamError::Document(e.to_string()))?;
        Self::try_from(document)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ParamError> {
        let document: SpaceDocument =
            serde_json::from_str(json).map_err(|e| ParamError::Document(e.to_string()))?;
        Self::try_from(document)
    }
}

/// Lazy odometer over the cross product of per-parameter value lists.
#[derive(Debug, Clone)]
pub struct GlitchValues {
    axes: Vec<Vec<f64>>,
    cursor: Vec<usize>,
    remaining: u64,
}

impl GlitchValues {
    fn new(axes: Vec<Vec<f64>>) -> Self {
        let remaining = axes
            .iter()
            .map(|axis| axis.len() as u64)
            .fold(1, u64::saturating_mul);
        let cursor = vec![0; axes.len()];
        Self {
            axes,
            cursor,
            remaining,
        }
    }
}

impl Iterator for GlitchValues {
    type Item = Setting;

    fn next(&mut self) -> Option<Setting> {
        if self.remaining == 0 {
            return None;
        }
        let setting = Setting::new(
            self.cursor
                .iter()
                .zip(self.axes.iter())
                .map(|(i, axis)| axis[*i])
                .collect(),
        );
        self.remaining -= 1;
        for axis in (0..self.axes.len()).rev() {
            self.cursor[axis] += 1;
            if self.cursor[axis] < self.axes[axis].len() {
                break;
            }
            self.cursor[axis] = 0;
        }
        Some(setting)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

fn default_global_step() -> f64 {
    DEFAULT_GLOBAL_STEP
}

/// Serialized form of a [`ParameterSpace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SpaceDocument {
    width_range: RangeSpec,
    offset_range: RangeSpec,
    ext_offset_range: RangeSpec,
    repeat_range: RangeSpec,
    #[serde(default = "default_global_step")]
    global_step: f64,
    #[serde(default)]
    custom_groups: Option<Vec<String>>,
    param_order: Vec<String>,
}

impl From<ParameterSpace> for SpaceDocument {
    fn from(space: ParameterSpace) -> Self {
        let [width, offset, ext_offset, repeat] = space.ranges;
        Self {
            width_range: width.into(),
            offset_range: offset.into(),
            ext_offset_range: ext_offset.into(),
            repeat_range: repeat.into(),
            global_step: space.global_step,
            custom_groups: Some(space.custom_groups),
            param_order: space
                .param_order
                .iter()
                .map(|name| name.as_str().to_string())
                .collect(),
        }
    }
}

impl TryFrom<SpaceDocument> for ParameterSpace {
    type Error = ParamError;

    fn try_from(document: SpaceDocument) -> Result<Self, Self::Error> {
        let mut space = ParameterSpace::default();
        space.set_global_step(document.global_step)?;
        space.set_range(ParamName::Width, document.width_range)?;
        space.set_range(ParamName::Offset, document.offset_range)?;
        space.set_range(ParamName::ExtOffset, document.ext_offset_range)?;
        space.set_range(ParamName::Repeat, document.repeat_range)?;
        space.set_custom_groups(document.custom_groups.unwrap_or_default())?;
        space.set_param_order(&document.param_order)?;
        Ok(space)
    }
}
