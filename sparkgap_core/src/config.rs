use crate::device::{GlitchOutputs, IoLine, ResetPulse};
use crate::params::{ParamError, ParamName, ParameterSpace, RangeSpec};
use crate::sim::SimulationSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error("{0} must be greater than zero")]
    ZeroThreshold(&'static str),
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("target reset line '{0}' is not a known IO line")]
    UnknownResetLine(String),
}

/// Every tunable run option of a campaign. All fields have defaults, so a
/// campaign file only needs to name what it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(default, deny_unknown_fields)]
pub struct CampaignOptions {
    /// Stop after this many attempts in a run.
    pub max_iterations: Option<u64>,
    pub iter_before_report_status: u64,
    pub iter_before_small_break: u64,
    pub iter_before_big_break: u64,
    pub iter_before_very_big_break: u64,
    pub small_break_seconds: f64,
    pub big_break_seconds: f64,
    pub very_big_break_seconds: f64,
    /// Consecutive resets before a bad setting is looked for. 0 disables detection.
    pub max_consec_resets_per_bad_setting: u64,
    pub max_consec_timeouts: u64,
    /// 0 disables the cap.
    pub max_total_resets: u64,
    pub max_total_dry_run_resets: u64,
    pub enable_high_power: bool,
    pub enable_low_power: bool,
    pub hs2_output: String,
    pub should_break_on_success: bool,
    pub target_reset_io: String,
    pub target_reset_io_high_is_on: bool,
    pub target_let_nrst_float_after_reset: bool,
    pub target_reset_wait: f64,
    pub reconnect_wait: f64,
    pub use_0_width_offset: bool,
    pub long_trigger_high_is_reset: bool,
    pub should_block_and_check_for_reset: bool,
    pub retry_on_timeout: bool,
    pub tries_per_setting: u64,
    pub no_save: bool,
    pub results_dir: PathBuf,
}

pub fn default_results_dir() -> PathBuf {
    PathBuf::from("./results")
}

impl Default for CampaignOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            iter_before_report_status: 100,
            iter_before_small_break: 500,
            iter_before_big_break: 5000,
            iter_before_very_big_break: 50000,
            small_break_seconds: 1.0,
            big_break_seconds: 5.0,
            very_big_break_seconds: 60.0,
            max_consec_resets_per_bad_setting: 100,
            max_consec_timeouts: 20,
            max_total_resets: 0,
            max_total_dry_run_resets: 10,
            enable_high_power: true,
            enable_low_power: true,
            hs2_output: "clkgen".to_string(),
            should_break_on_success: false,
            target_reset_io: "nrst".to_string(),
            target_reset_io_high_is_on: true,
            target_let_nrst_float_after_reset: true,
            target_reset_wait: 0.05,
            reconnect_wait: 1.0,
            use_0_width_offset: false,
            long_trigger_high_is_reset: true,
            should_block_and_check_for_reset: true,
            retry_on_timeout: true,
            tries_per_setting: 1,
            no_save: false,
            results_dir: default_results_dir(),
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl CampaignOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        let thresholds = [
            ("iter-before-report-status", self.iter_before_report_status),
            ("iter-before-small-break", self.iter_before_small_break),
            ("iter-before-big-break", self.iter_before_big_break),
            ("iter-before-very-big-break", self.iter_before_very_big_break),
            ("tries-per-setting", self.tries_per_setting),
        ];
        for (field, value) in thresholds {
            if value == 0 {
                return Err(OptionsError::ZeroThreshold(field));
            }
        }

        let durations = [
            ("small-break-seconds", self.small_break_seconds),
            ("big-break-seconds", self.big_break_seconds),
            ("very-big-break-seconds", self.very_big_break_seconds),
            ("target-reset-wait", self.target_reset_wait),
            ("reconnect-wait", self.reconnect_wait),
        ];
        for (field, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(OptionsError::InvalidDuration { field, value });
            }
        }

        self.reset_line()?;
        Ok(())
    }

    pub fn reset_line(&self) -> Result<IoLine, OptionsError> {
        self.target_reset_io
            .parse()
            .map_err(|_| OptionsError::UnknownResetLine(self.target_reset_io.clone()))
    }

    pub fn reset_pulse(&self) -> Result<ResetPulse, OptionsError> {
        Ok(ResetPulse {
            line: self.reset_line()?,
            high_is_on: self.target_reset_io_high_is_on,
            float_after: self.target_let_nrst_float_after_reset,
            settle: seconds(self.target_reset_wait),
        })
    }

    pub fn glitch_outputs(&self) -> GlitchOutputs {
        GlitchOutputs {
            high_power: self.enable_high_power,
            low_power: self.enable_low_power,
            hs2_output: self.hs2_output.clone(),
        }
    }

    pub fn reconnect_wait(&self) -> Duration {
        seconds(self.reconnect_wait)
    }

    pub fn small_break(&self) -> Duration {
        seconds(self.small_break_seconds)
    }

    pub fn big_break(&self) -> Duration {
        seconds(self.big_break_seconds)
    }

    pub fn very_big_break(&self) -> Duration {
        seconds(self.very_big_break_seconds)
    }

    /// Consecutive resets that trigger a liveness probe: the bad-setting
    /// threshold capped at 100, or 100 when detection is disabled.
    pub fn consecutive_reset_limit(&self) -> u64 {
        match self.max_consec_resets_per_bad_setting {
            0 => 100,
            n => n.min(100),
        }
    }
}

/// The `[params]` section of a campaign file.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ParamsSection {
    pub width: Option<RangeSpec>,
    pub offset: Option<RangeSpec>,
    pub ext_offset: Option<RangeSpec>,
    pub repeat: Option<RangeSpec>,
    pub global_step: Option<f64>,
    #[serde(default)]
    pub custom_groups: Vec<String>,
    pub param_order: Option<Vec<String>>,
}

impl ParamsSection {
    /// Builds the parameter space; omitted ranges keep their defaults and the
    /// order is normalized rather than rejected.
    pub fn build_space(&self) -> Result<ParameterSpace, ParamError> {
        let mut space = match &self.param_order {
            Some(order) => ParameterSpace::with_order(order),
            None => ParameterSpace::new(),
        };
        if let Some(step) = self.global_step {
            space.set_global_step(step)?;
        }
        let ranges = [
            (ParamName::Width, &self.width),
            (ParamName::Offset, &self.offset),
            (ParamName::ExtOffset, &self.ext_offset),
            (ParamName::Repeat, &self.repeat),
        ];
        for (name, range) in ranges {
            if let Some(range) = range {
                space.set_range(name, range.clone())?;
            }
        }
        space.set_custom_groups(self.custom_groups.clone())?;
        Ok(space)
    }
}

/// A campaign file: run options, parameter ranges and an optional simulated target.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignFile {
    #[serde(default)]
    pub campaign: CampaignOptions,
    #[serde(default)]
    pub params: ParamsSection,
    #[serde(default)]
    pub simulation: Option<SimulationSettings>,
}

impl CampaignFile {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read campaign file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid campaign file {:?}: {}", path, e))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let file: CampaignFile = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        file.campaign.validate()?;
        file.params.build_space()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LineState;
    use crate::params::Step;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_documented_values() {
        let options = CampaignOptions::default();
        assert_eq!(options.iter_before_small_break, 500);
        assert_eq!(options.iter_before_big_break, 5000);
        assert_eq!(options.iter_before_very_big_break, 50000);
        assert_eq!(options.max_consec_timeouts, 20);
        assert_eq!(options.hs2_output, "clkgen");
        assert_eq!(options.results_dir, PathBuf::from("./results"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn consecutive_reset_limit_is_capped() {
        let mut options = CampaignOptions::default();
        options.max_consec_resets_per_bad_setting = 7;
        assert_eq!(options.consecutive_reset_limit(), 7);
        options.max_consec_resets_per_bad_setting = 500;
        assert_eq!(options.consecutive_reset_limit(), 100);
        options.max_consec_resets_per_bad_setting = 0;
        assert_eq!(options.consecutive_reset_limit(), 100);
    }

    #[test]
    fn validation_rejects_zero_thresholds_and_bad_lines() {
        let mut options = CampaignOptions::default();
        options.iter_before_big_break = 0;
        assert_eq!(
            options.validate(),
            Err(OptionsError::ZeroThreshold("iter-before-big-break"))
        );

        let mut options = CampaignOptions::default();
        options.target_reset_io = "gpio42".to_string();
        assert_eq!(
            options.validate(),
            Err(OptionsError::UnknownResetLine("gpio42".to_string()))
        );

        let mut options = CampaignOptions::default();
        options.small_break_seconds = -1.0;
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidDuration { field: "small-break-seconds", .. })
        ));
    }

    #[test]
    fn reset_pulse_follows_the_options() {
        let mut options = CampaignOptions::default();
        options.target_reset_io = "tio3".to_string();
        options.target_let_nrst_float_after_reset = false;
        let pulse = options.reset_pulse().unwrap();
        assert_eq!(pulse.line, IoLine::Tio3);
        assert_eq!(pulse.asserted(), LineState::Low);
        assert_eq!(pulse.released(), LineState::High);
        assert_eq!(pulse.settle, Duration::from_millis(50));
    }

    #[test]
    fn campaign_file_parses_all_sections() {
        let toml = r#"
            [campaign]
            tries-per-setting = 3
            max-total-resets = 40
            results-dir = "/tmp/sparkgap"

            [params]
            width = [-10.0, 10.0, 0.5]
            offset = [2, 4]
            ext-offset = 12
            repeat = [1, 9, [1, 2]]
            global-step = 0.25
            custom-groups = ["interesting"]
            param-order = ["repeat", "width"]

            [simulation]
            seed = 7
        "#;
        let file = CampaignFile::from_toml_str(toml).unwrap();
        assert_eq!(file.campaign.tries_per_setting, 3);
        assert_eq!(file.campaign.max_total_resets, 40);
        assert_eq!(file.campaign.iter_before_report_status, 100);
        assert_eq!(file.simulation.map(|s| s.seed), Some(7));

        let space = file.params.build_space().unwrap();
        assert_eq!(
            space.param_order(),
            &[
                ParamName::Repeat,
                ParamName::Width,
                ParamName::Offset,
                ParamName::ExtOffset
            ]
        );
        assert_eq!(
            space.range(ParamName::Offset).step(),
            Some(&Step::Fixed(0.25))
        );
        assert!(space.is_static(ParamName::ExtOffset));
        assert_eq!(space.number_of_steps(ParamName::Repeat, false), 9 + 5);
        assert_eq!(space.custom_groups(), &["interesting".to_string()]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = "[campaign]\nmax-consecutive-tries = 4\n";
        assert!(CampaignFile::from_toml_str(toml).is_err());
    }

    #[test]
    fn invalid_ranges_fail_at_load_time() {
        let toml = "[params]\nrepeat = 2.5\n";
        let err = CampaignFile::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("repeat"), "unexpected error: {err}");
    }

    #[test]
    fn load_from_file_reads_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[campaign]\nno-save = true\n").unwrap();
        let loaded = CampaignFile::load_from_file(file.path()).unwrap();
        assert!(loaded.campaign.no_save);
        assert!(loaded.simulation.is_none());
    }

    #[test]
    fn options_survive_a_json_round_trip() {
        let mut options = CampaignOptions::default();
        options.max_iterations = Some(42);
        options.use_0_width_offset = true;
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"use-0-width-offset\":true"));
        let back: CampaignOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
