//! A software model of a glitchable target, used in place of real hardware.
//!
//! The model is seeded, so a campaign against it is reproducible. Glitches
//! inside a configured width/offset window can succeed, widths inside crash
//! bands reset the target, and any attempt may time out.

use crate::device::{DeviceError, DeviceSession, GlitchOutputs, IoLine, LineState, ResetPulse, WaitStatus};
use crate::params::ParamName;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSettings {
    pub seed: u64,
    /// What an unglitched target sends back.
    pub expected_response: String,
    pub success_width: [f64; 2],
    pub success_offset: [f64; 2],
    pub success_probability: f64,
    /// Closed width intervals that crash the target.
    pub crash_widths: Vec<[f64; 2]>,
    /// Crash bands only apply from this repeat count up.
    pub crash_min_repeat: f64,
    pub crash_probability: f64,
    /// Chance of a crash anywhere while glitching.
    pub background_crash_probability: f64,
    pub timeout_probability: f64,
    pub trace_length: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            expected_response: "2500".to_string(),
            success_width: [8.0, 12.0],
            success_offset: [-12.0, -8.0],
            success_probability: 0.2,
            crash_widths: vec![[30.0, 40.0]],
            crash_min_repeat: 1.0,
            crash_probability: 0.9,
            background_crash_probability: 0.01,
            timeout_probability: 0.001,
            trace_length: 128,
        }
    }
}

/// Counters of what the campaign asked the simulated device to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub triggers: u64,
    pub glitched_attempts: u64,
    pub reset_pulses: u64,
    pub flushes: u64,
    pub reconnects: u64,
    pub parameter_writes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    Idle,
    Normal,
    Glitched,
    Crashed,
    Hung,
}

fn within(value: f64, [low, high]: [f64; 2]) -> bool {
    value >= low.min(high) && value <= low.max(high)
}

fn register(name: ParamName) -> usize {
    match name {
        ParamName::Width => 0,
        ParamName::Offset => 1,
        ParamName::ExtOffset => 2,
        ParamName::Repeat => 3,
    }
}

fn probability(p: f64) -> f64 {
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
}

pub struct SimulatedDevice {
    settings: SimulationSettings,
    rng: ChaCha8Rng,
    values: [f64; 4],
    glitch_enabled: bool,
    connected: bool,
    armed: bool,
    state: AttemptState,
    trigger_high: bool,
    last_trace: Option<Vec<f32>>,
    stats: SimStats,
}

impl SimulatedDevice {
    pub fn new(settings: SimulationSettings) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        Self {
            settings,
            rng,
            values: [0.0; 4],
            glitch_enabled: false,
            connected: true,
            armed: false,
            state: AttemptState::Idle,
            trigger_high: false,
            last_trace: None,
            stats: SimStats::default(),
        }
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn glitch_enabled(&self) -> bool {
        self.glitch_enabled
    }

    /// Simulates the USB link dropping; every call fails until `reconnect`.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    fn value(&self, name: ParamName) -> f64 {
        self.values[register(name)]
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    fn roll_attempt(&mut self) -> AttemptState {
        if self.rng.random_bool(probability(self.settings.timeout_probability)) {
            return AttemptState::Hung;
        }
        if !self.glitch_enabled {
            return AttemptState::Normal;
        }
        self.stats.glitched_attempts += 1;

        let width = self.value(ParamName::Width);
        let offset = self.value(ParamName::Offset);
        let repeat = self.value(ParamName::Repeat);

        let in_crash_band = repeat >= self.settings.crash_min_repeat
            && self.settings.crash_widths.iter().any(|band| within(width, *band));
        if in_crash_band && self.rng.random_bool(probability(self.settings.crash_probability)) {
            return AttemptState::Crashed;
        }
        if within(width, self.settings.success_width)
            && within(offset, self.settings.success_offset)
            && self.rng.random_bool(probability(self.settings.success_probability))
        {
            return AttemptState::Glitched;
        }
        if self
            .rng
            .random_bool(probability(self.settings.background_crash_probability))
        {
            return AttemptState::Crashed;
        }
        AttemptState::Normal
    }

    fn synthesize_trace(&mut self) -> Vec<f32> {
        let glitch_dip = self.value(ParamName::Offset) as f32;
        (0..self.settings.trace_length)
            .map(|i| {
                let base = (i as f32 * 0.2).sin() * 0.1;
                let noise = self.rng.random_range(-0.01f32..0.01f32);
                if self.glitch_enabled && i as f32 == glitch_dip.abs().round() {
                    base - 0.5 + noise
                } else {
                    base + noise
                }
            })
            .collect()
    }
}

impl DeviceSession for SimulatedDevice {
    type Response = Option<Vec<u8>>;

    fn apply_parameter(&mut self, name: ParamName, value: f64) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.values[register(name)] = value;
        self.stats.parameter_writes += 1;
        trace!(param = %name, value, "simulated parameter write");
        Ok(())
    }

    fn arm(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.armed = true;
        Ok(())
    }

    fn trigger_attempt(&mut self) -> Result<bool, DeviceError> {
        self.write(b"g")?;
        self.stats.triggers += 1;
        self.state = self.roll_attempt();
        self.trigger_high = self.state == AttemptState::Hung;
        Ok(true)
    }

    fn wait_or_timeout(&mut self, retry: bool) -> Result<WaitStatus, DeviceError> {
        self.ensure_connected()?;
        if self.state == AttemptState::Hung && retry {
            debug!("simulated timeout, retrying once");
            self.arm()?;
            self.trigger_attempt()?;
        }
        self.armed = false;
        if self.state == AttemptState::Hung {
            return Ok(WaitStatus::TimedOut);
        }
        self.last_trace = Some(self.synthesize_trace());
        Ok(WaitStatus::Completed)
    }

    fn read_response(&mut self) -> Result<Option<Vec<u8>>, DeviceError> {
        self.ensure_connected()?;
        let expected = self.settings.expected_response.as_bytes().to_vec();
        let response = match self.state {
            AttemptState::Normal => Some(expected),
            AttemptState::Glitched => {
                let mut corrupted = expected;
                if let Some(last) = corrupted.last_mut() {
                    *last = last.wrapping_add(1);
                } else {
                    corrupted.push(b'!');
                }
                Some(corrupted)
            }
            AttemptState::Idle | AttemptState::Crashed | AttemptState::Hung => None,
        };
        self.state = AttemptState::Idle;
        Ok(response)
    }

    fn write(&mut self, _data: &[u8]) -> Result<(), DeviceError> {
        self.ensure_connected()
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.stats.flushes += 1;
        Ok(())
    }

    fn set_io_line(&mut self, line: IoLine, state: LineState) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        trace!(line = line.as_str(), ?state, "simulated IO line");
        Ok(())
    }

    fn reset_pulse(&mut self, pulse: &ResetPulse) -> Result<(), DeviceError> {
        self.set_io_line(pulse.line, pulse.asserted())?;
        self.set_io_line(pulse.line, pulse.released())?;
        self.stats.reset_pulses += 1;
        self.state = AttemptState::Idle;
        self.trigger_high = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reconnect(&mut self) -> Result<(), DeviceError> {
        self.connected = true;
        self.armed = false;
        self.state = AttemptState::Idle;
        self.stats.reconnects += 1;
        Ok(())
    }

    fn glitch_enable(&mut self, outputs: &GlitchOutputs) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.glitch_enabled = outputs.high_power || outputs.low_power;
        Ok(())
    }

    fn glitch_disable(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.glitch_enabled = false;
        Ok(())
    }

    fn trigger_line_high(&mut self) -> Result<bool, DeviceError> {
        Ok(self.trigger_high)
    }

    fn is_armed(&self) -> bool {
        self.armed
    }

    fn last_trace(&mut self) -> Option<Vec<f32>> {
        self.last_trace.take()
    }
}
