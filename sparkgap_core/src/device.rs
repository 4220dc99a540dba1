use crate::params::ParamName;
use std::fmt::Debug;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device is not connected")]
    NotConnected,
    #[error("attempt could not be triggered: {0}")]
    TriggerFailed(String),
    #[error("unknown IO line '{0}'")]
    UnknownIoLine(String),
    #[error("could not lock the sampling clock")]
    ClockUnlocked,
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device error: {0}")]
    Other(String),
}

/// The closed set of target IO lines a device session can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoLine {
    Tio1,
    Tio2,
    Tio3,
    Tio4,
    Nrst,
    Pdic,
    Pdid,
}

impl IoLine {
    pub fn as_str(self) -> &'static str {
        match self {
            IoLine::Tio1 => "tio1",
            IoLine::Tio2 => "tio2",
            IoLine::Tio3 => "tio3",
            IoLine::Tio4 => "tio4",
            IoLine::Nrst => "nrst",
            IoLine::Pdic => "pdic",
            IoLine::Pdid => "pdid",
        }
    }
}

impl FromStr for IoLine {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tio1" => Ok(IoLine::Tio1),
            "tio2" => Ok(IoLine::Tio2),
            "tio3" => Ok(IoLine::Tio3),
            "tio4" => Ok(IoLine::Tio4),
            "nrst" => Ok(IoLine::Nrst),
            "pdic" => Ok(IoLine::Pdic),
            "pdid" => Ok(IoLine::Pdid),
            other => Err(DeviceError::UnknownIoLine(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    High,
    Low,
    /// High impedance.
    Float,
}

impl LineState {
    pub fn from_level(high: bool) -> Self {
        if high { LineState::High } else { LineState::Low }
    }
}

/// Result of waiting for the target to finish an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Completed,
    TimedOut,
}

/// Which glitch outputs to drive while glitching is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlitchOutputs {
    pub high_power: bool,
    pub low_power: bool,
    pub hs2_output: String,
}

/// How to pulse the target's reset line.
///
/// The line is driven to its "off" level for `settle`, then released (left
/// floating or driven to the "on" level) for another `settle`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetPulse {
    pub line: IoLine,
    pub high_is_on: bool,
    pub float_after: bool,
    pub settle: Duration,
}

impl ResetPulse {
    pub fn asserted(&self) -> LineState {
        LineState::from_level(!self.high_is_on)
    }

    pub fn released(&self) -> LineState {
        if self.float_after {
            LineState::Float
        } else {
            LineState::from_level(self.high_is_on)
        }
    }
}

/// The capability surface of a glitch controller and its attached target.
///
/// A session is exclusively borrowed by the campaign for the duration of a run.
/// Every call blocks until the hardware answers or its own timeout elapses; the
/// campaign never runs timers of its own.
pub trait DeviceSession {
    /// Data read back from the target after an attempt; handed to the classifier.
    type Response: Debug;

    fn apply_parameter(&mut self, name: ParamName, value: f64) -> Result<(), DeviceError>;

    /// Arms the capture hardware for the next attempt.
    fn arm(&mut self) -> Result<(), DeviceError>;

    /// Makes the target run the code under test. Returns `false` if the target
    /// refused to start, which is treated as a device fault.
    fn trigger_attempt(&mut self) -> Result<bool, DeviceError>;

    /// Blocks until the armed capture completes or times out. When `retry` is set
    /// a timeout is retried once (re-arm, re-trigger, wait) before being reported.
    fn wait_or_timeout(&mut self, retry: bool) -> Result<WaitStatus, DeviceError>;

    fn read_response(&mut self) -> Result<Self::Response, DeviceError>;

    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Discards anything the target sent that was not read.
    fn flush(&mut self) -> Result<(), DeviceError>;

    fn set_io_line(&mut self, line: IoLine, state: LineState) -> Result<(), DeviceError>;

    fn reset_pulse(&mut self, pulse: &ResetPulse) -> Result<(), DeviceError> {
        self.set_io_line(pulse.line, pulse.asserted())?;
        thread::sleep(pulse.settle);
        self.set_io_line(pulse.line, pulse.released())?;
        thread::sleep(pulse.settle);
        Ok(())
    }

    /// Flush, reset, flush: the standard recovery after a crash.
    fn reboot_flush(&mut self, pulse: &ResetPulse) -> Result<(), DeviceError> {
        self.flush()?;
        self.reset_pulse(pulse)?;
        self.flush()
    }

    fn is_connected(&self) -> bool;

    fn reconnect(&mut self) -> Result<(), DeviceError>;

    fn glitch_enable(&mut self, outputs: &GlitchOutputs) -> Result<(), DeviceError>;

    fn glitch_disable(&mut self) -> Result<(), DeviceError>;

    /// True if the trigger line is still high from the previous attempt, which
    /// usually means the target crashed before finishing.
    fn trigger_line_high(&mut self) -> Result<bool, DeviceError> {
        Ok(false)
    }

    /// Relocks the sampling clock, typically after the target stopped driving it.
    fn reacquire_clock(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Whether a capture is still armed and waiting for a trigger.
    fn is_armed(&self) -> bool {
        false
    }

    /// The power trace captured by the last completed attempt, if the device records one.
    fn last_trace(&mut self) -> Option<Vec<f32>> {
        None
    }

    /// Target-specific setup before the first attempt of a run.
    fn prepare_run(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Target-specific cleanup after a run, whatever way it ended.
    fn after_run(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct LineRecorder {
        lines: Vec<(IoLine, LineState)>,
        flushes: usize,
    }

    impl DeviceSession for LineRecorder {
        type Response = ();

        fn apply_parameter(&mut self, _name: ParamName, _value: f64) -> Result<(), DeviceError> {
            Ok(())
        }
        fn arm(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn trigger_attempt(&mut self) -> Result<bool, DeviceError> {
            Ok(true)
        }
        fn wait_or_timeout(&mut self, _retry: bool) -> Result<WaitStatus, DeviceError> {
            Ok(WaitStatus::Completed)
        }
        fn read_response(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn write(&mut self, _data: &[u8]) -> Result<(), DeviceError> {
            Ok(())
        }
        fn flush(&mut self) -> Result<(), DeviceError> {
            self.flushes += 1;
            Ok(())
        }
        fn set_io_line(&mut self, line: IoLine, state: LineState) -> Result<(), DeviceError> {
            self.lines.push((line, state));
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn reconnect(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn glitch_enable(&mut self, _outputs: &GlitchOutputs) -> Result<(), DeviceError> {
            Ok(())
        }
        fn glitch_disable(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn pulse(high_is_on: bool, float_after: bool) -> ResetPulse {
        ResetPulse {
            line: IoLine::Nrst,
            high_is_on,
            float_after,
            settle: Duration::ZERO,
        }
    }

    #[test]
    fn io_lines_parse_from_known_names_only() {
        assert_eq!("nrst".parse::<IoLine>().unwrap(), IoLine::Nrst);
        assert_eq!("TIO4".parse::<IoLine>().unwrap(), IoLine::Tio4);
        assert!(matches!(
            "gpio9".parse::<IoLine>(),
            Err(DeviceError::UnknownIoLine(name)) if name == "gpio9"
        ));
    }

    #[test]
    fn default_reset_pulse_asserts_then_floats() {
        let mut device = LineRecorder::default();
        device.reset_pulse(&pulse(true, true)).unwrap();
        assert_eq!(
            device.lines,
            vec![(IoLine::Nrst, LineState::Low), (IoLine::Nrst, LineState::Float)]
        );
    }

    #[test]
    fn active_low_reset_without_float_drives_back_on() {
        let mut device = LineRecorder::default();
        device.reset_pulse(&pulse(false, false)).unwrap();
        assert_eq!(
            device.lines,
            vec![(IoLine::Nrst, LineState::High), (IoLine::Nrst, LineState::Low)]
        );
    }

    #[test]
    fn reboot_flush_flushes_around_the_pulse() {
        let mut device = LineRecorder::default();
        device.reboot_flush(&pulse(true, false)).unwrap();
        assert_eq!(device.flushes, 2);
        assert_eq!(device.lines.len(), 2);
    }
}
