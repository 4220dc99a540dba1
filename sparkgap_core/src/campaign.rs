//! The campaign controller: a sequential attempt/classify/record loop over the
//! parameter space with reset recovery, liveness probing, bad-setting
//! pruning, pacing and session persistence.

use crate::archive::{ArchiveError, TraceArchive, TraceRecord};
use crate::config::{CampaignOptions, OptionsError};
use crate::device::{DeviceError, DeviceSession, GlitchOutputs, ResetPulse, WaitStatus};
use crate::outcome::{Classifier, Outcome};
use crate::pacing::{BreakKind, PacingPolicy};
use crate::params::{ParamName, ParameterSpace, in_zero_crossing_band};
use crate::results::{ResultsError, ResultsStore};
use crate::session::{
    DATE_FORMAT, LoadedSession, SessionConfig, SessionError, SessionPaths, ensure_writable_dir,
    save_session,
};
use crate::setting::Setting;
use crate::status::CampaignStatus;
use chrono::{DateTime, Local, NaiveDateTime};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_CAMPAIGN_NAME: &str = "campaign";

/// Cooperative interruption. Checked between attempts, never during one.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a run ended when it ended under the controller's own policy.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every setting was attempted.
    Completed,
    /// `max-iterations` attempts were made.
    IterationLimit,
    StoppedOnSuccess { setting: Setting },
    StoppedTooManyResets,
    StoppedTooManyDryRunResets,
    Interrupted,
}

#[derive(Error, Debug)]
pub enum CampaignError {
    /// The liveness probe failed before and after a reconnect.
    #[error("target is unresponsive: {0}")]
    DeviceUnresponsive(String),
    #[error("the device refused to start an attempt")]
    TriggerRefused,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// Why the loop left early.
enum Halt {
    Stop(RunOutcome),
    Fail(CampaignError),
}

impl From<CampaignError> for Halt {
    fn from(err: CampaignError) -> Self {
        Halt::Fail(err)
    }
}

impl From<DeviceError> for Halt {
    fn from(err: DeviceError) -> Self {
        Halt::Fail(CampaignError::Device(err))
    }
}

impl From<ResultsError> for Halt {
    fn from(err: ResultsError) -> Self {
        Halt::Fail(CampaignError::Results(err))
    }
}

/// Settings whose width matches and whose repeat is at least `min_repeat` are skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadSettingRule {
    pub width: f64,
    pub min_repeat: f64,
}

impl fmt::Display for BadSettingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "width = {}, repeat >= {}", self.width, self.min_repeat)
    }
}

#[derive(Debug, Clone, Default)]
struct BadSettingTable {
    rules: Vec<BadSettingRule>,
}

impl BadSettingTable {
    /// One rule per width; a newer threshold replaces the older one.
    fn install(&mut self, rule: BadSettingRule) {
        match self.rules.iter_mut().find(|r| r.width == rule.width) {
            Some(existing) => existing.min_repeat = rule.min_repeat,
            None => self.rules.push(rule),
        }
    }

    fn matching(&self, width: f64, repeat: f64) -> Option<BadSettingRule> {
        self.rules
            .iter()
            .find(|rule| rule.width == width && repeat >= rule.min_repeat)
            .copied()
    }
}

/// Most frequent value, first-seen on ties.
fn modal_value(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(f64, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Where each parameter sits inside a setting, and whether it ever changes.
#[derive(Debug, Clone)]
struct SettingLayout {
    width: usize,
    offset: usize,
    repeat: usize,
    /// Only swept widths and offsets are subject to the zero-crossing skip.
    width_swept: bool,
    offset_swept: bool,
    params: Vec<(ParamName, usize, bool)>,
}

impl SettingLayout {
    fn new(space: &ParameterSpace) -> Self {
        Self {
            width: space.param_index(ParamName::Width),
            offset: space.param_index(ParamName::Offset),
            repeat: space.param_index(ParamName::Repeat),
            width_swept: !space.is_static(ParamName::Width),
            offset_swept: !space.is_static(ParamName::Offset),
            params: space
                .param_order()
                .iter()
                .map(|name| (*name, space.param_index(*name), space.is_static(*name)))
                .collect(),
        }
    }

    fn value(setting: &Setting, idx: usize) -> f64 {
        setting.get(idx).unwrap_or_default()
    }

    fn detect_bad_setting(&self, history: &[Setting]) -> Option<BadSettingRule> {
        let width = modal_value(history.iter().map(|s| Self::value(s, self.width)))?;
        let min_repeat = modal_value(history.iter().map(|s| Self::value(s, self.repeat)))?;
        Some(BadSettingRule { width, min_repeat })
    }
}

/// Counters describing one finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub run_name: String,
    pub dry_run: bool,
    /// Attempts that reached the device.
    pub attempts: u64,
    pub skipped: u64,
    pub total_resets: u64,
    pub dry_run_resets: u64,
    pub breaks: u64,
    pub checkpoints: u64,
    pub bad_settings: Vec<BadSettingRule>,
    pub elapsed: Duration,
    pub session_dir: Option<PathBuf>,
}

struct RunState {
    run_name: String,
    dry_run: bool,
    started: Instant,
    session: SessionPaths,
    planned: u64,
    attempts: u64,
    skipped: u64,
    total_resets: u64,
    dry_run_resets: u64,
    consecutive_resets: u64,
    consecutive_timeouts: u64,
    reset_history: Vec<Setting>,
    last_setting: Option<Setting>,
    last_width: Option<f64>,
    first_apply: bool,
    reported_skip: Option<String>,
    bad_settings: BadSettingTable,
    breaks: u64,
    checkpoints: u64,
}

impl RunState {
    /// Settings processed so far, skipped ones included.
    fn processed(&self) -> u64 {
        self.attempts + self.skipped
    }

    fn stats(&self, session_saved: bool) -> RunStats {
        RunStats {
            run_name: self.run_name.clone(),
            dry_run: self.dry_run,
            attempts: self.attempts,
            skipped: self.skipped,
            total_resets: self.total_resets,
            dry_run_resets: self.dry_run_resets,
            breaks: self.breaks,
            checkpoints: self.checkpoints,
            bad_settings: self.bad_settings.rules.clone(),
            elapsed: self.started.elapsed(),
            session_dir: session_saved.then(|| self.session.dir.clone()),
        }
    }
}

/// Result of a capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub outcome: RunOutcome,
    pub attempts: u64,
    pub resets: u64,
    pub traces: Vec<TraceRecord>,
    pub archive_dir: Option<PathBuf>,
}

/// Drives a device through a parameter space.
///
/// The campaign exclusively borrows the device session and the classifier.
/// Results and the list of successful settings accumulate across runs; every
/// other piece of run state is created fresh by each run.
pub struct Campaign<'a, D, C>
where
    D: DeviceSession,
    C: Classifier<D::Response>,
{
    name: String,
    options: CampaignOptions,
    space: ParameterSpace,
    device: &'a mut D,
    classifier: &'a mut C,
    results: ResultsStore,
    successful_settings: Vec<Setting>,
    pacing: PacingPolicy,
    reset_pulse: ResetPulse,
    glitch_outputs: GlitchOutputs,
    layout: SettingLayout,
    stop: StopHandle,
    total_attempts: u64,
    last_run: Option<RunStats>,
}

impl<'a, D, C> Campaign<'a, D, C>
where
    D: DeviceSession,
    C: Classifier<D::Response>,
{
    pub fn new(
        options: CampaignOptions,
        space: ParameterSpace,
        device: &'a mut D,
        classifier: &'a mut C,
    ) -> Result<Self, CampaignError> {
        options.validate()?;
        let results = ResultsStore::for_space(&space);
        Ok(Self {
            name: DEFAULT_CAMPAIGN_NAME.to_string(),
            pacing: PacingPolicy::from_options(&options),
            reset_pulse: options.reset_pulse()?,
            glitch_outputs: options.glitch_outputs(),
            layout: SettingLayout::new(&space),
            options,
            space,
            device,
            classifier,
            results,
            successful_settings: Vec::new(),
            stop: StopHandle::new(),
            total_attempts: 0,
            last_run: None,
        })
    }

    /// Resumes a saved session: its options, space, counts and successes.
    /// The campaign is named after the session directory without its timestamp.
    pub fn from_session(
        session: LoadedSession,
        device: &'a mut D,
        classifier: &'a mut C,
    ) -> Result<Self, CampaignError> {
        let name = session_name(&session.paths);
        let mut campaign = Self::new(
            session.config.campaign,
            session.config.glitch_params,
            device,
            classifier,
        )?;
        campaign.name = name;
        campaign.results = session.results;
        campaign.successful_settings = session.successful_settings;
        Ok(campaign)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CampaignOptions {
        &self.options
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    pub fn successful_settings(&self) -> &[Setting] {
        &self.successful_settings
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn last_run(&self) -> Option<&RunStats> {
        self.last_run.as_ref()
    }

    /// Attempts made by every run of this campaign.
    pub fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    pub fn device(&self) -> &D {
        &*self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut *self.device
    }

    /// Attempts a full pass will make.
    pub fn planned_attempts(&self) -> u64 {
        self.space
            .number_of_attempts(false, self.options.tries_per_setting)
    }

    /// Status of the most recent run, or of an idle campaign.
    pub fn status(&self) -> CampaignStatus {
        let (processed, elapsed) = self
            .last_run
            .as_ref()
            .map(|run| (run.attempts + run.skipped, run.elapsed))
            .unwrap_or((0, Duration::ZERO));
        CampaignStatus::snapshot(
            &self.results,
            &self.pacing,
            processed,
            self.planned_attempts(),
            elapsed,
        )
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            campaign: self.options.clone(),
            glitch_params: self.space.clone(),
        }
    }

    /// Writes the accumulated results into the last run's session directory,
    /// or into a new one named after the campaign.
    pub fn save_session(&self) -> Result<SessionPaths, CampaignError> {
        let paths = match self.last_run.as_ref() {
            Some(RunStats {
                session_dir: Some(dir),
                ..
            }) => SessionPaths::from_dir(dir)?,
            Some(run) => SessionPaths::new(&self.options.results_dir, &run.run_name, Local::now()),
            None => SessionPaths::new(&self.options.results_dir, &self.name, Local::now()),
        };
        save_session(&paths, &self.session_config(), &self.results)?;
        Ok(paths)
    }

    /// Runs one pass over the whole parameter space.
    ///
    /// Controlled stops come back as `Ok`; device failures, including an
    /// unresponsive target, come back as `Err`. Either way the glitch outputs
    /// are disabled, final results are logged and the session is saved (unless
    /// `no-save` is set) before returning.
    pub fn run_sequence(&mut self, dry_run: bool) -> Result<RunOutcome, CampaignError> {
        let mut state = self.setup_run(dry_run)?;
        let result = match self.drive(&mut state) {
            Ok(()) => {
                info!("Done!");
                Ok(RunOutcome::Completed)
            }
            Err(Halt::Stop(outcome)) => Ok(outcome),
            Err(Halt::Fail(err)) => Err(err),
        };
        self.finish_run(state, result)
    }

    fn setup_run(&mut self, dry_run: bool) -> Result<RunState, CampaignError> {
        let run_name = if dry_run {
            format!("{}_dry_run", self.name)
        } else {
            self.name.clone()
        };
        if !self.options.no_save {
            ensure_writable_dir(&self.options.results_dir)?;
        }
        let started_at = Local::now();
        let session = SessionPaths::new(&self.options.results_dir, &run_name, started_at);
        Ok(RunState {
            run_name,
            dry_run,
            started: Instant::now(),
            session,
            planned: self.planned_attempts(),
            attempts: 0,
            skipped: 0,
            total_resets: 0,
            dry_run_resets: 0,
            consecutive_resets: 0,
            consecutive_timeouts: 0,
            reset_history: Vec::new(),
            last_setting: None,
            last_width: None,
            first_apply: true,
            reported_skip: None,
            bad_settings: BadSettingTable::default(),
            breaks: 0,
            checkpoints: 0,
        })
    }

    fn log_configuration(&self, state: &RunState) {
        info!(
            run = %state.run_name,
            dry_run = state.dry_run,
            "test run configuration"
        );
        info!(tries_per_setting = self.options.tries_per_setting, "glitch ranges:");
        for name in self.space.param_order() {
            let range = self.space.range(*name);
            if range.is_static() {
                info!(" - {:>10}: {}", name.as_str(), range.min());
            } else {
                info!(
                    " - {:>10}: min = {:5.1}  max = {:5.1}  step = {:?}",
                    name.as_str(),
                    range.min(),
                    range.max(),
                    range.step()
                );
            }
        }
        info!(total = state.planned, "total number of iterations");
    }

    fn drive(&mut self, state: &mut RunState) -> Result<(), Halt> {
        if state.dry_run {
            self.device.glitch_disable()?;
        } else {
            self.device.glitch_enable(&self.glitch_outputs)?;
        }
        self.device.reacquire_clock()?;
        self.log_configuration(state);
        info!("prepping run");
        self.device.reboot_flush(&self.reset_pulse)?;
        self.device.prepare_run()?;
        self.device.reacquire_clock()?;
        info!(dry_run = state.dry_run, "starting test run");

        for setting in self.space.glitch_values() {
            let width = SettingLayout::value(&setting, self.layout.width);
            if state.last_width != Some(width) {
                state.reset_history.clear();
                state.last_width = Some(width);
            }
            for try_idx in 0..self.options.tries_per_setting {
                self.attempt(state, &setting, try_idx)?;
            }
        }
        Ok(())
    }

    fn skip_reason(&self, state: &RunState, setting: &Setting) -> Option<String> {
        let width = SettingLayout::value(setting, self.layout.width);
        let offset = SettingLayout::value(setting, self.layout.offset);
        let repeat = SettingLayout::value(setting, self.layout.repeat);
        if !self.options.use_0_width_offset {
            if self.layout.width_swept && in_zero_crossing_band(width) {
                return Some("width = 0".to_string());
            }
            if self.layout.offset_swept && in_zero_crossing_band(offset) {
                return Some("offset = 0".to_string());
            }
        }
        state
            .bad_settings
            .matching(width, repeat)
            .map(|rule| rule.to_string())
    }

    fn attempt(&mut self, state: &mut RunState, setting: &Setting, try_idx: u64) -> Result<(), Halt> {
        if self.stop.is_stop_requested() {
            info!("Interrupted by user");
            return Err(Halt::Stop(RunOutcome::Interrupted));
        }
        if let Some(max) = self.options.max_iterations {
            if state.attempts >= max {
                info!(max_iterations = max, "iteration limit reached");
                return Err(Halt::Stop(RunOutcome::IterationLimit));
            }
        }

        if self.options.long_trigger_high_is_reset && self.device.trigger_line_high()? {
            let previous = state.last_setting.clone();
            self.handle_reset(state, previous.as_ref(), " Trigger still high")?;
        }
        if state.consecutive_resets >= self.options.consecutive_reset_limit()
            || state.consecutive_timeouts >= self.options.max_consec_timeouts
        {
            self.check_responsive(state)?;
        }

        if let Some(reason) = self.skip_reason(state, setting) {
            if state.reported_skip.as_deref() != Some(reason.as_str()) {
                info!("* Skipping bad setting: {reason}");
                state.reported_skip = Some(reason);
            }
            self.record(state, setting, Outcome::Skipped, " Bad setting")?;
            state.skipped += 1;
            return Ok(());
        }

        if try_idx == 0 {
            self.apply_setting(state, setting)?;
        }
        state.last_setting = Some(setting.clone());
        if state.attempts % self.options.iter_before_report_status == 0 {
            self.report_status(state, setting);
        }

        state.attempts += 1;
        self.total_attempts += 1;
        self.device.arm()?;
        if !self.device.trigger_attempt()? {
            return Err(Halt::Fail(CampaignError::TriggerRefused));
        }

        let timed_out = self.options.should_block_and_check_for_reset
            && self.device.wait_or_timeout(self.options.retry_on_timeout)? == WaitStatus::TimedOut;
        if timed_out {
            state.consecutive_timeouts += 1;
            self.device.reacquire_clock()?;
            self.handle_reset(state, Some(setting), " Scope timed out")?;
        } else {
            state.consecutive_timeouts = 0;
            let response = self.device.read_response()?;
            self.device.glitch_disable()?;
            let outcome = self.classifier.classify(&response);
            if outcome.is_reset() {
                self.handle_reset(state, Some(setting), "")?;
            } else {
                state.consecutive_resets = 0;
                state.reset_history.clear();
                let success = outcome.is_success();
                self.record(state, setting, outcome, "")?;
                if success {
                    debug!(?response, "success data");
                    if self.options.should_break_on_success {
                        warn!("SUCCESSFUL RESULT FOUND!! Breaking...");
                        return Err(Halt::Stop(RunOutcome::StoppedOnSuccess {
                            setting: setting.clone(),
                        }));
                    }
                }
            }
        }

        if self.options.max_total_resets > 0 && state.total_resets > self.options.max_total_resets {
            self.report_status(state, setting);
            info!(total_resets = state.total_resets, "too many resets, exiting");
            return Err(Halt::Stop(RunOutcome::StoppedTooManyResets));
        }
        if let Some(pause) = self.pacing.break_after(state.attempts) {
            if pause.kind.checkpoints() && !self.options.no_save {
                self.checkpoint(state);
            }
            self.take_break(state, pause.kind, pause.duration);
        }
        if !state.dry_run {
            self.device.glitch_enable(&self.glitch_outputs)?;
        }
        Ok(())
    }

    fn apply_setting(&mut self, state: &mut RunState, setting: &Setting) -> Result<(), DeviceError> {
        for (name, idx, is_static) in &self.layout.params {
            if state.first_apply || !*is_static {
                self.device
                    .apply_parameter(*name, SettingLayout::value(setting, *idx))?;
            }
        }
        state.first_apply = false;
        Ok(())
    }

    fn record(
        &mut self,
        state: &RunState,
        setting: &Setting,
        outcome: Outcome,
        reason: &str,
    ) -> Result<(), ResultsError> {
        let run_num = state.processed();
        let line = self.space.stringify_setting(setting);
        let label = outcome.group_name().to_uppercase();
        match outcome {
            Outcome::Normal => debug!("[{run_num}] {line}.........[{label}]{reason}"),
            Outcome::Skipped => trace!("[{run_num}] {line}.........[{label}]{reason}"),
            _ => info!("[{run_num}] {line}.........[{label}]{reason}"),
        }
        self.results.add(&outcome, setting)?;
        if outcome.is_success() {
            self.successful_settings.push(setting.clone());
        }
        Ok(())
    }

    fn handle_reset(
        &mut self,
        state: &mut RunState,
        setting: Option<&Setting>,
        reason: &str,
    ) -> Result<(), Halt> {
        if let Some(setting) = setting {
            self.record(state, setting, Outcome::Reset, reason)?;
            state.reset_history.push(setting.clone());
        }
        self.device.reboot_flush(&self.reset_pulse)?;
        state.total_resets += 1;
        state.consecutive_resets += 1;
        if state.dry_run {
            state.dry_run_resets += 1;
            info!(
                "Getting resets on dry run ({}/{})!!",
                state.dry_run_resets, self.options.max_total_dry_run_resets
            );
            if state.dry_run_resets >= self.options.max_total_dry_run_resets {
                info!("too many resets on dry run, exiting");
                return Err(Halt::Stop(RunOutcome::StoppedTooManyDryRunResets));
            }
        }
        Ok(())
    }

    /// One attempt with glitching disabled. `true` if the target answered.
    fn reference_attempt(&mut self) -> Result<bool, CampaignError> {
        self.device.glitch_disable()?;
        self.device.reboot_flush(&self.reset_pulse)?;
        self.device.arm()?;
        if !self.device.trigger_attempt()? {
            return Err(CampaignError::TriggerRefused);
        }
        if self.device.wait_or_timeout(self.options.retry_on_timeout)? == WaitStatus::TimedOut {
            return Ok(false);
        }
        let response = self.device.read_response()?;
        Ok(!self.classifier.classify(&response).is_reset())
    }

    fn probe(&mut self) -> bool {
        match self.reference_attempt() {
            Ok(alive) => alive,
            Err(err) => {
                warn!(%err, "reference attempt failed");
                false
            }
        }
    }

    /// Liveness probe after too many consecutive resets or timeouts.
    fn check_responsive(&mut self, state: &mut RunState) -> Result<(), Halt> {
        warn!(
            consecutive_resets = state.consecutive_resets,
            consecutive_timeouts = state.consecutive_timeouts,
            "target may be unresponsive, trying a reference attempt"
        );
        if !self.probe() {
            if self.device.is_connected() {
                warn!("***** Target is unresponsive but the link is up, retrying...");
            } else {
                warn!("***** Target is unresponsive, attempting reconnect...");
                if let Err(err) = self.device.reconnect() {
                    error!(%err, "reconnect failed");
                    return Err(Halt::Fail(CampaignError::DeviceUnresponsive(format!(
                        "reconnect failed: {err}"
                    ))));
                }
            }
            thread::sleep(self.options.reconnect_wait());
            if !self.probe() {
                error!("***** Target is still unresponsive, exiting...");
                return Err(Halt::Fail(CampaignError::DeviceUnresponsive(
                    "reference attempt failed twice".to_string(),
                )));
            }
            info!("target answered on the second reference attempt");
        } else if self.options.max_consec_resets_per_bad_setting > 0
            && state.consecutive_resets >= self.options.max_consec_resets_per_bad_setting
        {
            if let Some(rule) = self.layout.detect_bad_setting(&state.reset_history) {
                warn!("***** Detected bad setting: {rule}, skipping these settings for the rest of the run...");
                state.bad_settings.install(rule);
            }
        }
        state.consecutive_resets = 0;
        state.consecutive_timeouts = 0;
        state.reset_history.clear();
        if !state.dry_run {
            self.device.glitch_enable(&self.glitch_outputs)?;
        }
        Ok(())
    }

    fn report_status(&self, state: &RunState, next: &Setting) {
        let status = CampaignStatus::snapshot(
            &self.results,
            &self.pacing,
            state.processed(),
            state.planned,
            state.started.elapsed(),
        );
        info!("* STATUS {status}");
        info!(" - Next params: {}", self.space.stringify_setting(next));
    }

    fn checkpoint(&self, state: &mut RunState) {
        match save_session(&state.session, &self.session_config(), &self.results) {
            Ok(()) => {
                state.checkpoints += 1;
                debug!(dir = %state.session.dir.display(), "checkpoint saved");
            }
            Err(err) => error!(%err, "checkpoint failed"),
        }
    }

    fn take_break(&self, state: &mut RunState, kind: BreakKind, duration: Duration) {
        info!(?kind, "*** taking a break for {:.0} seconds...", duration.as_secs_f64());
        thread::sleep(duration);
        state.breaks += 1;
    }

    fn log_final_results(&self, state: &RunState) {
        info!("******** Final results:");
        if self.total_attempts != state.attempts {
            info!(" - Total attempts of all runs: {}", self.total_attempts);
        }
        info!(" - Number of run attempts: {}", state.attempts);
        info!(" - Total time: {:.1}s", state.started.elapsed().as_secs_f64());
        let total = self.results.total();
        for (group, count) in self.results.group_counts() {
            let rate = if total > 0 { count as f64 / total as f64 } else { 0.0 };
            info!(" - {:10}: {:10} ({:.1}%)", group, count, rate * 100.0);
        }
        if !self.successful_settings.is_empty() {
            info!("Successful glitch settings:");
            for setting in &self.successful_settings {
                info!(" - {}", self.space.stringify_setting(setting));
            }
        }
    }

    /// Disables the glitch outputs and drains an armed capture.
    fn teardown_device(&mut self) {
        if let Err(err) = self.device.glitch_disable() {
            warn!(%err, "could not disable glitch outputs during teardown");
        }
        if self.device.is_armed() {
            if let Err(err) = self.device.wait_or_timeout(false) {
                warn!(%err, "could not drain armed capture during teardown");
            }
        }
    }

    fn finish_run(
        &mut self,
        state: RunState,
        result: Result<RunOutcome, CampaignError>,
    ) -> Result<RunOutcome, CampaignError> {
        self.teardown_device();
        self.log_final_results(&state);

        let saved = if self.options.no_save {
            Ok(false)
        } else {
            info!("Saving glitching session...");
            save_session(&state.session, &self.session_config(), &self.results).map(|()| {
                info!(dir = %state.session.dir.display(), "glitching session saved");
                true
            })
        };
        if let Err(err) = self.device.after_run() {
            warn!(%err, "after-run hook failed");
        }

        let session_saved = matches!(saved, Ok(true));
        self.last_run = Some(state.stats(session_saved));

        match (result, saved) {
            (Ok(outcome), Ok(_)) => {
                info!(?outcome, "run finished");
                Ok(outcome)
            }
            (Ok(_), Err(save_err)) => Err(save_err.into()),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(save_err)) => {
                error!(%save_err, "could not save session after failed run");
                Err(err)
            }
        }
    }

    /// Captures `total_attempts` traces with glitching disabled.
    ///
    /// Resets are counted and recovered from; `max-total-resets` (when nonzero)
    /// ends the capture early. Traces are written to
    /// `<results_dir>/traces/<name>_<timestamp>/` unless `no-save` is set.
    pub fn capture_sequence(&mut self, total_attempts: u64) -> Result<CaptureReport, CampaignError> {
        if !self.options.no_save {
            ensure_writable_dir(&self.options.results_dir)?;
        }
        let started = Instant::now();
        let started_at = Local::now();
        let mut traces = Vec::new();
        let mut resets = 0;
        let mut attempts = 0;

        let result = match self.drive_capture(total_attempts, started, &mut traces, &mut resets, &mut attempts) {
            Ok(()) => {
                info!("Done!");
                Ok(RunOutcome::Completed)
            }
            Err(Halt::Stop(outcome)) => Ok(outcome),
            Err(Halt::Fail(err)) => {
                error!(%err, "exception occurred during capture run");
                Err(err)
            }
        };

        self.teardown_device();
        info!(attempts, resets, traces = traces.len(), "capture finished");
        let archived = if self.options.no_save || traces.is_empty() {
            if traces.is_empty() {
                warn!("no traces to write");
            }
            Ok(None)
        } else {
            self.write_traces(started_at, &traces).map(Some)
        };
        if let Err(err) = self.device.after_run() {
            warn!(%err, "after-run hook failed");
        }

        match (result, archived) {
            (Ok(outcome), Ok(archive_dir)) => Ok(CaptureReport {
                outcome,
                attempts,
                resets,
                traces,
                archive_dir,
            }),
            (Ok(_), Err(archive_err)) => Err(archive_err),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(archive_err)) => {
                error!(%archive_err, "could not write traces after failed capture");
                Err(err)
            }
        }
    }

    fn drive_capture(
        &mut self,
        total_attempts: u64,
        started: Instant,
        traces: &mut Vec<TraceRecord>,
        resets: &mut u64,
        attempts: &mut u64,
    ) -> Result<(), Halt> {
        self.device.glitch_disable()?;
        info!("******** Starting capture run...");
        info!(total = total_attempts, "total number of iterations");
        self.device.reboot_flush(&self.reset_pulse)?;
        self.device.reacquire_clock()?;
        self.device.prepare_run()?;
        self.device.reacquire_clock()?;

        for attempt in 0..total_attempts {
            if self.stop.is_stop_requested() {
                info!("Interrupted by user");
                return Err(Halt::Stop(RunOutcome::Interrupted));
            }
            if self.options.long_trigger_high_is_reset && self.device.trigger_line_high()? {
                info!("Trigger still high!");
                self.device.reboot_flush(&self.reset_pulse)?;
                *resets += 1;
            }
            if attempt % self.options.iter_before_report_status == 0 {
                info!(
                    "*** STATUS [{} / {}] ({:.1}s): resets = {}",
                    attempt,
                    total_attempts,
                    started.elapsed().as_secs_f64(),
                    resets
                );
            }

            *attempts += 1;
            self.device.arm()?;
            if !self.device.trigger_attempt()? {
                return Err(Halt::Fail(CampaignError::TriggerRefused));
            }
            let timed_out = self.options.should_block_and_check_for_reset
                && self.device.wait_or_timeout(false)? == WaitStatus::TimedOut;
            if timed_out {
                *resets += 1;
                info!("Detected reset during capture!!");
                self.device.reboot_flush(&self.reset_pulse)?;
            } else {
                if let Some(samples) = self.device.last_trace() {
                    traces.push(TraceRecord { attempt, samples });
                }
                let response = self.device.read_response()?;
                if self.classifier.classify(&response).is_reset() {
                    *resets += 1;
                    self.device.reboot_flush(&self.reset_pulse)?;
                }
            }

            if self.options.max_total_resets > 0 && *resets > self.options.max_total_resets {
                info!("Too many resets, exiting...");
                return Err(Halt::Stop(RunOutcome::StoppedTooManyResets));
            }
            if let Some(pause) = self.pacing.break_after(*attempts) {
                info!("*** taking a break for {:.0} seconds...", pause.duration.as_secs_f64());
                thread::sleep(pause.duration);
            }
        }
        Ok(())
    }

    fn write_traces(
        &self,
        started_at: DateTime<Local>,
        traces: &[TraceRecord],
    ) -> Result<PathBuf, CampaignError> {
        let traces_dir = self.options.results_dir.join("traces");
        ensure_writable_dir(&traces_dir)?;
        let dir = traces_dir.join(format!("{}_{}", self.name, started_at.format(DATE_FORMAT)));
        let mut archive = TraceArchive::open(dir)?;
        archive.append_all(traces)?;
        info!(dir = %archive.dir().display(), count = archive.len(), "traces saved");
        Ok(archive.dir().to_path_buf())
    }
}

/// Session directory name with its `_<timestamp>` suffix removed.
fn session_name(paths: &SessionPaths) -> String {
    let base = paths
        .dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_CAMPAIGN_NAME);
    // The timestamp is always 19 characters long.
    base.char_indices()
        .rev()
        .nth(18)
        .and_then(|(split, _)| {
            let (head, stamp) = base.split_at(split);
            let name = head.strip_suffix('_')?;
            NaiveDateTime::parse_from_str(stamp, DATE_FORMAT)
                .ok()
                .map(|_| name.to_string())
        })
        .unwrap_or_else(|| base.to_string())
}
