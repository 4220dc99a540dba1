use sparkgap_core::campaign::{Campaign, RunOutcome, StopHandle};
use sparkgap_core::config::{CampaignFile, CampaignOptions};
use sparkgap_core::outcome::ExpectedResponseClassifier;
use sparkgap_core::session::load_session;
use sparkgap_core::sim::SimulatedDevice;

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILES: [&str; 2] = ["sparkgap.toml", "config.toml"];

/// Runs a glitch campaign against the simulated target.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Campaign name used for session directories.
    #[clap(short, long)]
    name: Option<String>,
    /// Run every setting with the glitch outputs disabled.
    #[clap(long)]
    dry_run: bool,
    /// Resume from a saved session directory. The campaign file then only
    /// supplies the simulator settings.
    #[clap(long, value_parser)]
    resume: Option<PathBuf>,
    /// Capture this many traces instead of sweeping the parameter space.
    #[clap(long)]
    capture: Option<u64>,
    /// Stop after this many attempts.
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Override the simulator seed.
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long)]
    no_save: bool,
    /// Log every attempt (`-v`) or every skipped setting too (`-vv`).
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_campaign_file(path: Option<&Path>) -> Result<CampaignFile, anyhow::Error> {
    if let Some(path) = path {
        info!("Loading campaign from specified path: {path:?}");
        return CampaignFile::load_from_file(path);
    }
    for candidate in DEFAULT_CONFIG_FILES {
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            info!("No campaign file specified, loading default: {candidate:?}");
            return CampaignFile::load_from_file(&candidate);
        }
    }
    info!("No campaign file specified and no default found, using built-in defaults.");
    Ok(CampaignFile::default())
}

fn apply_overrides(cli: &Cli, options: &mut CampaignOptions) {
    if cli.iterations.is_some() {
        options.max_iterations = cli.iterations;
    }
    options.no_save |= cli.no_save;
}

/// Handler for SIGINT: the campaign finishes its current attempt, then tears
/// down and saves the session.
fn interrupt_handler(stop: StopHandle) -> impl Fn() + Send + 'static {
    move || {
        if stop.is_stop_requested() {
            warn!("Interrupt already requested, still waiting for the current attempt");
        } else {
            warn!("Interrupt received, stopping after the current attempt");
        }
        stop.request_stop();
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file = load_campaign_file(cli.config_file.as_deref())?;
    let mut sim_settings = file.simulation.clone().unwrap_or_default();
    if let Some(seed) = cli.seed {
        sim_settings.seed = seed;
    }
    let mut classifier =
        ExpectedResponseClassifier::new(sim_settings.expected_response.clone().into_bytes());
    let mut device = SimulatedDevice::new(sim_settings);

    let mut campaign = match &cli.resume {
        Some(dir) => {
            info!("Resuming glitching session from {dir:?}");
            let mut session = load_session(dir)?;
            apply_overrides(&cli, &mut session.config.campaign);
            Campaign::from_session(session, &mut device, &mut classifier)?
        }
        None => {
            let space = file.params.build_space()?;
            let mut options = file.campaign.clone();
            apply_overrides(&cli, &mut options);
            Campaign::new(options, space, &mut device, &mut classifier)?
        }
    };
    if let Some(name) = cli.name.clone() {
        campaign = campaign.with_name(name);
    }
    ctrlc::set_handler(interrupt_handler(campaign.stop_handle()))
        .map_err(|e| anyhow::anyhow!("failed to install the Ctrl-C handler: {e}"))?;

    if let Some(attempts) = cli.capture {
        let report = campaign.capture_sequence(attempts)?;
        info!(
            "Capture finished ({:?}): {} attempts, {} resets, {} traces",
            report.outcome,
            report.attempts,
            report.resets,
            report.traces.len()
        );
        if let Some(dir) = report.archive_dir {
            info!("Traces written to {dir:?}");
        }
        return Ok(());
    }

    match campaign.run_sequence(cli.dry_run)? {
        RunOutcome::StoppedOnSuccess { setting } => {
            info!("Stopped on success at {}", campaign.space().stringify_setting(&setting));
        }
        RunOutcome::StoppedTooManyResets | RunOutcome::StoppedTooManyDryRunResets => {
            warn!("Run stopped early: too many resets");
        }
        outcome => info!("Run finished: {outcome:?}"),
    }
    info!("{}", campaign.status());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_handler_requests_a_stop() {
        let stop = StopHandle::new();
        let handler = interrupt_handler(stop.clone());
        assert!(!stop.is_stop_requested());
        handler();
        assert!(stop.is_stop_requested());
        handler();
        assert!(stop.is_stop_requested(), "a second interrupt keeps the request");
    }
}
