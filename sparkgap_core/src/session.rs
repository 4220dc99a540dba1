//! Campaign sessions on disk.
//!
//! A session lives in `<results_dir>/<name>_<timestamp>/` and holds
//! `<name>_<timestamp>.json` (options and parameter space) next to
//! `<name>_<timestamp>.csv` (the results table). Both are written to a `.tmp`
//! sibling first and renamed into place.

use crate::config::{CampaignOptions, OptionsError};
use crate::params::{ParamError, ParameterSpace};
use crate::results::{ResultsError, ResultsStore, read_results_csv};
use crate::setting::Setting;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Timestamp format used in session and trace directory names.
pub const DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("directory {path:?} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("{0:?} is not a session directory")]
    InvalidSessionDir(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SessionError + '_ {
    move |source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The JSON half of a session: every run option plus the parameter space.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub campaign: CampaignOptions,
    pub glitch_params: ParameterSpace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub json: PathBuf,
    pub csv: PathBuf,
}

impl SessionPaths {
    pub fn new(results_dir: &Path, name: &str, started: DateTime<Local>) -> Self {
        let base = format!("{}_{}", name, started.format(DATE_FORMAT));
        Self::with_base(results_dir.join(&base), &base)
    }

    /// Paths of an existing session, named after its directory.
    pub fn from_dir(dir: &Path) -> Result<Self, SessionError> {
        let base = dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SessionError::InvalidSessionDir(dir.to_path_buf()))?
            .to_string();
        Ok(Self::with_base(dir.to_path_buf(), &base))
    }

    fn with_base(dir: PathBuf, base: &str) -> Self {
        let json = dir.join(format!("{base}.json"));
        let csv = dir.join(format!("{base}.csv"));
        Self { dir, json, csv }
    }
}

/// Creates `dir` if needed and proves it is writable by creating and removing a probe file.
pub fn ensure_writable_dir(dir: &Path) -> Result<(), SessionError> {
    let not_writable = |source| SessionError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = tempfile::Builder::new()
        .prefix(".sparkgap-probe")
        .tempfile_in(dir)
        .map_err(not_writable)?;
    probe.close().map_err(io_error(dir))
}

/// Writes `bytes` to `<path>.tmp`, then renames it over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, bytes).map_err(io_error(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(io_error(path))
}

pub fn save_session(
    paths: &SessionPaths,
    config: &SessionConfig,
    results: &ResultsStore,
) -> Result<(), SessionError> {
    ensure_writable_dir(&paths.dir)?;
    let json = serde_json::to_vec_pretty(config)?;
    write_atomically(&paths.json, &json)?;
    write_atomically(&paths.csv, &results.to_csv_bytes()?)?;
    debug!(dir = %paths.dir.display(), settings = results.len(), "session written");
    Ok(())
}

/// A session restored from disk.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub paths: SessionPaths,
    pub config: SessionConfig,
    pub results: ResultsStore,
    /// Settings with a nonzero success count, in results order.
    pub successful_settings: Vec<Setting>,
}

/// Loads the JSON config, rebuilds the parameter space, then replays the CSV
/// (if present) into a fresh results store.
pub fn load_session(dir: &Path) -> Result<LoadedSession, SessionError> {
    let paths = SessionPaths::from_dir(dir)?;
    let json = fs::read(&paths.json).map_err(io_error(&paths.json))?;
    let config: SessionConfig = serde_json::from_slice(&json)?;
    config.campaign.validate()?;

    let mut results = ResultsStore::for_space(&config.glitch_params);
    let successful_settings = if paths.csv.exists() {
        let table = read_results_csv(&paths.csv)?;
        results.replay(&table)?
    } else {
        Vec::new()
    };

    Ok(LoadedSession {
        paths,
        config,
        results,
        successful_settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::params::ParamName;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn config() -> SessionConfig {
        let mut space = ParameterSpace::new();
        space.set_range(ParamName::Width, [-4.0, 4.0, 0.5]).unwrap();
        space.set_range(ParamName::Repeat, 3i64).unwrap();
        space
            .set_custom_groups(vec!["interesting".to_string()])
            .unwrap();
        let mut campaign = CampaignOptions::default();
        campaign.tries_per_setting = 2;
        SessionConfig {
            campaign,
            glitch_params: space,
        }
    }

    #[test]
    fn session_paths_use_name_and_timestamp() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let paths = SessionPaths::new(Path::new("/data/results"), "stm32", started);
        assert_eq!(paths.dir, PathBuf::from("/data/results/stm32_2024-03-09_14-05-07"));
        assert_eq!(
            paths.json,
            PathBuf::from("/data/results/stm32_2024-03-09_14-05-07/stm32_2024-03-09_14-05-07.json")
        );
        assert_eq!(paths.csv.extension().unwrap(), "csv");
    }

    #[test]
    fn atomic_writes_leave_no_temporary_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.json");
        fs::write(&target, b"old").unwrap();
        write_atomically(&target, b"new").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!dir.path().join("out.json.tmp").exists());
    }

    #[test]
    fn unwritable_results_dir_is_reported() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ensure_writable_dir(&file.join("sub")),
            Err(SessionError::NotWritable { .. })
        ));
    }

    #[test]
    fn saved_session_loads_back() {
        let dir = tempdir().unwrap();
        let config = config();
        let mut results = ResultsStore::for_space(&config.glitch_params);
        let hit = Setting::new(vec![1.5, -2.0, 12.0, 3.0]);
        let miss = Setting::new(vec![2.0, -2.0, 12.0, 3.0]);
        results.add(&Outcome::Success, &hit).unwrap();
        results.add(&Outcome::Reset, &hit).unwrap();
        results.add(&Outcome::Normal, &miss).unwrap();
        results
            .add(&Outcome::Custom("interesting".to_string()), &miss)
            .unwrap();

        let started = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let paths = SessionPaths::new(dir.path(), "target", started);
        save_session(&paths, &config, &results).unwrap();

        let loaded = load_session(&paths.dir).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.successful_settings, vec![hit.clone()]);
        assert_eq!(loaded.results.count(&hit, "reset"), 1);
        assert_eq!(loaded.results.count(&miss, "interesting"), 1);
        assert_eq!(loaded.results.total(), 4);
        assert_eq!(loaded.paths, paths);
    }

    #[test]
    fn json_is_kebab_case_with_nested_params() {
        let json = serde_json::to_value(config()).unwrap();
        assert_eq!(json["campaign"]["tries-per-setting"], 2);
        assert_eq!(json["glitch-params"]["repeat-range"], 3.0);
    }

    #[test]
    fn missing_csv_loads_an_empty_store() {
        let dir = tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let paths = SessionPaths::new(dir.path(), "target", started);
        ensure_writable_dir(&paths.dir).unwrap();
        write_atomically(&paths.json, &serde_json::to_vec(&config()).unwrap()).unwrap();
        let loaded = load_session(&paths.dir).unwrap();
        assert!(loaded.results.is_empty());
        assert!(loaded.successful_settings.is_empty());
    }
}
