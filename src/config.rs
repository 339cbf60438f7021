// Runtime settings: defaults, then an optional settings file, then HITGRID_*
// environment variables. Later sources win.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::shared::DEFAULT_BPM;

pub const DATA_DIR: &str = ".hitgrid";
pub const SETTINGS_FILE: &str = "hitgrid.toml";
pub const LOG_FILE: &str = "hitgrid.log";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("settings load/parse error: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Settings {
    /// Rate for offline renders and loaded assets when no device is open.
    pub sample_rate: u32,
    /// Tempo for projects that have no song yet.
    pub default_bpm: u32,
    pub log_filter: String,
    pub share_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            default_bpm: DEFAULT_BPM,
            log_filter: "info".to_string(),
            share_base_url: "https://hitgrid.app/song".to_string(),
        }
    }
}

impl Settings {
    /// Layer the sources. `file` is optional: a missing file is not an error,
    /// a malformed one is.
    pub fn load(file: Option<&Path>) -> Result<Settings, ConfigError> {
        let d = Settings::default();
        let mut builder = Config::builder()
            .set_default("sample_rate", d.sample_rate as i64)?
            .set_default("default_bpm", d.default_bpm as i64)?
            .set_default("log_filter", d.log_filter)?
            .set_default("share_base_url", d.share_base_url)?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("HITGRID").try_parsing(true))
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }
}

/// `--data-dir`, or `./.hitgrid` beside the working directory.
pub fn data_dir(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(DATA_DIR)
    })
}
