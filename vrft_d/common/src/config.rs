use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Store holding one directory per installed module, plus loose legacy
    /// libraries.
    pub modules_dir: PathBuf,

    /// Modules built against an older contract than this are not loaded.
    pub min_api_version: u32,

    /// How long teardown waits for a module thread before giving up on it.
    pub teardown_timeout_ms: u64,

    pub status_log_interval_secs: u64,

    /// Cadence of the host's read loop over the tracking state.
    pub max_fps: Option<f32>,
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("plugins").join("modules")
}

fn default_teardown_timeout_ms() -> u64 {
    2000
}

fn default_status_log_interval_secs() -> u64 {
    10
}

fn default_max_fps() -> Option<f32> {
    Some(100.0)
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            min_api_version: api::API_VERSION,
            teardown_timeout_ms: default_teardown_timeout_ms(),
            status_log_interval_secs: default_status_log_interval_secs(),
            max_fps: default_max_fps(),
        }
    }
}

impl HostConfig {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn frame_duration(&self) -> Option<Duration> {
        self.max_fps
            .filter(|fps| *fps > 0.0)
            .map(|fps| Duration::from_secs_f32(1.0 / fps))
    }
}

/// Reads the config at `path`, writing the defaults there first if it does
/// not exist yet.
pub fn load_config(path: &Path) -> Result<HostConfig> {
    if path.exists() {
        info!("Loading config from {:?}", path);
        let file = fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    } else {
        info!("Config not found. Creating default at {:?}", path);
        let config = HostConfig::default();
        let file = fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &config)?;
        Ok(config)
    }
}
