use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::optimizer::QParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Daemon settings, read from `config.json` and then `SERPENT_*` env vars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Minimum wall-clock gap between two progress snapshots of one run.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// Default cadence of `WatchJob` streams.
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
    /// Play session tick rate.
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_grid_size")]
    pub default_grid_size: usize,
    #[serde(default = "default_n_envs")]
    pub default_n_envs: usize,
    #[serde(default = "default_max_steps")]
    pub default_max_steps: u32,
    #[serde(default)]
    pub q: QParams,
}

fn default_listen_addr() -> String {
    "127.0.0.1:9877".to_string()
}

fn default_report_interval_ms() -> u64 {
    500
}

fn default_watch_interval_ms() -> u64 {
    1000
}

fn default_target_fps() -> u32 {
    10
}

fn default_grid_size() -> usize {
    10
}

fn default_n_envs() -> usize {
    4
}

fn default_max_steps() -> u32 {
    150
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            report_interval_ms: default_report_interval_ms(),
            watch_interval_ms: default_watch_interval_ms(),
            target_fps: default_target_fps(),
            default_grid_size: default_grid_size(),
            default_n_envs: default_n_envs(),
            default_max_steps: default_max_steps(),
            q: QParams::default(),
        }
    }
}

impl DaemonConfig {
    /// Load `path` if it exists (defaults otherwise), then apply the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `SERPENT_*` variables. Unparseable values are
    /// logged and skipped.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // SERPENT_ADDR=127.0.0.1:9877
        if let Some(v) = lookup("SERPENT_ADDR") {
            let v = v.trim();
            if !v.is_empty() {
                self.listen_addr = v.to_string();
            }
        }

        // SERPENT_REPORT_INTERVAL_MS=500
        if let Some(n) = parse_var(&lookup, "SERPENT_REPORT_INTERVAL_MS") {
            self.report_interval_ms = n;
        }

        // SERPENT_WATCH_INTERVAL_MS=1000
        if let Some(n) = parse_var::<u64>(&lookup, "SERPENT_WATCH_INTERVAL_MS") {
            self.watch_interval_ms = n.max(1);
        }

        // SERPENT_FPS=10
        if let Some(n) = parse_var::<u32>(&lookup, "SERPENT_FPS") {
            self.target_fps = n.clamp(1, 240);
        }

        if let Some(n) = parse_var(&lookup, "SERPENT_GRID_SIZE") {
            self.default_grid_size = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "SERPENT_N_ENVS") {
            self.default_n_envs = n.max(1);
        }
        if let Some(n) = parse_var(&lookup, "SERPENT_MAX_STEPS") {
            self.default_max_steps = n;
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}
