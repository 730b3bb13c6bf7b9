use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::ACTIVITY_LIMIT;
use crate::history::HISTORY_LIMIT;

/// Prefix of the environment variables that override defaults.
pub const ENV_PREFIX: &str = "SCAN_CONSOLE_";

/// Runtime settings. Every field has a default so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the scanning service's HTTP API.
    pub backend_url: String,
    /// `host:port` of the newline-delimited JSON event feed, if any.
    pub events_addr: Option<String>,
    /// Directory the history log is kept in.
    pub history_dir: PathBuf,
    pub history_limit: usize,
    pub activity_limit: usize,
    /// Seconds between dashboard snapshot pulls; 0 disables the pull.
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Address the embedded console server listens on.
    pub bind: String,
    /// Static UI directory served by the embedded server.
    pub ui_dir: PathBuf,
    pub log_level: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5000".into(),
            events_addr: None,
            history_dir: default_history_dir(),
            history_limit: HISTORY_LIMIT,
            activity_limit: ACTIVITY_LIMIT,
            refresh_interval_secs: 30,
            request_timeout_secs: 10,
            bind: "127.0.0.1:8080".into(),
            ui_dir: PathBuf::from("ui"),
            log_level: "info".into(),
        }
    }
}

impl ConsoleConfig {
    /// Load from `path` when one is given, otherwise start from defaults and
    /// apply `SCAN_CONSOLE_*` environment overrides. A given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if !p.exists() => {
                bail!("config file not found: {}", p.display())
            }
            Some(p) => Self::from_file(p),
            None => Self::from_env(|key| env::var(key).ok()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BACKEND_URL") {
            cfg.backend_url = v;
        }
        if let Some(v) = var("EVENTS_ADDR") {
            cfg.events_addr = Some(v);
        }
        if let Some(v) = var("HISTORY_DIR") {
            cfg.history_dir = PathBuf::from(v);
        }
        if let Some(v) = var("HISTORY_LIMIT") {
            cfg.history_limit = v.parse().with_context(|| format!("{ENV_PREFIX}HISTORY_LIMIT: {v}"))?;
        }
        if let Some(v) = var("REFRESH_INTERVAL_SECS") {
            cfg.refresh_interval_secs = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}REFRESH_INTERVAL_SECS: {v}"))?;
        }
        if let Some(v) = var("BIND") {
            cfg.bind = v;
        }
        if let Some(v) = var("UI_DIR") {
            cfg.ui_dir = PathBuf::from(v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            cfg.log_level = v;
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// `~/.scan-console`, or the working directory when no home is known.
pub fn default_history_dir() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".scan-console"))
        .unwrap_or_else(|| PathBuf::from(".scan-console"))
}
