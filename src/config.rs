//! TOML configuration for the testdash daemon and CLI.
//!
//! Layered lookup: an explicit path, the `TESTDASH_CONFIG` environment
//! variable, `./testdash.toml`, `/etc/testdash/testdash.toml`, then the
//! compiled-in defaults. Every section is optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TESTDASH_CONFIG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub projects: ProjectsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DashboardConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded testdash configuration");
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// An explicit path must load; the fallback locations are best-effort and
    /// only warn when present but broken.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TESTDASH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        for candidate in [Path::new("testdash.toml"), Path::new("/etc/testdash/testdash.toml")] {
            if !candidate.exists() {
                continue;
            }
            match Self::load(candidate) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %candidate.display(),
                        error = %e,
                        "config file exists but could not be loaded, skipping"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the API and live channel.
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:3100".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Where test-enabled projects live on this host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Directory whose immediate children are scanned for projects.
    pub root: PathBuf,
    /// Optional per-project manifest file name.
    pub manifest_name: String,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("projects"),
            manifest_name: "testdash.toml".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// External test-runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Program to execute (resolved via `$PATH`).
    pub program: String,
    /// Leading arguments shared by real runs and listings.
    pub args: Vec<String>,
    /// Appended for real runs: must produce line progress and a JSON report.
    pub reporter_args: Vec<String>,
    /// Appended for the dry listing pass.
    pub list_args: Vec<String>,
    /// Wall-clock ceiling for a real run (seconds).
    pub timeout_secs: u64,
    /// Wall-clock ceiling for the listing pass (seconds).
    pub list_timeout_secs: u64,
    /// Extra environment passed to every runner process.
    pub env: BTreeMap<String, String>,
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["playwright".to_string(), "test".to_string()],
            reporter_args: vec!["--reporter=line,json".to_string()],
            list_args: vec!["--list".to_string()],
            timeout_secs: 600,
            list_timeout_secs: 60,
            env: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Run history persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/testdash.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Live channel
// ---------------------------------------------------------------------------

/// Live broadcast tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Events buffered per observer before a slow observer starts skipping.
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
