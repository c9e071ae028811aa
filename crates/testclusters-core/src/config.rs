//! Configuration for testclusters
//!
//! `FixtureConfig` holds harness-wide knobs (logging, timeouts, log tailing,
//! the injected JVM argline). `NodeManifest` describes one node in TOML so
//! the CLI can run it without any Rust code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, IoContext, Result};
use crate::log_tail::{DEFAULT_TAIL_LINES, KNOWN_BENIGN_MESSAGES};
use crate::logging::LogConfig;
use crate::spec::{ExtractedDistribution, NodeSpec, TestDistribution, UserSpec};
use crate::version::Version;

/// Environment variable read when no argline is configured.
pub const JVM_ARGLINE_ENV: &str = "TESTS_JVM_ARGLINE";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    pub logging: LogConfig,
    pub timeouts: TimeoutsConfig,
    pub tail: TailConfig,
    /// Extra JVM arguments appended to every node's `ES_JAVA_OPTS`
    pub jvm_argline: Option<String>,
}

impl FixtureConfig {
    /// Load from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).io_context("read config", path)?;
        Self::from_toml(&raw, path)
    }

    fn from_toml(raw: &str, path: &Path) -> Result<Self> {
        toml::from_str(raw).map_err(|e| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Configured argline, falling back to `TESTS_JVM_ARGLINE`.
    #[must_use]
    pub fn argline(&self) -> String {
        self.jvm_argline
            .clone()
            .or_else(|| std::env::var(JVM_ARGLINE_ENV).ok())
            .unwrap_or_default()
    }
}

/// Lifecycle timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Grace period before a stopping process is killed
    #[serde(default = "default_graceful_stop_secs")]
    pub graceful_stop_secs: u64,

    /// Base time a node has to become ready
    #[serde(default = "default_readiness_base_secs")]
    pub readiness_base_secs: u64,

    /// Extra readiness time per plugin, secure setting, secure file and user
    #[serde(default = "default_per_setup_unit_secs")]
    pub per_setup_unit_secs: u64,

    /// Delay between readiness polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl TimeoutsConfig {
    #[must_use]
    pub fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_secs)
    }

    #[must_use]
    pub fn readiness_base(&self) -> Duration {
        Duration::from_secs(self.readiness_base_secs)
    }

    #[must_use]
    pub fn per_setup_unit(&self) -> Duration {
        Duration::from_secs(self.per_setup_unit_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            graceful_stop_secs: default_graceful_stop_secs(),
            readiness_base_secs: default_readiness_base_secs(),
            per_setup_unit_secs: default_per_setup_unit_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_graceful_stop_secs() -> u64 {
    20
}

fn default_readiness_base_secs() -> u64 {
    120
}

fn default_per_setup_unit_secs() -> u64 {
    15
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Log tailing on teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    /// Trailing messages kept per log
    #[serde(default = "default_tail_lines")]
    pub lines: usize,

    /// Messages never reported
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            lines: default_tail_lines(),
            ignore: default_ignore(),
        }
    }
}

fn default_tail_lines() -> usize {
    DEFAULT_TAIL_LINES
}

fn default_ignore() -> Vec<String> {
    KNOWN_BENIGN_MESSAGES.iter().map(ToString::to_string).collect()
}

/// A distribution entry in a node manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub path: PathBuf,
    pub version: Version,
}

/// TOML description of a node for the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeManifest {
    #[serde(default = "default_project_path")]
    pub path: String,
    pub name: String,
    /// Directory the node's working directory is created in
    pub base_dir: PathBuf,
    pub java_home: PathBuf,
    pub distributions: Vec<DistributionEntry>,
    #[serde(default)]
    pub flavor: TestDistribution,
    /// Directory for reaper pid files; none disables orphan tracking
    #[serde(default)]
    pub reaper_dir: Option<PathBuf>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub keystore: BTreeMap<String, String>,
    #[serde(default)]
    pub keystore_files: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub system_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub jvm_args: Vec<String>,
    #[serde(default)]
    pub extra_config_files: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub modules: Vec<PathBuf>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
}

fn default_project_path() -> String {
    ":".to_string()
}

impl NodeManifest {
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).io_context("read manifest", path)?;
        toml::from_str(&raw).map_err(|e| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Build the node configuration this manifest describes.
    pub fn to_spec(&self) -> Result<NodeSpec> {
        let mut spec = NodeSpec::new(&self.path, &self.name);
        spec.java_home(&self.java_home).flavor(self.flavor);
        for distribution in &self.distributions {
            spec.distribution(ExtractedDistribution::new(
                &distribution.path,
                distribution.version.clone(),
            ));
        }
        for (k, v) in &self.settings {
            spec.setting(k, v.as_str());
        }
        for (k, v) in &self.keystore {
            spec.keystore(k, v.as_str());
        }
        for (k, file) in &self.keystore_files {
            spec.keystore_file(k, file);
        }
        for (k, v) in &self.system_properties {
            spec.system_property(k, v.as_str());
        }
        for (k, v) in &self.environment {
            spec.environment(k, v.as_str());
        }
        for arg in &self.jvm_args {
            spec.jvm_args(arg);
        }
        for (destination, source) in &self.extra_config_files {
            spec.extra_config_file(destination, source);
        }
        for plugin in &self.plugins {
            spec.plugin(plugin)?;
        }
        for module in &self.modules {
            spec.module(module);
        }
        for user in &self.users {
            spec.user(user.clone());
        }
        Ok(spec)
    }
}
