//! Error types for testclusters-core

use std::fmt::Write;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a diagnostic command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for testclusters-core
#[derive(Error, Debug)]
pub enum Error {
    /// Node configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Lifecycle state and precondition violations
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Setup tool (bin script) errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Filesystem errors with the operation and path that failed
    #[error("I/O error: failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Runtime errors (blocking task failures, channel failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Wrap an I/O error with the operation and path it happened on.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Lifecycle(err) => Some(err.remediation()),
            Self::Tool(err) => Some(err.remediation()),
            Self::Io { path, .. } => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Inspect path", format!("ls -la \"{}\"", path.display()))
                    .alternative("Hard links require the working directory and the extracted distribution to live on the same filesystem."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Retry the operation.")
                    .alternative("If the issue persists, check the node logs under the working directory."),
            ),
        }
    }
}

/// Extension for attaching operation and path context to `io::Result`s.
pub trait IoContext<T> {
    /// Convert the error into [`Error::Io`] naming `op` and `path`.
    fn io_context(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::io(op, path, source))
    }
}

/// Node configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration for {node} can not be altered, already locked")]
    ConfigurationFrozen { node: String },

    #[error("testclusters does not allow the following settings to be changed: {keys:?} for {node}")]
    IllegalOverride { node: String, keys: Vec<String> },

    #[error("testclusters does not allow overwriting the following env vars {keys:?} for {node}")]
    EnvironmentConflict { node: String, keys: Vec<String> },

    #[error("Invalid jvm argument `{argument}` configure as system property instead for {node}")]
    InvalidJvmArgument { node: String, argument: String },

    #[error("extra config file destination can't be relative, was {destination} for {node}")]
    InvalidDestination { node: String, destination: String },

    #[error("null javaHome passed when configuring {node}")]
    MissingJavaHome { node: String },

    #[error("no distribution configured for {node}")]
    NoDistributions { node: String },

    #[error("Plugin already configured for installation {plugin} on {node}")]
    DuplicatePlugin { node: String, plugin: String },

    #[error("Invalid version `{0}`, expected MAJOR.MINOR.REVISION[-QUALIFIER]")]
    InvalidVersion(String),

    #[error("Failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ConfigurationFrozen { .. } => Remediation::new(
                "Apply all configuration before freezing the node.",
            )
            .alternative("Move the mutation ahead of the first start of the node."),
            Self::IllegalOverride { keys, .. } => Remediation::new(format!(
                "Remove the overrides for {keys:?}; these settings are managed per node."
            ))
            .alternative("Only path.repo and discovery.seed_providers may be overridden."),
            Self::EnvironmentConflict { keys, .. } => Remediation::new(format!(
                "Remove {keys:?} from the node environment; they are set for every node."
            ))
            .alternative("Use system properties or jvm args to influence the JVM instead."),
            Self::InvalidJvmArgument { argument, .. } => Remediation::new(format!(
                "Declare `{argument}` as a system property instead of a jvm argument."
            )),
            Self::InvalidDestination { .. } => Remediation::new(
                "Use a destination relative to the config directory without `..` segments.",
            ),
            Self::MissingJavaHome { .. } => {
                Remediation::new("Set java_home before freezing the node.")
                    .command("Locate a JDK", "echo $JAVA_HOME")
            }
            Self::NoDistributions { .. } => {
                Remediation::new("Configure at least one distribution before freezing the node.")
            }
            Self::DuplicatePlugin { .. } => {
                Remediation::new("Declare each plugin only once per node.")
            }
            Self::InvalidVersion(_) => {
                Remediation::new("Use a version such as 7.5.0 or 8.0.0-SNAPSHOT.")
            }
            Self::Parse { path, .. } => Remediation::new("Fix the syntax error and retry.")
                .command("Show file", format!("cat \"{}\"", path.display())),
        }
    }
}

/// Lifecycle state and precondition errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Can not start {node}, {reason}: {}", .path.display())]
    MissingDistribution {
        node: String,
        path: PathBuf,
        reason: &'static str,
    },

    #[error("Source file {} does not exist, required for {node}", .path.display())]
    MissingSourceFile { node: String, path: PathBuf },

    #[error("{node} must be frozen before it can be started")]
    NotFrozen { node: String },

    #[error("{node} is already running")]
    AlreadyRunning { node: String },

    #[error("Can't stop {node} as it was not started or already stopped")]
    NoActiveProcess { node: String },

    #[error("Was not able to terminate process {pid}")]
    ProcessNotTerminated { pid: u32 },

    #[error("Ran out of versions to go to for {node}")]
    NoMoreVersions { node: String },

    #[error("Failed to start process for {node}: {source}")]
    StartFailed {
        node: String,
        #[source]
        source: io::Error,
    },

    #[error("timeout waiting for `{condition}` after {elapsed_ms}ms")]
    ReadinessTimeout { condition: String, elapsed_ms: u128 },
}

impl LifecycleError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::MissingDistribution { path, .. } => Remediation::new(
                "Extract the distribution before starting the node.",
            )
            .command("Inspect", format!("ls -la \"{}\"", path.display())),
            Self::MissingSourceFile { path, .. } => {
                Remediation::new("Create the file or fix the configured path.")
                    .command("Inspect", format!("ls -la \"{}\"", path.display()))
            }
            Self::NotFrozen { .. } => Remediation::new("Call freeze() before start()."),
            Self::AlreadyRunning { .. } => {
                Remediation::new("Stop the node before starting it again.")
                    .alternative("Use restart() to stop and start in one step.")
            }
            Self::NoActiveProcess { .. } => {
                Remediation::new("Start the node before stopping or querying it.")
            }
            Self::ProcessNotTerminated { pid } => Remediation::new(format!(
                "Process {pid} survived a forced kill; it may be stuck in uninterruptible I/O."
            ))
            .command("Inspect", format!("ps -o pid,state,args -p {pid}")),
            Self::NoMoreVersions { .. } => Remediation::new(
                "Configure an additional distribution version to upgrade to.",
            ),
            Self::StartFailed { .. } => Remediation::new(
                "Check that the distribution's bin/elasticsearch script exists and is executable.",
            ),
            Self::ReadinessTimeout { .. } => Remediation::new(
                "The node did not become ready in time. Check the node's stdout and stderr logs.",
            )
            .alternative("Large numbers of plugins or secure settings extend the boot time."),
        }
    }
}

/// Setup tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Can't run bin script: `{tool}` does not exist. Is this the distribution you expect it to be?")]
    NotFound { tool: String },

    #[error("`{tool}` exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Not a valid artifact {}", .path.display())]
    InvalidArtifact { path: PathBuf },
}

impl ToolError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NotFound { tool } => Remediation::new(format!(
                "The distribution does not ship `{tool}`; verify the distribution flavor."
            )),
            Self::Failed { tool, .. } => Remediation::new(format!(
                "`{tool}` failed; inspect its stderr above and the node's working directory."
            )),
            Self::InvalidArtifact { .. } => {
                Remediation::new("Modules must be provided as extracted directories.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_remediation() {
        let errors = vec![
            Error::from(ConfigError::InvalidVersion("x".into())),
            Error::from(LifecycleError::ProcessNotTerminated { pid: 42 }),
            Error::from(ToolError::NotFound {
                tool: "elasticsearch-keystore".into(),
            }),
            Error::io("read", "/tmp/x", io::Error::other("boom")),
            Error::Runtime("join failed".into()),
        ];
        for err in errors {
            let r = err.remediation().expect("remediation");
            assert!(!r.summary.is_empty());
        }
    }

    #[test]
    fn io_error_display_names_operation_and_path() {
        let err = Error::io(
            "create hard link",
            "/work/distro/lib/a.jar",
            io::Error::other("cross-device link"),
        );
        let msg = err.to_string();
        assert!(msg.contains("create hard link"));
        assert!(msg.contains("/work/distro/lib/a.jar"));
        assert!(msg.contains("cross-device link"));
    }

    #[test]
    fn io_context_wraps_errors() {
        let result: io::Result<()> = Err(io::Error::from(io::ErrorKind::NotFound));
        let err = result
            .io_context("delete", Path::new("/nope"))
            .expect_err("should wrap");
        assert!(matches!(err, Error::Io { op: "delete", .. }));
    }

    #[test]
    fn illegal_override_lists_keys() {
        let err = ConfigError::IllegalOverride {
            node: "node{:a}".into(),
            keys: vec!["http.port".into()],
        };
        assert!(err.to_string().contains("http.port"));
    }

    #[test]
    fn render_plain_includes_commands() {
        let text = LifecycleError::ProcessNotTerminated { pid: 7 }
            .remediation()
            .render_plain();
        assert!(text.contains("To fix:"));
        assert!(text.contains("ps -o pid,state,args -p 7"));
    }
}
