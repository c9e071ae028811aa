//! The node facade: configuration, freeze and the start/stop/restart/upgrade
//! lifecycle of a single test node.
//!
//! ```text
//! Configuring --freeze()--> Frozen --start()--> Running
//!                              ^                   |
//!                              +------stop()-------+
//! ```
//!
//! `start` and `stop` are serialized by an async mutex owned by the node, so
//! a node can be shared between tasks behind an `Arc`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::FixtureConfig;
use crate::environment::build_environment;
use crate::error::{ConfigError, Error, IoContext, LifecycleError, Result};
use crate::http_wait::{self, HttpWaitConfigurer};
use crate::log_tail::{self, LogSummary};
use crate::logging::log_to_process_stdout;
use crate::paths::WorkingPaths;
use crate::ports::{delete_ports_files, ports_files_exist, read_ports_file};
use crate::readiness::{Backoff, ReadinessGate, readiness_timeout};
use crate::reaper::{NoopReaper, Reaper};
use crate::settings::write_config;
use crate::spec::{FrozenSpec, NodeSpec};
use crate::supervisor::{LaunchCommand, OsProcess, ProcessHandle, spawn, terminate};
use crate::tools::{
    ArtifactInstaller, BinScripts, DirectoryCopyInstaller, install_modules, install_plugins,
    setup_keystore, setup_users,
};
use crate::version::Version;
use crate::workdir::prepare;

const DEFAULT_CLUSTER_NAME: &str = "elasticsearch";

enum Phase {
    Configuring(NodeSpec),
    Frozen(Arc<FrozenSpec>),
}

#[derive(Default)]
struct NodeState {
    process: Option<OsProcess>,
    /// Index into the frozen distributions; only `upgrade` moves it.
    current: usize,
    upgraded: bool,
    /// The working directory has been wiped once for this node.
    prepared: bool,
}

/// A single ephemeral server node.
pub struct Node {
    id: String,
    paths: WorkingPaths,
    config: FixtureConfig,
    reaper: Arc<dyn Reaper>,
    installer: Arc<dyn ArtifactInstaller>,
    phase: std::sync::Mutex<Phase>,
    state: Mutex<NodeState>,
}

impl Node {
    /// A node whose working directory lives under `base_dir`.
    pub fn new(spec: NodeSpec, base_dir: &Path, config: FixtureConfig) -> Self {
        let paths = WorkingPaths::new(base_dir, spec.name());
        Self {
            id: spec.id(),
            paths,
            config,
            reaper: Arc::new(NoopReaper),
            installer: Arc::new(DirectoryCopyInstaller),
            phase: std::sync::Mutex::new(Phase::Configuring(spec)),
            state: Mutex::new(NodeState::default()),
        }
    }

    /// Register started processes with `reaper` so they can be cleaned up if
    /// the harness dies.
    #[must_use]
    pub fn with_reaper(mut self, reaper: Arc<dyn Reaper>) -> Self {
        self.reaper = reaper;
        self
    }

    #[must_use]
    pub fn with_installer(mut self, installer: Arc<dyn ArtifactInstaller>) -> Self {
        self.installer = installer;
        self
    }

    /// `node{<path>:<name>}`
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn paths(&self) -> &WorkingPaths {
        &self.paths
    }

    fn phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the configuration. Fails with `ConfigurationFrozen` once the
    /// node has been frozen.
    pub fn configure<R>(&self, f: impl FnOnce(&mut NodeSpec) -> R) -> Result<R> {
        match &mut *self.phase() {
            Phase::Configuring(spec) => Ok(f(spec)),
            Phase::Frozen(_) => Err(ConfigError::ConfigurationFrozen {
                node: self.id.clone(),
            }
            .into()),
        }
    }

    /// Lock the configuration. Freezing twice is a no-op; a failed freeze
    /// leaves the node configurable.
    pub fn freeze(&self) -> Result<()> {
        let mut phase = self.phase();
        if let Phase::Configuring(spec) = &*phase {
            let frozen = spec.clone().freeze()?;
            *phase = Phase::Frozen(Arc::new(frozen));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        matches!(*self.phase(), Phase::Frozen(_))
    }

    /// The frozen configuration.
    pub fn spec(&self) -> Result<Arc<FrozenSpec>> {
        match &*self.phase() {
            Phase::Frozen(spec) => Ok(Arc::clone(spec)),
            Phase::Configuring(_) => Err(LifecycleError::NotFrozen {
                node: self.id.clone(),
            }
            .into()),
        }
    }

    /// Version of the distribution the node runs (or will run) next.
    pub async fn version(&self) -> Result<Version> {
        let spec = self.spec()?;
        let state = self.state.lock().await;
        Ok(current_distribution(&spec, &state)?.1)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Build the working directory, install everything the node needs and
    /// launch it. Does not wait for the node to be ready.
    pub async fn start(&self) -> Result<()> {
        let spec = self.spec()?;
        let mut state = self.state.lock().await;
        self.start_locked(&spec, &mut state).await
    }

    async fn start_locked(&self, spec: &FrozenSpec, state: &mut NodeState) -> Result<()> {
        if state.process.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                node: self.id.clone(),
            }
            .into());
        }
        let (extracted, version) = current_distribution(spec, state)?;
        info!(node = %self.id, %version, path = %extracted.display(), "Starting node");

        if !extracted.exists() {
            return Err(LifecycleError::MissingDistribution {
                node: self.id.clone(),
                path: extracted,
                reason: "the distribution directory does not exist",
            }
            .into());
        }
        if !extracted.is_dir() {
            return Err(LifecycleError::MissingDistribution {
                node: self.id.clone(),
                path: extracted,
                reason: "the distribution is not a directory",
            }
            .into());
        }

        let first_start = !state.prepared;
        let paths = self.paths.clone();
        tokio::task::spawn_blocking(move || prepare(&extracted, &paths, first_start))
            .await
            .map_err(|e| Error::Runtime(format!("spawn_blocking failed: {e}")))??;
        state.prepared = true;
        self.log_progress(&format!("Configuring working directory: {}", self.paths.working_dir.display()))?;

        write_config(spec, &self.paths, &version, state.upgraded)?;

        let env = build_environment(spec, &self.paths, &self.config.argline())?;
        let scripts = BinScripts::new(&self.paths.distro_dir, &env, &self.id);

        if !spec.plugins().is_empty() {
            self.log_progress(&format!("Installing {} plugins", spec.plugins().len()))?;
        }
        install_plugins(&scripts, spec.plugins()).await?;

        if !spec.secure_settings().is_empty() || !spec.secure_files().is_empty() {
            self.log_progress("Adding secure settings")?;
        }
        setup_keystore(&scripts, spec).await?;

        let modules = install_modules(spec, &self.paths.distro_dir, &version, self.installer.as_ref())?;
        if modules > 0 {
            self.log_progress(&format!("Installed {modules} modules"))?;
        }

        self.copy_extra_config_files(spec)?;

        if spec.security_enabled() {
            let users = spec.users();
            self.log_progress(&format!("Setting up {} users", users.len()))?;
            setup_users(&scripts, &users).await?;
        }

        self.log_progress("Starting Elasticsearch process")?;
        let (program, args) = LaunchCommand::for_distribution(&self.paths.distro_dir);
        let launch = LaunchCommand {
            program,
            args,
            env,
            working_dir: self.paths.working_dir.clone(),
            stdout: self.paths.stdout_file.clone(),
            stderr: self.paths.stderr_file.clone(),
        };
        let process = spawn(&launch, self.reaper.as_ref(), &self.id)?;
        info!(node = %self.id, pid = process.pid(), "Node process started");
        state.process = Some(process);
        Ok(())
    }

    fn copy_extra_config_files(&self, spec: &FrozenSpec) -> Result<()> {
        let files = spec.extra_config_files();
        if files.is_empty() {
            return Ok(());
        }
        self.log_progress(&format!("Setting up {} additional config files", files.len()))?;
        for (destination, source) in files.iter() {
            if destination.contains("..") {
                return Err(ConfigError::InvalidDestination {
                    node: self.id.clone(),
                    destination: destination.to_string(),
                }
                .into());
            }
            if !source.exists() {
                return Err(LifecycleError::MissingSourceFile {
                    node: self.id.clone(),
                    path: source.clone(),
                }
                .into());
            }
            let target = self.paths.config_dir().join(destination);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).io_context("create directory", parent)?;
            }
            std::fs::copy(source, &target).io_context("copy extra config file", source)?;
            info!(node = %self.id, destination, "Added extra config file");
        }
        Ok(())
    }

    /// Delete the port files, kill the process tree and optionally log a
    /// summary of the node's output. Stopping a node that is not running
    /// only deletes the port files.
    pub async fn stop(&self, tail_logs: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state, tail_logs).await
    }

    async fn stop_locked(&self, state: &mut NodeState, tail_logs: bool) -> Result<()> {
        delete_ports_files(&self.paths)?;
        let Some(mut process) = state.process.take() else {
            debug!(node = %self.id, "No process to stop");
            return Ok(());
        };
        self.log_progress("Stopping node")?;
        info!(node = %self.id, pid = process.pid(), tail_logs, "Stopping node");

        // Test nodes are never reused, so there is no point in a graceful stop.
        let timeout = self.config.timeouts.graceful_stop();
        let (process, result) = tokio::task::spawn_blocking(move || {
            let result = terminate(&mut process, true, timeout);
            (process, result)
        })
        .await
        .map_err(|e| Error::Runtime(format!("spawn_blocking failed: {e}")))?;
        if let Err(e) = result {
            state.process = Some(process);
            return Err(e);
        }
        self.reaper.unregister(&self.id);

        if tail_logs {
            for (description, summary) in self.summarize_logs() {
                log_tail::log_summary(&summary, description, &self.id);
            }
        }
        Ok(())
    }

    /// Summaries of the node's stdout and stderr logs. Logs that cannot be
    /// read are skipped with a warning.
    pub fn summarize_logs(&self) -> Vec<(&'static str, LogSummary)> {
        let tail = &self.config.tail;
        [
            ("Standard output of node", &self.paths.stdout_file),
            ("Standard error of node", &self.paths.stderr_file),
        ]
        .into_iter()
        .filter_map(|(description, file)| {
            match log_tail::summarize(file, tail.lines, &tail.ignore) {
                Ok(summary) => Some((description, summary)),
                Err(e) => {
                    warn!(node = %self.id, path = %file.display(), error = %e, "Could not summarize log");
                    None
                }
            }
        })
        .collect()
    }

    pub async fn restart(&self) -> Result<()> {
        let spec = self.spec()?;
        let mut state = self.state.lock().await;
        info!(node = %self.id, "Restarting node");
        self.stop_locked(&mut state, false).await?;
        self.start_locked(&spec, &mut state).await
    }

    /// Stop the node and start it again on the next distribution, marking it
    /// with `node.attr.upgraded: true`.
    pub async fn upgrade(&self) -> Result<()> {
        let spec = self.spec()?;
        let mut state = self.state.lock().await;
        let distributions = spec.distributions();
        if state.current + 1 >= distributions.len() {
            return Err(LifecycleError::NoMoreVersions {
                node: self.id.clone(),
            }
            .into());
        }
        let from = distributions[state.current].version();
        let to = distributions[state.current + 1].version();
        self.log_progress(&format!("Switch version from {from} to {to}"))?;

        self.stop_locked(&mut state, false).await?;
        state.current += 1;
        state.upgraded = true;
        self.start_locked(&spec, &mut state).await
    }

    /// Whether the node process is still running.
    pub async fn is_process_alive(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.process.as_mut() {
            Some(process) => Ok(process.is_alive()),
            None => Err(LifecycleError::NoActiveProcess {
                node: self.id.clone(),
            }
            .into()),
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Time the node gets to become ready, grown by the setup work it does.
    pub fn readiness_timeout(&self) -> Result<std::time::Duration> {
        let spec = self.spec()?;
        let timeouts = &self.config.timeouts;
        Ok(readiness_timeout(
            timeouts.readiness_base(),
            timeouts.per_setup_unit(),
            spec.setup_units(),
        ))
    }

    /// A gate with the "ports files" condition; callers may add their own
    /// conditions (an HTTP check, for instance) before waiting.
    #[must_use]
    pub fn readiness_gate(&self) -> ReadinessGate {
        let paths = self.paths.clone();
        ReadinessGate::with_backoff(Backoff::fixed(self.config.timeouts.poll_interval()))
            .condition("ports files", move || ports_files_exist(&paths))
    }

    /// Wait until the node has published its ports.
    pub async fn wait_for_ready(&self) -> Result<()> {
        let timeout = self.readiness_timeout()?;
        self.readiness_gate().wait_for(timeout).await
    }

    // =========================================================================
    // Ports, logs, TLS
    // =========================================================================

    pub fn http_socket_uri(&self) -> Result<String> {
        first_port(&self.paths.http_ports_file)
    }

    pub fn transport_port_uri(&self) -> Result<String> {
        first_port(&self.paths.transport_ports_file)
    }

    pub fn all_http_socket_uri(&self) -> Result<Vec<String>> {
        read_ports_file(&self.paths.http_ports_file)
    }

    pub fn all_transport_port_uri(&self) -> Result<Vec<String>> {
        read_ports_file(&self.paths.transport_ports_file)
    }

    /// Lines of the node's stdout log.
    pub fn log_lines(&self) -> Result<Vec<String>> {
        let file = &self.paths.stdout_file;
        let contents = std::fs::read_to_string(file).io_context("read log", file)?;
        Ok(contents.lines().map(str::to_string).collect())
    }

    pub fn server_log(&self) -> Result<PathBuf> {
        Ok(self
            .paths
            .logs_dir
            .join(format!("{}_server.json", self.cluster_name()?)))
    }

    pub fn audit_log(&self) -> Result<PathBuf> {
        Ok(self
            .paths
            .logs_dir
            .join(format!("{}_audit.json", self.cluster_name()?)))
    }

    fn cluster_name(&self) -> Result<String> {
        Ok(self
            .spec()?
            .settings()
            .get("cluster.name")
            .map_or_else(|| DEFAULT_CLUSTER_NAME.to_string(), |v| v.resolve()))
    }

    pub fn is_http_ssl_enabled(&self) -> Result<bool> {
        let spec = self.spec()?;
        Ok(http_wait::is_http_ssl_enabled(&spec))
    }

    /// Hand the node's TLS material to an HTTP readiness check.
    pub fn configure_http_wait(&self, wait: &mut dyn HttpWaitConfigurer) -> Result<()> {
        let spec = self.spec()?;
        http_wait::configure_http_wait(&spec, self.paths.config_dir(), wait);
        Ok(())
    }

    fn log_progress(&self, message: &str) -> Result<()> {
        log_to_process_stdout(&self.paths.stdout_file, &self.id, message)
    }
}

fn current_distribution(spec: &FrozenSpec, state: &NodeState) -> Result<(PathBuf, Version)> {
    let distribution = spec.distributions().get(state.current).ok_or_else(|| {
        LifecycleError::NoMoreVersions { node: spec.id() }
    })?;
    Ok((distribution.extracted(), distribution.version()))
}

fn first_port(file: &Path) -> Result<String> {
    read_ports_file(file)?.into_iter().next().ok_or_else(|| {
        Error::io(
            "read ports file",
            file,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "ports file is empty"),
        )
    })
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("working_dir", &self.paths.working_dir)
            .field("frozen", &self.is_frozen())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ExtractedDistribution;

    fn node(dir: &Path, distributions: &[(&str, Version)]) -> Node {
        let mut spec = NodeSpec::new(":qa", "node-0");
        spec.java_home("/jdk");
        for (name, version) in distributions {
            spec.distribution(ExtractedDistribution::new(dir.join(name), version.clone()));
        }
        Node::new(spec, &dir.join("clusters"), FixtureConfig::default())
    }

    #[test]
    fn configure_after_freeze_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[("7.5.0", Version::new(7, 5, 0))]);
        node.configure(|spec| {
            spec.setting("cluster.name", "qa");
        })
        .unwrap();
        node.freeze().unwrap();
        node.freeze().unwrap();
        let err = node
            .configure(|spec| {
                spec.setting("node.attr.rack", "r1");
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ConfigurationFrozen { .. })
        ));
        assert!(node.server_log().unwrap().ends_with("logs/qa_server.json"));
    }

    #[test]
    fn failed_freeze_keeps_node_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[]);
        assert!(node.freeze().is_err());
        assert!(!node.is_frozen());
        node.configure(|spec| {
            spec.distribution(ExtractedDistribution::new("/d", Version::new(8, 0, 0)));
        })
        .unwrap();
        node.freeze().unwrap();
        assert!(node.is_frozen());
    }

    #[tokio::test]
    async fn start_requires_freeze() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[("7.5.0", Version::new(7, 5, 0))]);
        let err = node.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::NotFrozen { .. })
        ));
    }

    #[tokio::test]
    async fn missing_distribution_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[("7.5.0", Version::new(7, 5, 0))]);
        node.freeze().unwrap();
        let err = node.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::MissingDistribution { .. })
        ));

        std::fs::write(dir.path().join("7.5.0"), "not a dir").unwrap();
        let err = node.start().await.unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn stop_without_start_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[("7.5.0", Version::new(7, 5, 0))]);
        node.stop(true).await.unwrap();
        node.stop(false).await.unwrap();
        let err = node.is_process_alive().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::NoActiveProcess { .. })
        ));
    }

    #[tokio::test]
    async fn upgrade_past_last_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[("7.5.0", Version::new(7, 5, 0))]);
        node.freeze().unwrap();
        let err = node.upgrade().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::NoMoreVersions { .. })
        ));
        assert_eq!(node.version().await.unwrap(), Version::new(7, 5, 0));
    }

    #[test]
    fn readiness_timeout_counts_setup_units() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[("7.5.0", Version::new(7, 5, 0))]);
        node.configure(|spec| {
            spec.keystore("bootstrap.password", "x");
            spec.plugin("analysis-icu").map(|_| ())
        })
        .unwrap()
        .unwrap();
        node.freeze().unwrap();
        assert_eq!(
            node.readiness_timeout().unwrap(),
            std::time::Duration::from_secs(150)
        );
        assert_eq!(node.readiness_gate().names(), vec!["ports files"]);
    }

    #[test]
    fn display_is_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let node = node(dir.path(), &[]);
        assert_eq!(node.to_string(), "node{:qa:node-0}");
    }
}
