//! Generation of `elasticsearch.yml`.
//!
//! Every node gets a fixed set of defaults that make it usable as a
//! disposable fixture: ephemeral ports, a ports file, tiny disk watermarks
//! and verbose coordination logging. Some defaults depend on the server
//! version; those live in one decision table below. User settings may not
//! redefine a default unless the key is in [`OVERRIDABLE_SETTINGS`].

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, IoContext, Result};
use crate::paths::WorkingPaths;
use crate::spec::FrozenSpec;
use crate::version::{TRANSPORT_PORT_RENAME, Version};

/// Defaults that user settings are allowed to replace.
pub const OVERRIDABLE_SETTINGS: [&str; 2] = ["path.repo", "discovery.seed_providers"];

/// Marker added to a node's defaults after it was upgraded in place.
pub const UPGRADED_ATTRIBUTE: &str = "node.attr.upgraded";

#[derive(Debug, Clone)]
enum Applies {
    Always,
    OnOrAfter(Version),
    Before(Version),
    MajorAtLeast(u32),
}

impl Applies {
    fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Always => true,
            Self::OnOrAfter(threshold) => version.on_or_after(threshold),
            Self::Before(threshold) => version.before(threshold),
            Self::MajorAtLeast(major) => version.major >= *major,
        }
    }
}

/// Static defaults, in output order, with the versions they apply to.
const VERSIONED_DEFAULTS: &[(&str, &str, Applies)] = &[
    ("node.attr.testattr", "test", Applies::Always),
    ("node.portsfile", "true", Applies::Always),
    ("http.port", "0", Applies::Always),
    ("transport.port", "0", Applies::OnOrAfter(TRANSPORT_PORT_RENAME)),
    ("transport.tcp.port", "0", Applies::Before(TRANSPORT_PORT_RENAME)),
    ("cluster.routing.allocation.disk.watermark.low", "1b", Applies::Always),
    ("cluster.routing.allocation.disk.watermark.high", "1b", Applies::Always),
    ("script.max_compilations_rate", "2048/1m", Applies::Always),
    ("cluster.routing.allocation.disk.watermark.flood_stage", "1b", Applies::MajorAtLeast(6)),
    ("indices.breaker.total.use_real_memory", "false", Applies::MajorAtLeast(7)),
    ("discovery.initial_state_timeout", "0s", Applies::Always),
    ("logger.org.elasticsearch.action.support.master.TransportMasterNodeAction", "TRACE", Applies::Always),
    ("logger.org.elasticsearch.cluster.metadata.MetaDataCreateIndexService", "TRACE", Applies::Always),
    ("logger.org.elasticsearch.cluster.service", "DEBUG", Applies::Always),
    ("logger.org.elasticsearch.cluster.coordination", "DEBUG", Applies::Always),
    ("logger.org.elasticsearch.gateway.MetaStateService", "TRACE", Applies::Always),
    ("cluster.service.slow_task_logging_threshold", "5s", Applies::MajorAtLeast(8)),
    ("cluster.service.slow_master_task_logging_threshold", "5s", Applies::MajorAtLeast(8)),
];

/// Defaults for a node named `node_name` running `version`.
#[must_use]
pub fn default_settings(
    node_name: &str,
    paths: &WorkingPaths,
    version: &Version,
    upgraded: bool,
) -> Vec<(String, String)> {
    let path = |p: &Path| p.display().to_string();
    let mut defaults = vec![
        ("node.name".to_string(), node_name.to_string()),
        ("path.repo".to_string(), path(&paths.repo_dir)),
        ("path.data".to_string(), path(&paths.data_dir)),
        ("path.logs".to_string(), path(&paths.logs_dir)),
        ("path.shared_data".to_string(), path(&paths.shared_data_dir)),
    ];
    defaults.extend(
        VERSIONED_DEFAULTS
            .iter()
            .filter(|(_, _, applies)| applies.matches(version))
            .map(|(k, v, _)| ((*k).to_string(), (*v).to_string())),
    );
    if upgraded {
        defaults.push((UPGRADED_ATTRIBUTE.to_string(), "true".to_string()));
    }
    defaults
}

/// Merge `user` settings over `defaults`: user settings come first in
/// declaration order, followed by the defaults they did not replace.
pub fn merge(
    node: &str,
    user: Vec<(String, String)>,
    defaults: Vec<(String, String)>,
) -> Result<Vec<(String, String)>> {
    let user_keys: HashSet<&str> = user.iter().map(|(k, _)| k.as_str()).collect();
    let mut illegal: Vec<String> = defaults
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| user_keys.contains(k) && !OVERRIDABLE_SETTINGS.contains(k))
        .map(str::to_string)
        .collect();
    if !illegal.is_empty() {
        illegal.sort();
        return Err(ConfigError::IllegalOverride {
            node: node.to_string(),
            keys: illegal,
        }
        .into());
    }

    let remaining: Vec<(String, String)> = defaults
        .into_iter()
        .filter(|(k, _)| !user_keys.contains(k.as_str()))
        .collect();
    let mut merged = user;
    merged.extend(remaining);
    Ok(merged)
}

/// `key: value` lines joined by newlines.
#[must_use]
pub fn render(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compute the node's final settings, resolving deferred values once.
pub fn build(
    spec: &FrozenSpec,
    paths: &WorkingPaths,
    version: &Version,
    upgraded: bool,
) -> Result<Vec<(String, String)>> {
    let defaults = default_settings(&spec.node_name(), paths, version, upgraded);
    merge(&spec.id(), spec.settings().resolve_all(), defaults)
}

/// Write `elasticsearch.yml` and copy the distribution's own config files
/// that the node does not already have.
pub fn write_config(
    spec: &FrozenSpec,
    paths: &WorkingPaths,
    version: &Version,
    upgraded: bool,
) -> Result<()> {
    let entries = build(spec, paths, version, upgraded)?;
    std::fs::write(&paths.config_file, render(&entries))
        .io_context("write config", &paths.config_file)?;
    debug!(node = %spec.id(), path = %paths.config_file.display(), settings = entries.len(), "Wrote node configuration");
    copy_distribution_config(&paths.distro_dir.join("config"), paths.config_dir())
}

fn copy_distribution_config(source_dir: &Path, config_dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(source_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(crate::Error::io("list", source_dir, e)),
    };
    for entry in entries {
        let entry = entry.io_context("list", source_dir)?;
        let source = entry.path();
        let destination = config_dir.join(entry.file_name());
        if destination.exists() || !source.is_file() {
            continue;
        }
        std::fs::copy(&source, &destination).io_context("copy config file", &source)?;
        debug!(file = %destination.display(), "Copied config file from distribution");
    }
    Ok(())
}
