//! Environment handed to the node process and its setup tools.
//!
//! Nothing is inherited from the caller's environment; the node sees only
//! the base variables below plus what its configuration declares.

use crate::error::{ConfigError, Result};
use crate::paths::WorkingPaths;
use crate::spec::FrozenSpec;

/// Fixed `HOSTNAME` so node output does not depend on the test machine.
pub const HOSTNAME_OVERRIDE: &str = "LinuxDarwinHostname";
/// Fixed `COMPUTERNAME`, the Windows counterpart of `HOSTNAME`.
pub const COMPUTERNAME_OVERRIDE: &str = "WindowsComputername";

const BASE_JVM_OPTS: &str = "-Xms512m -Xmx512m -ea -esa";

/// Assemble `ES_JAVA_OPTS`: heap and assertion flags, `-Dk=v` for each
/// system property, raw JVM arguments, then the injected argline.
pub fn java_opts(spec: &FrozenSpec, argline: &str) -> Result<String> {
    if let Some(bad) = spec.jvm_args().iter().find(|a| a.starts_with("-D")) {
        return Err(ConfigError::InvalidJvmArgument {
            node: spec.id(),
            argument: bad.clone(),
        }
        .into());
    }

    let mut parts = vec![BASE_JVM_OPTS.to_string()];
    parts.extend(
        spec.system_properties()
            .resolve_all()
            .into_iter()
            .map(|(k, v)| format!("-D{k}={v}")),
    );
    parts.extend(spec.jvm_args().iter().cloned());
    let argline = argline.trim();
    if !argline.is_empty() {
        parts.push(argline.to_string());
    }
    Ok(parts.join(" "))
}

/// The complete process environment for the node.
pub fn build_environment(
    spec: &FrozenSpec,
    paths: &WorkingPaths,
    argline: &str,
) -> Result<Vec<(String, String)>> {
    let tmp = paths.tmp_dir.display().to_string();
    let mut env = vec![
        (
            "JAVA_HOME".to_string(),
            std::path::absolute(spec.java_home())
                .unwrap_or_else(|_| spec.java_home().to_path_buf())
                .display()
                .to_string(),
        ),
        (
            "ES_PATH_CONF".to_string(),
            paths.config_dir().display().to_string(),
        ),
        ("ES_JAVA_OPTS".to_string(), java_opts(spec, argline)?),
        ("ES_TMPDIR".to_string(), tmp.clone()),
        // Windows defaults to c:\windows despite ES_TMPDIR.
        ("TMP".to_string(), tmp),
        ("HOSTNAME".to_string(), HOSTNAME_OVERRIDE.to_string()),
        ("COMPUTERNAME".to_string(), COMPUTERNAME_OVERRIDE.to_string()),
    ];

    let mut conflicts: Vec<String> = spec
        .environment()
        .keys()
        .filter(|k| env.iter().any(|(base, _)| base == k))
        .map(str::to_string)
        .collect();
    if !conflicts.is_empty() {
        conflicts.sort();
        return Err(ConfigError::EnvironmentConflict {
            node: spec.id(),
            keys: conflicts,
        }
        .into());
    }

    env.extend(spec.environment().resolve_all());
    Ok(env)
}
