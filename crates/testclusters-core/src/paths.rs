//! Deterministic layout of a node's working directory.

use std::path::{Path, PathBuf};

/// Every path a node reads or writes, derived once from the base directory
/// and the node's sanitized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingPaths {
    pub working_dir: PathBuf,
    pub distro_dir: PathBuf,
    pub config_file: PathBuf,
    pub repo_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub shared_data_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub transport_ports_file: PathBuf,
    pub http_ports_file: PathBuf,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

impl WorkingPaths {
    #[must_use]
    pub fn new(base_dir: &Path, name: &str) -> Self {
        let working_dir = absolute(&base_dir.join(safe_name(name)));
        let logs_dir = working_dir.join("logs");
        Self {
            distro_dir: working_dir.join("distro"),
            config_file: working_dir.join("config").join("elasticsearch.yml"),
            repo_dir: working_dir.join("repo"),
            data_dir: working_dir.join("data"),
            shared_data_dir: working_dir.join("sharedData"),
            tmp_dir: working_dir.join("tmp"),
            transport_ports_file: logs_dir.join("transport.ports"),
            http_ports_file: logs_dir.join("http.ports"),
            stdout_file: logs_dir.join("es.stdout.log"),
            stderr_file: logs_dir.join("es.stderr.log"),
            logs_dir,
            working_dir,
        }
    }

    /// Directory holding `elasticsearch.yml` and the other node config files.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        self.config_file
            .parent()
            .unwrap_or(self.working_dir.as_path())
    }

    /// Directories recreated on every start.
    #[must_use]
    pub fn runtime_dirs(&self) -> [&Path; 4] {
        [
            self.repo_dir.as_path(),
            self.data_dir.as_path(),
            self.logs_dir.as_path(),
            self.tmp_dir.as_path(),
        ]
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Sanitize a node name for use as a directory name: leading
/// non-alphanumerics are dropped and every other run of characters outside
/// `[A-Za-z0-9.]` becomes a single `-`.
#[must_use]
pub fn safe_name(name: &str) -> String {
    let trimmed = name.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let mut out = String::with_capacity(trimmed.len());
    let mut in_run = false;
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() || c == '.' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_replaces_runs() {
        assert_eq!(safe_name("integTest-0"), "integTest-0");
        assert_eq!(safe_name(":qa:rolling upgrade#0"), "qa-rolling-upgrade-0");
        assert_eq!(safe_name("node__1"), "node-1");
        assert_eq!(safe_name("v7.5.0"), "v7.5.0");
    }

    #[test]
    fn paths_are_deterministic() {
        let a = WorkingPaths::new(Path::new("/tmp/clusters"), "node 0");
        let b = WorkingPaths::new(Path::new("/tmp/clusters"), "node 0");
        assert_eq!(a, b);
        assert_eq!(a.working_dir, PathBuf::from("/tmp/clusters/node-0"));
        assert_eq!(
            a.config_file,
            PathBuf::from("/tmp/clusters/node-0/config/elasticsearch.yml")
        );
        assert_eq!(a.config_dir(), Path::new("/tmp/clusters/node-0/config"));
        assert_eq!(
            a.http_ports_file,
            PathBuf::from("/tmp/clusters/node-0/logs/http.ports")
        );
    }

    #[test]
    fn distinct_names_do_not_collide() {
        let a = WorkingPaths::new(Path::new("/tmp/c"), "node-0");
        let b = WorkingPaths::new(Path::new("/tmp/c"), "node-1");
        assert_ne!(a.working_dir, b.working_dir);
    }
}
