//! Orphan protection for node processes.
//!
//! A node tells its [`Reaper`] about the pid it launched and forgets it once
//! the process tree is gone. If the owning test process dies in between, the
//! pid stays recorded and a later [`reap_orphans`] sweep kills it.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::paths::safe_name;
use crate::process_tree::pid_alive;

/// Collaborator that outlives the node and kills processes left behind.
pub trait Reaper: Send + Sync {
    fn register_pid(&self, id: &str, pid: u32);
    fn unregister(&self, id: &str);
}

/// Reaper that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReaper;

impl Reaper for NoopReaper {
    fn register_pid(&self, _id: &str, _pid: u32) {}
    fn unregister(&self, _id: &str) {}
}

/// Records each registered pid as `<id>.pid` inside a directory.
#[derive(Debug, Clone)]
pub struct PidFileReaper {
    dir: PathBuf,
}

impl PidFileReaper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pid_file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.pid", safe_name(id)))
    }
}

impl Reaper for PidFileReaper {
    fn register_pid(&self, id: &str, pid: u32) {
        let path = self.pid_file(id);
        let result = std::fs::create_dir_all(&self.dir)
            .and_then(|()| std::fs::write(&path, format!("{pid}\n")));
        match result {
            Ok(()) => debug!(id, pid, path = %path.display(), "Registered pid with reaper"),
            Err(e) => warn!(id, pid, error = %e, "Failed to record pid for reaper"),
        }
    }

    fn unregister(&self, id: &str) {
        let path = self.pid_file(id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(id, "Unregistered pid from reaper"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(id, error = %e, "Failed to remove reaper pid file"),
        }
    }
}

/// Summary of one orphan sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReapReport {
    /// Pid files inspected.
    pub scanned: usize,
    /// Number of still-running processes killed.
    pub killed: usize,
    pub killed_pids: Vec<u32>,
    pub errors: Vec<String>,
}

/// Kill every process still recorded in `dir` and clear its pid file.
pub async fn reap_orphans(dir: PathBuf) -> ReapReport {
    tokio::task::spawn_blocking(move || reap_orphans_sync(&dir))
        .await
        .unwrap_or_else(|e| {
            let mut report = ReapReport::default();
            report.errors.push(format!("spawn_blocking failed: {e}"));
            report
        })
}

fn reap_orphans_sync(dir: &Path) -> ReapReport {
    let mut report = ReapReport::default();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.errors.push(format!("read {}: {e}", dir.display()));
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        report.scanned += 1;

        let pid = match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| parse_pid(&raw))
        {
            Ok(pid) => pid,
            Err(e) => {
                report.errors.push(format!("{}: {e}", path.display()));
                continue;
            }
        };

        if pid_alive(pid) {
            if let Err(e) = kill_process(pid) {
                report.errors.push(format!("failed to kill pid {pid}: {e}"));
                continue;
            }
            report.killed += 1;
            report.killed_pids.push(pid);
        }
        if let Err(e) = std::fs::remove_file(&path) {
            report.errors.push(format!("remove {}: {e}", path.display()));
        }
    }

    if report.killed > 0 {
        info!(killed = report.killed, pids = ?report.killed_pids, "Reaped orphaned node processes");
    }
    report
}

fn parse_pid(raw: &str) -> Result<u32, String> {
    raw.trim()
        .parse::<u32>()
        .map_err(|e| format!("parse pid {:?}: {e}", raw.trim()))
}

/// Send SIGKILL to a process. A process that is already gone counts as killed.
#[cfg(unix)]
fn kill_process(pid: u32) -> Result<(), String> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|e| format!("pid {pid} out of range: {e}"))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(not(unix))]
fn kill_process(_pid: u32) -> Result<(), String> {
    Err("kill not supported on this platform".to_string())
}
