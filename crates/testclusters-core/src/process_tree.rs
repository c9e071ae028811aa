//! OS process inspection used when tearing a node down.
//!
//! The server may run as a child of a wrapper script, so termination needs
//! to see the whole tree below the launched pid.
//!
//! - **Linux**: reads `/proc/<pid>/{stat,cmdline}` via `std::fs`
//! - **macOS**: uses `ps` / `pgrep` output (safe, no FFI)
//! - **Other**: no children and no info

use serde::Serialize;

/// Scheduler state of a process as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Zombie,
    Unknown,
}

/// Snapshot of one process, used for logging before it is signalled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub argv: Vec<String>,
    pub state: ProcessState,
}

impl ProcessInfo {
    /// `commandLine:`..` command:`..` args:`..`` as written to the build log.
    #[must_use]
    pub fn describe(&self) -> String {
        let command = self.argv.first().map_or("-", String::as_str);
        let args = self
            .argv
            .iter()
            .skip(1)
            .map(|a| format!("'{a}'"))
            .collect::<Vec<_>>()
            .join(" ");
        let command_line = if self.argv.is_empty() {
            "-".to_string()
        } else {
            self.argv.join(" ")
        };
        format!("commandLine:`{command_line}` command:`{command}` args:`{args}`")
    }
}

/// Whether a pid refers to a live, non-zombie process.
#[cfg(unix)]
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let exists = match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    };
    exists && read_process_info(pid).is_none_or(|info| info.state != ProcessState::Zombie)
}

#[cfg(not(unix))]
#[must_use]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

// =============================================================================
// Linux: /proc filesystem
// =============================================================================

#[cfg(target_os = "linux")]
pub fn read_process_info(pid: u32) -> Option<ProcessInfo> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let cmdline = std::fs::read_to_string(format!("/proc/{pid}/cmdline")).unwrap_or_default();
    let (name, state, ppid) = parse_stat(&stat)?;
    let argv = cmdline
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    Some(ProcessInfo {
        pid,
        ppid,
        name,
        argv,
        state,
    })
}

/// Parse "pid (name) state ppid ...". The name can contain spaces and
/// parens, so the last ')' ends it.
#[cfg(any(target_os = "linux", test))]
fn parse_stat(stat: &str) -> Option<(String, ProcessState, u32)> {
    let name_start = stat.find('(')?;
    let name_end = stat.rfind(')')?;
    let name = stat.get(name_start + 1..name_end)?.to_string();
    let mut fields = stat.get(name_end + 2..)?.split_whitespace();
    let state = match fields.next()? {
        "R" => ProcessState::Running,
        "S" => ProcessState::Sleeping,
        "D" => ProcessState::DiskSleep,
        "T" | "t" => ProcessState::Stopped,
        "Z" | "X" => ProcessState::Zombie,
        _ => ProcessState::Unknown,
    };
    let ppid = fields.next()?.parse().ok()?;
    Some((name, state, ppid))
}

#[cfg(target_os = "linux")]
pub fn find_children(pid: u32) -> Vec<u32> {
    // Kernel 3.5+ exposes direct children per task. Each thread only lists
    // the children it forked, and the JVM forks from worker threads.
    let Ok(tasks) = std::fs::read_dir(format!("/proc/{pid}/task")) else {
        return scan_children_from_proc(pid);
    };
    let mut children = Vec::new();
    let mut listed = false;
    for task in tasks.flatten() {
        if let Ok(contents) = std::fs::read_to_string(task.path().join("children")) {
            listed = true;
            children.extend(
                contents
                    .split_whitespace()
                    .filter_map(|s| s.parse::<u32>().ok()),
            );
        }
    }
    if !listed {
        return scan_children_from_proc(pid);
    }
    children.sort_unstable();
    children.dedup();
    children
}

#[cfg(target_os = "linux")]
fn scan_children_from_proc(ppid: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|child| {
            std::fs::read_to_string(format!("/proc/{child}/stat"))
                .ok()
                .and_then(|stat| parse_stat(&stat))
                .is_some_and(|(_, _, parent)| parent == ppid)
        })
        .collect()
}

// =============================================================================
// macOS: ps command (safe, no FFI)
// =============================================================================

#[cfg(target_os = "macos")]
pub fn read_process_info(pid: u32) -> Option<ProcessInfo> {
    let output = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "ppid=,state=,comm="])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8(output.stdout).ok()?;
    let mut fields = line.split_whitespace();
    let ppid = fields.next()?.parse::<u32>().ok()?;
    let state = match fields.next()?.chars().next() {
        Some('R') => ProcessState::Running,
        Some('S' | 'I') => ProcessState::Sleeping,
        Some('U') => ProcessState::DiskSleep,
        Some('T') => ProcessState::Stopped,
        Some('Z') => ProcessState::Zombie,
        _ => ProcessState::Unknown,
    };
    let comm = fields.next()?;
    let name = comm.rsplit('/').next().unwrap_or(comm).to_string();

    let argv = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "args="])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    Some(ProcessInfo {
        pid,
        ppid,
        name,
        argv,
        state,
    })
}

#[cfg(target_os = "macos")]
pub fn find_children(pid: u32) -> Vec<u32> {
    std::process::Command::new("pgrep")
        .args(["-P", &pid.to_string()])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| {
            s.lines()
                .filter_map(|line| line.trim().parse::<u32>().ok())
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Other platforms
// =============================================================================

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn read_process_info(_pid: u32) -> Option<ProcessInfo> {
    None
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn find_children(_pid: u32) -> Vec<u32> {
    Vec::new()
}
