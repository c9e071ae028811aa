//! Launching the node process and tearing its process tree down.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{IoContext, LifecycleError, Result};
use crate::process_tree::{find_children, pid_alive, read_process_info};
use crate::reaper::Reaper;

/// How long a graceful stop may take before the process is killed.
pub const DEFAULT_DESTROY_TIMEOUT: Duration = Duration::from_secs(20);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signal sent by [`terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Ask the process to exit (SIGTERM).
    Graceful,
    /// Kill the process (SIGKILL).
    Forced,
}

/// A process in a tree that [`terminate`] can walk and signal.
pub trait ProcessHandle: Sized {
    fn pid(&self) -> u32;

    fn is_alive(&mut self) -> bool;

    /// Snapshot of the direct children at call time.
    fn children(&self) -> Vec<Self>;

    fn signal(&mut self, signal: StopSignal) -> std::io::Result<()>;

    /// Block until the process exits or `timeout` elapses; returns whether it
    /// exited.
    fn wait_for_exit(&mut self, timeout: Duration) -> bool;

    /// Process information written to the log before signalling.
    fn describe(&self) -> String {
        format!("pid:{}", self.pid())
    }
}

/// Stop `handle` and everything below it.
///
/// Children are stopped depth-first before their parent is signalled. A
/// graceful stop escalates to a kill after `timeout`. Stopping a process
/// that already exited is a no-op.
pub fn terminate<H: ProcessHandle>(handle: &mut H, forcibly: bool, timeout: Duration) -> Result<()> {
    if !handle.is_alive() {
        info!(pid = handle.pid(), "Process was not running when we tried to terminate it");
        return Ok(());
    }

    for mut child in handle.children() {
        terminate(&mut child, forcibly, timeout)?;
    }

    let pid = handle.pid();
    info!(
        pid,
        forcibly,
        "Terminating elasticsearch process {}: {}",
        if forcibly { "forcibly" } else { "gracefully" },
        handle.describe()
    );

    if forcibly {
        send(handle, StopSignal::Forced);
    } else {
        send(handle, StopSignal::Graceful);
        if handle.wait_for_exit(timeout) {
            return Ok(());
        }
        info!(
            pid,
            timeout_secs = timeout.as_secs(),
            "Process did not terminate in time, stopping it forcefully"
        );
        send(handle, StopSignal::Forced);
    }

    if handle.wait_for_exit(timeout) {
        Ok(())
    } else {
        Err(LifecycleError::ProcessNotTerminated { pid }.into())
    }
}

fn send<H: ProcessHandle>(handle: &mut H, signal: StopSignal) {
    if let Err(e) = handle.signal(signal) {
        // The wait that follows decides whether this matters.
        warn!(pid = handle.pid(), ?signal, error = %e, "Failed to signal process");
    }
}

// =============================================================================
// OS processes
// =============================================================================

/// A real OS process. The root of a tree keeps its [`Child`] so it can be
/// reaped; descendants are addressed by pid only.
#[derive(Debug)]
pub struct OsProcess {
    pid: u32,
    child: Option<Child>,
}

impl OsProcess {
    #[must_use]
    pub fn from_child(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
        }
    }

    #[must_use]
    pub fn from_pid(pid: u32) -> Self {
        Self { pid, child: None }
    }
}

impl ProcessHandle for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => pid_alive(self.pid),
        }
    }

    fn children(&self) -> Vec<Self> {
        find_children(self.pid)
            .into_iter()
            .map(Self::from_pid)
            .collect()
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: StopSignal) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let (StopSignal::Forced, Some(child)) = (signal, &mut self.child) {
            return child.kill();
        }
        let raw = i32::try_from(self.pid).map_err(std::io::Error::other)?;
        let sig = match signal {
            StopSignal::Graceful => Signal::SIGTERM,
            StopSignal::Forced => Signal::SIGKILL,
        };
        match kill(Pid::from_raw(raw), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from(e)),
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self, _signal: StopSignal) -> std::io::Result<()> {
        match &mut self.child {
            Some(child) => child.kill(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "signalling processes by pid is not supported on this platform",
            )),
        }
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn describe(&self) -> String {
        read_process_info(self.pid).map_or_else(
            || "commandLine:`-` command:`-` args:``".to_string(),
            |info| info.describe(),
        )
    }
}

// =============================================================================
// Launch
// =============================================================================

/// Everything needed to launch the node process.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// The complete environment; nothing is inherited from the caller.
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl LaunchCommand {
    /// The server start script for a distribution linked into `distro_dir`.
    #[must_use]
    pub fn for_distribution(distro_dir: &Path) -> (PathBuf, Vec<String>) {
        if cfg!(windows) {
            (
                PathBuf::from("cmd"),
                vec![
                    "/c".to_string(),
                    distro_dir
                        .join("bin")
                        .join("elasticsearch.bat")
                        .display()
                        .to_string(),
                ],
            )
        } else {
            (distro_dir.join("bin").join("elasticsearch"), Vec::new())
        }
    }
}

fn append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .io_context("open for append", path)
}

/// Launch the process and register it with `reaper` under `id`.
pub fn spawn(launch: &LaunchCommand, reaper: &dyn Reaper, id: &str) -> Result<OsProcess> {
    let stdout = append(&launch.stdout)?;
    let stderr = append(&launch.stderr)?;

    info!(
        node = id,
        program = %launch.program.display(),
        working_dir = %launch.working_dir.display(),
        env = ?launch.env,
        "Running node process"
    );
    let child = Command::new(&launch.program)
        .args(&launch.args)
        .env_clear()
        .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&launch.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|source| LifecycleError::StartFailed {
            node: id.to_string(),
            source,
        })?;

    let process = OsProcess::from_child(child);
    reaper.register_pid(id, process.pid());
    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<String>>>;

    /// Scripted process: `exits_on` is the first signal it obeys.
    struct MockProcess {
        pid: u32,
        alive: bool,
        exits_on: Option<StopSignal>,
        children: Vec<(u32, Option<StopSignal>)>,
        journal: Journal,
    }

    impl MockProcess {
        fn new(pid: u32, exits_on: Option<StopSignal>, journal: &Journal) -> Self {
            Self {
                pid,
                alive: true,
                exits_on,
                children: Vec::new(),
                journal: Rc::clone(journal),
            }
        }
    }

    impl ProcessHandle for MockProcess {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn children(&self) -> Vec<Self> {
            self.children
                .iter()
                .map(|(pid, exits_on)| Self::new(*pid, *exits_on, &self.journal))
                .collect()
        }

        fn signal(&mut self, signal: StopSignal) -> std::io::Result<()> {
            self.journal
                .borrow_mut()
                .push(format!("{}:{signal:?}", self.pid));
            match (self.exits_on, signal) {
                (Some(StopSignal::Graceful), _) | (Some(StopSignal::Forced), StopSignal::Forced) => {
                    self.alive = false;
                }
                _ => {}
            }
            Ok(())
        }

        fn wait_for_exit(&mut self, _timeout: Duration) -> bool {
            !self.alive
        }
    }

    fn journal() -> Journal {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn dead_process_is_noop() {
        let log = journal();
        let mut process = MockProcess::new(1, None, &log);
        process.alive = false;
        terminate(&mut process, false, Duration::ZERO).unwrap();
        terminate(&mut process, true, Duration::ZERO).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn children_are_stopped_before_parent() {
        let log = journal();
        let mut root = MockProcess::new(1, Some(StopSignal::Forced), &log);
        root.children = vec![(2, Some(StopSignal::Forced)), (3, Some(StopSignal::Forced))];
        terminate(&mut root, true, Duration::ZERO).unwrap();
        assert_eq!(*log.borrow(), vec!["2:Forced", "3:Forced", "1:Forced"]);
    }

    #[test]
    fn graceful_escalates_to_kill() {
        let log = journal();
        let mut process = MockProcess::new(7, Some(StopSignal::Forced), &log);
        terminate(&mut process, false, Duration::ZERO).unwrap();
        assert_eq!(*log.borrow(), vec!["7:Graceful", "7:Forced"]);
    }

    #[test]
    fn graceful_exit_does_not_escalate() {
        let log = journal();
        let mut process = MockProcess::new(7, Some(StopSignal::Graceful), &log);
        terminate(&mut process, false, Duration::ZERO).unwrap();
        assert_eq!(*log.borrow(), vec!["7:Graceful"]);
    }

    #[test]
    fn unkillable_process_is_an_error() {
        let log = journal();
        let mut process = MockProcess::new(9, None, &log);
        let err = terminate(&mut process, true, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Lifecycle(LifecycleError::ProcessNotTerminated { pid: 9 })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn terminates_real_process_tree() {
        let dir = tempfile::tempdir().unwrap();
        let launch = LaunchCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "sleep 30 & sleep 30; wait".into()],
            env: vec![("PATH".into(), "/usr/bin:/bin".into())],
            working_dir: dir.path().to_path_buf(),
            stdout: dir.path().join("out.log"),
            stderr: dir.path().join("err.log"),
        };
        let mut process = spawn(&launch, &crate::reaper::NoopReaper, "node{:tree}").unwrap();
        assert!(process.is_alive());
        terminate(&mut process, false, Duration::from_secs(5)).unwrap();
        assert!(!process.is_alive());
        // Idempotent once the tree is gone.
        terminate(&mut process, true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn spawn_failure_is_start_failed() {
        let dir = tempfile::tempdir().unwrap();
        let launch = LaunchCommand {
            program: dir.path().join("missing"),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: dir.path().to_path_buf(),
            stdout: dir.path().join("out.log"),
            stderr: dir.path().join("err.log"),
        };
        let err = spawn(&launch, &crate::reaper::NoopReaper, "node{:x}").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Lifecycle(LifecycleError::StartFailed { .. })
        ));
    }
}
