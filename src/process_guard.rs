//! Lifecycle of child processes spawned against the host.
//!
//! A provisioning run shells out to `dnf`, `rpm`, `systemctl`, the cluster
//! setup helper and `psql`. If the provisioner is interrupted halfway through a
//! `dnf install` transaction, the child must not keep running unattended.
//!
//! Every child leads its own process group and gets `PR_SET_PDEATHSIG`, so
//! both an orderly shutdown (signal handler or [`ProcessGuard`] drop) and a
//! crash of the provisioner take the whole tree down.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// PIDs of children currently running under `run_command_safe`.
///
/// Each PID is also the ID of the child's process group.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    terminating: bool,
}

impl ChildRegistry {
    /// The process-wide registry shared by the runner and the signal handler.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        log::debug!("Tracking child PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        log::debug!("Child PID {} reaped", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, then SIGKILL whatever is still running
    /// once `grace_period` has passed. Only the first call does anything.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if std::mem::replace(&mut self.terminating, true) {
            return;
        }

        let pids: Vec<u32> = self.pids.drain().collect();
        if pids.is_empty() {
            return;
        }
        log::info!("Terminating {} child process(es)", pids.len());

        pids.iter().for_each(|&pid| signal_tree(pid, Signal::SIGTERM));

        let deadline = Instant::now() + grace_period;
        let mut running = pids;
        loop {
            running.retain(|&pid| is_running(pid));
            if running.is_empty() {
                log::info!("All child processes exited");
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        for pid in running {
            log::warn!("Child {} ignored SIGTERM, sending SIGKILL", pid);
            signal_tree(pid, Signal::SIGKILL);
        }
    }
}

/// Signal the process group led by `pid`, or just `pid` if it no longer
/// leads one (it exited between spawn and `setpgid`, or was reparented).
fn signal_tree(pid: u32, sig: Signal) {
    let raw = pid as i32;
    if let Err(group_err) = signal::kill(Pid::from_raw(-raw), sig) {
        if let Err(err) = signal::kill(Pid::from_raw(raw), sig) {
            log::debug!(
                "{} to {} failed (group: {}, process: {})",
                sig,
                pid,
                group_err,
                err
            );
        }
    }
}

/// True while `pid` exists and is not a zombie waiting to be reaped.
fn is_running(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // The state letter follows the parenthesised command name, which may
    // itself contain spaces
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| !matches!(state, "Z" | "X"))
        })
        .unwrap_or(true)
}

/// Terminates all tracked children when dropped.
///
/// `main` holds one for the duration of a provisioning run.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
    grace_period: Duration,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(self.grace_period);
        }
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The handler thread terminates tracked children and exits with
/// `128 + signal`. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = Signal::try_from(sig).map(|s| s.as_str()).unwrap_or("signal");
            log::warn!("Received {}, aborting provisioning run", name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of its own process group, with SIGTERM
    /// delivered if the provisioner dies
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        self.process_group(0);
        // SAFETY: prctl is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        registry.register(1234);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep process");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        assert!(is_running(pid));

        registry.terminate_all(Duration::from_secs(2));

        // A signalled child reports no exit code
        let status = child.wait().expect("wait failed");
        assert!(status.code().is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_escalates_to_sigkill() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; echo ready; while :; do sleep 1; done"])
            .stdout(std::process::Stdio::piped())
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn shell");
        let pid = child.id();

        // Wait until the trap is installed
        if let Some(stdout) = child.stdout.take() {
            use std::io::BufRead;
            let mut line = String::new();
            std::io::BufReader::new(stdout).read_line(&mut line).unwrap();
        }

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(300));

        let status = child.wait().expect("wait failed");
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[test]
    fn test_cleanup_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.register(999_999);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.terminating);
        assert_eq!(registry.count(), 0);

        // A child registered after termination started is left alone
        registry.register(999_998);
        registry.terminate_all(Duration::from_millis(10));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_is_running_nonexistent() {
        assert!(!is_running(999_999));
        assert!(is_running(std::process::id()));
    }
}
