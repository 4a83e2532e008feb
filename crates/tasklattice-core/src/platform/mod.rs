//! Platform capability for child process-group control.
//!
//! One interface, two implementations: POSIX (signals to the process
//! group) and Windows (`taskkill`/`tasklist`). The local runner only talks
//! to [`PlatformOps`].

use std::process::Command;
use std::time::{Duration, Instant};

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

pub trait PlatformOps: Send + Sync {
    fn name(&self) -> &'static str;

    /// Arrange for the child to start in its own process group (POSIX) or
    /// new console process group (Windows) so termination can target the
    /// whole tree.
    fn configure_child_group(&self, cmd: &mut Command);

    /// Liveness probe. Errors on the conservative side: permission
    /// failures count as alive.
    fn pid_alive(&self, pid: u32) -> bool;

    /// Signal the process tree rooted at `pid`: soft termination when
    /// `force` is false, hard kill when true. Best-effort; never fails.
    fn terminate_tree(&self, pid: u32, force: bool);

    /// Soft-terminate, wait up to `grace` for the tree to exit, then
    /// escalate to a hard kill if it is still alive (or `force` was
    /// requested).
    fn graceful_kill(&self, pid: u32, force: bool, grace: Duration) {
        self.terminate_tree(pid, false);

        let deadline = Instant::now() + grace.max(Duration::from_millis(300));
        while Instant::now() < deadline {
            if !self.pid_alive(pid) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        if self.pid_alive(pid) || force {
            self.terminate_tree(pid, true);
        }
    }
}

/// The platform singleton for the current OS.
pub fn current() -> &'static dyn PlatformOps {
    #[cfg(unix)]
    {
        &posix::Posix
    }
    #[cfg(windows)]
    {
        &windows::Windows
    }
}
