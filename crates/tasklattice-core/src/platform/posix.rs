use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, Pid};

use super::PlatformOps;

pub(super) struct Posix;

impl PlatformOps for Posix {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn configure_child_group(&self, cmd: &mut Command) {
        // New session group so the whole tree is addressable via killpg.
        cmd.process_group(0);
    }

    fn pid_alive(&self, pid: u32) -> bool {
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::ESRCH) => false,
            // Insufficient permission means it exists.
            Err(_) => true,
        }
    }

    fn terminate_tree(&self, pid: u32, force: bool) {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        let target = Pid::from_raw(pid as i32);
        match getpgid(Some(target)) {
            Ok(pgid) => {
                if killpg(pgid, signal).is_err() {
                    let _ = kill(target, signal);
                }
            }
            Err(_) => {
                let _ = kill(target, signal);
            }
        }
    }
}
