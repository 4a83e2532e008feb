use std::os::windows::process::CommandExt;
use std::process::{Command, Stdio};

use super::PlatformOps;

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

pub(super) struct Windows;

impl PlatformOps for Windows {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn configure_child_group(&self, cmd: &mut Command) {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    fn pid_alive(&self, pid: u32) -> bool {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                if stdout.contains("No tasks are running") {
                    return false;
                }
                stdout.contains(&pid.to_string())
            }
            // Probe failure: assume alive rather than reaping a live run.
            Err(_) => true,
        }
    }

    fn terminate_tree(&self, pid: u32, force: bool) {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string(), "/T"]);
        if force {
            cmd.arg("/F");
        }
        let _ = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
