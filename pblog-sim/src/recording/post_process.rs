//! External command run on a finished log.
//!
//! The command is a template expanded with:
//!
//! | Placeholder     | Value                                        |
//! |-----------------|----------------------------------------------|
//! | `{pblog_path}`  | path of the finished log                     |
//! | `{start_ms}`    | simulation time of the first data record, ms |
//! | `{end_ms}`      | simulation time of the last data record, ms  |
//!
//! and run through the platform shell.

use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

/// How long a detached command is watched for an early failure
pub const GRACE_PERIOD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcess {
    template: String,
    /// Wait for the command instead of detaching it
    sync: bool,
}

impl PostProcess {
    pub fn new(template: impl Into<String>, sync: bool) -> Self {
        Self {
            template: template.into(),
            sync,
        }
    }

    pub fn command_line(&self, log_path: &Path, start_ms: i64, end_ms: i64) -> String {
        self.template
            .replace("{pblog_path}", &log_path.display().to_string())
            .replace("{start_ms}", &start_ms.to_string())
            .replace("{end_ms}", &end_ms.to_string())
    }

    /// Run the command for a finished log.
    ///
    /// Returns the exit status when it is known: always in sync mode, and in
    /// detached mode only if the command exited within [`GRACE_PERIOD`].
    /// Failures are logged and never propagated.
    pub fn run(&self, log_path: &Path, start_ms: i64, end_ms: i64) -> Option<ExitStatus> {
        let line = self.command_line(log_path, start_ms, end_ms);
        info!("Running post-processing: {}", line);

        if self.sync {
            match shell_command(&line).status() {
                Ok(status) => {
                    log_status(&line, status);
                    Some(status)
                }
                Err(e) => {
                    error!("Failed to run '{}': {}", line, e);
                    None
                }
            }
        } else {
            match shell_command(&line).spawn() {
                Ok(child) => detach(child, line),
                Err(e) => {
                    error!("Failed to start '{}': {}", line, e);
                    None
                }
            }
        }
    }
}

fn detach(mut child: Child, line: String) -> Option<ExitStatus> {
    thread::sleep(GRACE_PERIOD);

    match child.try_wait() {
        Ok(Some(status)) => {
            log_status(&line, status);
            Some(status)
        }
        Ok(None) => {
            debug!("Detaching post-processing command (pid {})", child.id());
            let reaper = thread::Builder::new()
                .name("pblog-post-process".to_string())
                .spawn(move || match child.wait() {
                    Ok(status) => log_status(&line, status),
                    Err(e) => warn!("Lost track of '{}': {}", line, e),
                });
            if let Err(e) = reaper {
                warn!("Cannot watch post-processing command: {}", e);
            }
            None
        }
        Err(e) => {
            error!("Cannot query post-processing command: {}", e);
            None
        }
    }
}

fn log_status(line: &str, status: ExitStatus) {
    if status.success() {
        info!("Post-processing finished: {}", line);
    } else {
        error!("Post-processing '{}' failed with {}", line, status);
    }
}

fn shell_command(line: &str) -> Command {
    let mut command;
    if cfg!(windows) {
        command = Command::new("cmd");
        command.arg("/C");
    } else {
        command = Command::new("sh");
        command.arg("-c");
    }
    command.arg(line);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_placeholders() {
        let post = PostProcess::new(
            "agent --pblog_path {pblog_path} --start_ms {start_ms} --end_ms {end_ms}",
            true,
        );
        assert_eq!(
            post.command_line(Path::new("/logs/run.pblog"), 100, 2500),
            "agent --pblog_path /logs/run.pblog --start_ms 100 --end_ms 2500"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_waits_for_command() {
        let temp = tempfile::TempDir::new().unwrap();
        let log = temp.path().join("run.pblog");
        let post = PostProcess::new("echo {start_ms}-{end_ms} > {pblog_path}.done", true);

        let status = post.run(&log, 5, 10).unwrap();
        assert!(status.success());
        let marker = std::fs::read_to_string(temp.path().join("run.pblog.done")).unwrap();
        assert_eq!(marker.trim(), "5-10");
    }

    #[cfg(unix)]
    #[test]
    fn test_detached_reports_early_failure() {
        let post = PostProcess::new("exit 3", false);
        let status = post.run(Path::new("run.pblog"), 0, 0).unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_detached_long_running_command() {
        let post = PostProcess::new("sleep 1", false);
        assert!(post.run(Path::new("run.pblog"), 0, 0).is_none());
    }
}
