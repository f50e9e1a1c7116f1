/// Process management for GDB
///
/// Availability probe, spawning GDB in MI2 mode for a target executable,
/// and the graceful-then-forced shutdown path.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::AdapterConfig;
use crate::events::{DebugEvent, EventSink};
use crate::{DebuggerError, Result};

/// Check that the configured debugger answers a version query
///
/// Returns the first line of `gdb --version`.
pub async fn probe(config: &AdapterConfig) -> Result<String> {
    log::debug!("Probing debugger: {} --version", config.gdb_path);

    let output = Command::new(&config.gdb_path)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(config.probe_timeout, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(DebuggerError::ToolUnavailable(format!(
                "{}: {}",
                config.gdb_path, e
            )))
        }
        Err(_) => {
            return Err(DebuggerError::ToolUnavailable(format!(
                "{} did not answer within {:?}",
                config.gdb_path, config.probe_timeout
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() || !stdout.contains("GNU gdb") {
        return Err(DebuggerError::ToolUnavailable(format!(
            "{} is not GNU gdb",
            config.gdb_path
        )));
    }

    let version = stdout.lines().next().unwrap_or_default().trim().to_string();
    log::info!("Found debugger: {}", version);
    Ok(version)
}

pub struct GdbProcess {
    child: Child,
}

impl GdbProcess {
    /// Start GDB with the MI2 interpreter on `executable`
    ///
    /// The working directory is the executable's directory and the locale
    /// is fixed to `C` so GDB's messages are English.
    pub fn spawn(config: &AdapterConfig, executable: &Path) -> Result<Self> {
        let working_dir = executable
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        log::debug!(
            "Starting GDB process: {} --interpreter=mi2 --quiet {} (cwd {})",
            config.gdb_path,
            executable.display(),
            working_dir.display()
        );

        let child = Command::new(&config.gdb_path)
            .arg("--interpreter=mi2")
            .arg("--quiet")
            .arg("-iex")
            .arg("set confirm off")
            .arg(executable)
            .current_dir(working_dir)
            .env("LANG", "C")
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DebuggerError::SpawnFailed)?;

        log::debug!("GDB process started with PID: {:?}", child.id());
        Ok(GdbProcess { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the three standard streams; fails if any was already taken
    pub fn take_pipes(&mut self) -> Result<(ChildStdin, ChildStdout, ChildStderr)> {
        let missing =
            |name: &str| DebuggerError::Communication(format!("Failed to get {} handle", name));
        let stdin = self.child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = self.child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = self.child.stderr.take().ok_or_else(|| missing("stderr"))?;
        Ok((stdin, stdout, stderr))
    }

    /// Wait up to `grace` for GDB to exit on its own, then kill it
    ///
    /// Returns the exit code when GDB exited by itself.
    pub async fn shutdown(mut self, grace: Duration) -> Option<i32> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::info!("GDB exited: {}", status);
                status.code()
            }
            Ok(Err(e)) => {
                log::warn!("Waiting for GDB failed: {}", e);
                self.kill().await;
                None
            }
            Err(_) => {
                log::warn!("GDB did not exit within {:?}, killing it", grace);
                self.kill().await;
                None
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            log::warn!("Failed to kill GDB: {}", e);
        }
    }
}

/// Forward GDB's stderr lines as log output
pub fn forward_stderr(stderr: ChildStderr, events: EventSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    log::debug!("GDB stderr: {}", line);
                    events.emit(DebugEvent::LogOutput(format!("{}\n", line)));
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("GDB stderr read error: {}", e);
                    break;
                }
            }
        }
        log::debug!("GDB stderr reader finished");
    })
}
