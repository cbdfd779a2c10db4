//! Managed Process - the child server process and its stdio plumbing
//!
//! The supervisor owns exactly one of these while a server is active:
//! - stdin shared behind an async mutex so command lines never interleave
//! - stdout handed to the console reader
//! - a waiter task that owns the `Child`, reaps it, can be told to kill it
//!   and publishes the exit on a watch channel

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::{watch, Mutex, Notify};

use super::error::{ManagerError, Result};
use crate::config::ServerConfig;

pub type SharedStdin = Arc<Mutex<ChildStdin>>;

/// A freshly spawned child with its pipes taken out.
pub(crate) struct Spawned {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawn the configured server in its working directory with stdin/stdout piped.
/// stderr is inherited so crash output is never swallowed.
pub(crate) fn spawn(config: &ServerConfig) -> Result<Spawned> {
    let program = resolve_program(&config.working_dir, &config.program);

    let mut cmd = TokioCommand::new(&program);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(false);

    crate::utils::apply_creation_flags(&mut cmd);

    let mut child = cmd.spawn().map_err(|source| ManagerError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.start_kill();
        return Err(ManagerError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "child stdio was not piped",
        )));
    };

    Ok(Spawned { child, stdin, stdout })
}

/// A relative program path with a separator (`./run.sh`, `bin/server`) is
/// looked up in the working directory; bare names go through `PATH`.
pub(crate) fn resolve_program(working_dir: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        working_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Write one console line and flush. A trailing newline is added unless
/// `text` already ends with one.
pub async fn write_line(stdin: &SharedStdin, text: &str) -> io::Result<()> {
    let data = if text.ends_with('\n') { text.to_string() } else { format!("{}\n", text) };
    let mut handle = stdin.lock().await;
    handle.write_all(data.as_bytes()).await?;
    handle.flush().await
}

/// Reap `child`, or kill it first once `kill` is notified.
pub(crate) async fn wait_for_exit(mut child: Child, kill: Arc<Notify>) -> io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill server process: {}", e);
            }
            child.wait().await
        }
    }
}

/// Exit of the process as published by the waiter task. `None` while it runs.
pub(crate) type ExitOutcome = Option<std::result::Result<ExitStatus, Arc<io::Error>>>;

// ─── Managed Process ─────────────────────────────────────────

/// Handle to the active server process.
pub(crate) struct ManagedProcess {
    pid: Option<u32>,
    stdin: SharedStdin,
    exit: watch::Receiver<ExitOutcome>,
    kill: Arc<Notify>,
    stopping: bool,
}

impl ManagedProcess {
    pub fn new(
        pid: Option<u32>,
        stdin: ChildStdin,
        exit: watch::Receiver<ExitOutcome>,
        kill: Arc<Notify>,
    ) -> Self {
        Self {
            pid,
            stdin: Arc::new(Mutex::new(stdin)),
            exit,
            kill,
            stopping: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stdin(&self) -> SharedStdin {
        self.stdin.clone()
    }

    /// Claim the stop slot. `None` means a stop is already underway.
    pub fn begin_stop(&mut self) -> Option<ExitWaiter> {
        if self.stopping {
            return None;
        }
        self.stopping = true;
        Some(ExitWaiter {
            pid: self.pid,
            exit: self.exit.clone(),
            kill: self.kill.clone(),
        })
    }

    /// Release the stop slot so a later stop can try again.
    pub fn end_stop(&mut self) {
        self.stopping = false;
    }
}

/// Awaits the exit of a stopping server, escalating to SIGTERM and then a
/// hard kill when it takes too long. Dropping it leaves the process alone.
pub(crate) struct ExitWaiter {
    pid: Option<u32>,
    exit: watch::Receiver<ExitOutcome>,
    kill: Arc<Notify>,
}

impl ExitWaiter {
    /// Wait up to `timeout` for a graceful exit. Past that the process is
    /// terminated and the call reports `ForcedKill`.
    pub async fn wait(mut self, timeout: Duration, grace: Duration) -> Result<ExitStatus> {
        if let Ok(exited) = tokio::time::timeout(timeout, self.exited()).await {
            return exited;
        }
        tracing::warn!("Server did not exit within {:?}, terminating", timeout);

        let terminated = self.pid.map(crate::utils::terminate_pid).unwrap_or(false);
        if terminated {
            if let Ok(exited) = tokio::time::timeout(grace, self.exited()).await {
                let status = exited?;
                tracing::warn!("Server terminated with {}", status);
                return Err(ManagerError::ForcedKill(timeout));
            }
        }

        let status = self.kill().await?;
        tracing::warn!("Server killed ({})", status);
        Err(ManagerError::ForcedKill(timeout))
    }

    /// Kill immediately and reap.
    pub async fn kill(mut self) -> Result<ExitStatus> {
        // 이미 종료된 경우에도 permit만 남으므로 무해
        self.kill.notify_one();
        self.exited().await
    }

    async fn exited(&mut self) -> Result<ExitStatus> {
        let outcome = self
            .exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ManagerError::TaskFailed("exit waiter ended without a status".into()))?
            .clone();
        match outcome {
            Some(Ok(status)) => Ok(status),
            Some(Err(e)) => Err(ManagerError::Io(io::Error::new(e.kind(), e.to_string()))),
            None => Err(ManagerError::TaskFailed("exit status missing".into())),
        }
    }
}
