//! Process supervisor for a single console-driven game server.
//!
//! All shared state (the process handle, the ready flag and the console
//! handler registry) sits behind one mutex. The console reader dispatches
//! each line while holding it, so registration and dispatch never race.

pub mod correlator;
pub mod error;
pub mod managed_process;
pub mod state_machine;

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

use crate::config::ServerConfig;
use crate::console::registry::{ConsoleHandler, HandlerRegistry};
use crate::console::{self, LineMatch};
use managed_process::{ManagedProcess, Spawned};

pub use error::{ManagerError, Result};
pub use state_machine::ServerStatus;

#[derive(Default)]
struct ManagerState {
    process: Option<ManagedProcess>,
    ready: bool,
    /// Bumped on every start; tasks of an older process never touch a newer one.
    generation: u64,
    verbose: bool,
    handlers: HandlerRegistry,
}

impl ManagerState {
    fn status(&self) -> ServerStatus {
        ServerStatus::derive(self.process.is_some(), self.ready)
    }

    fn handle_line(&mut self, generation: u64, line: &str) {
        if generation != self.generation {
            return;
        }
        if self.verbose {
            tracing::info!(target: "console", "{}", line);
        }
        if self.process.is_some() && !self.ready && console::is_ready_line(line) {
            self.ready = true;
            tracing::info!("Server is ready");
        }
        self.handlers.dispatch(line);
    }

    /// Drop the process handle if it still belongs to `generation`.
    fn detach(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.process.is_some() {
            self.process = None;
            self.ready = false;
            true
        } else {
            false
        }
    }
}

/// Releases the stop slot when `stop()` ends, including when its future is
/// dropped mid-wait, so the next `stop()` can send the command and kill again.
struct StopSlot<'a> {
    manager: &'a ServerManager,
    generation: u64,
}

impl Drop for StopSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.lock();
        if state.generation == self.generation {
            if let Some(process) = state.process.as_mut() {
                process.end_stop();
            }
        }
    }
}

fn lock_state(state: &Mutex<ManagerState>) -> MutexGuard<'_, ManagerState> {
    state.lock().unwrap_or_else(|poisoned| {
        tracing::error!("Manager state lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Supervisor handle. Cheap to clone; clones share the same server.
#[derive(Clone)]
pub struct ServerManager {
    config: Arc<ServerConfig>,
    state: Arc<Mutex<ManagerState>>,
}

impl ServerManager {
    pub fn new(config: ServerConfig) -> Self {
        let state = ManagerState { verbose: config.verbose, ..ManagerState::default() };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        lock_state(&self.state)
    }

    /// Spawn the server and wire its console. Returns as soon as the pipes are
    /// connected; readiness is reported later through [`status`](Self::status).
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock();
        if state.process.is_some() {
            return Err(ManagerError::AlreadyRunning);
        }

        let Spawned { child, stdin, stdout } = managed_process::spawn(&self.config)?;
        let pid = child.id();

        state.generation += 1;
        state.ready = false;
        let generation = state.generation;

        // ── console reader ───────────────────────────────────
        {
            let shared = self.state.clone();
            tokio::spawn(async move {
                let lines = console::reader::read_lines(stdout, |line| {
                    lock_state(&shared).handle_line(generation, line);
                })
                .await;
                tracing::debug!("Console reader finished after {} lines", lines);
            });
        }

        // ── process waiter ───────────────────────────────────
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        {
            let shared = self.state.clone();
            let kill = kill.clone();
            tokio::spawn(async move {
                let result = managed_process::wait_for_exit(child, kill).await;
                match &result {
                    Ok(status) => tracing::info!("Server process exited with {}", status),
                    Err(e) => tracing::error!("Failed to wait for server process: {}", e),
                }
                if lock_state(&shared).detach(generation) {
                    tracing::info!("Server marked as stopped");
                }
                exit_tx.send_replace(Some(result.map_err(Arc::new)));
            });
        }

        state.process = Some(ManagedProcess::new(pid, stdin, exit_rx, kill));
        tracing::info!(
            "Server started with PID {} in {}",
            pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
            self.config.working_dir.display()
        );
        Ok(())
    }

    /// Send the shutdown command and wait for the process to exit.
    ///
    /// The status is `Stopped` afterwards no matter how the wait ended. A
    /// non-zero exit is reported as [`ManagerError::ExitStatus`]; a process
    /// that had to be terminated as [`ManagerError::ForcedKill`].
    pub async fn stop(&self) -> Result<()> {
        let (stdin, waiter, generation) = {
            let mut state = self.lock();
            let generation = state.generation;
            let process = state.process.as_mut().ok_or(ManagerError::NotRunning)?;
            let waiter = process.begin_stop().ok_or(ManagerError::StopInProgress)?;
            (process.stdin(), waiter, generation)
        };
        let _slot = StopSlot { manager: self, generation };

        tracing::info!("Stopping server");
        let outcome = match managed_process::write_line(&stdin, &self.config.stop_command).await {
            Ok(()) => {
                waiter
                    .wait(self.config.stop_timeout(), self.config.kill_grace())
                    .await
            }
            Err(e) => {
                tracing::warn!("Failed to send '{}': {}, killing server", self.config.stop_command, e);
                waiter.kill().await.and(Err(ManagerError::Io(e)))
            }
        };

        self.lock().detach(generation);

        let status = outcome?;
        if status.success() {
            tracing::info!("Server stopped");
            Ok(())
        } else {
            Err(ManagerError::ExitStatus(status))
        }
    }

    /// Stop then start. A failed stop aborts the restart.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start()
    }

    pub fn status(&self) -> ServerStatus {
        self.lock().status()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().process.as_ref().and_then(|p| p.pid())
    }

    /// Write a line to the server console. Fire-and-forget: nothing waits for output.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        let stdin = {
            let state = self.lock();
            state.process.as_ref().map(|p| p.stdin()).ok_or(ManagerError::NotRunning)?
        };
        managed_process::write_line(&stdin, text).await?;
        tracing::debug!("Sent console command: {}", text);
        Ok(())
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.lock().verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.lock().verbose
    }

    // ─── Handler registry ────────────────────────────────────

    /// Register a console observer. Callers pick the key; an existing
    /// observer under the same key is replaced.
    pub fn register_handler(&self, key: impl Into<String>, handler: ConsoleHandler) {
        self.lock().handlers.register(key, handler);
    }

    pub fn unregister_handler(&self, key: &str) -> bool {
        self.lock().handlers.unregister(key)
    }

    /// Most recent match recorded for `key`.
    pub fn last_result(&self, key: &str) -> Option<LineMatch> {
        self.lock().handlers.last_result(key).cloned()
    }

    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("program", &self.config.program)
            .field("working_dir", &self.config.working_dir)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::LineRule;

    fn detached_state() -> ManagerState {
        ManagerState { generation: 1, ..ManagerState::default() }
    }

    #[test]
    fn test_new_manager_is_stopped() {
        let manager = ServerManager::new(ServerConfig::default());
        assert_eq!(manager.status(), ServerStatus::Stopped);
        assert!(manager.pid().is_none());
        assert_eq!(manager.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_without_process_fails() {
        let manager = ServerManager::new(ServerConfig::default());
        assert!(matches!(manager.stop().await, Err(ManagerError::NotRunning)));
        assert!(matches!(manager.restart().await, Err(ManagerError::NotRunning)));
        assert!(matches!(manager.send_command("say hi").await, Err(ManagerError::NotRunning)));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut state = detached_state();
        state.handlers.register("saves", Box::new(|line| LineRule::Contains("Saved".into()).matches(line)));

        state.handle_line(0, "Saved the game");
        assert!(state.handlers.last_result("saves").is_none());

        state.handle_line(1, "Saved the game");
        assert!(state.handlers.last_result("saves").is_some());
    }

    #[test]
    fn test_ready_requires_active_process() {
        let mut state = detached_state();
        state.handle_line(1, "Done (1.0s)! For help, type \"help\"");
        assert!(!state.ready);
        assert_eq!(state.status(), ServerStatus::Stopped);
    }

    #[test]
    fn test_detach_checks_generation() {
        let mut state = detached_state();
        assert!(!state.detach(1));
        assert!(!state.detach(0));
    }

    #[test]
    fn test_registry_through_manager() {
        let manager = ServerManager::new(ServerConfig::default());
        manager.register_handler("joins", Box::new(|line| LineRule::Contains("joined".into()).matches(line)));
        assert_eq!(manager.handler_count(), 1);
        assert!(manager.last_result("joins").is_none());
        assert!(manager.unregister_handler("joins"));
        assert_eq!(manager.handler_count(), 0);
    }

    #[test]
    fn test_verbose_toggle() {
        let manager = ServerManager::new(ServerConfig { verbose: true, ..ServerConfig::default() });
        assert!(manager.is_verbose());
        manager.set_verbose(false);
        assert!(!manager.is_verbose());
    }
}
