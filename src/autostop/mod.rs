//! Idle auto-stop
//!
//! Polls the server on a fixed cadence and stops it once nobody has been
//! online for longer than the idle threshold. A server that is stopped or
//! still starting is never idle.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use crate::config::AutostopConfig;
use crate::console::{LineRule, PlayerList};
use crate::supervisor::{Result, ServerManager, ServerStatus};
use crate::utils::format_duration;

/// Console text printed when a player joins.
pub const JOIN_MARKER: &str = "joined the game";

/// Handler key of the join observer installed by [`IdleWatcher::reset_on_join`].
pub const JOIN_HANDLER_KEY: &str = "autostop-join";

/// What the watcher needs from the supervisor.
pub trait ServerControl: Send + Sync {
    fn status(&self) -> ServerStatus;
    fn player_list(&self) -> impl Future<Output = Result<PlayerList>> + Send;
    fn stop(&self) -> impl Future<Output = Result<()>> + Send;
}

impl ServerControl for ServerManager {
    fn status(&self) -> ServerStatus {
        ServerManager::status(self)
    }

    fn player_list(&self) -> impl Future<Output = Result<PlayerList>> + Send {
        self.get_player_list()
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        ServerManager::stop(self)
    }
}

/// Result of one idle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// Not running; idle timer cleared.
    Offline,
    /// Player list unavailable; timer left as is.
    QueryFailed,
    Occupied(u32),
    /// Empty server seen for the first time; timer started.
    FirstObservation,
    Idle { elapsed: Duration },
    Stopped,
    StopFailed,
}

/// Read-only view of the idle timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleRemaining {
    NotObserved,
    StoppingSoon,
    Counting { elapsed: Duration, remaining: Duration },
}

impl std::fmt::Display for IdleRemaining {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotObserved => f.write_str("not yet online"),
            Self::StoppingSoon => f.write_str("idle, stopping soon"),
            Self::Counting { elapsed, remaining } => write!(
                f,
                "idle for {}, stopping in {}",
                format_duration(*elapsed),
                format_duration(*remaining)
            ),
        }
    }
}

pub struct IdleWatcher<C> {
    control: C,
    poll_interval: Duration,
    idle_threshold: Duration,
    reset_debounce: Duration,
    /// Serializes checks. Held for a whole tick, including a triggered stop.
    tick: tokio::sync::Mutex<()>,
    /// Last time the server was seen with players. `None` = not observed yet.
    /// Only ever locked briefly, never across an await.
    last_online: Mutex<Option<Instant>>,
}

impl<C: ServerControl> IdleWatcher<C> {
    pub fn new(control: C, config: &AutostopConfig) -> Self {
        Self {
            control,
            poll_interval: config.poll_interval(),
            idle_threshold: config.idle_threshold(),
            reset_debounce: config.reset_debounce(),
            tick: tokio::sync::Mutex::new(()),
            last_online: Mutex::new(None),
        }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    fn last_online(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_online.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn check(&self) -> IdleCheck {
        self.check_at(Instant::now()).await
    }

    /// One tick of the watcher, evaluated at `now`.
    pub async fn check_at(&self, now: Instant) -> IdleCheck {
        let _tick = self.tick.lock().await;

        if self.control.status() != ServerStatus::Running {
            *self.last_online() = None;
            return IdleCheck::Offline;
        }

        let list = match self.control.player_list().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("IdleWatcher: error getting player list: {}", e);
                return IdleCheck::QueryFailed;
            }
        };

        let since = {
            let mut last_online = self.last_online();
            if list.count > 0 {
                *last_online = Some(now);
                return IdleCheck::Occupied(list.count);
            }
            match *last_online {
                Some(since) => since,
                None => {
                    *last_online = Some(now);
                    return IdleCheck::FirstObservation;
                }
            }
        };

        let elapsed = now.saturating_duration_since(since);
        if elapsed <= self.idle_threshold {
            return IdleCheck::Idle { elapsed };
        }

        tracing::info!(
            "IdleWatcher: no players for {}, stopping server",
            format_duration(elapsed)
        );
        let outcome = match self.control.stop().await {
            Ok(()) => IdleCheck::Stopped,
            Err(e) => {
                tracing::error!("IdleWatcher: failed to stop server: {}", e);
                IdleCheck::StopFailed
            }
        };
        *self.last_online() = None;
        outcome
    }

    /// Refresh the idle timer from outside the poll cadence (e.g. a join
    /// event). Ignored while the timer is younger than the reset debounce.
    pub fn reset(&self) -> bool {
        self.reset_at(Instant::now())
    }

    pub fn reset_at(&self, now: Instant) -> bool {
        let mut last_online = self.last_online();
        match *last_online {
            Some(since) if now.saturating_duration_since(since) < self.reset_debounce => false,
            _ => {
                *last_online = Some(now);
                true
            }
        }
    }

    /// Never waits for a running check.
    pub fn remaining_time(&self) -> IdleRemaining {
        self.remaining_time_at(Instant::now())
    }

    pub fn remaining_time_at(&self, now: Instant) -> IdleRemaining {
        let Some(since) = *self.last_online() else {
            return IdleRemaining::NotObserved;
        };
        let elapsed = now.saturating_duration_since(since);
        if elapsed >= self.idle_threshold {
            IdleRemaining::StoppingSoon
        } else {
            IdleRemaining::Counting { elapsed, remaining: self.idle_threshold - elapsed }
        }
    }

    /// Poll forever. The first check runs immediately.
    pub async fn run(self: Arc<Self>) {
        let period = self.poll_interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "IdleWatcher started (interval {}, threshold {})",
            format_duration(period),
            format_duration(self.idle_threshold)
        );
        loop {
            ticker.tick().await;
            let outcome = self.check().await;
            tracing::debug!("IdleWatcher tick: {:?}", outcome);
        }
    }
}

impl IdleWatcher<ServerManager> {
    /// Reset the idle timer whenever the console reports a join.
    ///
    /// The observer holds only a weak reference, so it does not keep the
    /// watcher alive through the manager's handler registry.
    pub fn reset_on_join(self: &Arc<Self>) {
        let watcher = Arc::downgrade(self);
        let rule = LineRule::Contains(JOIN_MARKER.to_string());
        self.control.register_handler(
            JOIN_HANDLER_KEY,
            Box::new(move |line: &str| {
                let found = rule.matches(line)?;
                if let Some(watcher) = watcher.upgrade() {
                    if watcher.reset() {
                        tracing::debug!("IdleWatcher: player joined, idle timer reset");
                    }
                }
                Some(found)
            }),
        );
    }
}
