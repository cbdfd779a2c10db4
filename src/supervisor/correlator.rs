//! Request/response matching on top of the console.
//!
//! Each request registers a single-use observer under a fresh key, sends its
//! command, and waits on a one-slot channel. The observer is removed on every
//! exit path, including when the caller drops the future mid-wait.

use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ManagerError, Result, ServerManager, ServerStatus};
use crate::console::{LineMatch, LineRule, PlayerList};

/// Unregisters its observer when dropped.
struct Registration<'a> {
    manager: &'a ServerManager,
    key: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.manager.unregister_handler(&self.key);
    }
}

impl ServerManager {
    /// Ask the server for its player list (`list`).
    pub async fn get_player_list(&self) -> Result<PlayerList> {
        match self.request("list", LineRule::PlayerList).await? {
            LineMatch::PlayerList(list) => Ok(list),
            other => Err(ManagerError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Send `command` and wait for the first line accepted by `rule`, using the
    /// configured query timeout.
    pub async fn request(&self, command: &str, rule: LineRule) -> Result<LineMatch> {
        self.request_with_timeout(command, rule, self.config.query_timeout())
            .await
    }

    pub async fn request_with_timeout(
        &self,
        command: &str,
        rule: LineRule,
        timeout: Duration,
    ) -> Result<LineMatch> {
        let key = format!("{}-{}", rule.name(), Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel::<LineMatch>(1);

        // Readiness check and registration happen under one lock, before the
        // command goes out, so the response line cannot slip past.
        let _registration = {
            let mut state = self.lock();
            match state.status() {
                ServerStatus::Stopped => return Err(ManagerError::NotRunning),
                ServerStatus::Starting => return Err(ManagerError::NotReady),
                ServerStatus::Running => {}
            }
            state.handlers.register(
                key.clone(),
                Box::new(move |line: &str| {
                    let found = rule.matches(line)?;
                    // 슬롯이 이미 찼으면 이후 매칭은 버림
                    let _ = tx.try_send(found.clone());
                    Some(found)
                }),
            );
            Registration { manager: self, key: key.clone() }
        };

        self.send_command(command).await?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(found)) => Ok(found),
            Ok(None) => Err(ManagerError::NotRunning),
            Err(_) => {
                tracing::debug!("No response to '{}' within {:?} ({})", command, timeout, key);
                Err(ManagerError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_request_fails_fast_when_stopped() {
        let manager = ServerManager::new(ServerConfig::default());
        let err = manager.get_player_list().await.unwrap_err();
        assert!(matches!(err, ManagerError::NotRunning));
        assert_eq!(manager.handler_count(), 0);
    }

    #[test]
    fn test_registration_guard_unregisters() {
        let manager = ServerManager::new(ServerConfig::default());
        manager.register_handler("k", Box::new(|_| None));
        {
            let _guard = Registration { manager: &manager, key: "k".into() };
            assert_eq!(manager.handler_count(), 1);
        }
        assert_eq!(manager.handler_count(), 0);
    }
}
