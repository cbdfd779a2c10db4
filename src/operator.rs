//! Operator console
//!
//! Line commands typed into the daemon's own stdin. Replies go out through a
//! channel so slow operations (start, stop) can answer later without blocking
//! the prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::autostop::IdleWatcher;
use crate::protocol::query::QueryClient;
use crate::supervisor::{ManagerError, ServerManager, ServerStatus};

const HELP: &str = "\
Commands:
  help            Show this help message
  ping            Check that the manager is responsive
  status          Show server status
  start           Start the server
  stop            Stop the server
  restart         Restart the server
  players         Show online player count and names
  idle            Show the idle auto-stop timer
  verbose on|off  Echo server console output
  /<command>      Send a raw command to the server console
  quit            Stop the server and exit";

/// Parsed operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Help,
    Ping,
    Status,
    Start,
    Stop,
    Restart,
    Players,
    Idle,
    Verbose(bool),
    Console(String),
    Quit,
    Unknown(String),
}

impl OperatorCommand {
    /// `None` for blank input.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if let Some(raw) = input.strip_prefix('/') {
            return Some(Self::Console(raw.trim().to_string()));
        }

        let mut parts = input.split_whitespace();
        let name = parts.next().unwrap_or_default().trim_start_matches('!').to_lowercase();
        let arg = parts.next().map(str::to_lowercase);

        Some(match (name.as_str(), arg.as_deref()) {
            ("help", _) => Self::Help,
            ("ping", _) => Self::Ping,
            ("status", _) => Self::Status,
            ("start", _) => Self::Start,
            ("stop", _) => Self::Stop,
            ("restart", _) => Self::Restart,
            ("players" | "list", _) => Self::Players,
            ("idle", _) => Self::Idle,
            ("verbose", Some("on")) => Self::Verbose(true),
            ("verbose", Some("off")) => Self::Verbose(false),
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(input.to_string()),
        })
    }
}

pub struct Operator {
    manager: ServerManager,
    watcher: Option<Arc<IdleWatcher<ServerManager>>>,
    query: Option<QueryClient>,
    start_wait: Duration,
    starting: Arc<AtomicBool>,
    out: mpsc::UnboundedSender<String>,
}

impl Operator {
    pub fn new(
        manager: ServerManager,
        watcher: Option<Arc<IdleWatcher<ServerManager>>>,
        query: Option<QueryClient>,
        start_wait: Duration,
        out: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            manager,
            watcher,
            query,
            start_wait,
            starting: Arc::new(AtomicBool::new(false)),
            out,
        }
    }

    fn reply(&self, msg: impl Into<String>) {
        // 수신측이 닫혔으면 종료 중이므로 무시
        let _ = self.out.send(msg.into());
    }

    /// Handle one line of input. Returns `false` once the operator asked to quit.
    pub async fn handle_line(&self, input: &str) -> bool {
        let Some(cmd) = OperatorCommand::parse(input) else {
            return true;
        };
        tracing::debug!("Operator command: {:?}", cmd);

        match cmd {
            OperatorCommand::Help => self.reply(HELP),
            OperatorCommand::Ping => self.reply("Pong!"),
            OperatorCommand::Status => self.reply(format!("Server status: {}", self.manager.status())),
            OperatorCommand::Start => self.start(),
            OperatorCommand::Stop => self.spawn_lifecycle("stop"),
            OperatorCommand::Restart => self.spawn_lifecycle("restart"),
            OperatorCommand::Players => {
                let reply = self.players().await;
                self.reply(reply);
            }
            OperatorCommand::Idle => match &self.watcher {
                Some(watcher) => self.reply(format!("Idle timer: {}", watcher.remaining_time())),
                None => self.reply("Idle auto-stop is disabled."),
            },
            OperatorCommand::Verbose(on) => {
                self.manager.set_verbose(on);
                self.reply(format!("Console echo {}", if on { "enabled" } else { "disabled" }));
            }
            OperatorCommand::Console(raw) => {
                if raw.is_empty() {
                    self.reply("Nothing to send.");
                } else {
                    match self.manager.send_command(&raw).await {
                        Ok(()) => self.reply(format!("Sent: {}", raw)),
                        Err(e) => self.reply(format!("Error sending command: {}", e)),
                    }
                }
            }
            OperatorCommand::Quit => return false,
            OperatorCommand::Unknown(raw) => {
                self.reply(format!("Unknown command '{}'. Type 'help' for a list of commands.", raw))
            }
        }
        true
    }

    fn start(&self) {
        if self.starting.load(Ordering::SeqCst) {
            self.reply("Don't rush me, the server is still starting...");
            return;
        }
        if self.manager.status() == ServerStatus::Running {
            self.reply("Server is already running.");
            return;
        }

        self.starting.store(true, Ordering::SeqCst);
        if let Err(e) = self.manager.start() {
            self.starting.store(false, Ordering::SeqCst);
            self.reply(format!("Error starting server: {}", e));
            return;
        }
        self.reply("Starting server... please wait, this may take a few minutes.");

        let manager = self.manager.clone();
        let starting = self.starting.clone();
        let out = self.out.clone();
        let start_wait = self.start_wait;
        tokio::spawn(async move {
            let msg = match wait_for_running(&manager, start_wait).await {
                ServerStatus::Running => "Server started! The server is now online.".to_string(),
                ServerStatus::Stopped => "Server exited before it came online.".to_string(),
                ServerStatus::Starting => format!(
                    "Server start timed out: not online after {}.",
                    crate::utils::format_duration(start_wait)
                ),
            };
            starting.store(false, Ordering::SeqCst);
            let _ = out.send(msg);
        });
    }

    fn spawn_lifecycle(&self, action: &'static str) {
        self.reply(format!("Server {} requested.", action));
        let manager = self.manager.clone();
        let out = self.out.clone();
        tokio::spawn(async move {
            let result = match action {
                "restart" => manager.restart().await,
                _ => manager.stop().await,
            };
            let msg = match (action, result) {
                ("restart", Ok(())) => "Server restarting.".to_string(),
                (_, Ok(())) => "Server stopped.".to_string(),
                (_, Err(e)) => format!("Error during {}: {}", action, e),
            };
            let _ = out.send(msg);
        });
    }

    /// Player list from the console, falling back to the UDP query.
    async fn players(&self) -> String {
        if self.manager.status() != ServerStatus::Running {
            return "Server offline: the server is currently offline.".to_string();
        }

        let console_err = match self.manager.get_player_list().await {
            Ok(list) => return list.to_string(),
            Err(e) => e,
        };
        tracing::warn!("Console player list failed: {}", console_err);

        let Some(query) = &self.query else {
            return describe_query_error(&console_err);
        };
        match query.player_list().await {
            Ok(list) => list.to_string(),
            Err(e) if e.is_timeout() => format!("Query timed out: {}", e),
            Err(e) => format!("Query failed: {}", e),
        }
    }
}

fn describe_query_error(err: &ManagerError) -> String {
    match err {
        ManagerError::Timeout(_) => format!("Query timed out: {}", err),
        e if e.is_offline() => format!("Server offline: {}", e),
        e => format!("Query failed: {}", e),
    }
}

/// Poll status once a second until the server is running, gone, or `limit` passes.
async fn wait_for_running(manager: &ServerManager, limit: Duration) -> ServerStatus {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let status = manager.status();
        if status != ServerStatus::Starting || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutostopConfig, ServerConfig};

    fn operator(with_watcher: bool) -> (Operator, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ServerManager::new(ServerConfig::default());
        let watcher = with_watcher
            .then(|| Arc::new(IdleWatcher::new(manager.clone(), &AutostopConfig::default())));
        (Operator::new(manager, watcher, None, Duration::from_secs(1), tx), rx)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(OperatorCommand::parse("  "), None);
        assert_eq!(OperatorCommand::parse("status"), Some(OperatorCommand::Status));
        assert_eq!(OperatorCommand::parse("!players"), Some(OperatorCommand::Players));
        assert_eq!(OperatorCommand::parse("VERBOSE on"), Some(OperatorCommand::Verbose(true)));
        assert_eq!(
            OperatorCommand::parse("/say hello world"),
            Some(OperatorCommand::Console("say hello world".into()))
        );
        assert_eq!(
            OperatorCommand::parse("verbose maybe"),
            Some(OperatorCommand::Unknown("verbose maybe".into()))
        );
        assert_eq!(OperatorCommand::parse("exit"), Some(OperatorCommand::Quit));
    }

    #[tokio::test]
    async fn test_status_and_ping() {
        let (op, mut rx) = operator(false);
        assert!(op.handle_line("ping").await);
        assert_eq!(rx.recv().await.unwrap(), "Pong!");
        assert!(op.handle_line("status").await);
        assert_eq!(rx.recv().await.unwrap(), "Server status: stopped");
    }

    #[tokio::test]
    async fn test_players_when_offline() {
        let (op, mut rx) = operator(false);
        op.handle_line("players").await;
        assert!(rx.recv().await.unwrap().starts_with("Server offline"));
    }

    #[tokio::test]
    async fn test_console_passthrough_when_stopped() {
        let (op, mut rx) = operator(false);
        op.handle_line("/say hi").await;
        assert_eq!(rx.recv().await.unwrap(), "Error sending command: Server is not running");
    }

    #[tokio::test]
    async fn test_idle_reply() {
        let (op, mut rx) = operator(true);
        op.handle_line("idle").await;
        assert_eq!(rx.recv().await.unwrap(), "Idle timer: not yet online");

        let (op, mut rx) = operator(false);
        op.handle_line("idle").await;
        assert_eq!(rx.recv().await.unwrap(), "Idle auto-stop is disabled.");
    }

    #[tokio::test]
    async fn test_quit_and_unknown() {
        let (op, mut rx) = operator(false);
        assert!(!op.handle_line("quit").await);
        assert!(op.handle_line("jump").await);
        assert!(rx.recv().await.unwrap().starts_with("Unknown command 'jump'"));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_reports_error() {
        let (op, mut rx) = operator(false);
        op.handle_line("stop").await;
        assert_eq!(rx.recv().await.unwrap(), "Server stop requested.");
        assert_eq!(rx.recv().await.unwrap(), "Error during stop: Server is not running");
    }

    #[test]
    fn test_describe_query_error() {
        assert!(describe_query_error(&ManagerError::Timeout(Duration::from_secs(4))).starts_with("Query timed out"));
        assert!(describe_query_error(&ManagerError::NotReady).starts_with("Server offline"));
        assert!(describe_query_error(&ManagerError::UnexpectedResponse("x".into())).starts_with("Query failed"));
    }
}
