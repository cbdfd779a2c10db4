//! Configuration loaded from `config/manager.toml`.
//!
//! Every field has a default, so a missing file is fine. Durations are seconds.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/manager.toml";
pub const CONFIG_PATH_ENV: &str = "MC_MANAGER_CONFIG";
pub const WORKING_PATH_ENV: &str = "MC_MANAGER_WORKING_PATH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ManagerConfig {
    pub server: ServerConfig,
    pub autostop: AutostopConfig,
    pub query: QueryConfig,
    pub operator: OperatorConfig,
}

/// How to launch and talk to the supervised server.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub working_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    /// Console line that asks the server to shut down.
    pub stop_command: String,
    pub stop_timeout_secs: u64,
    /// Time between SIGTERM and a hard kill once `stop_timeout_secs` ran out.
    pub kill_grace_secs: u64,
    /// How long a correlated console request waits for its response line.
    pub query_timeout_secs: u64,
    /// Echo every console line through the log.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            program: "./run.sh".to_string(),
            args: vec!["nogui".to_string()],
            stop_command: "stop".to_string(),
            stop_timeout_secs: 90,
            kill_grace_secs: 10,
            query_timeout_secs: 4,
            verbose: false,
        }
    }
}

impl ServerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AutostopConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub idle_threshold_secs: u64,
    /// Minimum age of the idle timestamp before a manual reset refreshes it.
    pub reset_debounce_secs: u64,
}

impl Default for AutostopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            idle_threshold_secs: 15 * 60,
            reset_debounce_secs: 60,
        }
    }
}

impl AutostopConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn reset_debounce(&self) -> Duration {
        Duration::from_secs(self.reset_debounce_secs)
    }
}

/// Fallback UDP query endpoint, used when the console path fails.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 25565,
            timeout_secs: 5,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct OperatorConfig {
    /// How long `start` waits for the readiness marker before giving up.
    pub start_wait_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self { start_wait_secs: 240 }
    }
}

impl OperatorConfig {
    pub fn start_wait(&self) -> Duration {
        Duration::from_secs(self.start_wait_secs)
    }
}

impl ManagerConfig {
    /// Load from `$MC_MANAGER_CONFIG` (or the default path), then apply
    /// `$MC_MANAGER_WORKING_PATH`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from(Path::new(&path))?;
        if let Ok(dir) = std::env::var(WORKING_PATH_ENV) {
            cfg.server.working_dir = PathBuf::from(dir);
        }
        Ok(cfg)
    }

    /// A missing file yields the defaults; an unreadable or invalid one is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read { path: path.to_path_buf(), source })
            }
        };
        Self::parse(&s).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.server.program, "./run.sh");
        assert_eq!(cfg.server.args, vec!["nogui"]);
        assert_eq!(cfg.server.stop_command, "stop");
        assert_eq!(cfg.server.query_timeout(), Duration::from_secs(4));
        assert_eq!(cfg.autostop.idle_threshold(), Duration::from_secs(900));
        assert_eq!(cfg.autostop.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.autostop.reset_debounce(), Duration::from_secs(60));
        assert_eq!(cfg.query.port, 25565);
        assert_eq!(cfg.operator.start_wait(), Duration::from_secs(240));
    }

    #[test]
    fn test_partial_override() {
        let cfg = ManagerConfig::parse(
            r#"
            [server]
            working_dir = "/srv/minecraft"
            program = "java"
            args = ["-Xmx4G", "-jar", "server.jar", "nogui"]
            verbose = true

            [autostop]
            idle_threshold_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.working_dir, PathBuf::from("/srv/minecraft"));
        assert_eq!(cfg.server.program, "java");
        assert_eq!(cfg.server.args.len(), 4);
        assert!(cfg.server.verbose);
        // 지정하지 않은 값은 기본값 유지
        assert_eq!(cfg.server.stop_command, "stop");
        assert_eq!(cfg.autostop.idle_threshold_secs, 600);
        assert_eq!(cfg.autostop.poll_interval_secs, 60);
        assert!(cfg.query.enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ManagerConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.server.program, "./run.sh");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.toml");
        std::fs::write(&path, "[server]\nstop_timeout_secs = \"soon\"\n").unwrap();
        let err = ManagerConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("manager.toml"));
    }
}
