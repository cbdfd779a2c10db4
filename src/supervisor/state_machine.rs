use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised server.
///
/// Never stored directly: it is derived from whether a process is attached and
/// whether the readiness marker has been seen since it was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
}

impl ServerStatus {
    pub fn derive(active: bool, ready: bool) -> Self {
        match (active, ready) {
            (false, _) => Self::Stopped,
            (true, false) => Self::Starting,
            (true, true) => Self::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_states() {
        assert_eq!(ServerStatus::derive(false, false), ServerStatus::Stopped);
        // a stale ready flag never outlives the process
        assert_eq!(ServerStatus::derive(false, true), ServerStatus::Stopped);
        assert_eq!(ServerStatus::derive(true, false), ServerStatus::Starting);
        assert_eq!(ServerStatus::derive(true, true), ServerStatus::Running);
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&ServerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(ServerStatus::Starting.to_string(), "starting");
    }
}
