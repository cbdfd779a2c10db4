//! Console line matching
//!
//! The server console has no message ids, so every response is recognised by
//! the shape of a single output line. The rules live here as plain data so the
//! readiness marker and the occupancy templates can be tested without a process.

pub mod reader;
pub mod registry;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Both tokens must appear on the same line for the server to count as ready.
pub const READY_TOKEN: &str = "Done";
pub const READY_HELP_HINT: &str = "For help, type \"help\"";

/// Substring shared by every known occupancy response.
pub const PLAYER_LIST_MARKER: &str = "players online:";

// ─── Player List ─────────────────────────────────────────────

/// Occupancy as reported by the server (`list` command or query fallback).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerList {
    pub count: u32,
    pub max: u32,
    pub players: Vec<String>,
}

impl PlayerList {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl std::fmt::Display for PlayerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Players online: {}/{}", self.count, self.max)?;
        if !self.players.is_empty() {
            write!(f, "\n{}", self.players.join(", "))?;
        }
        Ok(())
    }
}

/// Known `list` templates, tried in order. Vanilla and Paper/Spigot differ.
fn player_list_templates() -> &'static [Regex] {
    static TEMPLATES: OnceLock<Vec<Regex>> = OnceLock::new();
    TEMPLATES.get_or_init(|| {
        [
            r"There are (\d+) of a max of (\d+) players online:",
            r"There are (\d+)/(\d+) players online:",
        ]
        .iter()
        .filter_map(|pat| Regex::new(pat).ok())
        .collect()
    })
}

/// Parse an occupancy line. Returns `None` when the line is not an occupancy
/// response at all; a response in an unknown format still yields a list with
/// zeroed counts so availability wins over precision.
pub fn parse_player_list(line: &str) -> Option<PlayerList> {
    if !line.contains(PLAYER_LIST_MARKER) {
        return None;
    }

    let mut list = PlayerList::default();
    match player_list_templates().iter().find_map(|re| re.captures(line)) {
        Some(caps) => {
            list.count = parse_count(&caps[1]);
            list.max = parse_count(&caps[2]);
        }
        None => tracing::warn!("Unrecognised player list format: {}", line),
    }

    if let Some(idx) = line.rfind(':') {
        let names = line[idx + 1..].trim();
        if !names.is_empty() {
            list.players = names.split(", ").map(str::to_string).collect();
        }
    }
    Some(list)
}

fn parse_count(raw: &str) -> u32 {
    raw.parse().unwrap_or_else(|e| {
        tracing::warn!("Failed to parse count '{}': {}", raw, e);
        0
    })
}

/// Whether `line` is the readiness marker printed once the world is loaded.
pub fn is_ready_line(line: &str) -> bool {
    line.contains(READY_TOKEN) && line.contains(READY_HELP_HINT)
}

// ─── Rules ───────────────────────────────────────────────────

/// A single matching rule for console output.
#[derive(Debug, Clone)]
pub enum LineRule {
    /// The readiness marker.
    Ready,
    /// Response to `list`.
    PlayerList,
    /// Any line containing the given text.
    Contains(String),
    /// Any line matching the given pattern.
    Pattern(Regex),
}

/// What a rule produced for a matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch {
    Ready,
    PlayerList(PlayerList),
    Line(String),
}

impl LineRule {
    pub fn matches(&self, line: &str) -> Option<LineMatch> {
        match self {
            Self::Ready => is_ready_line(line).then_some(LineMatch::Ready),
            Self::PlayerList => parse_player_list(line).map(LineMatch::PlayerList),
            Self::Contains(needle) => line
                .contains(needle.as_str())
                .then(|| LineMatch::Line(line.to_string())),
            Self::Pattern(re) => re.is_match(line).then(|| LineMatch::Line(line.to_string())),
        }
    }

    /// Short label, used as the prefix of correlation keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::PlayerList => "playerlist",
            Self::Contains(_) => "contains",
            Self::Pattern(_) => "pattern",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vanilla_format() {
        let list = parse_player_list("There are 3 of a max of 20 players online: Alice, Bob, Carol").unwrap();
        assert_eq!(list.count, 3);
        assert_eq!(list.max, 20);
        assert_eq!(list.players, vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn test_parse_slash_format_empty() {
        let list = parse_player_list("There are 0/20 players online:").unwrap();
        assert_eq!(list, PlayerList { count: 0, max: 20, players: vec![] });
        assert!(list.is_empty());
    }

    #[test]
    fn test_parse_with_log_prefix() {
        let line = "[12:00:00] [Server thread/INFO]: There are 1 of a max of 10 players online: Steve";
        let list = parse_player_list(line).unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.max, 10);
        assert_eq!(list.players, vec!["Steve"]);
    }

    #[test]
    fn test_parse_unknown_format_defaults_to_zero() {
        let list = parse_player_list("Some players online: Bob").unwrap();
        assert_eq!(list.count, 0);
        assert_eq!(list.max, 0);
        assert_eq!(list.players, vec!["Bob"]);
    }

    #[test]
    fn test_parse_overflowing_count() {
        let list = parse_player_list("There are 99999999999 of a max of 20 players online:").unwrap();
        assert_eq!(list.count, 0);
        assert_eq!(list.max, 20);
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        assert!(parse_player_list("[Server thread/INFO]: Saving the game").is_none());
    }

    #[test]
    fn test_ready_line() {
        assert!(is_ready_line("[12:00:05] [Server thread/INFO]: Done (5.123s)! For help, type \"help\""));
        assert!(!is_ready_line("[12:00:05] [Server thread/INFO]: Done preparing level"));
        assert!(!is_ready_line("For help, type \"help\""));
    }

    #[test]
    fn test_rules() {
        assert_eq!(LineRule::Ready.matches("Done (1s)! For help, type \"help\""), Some(LineMatch::Ready));
        assert_eq!(
            LineRule::Contains("Saved".into()).matches("Saved the game"),
            Some(LineMatch::Line("Saved the game".into()))
        );
        assert!(LineRule::Contains("Saved".into()).matches("Saving...").is_none());

        let re = Regex::new(r"^\[\d+:\d+:\d+\] .*joined the game$").unwrap();
        let rule = LineRule::Pattern(re);
        assert!(rule.matches("[10:00:00] Alice joined the game").is_some());
        assert!(rule.matches("Alice left the game").is_none());

        match LineRule::PlayerList.matches("There are 2/8 players online: A, B") {
            Some(LineMatch::PlayerList(list)) => assert_eq!(list.players.len(), 2),
            other => panic!("unexpected match: {:?}", other),
        }
    }

    #[test]
    fn test_player_list_display() {
        let list = PlayerList { count: 2, max: 20, players: vec!["Alice".into(), "Bob".into()] };
        assert_eq!(list.to_string(), "Players online: 2/20\nAlice, Bob");
        assert_eq!(PlayerList::default().to_string(), "Players online: 0/0");
    }

    #[test]
    fn test_player_list_serialization() {
        let list = PlayerList { count: 1, max: 5, players: vec!["Alex".into()] };
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["players"][0], "Alex");
    }
}
