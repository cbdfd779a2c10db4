use std::collections::HashMap;

use super::LineMatch;

/// Observer invoked for every console line. Must be fast: it runs inside the
/// reader's dispatch with the manager lock held.
pub type ConsoleHandler = Box<dyn Fn(&str) -> Option<LineMatch> + Send>;

/// Keyed console observers plus the last result each one produced.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, ConsoleHandler>,
    results: HashMap<String, LineMatch>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. An existing observer with the same key is replaced.
    pub fn register(&mut self, key: impl Into<String>, handler: ConsoleHandler) {
        self.handlers.insert(key.into(), handler);
    }

    /// Remove an observer and its cached result.
    pub fn unregister(&mut self, key: &str) -> bool {
        self.results.remove(key);
        self.handlers.remove(key).is_some()
    }

    pub fn last_result(&self, key: &str) -> Option<&LineMatch> {
        self.results.get(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Feed one line to every observer; returns how many matched.
    pub fn dispatch(&mut self, line: &str) -> usize {
        let mut matched = 0;
        for (key, handler) in &self.handlers {
            if let Some(result) = handler(line) {
                self.results.insert(key.clone(), result);
                matched += 1;
            }
        }
        matched
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("results", &self.results)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::LineRule;

    fn rule_handler(rule: LineRule) -> ConsoleHandler {
        Box::new(move |line| rule.matches(line))
    }

    #[test]
    fn test_register_and_dispatch() {
        let mut registry = HandlerRegistry::new();
        registry.register("saves", rule_handler(LineRule::Contains("Saved".into())));
        registry.register("ready", rule_handler(LineRule::Ready));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.dispatch("Saved the game"), 1);
        assert_eq!(
            registry.last_result("saves"),
            Some(&LineMatch::Line("Saved the game".into()))
        );
        assert!(registry.last_result("ready").is_none());

        // 매칭 안 되는 줄은 이전 결과를 유지
        assert_eq!(registry.dispatch("Saving chunks"), 0);
        assert!(registry.last_result("saves").is_some());
    }

    #[test]
    fn test_unregister_clears_result() {
        let mut registry = HandlerRegistry::new();
        registry.register("saves", rule_handler(LineRule::Contains("Saved".into())));
        registry.dispatch("Saved the game");

        assert!(registry.unregister("saves"));
        assert!(registry.last_result("saves").is_none());
        assert!(registry.is_empty());
        assert!(!registry.unregister("saves"));
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register("k", rule_handler(LineRule::Contains("first".into())));
        registry.register("k", rule_handler(LineRule::Contains("second".into())));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch("first"), 0);
        assert_eq!(registry.dispatch("second"), 1);
    }
}
