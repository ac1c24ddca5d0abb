//! Ground-truth retrieval for the groundedness and hallucination checks.
//!
//! The in-memory backend does keyword matching over a small fact table loaded
//! from the `knowledge` config section. Other retrieval backends (vector
//! stores, search services) plug in through [`GroundTruthStore`].

use std::collections::{BTreeMap, HashSet};

use crate::check::words;
use crate::config::KnowledgeConfig;

/// Trait for ground truth retrieval backends.
pub trait GroundTruthStore: Send + Sync {
    /// Retrieve relevant context for the given query.
    /// Returns `None` if no relevant facts are found.
    fn retrieve_context(&self, query: &str) -> Option<String>;
}

/// In-memory keyword-based ground truth store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledge {
    facts: BTreeMap<String, String>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_facts(facts: BTreeMap<String, String>) -> Self {
        Self { facts }
    }

    pub fn from_config(config: &KnowledgeConfig) -> Self {
        Self::with_facts(config.facts.clone())
    }

    pub fn add_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.facts.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl GroundTruthStore for InMemoryKnowledge {
    /// A fact matches when any word of its key is a word of the query. Matches
    /// are rendered as `"key is value"` and joined with `"; "`.
    fn retrieve_context(&self, query: &str) -> Option<String> {
        let query_words: HashSet<String> = words(query).into_iter().collect();
        let context: Vec<String> = self
            .facts
            .iter()
            .filter(|(key, _)| words(key).iter().any(|w| query_words.contains(w)))
            .map(|(key, value)| format!("{key} is {value}"))
            .collect();

        if context.is_empty() {
            None
        } else {
            Some(context.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryKnowledge {
        let mut store = InMemoryKnowledge::new();
        store.add_fact("sky color", "blue");
        store.add_fact("graph nodes", "4");
        store
    }

    #[test]
    fn keyword_match_returns_fact() {
        let ctx = store().retrieve_context("What color is the sky?").unwrap();
        assert_eq!(ctx, "sky color is blue");
    }

    #[test]
    fn multiple_matches_are_joined() {
        let ctx = store()
            .retrieve_context("how many nodes, and what color?")
            .unwrap();
        assert_eq!(ctx, "graph nodes is 4; sky color is blue");
    }

    #[test]
    fn key_words_match_case_insensitively() {
        let mut store = InMemoryKnowledge::new();
        store.add_fact("Capital", "Paris");
        assert!(store.retrieve_context("the capital of France").is_some());
    }

    #[test]
    fn key_words_match_whole_words_only() {
        let mut store = InMemoryKnowledge::new();
        store.add_fact("art", "painting");
        assert!(store.retrieve_context("start the engine").is_none());
        assert_eq!(store.retrieve_context("modern art").unwrap(), "art is painting");
    }

    #[test]
    fn no_match_is_none() {
        assert!(store().retrieve_context("xyzzy plugh").is_none());
        assert!(InMemoryKnowledge::new().retrieve_context("sky").is_none());
    }

    #[test]
    fn add_fact_overwrites() {
        let mut store = store();
        store.add_fact("sky color", "green");
        let ctx = store.retrieve_context("sky color").unwrap();
        assert!(ctx.contains("green"));
        assert!(!ctx.contains("blue"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn from_config_loads_facts() {
        let mut config = KnowledgeConfig::default();
        config.facts.insert("route cost".into(), "3".into());
        let store = InMemoryKnowledge::from_config(&config);
        assert_eq!(store.retrieve_context("what is the cost").unwrap(), "route cost is 3");
    }
}
