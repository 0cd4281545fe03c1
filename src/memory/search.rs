//! Keyword search over interactions and knowledge topics.

use super::state::{Interaction, KnowledgeItem, MemoryState};
use serde::Serialize;
use std::cmp::Ordering;

/// Relevance of a hit in an interaction's input or output text
pub const INTERACTION_RELEVANCE: f64 = 1.0;

/// Relevance of a hit in a knowledge topic name
pub const TOPIC_RELEVANCE: f64 = 0.8;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchMatch {
    Interaction {
        interaction: Interaction,
        relevance: f64,
    },
    Knowledge {
        topic: String,
        entries: Vec<KnowledgeItem>,
        relevance: f64,
    },
}

impl SearchMatch {
    pub fn relevance(&self) -> f64 {
        match self {
            Self::Interaction { relevance, .. } => *relevance,
            Self::Knowledge { relevance, .. } => *relevance,
        }
    }

    pub fn is_interaction(&self) -> bool {
        matches!(self, Self::Interaction { .. })
    }
}

/// Case-insensitive substring search.
///
/// Results are ordered by descending relevance; equal relevance keeps
/// insertion order (interactions oldest first, topics in first-filed order).
pub fn search(state: &MemoryState, query: &str) -> Vec<SearchMatch> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<SearchMatch> = state
        .interactions
        .iter()
        .filter(|i| {
            i.input_text.to_lowercase().contains(&needle)
                || i.output_text.to_lowercase().contains(&needle)
        })
        .map(|i| SearchMatch::Interaction {
            interaction: i.clone(),
            relevance: INTERACTION_RELEVANCE,
        })
        .collect();

    results.extend(
        state
            .knowledge
            .iter()
            .filter(|(topic, _)| topic.to_lowercase().contains(&needle))
            .map(|(topic, entries)| SearchMatch::Knowledge {
                topic: topic.clone(),
                entries: entries.clone(),
                relevance: TOPIC_RELEVANCE,
            }),
    );

    // Stable: ties keep the order built above
    results.sort_by(|a, b| {
        b.relevance()
            .partial_cmp(&a.relevance())
            .unwrap_or(Ordering::Equal)
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::state::InteractionContext;

    fn sample_state() -> MemoryState {
        let mut state = MemoryState::new("u1");
        state.push_knowledge("Weather patterns", "rain in spring".to_string());
        state.push_knowledge("music", "likes jazz".to_string());
        state.push_interaction(
            "hello".to_string(),
            "hi".to_string(),
            InteractionContext::new(),
            1000,
        );
        state.push_interaction(
            "What is the WEATHER today".to_string(),
            "sunny".to_string(),
            InteractionContext::new(),
            1000,
        );
        state.push_interaction(
            "bye".to_string(),
            "nice weather, goodbye".to_string(),
            InteractionContext::new(),
            1000,
        );
        state
    }

    #[test]
    fn test_interactions_rank_above_topics() {
        let results = search(&sample_state(), "weather");
        assert_eq!(results.len(), 3);
        assert!(results[0].is_interaction());
        assert!(results[1].is_interaction());
        assert!(!results[2].is_interaction());
        assert!(results
            .windows(2)
            .all(|w| w[0].relevance() >= w[1].relevance()));
        assert_eq!(results[2].relevance(), TOPIC_RELEVANCE);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let results = search(&sample_state(), "weather");
        match (&results[0], &results[1]) {
            (
                SearchMatch::Interaction { interaction: a, .. },
                SearchMatch::Interaction { interaction: b, .. },
            ) => {
                assert_eq!(a.input_text, "What is the WEATHER today");
                assert_eq!(b.input_text, "bye");
            }
            other => panic!("Expected two interaction matches, got {other:?}"),
        }
    }

    #[test]
    fn test_tied_topics_keep_filing_order() {
        let mut state = MemoryState::new("u1");
        state.push_knowledge("zebra care", "brush weekly".to_string());
        state.push_knowledge("care basics", "water daily".to_string());

        let topics: Vec<_> = search(&state, "care")
            .into_iter()
            .map(|m| match m {
                SearchMatch::Knowledge { topic, .. } => topic,
                other => panic!("Expected knowledge match, got {other:?}"),
            })
            .collect();
        assert_eq!(topics, vec!["zebra care", "care basics"]);
    }

    #[test]
    fn test_matches_output_text_and_topics_only() {
        let state = sample_state();
        let results = search(&state, "SUNNY");
        assert_eq!(results.len(), 1);

        // Knowledge information is not searched, only topic names
        assert!(search(&state, "jazz").is_empty());
        let results = search(&state, "Music");
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_interaction());
    }

    #[test]
    fn test_empty_query() {
        assert!(search(&sample_state(), "").is_empty());
        assert!(search(&sample_state(), "   ").is_empty());
    }
}
