//! The persisted per-user record and its parts.

use crate::{MemoryError, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Upper bound for each relationship metric
pub const METRIC_MAX: f64 = 100.0;

/// Topic -> entries, both in insertion order
pub type KnowledgeMap = IndexMap<String, Vec<KnowledgeItem>>;

/// Free-form context attached to an interaction
pub type InteractionContext = BTreeMap<String, serde_json::Value>;

/// One recorded input/output exchange. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub input_text: String,
    pub output_text: String,
    pub session_id: Uuid,
    #[serde(default)]
    pub context: InteractionContext,
}

/// A piece of information filed under a knowledge topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub information: String,
    pub timestamp: DateTime<Utc>,
    /// Informational only, always within [0, 1]
    pub confidence: f64,
}

/// Bounded rapport counters, each kept within [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipMetrics {
    pub trust: f64,
    pub rapport: f64,
    pub understanding: f64,
}

impl RelationshipMetrics {
    /// Add the deltas and clamp every field back into range.
    pub fn apply(&mut self, trust: f64, rapport: f64, understanding: f64) {
        self.trust = (self.trust + trust).clamp(0.0, METRIC_MAX);
        self.rapport = (self.rapport + rapport).clamp(0.0, METRIC_MAX);
        self.understanding = (self.understanding + understanding).clamp(0.0, METRIC_MAX);
    }

    pub fn in_range(&self) -> bool {
        [self.trust, self.rapport, self.understanding]
            .iter()
            .all(|v| (0.0..=METRIC_MAX).contains(v))
    }
}

/// The `user` object of the stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

/// Full persisted record for one user identifier.
///
/// Read entirely on load and written entirely on save. The session id and
/// dirty flag are process-local and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    pub user: UserProfile,

    /// Insertion-ordered, oldest first
    pub interactions: VecDeque<Interaction>,

    /// Topics in first-filed order
    pub knowledge: KnowledgeMap,

    pub relationship: RelationshipMetrics,

    pub last_session: Option<DateTime<Utc>>,

    pub total_sessions: u64,

    pub created_at: DateTime<Utc>,

    /// Session stamped on interactions recorded through this instance
    #[serde(skip, default = "Uuid::new_v4")]
    session_id: Uuid,

    /// Whether in-memory content diverges from durable content
    #[serde(skip)]
    dirty: bool,
}

impl PartialEq for MemoryState {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user
            && self.interactions == other.interactions
            && self.knowledge == other.knowledge
            && self.relationship == other.relationship
            && self.last_session == other.last_session
            && self.total_sessions == other.total_sessions
            && self.created_at == other.created_at
    }
}

impl MemoryState {
    /// Fresh state: zero counters, empty log and knowledge.
    pub fn new(user_id: &str) -> Self {
        Self {
            user: UserProfile {
                id: user_id.to_string(),
                name: None,
                preferences: BTreeMap::new(),
            },
            interactions: VecDeque::new(),
            knowledge: KnowledgeMap::new(),
            relationship: RelationshipMetrics::default(),
            last_session: None,
            total_sessions: 0,
            created_at: Utc::now(),
            session_id: Uuid::new_v4(),
            dirty: false,
        }
    }

    /// Parse and validate a serialized record.
    pub fn from_json(payload: &str) -> Result<Self> {
        let state: Self = serde_json::from_str(payload)
            .map_err(|e| MemoryError::MalformedState(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| MemoryError::MalformedState(e.to_string()))
    }

    /// Check the invariants a deserializer cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.user.id.trim().is_empty() {
            return Err(MemoryError::MalformedState("user.id is empty".to_string()));
        }
        if !self.relationship.in_range() {
            return Err(MemoryError::MalformedState(format!(
                "relationship metrics out of range: {:?}",
                self.relationship
            )));
        }
        for (topic, items) in &self.knowledge {
            if let Some(item) = items.iter().find(|i| !(0.0..=1.0).contains(&i.confidence)) {
                return Err(MemoryError::MalformedState(format!(
                    "confidence {} under topic '{}' is outside [0, 1]",
                    item.confidence, topic
                )));
            }
        }
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// True when changes have not reached the backing storage yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Append an interaction stamped with this state's session, then evict
    /// from the front until at most `cap` remain. Returns the recorded entry.
    pub(crate) fn push_interaction(
        &mut self,
        input_text: String,
        output_text: String,
        context: InteractionContext,
        cap: usize,
    ) -> Interaction {
        let interaction = Interaction {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            input_text,
            output_text,
            session_id: self.session_id,
            context,
        };
        self.interactions.push_back(interaction.clone());
        self.truncate_interactions(cap);
        interaction
    }

    /// FIFO eviction down to `max` entries. Returns how many were dropped.
    pub(crate) fn truncate_interactions(&mut self, max: usize) -> usize {
        let excess = self.interactions.len().saturating_sub(max);
        self.interactions.drain(..excess);
        excess
    }

    pub(crate) fn push_knowledge(&mut self, topic: &str, information: String) {
        self.knowledge
            .entry(topic.to_string())
            .or_default()
            .push(KnowledgeItem {
                information,
                timestamp: Utc::now(),
                confidence: 1.0,
            });
    }

    /// Read-only view: last `limit` interactions in original order plus
    /// the knowledge map, metrics and session count.
    pub fn context(&self, limit: usize) -> MemoryContext {
        let start = self.interactions.len().saturating_sub(limit);
        MemoryContext {
            recent: self.interactions.iter().skip(start).cloned().collect(),
            knowledge: self.knowledge.clone(),
            relationship: self.relationship,
            total_sessions: self.total_sessions,
        }
    }
}

/// Snapshot handed to a conversation front-end
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryContext {
    pub recent: Vec<Interaction>,
    pub knowledge: KnowledgeMap,
    pub relationship: RelationshipMetrics,
    pub total_sessions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(n: usize) -> MemoryState {
        let mut state = MemoryState::new("u1");
        for i in 0..n {
            state.push_interaction(
                format!("in {i}"),
                format!("out {i}"),
                InteractionContext::new(),
                1000,
            );
        }
        state
    }

    #[test]
    fn test_fresh_state() {
        let state = MemoryState::new("u1");
        assert_eq!(state.user_id(), "u1");
        assert_eq!(state.total_sessions, 0);
        assert!(state.last_session.is_none());
        assert!(state.interactions.is_empty());
        assert!(state.knowledge.is_empty());
        assert_eq!(state.relationship, RelationshipMetrics::default());
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_metrics_clamp_both_ends() {
        let mut metrics = RelationshipMetrics::default();
        metrics.apply(150.0, -20.0, 42.5);
        assert_eq!(metrics.trust, 100.0);
        assert_eq!(metrics.rapport, 0.0);
        assert_eq!(metrics.understanding, 42.5);

        metrics.apply(-500.0, 1e9, -42.5);
        assert_eq!(metrics.trust, 0.0);
        assert_eq!(metrics.rapport, 100.0);
        assert_eq!(metrics.understanding, 0.0);
        assert!(metrics.in_range());
    }

    #[test]
    fn test_fifo_eviction() {
        let mut state = MemoryState::new("u1");
        for i in 0..7 {
            state.push_interaction(
                format!("in {i}"),
                String::new(),
                InteractionContext::new(),
                5,
            );
            assert!(state.interactions.len() <= 5);
        }
        let inputs: Vec<_> = state
            .interactions
            .iter()
            .map(|i| i.input_text.as_str())
            .collect();
        assert_eq!(inputs, vec!["in 2", "in 3", "in 4", "in 5", "in 6"]);
    }

    #[test]
    fn test_interactions_carry_session_id() {
        let state = state_with(2);
        assert!(state.interactions.iter().all(|i| i.session_id == state.session_id()));
        assert_ne!(state.interactions[0].id, state.interactions[1].id);
    }

    #[test]
    fn test_context_limits() {
        let state = state_with(4);

        let ctx = state.context(2);
        assert_eq!(ctx.recent.len(), 2);
        assert_eq!(ctx.recent[0].input_text, "in 2");
        assert_eq!(ctx.recent[1].input_text, "in 3");

        assert!(state.context(0).recent.is_empty());
        assert_eq!(state.context(100).recent.len(), 4);
    }

    #[test]
    fn test_serialized_field_names() {
        let mut state = state_with(1);
        state.push_knowledge("rust", "ownership".to_string());
        let json: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();

        for key in [
            "user",
            "interactions",
            "knowledge",
            "relationship",
            "lastSession",
            "totalSessions",
            "createdAt",
        ] {
            assert!(json.get(key).is_some(), "missing top-level field {key}");
        }
        assert!(json.get("sessionId").is_none());
        assert!(json.get("dirty").is_none());
        assert_eq!(json["interactions"][0]["inputText"], "in 0");
        assert_eq!(json["knowledge"]["rust"][0]["confidence"], 1.0);
    }

    #[test]
    fn test_topics_keep_filing_order() {
        let mut state = MemoryState::new("u1");
        state.push_knowledge("zebra care", "x".to_string());
        state.push_knowledge("apples", "y".to_string());
        state.push_knowledge("zebra care", "z".to_string());

        let payload = state.to_json().unwrap();
        let restored = MemoryState::from_json(&payload).unwrap();
        let topics: Vec<_> = restored.knowledge.keys().map(String::as_str).collect();
        assert_eq!(topics, vec!["zebra care", "apples"]);
        assert_eq!(restored.knowledge["zebra care"].len(), 2);
        assert!(payload.find("zebra care").unwrap() < payload.find("apples").unwrap());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut state = MemoryState::new("u1");
        state.relationship.trust = 101.0;
        assert!(matches!(state.validate(), Err(MemoryError::MalformedState(_))));

        let mut state = MemoryState::new("u1");
        state.push_knowledge("t", "x".to_string());
        state.knowledge.get_mut("t").unwrap()[0].confidence = 1.5;
        assert!(matches!(state.validate(), Err(MemoryError::MalformedState(_))));

        let state = MemoryState::new("  ");
        assert!(matches!(state.validate(), Err(MemoryError::MalformedState(_))));
    }
}
