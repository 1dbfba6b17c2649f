//! Common Types and Constants
//!
//! Shared data model used across all engine modules. Every type here is a plain
//! value: the engine receives snapshots and hands back new ones, it never keeps
//! a reference to caller-owned state between calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AbilityParams;
use crate::error::{EngineError, Result};
use crate::sanitize;

// ==================== Constants ====================

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Maximum number of entries in a learner extension map
pub const MAX_EXTENSION_ENTRIES: usize = 32;

/// Maximum extension key length (bytes)
pub const MAX_EXTENSION_KEY_LEN: usize = 64;

/// Maximum extension text value length (bytes)
pub const MAX_EXTENSION_TEXT_LEN: usize = 256;

/// Topic (learning objective) identifier
pub type TopicId = String;

/// Content item identifier
pub type ItemId = String;

// ==================== Learner Types ====================

/// One graded response, as kept in the learner history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub item_id: ItemId,
    pub topics: Vec<TopicId>,
    /// Item difficulty (Rasch b) at the time of the response
    pub difficulty: f64,
    pub correct: bool,
    pub answered_at_ms: i64,
    /// Ability estimate after this response was applied
    pub theta_after: f64,
    /// Standard error after this response was applied
    pub se_after: f64,
}

impl ResponseRecord {
    pub fn tests_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

/// Per-item exposure bookkeeping for one learner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub count: u32,
    pub last_seen_ms: Option<i64>,
}

/// Typed value stored in a learner extension map
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ExtensionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ExtensionValue {
    fn check(&self) -> std::result::Result<(), String> {
        match self {
            ExtensionValue::Float(v) if !v.is_finite() => {
                Err("float extension values must be finite".to_string())
            }
            ExtensionValue::Text(s) if s.len() > MAX_EXTENSION_TEXT_LEN => Err(format!(
                "text extension values are limited to {} bytes",
                MAX_EXTENSION_TEXT_LEN
            )),
            _ => Ok(()),
        }
    }
}

/// Bounded, typed key/value map for caller-defined learner attributes.
///
/// Limits: at most [`MAX_EXTENSION_ENTRIES`] entries, keys 1..=[`MAX_EXTENSION_KEY_LEN`]
/// bytes, text values at most [`MAX_EXTENSION_TEXT_LEN`] bytes, floats finite.
/// Deserialization applies the same checks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, ExtensionValue>")]
pub struct ExtensionMap(BTreeMap<String, ExtensionValue>);

impl ExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ExtensionValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtensionValue)> {
        self.0.iter()
    }

    /// Return a copy with `key` set to `value`
    pub fn with(&self, key: impl Into<String>, value: ExtensionValue) -> Result<Self> {
        let key = key.into();
        if key.is_empty() || key.len() > MAX_EXTENSION_KEY_LEN {
            return Err(EngineError::InvalidExtension(format!(
                "extension key must be 1..={} bytes, got {}",
                MAX_EXTENSION_KEY_LEN,
                key.len()
            )));
        }
        value.check().map_err(EngineError::InvalidExtension)?;
        if !self.0.contains_key(&key) && self.0.len() >= MAX_EXTENSION_ENTRIES {
            return Err(EngineError::InvalidExtension(format!(
                "extension map is full ({} entries)",
                MAX_EXTENSION_ENTRIES
            )));
        }

        let mut entries = self.0.clone();
        entries.insert(key, value);
        Ok(Self(entries))
    }

    /// Return a copy without `key`
    pub fn without(&self, key: &str) -> Self {
        let mut entries = self.0.clone();
        entries.remove(key);
        Self(entries)
    }
}

impl TryFrom<BTreeMap<String, ExtensionValue>> for ExtensionMap {
    type Error = EngineError;

    fn try_from(entries: BTreeMap<String, ExtensionValue>) -> Result<Self> {
        entries
            .into_iter()
            .try_fold(ExtensionMap::new(), |map, (key, value)| map.with(key, value))
    }
}

/// Learner snapshot: ability estimate, uncertainty, per-topic mastery,
/// exposure counters and response history.
///
/// Owned by the caller. Engine operations return a new snapshot and leave the
/// input untouched. Two concurrent read-modify-write cycles on the same learner
/// without external serialization lose one of the updates; the persistence
/// layer is responsible for ordering writes per learner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearnerState {
    pub learner_id: String,
    /// Ability estimate, clamped to the configured practical range
    pub theta: f64,
    /// Standard error of `theta` (1 / sqrt(information))
    pub se: f64,
    /// Accumulated Fisher information, prior included
    pub information: f64,
    #[serde(default)]
    pub mastery: BTreeMap<TopicId, f64>,
    #[serde(default)]
    pub exposures: BTreeMap<ItemId, ExposureRecord>,
    /// Most recent responses, oldest first
    #[serde(default)]
    pub history: Vec<ResponseRecord>,
    #[serde(default)]
    pub extensions: ExtensionMap,
}

impl LearnerState {
    /// Fresh state for a learner seen for the first time
    pub fn new(learner_id: impl Into<String>, params: &AbilityParams) -> Self {
        let information = params.prior_information.max(EPSILON);
        Self {
            learner_id: learner_id.into(),
            theta: 0.0,
            se: 1.0 / information.sqrt(),
            information,
            mastery: BTreeMap::new(),
            exposures: BTreeMap::new(),
            history: Vec::new(),
            extensions: ExtensionMap::new(),
        }
    }

    pub fn mastery(&self, topic: &str) -> Option<f64> {
        self.mastery.get(topic).copied()
    }

    pub fn exposure(&self, item_id: &str) -> ExposureRecord {
        self.exposures.get(item_id).copied().unwrap_or_default()
    }

    pub fn responses_for_topic<'a>(
        &'a self,
        topic: &'a str,
    ) -> impl DoubleEndedIterator<Item = &'a ResponseRecord> + 'a {
        self.history.iter().filter(move |r| r.tests_topic(topic))
    }

    pub fn topic_item_count(&self, topic: &str) -> usize {
        self.responses_for_topic(topic).count()
    }

    /// Share of the last `window` responses that touched each topic.
    ///
    /// A response tagged with several topics counts once for each of them, so
    /// shares can sum above 1.
    pub fn recent_topic_share(&self, window: usize) -> BTreeMap<TopicId, f64> {
        let start = self.history.len().saturating_sub(window);
        let recent = &self.history[start..];
        let mut shares = BTreeMap::new();
        if recent.is_empty() {
            return shares;
        }

        for record in recent {
            for topic in &record.topics {
                *shares.entry(topic.clone()).or_insert(0.0) += 1.0;
            }
        }
        let n = recent.len() as f64;
        for share in shares.values_mut() {
            *share /= n;
        }
        shares
    }

    pub fn accuracy(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let correct = self.history.iter().filter(|r| r.correct).count();
        Some(correct as f64 / self.history.len() as f64)
    }

    /// Rebuild accumulated information from the retained history, evaluated at
    /// the current `theta`. Used to repair snapshots whose stored information is
    /// missing or corrupt.
    pub fn recompute_information(&self, params: &AbilityParams) -> f64 {
        let observed: f64 = self
            .history
            .iter()
            .map(|r| crate::ability::item_information(self.theta, r.difficulty))
            .sum();
        sanitize::finite_or(params.prior_information + observed, params.prior_information)
            .max(EPSILON)
    }

    /// Copy of this state with one extension entry set
    pub fn with_extension(&self, key: impl Into<String>, value: ExtensionValue) -> Result<Self> {
        let extensions = self.extensions.with(key, value)?;
        Ok(Self {
            extensions,
            ..self.clone()
        })
    }
}

// ==================== Content Types ====================

fn default_median_time() -> f64 {
    60.0
}

fn default_published() -> bool {
    true
}

/// Item offered by the content bank for one decision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: ItemId,
    pub topics: Vec<TopicId>,
    /// Rasch difficulty b, on the same scale as theta
    pub difficulty: f64,
    /// Typical completion time (seconds)
    #[serde(default = "default_median_time")]
    pub median_time_secs: f64,
    /// Times this learner has already seen the item, as counted by the content bank
    #[serde(default)]
    pub exposure_count: u32,
    /// Presentations left before the item leaves cooldown (0 = available)
    #[serde(default)]
    pub cooldown_remaining: u32,
    #[serde(default = "default_published")]
    pub published: bool,
}

impl CandidateItem {
    pub fn new(id: impl Into<ItemId>, topics: &[&str], difficulty: f64) -> Self {
        Self {
            id: id.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            difficulty,
            median_time_secs: default_median_time(),
            exposure_count: 0,
            cooldown_remaining: 0,
            published: true,
        }
    }

    pub fn tests_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

/// Wire shape of a blueprint before validation
#[derive(Clone, Debug, Deserialize)]
struct BlueprintDocument {
    id: String,
    schema_version: u32,
    weights: BTreeMap<TopicId, f64>,
}

impl TryFrom<BlueprintDocument> for Blueprint {
    type Error = EngineError;

    fn try_from(doc: BlueprintDocument) -> Result<Self> {
        Blueprint::new(doc.id, doc.schema_version, doc.weights)
    }
}

/// Target weight distribution across topics.
///
/// Weights are relative: they are re-normalized by their sum. A `Blueprint`
/// value is always valid; both [`Blueprint::new`] and deserialization reject
/// empty, negative, non-finite or all-zero weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BlueprintDocument")]
pub struct Blueprint {
    id: String,
    schema_version: u32,
    weights: BTreeMap<TopicId, f64>,
}

impl Blueprint {
    pub fn new(
        id: impl Into<String>,
        schema_version: u32,
        weights: BTreeMap<TopicId, f64>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EngineError::InvalidBlueprint("blueprint id is empty".to_string()));
        }
        if schema_version == 0 {
            return Err(EngineError::InvalidBlueprint(format!(
                "blueprint {id}: schema version is not set"
            )));
        }
        if weights.is_empty() {
            return Err(EngineError::InvalidBlueprint(format!(
                "blueprint {id}: no topic weights"
            )));
        }
        if let Some((topic, weight)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(EngineError::InvalidBlueprint(format!(
                "blueprint {id}: topic {topic} has invalid weight {weight}"
            )));
        }
        if !weights.values().any(|w| *w > 0.0) {
            return Err(EngineError::InvalidBlueprint(format!(
                "blueprint {id}: no positive weight"
            )));
        }

        Ok(Self {
            id,
            schema_version,
            weights,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn weights(&self) -> &BTreeMap<TopicId, f64> {
        &self.weights
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Weight of `topic` as a share of the total, 0 for unknown topics
    pub fn normalized_weight(&self, topic: &str) -> f64 {
        let total = self.total_weight();
        match self.weights.get(topic) {
            Some(w) if total > EPSILON => w / total,
            _ => 0.0,
        }
    }

    /// Topics with their normalized weight, heaviest first, ties by topic id
    pub fn topics_by_weight(&self) -> Vec<(&str, f64)> {
        let mut topics: Vec<(&str, f64)> = self
            .weights
            .keys()
            .map(|t| (t.as_str(), self.normalized_weight(t)))
            .collect();
        topics.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        topics
    }
}

// ==================== Scoring Types ====================

/// Practice session the decision is made in
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub started_at_ms: i64,
    /// Decision time, supplied by the caller
    pub now_ms: i64,
    #[serde(default)]
    pub items_answered: u32,
}

impl SessionContext {
    pub fn elapsed_minutes(&self) -> f64 {
        ((self.now_ms - self.started_at_ms).max(0) as f64) / 60_000.0
    }
}

/// Utility of one candidate and the factors it was built from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub item_id: ItemId,
    pub topics: Vec<TopicId>,
    pub difficulty: f64,
    /// Fisher information at the learner's theta
    pub information: f64,
    /// [blueprint_min, blueprint_max]
    pub blueprint_multiplier: f64,
    /// [0, 1]
    pub exposure_multiplier: f64,
    /// [fatigue_floor, 1]
    pub fatigue_scalar: f64,
    pub median_time_secs: f64,
    pub utility: f64,
}

impl CandidateScore {
    pub fn is_eligible(&self) -> bool {
        self.utility > 0.0 && self.utility.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<TopicId, f64> {
        pairs.iter().map(|(t, w)| (t.to_string(), *w)).collect()
    }

    #[test]
    fn test_new_learner_state() {
        let params = AbilityParams::default();
        let state = LearnerState::new("u1", &params);
        assert_eq!(state.theta, 0.0);
        assert!((state.se - 1.0).abs() < 1e-12);
        assert!(state.history.is_empty());
        assert_eq!(state.accuracy(), None);
    }

    #[test]
    fn test_blueprint_rejects_invalid_weights() {
        assert!(Blueprint::new("bp", 1, weights(&[])).is_err());
        assert!(Blueprint::new("bp", 1, weights(&[("a", -0.1), ("b", 1.0)])).is_err());
        assert!(Blueprint::new("bp", 1, weights(&[("a", 0.0), ("b", 0.0)])).is_err());
        assert!(Blueprint::new("bp", 1, weights(&[("a", f64::NAN)])).is_err());
        assert!(Blueprint::new("bp", 0, weights(&[("a", 1.0)])).is_err());
        assert!(Blueprint::new("  ", 1, weights(&[("a", 1.0)])).is_err());
        assert!(Blueprint::new("bp", 1, weights(&[("a", 0.0), ("b", 2.0)])).is_ok());
    }

    #[test]
    fn test_blueprint_deserialize_validates() {
        let bad = r#"{"id":"bp","schema_version":1,"weights":{"a":-1.0}}"#;
        assert!(serde_json::from_str::<Blueprint>(bad).is_err());

        let good = r#"{"id":"bp","schema_version":2,"weights":{"a":3.0,"b":1.0}}"#;
        let bp: Blueprint = serde_json::from_str(good).unwrap();
        assert_eq!(bp.schema_version(), 2);
        assert!((bp.normalized_weight("a") - 0.75).abs() < 1e-12);
        assert_eq!(bp.normalized_weight("zzz"), 0.0);
    }

    #[test]
    fn test_topics_by_weight_ties_by_id() {
        let bp = Blueprint::new("bp", 1, weights(&[("b", 1.0), ("a", 1.0), ("c", 2.0)])).unwrap();
        let order: Vec<&str> = bp.topics_by_weight().into_iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_extension_map_bounds() {
        let map = ExtensionMap::new();
        assert!(map.with("", ExtensionValue::Bool(true)).is_err());
        assert!(map.with("k".repeat(65), ExtensionValue::Bool(true)).is_err());
        assert!(map.with("f", ExtensionValue::Float(f64::INFINITY)).is_err());
        assert!(map
            .with("t", ExtensionValue::Text("x".repeat(MAX_EXTENSION_TEXT_LEN + 1)))
            .is_err());

        let mut full = ExtensionMap::new();
        for i in 0..MAX_EXTENSION_ENTRIES {
            full = full.with(format!("k{i}"), ExtensionValue::Int(i as i64)).unwrap();
        }
        assert!(full.with("extra", ExtensionValue::Int(0)).is_err());
        // overwriting an existing key is still allowed when full
        assert!(full.with("k0", ExtensionValue::Int(7)).is_ok());
    }

    #[test]
    fn test_with_extension_leaves_original() {
        let state = LearnerState::new("u1", &AbilityParams::default());
        let updated = state
            .with_extension("cohort", ExtensionValue::Text("spring".into()))
            .unwrap();
        assert!(state.extensions.is_empty());
        assert_eq!(
            updated.extensions.get("cohort"),
            Some(&ExtensionValue::Text("spring".into()))
        );
    }

    #[test]
    fn test_recent_topic_share() {
        let mut state = LearnerState::new("u1", &AbilityParams::default());
        for (i, topics) in [vec!["a"], vec!["a", "b"], vec!["b"], vec!["c"]].iter().enumerate() {
            state.history.push(ResponseRecord {
                item_id: format!("i{i}"),
                topics: topics.iter().map(|t| t.to_string()).collect(),
                difficulty: 0.0,
                correct: true,
                answered_at_ms: i as i64,
                theta_after: 0.0,
                se_after: 1.0,
            });
        }
        let shares = state.recent_topic_share(2);
        assert_eq!(shares.get("a"), None);
        assert!((shares["b"] - 0.5).abs() < 1e-12);
        assert!((shares["c"] - 0.5).abs() < 1e-12);
        assert_eq!(state.topic_item_count("a"), 2);
    }
}
