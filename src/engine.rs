//! Engine facade used by the request layer.
//!
//! `AdaptiveEngine` owns only its validated configuration and the components
//! built from it. Every call takes the learner snapshot and inputs explicitly
//! and returns new values, so one engine can serve any number of learners from
//! any number of threads without locking. Ordering writes for a single learner
//! is the persistence layer's job.

use serde::{Deserialize, Serialize};

use crate::ability::{AbilityEstimator, EngineUpdateResult};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::explain::{AbilitySignals, Explainer};
use crate::form::{AssessmentForm, FormBuilder};
use crate::scoring::CandidateScorer;
use crate::selector::{SelectionSeed, Selector};
use crate::stop_rule::{StopDecision, StopRule};
use crate::types::{
    Blueprint, CandidateItem, CandidateScore, ItemId, LearnerState, SessionContext,
};

/// Next item to present, with the factors and rationale behind it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub item_id: ItemId,
    pub score: CandidateScore,
    pub rank: usize,
    pub shortlist: Vec<ItemId>,
    pub eligible: usize,
    pub seed: SelectionSeed,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct AdaptiveEngine {
    config: EngineConfig,
    estimator: AbilityEstimator,
    scorer: CandidateScorer,
    selector: Selector,
    stop_rule: StopRule,
    form_builder: FormBuilder,
}

impl AdaptiveEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            estimator: AbilityEstimator::new(config.ability.clone()),
            scorer: CandidateScorer::new(config.scoring.clone()),
            selector: Selector::new(config.selector.clone()),
            stop_rule: StopRule::new(config.stop.clone()),
            form_builder: FormBuilder::new(config.form.clone()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// State for a learner seen for the first time
    pub fn new_learner(&self, learner_id: impl Into<String>) -> LearnerState {
        LearnerState::new(learner_id, &self.config.ability)
    }

    pub fn record_response(
        &self,
        state: &LearnerState,
        item: &CandidateItem,
        correct: bool,
        answered_at_ms: i64,
    ) -> EngineUpdateResult {
        self.estimator.update(state, item, correct, answered_at_ms)
    }

    pub fn score(
        &self,
        candidates: &[CandidateItem],
        state: &LearnerState,
        blueprint: &Blueprint,
        session: &SessionContext,
    ) -> Vec<CandidateScore> {
        self.scorer.score(candidates, state, blueprint, session)
    }

    /// Ability figures for the rationale: mastery is the weakest of the item's topics
    pub fn signals(&self, state: &LearnerState, score: &CandidateScore) -> AbilitySignals {
        let mastery = score
            .topics
            .iter()
            .filter_map(|t| state.mastery(t))
            .fold(None, |min: Option<f64>, m| Some(min.map_or(m, |v| v.min(m))));
        AbilitySignals {
            theta: state.theta,
            se: state.se,
            mastery,
        }
    }

    /// Score, shortlist and draw the next item. `None` means no candidate is
    /// eligible (every item capped or cooling down); the caller should widen
    /// the pool or end the session.
    pub fn next_item(
        &self,
        state: &LearnerState,
        candidates: &[CandidateItem],
        blueprint: &Blueprint,
        session: &SessionContext,
        seed: SelectionSeed,
    ) -> Option<SelectionResult> {
        let scores = self.score(candidates, state, blueprint, session);
        let Some(selection) = self.selector.select(&scores, seed) else {
            tracing::debug!(
                learner_id = %state.learner_id,
                session_id = %session.session_id,
                candidates = candidates.len(),
                "no eligible candidate"
            );
            return None;
        };

        let rationale = Explainer::explain(&selection.score, &self.signals(state, &selection.score));
        tracing::debug!(
            learner_id = %state.learner_id,
            session_id = %session.session_id,
            item_id = %selection.score.item_id,
            rank = selection.rank,
            eligible = selection.eligible,
            seed = selection.seed.0,
            utility = selection.score.utility,
            "item selected"
        );

        Some(SelectionResult {
            item_id: selection.score.item_id.clone(),
            score: selection.score,
            rank: selection.rank,
            shortlist: selection.shortlist,
            eligible: selection.eligible,
            seed: selection.seed,
            rationale,
        })
    }

    pub fn stop_decision(&self, state: &LearnerState, topic: &str) -> StopDecision {
        self.stop_rule.evaluate(state, topic)
    }

    pub fn probe_candidate<'a>(
        &self,
        state: &LearnerState,
        topic: &str,
        candidates: &'a [CandidateItem],
    ) -> Option<&'a CandidateItem> {
        self.stop_rule.probe_candidate(state, topic, candidates)
    }

    /// Assemble a fixed-length form; a shortfall surfaces as
    /// [`EngineError::BlueprintDeficit`](crate::EngineError::BlueprintDeficit)
    pub fn build_form(
        &self,
        blueprint: &Blueprint,
        items: &[CandidateItem],
        length: usize,
        seed: SelectionSeed,
        published_only: bool,
    ) -> Result<AssessmentForm> {
        Ok(self
            .form_builder
            .build(blueprint, items, length, seed, published_only)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorParams;

    fn blueprint() -> Blueprint {
        let weights = [("a".to_string(), 1.0), ("b".to_string(), 1.0)]
            .into_iter()
            .collect();
        Blueprint::new("bp", 1, weights).unwrap()
    }

    fn session(now_ms: i64) -> SessionContext {
        SessionContext {
            session_id: "s1".into(),
            started_at_ms: 0,
            now_ms,
            items_answered: 0,
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            selector: SelectorParams { top_k: 0 },
            ..EngineConfig::default()
        };
        assert!(AdaptiveEngine::new(config).is_err());
    }

    #[test]
    fn test_selected_item_is_not_repeated_during_cooldown() {
        let engine = AdaptiveEngine::new(EngineConfig::default()).unwrap();
        let state = engine.new_learner("u1");
        let items = vec![CandidateItem::new("only", &["a"], 0.0)];

        let first = engine
            .next_item(&state, &items, &blueprint(), &session(0), SelectionSeed(1))
            .unwrap();
        assert_eq!(first.item_id, "only");
        assert!(first.rationale.starts_with("Info 0.25"));

        let state = engine.record_response(&state, &items[0], true, 0).state;
        assert!(engine
            .next_item(&state, &items, &blueprint(), &session(1_000), SelectionSeed(1))
            .is_none());
    }

    #[test]
    fn test_signals_use_weakest_topic() {
        let engine = AdaptiveEngine::new(EngineConfig::default()).unwrap();
        let mut state = engine.new_learner("u1");
        state.mastery.insert("a".into(), 0.9);
        state.mastery.insert("b".into(), 0.4);
        let scores = engine.score(
            &[CandidateItem::new("q", &["a", "b"], 0.0)],
            &state,
            &blueprint(),
            &session(0),
        );
        assert_eq!(engine.signals(&state, &scores[0]).mastery, Some(0.4));
    }
}
