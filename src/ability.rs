//! Ability Estimation (Rasch / 1PL)
//!
//! Response model: P(correct | theta, b) = 1 / (1 + exp(-(theta - b))).
//!
//! Each graded response moves theta by one scored step
//!
//!   theta' = theta + (u - p) / I'
//!
//! where u is the observed outcome, p the model probability at the current
//! estimate and I' the accumulated Fisher information including the new item.
//! This is the Fisher-scoring step for the new observation with the prior and
//! past items folded into I'. The step sign always follows u - p, so correct
//! responses never lower theta and incorrect ones never raise it. SE is
//! 1 / sqrt(I'), which never grows.
//!
//! Degenerate inputs (non-finite theta or difficulty, vanishing item
//! information) keep the prior estimate and flag the result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AbilityParams;
use crate::sanitize;
use crate::types::{CandidateItem, LearnerState, ResponseRecord, TopicId, EPSILON};

/// Probability of a correct response under the Rasch model
pub fn response_probability(theta: f64, difficulty: f64) -> f64 {
    sanitize::sigmoid(theta - difficulty)
}

/// Fisher information of one item at `theta`: p(1 - p), peaking at 0.25 when b == theta
pub fn item_information(theta: f64, difficulty: f64) -> f64 {
    let p = response_probability(theta, difficulty);
    sanitize::finite_or(p * (1.0 - p), 0.0).max(0.0)
}

/// Smooth mastery estimate: sigmoid(slope * (theta - threshold))
pub fn mastery_probability(theta: f64, threshold: f64, slope: f64) -> f64 {
    sanitize::clamp_unit(sanitize::sigmoid(slope * (theta - threshold)))
}

/// Result of a single estimator step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbilityStep {
    pub theta: f64,
    pub se: f64,
    pub information: f64,
}

/// Outcome of applying one graded response to a learner snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineUpdateResult {
    /// The new snapshot; the input snapshot is left untouched
    pub state: LearnerState,
    pub theta: f64,
    pub se: f64,
    /// Mastery of the topics the answered item tests
    pub mastery: BTreeMap<TopicId, f64>,
    /// True when the estimate was kept because the step was degenerate
    pub degenerate: bool,
}

#[derive(Debug, Clone)]
pub struct AbilityEstimator {
    params: AbilityParams,
}

impl AbilityEstimator {
    /// `params` are expected to pass [`AbilityParams::validate`](crate::config::AbilityParams::validate);
    /// [`AdaptiveEngine::new`](crate::AdaptiveEngine::new) checks the whole config.
    pub fn new(params: AbilityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AbilityParams {
        &self.params
    }

    fn clamp_theta(&self, theta: f64) -> f64 {
        theta.clamp(self.params.theta_min, self.params.theta_max)
    }

    /// One estimator step, or `None` when the inputs are degenerate
    pub fn step(
        &self,
        theta: f64,
        information: f64,
        difficulty: f64,
        correct: bool,
    ) -> Option<AbilityStep> {
        if !theta.is_finite() || !difficulty.is_finite() {
            return None;
        }
        if !information.is_finite() || information <= EPSILON {
            return None;
        }

        let theta = self.clamp_theta(theta);
        let p = response_probability(theta, difficulty);
        let item_info = p * (1.0 - p);
        if !item_info.is_finite() || item_info <= EPSILON {
            return None;
        }

        let new_information = information + item_info;
        let observed = if correct { 1.0 } else { 0.0 };
        let delta = sanitize::safe_div(observed - p, new_information, 0.0)
            .clamp(-self.params.max_step, self.params.max_step);
        let new_theta = self.clamp_theta(theta + delta);
        let new_se = 1.0 / new_information.sqrt();

        if sanitize::has_invalid_values(&[new_theta, new_se, new_information]) {
            return None;
        }

        Some(AbilityStep {
            theta: new_theta,
            se: new_se,
            information: new_information,
        })
    }

    pub fn mastery_for(&self, theta: f64, topic: &str) -> f64 {
        mastery_probability(
            theta,
            self.params.mastery_threshold(topic),
            self.params.mastery_slope,
        )
    }

    /// Apply one graded response and return the updated snapshot
    pub fn update(
        &self,
        state: &LearnerState,
        item: &CandidateItem,
        correct: bool,
        answered_at_ms: i64,
    ) -> EngineUpdateResult {
        let mut information = state.information;
        if !information.is_finite() || information <= EPSILON {
            information = state.recompute_information(&self.params);
            tracing::warn!(
                learner_id = %state.learner_id,
                information,
                "stored information invalid, rebuilt from history"
            );
        }
        let prior_theta = self.clamp_theta(sanitize::finite_or(state.theta, 0.0));

        let (step, degenerate) = match self.step(prior_theta, information, item.difficulty, correct)
        {
            Some(step) => (step, false),
            None => {
                tracing::warn!(
                    learner_id = %state.learner_id,
                    item_id = %item.id,
                    difficulty = item.difficulty,
                    "degenerate ability update, keeping prior estimate"
                );
                let step = AbilityStep {
                    theta: prior_theta,
                    se: 1.0 / information.sqrt(),
                    information,
                };
                (step, true)
            }
        };

        let mut next = state.clone();
        next.theta = step.theta;
        next.se = step.se;
        next.information = step.information;

        // theta is shared across topics, so every tracked topic moves with it
        let mut topics: Vec<TopicId> = next.mastery.keys().cloned().collect();
        topics.extend(item.topics.iter().cloned());
        for topic in topics {
            let m = self.mastery_for(step.theta, &topic);
            next.mastery.insert(topic, m);
        }
        let mastery: BTreeMap<TopicId, f64> = item
            .topics
            .iter()
            .map(|t| (t.clone(), next.mastery[t]))
            .collect();

        let exposure = next.exposures.entry(item.id.clone()).or_default();
        exposure.count = exposure.count.saturating_add(1);
        exposure.last_seen_ms = Some(answered_at_ms);

        next.history.push(ResponseRecord {
            item_id: item.id.clone(),
            topics: item.topics.clone(),
            difficulty: item.difficulty,
            correct,
            answered_at_ms,
            theta_after: step.theta,
            se_after: step.se,
        });
        let overflow = next.history.len().saturating_sub(self.params.history_limit);
        if overflow > 0 {
            next.history.drain(..overflow);
        }

        tracing::debug!(
            learner_id = %state.learner_id,
            item_id = %item.id,
            correct,
            theta = step.theta,
            se = step.se,
            degenerate,
            "ability updated"
        );

        EngineUpdateResult {
            theta: step.theta,
            se: step.se,
            mastery,
            degenerate,
            state: next,
        }
    }
}

impl Default for AbilityEstimator {
    fn default() -> Self {
        Self::new(AbilityParams::default())
    }
}
