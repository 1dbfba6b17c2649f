//! Stop Rule
//!
//! Two states, `Continue` and `Stop`. A topic stops when any trigger fires:
//!
//! - precision: SE <= se_threshold (inclusive) and at least `min_items` topic responses
//! - plateau: each of the last `plateau_window` SE improvements on the topic is
//!   below `plateau_epsilon`
//! - mastery: mastery >= `mastery_threshold` and one of the last `probe_lookback`
//!   topic responses was a calibration probe (|b - theta| <= `probe_band`)
//!
//! Everything is read from the learner snapshot; there are no hidden counters.

use serde::{Deserialize, Serialize};

use crate::config::StopParams;
use crate::types::{CandidateItem, ItemId, LearnerState, TopicId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    Continue,
    Stop,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum StopTrigger {
    Precision { se: f64, items: usize },
    Plateau { window: usize, last_improvement: f64 },
    MasteryConfirmed { mastery: f64, probe_item_id: ItemId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopDecision {
    pub topic: TopicId,
    pub status: StopStatus,
    /// Every trigger that fired, in evaluation order
    pub triggers: Vec<StopTrigger>,
    pub theta: f64,
    pub se: f64,
    pub mastery: Option<f64>,
    pub items: usize,
}

impl StopDecision {
    pub fn should_stop(&self) -> bool {
        self.status == StopStatus::Stop
    }
}

#[derive(Debug, Clone)]
pub struct StopRule {
    params: StopParams,
}

impl StopRule {
    /// `params` are expected to pass [`StopParams::validate`](crate::config::StopParams::validate);
    /// [`AdaptiveEngine::new`](crate::AdaptiveEngine::new) checks the whole config.
    pub fn new(params: StopParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StopParams {
        &self.params
    }

    fn is_probe(&self, theta: f64, difficulty: f64) -> bool {
        difficulty.is_finite() && (difficulty - theta).abs() <= self.params.probe_band
    }

    fn precision(&self, state: &LearnerState, items: usize) -> Option<StopTrigger> {
        (state.se <= self.params.se_threshold && items >= self.params.min_items).then(|| {
            StopTrigger::Precision {
                se: state.se,
                items,
            }
        })
    }

    fn plateau(&self, state: &LearnerState, topic: &str) -> Option<StopTrigger> {
        let window = self.params.plateau_window;
        if window == 0 {
            return None;
        }
        let trajectory: Vec<f64> = state
            .responses_for_topic(topic)
            .rev()
            .take(window + 1)
            .map(|r| r.se_after)
            .collect();
        if trajectory.len() < window + 1 {
            return None;
        }

        // newest first: improvement = older - newer
        let improvements: Vec<f64> = trajectory.windows(2).map(|w| w[1] - w[0]).collect();
        let last_improvement = *improvements.first()?;
        let flat = improvements
            .iter()
            .all(|d| d.is_finite() && *d < self.params.plateau_epsilon);
        flat.then_some(StopTrigger::Plateau {
            window,
            last_improvement,
        })
    }

    fn mastery_confirmed(
        &self,
        state: &LearnerState,
        topic: &str,
        mastery: Option<f64>,
    ) -> Option<StopTrigger> {
        let mastery = mastery.filter(|m| *m >= self.params.mastery_threshold)?;
        let probe = state
            .responses_for_topic(topic)
            .rev()
            .take(self.params.probe_lookback)
            .find(|r| self.is_probe(state.theta, r.difficulty))?;
        Some(StopTrigger::MasteryConfirmed {
            mastery,
            probe_item_id: probe.item_id.clone(),
        })
    }

    pub fn evaluate(&self, state: &LearnerState, topic: &str) -> StopDecision {
        let items = state.topic_item_count(topic);
        let mastery = state.mastery(topic);

        let triggers: Vec<StopTrigger> = [
            self.precision(state, items),
            self.plateau(state, topic),
            self.mastery_confirmed(state, topic, mastery),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = if triggers.is_empty() {
            StopStatus::Continue
        } else {
            StopStatus::Stop
        };

        tracing::debug!(
            learner_id = %state.learner_id,
            topic,
            ?status,
            triggers = triggers.len(),
            se = state.se,
            items,
            "stop rule evaluated"
        );

        StopDecision {
            topic: topic.to_string(),
            status,
            triggers,
            theta: state.theta,
            se: state.se,
            mastery,
            items,
        }
    }

    /// Calibration probe for `topic`: the candidate whose difficulty is closest
    /// to theta within the probe band, ties broken by item id
    pub fn probe_candidate<'a>(
        &self,
        state: &LearnerState,
        topic: &str,
        candidates: &'a [CandidateItem],
    ) -> Option<&'a CandidateItem> {
        candidates
            .iter()
            .filter(|c| c.tests_topic(topic) && self.is_probe(state.theta, c.difficulty))
            .min_by(|a, b| {
                let da = (a.difficulty - state.theta).abs();
                let db = (b.difficulty - state.theta).abs();
                da.partial_cmp(&db)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }
}

impl Default for StopRule {
    fn default() -> Self {
        Self::new(StopParams::default())
    }
}
