//! Human-readable rationale for selection and stop decisions.
//!
//! Formatting only; nothing here feeds back into a decision.

use serde::{Deserialize, Serialize};

use crate::stop_rule::{StopDecision, StopStatus, StopTrigger};
use crate::types::CandidateScore;

/// Ability figures shown next to the scoring factors
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbilitySignals {
    pub theta: f64,
    pub se: f64,
    pub mastery: Option<f64>,
}

pub struct Explainer;

impl Explainer {
    /// `Info 0.25 · Blueprint×1.20 · Exposure×1.00 · Fatigue×0.95 · θ̂=0.42 · SE=0.15 · Mastery=0.87`
    pub fn explain(score: &CandidateScore, signals: &AbilitySignals) -> String {
        let mastery = signals
            .mastery
            .map_or_else(|| "n/a".to_string(), |m| format!("{m:.2}"));
        format!(
            "Info {:.2} · Blueprint×{:.2} · Exposure×{:.2} · Fatigue×{:.2} · θ̂={:.2} · SE={:.2} · Mastery={}",
            score.information,
            score.blueprint_multiplier,
            score.exposure_multiplier,
            score.fatigue_scalar,
            signals.theta,
            signals.se,
            mastery
        )
    }

    /// `Stop: precision(SE=0.19, n=12) · plateau(5)` or `Continue: SE=0.45, n=3`
    pub fn explain_stop(decision: &StopDecision) -> String {
        if decision.status == StopStatus::Continue {
            return format!("Continue: SE={:.2}, n={}", decision.se, decision.items);
        }

        let reasons: Vec<String> = decision
            .triggers
            .iter()
            .map(|t| match t {
                StopTrigger::Precision { se, items } => {
                    format!("precision(SE={se:.2}, n={items})")
                }
                StopTrigger::Plateau { window, .. } => format!("plateau({window})"),
                StopTrigger::MasteryConfirmed {
                    mastery,
                    probe_item_id,
                } => format!("mastery({mastery:.2}, probe={probe_item_id})"),
            })
            .collect();
        format!("Stop: {}", reasons.join(" · "))
    }
}
