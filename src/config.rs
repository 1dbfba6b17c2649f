//! Engine configuration
//!
//! Every threshold, cap and window the engine uses lives here and is passed in
//! explicitly. The crate never reads the environment; loading a config document
//! is the caller's job, [`EngineConfig::from_json_str`] only parses and validates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::TopicId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityParams {
    pub theta_min: f64,
    pub theta_max: f64,
    /// Information contributed by the N(0, 1/prior) prior; SE of a new learner is 1/sqrt(this)
    pub prior_information: f64,
    /// Largest theta move a single response may cause
    pub max_step: f64,
    pub mastery_slope: f64,
    pub default_mastery_threshold: f64,
    pub topic_thresholds: BTreeMap<TopicId, f64>,
    /// Responses retained in the learner history
    pub history_limit: usize,
}

impl Default for AbilityParams {
    fn default() -> Self {
        Self {
            theta_min: -4.0,
            theta_max: 4.0,
            prior_information: 1.0,
            max_step: 1.0,
            mastery_slope: 2.0,
            default_mastery_threshold: 0.0,
            topic_thresholds: BTreeMap::new(),
            history_limit: 500,
        }
    }
}

impl AbilityParams {
    pub fn mastery_threshold(&self, topic: &str) -> f64 {
        self.topic_thresholds
            .get(topic)
            .copied()
            .unwrap_or(self.default_mastery_threshold)
    }

    pub fn se_max(&self) -> f64 {
        1.0 / self.prior_information.sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    /// Presentations after which an item is no longer eligible
    pub exposure_cap: u32,
    pub exposure_decay_power: f64,
    /// Minimum time between two presentations of the same item
    pub cooldown_ms: i64,
    /// Responses considered when measuring observed topic share
    pub blueprint_window: usize,
    pub blueprint_gain: f64,
    pub blueprint_min: f64,
    pub blueprint_max: f64,
    pub fatigue_rate: f64,
    pub fatigue_reference_minutes: f64,
    pub fatigue_reference_items: u32,
    pub reference_item_seconds: f64,
    pub fatigue_floor: f64,
    /// Pools at least this large are scored on the rayon pool
    pub parallel_threshold: usize,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            exposure_cap: 5,
            exposure_decay_power: 1.0,
            cooldown_ms: 600_000,
            blueprint_window: 20,
            blueprint_gain: 2.0,
            blueprint_min: 0.5,
            blueprint_max: 2.0,
            fatigue_rate: 0.15,
            fatigue_reference_minutes: 30.0,
            fatigue_reference_items: 30,
            reference_item_seconds: 60.0,
            fatigue_floor: 0.2,
            parallel_threshold: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorParams {
    pub top_k: usize,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopParams {
    /// Stop once SE is at or below this value (inclusive)
    pub se_threshold: f64,
    /// Topic responses required before the precision trigger may fire
    pub min_items: usize,
    /// Consecutive SE improvements inspected for a plateau
    pub plateau_window: usize,
    pub plateau_epsilon: f64,
    pub mastery_threshold: f64,
    /// A probe is an item whose difficulty is within this distance of theta
    pub probe_band: f64,
    /// Most recent topic responses searched for a probe
    pub probe_lookback: usize,
}

impl Default for StopParams {
    fn default() -> Self {
        Self {
            se_threshold: 0.20,
            min_items: 10,
            plateau_window: 5,
            plateau_epsilon: 0.002,
            mastery_threshold: 0.85,
            probe_band: 0.3,
            probe_lookback: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormParams {
    /// Weight of difficulty spread relative to information when picking form items
    pub spread_weight: f64,
    /// Shuffle the assembled form with the form seed instead of grouping by topic
    pub interleave: bool,
}

impl Default for FormParams {
    fn default() -> Self {
        Self {
            spread_weight: 0.5,
            interleave: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ability: AbilityParams,
    pub scoring: ScoringParams,
    pub selector: SelectorParams,
    pub stop: StopParams,
    pub form: FormParams,
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(message.to_string()))
    }
}

impl AbilityParams {
    pub fn validate(&self) -> Result<()> {
        check(
            self.theta_min.is_finite()
                && self.theta_max.is_finite()
                && self.theta_min < self.theta_max,
            "ability.theta_min must be below ability.theta_max",
        )?;
        check(
            self.prior_information.is_finite() && self.prior_information > 0.0,
            "ability.prior_information must be positive",
        )?;
        check(
            self.max_step.is_finite() && self.max_step > 0.0,
            "ability.max_step must be positive",
        )?;
        check(
            self.mastery_slope.is_finite() && self.mastery_slope > 0.0,
            "ability.mastery_slope must be positive",
        )?;
        check(
            self.default_mastery_threshold.is_finite()
                && self.topic_thresholds.values().all(|t| t.is_finite()),
            "ability mastery thresholds must be finite",
        )?;
        check(self.history_limit > 0, "ability.history_limit must be positive")
    }
}

impl ScoringParams {
    pub fn validate(&self) -> Result<()> {
        check(self.exposure_cap > 0, "scoring.exposure_cap must be positive")?;
        check(
            self.exposure_decay_power.is_finite() && self.exposure_decay_power > 0.0,
            "scoring.exposure_decay_power must be positive",
        )?;
        check(self.cooldown_ms >= 0, "scoring.cooldown_ms must not be negative")?;
        check(self.blueprint_window > 0, "scoring.blueprint_window must be positive")?;
        check(
            self.blueprint_gain.is_finite() && self.blueprint_gain >= 0.0,
            "scoring.blueprint_gain must not be negative",
        )?;
        check(
            self.blueprint_min.is_finite()
                && self.blueprint_max.is_finite()
                && self.blueprint_min > 0.0
                && self.blueprint_min <= 1.0
                && self.blueprint_max >= 1.0,
            "scoring.blueprint_min must be in (0, 1] and scoring.blueprint_max >= 1",
        )?;
        check(
            self.fatigue_rate.is_finite() && self.fatigue_rate >= 0.0,
            "scoring.fatigue_rate must not be negative",
        )?;
        check(
            self.fatigue_reference_minutes.is_finite() && self.fatigue_reference_minutes > 0.0,
            "scoring.fatigue_reference_minutes must be positive",
        )?;
        check(
            self.fatigue_reference_items > 0,
            "scoring.fatigue_reference_items must be positive",
        )?;
        check(
            self.reference_item_seconds.is_finite() && self.reference_item_seconds > 0.0,
            "scoring.reference_item_seconds must be positive",
        )?;
        check(
            self.fatigue_floor.is_finite()
                && self.fatigue_floor > 0.0
                && self.fatigue_floor <= 1.0,
            "scoring.fatigue_floor must be in (0, 1]",
        )
    }
}

impl SelectorParams {
    pub fn validate(&self) -> Result<()> {
        check(self.top_k > 0, "selector.top_k must be positive")
    }
}

impl StopParams {
    pub fn validate(&self) -> Result<()> {
        check(
            self.se_threshold.is_finite() && self.se_threshold > 0.0,
            "stop.se_threshold must be positive",
        )?;
        check(self.plateau_window > 0, "stop.plateau_window must be positive")?;
        check(
            self.plateau_epsilon.is_finite() && self.plateau_epsilon >= 0.0,
            "stop.plateau_epsilon must not be negative",
        )?;
        check(
            self.mastery_threshold > 0.0 && self.mastery_threshold <= 1.0,
            "stop.mastery_threshold must be in (0, 1]",
        )?;
        check(
            self.probe_band.is_finite() && self.probe_band >= 0.0,
            "stop.probe_band must not be negative",
        )?;
        check(self.probe_lookback > 0, "stop.probe_lookback must be positive")
    }
}

impl FormParams {
    pub fn validate(&self) -> Result<()> {
        check(
            self.spread_weight.is_finite() && self.spread_weight >= 0.0,
            "form.spread_weight must not be negative",
        )
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON config document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.ability.validate()?;
        self.scoring.validate()?;
        self.selector.validate()?;
        self.stop.validate()?;
        self.form.validate()
    }
}
