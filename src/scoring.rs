//! Candidate Scoring
//!
//! utility = information × blueprint multiplier × exposure multiplier × fatigue scalar
//!
//! - information: Rasch Fisher information at the learner's theta
//! - blueprint multiplier: 1 + gain × (target share - observed share), clamped to
//!   [blueprint_min, blueprint_max]; for multi-topic items the most under-practiced
//!   topic decides
//! - exposure multiplier: (1 - count / cap)^power, 0 at or past the cap and 0 while
//!   the item is in cooldown
//! - fatigue scalar: exp(-rate × session load × item effort), floored at fatigue_floor
//!
//! Scoring is pure: same inputs, same scores, in input order.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::ability::item_information;
use crate::config::ScoringParams;
use crate::sanitize;
use crate::types::{
    Blueprint, CandidateItem, CandidateScore, ExposureRecord, LearnerState, SessionContext,
    TopicId,
};

const MIN_EFFORT: f64 = 0.25;
const MAX_EFFORT: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct CandidateScorer {
    params: ScoringParams,
}

impl CandidateScorer {
    /// `params` 需已通过 [`ScoringParams::validate`](crate::config::ScoringParams::validate)，
    /// [`AdaptiveEngine::new`](crate::AdaptiveEngine::new) 会校验完整配置
    pub fn new(params: ScoringParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// 当前 θ 下的 Fisher 信息量，输入非有限值时为 0
    pub fn information(&self, theta: f64, difficulty: f64) -> f64 {
        if !theta.is_finite() || !difficulty.is_finite() {
            return 0.0;
        }
        item_information(theta, difficulty)
    }

    /// 蓝图乘子：取题目各主题中 `1 + gain × (目标占比 - 近期占比)` 的最大值，
    /// 截断到 [blueprint_min, blueprint_max]
    pub fn blueprint_multiplier(
        &self,
        topics: &[TopicId],
        blueprint: &Blueprint,
        observed_share: &BTreeMap<TopicId, f64>,
    ) -> f64 {
        let p = &self.params;
        topics
            .iter()
            .map(|topic| {
                let target = blueprint.normalized_weight(topic);
                let observed = observed_share.get(topic).copied().unwrap_or(0.0);
                (1.0 + p.blueprint_gain * (target - observed))
                    .clamp(p.blueprint_min, p.blueprint_max)
            })
            .fold(None, |best: Option<f64>, m| Some(best.map_or(m, |b| b.max(m))))
            .unwrap_or(p.blueprint_min)
    }

    /// 曝光乘子：冷却期内或达到曝光上限时为 0，否则按 `(1 - count/cap)^power` 衰减
    pub fn exposure_multiplier(
        &self,
        item: &CandidateItem,
        record: ExposureRecord,
        now_ms: i64,
    ) -> f64 {
        let p = &self.params;
        if item.cooldown_remaining > 0 {
            return 0.0;
        }
        if let Some(last_seen) = record.last_seen_ms {
            if now_ms - last_seen < p.cooldown_ms {
                return 0.0;
            }
        }

        let count = item.exposure_count.max(record.count);
        if count >= p.exposure_cap {
            return 0.0;
        }
        let remaining = 1.0 - count as f64 / p.exposure_cap as f64;
        sanitize::clamp_unit(remaining.powf(p.exposure_decay_power))
    }

    /// 疲劳系数
    pub fn fatigue_scalar(&self, median_time_secs: f64, session: &SessionContext) -> f64 {
        let p = &self.params;
        let time_load = session.elapsed_minutes() / p.fatigue_reference_minutes;
        let item_load = session.items_answered as f64 / p.fatigue_reference_items as f64;
        let load = time_load.max(item_load);

        let effort = if median_time_secs.is_finite() && median_time_secs > 0.0 {
            (median_time_secs / p.reference_item_seconds).clamp(MIN_EFFORT, MAX_EFFORT)
        } else {
            1.0
        };

        let scalar = (-p.fatigue_rate * load * effort).exp();
        sanitize::finite_or(scalar, p.fatigue_floor).clamp(p.fatigue_floor, 1.0)
    }

    fn score_one(
        &self,
        item: &CandidateItem,
        state: &LearnerState,
        blueprint: &Blueprint,
        session: &SessionContext,
        observed_share: &BTreeMap<TopicId, f64>,
    ) -> CandidateScore {
        let information = self.information(state.theta, item.difficulty);
        let blueprint_multiplier = self.blueprint_multiplier(&item.topics, blueprint, observed_share);
        let exposure_multiplier =
            self.exposure_multiplier(item, state.exposure(&item.id), session.now_ms);
        let fatigue_scalar = self.fatigue_scalar(item.median_time_secs, session);

        debug_assert!((0.0..=0.25 + 1e-12).contains(&information));
        debug_assert!(
            (self.params.blueprint_min..=self.params.blueprint_max).contains(&blueprint_multiplier)
        );
        debug_assert!((0.0..=1.0).contains(&exposure_multiplier));
        debug_assert!((self.params.fatigue_floor..=1.0).contains(&fatigue_scalar));

        let utility = sanitize::finite_or(
            information * blueprint_multiplier * exposure_multiplier * fatigue_scalar,
            0.0,
        );

        CandidateScore {
            item_id: item.id.clone(),
            topics: item.topics.clone(),
            difficulty: item.difficulty,
            information,
            blueprint_multiplier,
            exposure_multiplier,
            fatigue_scalar,
            median_time_secs: item.median_time_secs,
            utility,
        }
    }

    /// 为所有候选题评分，输出顺序与 `candidates` 一致
    pub fn score(
        &self,
        candidates: &[CandidateItem],
        state: &LearnerState,
        blueprint: &Blueprint,
        session: &SessionContext,
    ) -> Vec<CandidateScore> {
        let observed_share = state.recent_topic_share(self.params.blueprint_window);

        if candidates.len() >= self.params.parallel_threshold {
            candidates
                .par_iter()
                .map(|item| self.score_one(item, state, blueprint, session, &observed_share))
                .collect()
        } else {
            candidates
                .iter()
                .map(|item| self.score_one(item, state, blueprint, session, &observed_share))
                .collect()
        }
    }
}

impl Default for CandidateScorer {
    fn default() -> Self {
        Self::new(ScoringParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbilityParams;
    use crate::types::ResponseRecord;

    fn blueprint() -> Blueprint {
        let weights = [("a".to_string(), 0.5), ("b".to_string(), 0.5)]
            .into_iter()
            .collect();
        Blueprint::new("bp", 1, weights).unwrap()
    }

    fn session(elapsed_ms: i64, items: u32) -> SessionContext {
        SessionContext {
            session_id: "s1".into(),
            started_at_ms: 0,
            now_ms: elapsed_ms,
            items_answered: items,
        }
    }

    fn record(topic: &str, at: i64) -> ResponseRecord {
        ResponseRecord {
            item_id: format!("{topic}-{at}"),
            topics: vec![topic.to_string()],
            difficulty: 0.0,
            correct: true,
            answered_at_ms: at,
            theta_after: 0.0,
            se_after: 1.0,
        }
    }

    #[test]
    fn test_exposure_multiplier_decays_to_cap() {
        let scorer = CandidateScorer::default();
        let item = CandidateItem::new("q", &["a"], 0.0);
        let mut last = f64::INFINITY;
        for count in 0..=6 {
            let m = scorer.exposure_multiplier(
                &item,
                ExposureRecord {
                    count,
                    last_seen_ms: None,
                },
                0,
            );
            assert!((0.0..=1.0).contains(&m));
            assert!(m <= last);
            if count >= 5 {
                assert_eq!(m, 0.0);
            } else {
                assert!(m > 0.0);
            }
            last = m;
        }
    }

    #[test]
    fn test_exposure_multiplier_cooldown() {
        let scorer = CandidateScorer::default();
        let item = CandidateItem::new("q", &["a"], 0.0);
        let seen = ExposureRecord {
            count: 1,
            last_seen_ms: Some(1_000),
        };
        assert_eq!(scorer.exposure_multiplier(&item, seen, 1_000 + 599_999), 0.0);
        assert!(scorer.exposure_multiplier(&item, seen, 1_000 + 600_000) > 0.0);

        let mut cooling = item.clone();
        cooling.cooldown_remaining = 2;
        assert_eq!(
            scorer.exposure_multiplier(&cooling, ExposureRecord::default(), 0),
            0.0
        );
    }

    #[test]
    fn test_blueprint_multiplier_direction() {
        let scorer = CandidateScorer::default();
        let bp = blueprint();
        let mut state = LearnerState::new("u", &AbilityParams::default());
        for i in 0..10 {
            state.history.push(record("a", i));
        }
        let shares = state.recent_topic_share(20);
        let over = scorer.blueprint_multiplier(&["a".to_string()], &bp, &shares);
        let under = scorer.blueprint_multiplier(&["b".to_string()], &bp, &shares);
        assert!(over < 1.0);
        assert!(under > 1.0);
        assert_eq!(scorer.blueprint_multiplier(&[], &bp, &shares), 0.5);
    }

    #[test]
    fn test_fatigue_scalar_decreases_over_session() {
        let scorer = CandidateScorer::default();
        let early = scorer.fatigue_scalar(60.0, &session(60_000, 1));
        let late = scorer.fatigue_scalar(60.0, &session(45 * 60_000, 1));
        let late_heavy = scorer.fatigue_scalar(240.0, &session(45 * 60_000, 1));
        assert!(early > late);
        assert!(late > late_heavy);
        assert!(late_heavy >= 0.2);
        assert_eq!(scorer.fatigue_scalar(60.0, &session(0, 0)), 1.0);
    }

    #[test]
    fn test_score_prefers_matching_difficulty() {
        let scorer = CandidateScorer::default();
        let state = LearnerState::new("u", &AbilityParams::default());
        let items = vec![
            CandidateItem::new("far", &["a"], 3.0),
            CandidateItem::new("near", &["a"], 0.1),
        ];
        let scores = scorer.score(&items, &state, &blueprint(), &session(0, 0));
        assert_eq!(scores[0].item_id, "far");
        assert!(scores[1].utility > scores[0].utility);
    }

    #[test]
    fn test_parallel_scoring_keeps_order() {
        let params = ScoringParams {
            parallel_threshold: 4,
            ..ScoringParams::default()
        };
        let scorer = CandidateScorer::new(params);
        let state = LearnerState::new("u", &AbilityParams::default());
        let items: Vec<CandidateItem> = (0..50)
            .map(|i| CandidateItem::new(format!("q{i:02}"), &["a"], i as f64 / 10.0 - 2.5))
            .collect();
        let parallel = scorer.score(&items, &state, &blueprint(), &session(0, 0));
        let serial = CandidateScorer::default().score(&items, &state, &blueprint(), &session(0, 0));
        assert_eq!(parallel, serial);
    }
}
