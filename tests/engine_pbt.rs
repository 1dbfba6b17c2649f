//! Property-Based Tests for the selection engine
//!
//! Tests the following invariants:
//! - Correct streaks never lower theta and never raise SE
//! - Incorrect streaks never raise theta
//! - Exposure multiplier stays in [0, 1] and is 0 at the cap or in cooldown
//! - Selection is a pure function of (scores, seed)
//! - Feasible forms have exactly the requested length and the rounded per-topic targets
//! - Items tagged with several topics never block a form that can be filled

use std::collections::BTreeMap;

use proptest::prelude::*;

use danci_adaptive::{
    AbilityEstimator, AbilityParams, Blueprint, CandidateItem, CandidateScore, CandidateScorer,
    ExposureRecord, FormBuilder, LearnerState, ScoringParams, SelectionSeed, Selector,
};
use danci_adaptive::form::target_counts;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_difficulty() -> impl Strategy<Value = f64> {
    -5.0f64..=5.0f64
}

fn arb_score() -> impl Strategy<Value = CandidateScore> {
    ("[a-z]{1,4}", 0.0f64..=0.25f64, 0.5f64..=2.0f64, 0.0f64..=1.0f64).prop_map(
        |(id, information, blueprint_multiplier, exposure_multiplier)| CandidateScore {
            item_id: id,
            topics: vec!["t".to_string()],
            difficulty: 0.0,
            information,
            blueprint_multiplier,
            exposure_multiplier,
            fatigue_scalar: 1.0,
            median_time_secs: 60.0,
            utility: information * blueprint_multiplier * exposure_multiplier,
        },
    )
}

fn arb_blueprint() -> impl Strategy<Value = Blueprint> {
    prop::collection::vec(0u32..=10u32, 1..5).prop_filter_map("needs a positive weight", |ws| {
        let weights: BTreeMap<String, f64> = ws
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("t{i}"), *w as f64))
            .collect();
        Blueprint::new("bp", 1, weights).ok()
    })
}

fn expected_counts(blueprint: &Blueprint, length: usize) -> BTreeMap<String, usize> {
    target_counts(blueprint, length)
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_correct_streak_monotone(difficulties in prop::collection::vec(arb_difficulty(), 1..60)) {
        let estimator = AbilityEstimator::default();
        let mut state = LearnerState::new("u", estimator.params());
        for (i, b) in difficulties.iter().enumerate() {
            let item = CandidateItem::new(format!("q{i}"), &["t"], *b);
            let next = estimator.update(&state, &item, true, i as i64).state;
            prop_assert!(next.theta >= state.theta);
            prop_assert!(next.se <= state.se);
            prop_assert!(next.theta <= 4.0 && next.theta >= -4.0);
            prop_assert!(next.se >= 0.0 && next.se.is_finite());
            state = next;
        }
    }

    #[test]
    fn prop_incorrect_streak_monotone(difficulties in prop::collection::vec(arb_difficulty(), 1..60)) {
        let estimator = AbilityEstimator::default();
        let mut state = LearnerState::new("u", estimator.params());
        for (i, b) in difficulties.iter().enumerate() {
            let item = CandidateItem::new(format!("q{i}"), &["t"], *b);
            let next = estimator.update(&state, &item, false, i as i64).state;
            prop_assert!(next.theta <= state.theta);
            prop_assert!(next.se <= state.se);
            for m in next.mastery.values() {
                prop_assert!((0.0..=1.0).contains(m));
            }
            state = next;
        }
    }

    #[test]
    fn prop_exposure_multiplier_bounds(
        count in 0u32..20,
        bank_count in 0u32..20,
        cap in 1u32..10,
        since_seen in proptest::option::of(0i64..2_000_000),
    ) {
        let scorer = CandidateScorer::new(ScoringParams { exposure_cap: cap, ..ScoringParams::default() });
        let mut item = CandidateItem::new("q", &["t"], 0.0);
        item.exposure_count = bank_count;
        let now = 5_000_000;
        let record = ExposureRecord { count, last_seen_ms: since_seen.map(|d| now - d) };
        let m = scorer.exposure_multiplier(&item, record, now);

        prop_assert!((0.0..=1.0).contains(&m));
        if count.max(bank_count) >= cap {
            prop_assert_eq!(m, 0.0);
        }
        if matches!(since_seen, Some(d) if d < 600_000) {
            prop_assert_eq!(m, 0.0);
        }
    }

    #[test]
    fn prop_selection_deterministic(scores in prop::collection::vec(arb_score(), 0..30), seed in any::<u64>()) {
        let selector = Selector::default();
        let a = selector.select(&scores, SelectionSeed(seed));
        let b = selector.select(&scores, SelectionSeed(seed));
        prop_assert_eq!(&a, &b);
        if let Some(pick) = a {
            prop_assert!(pick.score.utility > 0.0);
            prop_assert!(pick.rank < 5);
        }
    }

    #[test]
    fn prop_feasible_form_exact_length(blueprint in arb_blueprint(), length in 0usize..25, seed in any::<u64>()) {
        let items: Vec<CandidateItem> = blueprint
            .weights()
            .keys()
            .flat_map(|topic| {
                (0..length).map(move |i| {
                    CandidateItem::new(format!("{topic}-{i}"), &[topic.as_str()], i as f64 * 0.2 - 2.0)
                })
            })
            .collect();

        let form = FormBuilder::default()
            .build(&blueprint, &items, length, SelectionSeed(seed), false)
            .unwrap();
        prop_assert_eq!(form.len(), length);
        prop_assert_eq!(&form.topic_counts, &expected_counts(&blueprint, length));
    }

    #[test]
    fn prop_shared_tags_never_block_feasible_form(
        blueprint in arb_blueprint(),
        length in 1usize..20,
        extra_tags in prop::collection::vec(prop::collection::vec(0usize..5, 0..3), 0..60),
        difficulties in prop::collection::vec(arb_difficulty(), 60),
        seed in any::<u64>(),
    ) {
        // one item per slot on its own topic, each also tagged with arbitrary
        // other topics, so a full assignment always exists
        let topics: Vec<String> = blueprint.weights().keys().cloned().collect();
        let mut items = Vec::new();
        for (topic, required) in target_counts(&blueprint, length) {
            for _ in 0..required {
                let n = items.len();
                let mut tags = vec![topic.clone()];
                if let Some(extra) = extra_tags.get(n) {
                    tags.extend(extra.iter().map(|t| topics[t % topics.len()].clone()));
                }
                let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                items.push(CandidateItem::new(format!("i{n}"), &tags, difficulties[n % 60]));
            }
        }

        let form = FormBuilder::default()
            .build(&blueprint, &items, length, SelectionSeed(seed), false)
            .unwrap();
        prop_assert_eq!(form.len(), length);
        prop_assert_eq!(&form.topic_counts, &expected_counts(&blueprint, length));
        for placed in &form.items {
            let source = items.iter().find(|i| i.id == placed.item_id).unwrap();
            prop_assert!(source.tests_topic(&placed.topic));
        }
    }
}

#[test]
fn ability_params_default_se_max() {
    let params = AbilityParams::default();
    let state = LearnerState::new("u", &params);
    assert_eq!(state.se, params.se_max());
}
