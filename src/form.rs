//! Blueprint-Constrained Form Assembly
//!
//! 1. Target counts: round(normalized weight × length) per topic, then the
//!    rounding remainder is handed out heaviest topic first (or taken back
//!    lightest topic first) until the counts sum to exactly `length`.
//! 2. Feasibility: every topic short of its target is recorded; any shortfall
//!    aborts with the complete list.
//! 3. Greedy allocation, heaviest topic first. Each pick maximizes Rasch
//!    information at a neutral ability (theta = 0) plus a bonus for distance
//!    from the difficulties already picked for the topic. Equal keys fall back
//!    to a seeded permutation, so the same seed always yields the same form.
//!    When every remaining item of a topic is held by another topic, an
//!    augmenting path moves holders onto free items, so items tagged with
//!    several topics never cause a deficit that some assignment avoids.
//!
//! The result is an approximation, not a global optimum.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::ability::item_information;
use crate::config::FormParams;
use crate::error::{DeficitReport, TopicDeficit};
use crate::selector::SelectionSeed;
use crate::types::{Blueprint, CandidateItem, ItemId, TopicId};

/// Ability the form is tuned for when no learner is involved
pub const NEUTRAL_THETA: f64 = 0.0;

/// Peak Rasch information, used to put the spread bonus on the same scale
const MAX_ITEM_INFORMATION: f64 = 0.25;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormItem {
    pub item_id: ItemId,
    /// Topic this item was allocated to
    pub topic: TopicId,
    pub difficulty: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssessmentForm {
    pub blueprint_id: String,
    pub schema_version: u32,
    pub seed: SelectionSeed,
    pub items: Vec<FormItem>,
    pub topic_counts: BTreeMap<TopicId, usize>,
}

impl AssessmentForm {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.item_id.as_str()).collect()
    }
}

/// Per-topic item counts summing to exactly `length`, heaviest topic first.
/// Zero-weight topics are left out.
pub fn target_counts(blueprint: &Blueprint, length: usize) -> Vec<(TopicId, usize)> {
    let mut targets: Vec<(TopicId, usize)> = blueprint
        .topics_by_weight()
        .into_iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|(topic, w)| (topic.to_string(), (w * length as f64).round() as usize))
        .collect();
    if targets.is_empty() {
        return targets;
    }

    let n = targets.len();
    let mut total: usize = targets.iter().map(|(_, count)| count).sum();
    let mut i = 0;
    while total < length {
        targets[i % n].1 += 1;
        total += 1;
        i += 1;
    }
    let mut i = 0;
    while total > length {
        let idx = n - 1 - (i % n);
        if targets[idx].1 > 0 {
            targets[idx].1 -= 1;
            total -= 1;
        }
        i += 1;
    }

    targets
}

#[derive(Debug, Clone)]
pub struct FormBuilder {
    params: FormParams,
}

impl FormBuilder {
    /// `params` are expected to pass [`FormParams::validate`](crate::config::FormParams::validate);
    /// [`AdaptiveEngine::new`](crate::AdaptiveEngine::new) checks the whole config.
    pub fn new(params: FormParams) -> Self {
        Self { params }
    }

    fn pick_key(&self, difficulty: f64, picked: &[f64]) -> f64 {
        let information = item_information(NEUTRAL_THETA, difficulty);
        let spread = picked
            .iter()
            .map(|p| (difficulty - p).abs())
            .fold(None, |min: Option<f64>, d| Some(min.map_or(d, |m| m.min(d))))
            .map_or(0.0, |d| 1.0 - (-d).exp());
        information + self.params.spread_weight * MAX_ITEM_INFORMATION * spread
    }

    /// Assemble a form of exactly `length` items or report every topic that
    /// cannot be filled
    pub fn build(
        &self,
        blueprint: &Blueprint,
        items: &[CandidateItem],
        length: usize,
        seed: SelectionSeed,
        published_only: bool,
    ) -> Result<AssessmentForm, DeficitReport> {
        let mut seen = BTreeSet::new();
        let pool: Vec<&CandidateItem> = items
            .iter()
            .filter(|i| !published_only || i.published)
            .filter(|i| i.difficulty.is_finite())
            .filter(|i| seen.insert(i.id.as_str()))
            .collect();

        let targets = target_counts(blueprint, length);

        let deficits: Vec<TopicDeficit> = targets
            .iter()
            .filter(|(_, required)| *required > 0)
            .filter_map(|(topic, required)| {
                let available = pool.iter().filter(|i| i.tests_topic(topic)).count();
                (available < *required).then(|| TopicDeficit {
                    topic: topic.clone(),
                    required: *required,
                    available,
                })
            })
            .collect();
        if !deficits.is_empty() {
            return Err(self.deficit(blueprint, length, deficits));
        }

        let mut rng = seed.rng();
        let mut permutation: Vec<usize> = (0..pool.len()).collect();
        permutation.shuffle(&mut rng);
        let mut tie_rank = vec![0usize; pool.len()];
        for (rank, idx) in permutation.into_iter().enumerate() {
            tie_rank[idx] = rank;
        }

        // slot = (target index, pool index); owner[item] = slot holding it
        let mut slots: Vec<(usize, usize)> = Vec::with_capacity(length);
        let mut owner: Vec<Option<usize>> = vec![None; pool.len()];

        for (t, (topic, required)) in targets.iter().enumerate() {
            for _ in 0..*required {
                let picked: Vec<f64> = slots
                    .iter()
                    .filter(|(st, _)| *st == t)
                    .map(|&(_, i)| pool[i].difficulty)
                    .collect();
                let best = (0..pool.len())
                    .filter(|&i| owner[i].is_none() && pool[i].tests_topic(topic))
                    .max_by(|&a, &b| {
                        let ka = self.pick_key(pool[a].difficulty, &picked);
                        let kb = self.pick_key(pool[b].difficulty, &picked);
                        ka.partial_cmp(&kb)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| tie_rank[b].cmp(&tie_rank[a]))
                    });
                let best = best.or_else(|| {
                    let mut visited = vec![false; pool.len()];
                    release_item(t, &targets, &pool, &mut slots, &mut owner, &mut visited)
                });
                let Some(idx) = best else { break };

                owner[idx] = Some(slots.len());
                slots.push((t, idx));
            }
        }

        let mut topic_counts = BTreeMap::new();
        let mut overlap_deficits = Vec::new();
        for (t, (topic, required)) in targets.iter().enumerate() {
            let allocated = slots.iter().filter(|(st, _)| *st == t).count();
            if allocated < *required {
                // no assignment of shared items covers this topic as well
                overlap_deficits.push(TopicDeficit {
                    topic: topic.clone(),
                    required: *required,
                    available: allocated,
                });
            }
            if *required > 0 {
                topic_counts.insert(topic.clone(), allocated);
            }
        }
        if !overlap_deficits.is_empty() {
            return Err(self.deficit(blueprint, length, overlap_deficits));
        }

        let mut form_items: Vec<FormItem> = slots
            .iter()
            .map(|&(t, i)| FormItem {
                item_id: pool[i].id.clone(),
                topic: targets[t].0.clone(),
                difficulty: pool[i].difficulty,
            })
            .collect();

        if self.params.interleave {
            form_items.shuffle(&mut rng);
        }

        tracing::debug!(
            blueprint_id = %blueprint.id(),
            length,
            pool = pool.len(),
            topics = topic_counts.len(),
            "form assembled"
        );

        Ok(AssessmentForm {
            blueprint_id: blueprint.id().to_string(),
            schema_version: blueprint.schema_version(),
            seed,
            items: form_items,
            topic_counts,
        })
    }

    fn deficit(
        &self,
        blueprint: &Blueprint,
        length: usize,
        deficits: Vec<TopicDeficit>,
    ) -> DeficitReport {
        tracing::warn!(
            blueprint_id = %blueprint.id(),
            length,
            topics = deficits.len(),
            "blueprint cannot be filled"
        );
        DeficitReport {
            blueprint_id: blueprint.id().to_string(),
            length,
            deficits,
        }
    }
}

/// Find an item tagged with `targets[target].0` that can be handed to a new
/// slot: either an unallocated one, or one whose current slot can move to
/// another item (augmenting path). Moves are applied to `slots`/`owner`.
fn release_item(
    target: usize,
    targets: &[(TopicId, usize)],
    pool: &[&CandidateItem],
    slots: &mut [(usize, usize)],
    owner: &mut [Option<usize>],
    visited: &mut [bool],
) -> Option<usize> {
    let topic = &targets[target].0;
    for i in 0..pool.len() {
        if visited[i] || !pool[i].tests_topic(topic) {
            continue;
        }
        visited[i] = true;
        match owner[i] {
            None => return Some(i),
            Some(slot) => {
                let holder = slots[slot].0;
                if let Some(j) = release_item(holder, targets, pool, slots, owner, visited) {
                    slots[slot].1 = j;
                    owner[j] = Some(slot);
                    owner[i] = None;
                    return Some(i);
                }
            }
        }
    }
    None
}

impl Default for FormBuilder {
    fn default() -> Self {
        Self::new(FormParams::default())
    }
}
