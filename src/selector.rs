//! Seeded Top-K Selection
//!
//! Eligible candidates (positive, finite utility) are ranked by utility, ties
//! broken by item id, and the top K form a shortlist. One draw from a ChaCha8
//! stream seeded by the caller picks a shortlist entry with probability
//! proportional to its utility. Same scores and seed, same pick.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SelectorParams;
use crate::types::{CandidateScore, ItemId};

/// Seed for every randomized decision. Derived from stable identifiers, never
/// from the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionSeed(pub u64);

fn digest_u64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

impl SelectionSeed {
    pub fn derive(learner_id: &str, session_id: &str) -> Self {
        Self(digest_u64(&[learner_id.as_bytes(), session_id.as_bytes()]))
    }

    /// Sub-seed for the n-th decision within a session
    pub fn for_round(self, round: u64) -> Self {
        Self(digest_u64(&[&self.0.to_le_bytes()[..], &round.to_le_bytes()[..]]))
    }

    pub fn rng(self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }
}

/// A chosen candidate and the shortlist it was drawn from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub score: CandidateScore,
    /// Position of the chosen item in the shortlist (0 = highest utility)
    pub rank: usize,
    pub shortlist: Vec<ItemId>,
    /// Number of eligible candidates before truncation to K
    pub eligible: usize,
    pub seed: SelectionSeed,
}

/// Rank eligible scores: utility descending, then item id ascending
pub fn rank_eligible(scores: &[CandidateScore]) -> Vec<&CandidateScore> {
    let mut ranked: Vec<&CandidateScore> = scores.iter().filter(|s| s.is_eligible()).collect();
    ranked.sort_by(|a, b| {
        b.utility
            .partial_cmp(&a.utility)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    ranked
}

#[derive(Debug, Clone)]
pub struct Selector {
    params: SelectorParams,
}

impl Selector {
    /// `params` are expected to pass [`SelectorParams::validate`](crate::config::SelectorParams::validate);
    /// [`AdaptiveEngine::new`](crate::AdaptiveEngine::new) checks the whole config.
    pub fn new(params: SelectorParams) -> Self {
        Self { params }
    }

    /// Pick the next item, or `None` when no candidate is eligible
    pub fn select(&self, scores: &[CandidateScore], seed: SelectionSeed) -> Option<Selection> {
        let mut ranked = rank_eligible(scores);
        let eligible = ranked.len();
        if eligible == 0 {
            return None;
        }
        ranked.truncate(self.params.top_k.max(1));

        let total: f64 = ranked.iter().map(|s| s.utility).sum();
        let mut rng = seed.rng();
        let draw = rng.gen::<f64>() * total;

        let mut rank = ranked.len() - 1;
        let mut acc = 0.0;
        for (i, s) in ranked.iter().enumerate() {
            acc += s.utility;
            if draw < acc {
                rank = i;
                break;
            }
        }

        Some(Selection {
            score: ranked[rank].clone(),
            rank,
            shortlist: ranked.iter().map(|s| s.item_id.clone()).collect(),
            eligible,
            seed,
        })
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(SelectorParams::default())
    }
}
