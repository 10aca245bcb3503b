/// Pair selection for head-to-head votes.
///
/// Picks two distinct founders uniformly at random among the pairs the voter
/// has not judged yet. The rng is passed in, so tests seed it.
use std::collections::HashSet;

use rand::Rng;

use crate::constants::PAIR_SAMPLE_ATTEMPTS;
use crate::error::PairingError;
use crate::types::{Entity, PairKey};

/// Select two distinct founders whose pair key is not in `exclude`.
///
/// Founders sharing an id are treated as one candidate, so `(x, x)` can never
/// come back. Left/right orientation is a fair coin.
pub fn select_pair<'a, R: Rng + ?Sized>(
    entities: &'a [Entity],
    exclude: &HashSet<PairKey>,
    rng: &mut R,
) -> Result<(&'a Entity, &'a Entity), PairingError> {
    let candidates = distinct_candidates(entities);
    let n = candidates.len();
    if n < 2 {
        return Err(PairingError::InsufficientCandidates { available: n });
    }

    // Rejection sampling: each draw is uniform over ordered distinct pairs,
    // so the first accepted draw is uniform over the unexcluded ones.
    for _ in 0..PAIR_SAMPLE_ATTEMPTS {
        let i = rng.random_range(0..n);
        let mut j = rng.random_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let (a, b) = (candidates[i], candidates[j]);
        if !exclude.contains(&PairKey::new(&a.id, &b.id)) {
            return Ok((a, b));
        }
    }

    // Dense exclusion set: enumerate what is left.
    let mut remaining: Vec<(usize, usize)> = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if !exclude.contains(&PairKey::new(&candidates[i].id, &candidates[j].id)) {
                remaining.push((i, j));
            }
        }
    }

    if remaining.is_empty() {
        return Err(PairingError::NoUnjudgedPairsRemaining);
    }

    let (i, j) = remaining[rng.random_range(0..remaining.len())];
    if rng.random::<f64>() < 0.5 {
        Ok((candidates[i], candidates[j]))
    } else {
        Ok((candidates[j], candidates[i]))
    }
}

/// Number of unordered pairs that can be formed from `entities`.
pub fn total_pairs(entities: &[Entity]) -> usize {
    let n = distinct_candidates(entities).len();
    n * n.saturating_sub(1) / 2
}

fn distinct_candidates(entities: &[Entity]) -> Vec<&Entity> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(entities.len());
    entities.iter().filter(|e| seen.insert(e.id.as_str())).collect()
}
