/// Elo rating update for a single pairwise outcome.
///
/// Pure computation: no state, no IO. Ratings are integers on the way out;
/// each side is rounded once, half up (`floor(x + 0.5)`).
use crate::constants::{DEFAULT_K_FACTOR, ELO_SCALE};
use crate::error::RatingError;

/// Result of applying one vote to a winner/loser pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingUpdate {
    pub new_winner_rating: i64,
    pub new_loser_rating: i64,
}

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / ELO_SCALE))
}

/// Compute both new ratings after `winner` beat `loser`.
///
/// Fails only on non-finite ratings or a non-finite / non-positive K-factor.
pub fn compute_update(winner: f64, loser: f64, k_factor: f64) -> Result<RatingUpdate, RatingError> {
    if !winner.is_finite() || !loser.is_finite() || !k_factor.is_finite() || k_factor <= 0.0 {
        return Err(RatingError::InvalidRating { winner, loser, k_factor });
    }

    let expected_winner = expected_score(winner, loser);
    let expected_loser = 1.0 - expected_winner;

    Ok(RatingUpdate {
        new_winner_rating: round_half_up(winner + k_factor * (1.0 - expected_winner)),
        new_loser_rating: round_half_up(loser + k_factor * (0.0 - expected_loser)),
    })
}

/// `compute_update` with the default K-factor.
pub fn compute_default_update(winner: i64, loser: i64) -> Result<RatingUpdate, RatingError> {
    compute_update(winner as f64, loser as f64, DEFAULT_K_FACTOR)
}

fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_ratings_are_symmetric() {
        let update = compute_update(1200.0, 1200.0, 32.0).unwrap();
        assert_eq!(update, RatingUpdate { new_winner_rating: 1216, new_loser_rating: 1184 });
    }

    #[test]
    fn test_symmetry_holds_at_other_equal_ratings() {
        for r in [800.0, 1000.0, 1337.0, 2400.0] {
            let update = compute_update(r, r, 32.0).unwrap();
            assert_eq!(update.new_winner_rating, r as i64 + 16);
            assert_eq!(update.new_loser_rating, r as i64 - 16);
        }
    }

    #[test]
    fn test_half_rounds_up_on_both_sides() {
        // k * 0.5 = 16.5: 1216.5 -> 1217 and 1183.5 -> 1184.
        let update = compute_update(1200.0, 1200.0, 33.0).unwrap();
        assert_eq!(update, RatingUpdate { new_winner_rating: 1217, new_loser_rating: 1184 });
    }

    #[test]
    fn test_favourite_wins_pinned() {
        let update = compute_update(1400.0, 1000.0, 32.0).unwrap();
        assert_eq!(update, RatingUpdate { new_winner_rating: 1403, new_loser_rating: 997 });
    }

    #[test]
    fn test_upset_pinned() {
        let update = compute_update(1000.0, 1400.0, 32.0).unwrap();
        assert_eq!(update, RatingUpdate { new_winner_rating: 1029, new_loser_rating: 1371 });
    }

    #[test]
    fn test_favourite_gains_less_than_half_k_and_upset_more() {
        let k = 32.0;
        for gap in [50.0, 150.0, 400.0, 800.0] {
            let high = 1200.0 + gap;
            let low = 1200.0;

            let favourite = compute_update(high, low, k).unwrap();
            let gain = favourite.new_winner_rating as f64 - high;
            assert!(gain <= k / 2.0, "gap {gap}: favourite gained {gain}");

            let upset = compute_update(low, high, k).unwrap();
            let upset_gain = upset.new_winner_rating as f64 - low;
            assert!(upset_gain >= k / 2.0, "gap {gap}: upset gained {upset_gain}");
            assert!(upset_gain > gain);
        }
    }

    #[test]
    fn test_changes_are_bounded_by_k() {
        let update = compute_update(3000.0, 100.0, 32.0).unwrap();
        assert!(update.new_winner_rating >= 3000 && update.new_winner_rating <= 3032);
        assert!(update.new_loser_rating <= 100 && update.new_loser_rating >= 68);
    }

    #[test]
    fn test_expected_scores_sum_to_one() {
        let a = expected_score(1500.0, 1300.0);
        let b = expected_score(1300.0, 1500.0);
        assert!((a + b - 1.0).abs() < 1e-12);
        assert!((expected_score(1200.0, 1200.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_default_update_uses_k_32() {
        assert_eq!(
            compute_default_update(1200, 1200).unwrap(),
            compute_update(1200.0, 1200.0, 32.0).unwrap()
        );
    }

    #[test]
    fn test_rejects_non_finite_input() {
        assert!(compute_update(f64::NAN, 1200.0, 32.0).is_err());
        assert!(compute_update(1200.0, f64::INFINITY, 32.0).is_err());
        assert!(compute_update(1200.0, 1200.0, f64::NAN).is_err());
        assert!(compute_update(1200.0, 1200.0, 0.0).is_err());
    }
}
