//! src/scoring_core.rs
//! Pure scoring math: rank correlation over finishing orders, banded rating
//! deltas with experience scaling, bounded rating application.
//!
//! No storage access anywhere in this module; everything is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Hard bounds for a user's rating. Enforced in exactly one place
/// (`apply_rating_delta`); nothing else may write a rating.
pub const RATING_FLOOR: i32 = 100;
pub const RATING_CEILING: i32 = 3000;

/// Bonus points, additive and independent of the base band.
pub const WINNER_BONUS: i32 = 15;
pub const PODIUM_BONUS: i32 = 10;
pub const TOP_FIVE_BONUS: i32 = 5;

/// One slot of an ordering: which entrant is ranked at which position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub position: i32,
    pub entrant_id: String,
}

/// Accuracy facts for one prediction against the official classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyFacts {
    /// Spearman rank correlation, -1..=1.
    pub correlation: f64,
    /// Correlation mapped onto 0..=100.
    pub accuracy: f64,
    /// Positions 1-3 all correct, identity for identity, in order.
    pub exact_podium: bool,
    /// Position 1 correct.
    pub correct_winner: bool,
    /// Overlap between predicted and actual top-five sets, 0..=5.
    pub top_five_correct: i32,
}

/// Itemized composition of the points total behind a rating delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsBreakdown {
    pub base: i32,
    pub winner_bonus: i32,
    pub podium_bonus: i32,
    pub top_five_bonus: i32,
}

/// Outcome of scoring one prediction: the signed rating movement, the
/// non-negative leaderboard score, and how both were arrived at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingCalculation {
    pub rating_delta: i32,
    pub score: i32,
    pub accuracy: AccuracyFacts,
    pub breakdown: PointsBreakdown,
}

/// Check that `entries` is a bijection between positions 1..=field_size and
/// `field_size` distinct entrants. Returns a message naming the first defect.
pub fn validate_ordering(entries: &[RankedEntry], field_size: usize) -> Result<(), String> {
    if entries.len() != field_size {
        return Err(format!(
            "ordering must rank all {} entrants, got {}",
            field_size,
            entries.len()
        ));
    }

    let mut positions_seen = HashSet::with_capacity(field_size);
    let mut entrants_seen = HashSet::with_capacity(field_size);

    for entry in entries {
        if entry.position < 1 || entry.position > field_size as i32 {
            return Err(format!(
                "position {} is outside 1..={}",
                entry.position, field_size
            ));
        }
        if entry.entrant_id.is_empty() {
            return Err("entrant id must not be empty".to_string());
        }
        if !positions_seen.insert(entry.position) {
            return Err(format!("duplicate position {}", entry.position));
        }
        if !entrants_seen.insert(entry.entrant_id.as_str()) {
            return Err(format!("entrant '{}' appears more than once", entry.entrant_id));
        }
    }

    // len == field_size with no duplicates implies every position is present.
    Ok(())
}

/// Spearman rank correlation between a predicted and an actual ordering.
///
/// Entrants present in only one of the two orderings contribute zero
/// squared-difference weight; the denominator uses the prediction length.
/// A single-entry ordering is degenerate and scores as perfect agreement.
pub fn spearman_correlation(predicted: &[RankedEntry], actual: &[RankedEntry]) -> f64 {
    let n = predicted.len();
    if n <= 1 {
        return 1.0;
    }

    let actual_positions: HashMap<&str, i32> = actual
        .iter()
        .map(|e| (e.entrant_id.as_str(), e.position))
        .collect();

    let mut sum_squared_diff = 0i64;
    for entry in predicted {
        if let Some(actual_pos) = actual_positions.get(entry.entrant_id.as_str()) {
            let diff = i64::from(entry.position - actual_pos);
            sum_squared_diff += diff * diff;
        }
    }

    let n = n as f64;
    1.0 - (6.0 * sum_squared_diff as f64) / (n * (n * n - 1.0))
}

fn entrant_at(entries: &[RankedEntry], position: i32) -> Option<&str> {
    entries
        .iter()
        .find(|e| e.position == position)
        .map(|e| e.entrant_id.as_str())
}

fn top_five_set(entries: &[RankedEntry]) -> HashSet<&str> {
    entries
        .iter()
        .filter(|e| e.position <= 5)
        .map(|e| e.entrant_id.as_str())
        .collect()
}

/// Score one predicted ordering against the official one.
pub fn evaluate_accuracy(predicted: &[RankedEntry], actual: &[RankedEntry]) -> AccuracyFacts {
    let correlation = spearman_correlation(predicted, actual);
    let accuracy = (correlation + 1.0) / 2.0 * 100.0;

    let exact_podium = (1..=3).all(|pos| {
        match (entrant_at(predicted, pos), entrant_at(actual, pos)) {
            (Some(p), Some(a)) => p == a,
            _ => false,
        }
    });

    let correct_winner = matches!(
        (entrant_at(predicted, 1), entrant_at(actual, 1)),
        (Some(p), Some(a)) if p == a
    );

    let predicted_top_five = top_five_set(predicted);
    let top_five_correct = top_five_set(actual)
        .iter()
        .filter(|id| predicted_top_five.contains(*id))
        .count() as i32;

    AccuracyFacts {
        correlation,
        accuracy,
        exact_podium,
        correct_winner,
        top_five_correct,
    }
}

/// Experience factor from lifetime prediction count.
/// New users swing fastest; veterans converge slowly.
pub fn experience_factor(prediction_count: i32) -> i32 {
    if prediction_count < 10 {
        32
    } else if prediction_count < 50 {
        24
    } else {
        16
    }
}

/// Base points from the accuracy band, linearly interpolated within each band
/// and floored to an integer.
pub fn base_points(accuracy: f64) -> i32 {
    if accuracy >= 99.0 {
        50
    } else if accuracy >= 80.0 {
        30 + ((accuracy - 80.0) / 19.0 * 15.0).floor() as i32
    } else if accuracy >= 60.0 {
        15 + ((accuracy - 60.0) / 20.0 * 10.0).floor() as i32
    } else if accuracy >= 40.0 {
        5 + ((accuracy - 40.0) / 20.0 * 5.0).floor() as i32
    } else {
        -20 + (accuracy / 40.0 * 15.0).floor() as i32
    }
}

/// Turn accuracy facts into a rating delta and leaderboard score.
///
/// `_current_rating` is read-only context; the delta does not depend on it.
pub fn calculate_rating(
    facts: &AccuracyFacts,
    _current_rating: i32,
    prediction_count: i32,
) -> RatingCalculation {
    let factor = experience_factor(prediction_count);
    let base = base_points(facts.accuracy);

    let winner_bonus = if facts.correct_winner { WINNER_BONUS } else { 0 };
    let podium_bonus = if facts.exact_podium { PODIUM_BONUS } else { 0 };
    let top_five_bonus = if facts.top_five_correct >= 4 { TOP_FIVE_BONUS } else { 0 };

    let total = base + winner_bonus + podium_bonus + top_five_bonus;
    let rating_delta = (f64::from(total) * f64::from(factor) / 32.0).round() as i32;

    RatingCalculation {
        rating_delta,
        score: facts.accuracy.round() as i32,
        accuracy: facts.clone(),
        breakdown: PointsBreakdown {
            base,
            winner_bonus,
            podium_bonus,
            top_five_bonus,
        },
    }
}

/// Apply a delta to a rating, clamped to the fixed bounds. The only write
/// path for ratings; callers guarantee at-most-once application per
/// (user, event) pair.
pub fn apply_rating_delta(current: i32, delta: i32) -> i32 {
    current
        .saturating_add(delta)
        .clamp(RATING_FLOOR, RATING_CEILING)
}

// -----------------------
// Tests
// -----------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grid(n: usize) -> Vec<RankedEntry> {
        (1..=n)
            .map(|i| RankedEntry {
                position: i as i32,
                entrant_id: format!("d{:02}", i),
            })
            .collect()
    }

    fn reversed_grid(n: usize) -> Vec<RankedEntry> {
        (1..=n)
            .map(|i| RankedEntry {
                position: (n - i + 1) as i32,
                entrant_id: format!("d{:02}", i),
            })
            .collect()
    }

    /// Build a prediction that ranks the canonical grid in the order given
    /// by `positions` (positions[i] is the predicted position of d(i+1)).
    fn grid_with_positions(positions: &[i32]) -> Vec<RankedEntry> {
        positions
            .iter()
            .enumerate()
            .map(|(i, &position)| RankedEntry {
                position,
                entrant_id: format!("d{:02}", i + 1),
            })
            .collect()
    }

    #[test]
    fn perfect_prediction_scores_perfectly() {
        let official = grid(20);
        let facts = evaluate_accuracy(&official, &official);

        assert!((facts.correlation - 1.0).abs() < 1e-12);
        assert!((facts.accuracy - 100.0).abs() < 1e-12);
        assert!(facts.exact_podium);
        assert!(facts.correct_winner);
        assert_eq!(facts.top_five_correct, 5);
        assert_eq!(base_points(facts.accuracy), 50);
    }

    #[test]
    fn reversed_prediction_hits_the_floor_band() {
        let official = grid(20);
        let predicted = reversed_grid(20);
        let facts = evaluate_accuracy(&predicted, &official);

        // Sum of squared differences for a full reversal of 20 entrants:
        // sum of (2i - 21)^2 for i in 1..=20 = 2660, so 1 - 6*2660/(20*399) = -1.
        assert!((facts.correlation - (-1.0)).abs() < 1e-12);
        assert!(facts.accuracy.abs() < 1e-12);
        assert!(!facts.exact_podium);
        assert!(!facts.correct_winner);
        assert_eq!(facts.top_five_correct, 0);

        let base = base_points(facts.accuracy);
        assert!((-20..=-5).contains(&base), "base {} outside floor band", base);
        assert_eq!(base, -20);
    }

    #[test]
    fn winner_swap_example_on_five_entrants() {
        // Official A,B,C,D,E; predicted B,A,C,D,E.
        let official = grid(5);
        let predicted = grid_with_positions(&[2, 1, 3, 4, 5]);
        let facts = evaluate_accuracy(&predicted, &official);

        // S = 1 + 1 = 2; correlation = 1 - 12/120 = 0.9; accuracy = 95.
        assert!((facts.correlation - 0.9).abs() < 1e-12);
        assert!((facts.accuracy - 95.0).abs() < 1e-12);
        assert!(!facts.exact_podium);
        assert!(!facts.correct_winner);
        assert_eq!(facts.top_five_correct, 5);
    }

    #[test]
    fn single_entry_ordering_is_degenerate_perfect() {
        let one = grid(1);
        let facts = evaluate_accuracy(&one, &one);
        assert!((facts.correlation - 1.0).abs() < 1e-12);
        assert!((facts.accuracy - 100.0).abs() < 1e-12);
    }

    #[test]
    fn unmatched_entrants_carry_no_weight() {
        let official = grid(5);
        let mut predicted = grid(5);
        // Replace the predicted P4 and P5 with entrants the official
        // classification has never heard of.
        predicted[3].entrant_id = "x91".to_string();
        predicted[4].entrant_id = "x92".to_string();

        let facts = evaluate_accuracy(&predicted, &official);
        // Matched entrants are all at their exact positions, so S = 0.
        assert!((facts.correlation - 1.0).abs() < 1e-12);
        assert_eq!(facts.top_five_correct, 3);
    }

    #[test]
    fn base_point_band_edges() {
        assert_eq!(base_points(100.0), 50);
        assert_eq!(base_points(99.0), 50);
        assert_eq!(base_points(98.9), 44);
        assert_eq!(base_points(80.0), 30);
        assert_eq!(base_points(79.99), 24);
        assert_eq!(base_points(60.0), 15);
        assert_eq!(base_points(59.99), 9);
        assert_eq!(base_points(40.0), 5);
        assert_eq!(base_points(39.9), -6);
        assert_eq!(base_points(0.0), -20);
    }

    #[test]
    fn experience_tiers() {
        assert_eq!(experience_factor(0), 32);
        assert_eq!(experience_factor(9), 32);
        assert_eq!(experience_factor(10), 24);
        assert_eq!(experience_factor(49), 24);
        assert_eq!(experience_factor(50), 16);
        assert_eq!(experience_factor(500), 16);
    }

    #[test]
    fn veterans_move_slower_than_rookies() {
        let official = grid(20);
        let facts = evaluate_accuracy(&official, &official);

        let rookie = calculate_rating(&facts, 1000, 5);
        let veteran = calculate_rating(&facts, 1000, 60);

        assert!(rookie.rating_delta.abs() > veteran.rating_delta.abs());
        // Same accuracy, same leaderboard score regardless of tier.
        assert_eq!(rookie.score, veteran.score);
        assert_eq!(rookie.score, 100);
    }

    #[test]
    fn bonuses_are_itemized_and_additive() {
        let official = grid(20);
        let facts = evaluate_accuracy(&official, &official);
        let calc = calculate_rating(&facts, 1000, 0);

        assert_eq!(calc.breakdown.base, 50);
        assert_eq!(calc.breakdown.winner_bonus, WINNER_BONUS);
        assert_eq!(calc.breakdown.podium_bonus, PODIUM_BONUS);
        assert_eq!(calc.breakdown.top_five_bonus, TOP_FIVE_BONUS);
        // Factor 32 leaves the total unscaled.
        assert_eq!(calc.rating_delta, 50 + 15 + 10 + 5);
    }

    #[test]
    fn rating_stays_inside_bounds_under_extreme_deltas() {
        assert_eq!(apply_rating_delta(100, -10_000), RATING_FLOOR);
        assert_eq!(apply_rating_delta(100, 10_000), RATING_CEILING);
        assert_eq!(apply_rating_delta(3000, 10_000), RATING_CEILING);
        assert_eq!(apply_rating_delta(3000, -10_000), RATING_FLOOR);
        assert_eq!(apply_rating_delta(1500, 25), 1525);
    }

    #[test]
    fn validation_names_each_defect() {
        let ok = grid(20);
        assert!(validate_ordering(&ok, 20).is_ok());

        let short = grid(19);
        assert!(validate_ordering(&short, 20).unwrap_err().contains("all 20"));

        let mut dup_position = grid(20);
        dup_position[1].position = 1;
        assert!(validate_ordering(&dup_position, 20)
            .unwrap_err()
            .contains("duplicate position"));

        let mut dup_entrant = grid(20);
        dup_entrant[1].entrant_id = "d01".to_string();
        assert!(validate_ordering(&dup_entrant, 20)
            .unwrap_err()
            .contains("more than once"));

        let mut out_of_range = grid(20);
        out_of_range[0].position = 21;
        assert!(validate_ordering(&out_of_range, 20)
            .unwrap_err()
            .contains("outside"));
    }

    fn shuffled_positions() -> impl Strategy<Value = Vec<i32>> {
        (2usize..=20)
            .prop_flat_map(|n| Just((1..=n as i32).collect::<Vec<i32>>()).prop_shuffle())
    }

    proptest! {
        #[test]
        fn accuracy_is_bounded_for_any_permutation(positions in shuffled_positions()) {
            let n = positions.len();
            let official = grid(n);
            let predicted = grid_with_positions(&positions);

            let facts = evaluate_accuracy(&predicted, &official);

            prop_assert!(facts.correlation >= -1.0 - 1e-9);
            prop_assert!(facts.correlation <= 1.0 + 1e-9);
            prop_assert!(facts.accuracy >= -1e-9);
            prop_assert!(facts.accuracy <= 100.0 + 1e-9);
            prop_assert!((0..=5).contains(&facts.top_five_correct));
        }

        #[test]
        fn delta_matches_breakdown_for_any_permutation(
            positions in shuffled_positions(),
            prediction_count in 0i32..200,
        ) {
            let n = positions.len();
            let official = grid(n);
            let predicted = grid_with_positions(&positions);

            let facts = evaluate_accuracy(&predicted, &official);
            let calc = calculate_rating(&facts, 1000, prediction_count);

            let total = calc.breakdown.base
                + calc.breakdown.winner_bonus
                + calc.breakdown.podium_bonus
                + calc.breakdown.top_five_bonus;
            let factor = experience_factor(prediction_count);
            let expected = (f64::from(total) * f64::from(factor) / 32.0).round() as i32;

            prop_assert_eq!(calc.rating_delta, expected);
            prop_assert_eq!(calc.score, facts.accuracy.round() as i32);
            prop_assert!(calc.score >= 0);
        }

        #[test]
        fn applied_rating_never_escapes_bounds(
            current in RATING_FLOOR..=RATING_CEILING,
            delta in -10_000i32..=10_000,
        ) {
            let next = apply_rating_delta(current, delta);
            prop_assert!((RATING_FLOOR..=RATING_CEILING).contains(&next));
        }
    }
}
