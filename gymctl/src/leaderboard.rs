//! Ranking of workout results.
//!
//! Rx results always rank above scaled ones. Within each group `time` workouts rank the lowest
//! score first and every other scoring type ranks the highest first. Equal scores in the same
//! group share a rank and the following rank is skipped (1, 1, 3).

use crate::api::models::workouts::{LeaderboardEntry, WorkoutScoring};
use crate::db::models::workouts::RankedResultDBResponse;
use std::cmp::Ordering;

fn compare(scoring: WorkoutScoring, a: &RankedResultDBResponse, b: &RankedResultDBResponse) -> Ordering {
    // true sorts before false
    let by_rx = b.rx.cmp(&a.rx);
    let by_score = if scoring.lower_is_better() {
        a.score.cmp(&b.score)
    } else {
        b.score.cmp(&a.score)
    };
    by_rx.then(by_score)
}

pub fn rank(scoring: WorkoutScoring, mut results: Vec<RankedResultDBResponse>) -> Vec<LeaderboardEntry> {
    results.sort_by(|a, b| {
        compare(scoring, a, b)
            .then_with(|| a.last_name.cmp(&b.last_name))
            .then_with(|| a.first_name.cmp(&b.first_name))
            .then_with(|| a.member_id.cmp(&b.member_id))
    });

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(results.len());
    let mut previous: Option<&RankedResultDBResponse> = None;
    let mut rank = 0;
    for (position, result) in results.iter().enumerate() {
        let tied = previous.is_some_and(|p| compare(scoring, p, result) == Ordering::Equal);
        if !tied {
            rank = position + 1;
        }
        entries.push(LeaderboardEntry {
            rank,
            member_id: result.member_id,
            first_name: result.first_name.clone(),
            last_name: result.last_name.clone(),
            score: result.score,
            rx: result.rx,
            notes: result.notes.clone(),
        });
        previous = Some(result);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn result(name: &str, score: i64, rx: bool) -> RankedResultDBResponse {
        RankedResultDBResponse {
            member_id: Uuid::new_v4(),
            first_name: name.to_string(),
            last_name: "Athlete".to_string(),
            score: Decimal::new(score, 0),
            rx,
            notes: None,
        }
    }

    fn summary(entries: &[LeaderboardEntry]) -> Vec<(usize, &str)> {
        entries.iter().map(|e| (e.rank, e.first_name.as_str())).collect()
    }

    #[test]
    fn test_time_sorts_ascending() {
        let entries = rank(
            WorkoutScoring::Time,
            vec![result("slow", 400, true), result("fast", 180, true), result("mid", 300, true)],
        );
        assert_eq!(summary(&entries), vec![(1, "fast"), (2, "mid"), (3, "slow")]);
    }

    #[test]
    fn test_reps_sort_descending() {
        let entries = rank(
            WorkoutScoring::Reps,
            vec![result("low", 50, true), result("high", 120, true), result("mid", 90, true)],
        );
        assert_eq!(summary(&entries), vec![(1, "high"), (2, "mid"), (3, "low")]);
    }

    #[test]
    fn test_rx_ranks_above_scaled() {
        let entries = rank(
            WorkoutScoring::Time,
            vec![result("scaled-fast", 100, false), result("rx-slow", 500, true)],
        );
        assert_eq!(summary(&entries), vec![(1, "rx-slow"), (2, "scaled-fast")]);
    }

    #[test]
    fn test_ties_share_rank_and_skip() {
        let entries = rank(
            WorkoutScoring::Load,
            vec![
                result("b", 100, true),
                result("a", 100, true),
                result("c", 90, true),
                result("d", 100, false),
            ],
        );
        assert_eq!(summary(&entries), vec![(1, "a"), (1, "b"), (3, "c"), (4, "d")]);
    }

    #[test]
    fn test_empty() {
        assert!(rank(WorkoutScoring::Points, vec![]).is_empty());
    }
}
