//! Tally engine: winner selection, rating aggregates and leaderboard ranking.
//!
//! Everything here is a pure function of its arguments. Callers persist the
//! results inside their own transaction.

use crate::domain::{
    Aggregate, LeaderboardEntry, LeaderboardPage, LeaderboardRow, Proposal, Rating, Vote,
    VoteTally, WinnerResult,
};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Count live votes per proposal and pick the winner.
///
/// The top count wins; a tie goes to the proposal with the lowest ordinal.
/// Votes naming a proposal outside `proposals` are ignored, and if a user
/// appears twice only their latest vote counts.
pub fn determine_winner(votes: &[Vote], proposals: &[Proposal]) -> WinnerResult {
    let mut ballot: Vec<&Proposal> = proposals.iter().collect();
    ballot.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.id.cmp(&b.id)));

    let mut latest: HashMap<i64, &Vote> = HashMap::new();
    for vote in votes {
        latest
            .entry(vote.user_id)
            .and_modify(|current| {
                if (vote.cast_at, vote.proposal_id) > (current.cast_at, current.proposal_id) {
                    *current = vote;
                }
            })
            .or_insert(vote);
    }

    let mut counts: HashMap<uuid::Uuid, u32> = HashMap::new();
    for vote in latest.values() {
        *counts.entry(vote.proposal_id).or_default() += 1;
    }

    let tally: Vec<VoteTally> = ballot
        .iter()
        .map(|p| VoteTally {
            proposal_id: p.id,
            ordinal: p.ordinal,
            votes: counts.get(&p.id).copied().unwrap_or(0),
        })
        .collect();

    let total_votes = tally.iter().map(|t| t.votes).sum();
    let top = tally.iter().map(|t| t.votes).max().unwrap_or(0);

    if total_votes == 0 {
        return WinnerResult {
            winner: None,
            tally,
            total_votes,
            tied: false,
        };
    }

    let mut leaders = tally.iter().filter(|t| t.votes == top);
    let winner = leaders.next().map(|t| t.proposal_id);
    let tied = leaders.next().is_some();

    WinnerResult {
        winner,
        tally,
        total_votes,
        tied,
    }
}

/// Full recompute of mean and count over a proposal's live ratings.
///
/// The mean is rounded to two decimals, the precision the club rating is
/// shown and stored with.
pub fn recompute_aggregate(ratings: &[Rating]) -> Aggregate {
    if ratings.is_empty() {
        return Aggregate::EMPTY;
    }
    let sum: u32 = ratings.iter().map(|r| u32::from(r.score.value())).sum();
    let count = ratings.len() as u32;
    let mean = f64::from(sum) / f64::from(count);

    Aggregate {
        mean: Some((mean * 100.0).round() / 100.0),
        count,
    }
}

/// Rank, filter and page leaderboard entries.
///
/// Order: mean descending with unrated entries last, then rating count
/// descending, then title ascending ignoring case. Proposal id breaks any
/// remaining tie so pages never overlap. `page` is 0-based.
pub fn rank_leaderboard(
    entries: &[LeaderboardEntry],
    page: usize,
    page_size: usize,
    title_filter: Option<&str>,
) -> LeaderboardPage {
    let needle = title_filter
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_lowercase);

    let mut ranked: Vec<&LeaderboardEntry> = entries
        .iter()
        .filter(|e| match &needle {
            Some(needle) => e.title.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .collect();
    ranked.sort_by(|a, b| compare_entries(a, b));

    let total = ranked.len();
    let offset = page.saturating_mul(page_size);
    let rows = ranked
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(page_size)
        .map(|(index, entry)| LeaderboardRow {
            rank: index + 1,
            entry: entry.clone(),
        })
        .collect();

    LeaderboardPage {
        page,
        page_size,
        total,
        rows,
    }
}

fn compare_entries(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    let by_mean = match (a.aggregate.mean, b.aggregate.mean) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_mean
        .then_with(|| b.aggregate.count.cmp(&a.aggregate.count))
        .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        .then_with(|| a.proposal_id.cmp(&b.proposal_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CatalogRef, Score};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn proposal(session_id: Uuid, ordinal: i32, title: &str) -> Proposal {
        Proposal {
            id: Uuid::new_v4(),
            session_id,
            catalog_ref: CatalogRef::new(format!("{}", 100 + ordinal)).unwrap(),
            catalog_url: None,
            title: title.to_string(),
            proposed_by: ordinal as i64,
            slot: 1,
            ordinal,
            created_at: Utc::now(),
            aggregate: Aggregate::EMPTY,
        }
    }

    fn vote(p: &Proposal, user: i64) -> Vote {
        Vote::new(p.session_id, user, p.id, Utc::now())
    }

    fn rating(proposal_id: Uuid, user: i64, score: u8) -> Rating {
        Rating {
            proposal_id,
            session_id: Uuid::nil(),
            user_id: user,
            score: Score::new(score).unwrap(),
            rated_at: Utc::now(),
        }
    }

    fn entry(title: &str, mean: Option<f64>, count: u32) -> LeaderboardEntry {
        LeaderboardEntry {
            proposal_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            group_id: Uuid::nil(),
            title: title.to_string(),
            catalog_ref: "1".to_string(),
            proposed_by: 1,
            aggregate: Aggregate { mean, count },
        }
    }

    #[test]
    fn test_majority_wins() {
        let session = Uuid::new_v4();
        let a = proposal(session, 1, "Alien");
        let b = proposal(session, 2, "Brazil");
        let votes = vec![vote(&a, 1), vote(&b, 2), vote(&b, 3)];

        let result = determine_winner(&votes, &[a.clone(), b.clone()]);

        assert_eq!(result.winner, Some(b.id));
        assert_eq!(result.total_votes, 3);
        assert!(!result.tied);
        assert_eq!(result.tally[0].votes, 1);
        assert_eq!(result.tally[1].votes, 2);
    }

    #[test]
    fn test_tie_goes_to_lowest_ordinal() {
        let session = Uuid::new_v4();
        let a = proposal(session, 1, "Alien");
        let b = proposal(session, 2, "Brazil");
        let votes = vec![vote(&a, 1), vote(&a, 2), vote(&b, 3), vote(&b, 4)];

        let result = determine_winner(&votes, &[a.clone(), b.clone()]);
        assert_eq!(result.winner, Some(a.id));
        assert!(result.tied);

        // Input order must not matter.
        let mut reversed_votes = votes.clone();
        reversed_votes.reverse();
        let reversed = determine_winner(&reversed_votes, &[b, a.clone()]);
        assert_eq!(reversed.winner, Some(a.id));
        assert_eq!(reversed, result);
    }

    #[test]
    fn test_no_votes_leaves_winner_undefined() {
        let session = Uuid::new_v4();
        let a = proposal(session, 1, "Alien");
        let b = proposal(session, 2, "Brazil");

        let result = determine_winner(&[], &[a, b]);

        assert_eq!(result.winner, None);
        assert_eq!(result.total_votes, 0);
        assert_eq!(result.tally.len(), 2);
    }

    #[test]
    fn test_only_latest_vote_per_user_counts() {
        let session = Uuid::new_v4();
        let a = proposal(session, 1, "Alien");
        let b = proposal(session, 2, "Brazil");
        let mut first = vote(&a, 7);
        first.cast_at = Utc::now() - Duration::minutes(5);
        let second = vote(&b, 7);

        let result = determine_winner(&[second, first], &[a, b.clone()]);

        assert_eq!(result.total_votes, 1);
        assert_eq!(result.winner, Some(b.id));
    }

    #[test]
    fn test_votes_for_foreign_proposals_are_ignored() {
        let session = Uuid::new_v4();
        let a = proposal(session, 1, "Alien");
        let stray = proposal(Uuid::new_v4(), 1, "Elsewhere");

        let result = determine_winner(&[vote(&stray, 1)], &[a]);

        assert_eq!(result.total_votes, 0);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn test_aggregate_mean_and_count() {
        let id = Uuid::new_v4();
        let ratings = vec![rating(id, 1, 8), rating(id, 2, 9), rating(id, 3, 7), rating(id, 4, 10)];

        let aggregate = recompute_aggregate(&ratings);

        assert_eq!(aggregate.mean, Some(8.5));
        assert_eq!(aggregate.count, 4);
    }

    #[test]
    fn test_aggregate_rounds_to_two_decimals() {
        let id = Uuid::new_v4();
        let ratings = [rating(id, 1, 7), rating(id, 2, 8), rating(id, 3, 8)];
        let aggregate = recompute_aggregate(&ratings);
        assert_eq!(aggregate.mean, Some(7.67));
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let id = Uuid::new_v4();
        let ratings = vec![rating(id, 1, 3), rating(id, 2, 6)];
        assert_eq!(recompute_aggregate(&ratings), recompute_aggregate(&ratings));
    }

    #[test]
    fn test_aggregate_without_ratings_is_undefined() {
        let aggregate = recompute_aggregate(&[]);
        assert_eq!(aggregate.mean, None);
        assert_eq!(aggregate.count, 0);
    }

    #[test]
    fn test_leaderboard_ordering() {
        let entries = vec![
            entry("unrated", None, 0),
            entry("Zodiac", Some(8.0), 3),
            entry("alien", Some(8.0), 3),
            entry("Heat", Some(8.0), 5),
            entry("Top", Some(9.5), 2),
        ];

        let page = rank_leaderboard(&entries, 0, 10, None);
        let titles: Vec<&str> = page.rows.iter().map(|r| r.entry.title.as_str()).collect();

        assert_eq!(titles, ["Top", "Heat", "alien", "Zodiac", "unrated"]);
        assert_eq!(page.rows[0].rank, 1);
        assert_eq!(page.total, 5);
    }

    #[test]
    fn test_leaderboard_filter_is_case_insensitive_substring() {
        let entries = vec![
            entry("The Matrix", Some(9.0), 4),
            entry("Matrix Reloaded", Some(6.0), 4),
            entry("Heat", Some(8.0), 5),
        ];

        let page = rank_leaderboard(&entries, 0, 10, Some("  MATRIX "));

        assert_eq!(page.total, 2);
        assert_eq!(page.rows[0].entry.title, "The Matrix");
        assert_eq!(page.rows[1].rank, 2);
    }

    #[test]
    fn test_leaderboard_pages_are_contiguous_and_disjoint() {
        let entries: Vec<LeaderboardEntry> = (0..27)
            .map(|i| entry(&format!("Movie {i:02}"), Some(f64::from(i % 5) + 5.0), (i % 3) as u32))
            .collect();

        let first = rank_leaderboard(&entries, 0, 10, None);
        let second = rank_leaderboard(&entries, 1, 10, None);
        let both = rank_leaderboard(&entries, 0, 20, None);

        let joined: Vec<_> = first.rows.iter().chain(second.rows.iter()).cloned().collect();
        assert_eq!(joined, both.rows);
        assert_eq!(first.total, 27);
        assert_eq!(first.total_pages(), 3);

        let third = rank_leaderboard(&entries, 2, 10, None);
        assert_eq!(third.rows.len(), 7);
        assert_eq!(third.rows[0].rank, 21);
    }

    #[test]
    fn test_leaderboard_page_past_the_end_is_empty() {
        let entries = vec![entry("Heat", Some(8.0), 5)];
        let page = rank_leaderboard(&entries, 3, 10, None);
        assert!(page.rows.is_empty());
        assert_eq!(page.total, 1);

        let zero = rank_leaderboard(&entries, 0, 0, None);
        assert!(zero.rows.is_empty());
        assert_eq!(zero.total_pages(), 0);
    }
}
