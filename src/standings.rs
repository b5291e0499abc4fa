// Standings aggregation: folds race-slate entries into per-tournament pilot
// standings and per-pilot career statistics. Pure and synchronous; callers
// re-run it from scratch whenever the underlying results change.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::models::{RaceResult, SlateEntry, Tournament};

/// One pilot's cumulative row in a tournament.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TournamentStanding {
    pub user_id: String,
    pub nickname: String,
    /// Sum of per-race points. Wider than a single entry's points so that
    /// large custom tables cannot overflow it.
    pub points: u64,
    pub wins: u32,
    pub podiums: u32,
    pub races: u32,
}

impl TournamentStanding {
    fn record(&mut self, entry: &SlateEntry) {
        if !entry.nickname.is_empty() {
            self.nickname = entry.nickname.clone();
        }
        self.points = self
            .points
            .saturating_add(u64::from(entry.points.unwrap_or(0)));
        self.races = self.races.saturating_add(1);
        if entry.position == 1 {
            self.wins = self.wins.saturating_add(1);
        }
        if (1..=3).contains(&entry.position) {
            self.podiums = self.podiums.saturating_add(1);
        }
    }
}

/// Cross-tournament statistics for one pilot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CareerStats {
    pub total_races: u32,
    pub wins: u32,
    pub podiums: u32,
    pub win_rate: String,
    pub tournament_wins: u32,
    pub tournaments_entered: u32,
}

impl Default for CareerStats {
    fn default() -> Self {
        Self {
            total_races: 0,
            wins: 0,
            podiums: 0,
            win_rate: format_win_rate(0, 0),
            tournament_wins: 0,
            tournaments_entered: 0,
        }
    }
}

/// Standings plus the leader, as served to tournament views.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StandingsView {
    pub standings: Vec<TournamentStanding>,
    pub winner: Option<String>,
    pub races_scored: usize,
}

/// Ranking order: points desc, then wins desc, podiums desc, fewer races,
/// and finally user id so that the order is total.
pub fn ranking_order(a: &TournamentStanding, b: &TournamentStanding) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| b.wins.cmp(&a.wins))
        .then_with(|| b.podiums.cmp(&a.podiums))
        .then_with(|| a.races.cmp(&b.races))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Fold every race slate of one tournament into ranked standings.
///
/// Results are folded in race order regardless of input order, so the
/// nickname shown for a pilot is the last non-empty one in calendar order.
/// Entries without a user id are skipped.
pub fn compute_tournament_standings(results: &[RaceResult]) -> Vec<TournamentStanding> {
    let mut ordered: Vec<&RaceResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.race_id);

    let mut rows: HashMap<&str, TournamentStanding> = HashMap::new();
    for result in ordered {
        for entry in &result.standings {
            let Some(user_id) = entry.pilot() else {
                continue;
            };
            rows.entry(user_id)
                .or_insert_with(|| TournamentStanding {
                    user_id: user_id.to_string(),
                    ..Default::default()
                })
                .record(entry);
        }
    }

    let mut standings: Vec<TournamentStanding> = rows.into_values().collect();
    standings.sort_by(ranking_order);
    metrics::STANDINGS_COMPUTED_TOTAL.inc();
    standings
}

/// The leader of a tournament. A tournament without any result document has
/// no winner.
pub fn tournament_winner(results: &[RaceResult]) -> Option<TournamentStanding> {
    if results.is_empty() {
        return None;
    }
    compute_tournament_standings(results).into_iter().next()
}

pub fn summarize(results: &[RaceResult]) -> StandingsView {
    let standings = compute_tournament_standings(results);
    let winner = if results.is_empty() {
        None
    } else {
        standings.first().map(|s| s.user_id.clone())
    };
    StandingsView {
        standings,
        winner,
        races_scored: results.len(),
    }
}

/// `"0%"` with no races, otherwise the percentage rounded to one decimal
/// (`"50%"`, `"33.3%"`).
pub fn format_win_rate(wins: u32, total_races: u32) -> String {
    if total_races == 0 {
        return "0%".to_string();
    }
    let pct = (1000.0 * wins as f64 / total_races as f64).round() / 10.0;
    format!("{pct}%")
}

/// Career statistics for `pilot_id` across every tournament it owns or
/// participates in. Tournaments it has no part in are ignored, as are
/// duplicate tournament ids.
pub fn compute_career_stats(
    pilot_id: &str,
    tournaments: &[Tournament],
    results_by_tournament: &HashMap<String, Vec<RaceResult>>,
) -> CareerStats {
    let mut stats = CareerStats::default();
    let mut seen = HashSet::new();

    for tournament in tournaments {
        if !tournament.involves(pilot_id) || !seen.insert(tournament.id.as_str()) {
            continue;
        }
        stats.tournaments_entered += 1;

        let results = results_by_tournament
            .get(&tournament.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for result in results {
            let Some(entry) = result
                .standings
                .iter()
                .find(|e| e.pilot() == Some(pilot_id))
            else {
                continue;
            };
            stats.total_races = stats.total_races.saturating_add(1);
            if entry.position == 1 {
                stats.wins = stats.wins.saturating_add(1);
            }
            if (1..=3).contains(&entry.position) {
                stats.podiums = stats.podiums.saturating_add(1);
            }
        }

        if tournament_winner(results).is_some_and(|w| w.user_id == pilot_id) {
            stats.tournament_wins += 1;
        }
    }

    stats.win_rate = format_win_rate(stats.wins, stats.total_races);
    stats
}
