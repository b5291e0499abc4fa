// Result sheets: creation with snapshot points, validation, and persistence
// of per-race practice / qualifying / race slates.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;

use crate::error::ResultError;
use crate::models::{
    now_timestamp, result_doc_id, results_collection, DocumentModel, RaceResult, SlateEntry,
    Tournament, TournamentStatus, TOURNAMENTS,
};
use crate::store::{self, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlateKind {
    Practice,
    Qualy,
    Race,
}

impl SlateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlateKind::Practice => "practice",
            SlateKind::Qualy => "qualy",
            SlateKind::Race => "race",
        }
    }
}

impl RaceResult {
    pub fn slate(&self, kind: SlateKind) -> &[SlateEntry] {
        match kind {
            SlateKind::Practice => &self.practice,
            SlateKind::Qualy => &self.qualy,
            SlateKind::Race => &self.standings,
        }
    }

    pub fn slate_mut(&mut self, kind: SlateKind) -> &mut Vec<SlateEntry> {
        match kind {
            SlateKind::Practice => &mut self.practice,
            SlateKind::Qualy => &mut self.qualy,
            SlateKind::Race => &mut self.standings,
        }
    }

    /// Put a pilot in the row for `position`. Returns false when the slate
    /// has no such row.
    pub fn assign(&mut self, kind: SlateKind, position: u32, user_id: &str, nickname: &str) -> bool {
        let Some(index) = position.checked_sub(1) else {
            return false;
        };
        let Some(row) = self.slate_mut(kind).get_mut(index as usize) else {
            return false;
        };
        row.user_id = Some(user_id.to_string());
        row.nickname = nickname.to_string();
        true
    }
}

/// An empty sheet for one race: one row per pilot in every slate. Race rows
/// carry the points for their position as configured right now; later
/// changes to the points table do not touch them.
pub fn blank_sheet(tournament: &Tournament, race_id: u32) -> Result<RaceResult, ResultError> {
    if tournament.race(race_id).is_none() {
        return Err(ResultError::RaceNotFound {
            tournament_id: tournament.id.clone(),
            race_id,
        });
    }

    let positions = 1..=tournament.config.pilot_count;
    let timed = |position| SlateEntry {
        position,
        time: Some(String::new()),
        ..Default::default()
    };

    Ok(RaceResult {
        tournament_id: tournament.id.clone(),
        race_id,
        practice: positions.clone().map(timed).collect(),
        qualy: positions.clone().map(timed).collect(),
        standings: positions
            .map(|position| SlateEntry {
                position,
                points: Some(tournament.points_for_position(position)),
                ..Default::default()
            })
            .collect(),
        created_at: None,
        updated_at: None,
    })
}

/// Check the structural rules of a submitted sheet: every row sits at
/// index `position - 1`, a pilot appears at most once per slate, and only
/// race rows carry points.
pub fn validate_sheet(sheet: &RaceResult) -> Result<(), ResultError> {
    for kind in [SlateKind::Practice, SlateKind::Qualy, SlateKind::Race] {
        let mut seen = HashSet::new();
        for (index, row) in sheet.slate(kind).iter().enumerate() {
            if row.position as usize != index + 1 {
                return Err(ResultError::InvalidSheet(format!(
                    "{} row {} has position {}",
                    kind.as_str(),
                    index + 1,
                    row.position
                )));
            }
            if let Some(pilot) = row.pilot() {
                if !seen.insert(pilot) {
                    return Err(ResultError::InvalidSheet(format!(
                        "pilot {pilot} appears twice in {}",
                        kind.as_str()
                    )));
                }
            }
            if kind != SlateKind::Race && row.points.is_some() {
                return Err(ResultError::InvalidSheet(format!(
                    "{} rows do not carry points",
                    kind.as_str()
                )));
            }
        }
    }
    Ok(())
}

async fn require_tournament(
    store: &dyn DocumentStore,
    tournament_id: &str,
) -> Result<Tournament, ResultError> {
    store::fetch(store, TOURNAMENTS, tournament_id)
        .await?
        .ok_or_else(|| ResultError::TournamentNotFound(tournament_id.to_string()))
}

/// Every result sheet recorded for a tournament.
pub async fn load_results(
    store: &dyn DocumentStore,
    tournament_id: &str,
) -> Result<Vec<RaceResult>, ResultError> {
    Ok(store::fetch_all(store, &results_collection(tournament_id)).await?)
}

/// The stored sheet for a race, or a blank one when nothing was entered yet.
pub async fn sheet_or_blank(
    store: &dyn DocumentStore,
    tournament_id: &str,
    race_id: u32,
) -> Result<RaceResult, ResultError> {
    let tournament = require_tournament(store, tournament_id).await?;
    let stored: Option<RaceResult> = store::fetch(
        store,
        &results_collection(tournament_id),
        &result_doc_id(race_id),
    )
    .await?;
    match stored {
        Some(sheet) => Ok(sheet),
        None => blank_sheet(&tournament, race_id),
    }
}

/// Hold a submitted sheet to the shape of `baseline`: every slate keeps its
/// length, and race rows keep the points snapshotted when the sheet was
/// first created.
fn conform_to(sheet: &mut RaceResult, baseline: &RaceResult) -> Result<(), ResultError> {
    for kind in [SlateKind::Practice, SlateKind::Qualy, SlateKind::Race] {
        let expected = baseline.slate(kind).len();
        let got = sheet.slate(kind).len();
        if got != expected {
            return Err(ResultError::InvalidSheet(format!(
                "{} has {got} rows, expected {expected}",
                kind.as_str()
            )));
        }
    }
    for (row, base) in sheet.standings.iter_mut().zip(&baseline.standings) {
        row.points = base.points;
    }
    Ok(())
}

/// Store a sheet for one race and move the tournament's round counter
/// along. An upcoming tournament becomes active with its first result and
/// finished once every race has one.
pub async fn save_sheet(
    store: &dyn DocumentStore,
    tournament_id: &str,
    race_id: u32,
    mut sheet: RaceResult,
) -> Result<RaceResult, ResultError> {
    let tournament = require_tournament(store, tournament_id).await?;
    if tournament.race(race_id).is_none() {
        return Err(ResultError::RaceNotFound {
            tournament_id: tournament_id.to_string(),
            race_id,
        });
    }
    validate_sheet(&sheet)?;

    let collection = results_collection(tournament_id);
    let doc_id = result_doc_id(race_id);
    let existing: Option<RaceResult> = store::fetch(store, &collection, &doc_id).await?;
    let created_at = existing.as_ref().and_then(|e| e.created_at.clone());
    let baseline = match existing {
        Some(sheet) => sheet,
        None => blank_sheet(&tournament, race_id)?,
    };
    conform_to(&mut sheet, &baseline)?;

    let now = now_timestamp();
    sheet.tournament_id = tournament_id.to_string();
    sheet.race_id = race_id;
    sheet.created_at = created_at.or_else(|| Some(now.clone()));
    sheet.updated_at = Some(now);
    store
        .set_document(&collection, &doc_id, sheet.to_data()?)
        .await?;
    tracing::info!("Stored results for race {race_id} of tournament {tournament_id}");

    // Sheets left over from races removed in a later edit do not count.
    let scored = store::fetch_all::<RaceResult>(store, &collection)
        .await?
        .iter()
        .filter(|r| tournament.race(r.race_id).is_some())
        .count();
    let status = if scored >= tournament.config.races.len() {
        TournamentStatus::Finished
    } else if tournament.status == TournamentStatus::Upcoming {
        TournamentStatus::Active
    } else {
        tournament.status
    };
    store
        .update_document(
            TOURNAMENTS,
            tournament_id,
            json!({ "currentRound": scored, "status": status }),
        )
        .await?;

    Ok(sheet)
}
