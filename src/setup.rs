// Competition setup engine: the in-progress configuration of a tournament
// being created or edited. Owns the derived-array invariants (points table
// sized to the pilot count, race list sized to the race count) and assembles
// the document handed to the store on save.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{SetupError, StoreError};
use crate::metrics;
use crate::models::{
    now_timestamp, DocumentModel, EventDetails, RaceConfig, Tournament, TournamentConfig,
    TournamentStatus, TOURNAMENTS,
};
use crate::store::{self, DocumentStore};

pub const MIN_PILOTS: u32 = 2;
pub const MAX_PILOTS: u32 = 50;
pub const DEFAULT_PILOTS: u32 = 24;
pub const MIN_RACES: usize = 1;

/// Modern F1 scoring for the top ten finishers.
pub const F1_MODERN_POINTS: [u32; 10] = [25, 18, 15, 12, 10, 8, 6, 4, 2, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStage {
    Details,
    Configuration,
}

impl SetupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Details => "details",
            SetupStage::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointsPreset {
    #[serde(rename = "F1 Moderno")]
    F1Modern,
    Custom,
}

/// A single-field edit of one race.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum RaceField {
    TrackId(String),
    CarId(String),
    PracticeTime(String),
    QualyTime(String),
    Laps(u32),
}

/// Grow or shrink `items` to `len`. Retained elements are left untouched;
/// new ones come from `fresh(index)`.
pub fn resize_preserving<T>(items: &mut Vec<T>, len: usize, mut fresh: impl FnMut(usize) -> T) {
    if len <= items.len() {
        items.truncate(len);
        return;
    }
    while items.len() < len {
        let index = items.len();
        items.push(fresh(index));
    }
}

/// Document assembled by [`CompetitionSetup::begin_save`], ready to persist.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Set when editing an existing tournament.
    pub tournament_id: Option<String>,
    pub tournament: Tournament,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionSetup {
    stage: SetupStage,
    tournament_id: Option<String>,
    details: EventDetails,
    pilot_count: u32,
    invited_users: BTreeSet<String>,
    points_system: Vec<u32>,
    races: Vec<RaceConfig>,
    status: TournamentStatus,
    saving: bool,
    #[serde(skip)]
    original: Option<Tournament>,
}

/// Resize the race list. Races added past the end are numbered after the
/// highest id already present, so ids stay unique even when the persisted
/// list has gaps.
fn resize_races(races: &mut Vec<RaceConfig>, count: usize) {
    let len = races.len();
    let last = races.iter().map(|r| r.id).max().unwrap_or(0);
    resize_preserving(races, count, |i| RaceConfig::blank(last + (i - len) as u32 + 1));
}

impl Default for CompetitionSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl CompetitionSetup {
    pub fn new() -> Self {
        Self {
            stage: SetupStage::Details,
            tournament_id: None,
            details: EventDetails::default(),
            pilot_count: DEFAULT_PILOTS,
            invited_users: BTreeSet::new(),
            points_system: vec![0; DEFAULT_PILOTS as usize],
            races: vec![RaceConfig::blank(1)],
            status: TournamentStatus::Upcoming,
            saving: false,
            original: None,
        }
    }

    /// Seed every field from a persisted tournament. No resize runs while
    /// seeding; a legacy document whose arrays disagree with its counts is
    /// reconciled once afterwards.
    pub fn from_tournament(tournament: Tournament) -> Self {
        let mut setup = Self {
            stage: SetupStage::Details,
            tournament_id: Some(tournament.id.clone()),
            details: tournament.details.clone(),
            pilot_count: tournament.config.pilot_count,
            invited_users: tournament.config.invited_users.clone(),
            points_system: tournament.config.points_system.clone(),
            races: tournament.config.races.clone(),
            status: tournament.status,
            saving: false,
            original: Some(tournament),
        };

        setup.pilot_count = setup.pilot_count.clamp(MIN_PILOTS, MAX_PILOTS);
        if setup.points_system.len() != setup.pilot_count as usize {
            tracing::warn!(
                "Tournament {:?} has {} point slots for {} pilots; reconciling",
                setup.tournament_id,
                setup.points_system.len(),
                setup.pilot_count
            );
            resize_preserving(&mut setup.points_system, setup.pilot_count as usize, |_| 0);
        }
        if setup.races.len() < MIN_RACES {
            resize_races(&mut setup.races, MIN_RACES);
        }
        setup
    }

    /// Load a persisted tournament for editing.
    pub async fn load(store: &dyn DocumentStore, tournament_id: &str) -> Result<Self, SetupError> {
        let tournament: Tournament = store::fetch(store, TOURNAMENTS, tournament_id)
            .await?
            .ok_or_else(|| SetupError::NotFound(tournament_id.to_string()))?;
        Ok(Self::from_tournament(tournament))
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn stage(&self) -> SetupStage {
        self.stage
    }

    pub fn tournament_id(&self) -> Option<&str> {
        self.tournament_id.as_deref()
    }

    pub fn details(&self) -> &EventDetails {
        &self.details
    }

    pub fn pilot_count(&self) -> u32 {
        self.pilot_count
    }

    pub fn points_system(&self) -> &[u32] {
        &self.points_system
    }

    pub fn races(&self) -> &[RaceConfig] {
        &self.races
    }

    pub fn race_count(&self) -> usize {
        self.races.len()
    }

    pub fn invited_users(&self) -> &BTreeSet<String> {
        &self.invited_users
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    // ── Stage transitions ─────────────────────────────────────────────

    fn require_stage(&self, stage: SetupStage) -> Result<(), SetupError> {
        if self.stage != stage {
            return Err(SetupError::WrongStage(self.stage.as_str()));
        }
        Ok(())
    }

    fn validate_details(&self) -> Result<(), SetupError> {
        if self.details.name.trim().is_empty() {
            return Err(SetupError::MissingName);
        }
        match &self.details.simulator {
            Some(sim) if !sim.id.is_empty() => Ok(()),
            _ => Err(SetupError::MissingSimulator),
        }
    }

    /// Move from details to configuration once the event has a name and a
    /// simulator.
    pub fn advance(&mut self) -> Result<SetupStage, SetupError> {
        if self.stage == SetupStage::Details {
            self.validate_details()?;
            self.stage = SetupStage::Configuration;
        }
        Ok(self.stage)
    }

    pub fn back(&mut self) -> SetupStage {
        self.stage = SetupStage::Details;
        self.stage
    }

    // ── Details stage ─────────────────────────────────────────────────

    pub fn set_details(&mut self, details: EventDetails) -> Result<(), SetupError> {
        self.require_stage(SetupStage::Details)?;
        self.details = details;
        Ok(())
    }

    // ── Configuration stage ───────────────────────────────────────────

    pub fn set_status(&mut self, status: TournamentStatus) {
        self.status = status;
    }

    /// Set the grid size and resize the points table to match.
    pub fn set_pilot_count(&mut self, count: u32) -> Result<(), SetupError> {
        self.require_stage(SetupStage::Configuration)?;
        if !(MIN_PILOTS..=MAX_PILOTS).contains(&count) {
            return Err(SetupError::PilotCountOutOfRange(count));
        }
        self.pilot_count = count;
        resize_preserving(&mut self.points_system, count as usize, |_| 0);
        Ok(())
    }

    /// Set the number of races. New races get the next free ordinal and no
    /// track, car or session times.
    pub fn set_race_count(&mut self, count: usize) -> Result<(), SetupError> {
        self.require_stage(SetupStage::Configuration)?;
        if count < MIN_RACES {
            return Err(SetupError::RaceCountOutOfRange);
        }
        resize_races(&mut self.races, count);
        Ok(())
    }

    /// Invite the user, or withdraw the invitation if already invited.
    /// Returns whether the user is invited afterwards.
    pub fn toggle_invite(&mut self, user_id: &str) -> Result<bool, SetupError> {
        self.require_stage(SetupStage::Configuration)?;
        if self.invited_users.remove(user_id) {
            return Ok(false);
        }
        self.invited_users.insert(user_id.to_string());
        Ok(true)
    }

    pub fn update_race(&mut self, index: usize, field: RaceField) -> Result<(), SetupError> {
        self.require_stage(SetupStage::Configuration)?;
        let race = self
            .races
            .get_mut(index)
            .ok_or(SetupError::RaceIndexOutOfRange(index))?;
        match field {
            RaceField::TrackId(v) => race.track_id = v,
            RaceField::CarId(v) => race.car_id = v,
            RaceField::PracticeTime(v) => race.practice_time = v,
            RaceField::QualyTime(v) => race.qualy_time = v,
            RaceField::Laps(v) => race.laps = v,
        }
        Ok(())
    }

    pub fn set_points(&mut self, index: usize, points: u32) -> Result<(), SetupError> {
        self.require_stage(SetupStage::Configuration)?;
        let slot = self
            .points_system
            .get_mut(index)
            .ok_or(SetupError::PointIndexOutOfRange(index))?;
        *slot = points;
        Ok(())
    }

    /// Replace the points table with a preset, cut or zero-filled to the
    /// current pilot count. `Custom` keeps the current values.
    pub fn apply_preset(&mut self, preset: PointsPreset) -> Result<(), SetupError> {
        self.require_stage(SetupStage::Configuration)?;
        if preset == PointsPreset::F1Modern {
            self.points_system = (0..self.pilot_count as usize)
                .map(|i| F1_MODERN_POINTS.get(i).copied().unwrap_or(0))
                .collect();
        }
        Ok(())
    }

    // ── Save ──────────────────────────────────────────────────────────

    fn assemble(&self, owner_id: &str) -> Tournament {
        let now = now_timestamp();
        let mut tournament = self.original.clone().unwrap_or_else(|| Tournament {
            created_by: owner_id.to_string(),
            created_at: Some(now.clone()),
            ..Default::default()
        });
        tournament.details = self.details.clone();
        tournament.config = TournamentConfig {
            pilot_count: self.pilot_count,
            invited_users: self.invited_users.clone(),
            points_system: self.points_system.clone(),
            races: self.races.clone(),
        };
        tournament.status = self.status;
        tournament.updated_at = Some(now);
        tournament
    }

    /// Validate and assemble the document to persist, marking a save as in
    /// flight. Fails with [`SetupError::SaveInProgress`] if one already is.
    pub fn begin_save(&mut self, owner_id: &str) -> Result<SaveRequest, SetupError> {
        if self.saving {
            metrics::SETUP_SAVES_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(SetupError::SaveInProgress);
        }
        self.validate_details()?;
        if self.points_system.len() != self.pilot_count as usize {
            return Err(SetupError::PilotCountOutOfRange(self.pilot_count));
        }
        if self.races.len() < MIN_RACES {
            return Err(SetupError::RaceCountOutOfRange);
        }
        self.saving = true;
        Ok(SaveRequest {
            tournament_id: self.tournament_id.clone(),
            tournament: self.assemble(owner_id),
        })
    }

    /// Clear the in-flight marker. State is otherwise left as it was, so a
    /// failed save can be retried as is.
    pub fn finish_save(&mut self, outcome: &Result<String, SetupError>) {
        self.saving = false;
        match outcome {
            Ok(id) => self.tournament_id = Some(id.clone()),
            Err(e) => tracing::warn!("Saving tournament setup failed: {e}"),
        }
    }

    pub async fn save(
        &mut self,
        store: &dyn DocumentStore,
        owner_id: &str,
    ) -> Result<String, SetupError> {
        let request = self.begin_save(owner_id)?;
        let outcome = persist(store, &request).await;
        self.finish_save(&outcome);
        outcome
    }
}

/// Write an assembled setup. New tournaments are added; edits merge the
/// configured fields and leave participants and ownership alone.
pub async fn persist(
    store: &dyn DocumentStore,
    request: &SaveRequest,
) -> Result<String, SetupError> {
    match write(store, request).await {
        Ok((label, id)) => {
            metrics::SETUP_SAVES_TOTAL.with_label_values(&[label]).inc();
            Ok(id)
        }
        Err(e) => {
            metrics::SETUP_SAVES_TOTAL.with_label_values(&["failed"]).inc();
            Err(e)
        }
    }
}

async fn write(
    store: &dyn DocumentStore,
    request: &SaveRequest,
) -> Result<(&'static str, String), SetupError> {
    let t = &request.tournament;
    let Some(id) = &request.tournament_id else {
        let id = store.add_document(TOURNAMENTS, t.to_data()?).await?;
        tracing::info!("Created tournament {id} ({})", t.details.name);
        return Ok(("created", id));
    };

    let mut partial = serde_json::to_value(&t.details).map_err(StoreError::from)?;
    if let Some(fields) = partial.as_object_mut() {
        // Cleared optional details must overwrite the stored values.
        for key in ["simulator", "image", "description"] {
            fields.entry(key).or_insert(Value::Null);
        }
        fields.insert("config".into(), json!(t.config));
        fields.insert("status".into(), json!(t.status));
        fields.insert("updatedAt".into(), json!(t.updated_at));
    }
    if !store.update_document(TOURNAMENTS, id, partial).await? {
        return Err(SetupError::NotFound(id.clone()));
    }
    tracing::info!("Updated tournament {id}");
    Ok(("updated", id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SimulatorRef;
    use crate::store::MemoryStore;

    fn details() -> EventDetails {
        EventDetails {
            name: "GT3 Sprint Cup".into(),
            simulator: Some(SimulatorRef {
                id: "acc".into(),
                name: "Assetto Corsa Competizione".into(),
                image: None,
            }),
            ..Default::default()
        }
    }

    fn configuring() -> CompetitionSetup {
        let mut setup = CompetitionSetup::new();
        setup.set_details(details()).unwrap();
        setup.advance().unwrap();
        setup
    }

    #[test]
    fn test_resize_preserving_grow_shrink() {
        let mut v = vec![1, 2, 3];
        resize_preserving(&mut v, 5, |_| 0);
        assert_eq!(v, vec![1, 2, 3, 0, 0]);
        resize_preserving(&mut v, 2, |_| 0);
        assert_eq!(v, vec![1, 2]);
        resize_preserving(&mut v, 2, |_| 9);
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn test_advance_requires_name_and_simulator() {
        let mut setup = CompetitionSetup::new();
        assert!(matches!(setup.advance(), Err(SetupError::MissingName)));

        setup
            .set_details(EventDetails {
                name: "   ".into(),
                ..details()
            })
            .unwrap();
        assert!(matches!(setup.advance(), Err(SetupError::MissingName)));

        setup
            .set_details(EventDetails {
                simulator: None,
                ..details()
            })
            .unwrap();
        assert!(matches!(setup.advance(), Err(SetupError::MissingSimulator)));

        setup.set_details(details()).unwrap();
        assert_eq!(setup.advance().unwrap(), SetupStage::Configuration);
        assert_eq!(setup.back(), SetupStage::Details);
    }

    #[test]
    fn test_configuration_requires_stage() {
        let mut setup = CompetitionSetup::new();
        assert!(matches!(
            setup.set_pilot_count(10),
            Err(SetupError::WrongStage("details"))
        ));
        let mut setup = configuring();
        assert!(matches!(
            setup.set_details(details()),
            Err(SetupError::WrongStage("configuration"))
        ));
    }

    #[test]
    fn test_pilot_count_resize_scenario() {
        let mut setup = configuring();
        setup.set_pilot_count(10).unwrap();
        for i in 0..10 {
            setup.set_points(i, 100 - i as u32).unwrap();
        }

        setup.set_pilot_count(5).unwrap();
        setup.set_pilot_count(12).unwrap();

        let points = setup.points_system();
        assert_eq!(points.len(), 12);
        assert_eq!(&points[..5], &[100, 99, 98, 97, 96]);
        // Shrunk away then regrown: reset, not resurrected.
        assert!(points[5..10].iter().all(|&p| p == 0));
        assert!(points[10..].iter().all(|&p| p == 0));
    }

    #[test]
    fn test_pilot_count_sequences_end_at_final_size() {
        let paths: [&[u32]; 4] = [&[3, 50, 2, 7], &[7], &[20, 20, 20, 7], &[2, 3, 4, 5, 6, 7]];
        for path in paths {
            let mut setup = configuring();
            setup.set_pilot_count(8).unwrap();
            for i in 0..8 {
                setup.set_points(i, i as u32 + 1).unwrap();
            }
            let min_reached = path.iter().copied().min().unwrap().min(8) as usize;
            for &count in path {
                setup.set_pilot_count(count).unwrap();
                assert_eq!(setup.points_system().len(), count as usize);
            }
            assert_eq!(setup.pilot_count(), 7);
            for i in 0..min_reached {
                assert_eq!(setup.points_system()[i], i as u32 + 1);
            }
            for i in min_reached..7 {
                assert_eq!(setup.points_system()[i], 0);
            }
        }
    }

    #[test]
    fn test_pilot_count_bounds() {
        let mut setup = configuring();
        assert!(matches!(
            setup.set_pilot_count(1),
            Err(SetupError::PilotCountOutOfRange(1))
        ));
        assert!(matches!(
            setup.set_pilot_count(51),
            Err(SetupError::PilotCountOutOfRange(51))
        ));
        assert_eq!(setup.pilot_count(), DEFAULT_PILOTS);
        assert_eq!(setup.points_system().len(), DEFAULT_PILOTS as usize);
    }

    #[test]
    fn test_race_count_resize_preserves_configs() {
        let mut setup = configuring();
        setup.set_race_count(3).unwrap();
        setup
            .update_race(1, RaceField::TrackId("monza".into()))
            .unwrap();
        setup.update_race(1, RaceField::Laps(20)).unwrap();

        setup.set_race_count(2).unwrap();
        setup.set_race_count(4).unwrap();

        let races = setup.races();
        assert_eq!(races.len(), 4);
        assert_eq!(races[1].track_id, "monza");
        assert_eq!(races[1].laps, 20);
        assert_eq!(races[2], RaceConfig::blank(3));
        let ids: Vec<u32> = races.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        assert!(matches!(
            setup.set_race_count(0),
            Err(SetupError::RaceCountOutOfRange)
        ));
        assert_eq!(setup.race_count(), 4);
    }

    #[test]
    fn test_new_races_skip_ids_in_use() {
        let mut t = persisted();
        t.config.races = vec![RaceConfig::blank(1), RaceConfig::blank(3)];
        let mut setup = CompetitionSetup::from_tournament(t);
        setup.advance().unwrap();

        setup.set_race_count(4).unwrap();
        let ids: Vec<u32> = setup.races().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 4, 5]);

        setup.set_race_count(2).unwrap();
        setup.set_race_count(3).unwrap();
        let ids: Vec<u32> = setup.races().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn test_update_race_touches_one_field() {
        let mut setup = configuring();
        setup.set_race_count(2).unwrap();
        let before = setup.races().to_vec();

        setup
            .update_race(0, RaceField::QualyTime("15".into()))
            .unwrap();

        assert_eq!(setup.races()[0].qualy_time, "15");
        assert_eq!(setup.races()[0].practice_time, before[0].practice_time);
        assert_eq!(setup.races()[0].track_id, before[0].track_id);
        assert_eq!(setup.races()[1], before[1]);

        assert!(matches!(
            setup.update_race(5, RaceField::Laps(1)),
            Err(SetupError::RaceIndexOutOfRange(5))
        ));
    }

    #[test]
    fn test_race_field_wire_format() {
        let field: RaceField =
            serde_json::from_value(json!({ "field": "carId", "value": "c1" })).unwrap();
        assert_eq!(field, RaceField::CarId("c1".into()));
        let field: RaceField =
            serde_json::from_value(json!({ "field": "laps", "value": 12 })).unwrap();
        assert_eq!(field, RaceField::Laps(12));
    }

    #[test]
    fn test_invite_toggle_twice_is_identity() {
        let mut setup = configuring();
        assert!(setup.toggle_invite("u1").unwrap());
        assert!(!setup.toggle_invite("u1").unwrap());
        assert!(setup.invited_users().is_empty());
    }

    #[test]
    fn test_f1_preset() {
        let mut setup = configuring();
        setup.set_pilot_count(12).unwrap();
        setup.apply_preset(PointsPreset::F1Modern).unwrap();
        assert_eq!(
            setup.points_system(),
            &[25, 18, 15, 12, 10, 8, 6, 4, 2, 1, 0, 0]
        );

        setup.set_pilot_count(3).unwrap();
        setup.set_points(2, 16).unwrap();
        setup.apply_preset(PointsPreset::Custom).unwrap();
        assert_eq!(setup.points_system(), &[25, 18, 16]);
    }

    fn persisted() -> Tournament {
        Tournament {
            id: "t1".into(),
            details: details(),
            config: TournamentConfig {
                pilot_count: 4,
                invited_users: ["u2".to_string()].into_iter().collect(),
                points_system: vec![10, 8, 6, 4],
                races: vec![
                    RaceConfig {
                        track_id: "spa".into(),
                        ..RaceConfig::blank(1)
                    },
                    RaceConfig::blank(2),
                ],
            },
            participants: ["u3".to_string()].into_iter().collect(),
            created_by: "owner".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hydration_keeps_persisted_arrays() {
        let setup = CompetitionSetup::from_tournament(persisted());
        assert_eq!(setup.tournament_id(), Some("t1"));
        assert_eq!(setup.pilot_count(), 4);
        assert_eq!(setup.points_system(), &[10, 8, 6, 4]);
        assert_eq!(setup.race_count(), 2);
        assert_eq!(setup.races()[0].track_id, "spa");
        assert!(setup.invited_users().contains("u2"));
    }

    #[test]
    fn test_hydration_reconciles_legacy_lengths() {
        let mut t = persisted();
        t.config.points_system = vec![10, 8];
        t.config.races.clear();
        let setup = CompetitionSetup::from_tournament(t);
        assert_eq!(setup.points_system(), &[10, 8, 0, 0]);
        assert_eq!(setup.races(), &[RaceConfig::blank(1)]);
    }

    #[test]
    fn test_second_save_rejected_while_in_flight() {
        let mut setup = configuring();
        let _request = setup.begin_save("owner").unwrap();
        assert!(setup.is_saving());
        assert!(matches!(
            setup.begin_save("owner"),
            Err(SetupError::SaveInProgress)
        ));
        setup.finish_save(&Ok("t9".into()));
        assert!(!setup.is_saving());
        assert_eq!(setup.tournament_id(), Some("t9"));
    }

    #[test]
    fn test_begin_save_validates_before_anything() {
        let mut setup = CompetitionSetup::new();
        assert!(matches!(
            setup.begin_save("owner"),
            Err(SetupError::MissingName)
        ));
        assert!(!setup.is_saving());
    }

    #[tokio::test]
    async fn test_save_creates_tournament() {
        let store = MemoryStore::new();
        let mut setup = configuring();
        setup.set_pilot_count(3).unwrap();
        setup.apply_preset(PointsPreset::F1Modern).unwrap();
        setup.set_race_count(2).unwrap();
        setup.toggle_invite("u1").unwrap();

        let id = setup.save(&store, "owner").await.unwrap();

        let saved: Tournament = store::fetch(&store, TOURNAMENTS, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.created_by, "owner");
        assert_eq!(saved.details.name, "GT3 Sprint Cup");
        assert_eq!(saved.config.points_system, vec![25, 18, 15]);
        assert_eq!(saved.config.races.len(), 2);
        assert!(saved.config.invited_users.contains("u1"));
        assert_eq!(saved.status, TournamentStatus::Upcoming);
        assert!(saved.created_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_state() {
        let store = MemoryStore::new();
        store.fail_writes_on(TOURNAMENTS);

        let mut setup = configuring();
        setup.set_pilot_count(5).unwrap();
        setup.set_points(0, 30).unwrap();

        let err = setup.save(&store, "owner").await.unwrap_err();
        assert!(matches!(err, SetupError::Store(_)));
        assert!(!setup.is_saving());
        assert_eq!(setup.points_system(), &[30, 0, 0, 0, 0]);
        assert!(store.get_collection(TOURNAMENTS).await.unwrap().is_empty());

        store.restore_writes(TOURNAMENTS);
        assert!(setup.save(&store, "owner").await.is_ok());
    }

    #[tokio::test]
    async fn test_edit_save_merges_and_keeps_participants() {
        let store = MemoryStore::new();
        store
            .set_document(TOURNAMENTS, "t1", persisted().to_data().unwrap())
            .await
            .unwrap();

        let mut setup = CompetitionSetup::load(&store, "t1").await.unwrap();
        setup.advance().unwrap();
        setup.set_pilot_count(6).unwrap();
        let id = setup.save(&store, "someone-else").await.unwrap();
        assert_eq!(id, "t1");

        let saved: Tournament = store::fetch(&store, TOURNAMENTS, "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.created_by, "owner");
        assert!(saved.participants.contains("u3"));
        assert_eq!(saved.config.points_system, vec![10, 8, 6, 4, 0, 0]);
    }

    #[tokio::test]
    async fn test_edit_save_clears_optional_details() {
        let store = MemoryStore::new();
        let mut t = persisted();
        t.details.description = Some("old desc".into());
        t.details.image = Some("banner.png".into());
        store
            .set_document(TOURNAMENTS, "t1", t.to_data().unwrap())
            .await
            .unwrap();

        let mut setup = CompetitionSetup::load(&store, "t1").await.unwrap();
        setup
            .set_details(EventDetails {
                description: None,
                image: None,
                ..details()
            })
            .unwrap();
        setup.save(&store, "owner").await.unwrap();

        let saved: Tournament = store::fetch(&store, TOURNAMENTS, "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.details.description, None);
        assert_eq!(saved.details.image, None);
        assert!(saved.details.simulator.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_tournament() {
        let store = MemoryStore::new();
        assert!(matches!(
            CompetitionSetup::load(&store, "nope").await,
            Err(SetupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_edit_of_deleted_tournament_is_not_found() {
        let store = MemoryStore::new();
        let mut setup = CompetitionSetup::from_tournament(persisted());
        assert!(matches!(
            setup.save(&store, "owner").await,
            Err(SetupError::NotFound(_))
        ));
        assert!(store.get_collection(TOURNAMENTS).await.unwrap().is_empty());
    }
}
