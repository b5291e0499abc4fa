// Document shapes shared by the setup engine, result entry and the standings
// aggregator, plus the legacy-alias normalization applied when documents are read.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::store::Document;

pub const TOURNAMENTS: &str = "tournaments";
pub const INVITATIONS: &str = "invitations";
pub const USERS: &str = "users";

/// Collection holding the result sheets of one tournament.
pub fn results_collection(tournament_id: &str) -> String {
    format!("{TOURNAMENTS}/{tournament_id}/results")
}

/// Result sheets are keyed by race ordinal.
pub fn result_doc_id(race_id: u32) -> String {
    format!("race_{race_id}")
}

/// Current time as an RFC 3339 string.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Read boundary ─────────────────────────────────────────────────────

/// A typed view over a stored JSON document.
pub trait DocumentModel: Serialize + DeserializeOwned {
    /// Rewrite legacy field names into their canonical form before decoding.
    fn normalize(_id: &str, _fields: &mut Map<String, Value>) {}

    fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut data = doc.data.clone();
        let Value::Object(fields) = &mut data else {
            return Err(StoreError::NotAnObject {
                collection: doc.collection.clone(),
                id: doc.id.clone(),
            });
        };
        Self::normalize(&doc.id, fields);
        Ok(serde_json::from_value(data)?)
    }

    fn to_data(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Move `legacy` to `canonical` when only the legacy name is present.
/// When both exist the canonical value wins and the legacy one is dropped.
fn adopt_alias(fields: &mut Map<String, Value>, canonical: &str, legacy: &str) {
    if let Some(old) = fields.remove(legacy) {
        fields.entry(canonical.to_string()).or_insert(old);
    }
}

fn inject_id(id: &str, fields: &mut Map<String, Value>) {
    fields
        .entry("id".to_string())
        .or_insert_with(|| Value::String(id.to_string()));
}

// ── Tournament ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TournamentType {
    #[default]
    Torneo,
    Liga,
    Copa,
    #[serde(rename = "Evento Único")]
    EventoUnico,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Active,
    #[default]
    Upcoming,
    Finished,
}

/// Denormalized snapshot of the simulator a tournament runs on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimulatorRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Identity of a competition, edited in the details stage of setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: TournamentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator: Option<SimulatorRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One scheduled session within a tournament.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RaceConfig {
    pub id: u32,
    #[serde(default)]
    pub track_id: String,
    #[serde(default)]
    pub car_id: String,
    /// Minutes, as entered.
    #[serde(default)]
    pub practice_time: String,
    /// Minutes, as entered.
    #[serde(default)]
    pub qualy_time: String,
    #[serde(default)]
    pub laps: u32,
}

impl RaceConfig {
    /// An unconfigured race: no track, no car, zero session times.
    pub fn blank(id: u32) -> Self {
        Self {
            id,
            track_id: String::new(),
            car_id: String::new(),
            practice_time: "0".to_string(),
            qualy_time: "0".to_string(),
            laps: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TournamentConfig {
    pub pilot_count: u32,
    #[serde(default)]
    pub invited_users: BTreeSet<String>,
    #[serde(default)]
    pub points_system: Vec<u32>,
    #[serde(default)]
    pub races: Vec<RaceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(flatten)]
    pub details: EventDetails,
    pub config: TournamentConfig,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub status: TournamentStatus,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Tournament {
    /// Whether the user owns the tournament or has been admitted to it.
    pub fn involves(&self, user_id: &str) -> bool {
        self.created_by == user_id || self.participants.contains(user_id)
    }

    /// Points awarded for a 1-based finishing position, 0 when out of range.
    pub fn points_for_position(&self, position: u32) -> u32 {
        position
            .checked_sub(1)
            .and_then(|i| self.config.points_system.get(i as usize))
            .copied()
            .unwrap_or(0)
    }

    pub fn race(&self, race_id: u32) -> Option<&RaceConfig> {
        self.config.races.iter().find(|r| r.id == race_id)
    }
}

impl DocumentModel for Tournament {
    fn normalize(id: &str, fields: &mut Map<String, Value>) {
        inject_id(id, fields);
        adopt_alias(fields, "createdBy", "userId");
    }
}

// ── Race results ──────────────────────────────────────────────────────

/// One row of a practice, qualifying or race slate. Rows are addressed by
/// index, so `position` always equals index + 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlateEntry {
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

impl SlateEntry {
    /// The assigned pilot, or `None` for an empty slot.
    pub fn pilot(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    #[serde(default)]
    pub tournament_id: String,
    pub race_id: u32,
    #[serde(default)]
    pub practice: Vec<SlateEntry>,
    #[serde(default)]
    pub qualy: Vec<SlateEntry>,
    #[serde(default)]
    pub standings: Vec<SlateEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl DocumentModel for RaceResult {
    fn normalize(id: &str, fields: &mut Map<String, Value>) {
        adopt_alias(fields, "standings", "race");
        if !fields.contains_key("raceId") {
            if let Some(n) = id.strip_prefix("race_").and_then(|n| n.parse::<u32>().ok()) {
                fields.insert("raceId".to_string(), Value::from(n));
            }
        }
    }
}

// ── Invitations & profiles ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub tournament_id: String,
    #[serde(default)]
    pub tournament_name: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub receiver_id: String,
    #[serde(default)]
    pub status: InvitationStatus,
    #[serde(default)]
    pub created_at: String,
}

impl DocumentModel for Invitation {
    fn normalize(id: &str, fields: &mut Map<String, Value>) {
        inject_id(id, fields);
    }
}

/// Public pilot profile. Fields this service does not interpret are kept in
/// `extra` so they survive a read-modify-write cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Name shown to other pilots: nickname, falling back to the real name.
    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.name
        } else {
            &self.nickname
        }
    }
}

impl DocumentModel for UserProfile {
    fn normalize(id: &str, fields: &mut Map<String, Value>) {
        inject_id(id, fields);
    }
}
