// Error taxonomy shared by the store, setup, results and invitation layers.

use thiserror::Error;

/// Failures raised by a document store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock was poisoned")]
    Poisoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document {collection}/{id} is not a JSON object")]
    NotAnObject { collection: String, id: String },

    #[error("field {field} of {collection}/{id} is not an array")]
    NotAnArray {
        collection: String,
        id: String,
        field: String,
    },
}

/// Errors from the competition setup engine.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("tournament name is required")]
    MissingName,

    #[error("a simulator must be selected")]
    MissingSimulator,

    #[error("pilot count {0} is out of range (2..=50)")]
    PilotCountOutOfRange(u32),

    #[error("race count must be at least 1")]
    RaceCountOutOfRange,

    #[error("race index {0} does not exist")]
    RaceIndexOutOfRange(usize),

    #[error("points position index {0} does not exist")]
    PointIndexOutOfRange(usize),

    #[error("operation not allowed in the {0} stage")]
    WrongStage(&'static str),

    #[error("a save is already in progress")]
    SaveInProgress,

    #[error("tournament {0} not found")]
    NotFound(String),

    #[error("setup draft {0} not found")]
    DraftNotFound(String),

    #[error("only the tournament owner can edit it")]
    NotOwner,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SetupError {
    /// Validation errors are caught before any persistence call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SetupError::MissingName
                | SetupError::MissingSimulator
                | SetupError::PilotCountOutOfRange(_)
                | SetupError::RaceCountOutOfRange
                | SetupError::RaceIndexOutOfRange(_)
                | SetupError::PointIndexOutOfRange(_)
        )
    }
}

/// Errors from result-sheet entry.
#[derive(Debug, Error)]
pub enum ResultError {
    #[error("tournament {0} not found")]
    TournamentNotFound(String),

    #[error("race {race_id} not found in tournament {tournament_id}")]
    RaceNotFound { tournament_id: String, race_id: u32 },

    #[error("invalid result sheet: {0}")]
    InvalidSheet(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from invitation handling.
#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("invitation {0} not found")]
    NotFound(String),

    #[error("tournament {0} referenced by the invitation no longer exists")]
    TournamentNotFound(String),

    #[error("invitation is addressed to another user")]
    NotReceiver,

    #[error("invitation was already {0}")]
    AlreadyResolved(String),

    #[error("invitation {invitation_id} was accepted but adding the participant failed: {reason}")]
    Inconsistent {
        invitation_id: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
