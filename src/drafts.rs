// Registry of open setup drafts, one per create or edit session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{SetupError, StoreError};
use crate::metrics;
use crate::models::{Tournament, TOURNAMENTS};
use crate::setup::{persist, CompetitionSetup};
use crate::store::{self, new_document_id, DocumentStore};

#[derive(Debug, Clone)]
struct Draft {
    owner: String,
    setup: CompetitionSetup,
}

/// Outcome of a successful draft save.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSetup {
    pub tournament_id: String,
    pub created: bool,
    #[serde(skip)]
    pub tournament: Tournament,
}

/// Thread-safe map of draft id to setup state.
#[derive(Debug, Clone)]
pub struct DraftRegistry {
    inner: Arc<Mutex<HashMap<String, Draft>>>,
}

impl DraftRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Draft>>, SetupError> {
        self.inner
            .lock()
            .map_err(|_| SetupError::Store(StoreError::Poisoned))
    }

    /// Number of open drafts.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a draft for a new tournament, or hydrate one from an existing
    /// tournament owned by `owner`.
    pub async fn open(
        &self,
        store: &dyn DocumentStore,
        owner: &str,
        tournament_id: Option<&str>,
    ) -> Result<(String, CompetitionSetup), SetupError> {
        let setup = match tournament_id {
            None => CompetitionSetup::new(),
            Some(id) => {
                let tournament: Tournament = store::fetch(store, TOURNAMENTS, id)
                    .await?
                    .ok_or_else(|| SetupError::NotFound(id.to_string()))?;
                if tournament.created_by != owner {
                    return Err(SetupError::NotOwner);
                }
                CompetitionSetup::from_tournament(tournament)
            }
        };

        let draft_id = new_document_id();
        let mut drafts = self.lock()?;
        drafts.insert(
            draft_id.clone(),
            Draft {
                owner: owner.to_string(),
                setup: setup.clone(),
            },
        );
        metrics::OPEN_SETUP_DRAFTS.set(drafts.len() as i64);
        drop(drafts);
        tracing::debug!("Opened setup draft {draft_id} for {owner}");
        Ok((draft_id, setup))
    }

    /// Current state of a draft.
    pub fn snapshot(&self, draft_id: &str, owner: &str) -> Result<CompetitionSetup, SetupError> {
        self.with_draft(draft_id, owner, |setup| Ok(setup.clone()))
    }

    /// Run an edit against a draft. Drafts belonging to someone else are
    /// reported as missing.
    pub fn with_draft<R>(
        &self,
        draft_id: &str,
        owner: &str,
        edit: impl FnOnce(&mut CompetitionSetup) -> Result<R, SetupError>,
    ) -> Result<R, SetupError> {
        let mut drafts = self.lock()?;
        match drafts.get_mut(draft_id) {
            Some(draft) if draft.owner == owner => edit(&mut draft.setup),
            _ => Err(SetupError::DraftNotFound(draft_id.to_string())),
        }
    }

    /// Persist a draft. The lock is released while the store is written, so
    /// a concurrent save of the same draft sees it in flight and is rejected.
    /// The draft is closed once saved; on failure it stays open unchanged.
    pub async fn save(
        &self,
        store: &dyn DocumentStore,
        draft_id: &str,
        owner: &str,
    ) -> Result<SavedSetup, SetupError> {
        let request = self.with_draft(draft_id, owner, |setup| setup.begin_save(owner))?;

        let outcome = persist(store, &request).await;

        let mut drafts = self.lock()?;
        if let Some(draft) = drafts.get_mut(draft_id) {
            draft.setup.finish_save(&outcome);
        }
        let tournament_id = outcome?;
        drafts.remove(draft_id);
        metrics::OPEN_SETUP_DRAFTS.set(drafts.len() as i64);
        drop(drafts);

        let mut tournament = request.tournament;
        tournament.id = tournament_id.clone();
        Ok(SavedSetup {
            tournament_id,
            created: request.tournament_id.is_none(),
            tournament,
        })
    }

    /// Drop a draft without writing anything.
    pub fn discard(&self, draft_id: &str, owner: &str) -> Result<(), SetupError> {
        let mut drafts = self.lock()?;
        match drafts.get(draft_id) {
            Some(draft) if draft.owner == owner => {
                drafts.remove(draft_id);
                metrics::OPEN_SETUP_DRAFTS.set(drafts.len() as i64);
                tracing::debug!("Discarded setup draft {draft_id}");
                Ok(())
            }
            _ => Err(SetupError::DraftNotFound(draft_id.to_string())),
        }
    }
}

impl Default for DraftRegistry {
    fn default() -> Self {
        Self::new()
    }
}
