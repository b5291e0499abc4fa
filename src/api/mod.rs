// HTTP API routes: setup drafts, tournaments, results, standings, career
// stats and invitations.

pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::drafts::DraftRegistry;
use crate::error::{InvitationError, ResultError, SetupError, StoreError};
use crate::invitations;
use crate::metrics;
use crate::models::{
    EventDetails, RaceResult, Tournament, TournamentStatus, UserProfile, TOURNAMENTS, USERS,
};
use crate::results;
use crate::setup::{CompetitionSetup, PointsPreset, RaceField};
use crate::standings::{self, CareerStats};
use crate::store::{self, DocumentStore};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenDraftRequest {
    pub tournament_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PilotCountRequest {
    pub pilot_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceCountRequest {
    pub race_count: usize,
}

#[derive(Deserialize)]
pub struct PointsRequest {
    pub points: u32,
}

#[derive(Deserialize)]
pub struct PresetRequest {
    pub preset: PointsPreset,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: TournamentStatus,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub drafts: DraftRegistry,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            drafts: DraftRegistry::new(),
        }
    }
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn internal_error(e: StoreError) -> impl IntoResponse {
    tracing::error!("Store error: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn setup_error(e: SetupError) -> Response {
    let status = match &e {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        SetupError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SetupError::NotFound(_) | SetupError::DraftNotFound(_) => StatusCode::NOT_FOUND,
        SetupError::NotOwner => StatusCode::FORBIDDEN,
        // In-flight saves and stage mismatches.
        _ => StatusCode::CONFLICT,
    };
    match e {
        SetupError::Store(inner) => internal_error(inner).into_response(),
        other => json_error(status, &other.to_string()).into_response(),
    }
}

fn result_error(e: ResultError) -> Response {
    let status = match &e {
        ResultError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ResultError::TournamentNotFound(_) | ResultError::RaceNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ResultError::InvalidSheet(_) => StatusCode::BAD_REQUEST,
    };
    match e {
        ResultError::Store(inner) => internal_error(inner).into_response(),
        other => json_error(status, &other.to_string()).into_response(),
    }
}

fn invitation_error(e: InvitationError) -> Response {
    let status = match &e {
        InvitationError::NotFound(_) | InvitationError::TournamentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        InvitationError::NotReceiver => StatusCode::FORBIDDEN,
        InvitationError::AlreadyResolved(_) => StatusCode::CONFLICT,
        InvitationError::Inconsistent { .. } | InvitationError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    match e {
        InvitationError::Store(inner) => internal_error(inner).into_response(),
        other => json_error(status, &other.to_string()).into_response(),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Setup drafts
        .route("/api/setup", post(open_draft))
        .route("/api/setup/{draft}", get(get_draft).delete(discard_draft))
        .route("/api/setup/{draft}/details", put(set_details))
        .route("/api/setup/{draft}/advance", post(advance_draft))
        .route("/api/setup/{draft}/back", post(back_draft))
        .route("/api/setup/{draft}/status", put(set_status))
        .route("/api/setup/{draft}/pilots", put(set_pilot_count))
        .route("/api/setup/{draft}/races", put(set_race_count))
        .route("/api/setup/{draft}/races/{index}", put(update_race))
        .route("/api/setup/{draft}/points/preset", put(apply_preset))
        .route("/api/setup/{draft}/points/{index}", put(set_points))
        .route("/api/setup/{draft}/invites/{user}", post(toggle_invite))
        .route("/api/setup/{draft}/save", post(save_draft))
        // Tournaments
        .route("/api/tournaments", get(list_tournaments))
        .route("/api/tournaments/{id}", get(get_tournament))
        .route(
            "/api/tournaments/{id}/standings",
            get(get_tournament_standings),
        )
        .route("/api/tournaments/{id}/results", get(list_results))
        .route(
            "/api/tournaments/{id}/races/{race}/results",
            get(get_race_results).put(put_race_results),
        )
        // Pilots
        .route("/api/users/{id}/stats", get(get_career_stats))
        .route("/api/users/{id}/stats/refresh", post(refresh_career_stats))
        // Invitations
        .route("/api/invitations", get(list_invitations))
        .route("/api/invitations/{id}/accept", post(accept_invitation))
        .route("/api/invitations/{id}/reject", post(reject_invitation))
        // WebSocket
        .route("/ws/tournaments/{id}/standings", get(ws::ws_standings))
        .route("/ws/notifications", get(ws::ws_notifications))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "paddock-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

/// Count and time every request, labelled by its route template.
async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| metrics::normalize_path(req.uri().path()));
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(started.elapsed().as_secs_f64());
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    response
}

// ── Setup handlers ────────────────────────────────────────────────────

fn draft_view(draft_id: &str, setup: &CompetitionSetup) -> Value {
    json!({ "draftId": draft_id, "setup": setup })
}

/// Apply an edit to a draft and answer with its new state.
fn edit_draft(
    state: &AppState,
    draft_id: &str,
    auth: &AuthUser,
    edit: impl FnOnce(&mut CompetitionSetup) -> Result<(), SetupError>,
) -> Response {
    let outcome = state.drafts.with_draft(draft_id, auth.id(), |setup| {
        edit(setup)?;
        Ok(setup.clone())
    });
    match outcome {
        Ok(setup) => (StatusCode::OK, Json(draft_view(draft_id, &setup))).into_response(),
        Err(e) => setup_error(e),
    }
}

async fn open_draft(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<OpenDraftRequest>,
) -> impl IntoResponse {
    match state
        .drafts
        .open(state.store.as_ref(), auth.id(), req.tournament_id.as_deref())
        .await
    {
        Ok((draft_id, setup)) => {
            (StatusCode::CREATED, Json(draft_view(&draft_id, &setup))).into_response()
        }
        Err(e) => setup_error(e),
    }
}

async fn get_draft(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
) -> impl IntoResponse {
    match state.drafts.snapshot(&draft, auth.id()) {
        Ok(setup) => (StatusCode::OK, Json(draft_view(&draft, &setup))).into_response(),
        Err(e) => setup_error(e),
    }
}

async fn discard_draft(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
) -> impl IntoResponse {
    match state.drafts.discard(&draft, auth.id()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => setup_error(e),
    }
}

async fn set_details(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
    Json(details): Json<EventDetails>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.set_details(details))
}

async fn advance_draft(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.advance().map(|_| ()))
}

async fn back_draft(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| {
        s.back();
        Ok(())
    })
}

async fn set_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
    Json(req): Json<StatusRequest>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| {
        s.set_status(req.status);
        Ok(())
    })
}

async fn set_pilot_count(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
    Json(req): Json<PilotCountRequest>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.set_pilot_count(req.pilot_count))
}

async fn set_race_count(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
    Json(req): Json<RaceCountRequest>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.set_race_count(req.race_count))
}

async fn update_race(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((draft, index)): Path<(String, usize)>,
    Json(field): Json<RaceField>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.update_race(index, field))
}

async fn set_points(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((draft, index)): Path<(String, usize)>,
    Json(req): Json<PointsRequest>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.set_points(index, req.points))
}

async fn apply_preset(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
    Json(req): Json<PresetRequest>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.apply_preset(req.preset))
}

async fn toggle_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((draft, user)): Path<(String, String)>,
) -> impl IntoResponse {
    edit_draft(&state, &draft, &auth, |s| s.toggle_invite(&user).map(|_| ()))
}

async fn save_draft(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(draft): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let saved = match state.drafts.save(store, &draft, auth.id()).await {
        Ok(saved) => saved,
        Err(e) => return setup_error(e),
    };

    // The tournament is stored at this point; invitation failures are
    // reported alongside the saved id rather than failing the save.
    let sent = invitations::send_invitations(
        store,
        &saved.tournament_id,
        &saved.tournament,
        auth.id(),
    )
    .await;
    let (invitations_sent, invitation_error) = match sent {
        Ok(n) => (n, None),
        Err(e) => {
            tracing::error!(
                "Sending invitations for tournament {} failed: {e}",
                saved.tournament_id
            );
            (0, Some(e.to_string()))
        }
    };

    let status = if saved.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "tournamentId": saved.tournament_id,
            "created": saved.created,
            "invitationsSent": invitations_sent,
            "invitationError": invitation_error,
        })),
    )
        .into_response()
}

// ── Tournament handlers ───────────────────────────────────────────────

/// Tournaments the user owns or has joined, including documents still
/// carrying the legacy owner field.
async fn tournaments_involving(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Vec<Tournament>, StoreError> {
    // Ownership is only known after legacy fields are normalized, so the
    // check runs on decoded documents rather than as a store query.
    let tournaments: Vec<Tournament> = store::fetch_all(store, TOURNAMENTS).await?;
    Ok(tournaments
        .into_iter()
        .filter(|t| t.involves(user_id))
        .collect())
}

async fn list_tournaments(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    match tournaments_involving(state.store.as_ref(), auth.id()).await {
        Ok(tournaments) => (StatusCode::OK, Json(json!(tournaments))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_tournament(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match store::fetch::<Tournament>(state.store.as_ref(), TOURNAMENTS, &id).await {
        Ok(Some(t)) => (StatusCode::OK, Json(json!(t))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Tournament not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_tournament_standings(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    match store::fetch::<Tournament>(store, TOURNAMENTS, &id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "Tournament not found").into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    }
    match results::load_results(store, &id).await {
        Ok(sheets) => (StatusCode::OK, Json(json!(standings::summarize(&sheets)))).into_response(),
        Err(e) => result_error(e),
    }
}

async fn list_results(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match results::load_results(state.store.as_ref(), &id).await {
        Ok(sheets) => (StatusCode::OK, Json(json!(sheets))).into_response(),
        Err(e) => result_error(e),
    }
}

async fn get_race_results(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((id, race)): Path<(String, u32)>,
) -> impl IntoResponse {
    match results::sheet_or_blank(state.store.as_ref(), &id, race).await {
        Ok(sheet) => (StatusCode::OK, Json(json!(sheet))).into_response(),
        Err(e) => result_error(e),
    }
}

async fn put_race_results(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, race)): Path<(String, u32)>,
    Json(sheet): Json<RaceResult>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    match store::fetch::<Tournament>(store, TOURNAMENTS, &id).await {
        Ok(Some(t)) if t.created_by != auth.id() => {
            return json_error(
                StatusCode::FORBIDDEN,
                "Only the tournament owner can enter results",
            )
            .into_response()
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "Tournament not found").into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    }
    match results::save_sheet(store, &id, race, sheet).await {
        Ok(saved) => (StatusCode::OK, Json(json!(saved))).into_response(),
        Err(e) => result_error(e),
    }
}

// ── Career stats handlers ─────────────────────────────────────────────

async fn career_stats(store: &dyn DocumentStore, user_id: &str) -> Result<CareerStats, StoreError> {
    let tournaments = tournaments_involving(store, user_id).await?;
    let loads = tournaments.iter().map(|t| async move {
        let sheets = results::load_results(store, &t.id).await;
        (t.id.clone(), sheets)
    });

    let mut by_tournament = HashMap::new();
    for (id, sheets) in futures::future::join_all(loads).await {
        match sheets {
            Ok(sheets) => {
                by_tournament.insert(id, sheets);
            }
            Err(ResultError::Store(e)) => return Err(e),
            Err(e) => tracing::warn!("Skipping results of tournament {id}: {e}"),
        }
    }
    Ok(standings::compute_career_stats(
        user_id,
        &tournaments,
        &by_tournament,
    ))
}

async fn get_career_stats(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match career_stats(state.store.as_ref(), &id).await {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn refresh_career_stats(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if auth.id() != id {
        return json_error(StatusCode::FORBIDDEN, "You can only refresh your own stats")
            .into_response();
    }
    let store = state.store.as_ref();
    let stats = match career_stats(store, &id).await {
        Ok(stats) => stats,
        Err(e) => return internal_error(e).into_response(),
    };
    match store
        .update_document(USERS, &id, json!({ "stats": stats }))
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return json_error(StatusCode::NOT_FOUND, "Profile not found").into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    }
    match store::fetch::<UserProfile>(store, USERS, &id).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(json!(profile))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Profile not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Invitation handlers ───────────────────────────────────────────────

async fn list_invitations(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    match invitations::pending_for(state.store.as_ref(), auth.id()).await {
        Ok(list) => (StatusCode::OK, Json(json!(list))).into_response(),
        Err(e) => invitation_error(e),
    }
}

async fn accept_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match invitations::accept(state.store.as_ref(), &id, auth.id()).await {
        Ok(invitation) => (StatusCode::OK, Json(json!(invitation))).into_response(),
        Err(e) => invitation_error(e),
    }
}

async fn reject_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match invitations::reject(state.store.as_ref(), &id, auth.id()).await {
        Ok(invitation) => (StatusCode::OK, Json(json!(invitation))).into_response(),
        Err(e) => invitation_error(e),
    }
}
