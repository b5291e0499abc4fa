// WebSocket handlers for live standings and the pending-invitation badge.
// Each connection holds one store subscription, released when the socket
// closes.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde_json::json;

use super::AppState;
use crate::auth::AuthUser;
use crate::invitations;
use crate::metrics;
use crate::models::{results_collection, INVITATIONS};
use crate::results;
use crate::standings;
use crate::store::DocumentStore;

/// WebSocket upgrade handler for a tournament's live standings.
pub async fn ws_standings(
    ws: WebSocketUpgrade,
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(tournament_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_standings(socket, state, tournament_id))
}

/// WebSocket upgrade handler for the caller's pending-invitation count.
pub async fn ws_notifications(
    ws: WebSocketUpgrade,
    auth: AuthUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = auth.id().to_string();
    ws.on_upgrade(move |socket| stream_notifications(socket, state, user_id))
}

async fn send_json(socket: &mut WebSocket, payload: serde_json::Value) -> bool {
    let sent = socket
        .send(Message::Text(payload.to_string().into()))
        .await
        .is_ok();
    if sent {
        metrics::WEBSOCKET_MESSAGES_SENT_TOTAL.inc();
    }
    sent
}

async fn standings_payload(store: &dyn DocumentStore, tournament_id: &str) -> serde_json::Value {
    match results::load_results(store, tournament_id).await {
        Ok(sheets) => json!(standings::summarize(&sheets)),
        Err(e) => {
            tracing::warn!("Loading standings for {tournament_id} failed: {e}");
            json!({ "error": "standings unavailable" })
        }
    }
}

async fn stream_standings(mut socket: WebSocket, state: AppState, tournament_id: String) {
    metrics::CONNECTED_WEBSOCKETS.inc();
    // Subscribe before the first load so no write slips between them.
    let mut changes = state.store.subscribe(&results_collection(&tournament_id));

    let initial = standings_payload(state.store.as_ref(), &tournament_id).await;
    if send_json(&mut socket, initial).await {
        loop {
            tokio::select! {
                event = changes.next() => {
                    if event.is_none() {
                        break;
                    }
                    let payload = standings_payload(state.store.as_ref(), &tournament_id).await;
                    if !send_json(&mut socket, payload).await {
                        break;
                    }
                }
                // Client messages are ignored; only a close matters.
                result = socket.recv() => {
                    match result {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
            }
        }
    }

    drop(changes);
    metrics::CONNECTED_WEBSOCKETS.dec();
    tracing::debug!("Standings stream for {tournament_id} closed");
}

async fn pending_count(store: &dyn DocumentStore, user_id: &str) -> Option<usize> {
    match invitations::pending_for(store, user_id).await {
        Ok(list) => Some(list.len()),
        Err(e) => {
            tracing::warn!("Counting invitations for {user_id} failed: {e}");
            None
        }
    }
}

async fn stream_notifications(mut socket: WebSocket, state: AppState, user_id: String) {
    metrics::CONNECTED_WEBSOCKETS.inc();
    let mut changes = state.store.subscribe(INVITATIONS);

    let mut last = pending_count(state.store.as_ref(), &user_id).await;
    let opened = send_json(&mut socket, json!({ "pending": last.unwrap_or(0) })).await;

    while opened {
        tokio::select! {
            event = changes.next() => {
                if event.is_none() {
                    break;
                }
                let count = pending_count(state.store.as_ref(), &user_id).await;
                // Only push when the badge actually changes.
                if count.is_some() && count != last {
                    last = count;
                    if !send_json(&mut socket, json!({ "pending": count })).await {
                        break;
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    drop(changes);
    metrics::CONNECTED_WEBSOCKETS.dec();
}
