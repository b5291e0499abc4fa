// Invitations: fan-out when a tournament is saved, and accept / reject.
//
// Accepting touches two documents that the store cannot update atomically.
// Both must exist before either is written; the invitation status is
// written first and the participant is added only after it succeeds.

use std::collections::HashSet;

use serde_json::json;

use crate::error::InvitationError;
use crate::metrics;
use crate::models::{
    now_timestamp, DocumentModel, Invitation, InvitationStatus, Tournament, UserProfile,
    INVITATIONS, TOURNAMENTS, USERS,
};
use crate::store::{self, DocumentStore, Filter};

/// Create a pending invitation for every invited user that does not already
/// have one for this tournament. Returns how many were created.
pub async fn send_invitations(
    store: &dyn DocumentStore,
    tournament_id: &str,
    tournament: &Tournament,
    sender_id: &str,
) -> Result<usize, InvitationError> {
    let sender_name = match store::fetch::<UserProfile>(store, USERS, sender_id).await? {
        Some(profile) if !profile.display_name().is_empty() => profile.display_name().to_string(),
        _ => sender_id.to_string(),
    };

    let existing: Vec<Invitation> = store::query(
        store,
        INVITATIONS,
        &[Filter::eq("tournamentId", tournament_id)],
    )
    .await?;
    let already: HashSet<&str> = existing
        .iter()
        .filter(|i| i.status == InvitationStatus::Pending)
        .map(|i| i.receiver_id.as_str())
        .collect();

    let mut sent = 0;
    for receiver in &tournament.config.invited_users {
        if receiver == sender_id
            || already.contains(receiver.as_str())
            || tournament.participants.contains(receiver)
        {
            continue;
        }
        let invitation = Invitation {
            id: String::new(),
            tournament_id: tournament_id.to_string(),
            tournament_name: tournament.details.name.clone(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.clone(),
            receiver_id: receiver.clone(),
            status: InvitationStatus::Pending,
            created_at: now_timestamp(),
        };
        store.add_document(INVITATIONS, invitation.to_data()?).await?;
        sent += 1;
    }

    if sent > 0 {
        tracing::info!("Sent {sent} invitations for tournament {tournament_id}");
    }
    Ok(sent)
}

/// Pending invitations addressed to a user.
pub async fn pending_for(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Vec<Invitation>, InvitationError> {
    Ok(store::query(
        store,
        INVITATIONS,
        &[
            Filter::eq("receiverId", user_id),
            Filter::eq("status", InvitationStatus::Pending.as_str()),
        ],
    )
    .await?)
}

async fn load_pending(
    store: &dyn DocumentStore,
    invitation_id: &str,
    user_id: &str,
) -> Result<Invitation, InvitationError> {
    let invitation: Invitation = store::fetch(store, INVITATIONS, invitation_id)
        .await?
        .ok_or_else(|| InvitationError::NotFound(invitation_id.to_string()))?;
    if invitation.receiver_id != user_id {
        return Err(InvitationError::NotReceiver);
    }
    if invitation.status != InvitationStatus::Pending {
        return Err(InvitationError::AlreadyResolved(
            invitation.status.as_str().to_string(),
        ));
    }
    Ok(invitation)
}

async fn set_status(
    store: &dyn DocumentStore,
    invitation_id: &str,
    status: InvitationStatus,
) -> Result<(), InvitationError> {
    let updated = store
        .update_document(INVITATIONS, invitation_id, json!({ "status": status }))
        .await?;
    if !updated {
        return Err(InvitationError::NotFound(invitation_id.to_string()));
    }
    Ok(())
}

/// Accept an invitation and join its tournament.
pub async fn accept(
    store: &dyn DocumentStore,
    invitation_id: &str,
    user_id: &str,
) -> Result<Invitation, InvitationError> {
    let mut invitation = load_pending(store, invitation_id, user_id).await?;

    let tournament: Option<Tournament> =
        store::fetch(store, TOURNAMENTS, &invitation.tournament_id).await?;
    if tournament.is_none() {
        metrics::INVITATIONS_RESOLVED_TOTAL
            .with_label_values(&["stale"])
            .inc();
        return Err(InvitationError::TournamentNotFound(
            invitation.tournament_id.clone(),
        ));
    }

    set_status(store, invitation_id, InvitationStatus::Accepted).await?;
    invitation.status = InvitationStatus::Accepted;

    let added = store
        .add_to_set(
            TOURNAMENTS,
            &invitation.tournament_id,
            "participants",
            json!(user_id),
        )
        .await;

    let reason = match added {
        Ok(true) => None,
        Ok(false) => Some("tournament disappeared".to_string()),
        Err(e) => Some(e.to_string()),
    };
    if let Some(reason) = reason {
        tracing::error!(
            "Inconsistent invitation {invitation_id}: accepted but {user_id} was not added to tournament {}: {reason}",
            invitation.tournament_id
        );
        metrics::INVITATIONS_RESOLVED_TOTAL
            .with_label_values(&["inconsistent"])
            .inc();
        return Err(InvitationError::Inconsistent {
            invitation_id: invitation_id.to_string(),
            reason,
        });
    }

    tracing::info!(
        "User {user_id} joined tournament {} via invitation {invitation_id}",
        invitation.tournament_id
    );
    metrics::INVITATIONS_RESOLVED_TOTAL
        .with_label_values(&["accepted"])
        .inc();
    Ok(invitation)
}

pub async fn reject(
    store: &dyn DocumentStore,
    invitation_id: &str,
    user_id: &str,
) -> Result<Invitation, InvitationError> {
    let mut invitation = load_pending(store, invitation_id, user_id).await?;
    set_status(store, invitation_id, InvitationStatus::Rejected).await?;
    invitation.status = InvitationStatus::Rejected;
    metrics::INVITATIONS_RESOLVED_TOTAL
        .with_label_values(&["rejected"])
        .inc();
    Ok(invitation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventDetails, TournamentConfig};
    use crate::store::MemoryStore;

    fn tournament(invited: &[&str]) -> Tournament {
        Tournament {
            details: EventDetails {
                name: "Endurance Series".into(),
                ..Default::default()
            },
            config: TournamentConfig {
                pilot_count: 4,
                invited_users: invited.iter().map(|u| u.to_string()).collect(),
                points_system: vec![0; 4],
                ..Default::default()
            },
            created_by: "owner".into(),
            ..Default::default()
        }
    }

    async fn seeded(invited: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let t = tournament(invited);
        store
            .set_document(TOURNAMENTS, "t1", t.to_data().unwrap())
            .await
            .unwrap();
        store
            .set_document(USERS, "owner", json!({ "nickname": "Boss" }))
            .await
            .unwrap();
        send_invitations(&store, "t1", &t, "owner").await.unwrap();
        store
    }

    async fn invitation_for(store: &MemoryStore, user: &str) -> Invitation {
        pending_for(store, user).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_send_invitations_is_idempotent() {
        let store = seeded(&["u1", "u2", "owner"]).await;

        let inv = invitation_for(&store, "u1").await;
        assert_eq!(inv.sender_name, "Boss");
        assert_eq!(inv.tournament_name, "Endurance Series");
        assert!(pending_for(&store, "owner").await.unwrap().is_empty());

        let again = send_invitations(&store, "t1", &tournament(&["u1", "u2", "u3"]), "owner")
            .await
            .unwrap();
        assert_eq!(again, 1);
        assert_eq!(store.get_collection(INVITATIONS).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_accept_adds_participant() {
        let store = seeded(&["u1"]).await;
        let inv = invitation_for(&store, "u1").await;

        let accepted = accept(&store, &inv.id, "u1").await.unwrap();
        assert_eq!(accepted.status, InvitationStatus::Accepted);

        let t: Tournament = store::fetch(&store, TOURNAMENTS, "t1").await.unwrap().unwrap();
        assert!(t.participants.contains("u1"));
        assert!(pending_for(&store, "u1").await.unwrap().is_empty());

        assert!(matches!(
            accept(&store, &inv.id, "u1").await,
            Err(InvitationError::AlreadyResolved(s)) if s == "accepted"
        ));
    }

    #[tokio::test]
    async fn test_accept_requires_receiver() {
        let store = seeded(&["u1"]).await;
        let inv = invitation_for(&store, "u1").await;
        assert!(matches!(
            accept(&store, &inv.id, "intruder").await,
            Err(InvitationError::NotReceiver)
        ));
        assert!(matches!(
            accept(&store, "missing", "u1").await,
            Err(InvitationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_for_deleted_tournament_writes_nothing() {
        let store = seeded(&["u1"]).await;
        let inv = invitation_for(&store, "u1").await;
        store.delete_document(TOURNAMENTS, "t1").await.unwrap();

        assert!(matches!(
            accept(&store, &inv.id, "u1").await,
            Err(InvitationError::TournamentNotFound(_))
        ));
        let still: Invitation = store::fetch(&store, INVITATIONS, &inv.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(still.status, InvitationStatus::Pending);
        assert!(store.get_collection(TOURNAMENTS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_status_write_skips_participant_add() {
        let store = seeded(&["u1"]).await;
        let inv = invitation_for(&store, "u1").await;
        store.fail_writes_on(INVITATIONS);

        assert!(matches!(
            accept(&store, &inv.id, "u1").await,
            Err(InvitationError::Store(_))
        ));
        let t: Tournament = store::fetch(&store, TOURNAMENTS, "t1").await.unwrap().unwrap();
        assert!(t.participants.is_empty());
    }

    #[tokio::test]
    async fn test_failed_participant_add_is_reported() {
        let store = seeded(&["u1"]).await;
        let inv = invitation_for(&store, "u1").await;
        store.fail_writes_on(TOURNAMENTS);

        assert!(matches!(
            accept(&store, &inv.id, "u1").await,
            Err(InvitationError::Inconsistent { .. })
        ));
        let status: Invitation = store::fetch(&store, INVITATIONS, &inv.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.status, InvitationStatus::Accepted);
    }

    #[tokio::test]
    async fn test_reject() {
        let store = seeded(&["u1"]).await;
        let inv = invitation_for(&store, "u1").await;
        let rejected = reject(&store, &inv.id, "u1").await.unwrap();
        assert_eq!(rejected.status, InvitationStatus::Rejected);

        let t: Tournament = store::fetch(&store, TOURNAMENTS, "t1").await.unwrap().unwrap();
        assert!(t.participants.is_empty());
        assert!(matches!(
            reject(&store, &inv.id, "u1").await,
            Err(InvitationError::AlreadyResolved(_))
        ));
    }
}
