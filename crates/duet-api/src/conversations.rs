use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use duet_types::api::{ConversationSummary, OpenConversationRequest, OpenConversationResponse};
use duet_types::events::StoreEvent;

use crate::convert::{conversation_from_row, message_from_row, parse_id, user_from_row};
use crate::{AppState, now_ms};

/// Resolve (or lazily create) the conversation for an unordered user pair.
pub async fn open_conversation(
    State(state): State<AppState>,
    Json(req): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id.is_empty() || req.other_user_id.is_empty() || req.user_id == req.other_user_id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let (id, created) = tokio::task::spawn_blocking(move || {
        db.db
            .get_or_create_conversation(&req.user_id, &req.other_user_id, now_ms())
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("open_conversation failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    if created {
        let db = state.clone();
        let lookup = id.clone();
        let row = tokio::task::spawn_blocking(move || db.db.get_conversation(&lookup))
            .await
            .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
            .map_err(|e| { error!("conversation readback failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

        if let Some(row) = row {
            state.dispatcher.broadcast(StoreEvent::ConversationCreated {
                conversation_id: parse_id(&row.id, "conversation"),
                participant_one: row.participant_one,
                participant_two: row.participant_two,
            });
        }
    }

    Ok(Json(OpenConversationResponse {
        conversation_id: parse_id(&id, "conversation"),
    }))
}

/// The conversation list: every conversation the user participates in,
/// joined with the counterpart user, the latest message and the caller's
/// unread count, newest activity first. A counterpart whose user record is
/// gone comes back as `other_user: null` — the row still renders.
pub async fn list_conversations(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let summaries = tokio::task::spawn_blocking(move || build_summaries(&db, &external_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("list_conversations failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(summaries))
}

fn build_summaries(
    state: &crate::AppStateInner,
    user_id: &str,
) -> anyhow::Result<Vec<ConversationSummary>> {
    let rows = state.db.conversations_for_user(user_id)?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let other_user = match counterpart_of(&row, user_id) {
            Some(other_id) => state.db.get_user(other_id)?.map(user_from_row),
            None => None,
        };
        let last_message = state.db.last_message(&row.id)?.map(message_from_row);
        let unread_count = state.db.unread_count(&row.id, user_id)?;

        summaries.push(ConversationSummary {
            conversation: conversation_from_row(row),
            other_user,
            last_message,
            unread_count,
        });
    }

    // Latest activity first; conversations with no messages sort by creation
    summaries.sort_by_key(|s| {
        std::cmp::Reverse(
            s.last_message
                .as_ref()
                .map(|m| m.created_at)
                .unwrap_or(s.conversation.created_at),
        )
    });

    Ok(summaries)
}

fn counterpart_of<'a>(
    row: &'a duet_db::models::ConversationRow,
    user_id: &str,
) -> Option<&'a str> {
    if row.participant_one == user_id {
        Some(&row.participant_two)
    } else if row.participant_two == user_id {
        Some(&row.participant_one)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppStateInner;
    use duet_db::Database;
    use duet_gateway::dispatcher::Dispatcher;

    fn state() -> AppStateInner {
        AppStateInner {
            db: Database::open_in_memory().unwrap(),
            dispatcher: Dispatcher::new(),
        }
    }

    #[test]
    fn summary_joins_counterpart_and_unread_count() {
        let state = state();
        state.db.upsert_user("a1", "Alice", "alice@example.com", "", 1_000).unwrap();
        state.db.upsert_user("b1", "Bob", "bob@example.com", "", 1_000).unwrap();

        let (conv, _) = state.db.get_or_create_conversation("a1", "b1", 1_000).unwrap();
        state.db.insert_message("m1", &conv, "b1", "hi", 2_000).unwrap();

        let summaries = build_summaries(&state, "a1").unwrap();
        assert_eq!(summaries.len(), 1);

        let summary = &summaries[0];
        assert_eq!(summary.conversation.id.to_string(), conv);
        assert_eq!(summary.other_user.as_ref().unwrap().display_name, "Bob");
        assert_eq!(summary.last_message.as_ref().unwrap().text, "hi");
        assert_eq!(summary.unread_count, 1);
    }

    #[test]
    fn summary_nulls_out_a_missing_counterpart() {
        let state = state();
        state.db.upsert_user("a1", "Alice", "alice@example.com", "", 1_000).unwrap();
        // "ghost" never synced from the identity provider
        let (conv, _) = state.db.get_or_create_conversation("a1", "ghost", 1_000).unwrap();
        state.db.insert_message("m1", &conv, "ghost", "boo", 2_000).unwrap();

        let summaries = build_summaries(&state, "a1").unwrap();

        // The row is kept; only the counterpart join is nulled out
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].other_user.is_none());
        assert_eq!(summaries[0].last_message.as_ref().unwrap().text, "boo");
    }

    #[test]
    fn summaries_order_by_latest_activity() {
        let state = state();
        let (ab, _) = state.db.get_or_create_conversation("a1", "b1", 1_000).unwrap();
        let (ac, _) = state.db.get_or_create_conversation("a1", "c1", 2_000).unwrap();
        let (ad, _) = state.db.get_or_create_conversation("a1", "d1", 3_000).unwrap();

        // ab has the newest message; ad has none and falls back to creation
        state.db.insert_message("m1", &ac, "c1", "older", 4_000).unwrap();
        state.db.insert_message("m2", &ab, "b1", "newest", 5_000).unwrap();

        let summaries = build_summaries(&state, "a1").unwrap();
        let ids: Vec<String> = summaries
            .iter()
            .map(|s| s.conversation.id.to_string())
            .collect();
        assert_eq!(ids, vec![ab, ac, ad]);
    }
}
