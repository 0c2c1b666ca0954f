use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use duet_types::api::{MarkReadRequest, UnreadCountResponse};
use duet_types::events::StoreEvent;

use crate::{AppState, now_ms};

/// Move the caller's read watermark to now.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let cid = conversation_id.to_string();
    let uid = req.user_id.clone();
    tokio::task::spawn_blocking(move || {
        if db.db.get_conversation(&cid)?.is_none() {
            return Ok(false);
        }
        db.db.mark_read(&cid, &uid, now_ms())?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("mark_read failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .then_some(())
    .ok_or(StatusCode::NOT_FOUND)?;

    state.dispatcher.broadcast(StoreEvent::ReadMarked {
        conversation_id,
        user_id: req.user_id,
    });

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    pub user_id: String,
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<UnreadQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let cid = conversation_id.to_string();
    let count = tokio::task::spawn_blocking(move || db.db.unread_count(&cid, &query.user_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("unread_count failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(UnreadCountResponse { count }))
}

/// Unread counts keyed by conversation id, covering every conversation the
/// user participates in — including ones they have never opened.
pub async fn all_unread_counts(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let counts = tokio::task::spawn_blocking(move || db.db.unread_counts_for_user(&external_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("all_unread_counts failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let map: HashMap<String, u64> = counts.into_iter().collect();
    Ok(Json(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppState, AppStateInner};
    use duet_db::Database;
    use duet_gateway::dispatcher::Dispatcher;
    use std::sync::Arc;

    fn state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            dispatcher: Dispatcher::new(),
        })
    }

    #[tokio::test]
    async fn mark_read_unknown_conversation_is_not_found() {
        let state = state();
        let mut rx = state.dispatcher.subscribe();

        let result = mark_read(
            State(state.clone()),
            Path(Uuid::new_v4()),
            Json(MarkReadRequest { user_id: "a1".into() }),
        )
        .await;

        match result {
            Err(status) => assert_eq!(status, StatusCode::NOT_FOUND),
            Ok(_) => panic!("expected rejection for unknown conversation"),
        }

        // A rejected write emits no event
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_read_broadcasts_and_zeroes_the_count() {
        let state = state();
        let (conv, _) = state.db.get_or_create_conversation("a1", "b1", 1_000).unwrap();
        state.db.insert_message("m1", &conv, "a1", "hi", 2_000).unwrap();
        let conv_id: Uuid = conv.parse().unwrap();
        let mut rx = state.dispatcher.subscribe();

        let status = mark_read(
            State(state.clone()),
            Path(conv_id),
            Json(MarkReadRequest { user_id: "b1".into() }),
        )
        .await
        .unwrap()
        .into_response()
        .status();
        assert_eq!(status, StatusCode::NO_CONTENT);

        match rx.try_recv().unwrap() {
            StoreEvent::ReadMarked { conversation_id, user_id } => {
                assert_eq!(conversation_id, conv_id);
                assert_eq!(user_id, "b1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(state.db.unread_count(&conv, "b1").unwrap(), 0);
    }
}
