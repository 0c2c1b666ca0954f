use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use duet_types::api::SetTypingRequest;
use duet_types::events::StoreEvent;

use crate::{AppState, now_ms};

/// Refresh (`typing: true`) or clear (`typing: false`) the caller's typing
/// mark. The client sends a refresh per keystroke and a clear on send or
/// after its inactivity timer; the store-side TTL covers clients that die
/// before clearing.
pub async fn set_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SetTypingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let cid = conversation_id.to_string();
    let uid = req.user_id.clone();
    let typing = req.typing;
    tokio::task::spawn_blocking(move || {
        if db.db.get_conversation(&cid)?.is_none() {
            return Ok(false);
        }
        if typing {
            db.db.set_typing(&cid, &uid, now_ms())?;
        } else {
            db.db.clear_typing(&cid, &uid)?;
        }
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("set_typing failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .then_some(())
    .ok_or(StatusCode::NOT_FOUND)?;

    state.dispatcher.broadcast(StoreEvent::TypingChanged {
        conversation_id,
        user_id: req.user_id,
        typing: req.typing,
    });

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TypingQuery {
    /// The caller's own id — you never see your own typing indicator.
    pub excluding: String,
}

pub async fn get_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<TypingQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let cid = conversation_id.to_string();
    let user_ids = tokio::task::spawn_blocking(move || {
        db.db.typing_for_conversation(&cid, &query.excluding, now_ms())
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("get_typing failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(user_ids))
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
    async fn set_typing_unknown_conversation_is_not_found() {
        let state = state();

        let result = set_typing(
            State(state.clone()),
            Path(Uuid::new_v4()),
            Json(SetTypingRequest { user_id: "a1".into(), typing: true }),
        )
        .await;

        match result {
            Err(status) => assert_eq!(status, StatusCode::NOT_FOUND),
            Ok(_) => panic!("expected rejection for unknown conversation"),
        }
    }

    #[tokio::test]
    async fn set_typing_writes_the_mark_and_clear_removes_it() {
        let state = state();
        let (conv, _) = state.db.get_or_create_conversation("a1", "b1", 1_000).unwrap();
        let conv_id: Uuid = conv.parse().unwrap();

        set_typing(
            State(state.clone()),
            Path(conv_id),
            Json(SetTypingRequest { user_id: "a1".into(), typing: true }),
        )
        .await
        .unwrap();

        let typing = state
            .db
            .typing_for_conversation(&conv, "b1", crate::now_ms())
            .unwrap();
        assert_eq!(typing, vec!["a1"]);

        set_typing(
            State(state.clone()),
            Path(conv_id),
            Json(SetTypingRequest { user_id: "a1".into(), typing: false }),
        )
        .await
        .unwrap();

        let typing = state
            .db
            .typing_for_conversation(&conv, "b1", crate::now_ms())
            .unwrap();
        assert!(typing.is_empty());
    }
}
