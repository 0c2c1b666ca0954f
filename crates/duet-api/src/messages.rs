use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use duet_types::api::{SendMessageRequest, SendMessageResponse};
use duet_types::events::StoreEvent;

use crate::convert::message_from_row;
use crate::{AppState, now_ms};

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.text.trim().is_empty() || req.sender_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let message_id = Uuid::new_v4();
    let created_at = now_ms();

    let db = state.clone();
    let cid = conversation_id.to_string();
    let mid = message_id.to_string();
    let sender = req.sender_id.clone();
    let text = req.text.clone();
    tokio::task::spawn_blocking(move || {
        if db.db.get_conversation(&cid)?.is_none() {
            return Ok(false);
        }
        db.db.insert_message(&mid, &cid, &sender, &text, created_at)?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("send_message failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .then_some(())
    .ok_or(StatusCode::NOT_FOUND)?;

    state.dispatcher.broadcast(StoreEvent::MessageCreated {
        message_id,
        conversation_id,
        sender_id: req.sender_id,
        created_at,
    });

    Ok((StatusCode::CREATED, Json(SendMessageResponse { message_id })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let cid = conversation_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.messages_for_conversation(&cid))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("list_messages failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let messages: Vec<_> = rows.into_iter().map(message_from_row).collect();
    Ok(Json(messages))
}
