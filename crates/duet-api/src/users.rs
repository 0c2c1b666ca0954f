use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use duet_types::api::{UpsertUserRequest, UpsertUserResponse};
use duet_types::events::StoreEvent;

use crate::convert::user_from_row;
use crate::{AppState, now_ms};

/// Identity sync: called on every session load with whatever the identity
/// provider currently says about the user.
pub async fn upsert_user(
    State(state): State<AppState>,
    Json(req): Json<UpsertUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.external_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let user_id = req.external_id.clone();
    tokio::task::spawn_blocking(move || {
        db.db.upsert_user(
            &req.external_id,
            &req.display_name,
            &req.email,
            &req.avatar_url,
            now_ms(),
        )
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("upsert_user failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    state.dispatcher.broadcast(StoreEvent::UserUpserted {
        user_id: user_id.clone(),
    });

    Ok(Json(UpsertUserResponse { user_id }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let row = tokio::task::spawn_blocking(move || db.db.get_user(&external_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("get_user failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(user_from_row(row)))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    /// The caller's own id — the contact list never shows yourself.
    pub excluding: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.all_users_excluding(&query.excluding))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("list_users failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let users: Vec<_> = rows.into_iter().map(user_from_row).collect();
    Ok(Json(users))
}
