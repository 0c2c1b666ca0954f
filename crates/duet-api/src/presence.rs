use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::Query;
use serde::Deserialize;
use tracing::error;

use duet_types::api::SetPresenceRequest;
use duet_types::events::StoreEvent;

use crate::convert::presence_from_row;
use crate::{AppState, now_ms};

/// Heartbeat / lifecycle endpoint: the client posts `online: true` on
/// connect and on its heartbeat interval, `online: false` on teardown.
pub async fn set_presence(
    State(state): State<AppState>,
    Json(req): Json<SetPresenceRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let uid = req.user_id.clone();
    let online = req.online;
    tokio::task::spawn_blocking(move || db.db.set_presence(&uid, online, now_ms()))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("set_presence failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    state.dispatcher.broadcast(StoreEvent::PresenceChanged {
        user_id: req.user_id,
        online: req.online,
    });

    Ok(StatusCode::NO_CONTENT)
}

/// Repeated `user_id` query parameters: `/presence?user_id=a&user_id=b`.
#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    #[serde(default)]
    pub user_id: Vec<String>,
}

pub async fn get_presence(
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.presence_for_users(&query.user_id, now_ms()))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("get_presence failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let marks: Vec<_> = rows.into_iter().map(presence_from_row).collect();
    Ok(Json(marks))
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
    async fn set_presence_persists_and_broadcasts() {
        let state = state();
        let mut rx = state.dispatcher.subscribe();

        let status = set_presence(
            State(state.clone()),
            Json(SetPresenceRequest { user_id: "a1".into(), online: true }),
        )
        .await
        .unwrap()
        .into_response()
        .status();
        assert_eq!(status, StatusCode::NO_CONTENT);

        match rx.try_recv().unwrap() {
            StoreEvent::PresenceChanged { user_id, online } => {
                assert_eq!(user_id, "a1");
                assert!(online);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let marks = state
            .db
            .presence_for_users(&["a1".into()], crate::now_ms())
            .unwrap();
        assert_eq!(marks.len(), 1);
        assert!(marks[0].online);
    }
}
