use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use duet_api::{AppState, AppStateInner, conversations, messages, presence, typing, unread, users};
use duet_gateway::connection;
use duet_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duet=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("DUET_DB_PATH").unwrap_or_else(|_| "duet.db".into());
    let host = std::env::var("DUET_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("DUET_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = duet_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: dispatcher.clone(),
    });

    // Routes
    let app = Router::new()
        .route("/users", post(users::upsert_user))
        .route("/users", get(users::list_users))
        .route("/users/{external_id}", get(users::get_user))
        .route("/users/{external_id}/conversations", get(conversations::list_conversations))
        .route("/users/{external_id}/unread", get(unread::all_unread_counts))
        .route("/conversations", post(conversations::open_conversation))
        .route("/conversations/{conversation_id}/messages", get(messages::list_messages))
        .route("/conversations/{conversation_id}/messages", post(messages::send_message))
        .route("/conversations/{conversation_id}/read", post(unread::mark_read))
        .route("/conversations/{conversation_id}/unread", get(unread::unread_count))
        .route("/conversations/{conversation_id}/typing", post(typing::set_typing))
        .route("/conversations/{conversation_id}/typing", get(typing::get_typing))
        .route("/presence", post(presence::set_presence))
        .route("/presence", get(presence::get_presence))
        .route("/subscribe", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Duet server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}
