pub mod conversations;
pub mod convert;
pub mod messages;
pub mod presence;
pub mod typing;
pub mod unread;
pub mod users;

use std::sync::Arc;

use duet_db::Database;
use duet_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
}

/// Current wall-clock time as unix milliseconds — the timestamp unit used
/// throughout the store.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
