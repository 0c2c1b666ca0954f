use tracing::warn;
use uuid::Uuid;

use duet_db::models::{ConversationRow, MessageRow, PresenceRow, UserRow};
use duet_types::models::{Conversation, Message, PresenceMark, User};

/// Parse a stored id, falling back to the nil uuid on corruption. Stored
/// ids are always written from `Uuid::new_v4`, so a parse failure means a
/// corrupted row — worth a log line, not a failed request.
pub fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn user_from_row(row: UserRow) -> User {
    User {
        external_id: row.external_id,
        display_name: row.display_name,
        email: row.email,
        avatar_url: row.avatar_url,
        created_at: row.created_at,
    }
}

pub fn conversation_from_row(row: ConversationRow) -> Conversation {
    Conversation {
        id: parse_id(&row.id, "conversation"),
        participant_one: row.participant_one,
        participant_two: row.participant_two,
        created_at: row.created_at,
    }
}

pub fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: parse_id(&row.id, "message"),
        conversation_id: parse_id(&row.conversation_id, "conversation"),
        sender_id: row.sender_id,
        text: row.text,
        created_at: row.created_at,
    }
}

pub fn presence_from_row(row: PresenceRow) -> PresenceMark {
    PresenceMark {
        user_id: row.user_id,
        online: row.online,
        last_seen_at: row.last_seen_at,
    }
}
