use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message, User};

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertUserRequest {
    pub external_id: String,
    pub display_name: String,
    pub email: String,
    pub avatar_url: String,
}

#[derive(Debug, Serialize)]
pub struct UpsertUserResponse {
    pub user_id: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub user_id: String,
    pub other_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct OpenConversationResponse {
    pub conversation_id: Uuid,
}

/// A conversation as the conversation list renders it: the row itself,
/// the counterpart joined in (None if their user record is gone), the
/// latest message, and the caller's unread count.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other_user: Option<User>,
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: Uuid,
}

// -- Read tracking --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

// -- Typing --

/// `typing: true` refreshes the caller's typing mark, `false` clears it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetTypingRequest {
    pub user_id: String,
    pub typing: bool,
}

// -- Presence --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPresenceRequest {
    pub user_id: String,
    pub online: bool,
}
