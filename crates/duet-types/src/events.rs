use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Change notifications pushed over the subscription gateway. One event is
/// emitted per successful store mutation; subscribers re-run the read they
/// care about rather than patching state from the event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A user record was created or refreshed from the identity provider
    UserUpserted { user_id: String },

    /// First contact between two users created a conversation
    ConversationCreated {
        conversation_id: Uuid,
        participant_one: String,
        participant_two: String,
    },

    /// A message was appended
    MessageCreated {
        message_id: Uuid,
        conversation_id: Uuid,
        sender_id: String,
        created_at: i64,
    },

    /// A user's read watermark moved
    ReadMarked {
        conversation_id: Uuid,
        user_id: String,
    },

    /// A typing mark was refreshed or cleared
    TypingChanged {
        conversation_id: Uuid,
        user_id: String,
        typing: bool,
    },

    /// A user's presence flag was written
    PresenceChanged {
        user_id: String,
        online: bool,
    },
}

impl StoreEvent {
    /// Returns the conversation_id if this event is scoped to a specific
    /// conversation. Events that return `None` are global and are delivered
    /// to every subscriber.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::ConversationCreated { conversation_id, .. } => Some(*conversation_id),
            Self::MessageCreated { conversation_id, .. } => Some(*conversation_id),
            Self::ReadMarked { conversation_id, .. } => Some(*conversation_id),
            Self::TypingChanged { conversation_id, .. } => Some(*conversation_id),
            // UserUpserted and PresenceChanged are global
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the subscription socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SubscribeCommand {
    /// Restrict conversation-scoped events to the listed conversations.
    /// Global events (presence, user sync) are always delivered.
    Subscribe { conversation_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let event = StoreEvent::PresenceChanged {
            user_id: "u1".into(),
            online: true,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PresenceChanged");
        assert_eq!(json["data"]["user_id"], "u1");
        assert_eq!(json["data"]["online"], true);
    }

    #[test]
    fn presence_and_user_events_are_global() {
        let presence = StoreEvent::PresenceChanged {
            user_id: "u1".into(),
            online: false,
        };
        let upsert = StoreEvent::UserUpserted { user_id: "u1".into() };
        let typing = StoreEvent::TypingChanged {
            conversation_id: Uuid::new_v4(),
            user_id: "u1".into(),
            typing: true,
        };

        assert!(presence.conversation_id().is_none());
        assert!(upsert.conversation_id().is_none());
        assert!(typing.conversation_id().is_some());
    }
}
