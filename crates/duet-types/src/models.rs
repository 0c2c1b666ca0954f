use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A synced identity-provider user. `external_id` is the opaque id the
/// provider assigns; it is the key everything else hangs off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub external_id: String,
    pub display_name: String,
    pub email: String,
    pub avatar_url: String,
    pub created_at: i64,
}

/// A one-on-one conversation. Participants are stored in canonical
/// (lexicographic) order so the unordered pair maps to exactly one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_one: String,
    pub participant_two: String,
    pub created_at: i64,
}

impl Conversation {
    /// The participant that isn't `user_id`. Returns `None` if `user_id`
    /// is not a participant at all.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        if self.participant_one == user_id {
            Some(&self.participant_two)
        } else if self.participant_two == user_id {
            Some(&self.participant_one)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub text: String,
    pub created_at: i64,
}

/// Per-user-per-conversation read watermark. Messages at or below
/// `last_read_at` count as read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadMark {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub last_read_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingMark {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub last_typed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceMark {
    pub user_id: String,
    pub online: bool,
    pub last_seen_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_picks_the_other_participant() {
        let conv = Conversation {
            id: Uuid::new_v4(),
            participant_one: "alice".into(),
            participant_two: "bob".into(),
            created_at: 0,
        };

        assert_eq!(conv.counterpart("alice"), Some("bob"));
        assert_eq!(conv.counterpart("bob"), Some("alice"));
        assert_eq!(conv.counterpart("carol"), None);
    }
}
