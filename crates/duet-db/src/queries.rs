use crate::models::{ConversationRow, MessageRow, PresenceRow, UserRow};
use crate::{Database, PRESENCE_TTL_MS, TYPING_TTL_MS};
use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

/// All time-sensitive operations take `now_ms` explicitly so callers (and
/// tests) control the clock. Handlers pass `chrono::Utc::now()` millis.
impl Database {
    // -- Users --

    /// Idempotent upsert keyed by external id. Re-running with the same
    /// provider data converges to the same row; changed provider data
    /// (new name, new avatar) overwrites in place.
    pub fn upsert_user(
        &self,
        external_id: &str,
        display_name: &str,
        email: &str,
        avatar_url: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (external_id, display_name, email, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(external_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     email = excluded.email,
                     avatar_url = excluded.avatar_url",
                rusqlite::params![external_id, display_name, email, avatar_url, now_ms],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, external_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, external_id))
    }

    pub fn all_users_excluding(&self, external_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT external_id, display_name, email, avatar_url, created_at
                 FROM users WHERE external_id != ?1
                 ORDER BY display_name",
            )?;

            let rows = stmt
                .query_map([external_id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Conversations --

    /// Resolve the unordered pair {a, b} to its conversation id, creating
    /// the row on first contact. Commutative: participants are canonicalized
    /// to lexicographic order before lookup and insert, and the UNIQUE
    /// constraint on that ordering means a lost race resolves to the winning
    /// row instead of a duplicate. Returns (id, created).
    pub fn get_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        now_ms: i64,
    ) -> Result<(String, bool)> {
        let (one, two) = canonical_pair(user_a, user_b);

        self.with_conn(|conn| {
            if let Some(id) = query_conversation_id(conn, one, two)? {
                return Ok((id, false));
            }

            let id = Uuid::new_v4().to_string();
            let inserted = conn.execute(
                "INSERT INTO conversations (id, participant_one, participant_two, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(participant_one, participant_two) DO NOTHING",
                rusqlite::params![id, one, two, now_ms],
            )?;

            if inserted == 1 {
                return Ok((id, true));
            }

            // Conflict: someone else created the row between our read and
            // write. Re-read; the row must exist now.
            let existing = query_conversation_id(conn, one, two)?
                .ok_or_else(|| anyhow::anyhow!("conversation vanished after insert conflict"))?;
            Ok((existing, false))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_one, participant_two, created_at
                 FROM conversations WHERE id = ?1",
            )?;

            let row = stmt.query_row([id], map_conversation_row).optional()?;
            Ok(row)
        })
    }

    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_one, participant_two, created_at
                 FROM conversations
                 WHERE participant_one = ?1 OR participant_two = ?1",
            )?;

            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, conversation_id, sender_id, text, now_ms],
            )?;
            Ok(())
        })
    }

    /// Every message in the conversation, oldest first. Same-millisecond
    /// ties fall back to insertion order.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, text, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([conversation_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn last_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, text, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            )?;

            let row = stmt.query_row([conversation_id], map_message_row).optional()?;
            Ok(row)
        })
    }

    // -- Read tracking --

    pub fn mark_read(&self, conversation_id: &str, user_id: &str, now_ms: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO last_read (conversation_id, user_id, last_read_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                     last_read_at = excluded.last_read_at",
                rusqlite::params![conversation_id, user_id, now_ms],
            )?;
            Ok(())
        })
    }

    /// Messages newer than the caller's watermark, not sent by the caller.
    /// No watermark row means nothing has been read (watermark 0).
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| query_unread_count(conn, conversation_id, user_id))
    }

    /// Unread counts for every conversation the user participates in,
    /// including ones they have never opened. Derived from the conversation
    /// table, not the watermark table, so never-read conversations report
    /// their full from-the-other-side message count.
    pub fn unread_counts_for_user(&self, user_id: &str) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, COUNT(m.id)
                 FROM conversations c
                 LEFT JOIN last_read r
                     ON r.conversation_id = c.id AND r.user_id = ?1
                 LEFT JOIN messages m
                     ON m.conversation_id = c.id
                     AND m.sender_id != ?1
                     AND m.created_at > COALESCE(r.last_read_at, 0)
                 WHERE c.participant_one = ?1 OR c.participant_two = ?1
                 GROUP BY c.id",
            )?;

            let rows = stmt
                .query_map([user_id], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Typing --

    /// Refresh the caller's typing mark. Also sweeps marks past the TTL so
    /// rows from crashed clients don't accumulate.
    pub fn set_typing(&self, conversation_id: &str, user_id: &str, now_ms: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM typing WHERE last_typed_at <= ?1",
                [now_ms - TYPING_TTL_MS],
            )?;
            conn.execute(
                "INSERT INTO typing (conversation_id, user_id, last_typed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                     last_typed_at = excluded.last_typed_at",
                rusqlite::params![conversation_id, user_id, now_ms],
            )?;
            Ok(())
        })
    }

    pub fn clear_typing(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM typing WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Users currently typing in the conversation, excluding the caller.
    /// Marks older than TYPING_TTL_MS are ignored even if a crashed client
    /// never cleared them.
    pub fn typing_for_conversation(
        &self,
        conversation_id: &str,
        excluding_user_id: &str,
        now_ms: i64,
    ) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM typing
                 WHERE conversation_id = ?1
                 AND user_id != ?2
                 AND last_typed_at > ?3
                 ORDER BY user_id",
            )?;

            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, excluding_user_id, now_ms - TYPING_TTL_MS],
                    |row| row.get(0),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Presence --

    pub fn set_presence(&self, user_id: &str, online: bool, now_ms: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (user_id, online, last_seen_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     online = excluded.online,
                     last_seen_at = excluded.last_seen_at",
                rusqlite::params![user_id, online, now_ms],
            )?;
            Ok(())
        })
    }

    /// Batch presence lookup, preserving input order; ids with no presence
    /// row are omitted. A row still flagged online whose heartbeat stopped
    /// more than PRESENCE_TTL_MS ago is reported offline — unload events
    /// from crashed clients never arrive, so the flag alone can't be trusted.
    pub fn presence_for_users(&self, user_ids: &[String], now_ms: i64) -> Result<Vec<PresenceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, online, last_seen_at FROM presence WHERE user_id = ?1",
            )?;

            let mut out = Vec::new();
            for id in user_ids {
                let row = stmt
                    .query_row([id.as_str()], |row| {
                        Ok(PresenceRow {
                            user_id: row.get(0)?,
                            online: row.get(1)?,
                            last_seen_at: row.get(2)?,
                        })
                    })
                    .optional()?;

                if let Some(mut mark) = row {
                    if mark.online && now_ms - mark.last_seen_at > PRESENCE_TTL_MS {
                        mark.online = false;
                    }
                    out.push(mark);
                }
            }

            Ok(out)
        })
    }
}

/// Lexicographic canonical ordering for an unordered participant pair.
fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

fn query_conversation_id(conn: &Connection, one: &str, two: &str) -> Result<Option<String>> {
    let row = conn
        .query_row(
            "SELECT id FROM conversations WHERE participant_one = ?1 AND participant_two = ?2",
            [one, two],
            |row| row.get(0),
        )
        .optional()?;

    Ok(row)
}

fn query_user(conn: &Connection, external_id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT external_id, display_name, email, avatar_url, created_at
         FROM users WHERE external_id = ?1",
    )?;

    let row = stmt.query_row([external_id], map_user_row).optional()?;
    Ok(row)
}

fn query_unread_count(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ?1
         AND sender_id != ?2
         AND created_at > COALESCE(
             (SELECT last_read_at FROM last_read
              WHERE conversation_id = ?1 AND user_id = ?2),
             0)",
        [conversation_id, user_id],
        |row| row.get(0),
    )?;

    Ok(count as u64)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        external_id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_one: row.get(1)?,
        participant_two: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
