use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            external_id   TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            email         TEXT NOT NULL,
            avatar_url    TEXT NOT NULL,
            created_at    INTEGER NOT NULL
        );

        -- Participants are stored in canonical (lexicographic) order, so the
        -- UNIQUE constraint guarantees at most one row per unordered pair.
        CREATE TABLE IF NOT EXISTS conversations (
            id               TEXT PRIMARY KEY,
            participant_one  TEXT NOT NULL,
            participant_two  TEXT NOT NULL,
            created_at       INTEGER NOT NULL,
            UNIQUE(participant_one, participant_two)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_one
            ON conversations(participant_one);
        CREATE INDEX IF NOT EXISTS idx_conversations_two
            ON conversations(participant_two);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL,
            text             TEXT NOT NULL,
            created_at       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS last_read (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            user_id          TEXT NOT NULL,
            last_read_at     INTEGER NOT NULL,
            PRIMARY KEY(conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS typing (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            user_id          TEXT NOT NULL,
            last_typed_at    INTEGER NOT NULL,
            PRIMARY KEY(conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS presence (
            user_id       TEXT PRIMARY KEY,
            online        INTEGER NOT NULL,
            last_seen_at  INTEGER NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
