use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            avatar_url  TEXT,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- participant_a < participant_b (sorted before insert), so the
        -- UNIQUE constraint holds one row per unordered pair.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            participant_a   TEXT NOT NULL REFERENCES users(id),
            participant_b   TEXT NOT NULL REFERENCES users(id),
            last_message_id TEXT,
            unread_count    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(participant_a, participant_b)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            content         TEXT,
            media_url       TEXT,
            content_type    TEXT NOT NULL CHECK (content_type IN ('text','image','video')),
            message_status  TEXT NOT NULL DEFAULT 'sent'
                            CHECK (message_status IN ('sent','delivered','read')),
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver_status
            ON messages(receiver_id, message_status);

        -- One reaction per (message, user); changing emoji overwrites.
        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS statuses (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL REFERENCES users(id),
            content      TEXT,
            media_url    TEXT,
            content_type TEXT NOT NULL CHECK (content_type IN ('text','image','video')),
            expires_at   TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_statuses_expiry
            ON statuses(expires_at);

        CREATE TABLE IF NOT EXISTS status_viewers (
            status_id   TEXT NOT NULL REFERENCES statuses(id),
            viewer_id   TEXT NOT NULL REFERENCES users(id),
            viewed_at   TEXT NOT NULL,
            PRIMARY KEY (status_id, viewer_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
