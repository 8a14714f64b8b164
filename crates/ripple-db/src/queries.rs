use crate::models::{ConversationRow, MessageRow, ReactionRow, StatusRow, UserRow};
use crate::{Database, fmt_ts};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

/// Outcome of a reaction merge for one (message, user) pair.
#[derive(Debug, PartialEq, Eq)]
pub enum ReactionMerge {
    Added,
    Replaced,
    Removed,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("{} WHERE username = ?1", SELECT_USER),
                    [username],
                    map_user,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(&format!("{} WHERE id = ?1", SELECT_USER), [id], map_user)
                .optional()?;
            Ok(row)
        })
    }

    /// Record a presence transition durably. `last_seen` always moves to
    /// the time of the transition.
    pub fn set_presence(&self, user_id: &str, is_online: bool, last_seen: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                params![user_id, is_online as i64, last_seen],
            )?;
            Ok(())
        })
    }

    /// Durable presence read: (is_online, last_seen).
    pub fn presence(&self, user_id: &str) -> Result<Option<(bool, Option<String>)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT is_online, last_seen FROM users WHERE id = ?1",
                    [user_id],
                    |row| Ok((row.get::<_, i64>(0)? != 0, row.get(1)?)),
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Conversations --

    /// Resolve the conversation for an unordered user pair, creating it if
    /// absent. The pair is canonicalized by sorting, and INSERT OR IGNORE
    /// against the UNIQUE(participant_a, participant_b) constraint makes
    /// concurrent creation idempotent.
    pub fn get_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        new_id: &str,
    ) -> Result<String> {
        let (first, second) = canonical_pair(user_a, user_b);
        let now = fmt_ts(Utc::now());

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations
                     (id, participant_a, participant_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![new_id, first, second, now],
            )?;

            let id = conn.query_row(
                "SELECT id FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
                [first, second],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    pub fn conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, participant_a, participant_b, last_message_id,
                            unread_count, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                    [id],
                    map_conversation,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// All conversations the user participates in, most recently active first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_a, participant_b, last_message_id,
                        unread_count, created_at, updated_at
                 FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Aggregate update after a new message: bump unread_count and
    /// updated_at in one statement; text messages also become the
    /// conversation's last message.
    pub fn record_new_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        has_text: bool,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        self.with_conn(|conn| {
            if has_text {
                conn.execute(
                    "UPDATE conversations
                     SET last_message_id = ?2, unread_count = unread_count + 1, updated_at = ?3
                     WHERE id = ?1",
                    params![conversation_id, message_id, now],
                )?;
            } else {
                conn.execute(
                    "UPDATE conversations
                     SET unread_count = unread_count + 1, updated_at = ?2
                     WHERE id = ?1",
                    params![conversation_id, now],
                )?;
            }
            Ok(())
        })
    }

    // -- Messages --

    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: Option<&str>,
        media_url: Option<&str>,
        content_type: &str,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                     (id, conversation_id, sender_id, receiver_id,
                      content, media_url, content_type, message_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'sent', ?8)",
                params![
                    id,
                    conversation_id,
                    sender_id,
                    receiver_id,
                    content,
                    media_url,
                    content_type,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_MESSAGE),
                    [id],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Messages of a conversation, oldest first.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE conversation_id = ?1 ORDER BY created_at ASC",
                SELECT_MESSAGE
            ))?;
            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Advance a message from sent to delivered. The WHERE clause is the
    /// monotonicity guard: a message already delivered or read is untouched.
    /// Returns whether the transition happened.
    pub fn mark_delivered(&self, message_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET message_status = 'delivered'
                 WHERE id = ?1 AND message_status = 'sent'",
                [message_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Bulk read transition for messages addressed to `reader_id`. Returns
    /// (message_id, sender_id) for every message that actually transitioned,
    /// so the caller can notify each sender.
    pub fn mark_read(&self, message_ids: &[String], reader_id: &str) -> Result<Vec<(String, String)>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders = placeholders(2, message_ids.len());
            let mut params_vec: Vec<&dyn rusqlite::types::ToSql> = vec![&reader_id];
            params_vec.extend(message_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let mut stmt = conn.prepare(&format!(
                "SELECT id, sender_id FROM messages
                 WHERE receiver_id = ?1 AND message_status IN ('sent','delivered')
                   AND id IN ({})",
                placeholders
            ))?;
            let affected: Vec<(String, String)> = stmt
                .query_map(params_vec.as_slice(), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            conn.execute(
                &format!(
                    "UPDATE messages SET message_status = 'read'
                     WHERE receiver_id = ?1 AND message_status IN ('sent','delivered')
                       AND id IN ({})",
                    placeholders
                ),
                params_vec.as_slice(),
            )?;

            Ok(affected)
        })
    }

    /// Implicit bulk read on conversation fetch: every message in the
    /// conversation addressed to `reader_id` still in sent/delivered goes to
    /// read, and the conversation's unread counter resets, as one logical
    /// operation under the connection lock.
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
    ) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id FROM messages
                 WHERE conversation_id = ?1 AND receiver_id = ?2
                   AND message_status IN ('sent','delivered')",
            )?;
            let affected: Vec<(String, String)> = stmt
                .query_map([conversation_id, reader_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            conn.execute(
                "UPDATE messages SET message_status = 'read'
                 WHERE conversation_id = ?1 AND receiver_id = ?2
                   AND message_status IN ('sent','delivered')",
                [conversation_id, reader_id],
            )?;

            conn.execute(
                "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
                [conversation_id],
            )?;

            Ok(affected)
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM reactions WHERE message_id = ?1", [id])?;
            conn.execute(
                "UPDATE conversations SET last_message_id = NULL WHERE last_message_id = ?1",
                [id],
            )?;
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Reactions --

    /// Merge a reaction for one (message, user) pair: absent -> add, same
    /// emoji -> remove (toggle), different emoji -> replace. Runs under a
    /// single lock acquisition so concurrent merges from different users
    /// interleave without losing entries.
    pub fn merge_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<ReactionMerge> {
        let now = fmt_ts(Utc::now());
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    [message_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![message_id, user_id, emoji, now],
                    )?;
                    Ok(ReactionMerge::Added)
                }
                Some(current) if current == emoji => {
                    conn.execute(
                        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                        [message_id, user_id],
                    )?;
                    Ok(ReactionMerge::Removed)
                }
                Some(_) => {
                    conn.execute(
                        "UPDATE reactions SET emoji = ?3, created_at = ?4
                         WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id, user_id, emoji, now],
                    )?;
                    Ok(ReactionMerge::Replaced)
                }
            }
        })
    }

    pub fn reactions_for_message(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, emoji FROM reactions
                 WHERE message_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([message_id], map_reaction)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})",
                placeholders(1, message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params_vec: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params_vec.as_slice(), map_reaction)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Statuses --

    pub fn insert_status(
        &self,
        id: &str,
        user_id: &str,
        content: Option<&str>,
        media_url: Option<&str>,
        content_type: &str,
        expires_at: &str,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO statuses
                     (id, user_id, content, media_url, content_type, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, user_id, content, media_url, content_type, expires_at, now],
            )?;
            Ok(())
        })
    }

    pub fn status(&self, id: &str) -> Result<Option<StatusRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, content, media_url, content_type, expires_at, created_at
                     FROM statuses WHERE id = ?1",
                    [id],
                    map_status,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Unexpired statuses, newest first. Expiry is evaluated here at read
    /// time; nothing purges expired rows.
    pub fn active_statuses(&self, now: &str) -> Result<Vec<StatusRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, media_url, content_type, expires_at, created_at
                 FROM statuses WHERE expires_at > ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([now], map_status)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Append-once viewer record. Returns false if the viewer was already
    /// present (INSERT OR IGNORE makes repeat views no-ops).
    pub fn add_status_viewer(&self, status_id: &str, viewer_id: &str) -> Result<bool> {
        let now = fmt_ts(Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO status_viewers (status_id, viewer_id, viewed_at)
                 VALUES (?1, ?2, ?3)",
                params![status_id, viewer_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn status_viewers(&self, status_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT viewer_id FROM status_viewers
                 WHERE status_id = ?1 ORDER BY viewed_at ASC",
            )?;
            let rows = stmt
                .query_map([status_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_status(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM status_viewers WHERE status_id = ?1", [id])?;
            conn.execute("DELETE FROM statuses WHERE id = ?1", [id])?;
            Ok(())
        })
    }

}

/// Sort the pair so (a, b) and (b, a) address the same conversation row.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

const SELECT_USER: &str = "SELECT id, username, password, avatar_url, is_online, last_seen, created_at
 FROM users";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        avatar_url: row.get(3)?,
        is_online: row.get::<_, i64>(4)? != 0,
        last_seen: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, sender_id, receiver_id,
        content, media_url, content_type, message_status, created_at
 FROM messages";

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        last_message_id: row.get(3)?,
        unread_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        media_url: row.get(5)?,
        content_type: row.get(6)?,
        message_status: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        message_id: row.get(0)?,
        user_id: row.get(1)?,
        emoji: row.get(2)?,
    })
}

fn map_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok(StatusRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        media_url: row.get(3)?,
        content_type: row.get(4)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, name, "hash").unwrap();
        id
    }

    fn send(db: &Database, conv: &str, sender: &str, receiver: &str, text: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, conv, sender, receiver, Some(text), None, "text")
            .unwrap();
        db.record_new_message(conv, &id, true).unwrap();
        id
    }

    #[test]
    fn conversation_is_unique_per_unordered_pair() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let c1 = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        let c2 = db
            .get_or_create_conversation(&bob, &alice, &Uuid::new_v4().to_string())
            .unwrap();
        let c3 = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();

        assert_eq!(c1, c2);
        assert_eq!(c1, c3);
        assert_eq!(db.conversations_for_user(&alice).unwrap().len(), 1);
    }

    #[test]
    fn message_status_is_monotonic() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        let msg = send(&db, &conv, &alice, &bob, "hi");

        assert!(db.mark_delivered(&msg).unwrap());
        // Second delivery attempt is a no-op
        assert!(!db.mark_delivered(&msg).unwrap());

        let affected = db.mark_read(&[msg.clone()], &bob).unwrap();
        assert_eq!(affected, vec![(msg.clone(), alice.clone())]);

        // Read never regresses to delivered
        assert!(!db.mark_delivered(&msg).unwrap());
        assert_eq!(db.message(&msg).unwrap().unwrap().message_status, "read");

        // Re-reading is idempotent: nothing left to transition
        assert!(db.mark_read(&[msg], &bob).unwrap().is_empty());
    }

    #[test]
    fn mark_read_only_touches_messages_addressed_to_reader() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        let to_bob = send(&db, &conv, &alice, &bob, "for bob");
        let to_alice = send(&db, &conv, &bob, &alice, "for alice");

        // Bob cannot mark his own outbound message as read
        let affected = db
            .mark_read(&[to_bob.clone(), to_alice.clone()], &bob)
            .unwrap();
        assert_eq!(affected, vec![(to_bob, alice)]);
        assert_eq!(
            db.message(&to_alice).unwrap().unwrap().message_status,
            "sent"
        );
    }

    #[test]
    fn conversation_fetch_reads_everything_and_resets_unread() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        send(&db, &conv, &alice, &bob, "one");
        send(&db, &conv, &alice, &bob, "two");

        assert_eq!(db.conversation(&conv).unwrap().unwrap().unread_count, 2);

        let affected = db.mark_conversation_read(&conv, &bob).unwrap();
        assert_eq!(affected.len(), 2);
        assert!(affected.iter().all(|(_, sender)| *sender == alice));
        assert_eq!(db.conversation(&conv).unwrap().unwrap().unread_count, 0);

        for msg in db.messages_for_conversation(&conv).unwrap() {
            assert_eq!(msg.message_status, "read");
        }
    }

    #[test]
    fn unread_count_increments_on_every_send() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();

        send(&db, &conv, &alice, &bob, "1");
        send(&db, &conv, &bob, &alice, "2");
        send(&db, &conv, &alice, &bob, "3");

        // Single shared counter, bumped on every send regardless of direction
        assert_eq!(db.conversation(&conv).unwrap().unwrap().unread_count, 3);
    }

    #[test]
    fn reaction_toggle_and_replace() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        let msg = send(&db, &conv, &alice, &bob, "hi");

        assert_eq!(
            db.merge_reaction(&msg, &bob, "👍").unwrap(),
            ReactionMerge::Added
        );
        assert_eq!(db.reactions_for_message(&msg).unwrap().len(), 1);

        // Different emoji replaces, never duplicates
        assert_eq!(
            db.merge_reaction(&msg, &bob, "🔥").unwrap(),
            ReactionMerge::Replaced
        );
        let reactions = db.reactions_for_message(&msg).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "🔥");

        // Same emoji toggles off
        assert_eq!(
            db.merge_reaction(&msg, &bob, "🔥").unwrap(),
            ReactionMerge::Removed
        );
        assert!(db.reactions_for_message(&msg).unwrap().is_empty());
    }

    #[test]
    fn reactions_from_two_users_coexist() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        let msg = send(&db, &conv, &alice, &bob, "hi");

        db.merge_reaction(&msg, &alice, "👍").unwrap();
        db.merge_reaction(&msg, &bob, "👍").unwrap();
        assert_eq!(db.reactions_for_message(&msg).unwrap().len(), 2);
    }

    #[test]
    fn status_viewers_are_append_once() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let status_id = Uuid::new_v4().to_string();
        let expires = fmt_ts(Utc::now() + Duration::hours(24));
        db.insert_status(&status_id, &alice, Some("hello"), None, "text", &expires)
            .unwrap();

        assert!(db.add_status_viewer(&status_id, &bob).unwrap());
        assert!(!db.add_status_viewer(&status_id, &bob).unwrap());
        assert_eq!(db.status_viewers(&status_id).unwrap(), vec![bob]);
    }

    #[test]
    fn expired_statuses_are_filtered_at_read_time() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        let live = Uuid::new_v4().to_string();
        db.insert_status(
            &live,
            &alice,
            Some("fresh"),
            None,
            "text",
            &fmt_ts(Utc::now() + Duration::hours(24)),
        )
        .unwrap();

        let stale = Uuid::new_v4().to_string();
        db.insert_status(
            &stale,
            &alice,
            Some("old"),
            None,
            "text",
            &fmt_ts(Utc::now() - Duration::hours(1)),
        )
        .unwrap();

        let active = db.active_statuses(&fmt_ts(Utc::now())).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live);

        // The expired row is still there, just invisible to reads
        assert!(db.status(&stale).unwrap().is_some());
    }

    #[test]
    fn delete_message_clears_reactions_and_last_message() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db
            .get_or_create_conversation(&alice, &bob, &Uuid::new_v4().to_string())
            .unwrap();
        let msg = send(&db, &conv, &alice, &bob, "bye");
        db.merge_reaction(&msg, &bob, "👍").unwrap();

        db.delete_message(&msg).unwrap();
        assert!(db.message(&msg).unwrap().is_none());
        assert!(db.reactions_for_message(&msg).unwrap().is_empty());
        assert!(
            db.conversation(&conv)
                .unwrap()
                .unwrap()
                .last_message_id
                .is_none()
        );
    }

    #[test]
    fn presence_round_trip() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        let now = fmt_ts(Utc::now());
        db.set_presence(&alice, true, &now).unwrap();
        assert_eq!(db.presence(&alice).unwrap(), Some((true, Some(now.clone()))));

        db.set_presence(&alice, false, &now).unwrap();
        assert_eq!(db.presence(&alice).unwrap(), Some((false, Some(now))));

        assert_eq!(db.presence("nobody").unwrap(), None);
    }
}
