//! Database row types — these map directly to SQLite rows.
//! Distinct from the ripple-types API models to keep the storage layer
//! independent of the wire format.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub last_message_id: Option<String>,
    pub unread_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub content_type: String,
    pub message_status: String,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct StatusRow {
    pub id: String,
    pub user_id: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub content_type: String,
    pub expires_at: String,
    pub created_at: String,
}
