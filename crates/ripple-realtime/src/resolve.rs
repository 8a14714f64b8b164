//! Row-to-wire resolution: attach sender/receiver identity and merged
//! reactions so every pushed or returned payload is server-truth.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use uuid::Uuid;

use ripple_db::models::{MessageRow, StatusRow};
use ripple_db::{Database, parse_ts};
use ripple_types::api::{
    ContentType, MessageResponse, MessageStatus, ReactionEntry, StatusResponse, UserSummary,
};

pub fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse().map_err(|e| anyhow!("bad uuid '{}': {}", s, e))
}

pub fn user_summary(db: &Database, id: &str) -> Result<UserSummary> {
    let row = db
        .get_user_by_id(id)?
        .with_context(|| format!("user {} not found", id))?;
    Ok(UserSummary {
        id: parse_uuid(&row.id)?,
        username: row.username,
        avatar_url: row.avatar_url,
    })
}

pub fn resolve_message(db: &Database, row: &MessageRow) -> Result<MessageResponse> {
    let reactions = db
        .reactions_for_message(&row.id)?
        .iter()
        .map(|r| {
            Ok(ReactionEntry {
                user_id: parse_uuid(&r.user_id)?,
                emoji: r.emoji.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    build_message(db, row, reactions, &mut HashMap::new())
}

/// Batch resolution for a conversation fetch: reactions in one query,
/// user summaries cached across rows.
pub fn resolve_messages(db: &Database, rows: &[MessageRow]) -> Result<Vec<MessageResponse>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut reaction_map: HashMap<String, Vec<ReactionEntry>> = HashMap::new();
    for r in db.reactions_for_messages(&ids)? {
        reaction_map
            .entry(r.message_id.clone())
            .or_default()
            .push(ReactionEntry {
                user_id: parse_uuid(&r.user_id)?,
                emoji: r.emoji,
            });
    }

    let mut users: HashMap<String, UserSummary> = HashMap::new();
    rows.iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            build_message(db, row, reactions, &mut users)
        })
        .collect()
}

pub fn resolve_status(db: &Database, row: &StatusRow) -> Result<StatusResponse> {
    let viewers = db
        .status_viewers(&row.id)?
        .iter()
        .map(|v| parse_uuid(v))
        .collect::<Result<Vec<_>>>()?;

    Ok(StatusResponse {
        id: parse_uuid(&row.id)?,
        user: user_summary(db, &row.user_id)?,
        content: row.content.clone(),
        media_url: row.media_url.clone(),
        content_type: parse_content_type(&row.content_type)?,
        viewers,
        expires_at: parse_ts(&row.expires_at)?,
        created_at: parse_ts(&row.created_at)?,
    })
}

fn build_message(
    db: &Database,
    row: &MessageRow,
    reactions: Vec<ReactionEntry>,
    users: &mut HashMap<String, UserSummary>,
) -> Result<MessageResponse> {
    let sender = cached_user(db, users, &row.sender_id)?;
    let receiver = cached_user(db, users, &row.receiver_id)?;

    Ok(MessageResponse {
        id: parse_uuid(&row.id)?,
        conversation_id: parse_uuid(&row.conversation_id)?,
        sender,
        receiver,
        content: row.content.clone(),
        media_url: row.media_url.clone(),
        content_type: parse_content_type(&row.content_type)?,
        message_status: MessageStatus::parse(&row.message_status)
            .with_context(|| format!("bad message_status '{}'", row.message_status))?,
        reactions,
        created_at: parse_ts(&row.created_at)?,
    })
}

fn cached_user(
    db: &Database,
    users: &mut HashMap<String, UserSummary>,
    id: &str,
) -> Result<UserSummary> {
    if let Some(user) = users.get(id) {
        return Ok(user.clone());
    }
    let user = user_summary(db, id)?;
    users.insert(id.to_string(), user.clone());
    Ok(user)
}

fn parse_content_type(s: &str) -> Result<ContentType> {
    ContentType::parse(s).with_context(|| format!("bad content_type '{}'", s))
}
