use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ripple_db::parse_ts;
use ripple_realtime::connection::notify_read;
use ripple_realtime::resolve;
use ripple_types::api::{
    AddReactionRequest, Claims, ContentType, ConversationResponse, MarkReadRequest,
    MessageResponse, MessageStatus, ReactionEntry,
};
use ripple_types::events::ServerEvent;

use crate::error::ApiError;
use crate::media::{MediaStore, StoredMedia};
use crate::{AppState, with_db};

/// Parsed multipart body: plain fields plus an already-stored upload.
/// Storing the file up front means a failed upload aborts the operation
/// before anything is persisted.
pub(crate) struct UploadForm {
    pub fields: HashMap<String, String>,
    pub media: Option<StoredMedia>,
}

pub(crate) async fn read_form(
    store: &MediaStore,
    mut multipart: Multipart,
) -> Result<UploadForm, ApiError> {
    let mut fields = HashMap::new();
    let mut media = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let mime = field
                .content_type()
                .map(str::to_string)
                .ok_or_else(|| ApiError::Validation("file field has no content type".into()))?;
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("failed to read upload: {}", e)))?;
            media = Some(store.store(&mime, &data).await?);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::Validation(format!("malformed field '{}': {}", name, e)))?;
            fields.insert(name, value);
        }
    }

    Ok(UploadForm { fields, media })
}

/// Content rule shared by messages and statuses: an upload classifies the
/// entry as image/video (text may ride along as a caption); otherwise
/// non-empty trimmed text is required.
pub(crate) fn validated_content(
    text: Option<&String>,
    media: Option<&StoredMedia>,
    what: &str,
) -> Result<(Option<String>, ContentType), ApiError> {
    let trimmed = text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    match media {
        Some(stored) => Ok((trimmed, stored.content_type)),
        None => match trimmed {
            Some(content) => Ok((Some(content), ContentType::Text)),
            None => Err(ApiError::Validation(format!("{} content is required", what))),
        },
    }
}

/// The message delivery pipeline: resolve/create the conversation for the
/// canonical pair, validate content, persist as `sent`, update the
/// conversation aggregate, then push + advance to `delivered` if the
/// receiver is present. A receiver with no session is not an error — the
/// message waits at `sent` until their next fetch.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let sender_id = claims.sub;

    let form = read_form(&state.media, multipart).await?;
    let receiver_id: Uuid = form
        .fields
        .get("receiver_id")
        .ok_or_else(|| ApiError::Validation("receiver_id is required".into()))?
        .parse()
        .map_err(|_| ApiError::Validation("receiver_id is not a valid id".into()))?;

    let (content, content_type) =
        validated_content(form.fields.get("content"), form.media.as_ref(), "Message")?;
    let media_url = form.media.map(|m| m.url);

    let message_id = Uuid::new_v4();
    let mut resolved = with_db(&state.db, move |db| {
        let conversation_id = db.get_or_create_conversation(
            &sender_id.to_string(),
            &receiver_id.to_string(),
            &Uuid::new_v4().to_string(),
        )?;

        db.insert_message(
            &message_id.to_string(),
            &conversation_id,
            &sender_id.to_string(),
            &receiver_id.to_string(),
            content.as_deref(),
            media_url.as_deref(),
            content_type.as_str(),
        )?;
        db.record_new_message(&conversation_id, &message_id.to_string(), content.is_some())?;

        let row = db
            .message(&message_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("message vanished after insert".into()))?;
        Ok(resolve::resolve_message(db, &row)?)
    })
    .await?;

    // Immediate delivery if the receiver has a live session
    if state.dispatcher.is_online(receiver_id).await {
        let advanced =
            with_db(&state.db, move |db| Ok(db.mark_delivered(&message_id.to_string())?)).await?;
        if advanced {
            resolved.message_status = MessageStatus::Delivered;
        }
        state
            .dispatcher
            .emit_to_user(receiver_id, ServerEvent::ReceiveMessage(resolved.clone()))
            .await;
    }

    Ok((StatusCode::CREATED, Json(resolved)))
}

/// The requester's conversations, most recently active first, with the
/// last message resolved.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    let me = claims.sub;

    let conversations = with_db(&state.db, move |db| {
        let rows = db.conversations_for_user(&me.to_string())?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let participants = vec![
                resolve::user_summary(db, &row.participant_a)?,
                resolve::user_summary(db, &row.participant_b)?,
            ];
            let last_message = match &row.last_message_id {
                Some(id) => db
                    .message(id)?
                    .map(|m| resolve::resolve_message(db, &m))
                    .transpose()?,
                None => None,
            };
            out.push(ConversationResponse {
                id: resolve::parse_uuid(&row.id)?,
                participants,
                last_message,
                unread_count: row.unread_count,
                updated_at: parse_ts(&row.updated_at)?,
            });
        }
        Ok(out)
    })
    .await?;

    Ok(Json(conversations))
}

/// Fetch a conversation's messages, oldest first. Participant-only.
/// Fetching is also the implicit bulk read: every message addressed to the
/// requester still in sent/delivered goes to read, the unread counter
/// resets, and each affected sender is notified.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let me = claims.sub;

    let (affected, messages) = with_db(&state.db, move |db| {
        let conv = db
            .conversation(&conversation_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("conversation not found".into()))?;

        let me_str = me.to_string();
        if conv.participant_a != me_str && conv.participant_b != me_str {
            return Err(ApiError::Authorization(
                "not a participant of this conversation".into(),
            ));
        }

        let affected = db.mark_conversation_read(&conv.id, &me_str)?;
        let rows = db.messages_for_conversation(&conv.id)?;
        let messages = resolve::resolve_messages(db, &rows)?;
        Ok((affected, messages))
    })
    .await?;

    notify_read(&state.dispatcher, &affected).await;

    Ok(Json(messages))
}

/// Explicit bulk mark-read. Only messages addressed to the requester
/// transition; the rest of the id set is ignored.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let me = claims.sub;

    let (affected, messages) = with_db(&state.db, move |db| {
        let ids: Vec<String> = req.message_ids.iter().map(|id| id.to_string()).collect();
        let affected = db.mark_read(&ids, &me.to_string())?;

        let mut messages = Vec::with_capacity(affected.len());
        for (message_id, _) in &affected {
            if let Some(row) = db.message(message_id)? {
                messages.push(resolve::resolve_message(db, &row)?);
            }
        }
        Ok((affected, messages))
    })
    .await?;

    notify_read(&state.dispatcher, &affected).await;

    Ok(Json(messages))
}

/// Sender-only deletion.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub;

    with_db(&state.db, move |db| {
        let row = db
            .message(&message_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("message not found".into()))?;
        if row.sender_id != me.to_string() {
            return Err(ApiError::Authorization(
                "only the sender may delete a message".into(),
            ));
        }
        db.delete_message(&row.id)?;
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Reaction merge: absent -> add, same emoji -> toggle off, different
/// emoji -> replace. The merged list goes to both participants' sessions.
pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddReactionRequest>,
) -> Result<Json<Vec<ReactionEntry>>, ApiError> {
    let me = claims.sub;

    let (participants, reactions) = with_db(&state.db, move |db| {
        let mid = message_id.to_string();
        let row = db
            .message(&mid)?
            .ok_or_else(|| ApiError::NotFound("message not found".into()))?;

        let me_str = me.to_string();
        if row.sender_id != me_str && row.receiver_id != me_str {
            return Err(ApiError::Authorization(
                "not a participant of this conversation".into(),
            ));
        }

        db.merge_reaction(&mid, &me_str, &req.emoji)?;

        let reactions = db
            .reactions_for_message(&mid)?
            .iter()
            .map(|r| {
                Ok(ReactionEntry {
                    user_id: resolve::parse_uuid(&r.user_id)?,
                    emoji: r.emoji.clone(),
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        let sender = resolve::parse_uuid(&row.sender_id)?;
        let receiver = resolve::parse_uuid(&row.receiver_id)?;
        Ok(((sender, receiver), reactions))
    })
    .await?;

    for target in [participants.0, participants.1] {
        state
            .dispatcher
            .emit_to_user(
                target,
                ServerEvent::ReactionUpdate {
                    message_id,
                    reactions: reactions.clone(),
                },
            )
            .await;
    }

    Ok(Json(reactions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(content_type: ContentType) -> StoredMedia {
        StoredMedia {
            url: "/media/x.png".into(),
            content_type,
        }
    }

    #[test]
    fn text_content_is_trimmed() {
        let text = "  hi there  ".to_string();
        let (content, content_type) =
            validated_content(Some(&text), None, "Message").unwrap();
        assert_eq!(content.as_deref(), Some("hi there"));
        assert_eq!(content_type, ContentType::Text);
    }

    #[test]
    fn whitespace_only_text_is_rejected() {
        let text = "   ".to_string();
        let err = validated_content(Some(&text), None, "Message").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = validated_content(None, None, "Status").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn upload_classifies_the_entry() {
        let stored = media(ContentType::Video);
        let (content, content_type) =
            validated_content(None, Some(&stored), "Message").unwrap();
        assert_eq!(content, None);
        assert_eq!(content_type, ContentType::Video);

        // A caption may ride along with media
        let caption = "look at this".to_string();
        let stored = media(ContentType::Image);
        let (content, content_type) =
            validated_content(Some(&caption), Some(&stored), "Message").unwrap();
        assert_eq!(content.as_deref(), Some("look at this"));
        assert_eq!(content_type, ContentType::Image);
    }
}
