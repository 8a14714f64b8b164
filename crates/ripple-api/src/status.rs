use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use ripple_db::fmt_ts;
use ripple_realtime::resolve;
use ripple_types::api::{Claims, StatusResponse};
use ripple_types::events::ServerEvent;

use crate::chat::{read_form, validated_content};
use crate::error::ApiError;
use crate::{AppState, with_db};

/// Statuses live this long before soft expiry.
const STATUS_TTL_HOURS: i64 = 24;

/// Create an ephemeral status post and announce it to everyone else online.
pub async fn create_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = claims.sub;

    let form = read_form(&state.media, multipart).await?;
    let (content, content_type) =
        validated_content(form.fields.get("content"), form.media.as_ref(), "Status")?;
    let media_url = form.media.map(|m| m.url);

    let status_id = Uuid::new_v4();
    let expires_at = fmt_ts(Utc::now() + Duration::hours(STATUS_TTL_HOURS));

    let resolved = with_db(&state.db, move |db| {
        db.insert_status(
            &status_id.to_string(),
            &owner_id.to_string(),
            content.as_deref(),
            media_url.as_deref(),
            content_type.as_str(),
            &expires_at,
        )?;
        let row = db
            .status(&status_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("status vanished after insert".into()))?;
        Ok(resolve::resolve_status(db, &row)?)
    })
    .await?;

    state
        .dispatcher
        .broadcast_except(ServerEvent::NewStatus(resolved.clone()), owner_id);

    Ok((StatusCode::CREATED, Json(resolved)))
}

/// Active statuses only, newest first. Expiry is a read-time filter;
/// expired rows are never actively purged.
pub async fn get_statuses(
    State(state): State<AppState>,
) -> Result<Json<Vec<StatusResponse>>, ApiError> {
    let statuses = with_db(&state.db, move |db| {
        let rows = db.active_statuses(&fmt_ts(Utc::now()))?;
        rows.iter()
            .map(|row| Ok(resolve::resolve_status(db, row)?))
            .collect::<Result<Vec<_>, ApiError>>()
    })
    .await?;

    Ok(Json(statuses))
}

/// Record a view. Repeat views by the same user are no-ops and push
/// nothing; a first view notifies the owner's session with the updated
/// viewer set.
pub async fn view_status(
    State(state): State<AppState>,
    Path(status_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer_id = claims.sub;

    let (owner_id, newly_viewed, viewers) = with_db(&state.db, move |db| {
        let row = db
            .status(&status_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("status not found".into()))?;

        let added = db.add_status_viewer(&row.id, &viewer_id.to_string())?;
        let viewers = db
            .status_viewers(&row.id)?
            .iter()
            .map(|v| resolve::parse_uuid(v))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok((resolve::parse_uuid(&row.user_id)?, added, viewers))
    })
    .await?;

    if newly_viewed {
        state
            .dispatcher
            .emit_to_user(
                owner_id,
                ServerEvent::StatusViewed {
                    status_id,
                    viewer_id,
                    total_viewers: viewers.len(),
                    viewers,
                },
            )
            .await;
    }

    Ok(Json(serde_json::json!({ "viewed": true })))
}

/// Owner-only deletion; everyone else online learns the status is gone.
pub async fn delete_status(
    State(state): State<AppState>,
    Path(status_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub;

    with_db(&state.db, move |db| {
        let row = db
            .status(&status_id.to_string())?
            .ok_or_else(|| ApiError::NotFound("status not found".into()))?;
        if row.user_id != me.to_string() {
            return Err(ApiError::Authorization(
                "only the owner may delete a status".into(),
            ));
        }
        db.delete_status(&row.id)?;
        Ok(())
    })
    .await?;

    state
        .dispatcher
        .broadcast_except(ServerEvent::StatusDeleted { status_id }, me);

    Ok(Json(serde_json::json!({ "deleted": true })))
}
