pub mod auth;
pub mod chat;
pub mod error;
pub mod media;
pub mod middleware;
pub mod status;

use std::sync::Arc;

use ripple_db::Database;
use ripple_realtime::dispatcher::Dispatcher;

use crate::error::ApiError;
use crate::media::MediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub media: MediaStore,
}

/// Run blocking database work off the async runtime.
pub(crate) async fn with_db<T, F>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ApiError::Upstream(e.into()))?
}
