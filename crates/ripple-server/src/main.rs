use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use ripple_api::middleware::require_auth;
use ripple_api::{AppState, AppStateInner, auth, chat, media::MediaStore, status};
use ripple_realtime::connection;
use ripple_realtime::dispatcher::Dispatcher;
use ripple_realtime::typing::TypingTracker;

/// Media uploads (images/short videos) are capped at 25 MiB.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
struct GatewayState {
    app: AppState,
    typing: TypingTracker,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("RIPPLE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("RIPPLE_DB_PATH").unwrap_or_else(|_| "ripple.db".into());
    let media_dir = std::env::var("RIPPLE_MEDIA_DIR").unwrap_or_else(|_| "media".into());
    let host = std::env::var("RIPPLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("RIPPLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init collaborators
    let db = Arc::new(ripple_db::Database::open(&PathBuf::from(&db_path))?);
    let media = MediaStore::new(PathBuf::from(&media_dir)).await?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let typing = TypingTracker::new(dispatcher.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        media,
    });

    let gateway_state = GatewayState {
        app: app_state.clone(),
        typing,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/chat/conversations", get(chat::get_conversations))
        .route(
            "/chat/conversations/{conversation_id}/messages",
            get(chat::get_messages),
        )
        .route("/chat/messages", post(chat::send_message))
        .route("/chat/messages/read", put(chat::mark_read))
        .route("/chat/messages/{message_id}", delete(chat::delete_message))
        .route(
            "/chat/messages/{message_id}/reactions",
            post(chat::add_reaction),
        )
        .route("/status", post(status::create_status).get(status::get_statuses))
        .route("/status/{status_id}/view", put(status::view_status))
        .route("/status/{status_id}", delete(status::delete_status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/media", ServeDir::new(&media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ripple server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.app.dispatcher.clone(),
            state.typing,
            state.app.db.clone(),
            state.jwt_secret,
        )
    })
}
