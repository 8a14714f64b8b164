use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use ripple_db::{Database, fmt_ts, parse_ts};
use ripple_types::api::MessageStatus;
use ripple_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;
use crate::resolve;
use crate::typing::TypingTracker;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: identify handshake, presence
/// sync, then the event loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    typing: TypingTracker,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = ServerEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Step 3: initial presence sync — one user_status per user already here
    for online_id in dispatcher.online_users().await {
        let event = ServerEvent::UserStatus {
            user_id: online_id,
            is_online: true,
            last_seen: None,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    // Step 4: register the session and go online, durably then broadcast
    let (conn_id, mut user_rx) = dispatcher.register(user_id).await;

    if let Err(e) = set_presence(&db, user_id, true).await {
        warn!("Failed to persist online presence for {}: {}", user_id, e);
    }
    dispatcher.broadcast(ServerEvent::UserStatus {
        user_id,
        is_online: true,
        last_seen: None,
    });

    // Subscribe to broadcasts and relay to this client
    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();
    let typing_recv = typing.clone();
    let db_recv = db.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if frame.exclude == Some(user_id) {
                        continue;
                    }

                    if send_event(&mut sender, &frame.event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &typing_recv, &db_recv, user_id, cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate_utf8(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Teardown: typing timers die first so none fires against the gone
    // session, then presence — guarded so a replaced connection's late
    // disconnect cannot clobber its successor.
    typing.clear_user(user_id);

    if dispatcher.owns(user_id, conn_id).await {
        dispatcher.unregister(user_id, conn_id).await;

        let last_seen = Utc::now();
        if let Err(e) = set_presence(&db, user_id, false).await {
            warn!("Failed to persist offline presence for {}: {}", user_id, e);
        }
        dispatcher.broadcast(ServerEvent::UserStatus {
            user_id,
            is_online: false,
            last_seen: Some(last_seen),
        });
    }

    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use ripple_types::api::Claims;

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Identify { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    typing: &TypingTracker,
    db: &Arc<Database>,
    user_id: Uuid,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Identify { .. } => {} // Already handled

        // Relay of an already-persisted message: push to the receiver if
        // online and advance sent -> delivered. Re-resolved from the store
        // so the pushed payload is server-truth.
        ClientCommand::SendMessage { message_id } => {
            if let Err(e) = relay_message(dispatcher, db, user_id, message_id).await {
                warn!("send_message relay failed for {}: {}", message_id, e);
            }
        }

        ClientCommand::MessageRead { message_ids } => {
            if let Err(e) = mark_read(dispatcher, db, user_id, message_ids).await {
                warn!("message_read failed for {}: {}", user_id, e);
            }
        }

        ClientCommand::TypingStart {
            conversation_id,
            receiver_id,
        } => {
            typing.start(user_id, conversation_id, receiver_id).await;
        }

        ClientCommand::TypingStop {
            conversation_id,
            receiver_id,
        } => {
            typing.stop(user_id, conversation_id, receiver_id).await;
        }

        ClientCommand::AddReaction { message_id, emoji } => {
            if let Err(e) = add_reaction(dispatcher, db, user_id, message_id, emoji).await {
                warn!("add_reaction failed for {}: {}", message_id, e);
            }
        }

        ClientCommand::GetUserStatus { user_id: subject } => {
            if let Err(e) = answer_user_status(dispatcher, db, user_id, subject).await {
                warn!("get_user_status failed for {}: {}", subject, e);
            }
        }
    }
}

async fn relay_message(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    sender_id: Uuid,
    message_id: Uuid,
) -> anyhow::Result<()> {
    let resolved = {
        let db = db.clone();
        spawn_blocking(move || -> anyhow::Result<_> {
            let row = db
                .message(&message_id.to_string())?
                .ok_or_else(|| anyhow::anyhow!("message {} not found", message_id))?;
            Ok((resolve::resolve_message(&db, &row)?, row.sender_id))
        })
        .await??
    };
    let (message, stored_sender) = resolved;

    // Only the message's sender may trigger its relay
    if stored_sender != sender_id.to_string() {
        return Ok(());
    }

    let receiver_id = message.receiver.id;
    if dispatcher.is_online(receiver_id).await {
        let mut delivered = message;
        // Conditional transition; a message already read stays read
        let advanced = {
            let db = db.clone();
            spawn_blocking(move || db.mark_delivered(&message_id.to_string())).await??
        };
        if advanced {
            delivered.message_status = MessageStatus::Delivered;
            dispatcher
                .emit_to_user(
                    sender_id,
                    ServerEvent::MessageStatusUpdate {
                        message_id,
                        message_status: MessageStatus::Delivered,
                    },
                )
                .await;
        }
        dispatcher
            .emit_to_user(receiver_id, ServerEvent::ReceiveMessage(delivered))
            .await;
    }
    Ok(())
}

async fn mark_read(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    reader_id: Uuid,
    message_ids: Vec<Uuid>,
) -> anyhow::Result<()> {
    let affected = {
        let db = db.clone();
        spawn_blocking(move || {
            let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();
            db.mark_read(&ids, &reader_id.to_string())
        })
        .await??
    };

    notify_read(dispatcher, &affected).await;
    Ok(())
}

/// One `message_status_update` per transitioned message, pushed to its
/// original sender's session if present.
pub async fn notify_read(dispatcher: &Dispatcher, affected: &[(String, String)]) {
    for (message_id, sender_id) in affected {
        let (Ok(message_id), Ok(sender_id)) =
            (resolve::parse_uuid(message_id), resolve::parse_uuid(sender_id))
        else {
            continue;
        };
        dispatcher
            .emit_to_user(
                sender_id,
                ServerEvent::MessageStatusUpdate {
                    message_id,
                    message_status: MessageStatus::Read,
                },
            )
            .await;
    }
}

async fn add_reaction(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    message_id: Uuid,
    emoji: String,
) -> anyhow::Result<()> {
    let (participants, reactions) = {
        let db = db.clone();
        spawn_blocking(move || -> anyhow::Result<_> {
            let mid = message_id.to_string();
            let row = db
                .message(&mid)?
                .ok_or_else(|| anyhow::anyhow!("message {} not found", message_id))?;

            db.merge_reaction(&mid, &user_id.to_string(), &emoji)?;

            let reactions = db
                .reactions_for_message(&mid)?
                .iter()
                .map(|r| {
                    Ok(ripple_types::api::ReactionEntry {
                        user_id: resolve::parse_uuid(&r.user_id)?,
                        emoji: r.emoji.clone(),
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let sender = resolve::parse_uuid(&row.sender_id)?;
            let receiver = resolve::parse_uuid(&row.receiver_id)?;
            Ok(((sender, receiver), reactions))
        })
        .await??
    };

    // Merged list to both conversation participants, whoever is present
    for target in [participants.0, participants.1] {
        dispatcher
            .emit_to_user(
                target,
                ServerEvent::ReactionUpdate {
                    message_id,
                    reactions: reactions.clone(),
                },
            )
            .await;
    }
    Ok(())
}

async fn answer_user_status(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    requester_id: Uuid,
    subject_id: Uuid,
) -> anyhow::Result<()> {
    let is_online = dispatcher.is_online(subject_id).await;

    let last_seen = {
        let db = db.clone();
        spawn_blocking(move || db.presence(&subject_id.to_string())).await??
    }
    .and_then(|(_, last_seen)| last_seen)
    .map(|ts| parse_ts(&ts))
    .transpose()?;

    dispatcher
        .emit_to_user(
            requester_id,
            ServerEvent::UserStatus {
                user_id: subject_id,
                is_online,
                last_seen,
            },
        )
        .await;
    Ok(())
}

async fn set_presence(db: &Arc<Database>, user_id: Uuid, is_online: bool) -> anyhow::Result<()> {
    let db = db.clone();
    spawn_blocking(move || {
        db.set_presence(&user_id.to_string(), is_online, &fmt_ts(Utc::now()))
    })
    .await?
}

/// Truncate to at most `max` bytes without splitting a codepoint.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
