use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use huddle_db::Database;
use huddle_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::{ConnectionId, Dispatcher};
use crate::relay;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection for its whole lifetime.
///
/// The session layer has already authenticated the caller; this loop only
/// binds the connection to a user identity once the client announces one.
/// Until then the socket still receives global broadcasts but is absent
/// from the roster.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut targeted_rx) = dispatcher.attach().await;
    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    info!("connection {} opened", conn_id);

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
                    let out = match result {
                        Ok(out) => out,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    // Typing indicators never echo to their origin
                    if out.exclude == Some(conn_id) {
                        continue;
                    }

                    let text = serde_json::to_string(&out.event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = targeted_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
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

    // Read commands from client. Each frame is handled to completion before
    // the next is read, which keeps per-sender broadcast order equal to
    // persistence order.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            &text[..text.len().min(200)]
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

    dispatcher.detach(conn_id).await;
    info!("connection {} closed", conn_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: ConnectionId,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Announce { user_id } => {
            // Resolve the id to display identity before anything goes into
            // the registry. Unknown users never appear online.
            let lookup_db = db.clone();
            let profile =
                tokio::task::spawn_blocking(move || lookup_db.get_user_profile(&user_id.to_string()))
                    .await;
            match profile {
                Ok(Ok(Some(profile))) => {
                    info!("{} ({}) is online on connection {}", profile.name, user_id, conn_id);
                    dispatcher.announce(conn_id, profile).await;
                }
                Ok(Ok(None)) => {
                    warn!("announce for unknown user {}", user_id);
                }
                Ok(Err(e)) => {
                    warn!("identity lookup failed for {}: {:#}", user_id, e);
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                }
            }
        }

        ClientCommand::SendMessage { content, user_id } => {
            relay::send_message(dispatcher, db, user_id, &content).await;
        }

        ClientCommand::SetPinned {
            message_id,
            is_pinned,
        } => {
            relay::set_pinned(dispatcher, db, message_id, is_pinned).await;
        }

        ClientCommand::TypingStart { user_id, user_name } => {
            dispatcher.broadcast_except(conn_id, ServerEvent::UserTyping { user_id, user_name });
        }

        ClientCommand::TypingStop { user_id } => {
            dispatcher.broadcast_except(conn_id, ServerEvent::UserStoppedTyping { user_id });
        }
    }
}
