use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use duet_types::events::{StoreEvent, SubscribeCommand};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single subscription socket. Events flow server -> client only;
/// the one accepted client command narrows which conversations the client
/// hears about. With no Subscribe on record, every event is delivered.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    info!("subscriber {} connected", conn_id);

    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection conversation filter (shared between send and recv tasks).
    // None = no filter yet, deliver everything.
    let subscribed: Arc<RwLock<Option<HashSet<Uuid>>>> = Arc::new(RwLock::new(None));
    let send_subscriptions = subscribed.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("subscriber {} lagged by {} events", conn_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(conversation_id) = event.conversation_id() {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if let Some(filter) = subs.as_ref() {
                            if !filter.contains(&conversation_id) {
                                continue;
                            }
                        }
                    }

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to serialize store event: {}", e);
                            continue;
                        }
                    };
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
                            warn!("subscriber {} heartbeat timeout, dropping", conn_id);
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
    let recv_subscriptions = subscribed.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<SubscribeCommand>(&text) {
                        Ok(SubscribeCommand::Subscribe { conversation_ids }) => {
                            info!(
                                "subscriber {} filtering to {} conversations",
                                conn_id,
                                conversation_ids.len()
                            );
                            let mut subs = recv_subscriptions.write()
                                .expect("subscription lock poisoned");
                            *subs = Some(conversation_ids.into_iter().collect());
                        }
                        Err(e) => {
                            warn!(
                                "subscriber {} bad command: {} -- raw: {}",
                                conn_id,
                                e,
                                truncate_for_log(&text)
                            );
                        }
                    }
                }
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

    info!("subscriber {} disconnected", conn_id);
}

/// Cap logged command text at 200 bytes without splitting a character.
fn truncate_for_log(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_logs_whole() {
        assert_eq!(truncate_for_log("hello"), "hello");
    }

    #[test]
    fn truncation_backs_off_to_a_char_boundary() {
        // 199 ASCII bytes, then a 3-byte character straddling the 200-byte cap
        let mut text = "x".repeat(199);
        text.push('€');

        let cut = truncate_for_log(&text);
        assert_eq!(cut.len(), 199);
        assert!(text.starts_with(cut));
    }
}
