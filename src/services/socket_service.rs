//! WebSocket connection lifecycle for players.
//!
//! One socket per player: the first frame must identify the membership, then
//! the connection carries buzzes and heartbeats inbound and the room's event
//! feed outbound. Connectivity failures degrade only this session; the room
//! lives on and the presence tombstone decides whether the player shows as
//! offline.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    error::ServiceError,
    services::{events, room_service, round_service},
    state::SharedState,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of a player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let (room_code, player_id) = match serde_json::from_str::<ClientMessage>(&initial_message) {
        Ok(ClientMessage::Identify {
            room_code,
            player_id,
        }) => (room_code, player_id),
        Ok(_) => {
            warn!("first message was not an identification");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse websocket message");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    // The player row is the membership proof; a swept room or a deleted row
    // sends the client back to the join flow.
    let membership = match room_service::resume_session(&state, &room_code, player_id).await {
        Ok(membership) => membership,
        Err(err) => {
            send_message(&outbound_tx, &ServerMessage::Error {
                message: err.to_string(),
            });
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    let room_id = membership.room.id;

    // Subscribe before snapshotting so no event can fall between the two.
    let mut room_events = state.broadcaster().subscribe(room_id);

    if state.presence().register(room_id, player_id).await {
        events::broadcast_presence(&state, room_id, player_id, true);
    }

    // Durable liveness signal independent of client heartbeat frames. The
    // first tick fires immediately and covers the initial write.
    let mut heartbeat = tokio::time::interval(state.config().heartbeat_interval());
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Re-snapshot after subscribing: the subscription covers anything newer.
    let welcome = match room_service::resume_session(&state, &room_code, player_id).await {
        Ok(membership) => membership,
        Err(_) => membership,
    };
    send_message(&outbound_tx, &ServerMessage::Welcome {
        player_id,
        snapshot: welcome.room,
    });
    let online = state.presence().online_players(room_id).await;
    send_message(
        &outbound_tx,
        &ServerMessage::Event(crate::dto::events::RoomEvent::PresenceSync { online }),
    );
    info!(%room_id, %player_id, "player socket connected");

    loop {
        tokio::select! {
            event = room_events.recv() => match event {
                Ok(event) => {
                    send_message(&outbound_tx, &ServerMessage::Event(event));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    // Resynchronize from a fresh snapshot instead of replaying.
                    warn!(%room_id, %player_id, skipped, "event feed lagged; resyncing");
                    if let Ok(membership) =
                        room_service::resume_session(&state, &room_code, player_id).await
                    {
                        send_message(&outbound_tx, &ServerMessage::Event(
                            crate::dto::events::RoomEvent::RoomUpdated {
                                room: membership.room,
                            },
                        ));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text_frame(&state, room_id, player_id, &text, &outbound_tx).await;
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = outbound_tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = outbound_tx.send(Message::Close(frame));
                    break;
                }
                Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Err(err)) => {
                    warn!(%room_id, %player_id, error = %err, "websocket error");
                    break;
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if let Err(err) = round_service::heartbeat(&state, room_id, player_id).await {
                    warn!(%room_id, %player_id, error = %err, "heartbeat write failed");
                }
            }
        }
    }

    state.presence().disconnect(room_id, player_id).await;
    info!(%room_id, %player_id, "player socket disconnected");

    finalize(writer_task, outbound_tx).await;
}

async fn handle_text_frame(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    text: &str,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(%player_id, error = %err, "failed to parse websocket message");
            return;
        }
    };

    match message {
        ClientMessage::Buzz => match round_service::buzz(state, room_id, player_id).await {
            Ok(buzz) => {
                send_message(outbound_tx, &ServerMessage::BuzzResult {
                    accepted: true,
                    winner_player_id: Some(buzz.player_id),
                });
            }
            Err(ServiceError::AlreadyWon { winner_player_id }) => {
                send_message(outbound_tx, &ServerMessage::BuzzResult {
                    accepted: false,
                    winner_player_id: Some(winner_player_id),
                });
            }
            Err(err) => {
                send_message(outbound_tx, &ServerMessage::Error {
                    message: err.to_string(),
                });
            }
        },
        ClientMessage::Heartbeat => {
            if let Err(err) = round_service::heartbeat(state, room_id, player_id).await {
                warn!(%player_id, error = %err, "heartbeat write failed");
            }
        }
        ClientMessage::Identify { .. } => {
            warn!(%player_id, "ignoring duplicate identification message");
        }
        ClientMessage::Unknown => {}
    }
}

/// Serialize a payload and push it onto the writer channel; failures only mean
/// the connection is already going away.
fn send_message(tx: &mpsc::UnboundedSender<Message>, value: &ServerMessage) {
    match serde_json::to_string(value) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize websocket payload"),
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
