use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RoomError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::GameId;
use crate::routes::AppState;
use crate::session::Session;

const LOG_TARGET: &str = "server::ws";

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub game_id: GameId,
    pub token: Uuid,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = Session::new(params.game_id, params.token);
    // refuse the upgrade outright for unknown rooms and stale tokens
    if let Err(err) = state.manager.seat_view(session) {
        return err.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session))
}

async fn handle_socket(socket: WebSocket, state: AppState, session: Session) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let events = state.hub.subscribe(session.game_id);
    let forwarder = tokio::spawn(forward_events(state.clone(), session, events, tx.clone()));

    match bind(&state, session) {
        Ok((seat, name)) => {
            info!(target: LOG_TARGET, game_id = %session.game_id, seat, "socket bound");
            let _ = tx.send(ServerMessage::Welcome {
                game_id: session.game_id,
                seat,
                name,
            });
            send_view(&state, session, &tx);
        }
        Err(err) => {
            let _ = tx.send(error_message(&err));
            forwarder.abort();
            drop(tx);
            let _ = writer.await;
            return;
        }
    }

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client) => {
                    if let Err(err) = handle_client_message(&state, session, &tx, client) {
                        let _ = tx.send(error_message(&err));
                    }
                }
                Err(_) => {
                    let _ = tx.send(error_message(&RoomError::bad_request("invalid message")));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    forwarder.abort();
    writer.abort();
    on_socket_closed(&state, session);
}

/// Marks the seat disconnected and starts the reconnect countdown. Returns
/// true when this close halted the game.
pub(crate) fn on_socket_closed(state: &AppState, session: Session) -> bool {
    match state.manager.on_disconnect(session) {
        Ok(true) => {
            state.supervisor.watch(session.game_id);
            true
        }
        Ok(false) => false,
        Err(err) => {
            debug!(
                target: LOG_TARGET,
                game_id = %session.game_id,
                error = %err,
                "disconnect after seat loss"
            );
            false
        }
    }
}

/// Resolves the seat and resumes play if this seat was the one that dropped.
/// Any other seat just counts the bind as a heartbeat.
pub(crate) fn bind(state: &AppState, session: Session) -> Result<(u8, String), RoomError> {
    let view = state.manager.seat_view(session)?;
    if view.room.disconnected_seat == Some(view.your_seat) {
        state.manager.reconnect(session)?;
    } else {
        state.manager.heartbeat(session)?;
    }
    let name = view
        .room
        .seats
        .iter()
        .find(|seat| seat.seat == view.your_seat)
        .map(|seat| seat.name.clone())
        .unwrap_or_default();
    Ok((view.your_seat, name))
}

fn handle_client_message(
    state: &AppState,
    session: Session,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    client: ClientMessage,
) -> Result<(), RoomError> {
    match client {
        ClientMessage::Ping => {
            state.manager.heartbeat(session)?;
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::GetState => {
            let view = state.manager.player_view(session)?;
            state.supervise(&view.room);
            let _ = tx.send(ServerMessage::YourView(view));
        }
        ClientMessage::Play { card } => {
            state.manager.play_card(session, card.id()?)?;
        }
        ClientMessage::Pass => {
            state.manager.pass_turn(session)?;
        }
        ClientMessage::Reconnect => {
            state.manager.reconnect(session)?;
        }
    }
    Ok(())
}

/// Relays room events to this socket. Each room update is followed by the
/// seat's own view so the hand stays current.
async fn forward_events(
    state: AppState,
    session: Session,
    mut events: broadcast::Receiver<ServerMessage>,
    tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let msg = match events.recv().await {
            Ok(msg) => msg,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: LOG_TARGET, game_id = %session.game_id, skipped, "socket lagging");
                send_view(&state, session, &tx);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let room_update = matches!(msg, ServerMessage::RoomState(_));
        if tx.send(msg).is_err() {
            break;
        }
        if room_update && !send_view(&state, session, &tx) {
            break;
        }
    }
}

/// Sends the seat's view. Returns false once the seat no longer exists.
fn send_view(
    state: &AppState,
    session: Session,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> bool {
    match state.manager.seat_view(session) {
        Ok(view) => tx.send(ServerMessage::YourView(view)).is_ok(),
        Err(err) => {
            let _ = tx.send(error_message(&err));
            false
        }
    }
}

fn error_message(err: &RoomError) -> ServerMessage {
    ServerMessage::Error {
        kind: err.kind().to_string(),
        message: err.client_message(),
    }
}
