use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::bus::channel::Channel;
use crate::bus::message::Message;
use crate::bus::session::{ConnectionId, OutboundFrame, SessionContext};
use crate::state::AppState;

/// Tracks when the peer last showed signs of life.
struct Liveness {
    last_seen: Instant,
    timeout: Duration,
}

impl Liveness {
    fn new(timeout: Duration) -> Self {
        Self {
            last_seen: Instant::now(),
            timeout,
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn expired(&self) -> bool {
        self.last_seen.elapsed() >= self.timeout
    }
}

/// Owns one websocket for its entire life.
///
/// A writer task drains the outbound queue so handlers never block on the
/// wire. The main loop multiplexes inbound frames, loop-back deliveries from
/// the room hub and the heartbeat timer; everything dispatches on the single
/// session context, so handlers for this connection run strictly one at a
/// time.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    let span = info_span!("connection", id = %connection_id);
    connection_loop(socket, state, connection_id)
        .instrument(span)
        .await;
}

async fn connection_loop(socket: WebSocket, state: AppState, connection_id: ConnectionId) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let (loopback_tx, mut loopback_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let ws_frame = match frame {
                OutboundFrame::Payload(message) => match serde_json::to_string(&message) {
                    Ok(text) => WsMessage::Text(text.into()),
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound message");
                        continue;
                    }
                },
                OutboundFrame::Ping => WsMessage::Ping(Vec::new().into()),
            };
            if sink.send(ws_frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let heartbeat_tx = outbound_tx.clone();
    let mut ctx = SessionContext::new(
        connection_id.clone(),
        state.database.clone(),
        state.config.clone(),
        state.hub.clone(),
        outbound_tx,
        loopback_tx,
    );

    info!("connection opened");

    let mut liveness = Liveness::new(state.config.heartbeat_timeout());
    let mut heartbeat = interval(state.config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    None => {
                        debug!("peer closed the stream");
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket transport error");
                        break;
                    }
                    Some(Ok(frame)) => {
                        liveness.touch();
                        match frame {
                            WsMessage::Text(text) => {
                                handle_frame(&state, &mut ctx, text.as_str()).await;
                            }
                            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => {
                                debug!("peer sent close");
                                break;
                            }
                            WsMessage::Binary(_) => {
                                debug!("ignoring binary frame");
                            }
                        }
                    }
                }
            }
            Some(message) = loopback_rx.recv() => {
                state
                    .router
                    .dispatch(&mut ctx, Channel::Loopback, &message)
                    .await;
            }
            _ = heartbeat.tick() => {
                if liveness.expired() {
                    info!("closing idle connection");
                    break;
                }
                let _ = heartbeat_tx.send(OutboundFrame::Ping);
            }
        }
    }

    state.hub.remove_connection(&connection_id);
    info!("connection closed");

    // Dropping the context and the ping sender closes the outbound queue,
    // which lets the writer drain and shut the sink.
    drop(ctx);
    drop(heartbeat_tx);
    let _ = writer.await;
}

async fn handle_frame(state: &AppState, ctx: &mut SessionContext, text: &str) {
    match Message::parse(text) {
        Ok(message) => {
            state
                .router
                .dispatch(ctx, Channel::Origin, &message)
                .await;
        }
        Err(err) => {
            debug!(error = %err, "unparseable inbound frame");
            ctx.send_origin(Message::malformed_notice(None, "type"));
        }
    }
}
