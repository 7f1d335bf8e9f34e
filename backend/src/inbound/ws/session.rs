//! Per-connection WebSocket actor.
//!
//! Keeps framing, heartbeats, and the admission handshake at the edge;
//! fanout belongs to the [`ListHub`]. Client frames are opaque payloads:
//! they go to the bus for sibling processes and to local peers directly,
//! excluding the sender.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::fut::wrap_future;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws::{self, CloseCode, CloseReason, Message, ProtocolError};
use bytes::Bytes;
use tracing::warn;

use super::hub::{ListHub, SessionId};

/// A frame queued by the hub for this socket.
struct OutboundFrame(Bytes);

pub struct WsSession {
    hub: Arc<ListHub>,
    list_id: i64,
    user_id: i64,
    session_id: Option<SessionId>,
    last_heartbeat: Instant,
    ping_interval: Duration,
    read_deadline: Duration,
}

impl WsSession {
    pub fn new(
        hub: Arc<ListHub>,
        list_id: i64,
        user_id: i64,
        ping_interval: Duration,
        read_deadline: Duration,
    ) -> Self {
        Self {
            hub,
            list_id,
            user_id,
            session_id: None,
            last_heartbeat: Instant::now(),
            ping_interval,
            read_deadline,
        }
    }

    /// Publish to the bus and deliver to local peers, excluding this
    /// session.
    fn forward_client_frame(&self, payload: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session_id) = self.session_id else {
            return;
        };
        self.hub
            .broadcast_local(self.list_id, &payload, Some(session_id));

        let hub = Arc::clone(&self.hub);
        let list_id = self.list_id;
        ctx.spawn(wrap_future(async move {
            hub.publish(list_id, payload).await;
        }));
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        match self.hub.register(self.list_id) {
            Some((session_id, receiver)) => {
                self.session_id = Some(session_id);
                let outbound = futures_util::stream::unfold(receiver, |mut receiver| async move {
                    receiver.recv().await.map(|frame| (OutboundFrame(frame), receiver))
                });
                ctx.add_stream(outbound);
            }
            None => {
                warn!(
                    list_id = self.list_id,
                    user_id = self.user_id,
                    "list at capacity; refusing socket"
                );
                ctx.close(Some(CloseReason {
                    code: CloseCode::Policy,
                    description: Some("too many editors".into()),
                }));
                ctx.stop();
                return;
            }
        }

        self.last_heartbeat = Instant::now();
        ctx.run_interval(self.ping_interval, |actor, ctx| {
            if Instant::now().duration_since(actor.last_heartbeat) > actor.read_deadline {
                warn!(
                    list_id = actor.list_id,
                    user_id = actor.user_id,
                    "heartbeat timeout; closing connection"
                );
                ctx.close(Some(CloseReason {
                    code: CloseCode::Normal,
                    description: Some("heartbeat timeout".into()),
                }));
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session_id) = self.session_id.take() {
            self.hub.unregister(self.list_id, session_id);
        }
    }
}

/// Frames fanned out by the hub.
impl StreamHandler<OutboundFrame> for WsSession {
    fn handle(&mut self, frame: OutboundFrame, ctx: &mut Self::Context) {
        ctx.binary(frame.0);
    }
}

/// Frames arriving from the client.
impl StreamHandler<Result<Message, ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<Message, ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward_client_frame(text.into_bytes(), ctx);
            }
            Ok(Message::Binary(payload)) => {
                self.last_heartbeat = Instant::now();
                self.forward_client_frame(payload, ctx);
            }
            Ok(Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(Message::Nop) | Ok(Message::Continuation(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Err(err) => {
                warn!(error = %err, "WebSocket protocol error");
                ctx.close(Some(CloseReason {
                    code: CloseCode::Protocol,
                    description: Some("protocol error".into()),
                }));
                ctx.stop();
            }
        }
    }
}
