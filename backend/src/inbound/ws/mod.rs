//! WebSocket inbound adapter for the realtime hub.
//!
//! Responsibilities:
//! - validate and parse the subscription parameters
//! - initialise the per-connection actor with the shared hub
//! - keep socket-specific concerns at the edge of the system

use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use tracing::error;

pub mod hub;
mod session;

pub use hub::{ListHub, SessionId, SESSION_QUEUE_CAPACITY};

/// Dependency bundle for the WebSocket entry point.
#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<ListHub>,
    pub ping_interval: Duration,
    pub read_deadline: Duration,
}

#[derive(Debug, Deserialize)]
struct SubscribeQuery {
    list_id: i64,
    user_id: i64,
}

/// Handle WebSocket upgrade for the `/ws` endpoint.
#[get("/ws")]
pub async fn ws_entry(
    state: web::Data<WsState>,
    query: web::Query<SubscribeQuery>,
    req: HttpRequest,
    stream: web::Payload,
) -> actix_web::Result<HttpResponse> {
    let actor = session::WsSession::new(
        Arc::clone(&state.hub),
        query.list_id,
        query.user_id,
        state.ping_interval,
        state.read_deadline,
    );
    ws::start(actor, &req, stream).map_err(|err| {
        error!(error = %err, "WebSocket upgrade failed");
        actix_web::error::ErrorInternalServerError("WebSocket upgrade failed")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::bus::MemoryListBus;
    use actix_web::{App, HttpServer};
    use awc::ws::Frame;
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use rstest::rstest;
    use std::net::TcpListener;

    fn spawn_server(bus: MemoryListBus) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port");
        let addr = listener.local_addr().expect("bound address");
        let state = WsState {
            hub: Arc::new(ListHub::new(
                Arc::new(bus),
                500,
                Duration::from_millis(100),
            )),
            ping_interval: Duration::from_millis(100),
            read_deadline: Duration::from_secs(5),
        };
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(ws_entry)
        })
        .workers(1)
        .listen(listener)
        .expect("listen on test port")
        .run();
        actix_web::rt::spawn(server);
        format!("ws://{addr}/ws")
    }

    fn connect(url: &str, list_id: i64, user_id: i64) -> awc::ws::WebsocketsRequest {
        awc::Client::new().ws(format!("{url}?list_id={list_id}&user_id={user_id}"))
    }

    #[rstest]
    #[actix_web::test]
    async fn peer_sockets_receive_frames_the_sender_does_not() {
        let bus = MemoryListBus::new();
        let first_url = spawn_server(bus.clone());
        let second_url = spawn_server(bus);

        let (_resp, mut sender) = connect(&first_url, 5, 1)
            .connect()
            .await
            .expect("sender connects");
        let (_resp, mut receiver) = connect(&second_url, 5, 2)
            .connect()
            .await
            .expect("receiver connects");
        actix_web::rt::time::sleep(Duration::from_millis(300)).await;

        sender
            .send(awc::ws::Message::Text("hi".into()))
            .await
            .expect("frame sent");

        // The receiver sees the payload exactly once (pings interleave).
        let mut delivered = None;
        for _ in 0..10 {
            match actix_web::rt::time::timeout(Duration::from_secs(1), receiver.next()).await {
                Ok(Some(Ok(Frame::Binary(payload)))) => {
                    delivered = Some(payload);
                    break;
                }
                Ok(Some(Ok(_))) => continue,
                other => panic!("socket closed early: {other:?}"),
            }
        }
        assert_eq!(delivered, Some(Bytes::from_static(b"hi")));

        // The sender only ever sees control frames.
        match actix_web::rt::time::timeout(Duration::from_millis(300), async {
            loop {
                match sender.next().await {
                    Some(Ok(Frame::Binary(payload))) => break payload,
                    Some(Ok(_)) => continue,
                    other => panic!("socket closed early: {other:?}"),
                }
            }
        })
        .await
        {
            Err(_) => {}
            Ok(payload) => panic!("sender received its own frame: {payload:?}"),
        }
    }

    #[rstest]
    #[actix_web::test]
    async fn capacity_overflow_closes_with_a_policy_frame() {
        let bus = MemoryListBus::new();
        let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port");
        let addr = listener.local_addr().expect("bound address");
        let state = WsState {
            hub: Arc::new(ListHub::new(
                Arc::new(bus),
                1,
                Duration::from_millis(100),
            )),
            ping_interval: Duration::from_millis(100),
            read_deadline: Duration::from_secs(5),
        };
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(ws_entry)
        })
        .workers(1)
        .listen(listener)
        .expect("listen on test port")
        .run();
        actix_web::rt::spawn(server);
        let url = format!("ws://{addr}/ws");

        let (_resp, mut admitted) = connect(&url, 5, 1)
            .connect()
            .await
            .expect("first socket admitted");
        actix_web::rt::time::sleep(Duration::from_millis(100)).await;

        let (_resp, mut refused) = connect(&url, 5, 2)
            .connect()
            .await
            .expect("upgrade succeeds before admission");

        let close = actix_web::rt::time::timeout(Duration::from_secs(2), async {
            loop {
                match refused.next().await {
                    Some(Ok(Frame::Close(reason))) => break reason,
                    Some(Ok(_)) => continue,
                    other => panic!("expected close frame, got {other:?}"),
                }
            }
        })
        .await
        .expect("close frame arrives");
        assert_eq!(
            close.map(|r| r.code),
            Some(awc::ws::CloseCode::Policy)
        );

        // The admitted socket stays attached.
        admitted
            .send(awc::ws::Message::Ping(Bytes::new()))
            .await
            .expect("still writable");
    }
}
