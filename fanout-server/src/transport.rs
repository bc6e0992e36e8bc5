//! WebSocket transport.
//!
//! Each upgraded socket gets a session from the router, a reader loop that
//! feeds text frames to [`MessageRouter::handle_text`] in order, and a writer
//! task that drains the session's outbound queue as JSON text frames.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{envelope::Outbound, registry::SessionId, router::MessageRouter};

#[derive(Clone)]
struct TransportState {
    router: Arc<MessageRouter>,
    outbound_buffer: usize,
}

pub fn routes(router: Arc<MessageRouter>, path: &str, outbound_buffer: usize) -> Router {
    Router::new()
        .route(path, get(upgrade))
        .with_state(TransportState {
            router,
            outbound_buffer,
        })
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<TransportState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: TransportState) {
    let TransportState {
        router,
        outbound_buffer,
    } = state;

    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer);
    let session = router.connect(outbound_tx);

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx, session));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => router.handle_text(session, &text),
            Ok(Message::Binary(_)) => {
                router
                    .registry()
                    .send_to(session, Outbound::error("binary frames are not supported"));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(%session, error = %err, "websocket transport error");
                break;
            }
        }
    }

    router.disconnect(session);
    writer.abort();
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    session: SessionId,
) {
    while let Some(envelope) = outbound.recv().await {
        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%session, error = %err, "failed to encode envelope");
                continue;
            }
        };

        if let Err(err) = sink.send(Message::Text(frame)).await {
            debug!(%session, error = %err, "failed to deliver envelope");
            break;
        }
    }

    if let Err(err) = sink.close().await {
        debug!(%session, error = %err, "websocket already closed");
    }
}
