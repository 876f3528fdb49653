use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, future};
use market_data::{ClientSession, FeedControl, InboundFrame, OutboundFrame};
use std::sync::Arc;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let feed: Arc<dyn FeedControl> = state.worker.clone();
    let session = ClientSession::new(Arc::clone(&state.broadcaster), feed);
    let id = session.id();
    tracing::debug!(client_id = %id, "WebSocket upgraded");

    let (sender, receiver) = socket.split();
    let outbound = sender.with(|frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let inbound = receiver.filter_map(|msg| future::ready(from_message(msg)));

    let ended_by = session.run(outbound, inbound).await;
    tracing::debug!(client_id = %id, ?ended_by, "WebSocket finished");
}

fn to_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text.into()),
        OutboundFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

// Ping/Pong are answered by the transport
fn from_message(msg: Result<Message, axum::Error>) -> Option<InboundFrame> {
    match msg {
        Ok(Message::Text(text)) => Some(InboundFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec())
            .ok()
            .map(InboundFrame::Text),
        Ok(Message::Close(_)) | Err(_) => Some(InboundFrame::Close),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
    }
}
