//! Per-connection protocol handler
//!
//! A session subscribes to the broadcaster and runs two loops side by side:
//!
//! - send loop: subscription queue → parse envelope → book (+ quote) →
//!   client
//! - receive loop: client → `close` / `{"buyAmount": ...}` commands
//!
//! Whichever loop finishes first ends the session; the other is cancelled
//! at its next suspension point. Teardown (unsubscribe, normal-closure
//! close frame) runs exactly once after both loops are gone.
//!
//! Transport is abstracted as a `Sink` of [`OutboundFrame`] and a `Stream`
//! of [`InboundFrame`], so the session does not depend on the HTTP
//! framework that accepted the connection.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use types::ids::SubscriberId;

use crate::broadcaster::{Broadcaster, SubscriptionQueue};
use crate::envelope::{parse_client_command, parse_envelope, ClientCommand, OutboundPayload};
use crate::ingestion::FeedControl;

/// WebSocket close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Upper bound on delivering the close frame to a client during teardown.
pub const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Frame received from a downstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// The client closed the connection or the transport failed.
    Close,
}

/// Frame sent to a downstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Which loop ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    SendLoop,
    ReceiveLoop,
}

/// Protocol handler for one downstream connection.
pub struct ClientSession {
    id: SubscriberId,
    broadcaster: Arc<Broadcaster>,
    feed: Arc<dyn FeedControl>,
}

impl ClientSession {
    pub fn new(broadcaster: Arc<Broadcaster>, feed: Arc<dyn FeedControl>) -> Self {
        Self {
            id: SubscriberId::new(),
            broadcaster,
            feed,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Serve the connection until either side finishes.
    pub async fn run<S, R>(self, mut outbound: S, mut inbound: R) -> SessionEnd
    where
        S: Sink<OutboundFrame> + Unpin,
        S::Error: Display,
        R: Stream<Item = InboundFrame> + Unpin,
    {
        info!(client_id = %self.id, "Client session started");

        if !self.feed.is_running() {
            info!(client_id = %self.id, "Upstream feed not running, starting it");
            self.feed.start();
        }

        let mut queue = self.broadcaster.subscribe(self.id);
        // Last-write-wins quote amount shared by the two loops.
        let (amount_tx, amount_rx) = watch::channel::<Option<Decimal>>(None);

        let end = tokio::select! {
            _ = self.send_loop(&mut queue, &mut outbound, &amount_rx) => SessionEnd::SendLoop,
            _ = self.receive_loop(&mut inbound, &amount_tx) => SessionEnd::ReceiveLoop,
        };

        self.teardown(&mut outbound, end).await;
        end
    }

    async fn send_loop<S>(
        &self,
        queue: &mut SubscriptionQueue,
        outbound: &mut S,
        amount: &watch::Receiver<Option<Decimal>>,
    ) where
        S: Sink<OutboundFrame> + Unpin,
        S::Error: Display,
    {
        while let Some(raw) = queue.recv().await {
            let envelope = match parse_envelope(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(client_id = %self.id, error = %e, raw = %raw, "Dropping unparsable upstream message");
                    continue;
                }
            };

            let Some(book) = envelope.payload else {
                trace!(client_id = %self.id, event = %envelope.event, "Skipping non-data event");
                continue;
            };

            let requested = *amount.borrow();
            let payload = OutboundPayload::for_book(&book, requested);
            let text = match serde_json::to_string(&payload) {
                Ok(text) => text,
                Err(e) => {
                    warn!(client_id = %self.id, error = %e, "Failed to serialize payload");
                    continue;
                }
            };

            if let Err(e) = outbound.send(OutboundFrame::Text(text)).await {
                info!(client_id = %self.id, error = %e, "Client send failed");
                return;
            }
        }

        debug!(client_id = %self.id, "Subscription queue closed");
    }

    async fn receive_loop<R>(&self, inbound: &mut R, amount: &watch::Sender<Option<Decimal>>)
    where
        R: Stream<Item = InboundFrame> + Unpin,
    {
        while let Some(frame) = inbound.next().await {
            let text = match frame {
                InboundFrame::Text(text) => text,
                InboundFrame::Close => {
                    debug!(client_id = %self.id, "Client closed the connection");
                    return;
                }
            };

            match parse_client_command(&text) {
                Ok(ClientCommand::Close) => {
                    info!(client_id = %self.id, "Client requested close, stopping upstream feed");
                    self.feed.stop().await;
                    return;
                }
                Ok(ClientCommand::SetBuyAmount(value)) => {
                    amount.send_replace(Some(value));
                    info!(client_id = %self.id, buy_amount = %value, "Client provided buyAmount");
                }
                Err(e) => {
                    warn!(client_id = %self.id, error = %e, message = %text, "Ignoring client message");
                }
            }
        }

        debug!(client_id = %self.id, "Client stream ended");
    }

    async fn teardown<S>(&self, outbound: &mut S, end: SessionEnd)
    where
        S: Sink<OutboundFrame> + Unpin,
        S::Error: Display,
    {
        self.broadcaster.unsubscribe(self.id);

        let close = OutboundFrame::Close {
            code: NORMAL_CLOSURE,
            reason: "Closed by server".to_string(),
        };
        let closing = async {
            if let Err(e) = outbound.send(close).await {
                debug!(client_id = %self.id, error = %e, "Close frame not delivered");
            }
            if let Err(e) = outbound.close().await {
                debug!(client_id = %self.id, error = %e, "Failed to close client sink");
            }
        };
        if timeout(CLOSE_SEND_TIMEOUT, closing).await.is_err() {
            warn!(client_id = %self.id, "Client did not accept close frame in time");
        }

        info!(client_id = %self.id, ended_by = ?end, "Client session closed");
    }
}
