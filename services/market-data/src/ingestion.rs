//! Upstream ingestion for the relay
//!
//! Owns the single WebSocket connection to the exchange. A run connects,
//! sends the subscribe control frame, then publishes every complete
//! upstream message to the [`Broadcaster`] without interpreting it.
//!
//! Lifecycle: `Stopped → Connecting → Subscribed → Stopped`, or
//! `→ Failed` on an I/O error. There is no automatic reconnect; the next
//! client that connects while the feed is down starts it again.
//!
//! Each run is a detached task whose handle is recorded for cancellation.
//! Runs are numbered so that a run finishing late never overwrites the state
//! of a newer one.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use types::errors::ConnectionError;

use crate::broadcaster::Broadcaster;
use crate::envelope::subscribe_message;

/// Public Bitstamp WebSocket endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://ws.bitstamp.net";

/// BTC/EUR order book channel.
pub const DEFAULT_CHANNEL: &str = "order_book_btceur";

/// Extra time `stop` waits for a run beyond the close handshake timeout.
const STOP_GRACE: Duration = Duration::from_millis(500);

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the ingest worker.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upstream WebSocket URL.
    pub url: String,
    /// Channel named in the subscribe control frame.
    pub channel: String,
    /// Bounded wait for the close handshake on stop.
    pub close_timeout: Duration,
}

impl IngestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Connection state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Connecting,
    Subscribed,
    Failed,
}

impl WorkerState {
    pub fn is_running(self) -> bool {
        matches!(self, WorkerState::Connecting | WorkerState::Subscribed)
    }
}

/// Start/stop control over the upstream feed, as seen by client sessions.
#[async_trait]
pub trait FeedControl: Send + Sync {
    fn is_running(&self) -> bool;

    /// Start the feed in the background. No-op if already running.
    fn start(&self);

    /// Stop the feed. Idempotent.
    async fn stop(&self);
}

struct RunHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    state: WorkerState,
    generation: u64,
    run: Option<RunHandle>,
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the single upstream connection.
pub struct IngestWorker {
    config: IngestConfig,
    broadcaster: Arc<Broadcaster>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    // Serializes stops so a second caller waits for the first to finish.
    stop_guard: tokio::sync::Mutex<()>,
}

impl IngestWorker {
    pub fn new(config: IngestConfig, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            config,
            broadcaster,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: WorkerState::Stopped,
                generation: 0,
                run: None,
            })),
            stop_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.lifecycle).state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Spawn a run in the background.
    ///
    /// The running check and the spawn happen under one lock, so concurrent
    /// callers start at most one connection. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state.is_running() {
            debug!(state = ?lifecycle.state, "Upstream feed already running");
            return;
        }

        lifecycle.generation += 1;
        lifecycle.state = WorkerState::Connecting;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let run = FeedRun {
            generation: lifecycle.generation,
            config: self.config.clone(),
            broadcaster: Arc::clone(&self.broadcaster),
            lifecycle: Arc::clone(&self.lifecycle),
        };
        let task = tokio::spawn(run.execute(shutdown_rx));
        lifecycle.run = Some(RunHandle {
            shutdown: shutdown_tx,
            task,
        });

        info!(
            url = %self.config.url,
            generation = lifecycle.generation,
            "Starting upstream feed"
        );
    }

    /// Cancel the current run, wait for its close handshake (bounded), and
    /// release the connection.
    ///
    /// Safe to call when never started, repeatedly, or concurrently with
    /// `start`. While a stop is in flight the worker still reports running,
    /// so a concurrent `start` is a no-op.
    pub async fn stop(&self) {
        let _guard = self.stop_guard.lock().await;

        let run = lock(&self.lifecycle).run.take();
        if let Some(run) = run {
            info!("Stopping upstream feed");
            let _ = run.shutdown.send(());

            let mut task = run.task;
            let wait = self.config.close_timeout + STOP_GRACE;
            if timeout(wait, &mut task).await.is_err() {
                warn!(
                    timeout_ms = wait.as_millis() as u64,
                    "Upstream feed did not stop in time, aborting"
                );
                task.abort();
            }
        } else {
            debug!("Upstream feed not running");
        }

        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.run.is_none() {
            lifecycle.state = WorkerState::Stopped;
        }
        info!("Upstream feed stopped");
    }
}

#[async_trait]
impl FeedControl for IngestWorker {
    fn is_running(&self) -> bool {
        IngestWorker::is_running(self)
    }

    fn start(&self) {
        IngestWorker::start(self)
    }

    async fn stop(&self) {
        IngestWorker::stop(self).await
    }
}

/// One connection attempt and its receive loop.
struct FeedRun {
    generation: u64,
    config: IngestConfig,
    broadcaster: Arc<Broadcaster>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl FeedRun {
    async fn execute(self, mut shutdown: oneshot::Receiver<()>) {
        let connected = tokio::select! {
            _ = &mut shutdown => {
                info!("Upstream feed cancelled while connecting");
                self.set_state(WorkerState::Stopped);
                return;
            }
            result = connect_and_subscribe(&self.config) => result,
        };

        let ws = match connected {
            Ok(ws) => ws,
            Err(e) => {
                error!(error = %e, "Upstream feed failed to start");
                self.set_state(WorkerState::Failed);
                return;
            }
        };

        self.set_state(WorkerState::Subscribed);

        let final_state = match self.receive_loop(ws, shutdown).await {
            Ok(()) => WorkerState::Stopped,
            Err(e) => {
                error!(error = %e, "Upstream feed receive loop failed");
                WorkerState::Failed
            }
        };
        self.set_state(final_state);
    }

    async fn receive_loop(
        &self,
        mut ws: UpstreamStream,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    close_gracefully(&mut ws, self.config.close_timeout).await;
                    return Ok(());
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.publish(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.publish(text),
                        Err(_) => warn!("Dropping non UTF-8 binary frame from upstream"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Upstream closed the connection");
                        return Ok(());
                    }
                    // Ping/pong replies are handled by the codec.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ConnectionError::Receive(e.to_string())),
                    None => {
                        info!("Upstream stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn publish(&self, raw: String) {
        let delivered = self.broadcaster.publish(raw);
        trace!(delivered, "Published upstream message");
    }

    fn set_state(&self, state: WorkerState) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.generation == self.generation {
            debug!(from = ?lifecycle.state, to = ?state, "Upstream feed state change");
            lifecycle.state = state;
        }
    }
}

async fn connect_and_subscribe(config: &IngestConfig) -> Result<UpstreamStream, ConnectionError> {
    let (mut ws, response) =
        connect_async(config.url.as_str())
            .await
            .map_err(|e| ConnectionError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
    info!(url = %config.url, status = %response.status(), "Connected to upstream");

    ws.send(Message::Text(subscribe_message(&config.channel)))
        .await
        .map_err(|e| ConnectionError::Send(e.to_string()))?;
    info!(channel = %config.channel, "Subscribed to upstream channel");

    Ok(ws)
}

async fn close_gracefully(ws: &mut UpstreamStream, wait: Duration) {
    let handshake = async {
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed("Stopped by server"),
        }))
        .await?;
        // Drain until the peer acknowledges the close.
        while let Some(frame) = ws.next().await {
            frame?;
        }
        Ok::<(), WsError>(())
    };

    match timeout(wait, handshake).await {
        Ok(Ok(())) => debug!("Upstream close handshake completed"),
        Ok(Err(e)) => debug!(error = %e, "Upstream close handshake ended with error"),
        Err(_) => warn!(
            timeout_ms = wait.as_millis() as u64,
            "Upstream close handshake timed out"
        ),
    }
}
