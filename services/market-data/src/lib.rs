//! Order Book Relay core
//!
//! Relays one live exchange order book to many downstream clients:
//! - Single upstream WebSocket ingestion with start/stop lifecycle
//! - Fan-out to per-client unbounded queues
//! - Per-client protocol sessions with optional cost quotes
//! - Greedy order-book walk for quotes
//! - Bounded audit log of recent upstream messages
//!
//! # Architecture
//!
//! ```text
//!   Exchange WebSocket
//!          │
//!    ┌─────▼──────┐
//!    │IngestWorker│  ← connect, subscribe, receive
//!    └─────┬──────┘
//!          │ publish(raw)
//!    ┌─────▼──────┐      ┌────────┐
//!    │Broadcaster │─────►│AuditLog│
//!    └─────┬──────┘      └────────┘
//!     ┌────┴─────┬──────────┐
//! ┌───▼───┐  ┌───▼───┐  ┌───▼───┐
//! │Session│  │Session│  │Session│  ← parse, quote, send
//! └───────┘  └───────┘  └───────┘
//! ```

pub mod audit;
pub mod broadcaster;
pub mod envelope;
pub mod ingestion;
pub mod quote;
pub mod session;

pub use audit::{AuditEntry, AuditLog};
pub use broadcaster::Broadcaster;
pub use ingestion::{FeedControl, IngestConfig, IngestWorker, WorkerState};
pub use session::{ClientSession, InboundFrame, OutboundFrame, SessionEnd};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
