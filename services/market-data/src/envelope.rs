//! Wire formats of the relay
//!
//! - Upstream: the exchange envelope `{"event": ..., "data": ...}`. Only
//!   `data` events carry an order book; control events (subscription acks,
//!   heartbeats, reconnect requests) are recognised and carry no payload.
//! - Client commands: the literal `close` or `{"buyAmount": ...}`.
//! - Outgoing payloads: the book alone, or the book with a quote attached.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::book::{OrderBookSnapshot, PriceLevel};
use types::errors::ParseError;
use types::numeric::decimal_from_json;

use crate::quote::Quote;

/// Event type of order book updates.
pub const DATA_EVENT: &str = "data";

/// Event used to subscribe to an upstream channel.
pub const SUBSCRIBE_EVENT: &str = "bts:subscribe";

/// Client text command that halts upstream ingestion.
pub const CLOSE_COMMAND: &str = "close";

/// Build the control frame subscribing to `channel`.
pub fn subscribe_message(channel: &str) -> String {
    serde_json::json!({
        "event": SUBSCRIBE_EVENT,
        "data": { "channel": channel }
    })
    .to_string()
}

/// Outer structure of every upstream message.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default, alias = "Event")]
    event: Option<String>,
    #[serde(default, alias = "Data")]
    data: Value,
}

/// One parsed upstream message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    /// Present only for `data` events.
    pub payload: Option<OrderBookSnapshot>,
}

/// Parse one raw upstream message.
///
/// The returned snapshot is normalized (asks ascending), so the quote walk
/// can rely on the ordering. A `data` event whose payload is not an order
/// book is a parse error; any other event parses with no payload.
pub fn parse_envelope(raw: &str) -> Result<Envelope, ParseError> {
    let envelope: RawEnvelope = serde_json::from_str(raw)?;
    let event = envelope.event.unwrap_or_default();

    if !event.eq_ignore_ascii_case(DATA_EVENT) {
        return Ok(Envelope {
            event,
            payload: None,
        });
    }

    if !envelope.data.is_object() {
        return Err(ParseError::UnexpectedShape(format!(
            "data event without order book payload: {}",
            envelope.data
        )));
    }

    let book: OrderBookSnapshot = serde_json::from_value(envelope.data)?;
    Ok(Envelope {
        event,
        payload: Some(book.normalized()),
    })
}

/// Commands a downstream client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Halt upstream ingestion and end the session.
    Close,
    /// Replace the active quote amount (BTC).
    SetBuyAmount(Decimal),
}

/// Parse one client text frame.
pub fn parse_client_command(text: &str) -> Result<ClientCommand, ParseError> {
    if text.eq_ignore_ascii_case(CLOSE_COMMAND) {
        return Ok(ClientCommand::Close);
    }

    let value: Value = serde_json::from_str(text)?;
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::UnexpectedShape("client message is not a JSON object".into()))?;
    let amount = object
        .get("buyAmount")
        .ok_or(ParseError::MissingField("buyAmount"))?;

    Ok(ClientCommand::SetBuyAmount(decimal_from_json(amount)?))
}

/// Message sent to a downstream client for each order book update.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundPayload<'a> {
    Book {
        bids: &'a [PriceLevel],
        asks: &'a [PriceLevel],
    },
    BookWithQuote {
        bids: &'a [PriceLevel],
        asks: &'a [PriceLevel],
        quote: Quote,
    },
}

impl<'a> OutboundPayload<'a> {
    /// Choose the payload shape for `book` given the session's requested
    /// amount. Only a positive amount produces a quote.
    pub fn for_book(book: &'a OrderBookSnapshot, requested: Option<Decimal>) -> Self {
        match requested {
            Some(amount) if amount > Decimal::ZERO => OutboundPayload::BookWithQuote {
                bids: &book.bids,
                asks: &book.asks,
                quote: Quote::compute(book, amount),
            },
            _ => OutboundPayload::Book {
                bids: &book.bids,
                asks: &book.asks,
            },
        }
    }

    pub fn quote(&self) -> Option<&Quote> {
        match self {
            OutboundPayload::BookWithQuote { quote, .. } => Some(quote),
            OutboundPayload::Book { .. } => None,
        }
    }
}
