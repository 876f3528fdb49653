//! Order book snapshot as received from the upstream exchange
//!
//! Levels are kept exactly as the exchange sent them (`["62000.10",
//! "0.25"]`) so that forwarding to clients is lossless. Decimal values are
//! parsed on demand; a level that does not parse is "malformed" and is
//! skipped by consumers rather than rejecting the whole snapshot.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::numeric::{decimal_from_json, Price, Quantity};

/// A single `[price, size]` entry of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceLevel(Vec<Value>);

impl PriceLevel {
    /// Build a level from decimal strings, the shape the exchange uses.
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self(vec![Value::String(price.into()), Value::String(size.into())])
    }

    /// Build a level from arbitrary JSON entries.
    pub fn from_raw(entries: Vec<Value>) -> Self {
        Self(entries)
    }

    pub fn price(&self) -> Option<Price> {
        self.0.first().and_then(|v| decimal_from_json(v).ok())
    }

    pub fn size(&self) -> Option<Quantity> {
        self.0.get(1).and_then(|v| decimal_from_json(v).ok())
    }

    /// Price and size, or `None` if either is missing or non-numeric.
    pub fn parsed(&self) -> Option<(Price, Quantity)> {
        Some((self.price()?, self.size()?))
    }
}

/// Bids and asks of one upstream update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self { bids, asks }
    }

    /// Establish the ordering invariant consumers rely on.
    ///
    /// Asks ascending by price (best ask first), bids descending (best bid
    /// first). Malformed levels sink to the end. The sort is stable, so an
    /// already ordered book is left untouched.
    pub fn normalize(&mut self) {
        self.asks.sort_by(|a, b| compare_prices(a.price(), b.price(), false));
        self.bids.sort_by(|a, b| compare_prices(a.price(), b.price(), true));
    }

    /// Builder-style variant of [`normalize`](Self::normalize).
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

fn compare_prices(a: Option<Price>, b: Option<Price>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
