//! Greedy fill quoting
//!
//! Walks the ask side from the best price outward, taking as much of each
//! level as still needed, until the requested BTC amount is covered.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use types::book::OrderBookSnapshot;
use types::numeric::{Price, Quantity};

/// Returned by [`calculate_quote`] when the book cannot fill the amount.
pub const CANNOT_FILL: Decimal = Decimal::NEGATIVE_ONE;

/// Cost of buying `btc_amount` from the asks of `book`.
///
/// Asks must be ascending by price, which the envelope parser guarantees.
/// Malformed levels are skipped. Returns [`CANNOT_FILL`] when liquidity runs
/// out or when `btc_amount` is not positive. A cost beyond the range of
/// `Decimal` (about 7.9e28) also yields [`CANNOT_FILL`] and is logged.
pub fn calculate_quote(book: &OrderBookSnapshot, btc_amount: Quantity) -> Price {
    if btc_amount <= Decimal::ZERO {
        return CANNOT_FILL;
    }

    let mut remaining = btc_amount;
    let mut cost = Decimal::ZERO;

    for (price, size) in book.asks.iter().filter_map(|level| level.parsed()) {
        if size <= Decimal::ZERO {
            continue;
        }

        let take = remaining.min(size);
        let Some(next) = take.checked_mul(price).and_then(|c| cost.checked_add(c)) else {
            warn!(%btc_amount, %price, "Quote cost overflows decimal range, reporting as unfillable");
            return CANNOT_FILL;
        };
        cost = next;
        remaining -= take;

        if remaining <= Decimal::ZERO {
            return cost;
        }
    }

    CANNOT_FILL
}

/// Quote attached to an outgoing book update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub btc_amount: Quantity,
    /// Total EUR cost, or `-1` when the book cannot fill the amount.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub eur_cost: Price,
    pub success: bool,
}

impl Quote {
    pub fn compute(book: &OrderBookSnapshot, btc_amount: Quantity) -> Self {
        let eur_cost = calculate_quote(book, btc_amount);
        Self {
            btc_amount,
            eur_cost,
            success: eur_cost >= Decimal::ZERO,
        }
    }
}
