//! Types library for the order book relay
//!
//! Shared definitions used by the relay core and the gateway, kept free of
//! any async or networking code.
//!
//! # Modules
//! - `ids`: Unique identifiers (SubscriberId)
//! - `numeric`: Decimal price/size parsing
//! - `book`: Order book snapshot and price levels as received upstream
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod book;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::book::*;
    pub use crate::errors::*;
}
