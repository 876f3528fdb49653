//! Decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Upstream feeds and clients send numbers either as JSON numbers or as
//! decimal strings; both are accepted here.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::errors::ParseError;

/// Price in quote currency (EUR for the BTC/EUR book).
pub type Price = Decimal;

/// Size in base currency (BTC for the BTC/EUR book).
pub type Quantity = Decimal;

/// Parse a decimal string, accepting plain (`"0.5"`) and scientific
/// (`"5e-1"`) notation. Surrounding whitespace is ignored.
pub fn parse_decimal(raw: &str) -> Result<Decimal, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::InvalidDecimal(raw.to_string()));
    }

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ParseError::InvalidDecimal(raw.to_string()))
}

/// Interpret a JSON value as a decimal. Strings and numbers are accepted,
/// anything else is rejected.
pub fn decimal_from_json(value: &Value) -> Result<Decimal, ParseError> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        other => Err(ParseError::UnexpectedShape(format!(
            "expected number or numeric string, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_decimal() {
        assert_eq!(parse_decimal("0.5").unwrap(), Decimal::new(5, 1));
        assert_eq!(parse_decimal(" 62000.12 ").unwrap(), Decimal::new(6200012, 2));
    }

    #[test]
    fn test_parse_scientific_decimal() {
        assert_eq!(parse_decimal("5e-1").unwrap(), Decimal::new(5, 1));
        assert_eq!(parse_decimal("1.5E2").unwrap(), Decimal::from(150));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_decimal("").is_err());
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("1.2.3").is_err());
    }

    #[test]
    fn test_decimal_from_json_number_and_string() {
        assert_eq!(decimal_from_json(&json!(0.25)).unwrap(), Decimal::new(25, 2));
        assert_eq!(decimal_from_json(&json!(3)).unwrap(), Decimal::from(3));
        assert_eq!(decimal_from_json(&json!("1.75")).unwrap(), Decimal::new(175, 2));
    }

    #[test]
    fn test_decimal_from_json_rejects_other_shapes() {
        assert!(matches!(
            decimal_from_json(&json!(true)),
            Err(ParseError::UnexpectedShape(_))
        ));
        assert!(decimal_from_json(&json!(null)).is_err());
        assert!(decimal_from_json(&json!(["1"])).is_err());
    }
}
