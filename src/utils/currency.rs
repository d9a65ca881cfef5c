/// Currency utility functions for dollar/cent conversions
///
/// All monetary values in the database are stored in cents
/// (1 dollar = 100 cents) to avoid floating-point precision issues.
use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;

/// Convert dollars to cents (multiply by 100)
pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

/// Convert cents to dollars (divide by 100)
pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Convert a decimal price to cents
pub fn decimal_to_cents(price: &BigDecimal) -> i64 {
    (price * BigDecimal::from(100))
        .to_i64()
        .unwrap_or_else(|| dollars_to_cents(price.to_f64().unwrap_or(0.0)))
}

/// Platform service fee in cents, rounded to the nearest cent.
/// Computed once at charge time and frozen into the transaction.
pub fn service_fee_cents(amount_cents: i64, fee_percent: f64) -> i64 {
    (amount_cents as f64 * fee_percent / 100.0).round() as i64
}

/// Format cents as a dollar string with 2 decimal places
pub fn format_cents_as_dollars(cents: i64) -> String {
    format!("${:.2}", cents_to_dollars(cents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_dollars_to_cents() {
        assert_eq!(dollars_to_cents(100.0), 10000);
        assert_eq!(dollars_to_cents(0.50), 50);
        assert_eq!(dollars_to_cents(123.45), 12345);
    }

    #[test]
    fn test_cents_to_dollars() {
        assert_eq!(cents_to_dollars(10000), 100.0);
        assert_eq!(cents_to_dollars(50), 0.50);
        assert_eq!(cents_to_dollars(12345), 123.45);
    }

    #[test]
    fn test_decimal_to_cents() {
        assert_eq!(decimal_to_cents(&BigDecimal::from_str("100.00").unwrap()), 10000);
        assert_eq!(decimal_to_cents(&BigDecimal::from_str("49.99").unwrap()), 4999);
    }

    #[test]
    fn test_service_fee_cents() {
        // $100 at 10% => $10.00 fee, provider gets $90.00
        assert_eq!(service_fee_cents(10000, 10.0), 1000);
        assert_eq!(service_fee_cents(4999, 10.0), 500);
        assert_eq!(service_fee_cents(10000, 0.0), 0);
        // rounds to nearest cent
        assert_eq!(service_fee_cents(333, 10.0), 33);
        assert_eq!(service_fee_cents(335, 10.0), 34);
    }

    #[test]
    fn test_format_cents_as_dollars() {
        assert_eq!(format_cents_as_dollars(10000), "$100.00");
        assert_eq!(format_cents_as_dollars(50), "$0.50");
    }
}
