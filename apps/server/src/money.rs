//! Money amounts as integer euro cents. Never fractional; a priced service
//! is never negative. Cents go to the payment provider as-is.

/// Whether an amount is acceptable as a service price or deposit.
pub fn is_valid_price(cents: i64) -> bool {
    cents >= 0
}

/// Render cents as a "€12.34" string for messages and summaries.
pub fn format_eur(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{}€{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_whole_euros() {
        assert_eq!(format_eur(4500), "€45.00");
    }

    #[test]
    fn test_format_with_cents() {
        assert_eq!(format_eur(4550), "€45.50");
        assert_eq!(format_eur(5), "€0.05");
    }

    #[test]
    fn test_format_zero() {
        assert_eq!(format_eur(0), "€0.00");
    }

    #[test]
    fn test_format_negative() {
        // Only refund deltas ever render negative.
        assert_eq!(format_eur(-150), "-€1.50");
    }

    #[test]
    fn test_price_validity() {
        assert!(is_valid_price(0));
        assert!(is_valid_price(9500));
        assert!(!is_valid_price(-1));
    }
}
