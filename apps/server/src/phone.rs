//! Phone number normalization and the suffix key used for client matching.

/// Strip every non-digit character from a raw phone string.
pub fn normalize_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalized phones must carry 10–15 digits (E.164 territory).
pub fn is_valid_digit_count(digits: &str) -> bool {
    (10..=15).contains(&digits.len())
}

/// Last 7 digits, used as a fuzzy lookup key when matching existing clients.
///
/// Tolerates country-code and formatting differences ("+49 151..." vs
/// "0151..."). Favors recall over precision: a suffix collision between two
/// subscribers is rare and resolved by a secondary name match.
pub fn last_seven(digits: &str) -> &str {
    let n = digits.len();
    if n <= 7 {
        digits
    } else {
        &digits[n - 7..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_formatted_german_number() {
        let digits = normalize_digits("+49 (151) 234-5678");
        assert_eq!(digits, "491512345678");
        assert_eq!(digits.len(), 12);
        assert!(is_valid_digit_count(&digits));
    }

    #[test]
    fn test_normalize_plain_digits_untouched() {
        assert_eq!(normalize_digits("4915112345678"), "4915112345678");
    }

    #[test]
    fn test_normalize_strips_letters_too() {
        assert_eq!(normalize_digits("tel: 030/123.456-78"), "03012345678");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_digits("+()- "), "");
    }

    #[test]
    fn test_digit_count_bounds() {
        assert!(!is_valid_digit_count("123456789")); // 9
        assert!(is_valid_digit_count("1234567890")); // 10
        assert!(is_valid_digit_count("123456789012345")); // 15
        assert!(!is_valid_digit_count("1234567890123456")); // 16
    }

    #[test]
    fn test_last_seven_long_number() {
        assert_eq!(last_seven("491512345678"), "2345678");
    }

    #[test]
    fn test_last_seven_matches_across_country_codes() {
        // Same subscriber dialed with and without country code.
        assert_eq!(last_seven("491512345678"), last_seven("01512345678"));
    }

    #[test]
    fn test_last_seven_short_number_whole() {
        assert_eq!(last_seven("12345"), "12345");
        assert_eq!(last_seven("1234567"), "1234567");
    }
}
