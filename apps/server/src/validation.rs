//! Booking payload invariant checker.
//!
//! Pure validation: expected bad input is data, not a fault. Each field gets
//! at most one message, all offending fields are reported together, and the
//! accepted payload comes back normalized (trimmed, parsed, digit phone,
//! defaulted optionals). Handlers turn the error map into a 400 response.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::{phone, slots};

/// Closed set of accepted referral sources; empty string means "not asked".
pub const REFERRAL_SOURCES: &[&str] = &["google", "instagram", "friends", "walk-in", "other"];

/// Clients must be adults.
const MIN_AGE_YEARS: f64 = 18.0;

/// Name minimum on the public booking form.
pub const PUBLIC_NAME_MIN: usize = 2;
/// Name minimum for admin walk-in entry. Intentionally looser than the
/// public form; the two contracts stay separate.
pub const WALK_IN_NAME_MIN: usize = 1;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+()\-\s]{6,}$").unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Raw booking submission as it arrives on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingPayload {
    pub service_slug: String,
    pub date: String,
    pub start_min: i64,
    pub end_min: i64,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub birth_date: String,
    #[serde(default)]
    pub referral: String,
    #[serde(default)]
    pub notes: String,
}

/// A booking that passed every field rule, in normalized form.
#[derive(Debug, Clone)]
pub struct ValidBooking {
    pub service_slug: String,
    pub date: NaiveDate,
    pub start_min: i64,
    pub end_min: i64,
    pub name: String,
    pub phone: String,
    pub phone_digits: String,
    pub email: String,
    pub birth_date: NaiveDate,
    pub referral: String,
    pub notes: String,
}

pub type FieldErrors = BTreeMap<&'static str, String>;

/// Age in years under the fixed 365.25-day-year approximation.
///
/// Kept bit-for-bit compatible with the historical behavior: day count
/// divided by 365.25, no calendar-aware leap handling. Around a birthday
/// this can differ from true calendar age by up to a day.
pub fn age_years_approx(birth: NaiveDate, today: NaiveDate) -> f64 {
    (today - birth).num_days() as f64 / 365.25
}

/// Public booking form contract (name minimum 2).
pub fn validate_public_booking(
    payload: &BookingPayload,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<ValidBooking, FieldErrors> {
    validate_booking(payload, now, tz, PUBLIC_NAME_MIN)
}

/// Admin walk-in contract (name minimum 1).
pub fn validate_walk_in_booking(
    payload: &BookingPayload,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<ValidBooking, FieldErrors> {
    validate_booking(payload, now, tz, WALK_IN_NAME_MIN)
}

fn validate_booking(
    payload: &BookingPayload,
    now: DateTime<Utc>,
    tz: Tz,
    name_min_len: usize,
) -> Result<ValidBooking, FieldErrors> {
    let mut errors = FieldErrors::new();

    let service_slug = payload.service_slug.trim();
    if service_slug.is_empty() {
        errors.insert("service_slug", "Service is required".into());
    }

    let mut date = None;
    if !DATE_RE.is_match(&payload.date) {
        errors.insert("date", "Date must be YYYY-MM-DD".into());
    } else {
        match payload.date.parse::<NaiveDate>() {
            Ok(d) => date = Some(d),
            Err(_) => {
                errors.insert("date", "Not a valid calendar date".into());
            }
        }
    }

    if !(0..slots::MINUTES_PER_DAY).contains(&payload.start_min) {
        errors.insert("start_min", "Start must be within the day".into());
    }
    if payload.end_min <= 0 || payload.end_min > slots::MINUTES_PER_DAY {
        errors.insert("end_min", "End must be within the day".into());
    } else if !errors.contains_key("start_min") && payload.end_min <= payload.start_min {
        // Cross-field pass: only once both bounds are individually fine.
        errors.insert("end_min", "End must be after start".into());
    }

    let name = payload.name.trim();
    if name.chars().count() < name_min_len {
        errors.insert(
            "name",
            format!("Name must be at least {name_min_len} characters"),
        );
    }

    let phone_digits = phone::normalize_digits(&payload.phone);
    if !PHONE_RE.is_match(payload.phone.trim()) {
        errors.insert("phone", "Phone may contain digits, spaces, +, (), -".into());
    } else if !phone::is_valid_digit_count(&phone_digits) {
        errors.insert("phone", "Phone must contain 10 to 15 digits".into());
    }

    if !EMAIL_RE.is_match(payload.email.trim()) {
        errors.insert("email", "Enter a valid email address".into());
    }

    let mut birth_date = None;
    if !DATE_RE.is_match(&payload.birth_date) {
        errors.insert("birth_date", "Birth date must be YYYY-MM-DD".into());
    } else {
        match payload.birth_date.parse::<NaiveDate>() {
            Ok(b) => {
                let today = slots::local_today(now, tz);
                if age_years_approx(b, today) < MIN_AGE_YEARS {
                    errors.insert("birth_date", "You must be at least 18".into());
                } else {
                    birth_date = Some(b);
                }
            }
            Err(_) => {
                errors.insert("birth_date", "Not a valid calendar date".into());
            }
        }
    }

    let referral = payload.referral.trim();
    if !referral.is_empty() && !REFERRAL_SOURCES.contains(&referral) {
        errors.insert("referral", "Unknown referral source".into());
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidBooking {
        service_slug: service_slug.to_string(),
        date: date.expect("validated"),
        start_min: payload.start_min,
        end_min: payload.end_min,
        name: name.to_string(),
        phone: payload.phone.trim().to_string(),
        phone_digits,
        email: payload.email.trim().to_string(),
        birth_date: birth_date.expect("validated"),
        referral: referral.to_string(),
        notes: payload.notes.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BERLIN: Tz = chrono_tz::Europe::Berlin;

    /// A fixed "now": 2025-06-15 09:30 in Berlin (CEST).
    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-15T09:30:00+02:00")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn good_payload() -> BookingPayload {
        BookingPayload {
            service_slug: "haircut".into(),
            date: "2025-06-15".into(),
            start_min: 600,
            end_min: 645,
            name: "Anna".into(),
            phone: "+49 176 1234567".into(),
            email: "a@b.com".into(),
            birth_date: "2000-01-01".into(),
            referral: String::new(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_valid_payload_passes_and_normalizes() {
        let v = validate_public_booking(&good_payload(), fixed_now(), BERLIN).unwrap();
        assert_eq!(v.service_slug, "haircut");
        assert_eq!(v.date.to_string(), "2025-06-15");
        assert_eq!(v.phone_digits, "491761234567");
        assert_eq!(v.referral, "");
        assert_eq!(v.notes, "");
    }

    #[test]
    fn test_trims_name_and_notes() {
        let mut p = good_payload();
        p.name = "  Anna  ".into();
        p.notes = "  allergic to latex  ".into();
        let v = validate_public_booking(&p, fixed_now(), BERLIN).unwrap();
        assert_eq!(v.name, "Anna");
        assert_eq!(v.notes, "allergic to latex");
    }

    #[test]
    fn test_all_field_errors_reported_together() {
        let mut p = good_payload();
        p.service_slug = "  ".into();
        p.email = "nope".into();
        p.phone = "123".into();
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("service_slug"));
        assert!(errs.contains_key("email"));
        assert!(errs.contains_key("phone"));
        assert_eq!(errs.len(), 3);
    }

    // ── date ──

    #[test]
    fn test_date_format_rejected() {
        let mut p = good_payload();
        p.date = "15.06.2025".into();
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("date"));
    }

    #[test]
    fn test_date_impossible_rejected() {
        let mut p = good_payload();
        p.date = "2025-02-30".into();
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("date"));
    }

    // ── window ──

    #[test]
    fn test_negative_start_rejected() {
        let mut p = good_payload();
        p.start_min = -1;
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("start_min"));
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut p = good_payload();
        p.start_min = 700;
        p.end_min = 600;
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("end_min"));
        assert!(!errs.contains_key("start_min"));
    }

    #[test]
    fn test_end_past_midnight_rejected() {
        let mut p = good_payload();
        p.end_min = 1441;
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("end_min"));
    }

    // ── name minimums per call site ──

    #[test]
    fn test_public_form_requires_two_chars() {
        let mut p = good_payload();
        p.name = "A".into();
        assert!(validate_public_booking(&p, fixed_now(), BERLIN).is_err());
        assert!(validate_walk_in_booking(&p, fixed_now(), BERLIN).is_ok());
    }

    #[test]
    fn test_walk_in_still_rejects_empty_name() {
        let mut p = good_payload();
        p.name = "   ".into();
        let errs = validate_walk_in_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("name"));
    }

    // ── phone ──

    #[test]
    fn test_phone_formatted_german_number_ok() {
        let mut p = good_payload();
        p.phone = "+49 (151) 234-5678".into();
        let v = validate_public_booking(&p, fixed_now(), BERLIN).unwrap();
        assert_eq!(v.phone_digits, "491512345678");
    }

    #[test]
    fn test_phone_with_letters_rejected() {
        let mut p = good_payload();
        p.phone = "call me 0151 2345678".into();
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("phone"));
    }

    #[test]
    fn test_phone_too_few_digits_rejected() {
        let mut p = good_payload();
        p.phone = "(030) 12-34".into(); // pattern ok, only 8 digits
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert_eq!(errs.get("phone").unwrap(), "Phone must contain 10 to 15 digits");
    }

    // ── age ──

    #[test]
    fn test_age_approx_day_count() {
        let birth: NaiveDate = "2000-01-01".parse().unwrap();
        let today: NaiveDate = "2025-06-15".parse().unwrap();
        let age = age_years_approx(birth, today);
        assert!(age > 25.0 && age < 25.5);
    }

    #[test]
    fn test_eighteen_minus_one_day_rejected() {
        let mut p = good_payload();
        p.birth_date = "2007-06-16".into(); // 18 years minus a day before now
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("birth_date"));
    }

    #[test]
    fn test_eighteen_plus_one_day_accepted() {
        let mut p = good_payload();
        p.birth_date = "2007-06-14".into();
        assert!(validate_public_booking(&p, fixed_now(), BERLIN).is_ok());
    }

    #[test]
    fn test_exact_eighteenth_birthday_accepted() {
        // 6575 days / 365.25 = 18.0014 under the fixed approximation.
        let mut p = good_payload();
        p.birth_date = "2007-06-15".into();
        assert!(validate_public_booking(&p, fixed_now(), BERLIN).is_ok());
    }

    // ── referral ──

    #[test]
    fn test_referral_known_source_ok() {
        for source in REFERRAL_SOURCES {
            let mut p = good_payload();
            p.referral = source.to_string();
            let v = validate_public_booking(&p, fixed_now(), BERLIN).unwrap();
            assert_eq!(v.referral, *source);
        }
    }

    #[test]
    fn test_referral_defaults_to_empty() {
        let v = validate_public_booking(&good_payload(), fixed_now(), BERLIN).unwrap();
        assert_eq!(v.referral, "");
    }

    #[test]
    fn test_referral_unknown_rejected() {
        let mut p = good_payload();
        p.referral = "tiktok".into();
        let errs = validate_public_booking(&p, fixed_now(), BERLIN).unwrap_err();
        assert!(errs.contains_key("referral"));
    }
}
