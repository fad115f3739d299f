//! Slot time arithmetic and the "is this slot already gone" predicate.
//!
//! All past/future reasoning happens in the salon's civil calendar (a fixed
//! IANA zone), never the server's local time. Comparing raw instants without
//! that normalization misclassifies slots near local midnight whenever the
//! host clock runs in a different zone than the salon.

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

/// Minutes in a civil day. Slot windows live in `0..=1440`.
pub const MINUTES_PER_DAY: i64 = 1440;

/// Fallback zone when SALON_TZ is not configured.
pub const DEFAULT_TZ: &str = "Europe/Berlin";

/// Parse the configured salon timezone. An unknown zone is a startup error,
/// never a per-request condition.
pub fn parse_salon_tz(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| anyhow::anyhow!("unknown IANA timezone: {name}"))
}

/// Today's date in the salon's calendar.
pub fn local_today(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Whether a slot window is well-formed on its own: starts inside the day,
/// ends after it starts, and never crosses midnight.
pub fn is_valid_window(start_min: i64, end_min: i64) -> bool {
    (0..MINUTES_PER_DAY).contains(&start_min)
        && end_min > start_min
        && end_min <= MINUTES_PER_DAY
}

/// Localize a civil date + minutes-since-midnight to an absolute instant.
///
/// Returns `None` when the wall time does not exist in the salon zone (the
/// hour skipped by a DST spring-forward); such a slot cannot be booked.
/// An ambiguous wall time (fall-back hour) resolves to its first occurrence.
pub fn slot_start_instant(date: NaiveDate, start_min: i64, tz: Tz) -> Option<DateTime<Utc>> {
    if !(0..MINUTES_PER_DAY).contains(&start_min) {
        return None;
    }
    let naive = date.and_hms_opt(0, 0, 0)? + TimeDelta::minutes(start_min);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// True iff the slot starts today (salon calendar) and has already elapsed.
///
/// A slot on any other civil day — earlier or later — is never "past" here;
/// rejecting dates before today is the route layer's separate check. Equal
/// instants are not past (strict inequality), so a slot starting right now
/// is still bookable.
pub fn is_past_slot(start: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> bool {
    let start_day = start.with_timezone(&tz).date_naive();
    let today = now.with_timezone(&tz).date_naive();
    if start_day != today {
        return false;
    }
    start < now
}

/// Render minutes-since-midnight as "HH:MM" for responses and messages.
pub fn minutes_to_hhmm(min: i64) -> String {
    let min = min.clamp(0, MINUTES_PER_DAY);
    format!("{:02}:{:02}", min / 60, min % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BERLIN: Tz = chrono_tz::Europe::Berlin;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    // ── is_valid_window ──

    #[test]
    fn test_window_ordinary() {
        assert!(is_valid_window(600, 645));
    }

    #[test]
    fn test_window_full_day() {
        assert!(is_valid_window(0, 1440));
    }

    #[test]
    fn test_window_zero_length() {
        assert!(!is_valid_window(600, 600));
    }

    #[test]
    fn test_window_reversed() {
        assert!(!is_valid_window(700, 600));
    }

    #[test]
    fn test_window_negative_start() {
        assert!(!is_valid_window(-10, 60));
    }

    #[test]
    fn test_window_past_midnight() {
        assert!(!is_valid_window(1400, 1500));
    }

    #[test]
    fn test_window_start_at_midnight_end() {
        assert!(!is_valid_window(1440, 1441));
    }

    // ── slot_start_instant ──

    #[test]
    fn test_localize_summer() {
        // 10:00 CEST == 08:00 UTC
        let start = slot_start_instant(date("2025-06-15"), 600, BERLIN).unwrap();
        assert_eq!(start, utc("2025-06-15T08:00:00Z"));
    }

    #[test]
    fn test_localize_winter() {
        // 10:00 CET == 09:00 UTC
        let start = slot_start_instant(date("2025-01-15"), 600, BERLIN).unwrap();
        assert_eq!(start, utc("2025-01-15T09:00:00Z"));
    }

    #[test]
    fn test_localize_spring_forward_gap() {
        // Berlin skips 02:00–03:00 on 2025-03-30; 02:30 never exists.
        assert!(slot_start_instant(date("2025-03-30"), 150, BERLIN).is_none());
    }

    #[test]
    fn test_localize_after_spring_forward() {
        // 03:30 CEST on transition day == 01:30 UTC
        let start = slot_start_instant(date("2025-03-30"), 210, BERLIN).unwrap();
        assert_eq!(start, utc("2025-03-30T01:30:00Z"));
    }

    #[test]
    fn test_localize_fall_back_ambiguous_takes_first() {
        // 02:30 occurs twice on 2025-10-26; first occurrence is CEST (00:30 UTC).
        let start = slot_start_instant(date("2025-10-26"), 150, BERLIN).unwrap();
        assert_eq!(start, utc("2025-10-26T00:30:00Z"));
    }

    #[test]
    fn test_localize_out_of_range_minute() {
        assert!(slot_start_instant(date("2025-06-15"), 1440, BERLIN).is_none());
    }

    // ── is_past_slot ──

    #[test]
    fn test_past_slot_earlier_today() {
        let now = utc("2025-06-15T07:30:00Z"); // 09:30 Berlin
        let start = utc("2025-06-15T06:00:00Z"); // 08:00 Berlin
        assert!(is_past_slot(start, now, BERLIN));
    }

    #[test]
    fn test_past_slot_later_today() {
        // Now 09:30+02:00, slot starts 10:00+02:00: not past.
        let now = utc("2025-06-15T07:30:00Z");
        let start = slot_start_instant(date("2025-06-15"), 600, BERLIN).unwrap();
        assert!(!is_past_slot(start, now, BERLIN));
    }

    #[test]
    fn test_past_slot_equal_instant_not_past() {
        let now = utc("2025-06-15T08:00:00Z");
        assert!(!is_past_slot(now, now, BERLIN));
    }

    #[test]
    fn test_past_slot_yesterday_is_not_flagged() {
        // Different civil day — the predicate only answers "today and gone";
        // rejecting yesterday is the route layer's job.
        let now = utc("2025-06-15T07:30:00Z");
        let start = utc("2025-06-14T08:00:00Z");
        assert!(!is_past_slot(start, now, BERLIN));
    }

    #[test]
    fn test_past_slot_tomorrow_never_past() {
        let now = utc("2025-06-15T20:00:00Z");
        let start = utc("2025-06-16T06:00:00Z");
        assert!(!is_past_slot(start, now, BERLIN));
    }

    #[test]
    fn test_past_slot_midnight_boundary_uses_salon_calendar() {
        // 23:30 UTC on the 14th is already 01:30 on the 15th in Berlin (CEST),
        // so a slot later on the 15th is "today" and comparisons proceed.
        let now = utc("2025-06-14T23:30:00Z");
        let start = slot_start_instant(date("2025-06-15"), 60, BERLIN).unwrap(); // 01:00
        assert!(is_past_slot(start, now, BERLIN));
    }

    #[test]
    fn test_past_slot_monotone_in_now() {
        let t1 = slot_start_instant(date("2025-06-15"), 600, BERLIN).unwrap();
        let t2 = slot_start_instant(date("2025-06-15"), 660, BERLIN).unwrap();

        let before = t1 - TimeDelta::minutes(5);
        let between = t1 + TimeDelta::minutes(5);
        let after = t2 + TimeDelta::minutes(5);

        assert!(!is_past_slot(t1, before, BERLIN));
        assert!(!is_past_slot(t2, before, BERLIN));
        assert!(is_past_slot(t1, between, BERLIN));
        assert!(!is_past_slot(t2, between, BERLIN));
        assert!(is_past_slot(t1, after, BERLIN));
        assert!(is_past_slot(t2, after, BERLIN));
    }

    #[test]
    fn test_past_slot_on_dst_transition_day() {
        // On 2025-03-30 Berlin jumps 02:00→03:00. Both instants fall on the
        // same civil day despite the offset change, and ordering holds.
        let now = utc("2025-03-30T08:00:00Z"); // 10:00 CEST
        let morning = slot_start_instant(date("2025-03-30"), 540, BERLIN).unwrap(); // 09:00
        let evening = slot_start_instant(date("2025-03-30"), 1080, BERLIN).unwrap(); // 18:00
        assert!(is_past_slot(morning, now, BERLIN));
        assert!(!is_past_slot(evening, now, BERLIN));
    }

    // ── helpers ──

    #[test]
    fn test_local_today_rolls_with_zone() {
        let now = utc("2025-06-14T23:30:00Z");
        assert_eq!(local_today(now, BERLIN), date("2025-06-15"));
    }

    #[test]
    fn test_minutes_to_hhmm() {
        assert_eq!(minutes_to_hhmm(0), "00:00");
        assert_eq!(minutes_to_hhmm(600), "10:00");
        assert_eq!(minutes_to_hhmm(645), "10:45");
        assert_eq!(minutes_to_hhmm(1439), "23:59");
    }

    #[test]
    fn test_parse_salon_tz() {
        assert!(parse_salon_tz("Europe/Berlin").is_ok());
        assert!(parse_salon_tz("Mars/Olympus").is_err());
    }

    #[test]
    fn test_default_tz_parses() {
        let tz = parse_salon_tz(DEFAULT_TZ).unwrap();
        let _ = tz.with_ymd_and_hms(2025, 6, 15, 10, 0, 0);
    }
}
