use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    models::*,
    money, phone, slots,
    validation::{self, BookingPayload},
    AppState,
};

// ── Constants ──

/// Deposit charged at booking time (euro cents).
pub const DEPOSIT_CENTS: i64 = 2000;

/// Cancellations this close to the appointment forfeit the deposit.
const REFUND_CUTOFF_HOURS: i64 = 24;

/// Within this many days, only blocks adjacent to existing bookings are
/// offered, to keep the day from fragmenting.
const TIGHT_MODE_DAYS: i64 = 3;

/// Base slot length the admin grid is built from.
const SLOT_UNIT_MIN: i64 = 60;

/// How many base slots a service occupies.
fn slots_needed_for_duration(duration_min: i64) -> usize {
    ((duration_min + SLOT_UNIT_MIN - 1) / SLOT_UNIT_MIN).max(1) as usize
}

/// Days from `today` to a requested date string; unparseable input defaults
/// far into the future (free mode).
fn days_until(today: NaiveDate, date_str: &str) -> i64 {
    match date_str.parse::<NaiveDate>() {
        Ok(d) => (d - today).num_days(),
        Err(_) => 999,
    }
}

// ── Shared booking query (used by admin and payment handlers too) ──

const BOOKING_DETAIL_SELECT: &str =
    "SELECT b.id, s.name as service_name, s.slug as service_slug, s.price_cents,
            b.deposit_cents, b.date, b.start_min, b.end_min,
            c.name as client_name, c.phone as client_phone,
            b.status, b.payment_status, b.notes, b.created_at
     FROM bookings b
     JOIN services s ON s.id = b.service_id
     JOIN clients c ON c.id = b.client_id";

pub fn booking_detail_select() -> &'static str {
    BOOKING_DETAIL_SELECT
}

// ── Endpoints ──

/// GET /api/services — the public catalog (active services only).
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, StatusCode> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, slug, name, description, price_cents, duration_min, is_active, sort_order
         FROM services WHERE is_active = 1 ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("list_services: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/available-dates?service=slug — dates with room for the service.
pub async fn available_dates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableDatesQuery>,
) -> Result<Json<ApiResponse<Vec<String>>>, StatusCode> {
    let slots_needed = match &query.service {
        Some(slug) => match fetch_active_service(&state, slug).await? {
            Some(s) => slots_needed_for_duration(s.duration_min),
            None => return Ok(Json(ApiResponse::success(vec![]))),
        },
        None => 1,
    };

    let today = slots::local_today(Utc::now(), state.tz).to_string();
    let dates: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT date FROM available_slots
         WHERE is_booked = 0 AND date >= ?
         ORDER BY date ASC",
    )
    .bind(&today)
    .fetch_all(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut valid_dates = Vec::new();
    for date in &dates {
        let slots = fetch_day_slots(&state, date).await?;
        if has_consecutive_free_slots(&slots, slots_needed) {
            valid_dates.push(date.clone());
        }
    }

    Ok(Json(ApiResponse::success(valid_dates)))
}

/// GET /api/available-times?date=YYYY-MM-DD&service=slug — bookable blocks.
///
/// For today, blocks that have already started are dropped; within
/// `TIGHT_MODE_DAYS` only blocks adjacent to existing bookings are shown.
pub async fn available_times(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableTimesQuery>,
) -> Result<Json<ApiResponse<AvailableTimesResponse>>, StatusCode> {
    let service = match fetch_active_service(&state, &query.service).await? {
        Some(s) => s,
        None => {
            return Ok(Json(ApiResponse::success(AvailableTimesResponse {
                mode: "free".into(),
                times: vec![],
            })))
        }
    };

    let slots_needed = slots_needed_for_duration(service.duration_min);
    let day_slots = fetch_day_slots(&state, &query.date).await?;

    let now = Utc::now();
    let today = slots::local_today(now, state.tz);
    let is_tight = days_until(today, &query.date) <= TIGHT_MODE_DAYS;

    let mut blocks = find_bookable_blocks(&day_slots, slots_needed, is_tight);

    // Today only: drop blocks whose start has already passed.
    if let Ok(date) = query.date.parse::<NaiveDate>() {
        blocks.retain(|b| {
            match slots::slot_start_instant(date, b.start_min, state.tz) {
                Some(start) => !slots::is_past_slot(start, now, state.tz),
                None => false, // erased by a DST gap; not bookable
            }
        });
    }

    Ok(Json(ApiResponse::success(AvailableTimesResponse {
        mode: if is_tight { "tight".into() } else { "free".into() },
        times: blocks,
    })))
}

/// GET /api/calendar?year=2026&month=2&service=slug — month overview.
///
/// All slots for the month come from one query (no per-day roundtrips).
pub async fn calendar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<ApiResponse<Vec<CalendarDay>>>, StatusCode> {
    let slots_needed = match &query.service {
        Some(slug) => match fetch_active_service(&state, slug).await? {
            Some(s) => slots_needed_for_duration(s.duration_min),
            None => 1,
        },
        None => 1,
    };

    let (year, month) = (query.year, query.month);
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(StatusCode::BAD_REQUEST)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or(StatusCode::BAD_REQUEST)?;
    let days_in_month = next_month.pred_opt().map(|d| d.day()).unwrap_or(28);

    let today = slots::local_today(Utc::now(), state.tz).to_string();

    let month_start = first.to_string();
    let month_end = format!("{:04}-{:02}-{:02}", year, month, days_in_month);

    let all_slots = sqlx::query_as::<_, AvailableSlot>(
        "SELECT id, date, start_min, end_min, is_booked, booking_id
         FROM available_slots
         WHERE date >= ? AND date <= ?
         ORDER BY date ASC, start_min ASC",
    )
    .bind(&month_start)
    .bind(&month_end)
    .fetch_all(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut slots_by_date: HashMap<String, Vec<AvailableSlot>> = HashMap::new();
    for slot in all_slots {
        slots_by_date.entry(slot.date.clone()).or_default().push(slot);
    }

    let mut calendar_days = Vec::new();
    for day in 1..=days_in_month {
        let date = format!("{:04}-{:02}-{:02}", year, month, day);
        if date < today {
            continue;
        }

        let slots = slots_by_date.get(&date);
        let total = slots.map_or(0, |s| s.len() as i64);
        let free = slots.map_or(0, |s| s.iter().filter(|sl| !sl.is_booked).count() as i64);

        let bookable = if total == 0 {
            false
        } else if query.service.is_some() {
            slots.is_some_and(|s| has_consecutive_free_slots(s, slots_needed))
        } else {
            free > 0
        };

        calendar_days.push(CalendarDay {
            date,
            total,
            free,
            bookable,
        });
    }

    Ok(Json(ApiResponse::success(calendar_days)))
}

/// POST /api/bookings — public booking with deposit payment.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BookingPayload>,
) -> Result<Json<ApiResponse<CreateBookingResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let now = Utc::now();

    let valid = validation::validate_public_booking(&body, now, state.tz).map_err(|errors| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::invalid_fields(errors)),
        )
    })?;

    create_booking_inner(&state, valid, now, false).await
}

/// The flow shared by the public form and the admin walk-in endpoint.
/// Walk-ins are confirmed immediately and skip the deposit.
pub async fn create_booking_inner(
    state: &AppState,
    valid: validation::ValidBooking,
    now: chrono::DateTime<Utc>,
    walk_in: bool,
) -> Result<Json<ApiResponse<CreateBookingResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    // Dates before today are a static input error, not a race.
    let today = slots::local_today(now, state.tz);
    if valid.date < today {
        let mut errors = validation::FieldErrors::new();
        errors.insert("date", "Date is already gone".into());
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::invalid_fields(errors)),
        ));
    }

    let service = fetch_active_service(state, &valid.service_slug)
        .await
        .map_err(|s| (s, Json(ApiResponse::error("DB error"))))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Service not found")),
            )
        })?;

    // The requested window must match the service's duration.
    if valid.end_min - valid.start_min != service.duration_min {
        let mut errors = validation::FieldErrors::new();
        errors.insert("end_min", "Window must match the service duration".into());
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::invalid_fields(errors)),
        ));
    }

    // Localize through the salon zone; a wall time erased by DST cannot
    // be booked.
    let start_instant = match slots::slot_start_instant(valid.date, valid.start_min, state.tz) {
        Some(i) => i,
        None => {
            let mut errors = validation::FieldErrors::new();
            errors.insert("start_min", "This time does not exist on that date".into());
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::invalid_fields(errors)),
            ));
        }
    };

    // StaleSlot: a slot that elapsed between the client's page load and
    // this request. Signalled apart from field errors so the frontend
    // refreshes availability instead of asking the user to edit fields.
    if slots::is_past_slot(start_instant, now, state.tz) {
        return Err((StatusCode::CONFLICT, Json(ApiResponse::stale_slot())));
    }

    // Every slot overlapping the window; a 45-min service inside a 60-min
    // slot still claims the whole slot.
    let date_str = valid.date.to_string();
    let day_slots = sqlx::query_as::<_, AvailableSlot>(
        "SELECT id, date, start_min, end_min, is_booked, booking_id
         FROM available_slots
         WHERE date = ? AND start_min < ? AND end_min > ?
         ORDER BY start_min ASC",
    )
    .bind(&date_str)
    .bind(valid.end_min)
    .bind(valid.start_min)
    .fetch_all(&state.db)
    .await
    .map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        )
    })?;

    if !window_is_covered(&day_slots, valid.start_min, valid.end_min) {
        return Err((StatusCode::CONFLICT, Json(ApiResponse::stale_slot())));
    }

    let created_at = now.format("%Y-%m-%d %H:%M:%S").to_string();

    let client_id = find_or_create_client(&state.db, &valid, &created_at)
        .await
        .map_err(|e| {
            tracing::error!("client upsert failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("DB error")),
            )
        })?;

    let (status, payment_status, deposit) = if walk_in {
        ("confirmed", "none", 0)
    } else {
        ("pending_payment", "pending", DEPOSIT_CENTS)
    };

    let booking_id = sqlx::query(
        "INSERT INTO bookings (service_id, client_id, date, start_min, end_min,
         status, notes, payment_status, deposit_cents, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(service.id)
    .bind(client_id)
    .bind(&date_str)
    .bind(valid.start_min)
    .bind(valid.end_min)
    .bind(status)
    .bind(&valid.notes)
    .bind(payment_status)
    .bind(deposit)
    .bind(&created_at)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("booking INSERT failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        )
    })?
    .last_insert_rowid();

    // Lock the slots right away; losing the race means another booking
    // got here first.
    for slot in &day_slots {
        let locked = sqlx::query(
            "UPDATE available_slots SET is_booked = 1, booking_id = ?
             WHERE id = ? AND is_booked = 0",
        )
        .bind(booking_id)
        .bind(slot.id)
        .execute(&state.db)
        .await;

        match locked {
            Ok(r) if r.rows_affected() == 1 => {}
            _ => {
                rollback_booking(&state.db, booking_id).await;
                return Err((StatusCode::CONFLICT, Json(ApiResponse::stale_slot())));
            }
        }
    }

    let client_secret = if walk_in {
        None
    } else {
        let description = format!(
            "Deposit: {} on {} at {}",
            service.name,
            date_str,
            slots::minutes_to_hhmm(valid.start_min)
        );

        match super::payment::create_payment_intent(
            &state.stripe_secret_key,
            booking_id,
            DEPOSIT_CENTS,
            &description,
        )
        .await
        {
            Ok((intent_id, secret)) => {
                if let Err(e) =
                    sqlx::query("UPDATE bookings SET payment_intent_id = ? WHERE id = ?")
                        .bind(&intent_id)
                        .bind(booking_id)
                        .execute(&state.db)
                        .await
                {
                    tracing::error!(
                        "failed to save intent id for booking {}: {}",
                        booking_id,
                        e
                    );
                }
                Some(secret)
            }
            Err(e) => {
                tracing::error!("payment intent failed for booking {}: {}", booking_id, e);
                rollback_booking(&state.db, booking_id).await;
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error("Payment setup failed. Try again later.")),
                ));
            }
        }
    };

    let detail = BookingDetail {
        id: booking_id,
        service_name: service.name,
        service_slug: service.slug,
        price_cents: service.price_cents,
        deposit_cents: deposit,
        date: date_str,
        start_min: valid.start_min,
        end_min: valid.end_min,
        client_name: valid.name,
        client_phone: valid.phone,
        status: status.into(),
        payment_status: payment_status.into(),
        notes: valid.notes,
        created_at,
    };

    Ok(Json(ApiResponse::success(CreateBookingResponse {
        booking: detail,
        client_secret,
    })))
}

/// GET /api/bookings/:id/status?phone=... — payment status poll.
pub async fn booking_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(proof): Query<PhoneProofQuery>,
) -> Result<Json<ApiResponse<BookingStatusResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let suffix = phone_proof_suffix(&proof)?;

    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT b.status, b.payment_status FROM bookings b
         JOIN clients c ON c.id = b.client_id
         WHERE b.id = ? AND c.phone_suffix = ?",
    )
    .bind(id)
    .bind(&suffix)
    .fetch_optional(&state.db)
    .await
    .map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        )
    })?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Booking not found")),
        )
    })?;

    Ok(Json(ApiResponse::success(BookingStatusResponse {
        status: row.0,
        payment_status: row.1,
    })))
}

/// DELETE /api/bookings/:id?phone=... — client cancellation with the
/// >24h refund rule.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(proof): Query<PhoneProofQuery>,
) -> Result<Json<ApiResponse<CancelBookingResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let suffix = phone_proof_suffix(&proof)?;

    let booking = sqlx::query_as::<_, Booking>(
        "SELECT b.* FROM bookings b
         JOIN clients c ON c.id = b.client_id
         WHERE b.id = ? AND c.phone_suffix = ?
         AND b.status IN ('confirmed', 'pending_payment')",
    )
    .bind(id)
    .bind(&suffix)
    .fetch_optional(&state.db)
    .await
    .map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        )
    })?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Booking not found")),
        )
    })?;

    let refund_info = process_refund_if_needed(&state, &booking, false).await;

    if let Err(e) = sqlx::query(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = datetime('now') WHERE id = ?",
    )
    .bind(id)
    .execute(&state.db)
    .await
    {
        tracing::error!("failed to cancel booking {}: {}", id, e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        ));
    }

    free_booking_slots(&state.db, id).await;

    // Tell the owner
    let detail_query = format!("{} WHERE b.id = ?", BOOKING_DETAIL_SELECT);
    let detail = sqlx::query_as::<_, BookingDetail>(&detail_query)
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .ok()
        .flatten();

    if let Some(b) = detail {
        let refund_line = refund_info
            .as_deref()
            .map(|r| format!("\n{r}"))
            .unwrap_or_default();
        let message = format!(
            "\u{274c} Booking cancelled\n\n\
             {} ({})\n\
             {}\n\
             {} {}–{}{}",
            b.client_name,
            b.client_phone,
            b.service_name,
            b.date,
            slots::minutes_to_hhmm(b.start_min),
            slots::minutes_to_hhmm(b.end_min),
            refund_line,
        );
        notify_owner(&state.bot_token, state.admin_tg_id, &message).await;
    }

    Ok(Json(ApiResponse::success(CancelBookingResponse {
        message: "Booking cancelled".into(),
        refund_info,
    })))
}

// ── Shared helpers (pub for admin.rs / payment.rs) ──

/// Send a message to the salon owner via the Bot API.
pub async fn notify_owner(bot_token: &str, chat_id: i64, text: &str) {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
    let client = reqwest::Client::new();
    if let Err(e) = client
        .post(&url)
        .json(&serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML"
        }))
        .send()
        .await
    {
        tracing::error!("failed to notify owner: {}", e);
    }
}

/// Free every slot held by a booking.
pub async fn free_booking_slots(db: &sqlx::SqlitePool, booking_id: i64) {
    if let Err(e) = sqlx::query(
        "UPDATE available_slots SET is_booked = 0, booking_id = NULL WHERE booking_id = ?",
    )
    .bind(booking_id)
    .execute(db)
    .await
    {
        tracing::error!("failed to free slots for booking {}: {}", booking_id, e);
    }
}

/// Refund the deposit when the policy allows it.
///
/// `admin_override` — owner-initiated cancellations always refund; clients
/// only get the deposit back more than 24h before the appointment
/// (salon-timezone clock).
pub async fn process_refund_if_needed(
    state: &AppState,
    booking: &Booking,
    admin_override: bool,
) -> Option<String> {
    if booking.payment_status != "paid" {
        return None;
    }

    let hours_until = booking
        .date
        .parse::<NaiveDate>()
        .ok()
        .and_then(|d| slots::slot_start_instant(d, booking.start_min, state.tz))
        .map(|start| (start - Utc::now()).num_hours())
        .unwrap_or(999); // refundable when the stored date is unreadable

    let should_refund = admin_override || hours_until > REFUND_CUTOFF_HOURS;

    if !should_refund {
        return Some(format!(
            "Deposit {} is forfeited (cancelled less than {}h before)",
            money::format_eur(booking.deposit_cents),
            REFUND_CUTOFF_HOURS
        ));
    }

    let intent_id = booking.payment_intent_id.as_deref()?;
    let refunded = super::payment::create_refund(
        &state.stripe_secret_key,
        intent_id,
        booking.deposit_cents,
    )
    .await;

    if refunded.is_ok() {
        if let Err(e) =
            sqlx::query("UPDATE bookings SET payment_status = 'refunded' WHERE id = ?")
                .bind(booking.id)
                .execute(&state.db)
                .await
        {
            tracing::error!(
                "failed to mark booking {} refunded: {}",
                booking.id,
                e
            );
        }
        Some(format!(
            "Deposit {} will be refunded",
            money::format_eur(booking.deposit_cents)
        ))
    } else {
        tracing::error!("refund failed for booking {}", booking.id);
        Some("Refund will be processed manually".into())
    }
}

pub async fn fetch_active_service(
    state: &AppState,
    slug: &str,
) -> Result<Option<Service>, StatusCode> {
    sqlx::query_as::<_, Service>(
        "SELECT id, slug, name, description, price_cents, duration_min, is_active, sort_order
         FROM services WHERE slug = ? AND is_active = 1",
    )
    .bind(slug)
    .fetch_optional(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn fetch_day_slots(
    state: &AppState,
    date: &str,
) -> Result<Vec<AvailableSlot>, StatusCode> {
    sqlx::query_as::<_, AvailableSlot>(
        "SELECT id, date, start_min, end_min, is_booked, booking_id
         FROM available_slots WHERE date = ? ORDER BY start_min ASC",
    )
    .bind(date)
    .fetch_all(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Match an existing client by phone suffix (same subscriber with or
/// without country code) or create a new record. A suffix hit counts as
/// the same person when either the full digit string or the name matches.
async fn find_or_create_client(
    db: &sqlx::SqlitePool,
    valid: &validation::ValidBooking,
    created_at: &str,
) -> Result<i64, sqlx::Error> {
    let suffix = phone::last_seven(&valid.phone_digits).to_string();

    let candidates = sqlx::query_as::<_, Client>(
        "SELECT * FROM clients WHERE phone_suffix = ?",
    )
    .bind(&suffix)
    .fetch_all(db)
    .await?;

    let matched = candidates.into_iter().find(|c| {
        c.phone_digits == valid.phone_digits || c.name.eq_ignore_ascii_case(&valid.name)
    });

    if let Some(existing) = matched {
        sqlx::query(
            "UPDATE clients SET name = ?, phone = ?, phone_digits = ?, email = ? WHERE id = ?",
        )
        .bind(&valid.name)
        .bind(&valid.phone)
        .bind(&valid.phone_digits)
        .bind(&valid.email)
        .bind(existing.id)
        .execute(db)
        .await?;
        return Ok(existing.id);
    }

    let id = sqlx::query(
        "INSERT INTO clients (name, phone, phone_digits, phone_suffix, email, birth_date,
         referral, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&valid.name)
    .bind(&valid.phone)
    .bind(&valid.phone_digits)
    .bind(&suffix)
    .bind(&valid.email)
    .bind(valid.birth_date.to_string())
    .bind(&valid.referral)
    .bind(created_at)
    .execute(db)
    .await?
    .last_insert_rowid();

    Ok(id)
}

fn phone_proof_suffix(
    proof: &PhoneProofQuery,
) -> Result<String, (StatusCode, Json<ApiResponse<()>>)> {
    let digits = phone::normalize_digits(&proof.phone);
    if !phone::is_valid_digit_count(&digits) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Phone must contain 10 to 15 digits")),
        ));
    }
    Ok(phone::last_seven(&digits).to_string())
}

// ── Private helpers ──

/// Undo a half-created booking: mark it expired and free its slots.
async fn rollback_booking(db: &sqlx::SqlitePool, booking_id: i64) {
    sqlx::query("UPDATE bookings SET status = 'expired', payment_status = 'none' WHERE id = ?")
        .bind(booking_id)
        .execute(db)
        .await
        .ok();
    free_booking_slots(db, booking_id).await;
}

/// The overlapping slots form one free contiguous run covering
/// `[start_min, end_min)`. Slots are sorted by start.
fn window_is_covered(slots: &[AvailableSlot], start_min: i64, end_min: i64) -> bool {
    if slots.is_empty() || slots.iter().any(|s| s.is_booked) {
        return false;
    }
    if slots[0].start_min > start_min || slots[slots.len() - 1].end_min < end_min {
        return false;
    }
    slots.windows(2).all(|w| w[0].end_min == w[1].start_min)
}

/// N consecutive free slots exist somewhere in the (sorted) list.
fn has_consecutive_free_slots(slots: &[AvailableSlot], needed: usize) -> bool {
    for i in 0..slots.len() {
        if slots[i].is_booked || i + needed > slots.len() {
            continue;
        }
        let mut ok = true;
        for j in 0..needed {
            let idx = i + j;
            if slots[idx].is_booked {
                ok = false;
                break;
            }
            if j > 0 && slots[i + j - 1].end_min != slots[idx].start_min {
                ok = false;
                break;
            }
        }
        if ok {
            return true;
        }
    }
    false
}

/// All bookable blocks of `slots_needed` consecutive free slots.
///
/// In tight mode (a day with bookings within `TIGHT_MODE_DAYS`), only
/// blocks touching an existing booking are offered so free time stays in
/// large contiguous runs.
fn find_bookable_blocks(
    slots: &[AvailableSlot],
    slots_needed: usize,
    is_tight: bool,
) -> Vec<TimeBlock> {
    let mut blocks = Vec::new();
    let has_bookings = slots.iter().any(|s| s.is_booked);

    for i in 0..slots.len() {
        if slots[i].is_booked || i + slots_needed > slots.len() {
            continue;
        }

        let mut valid = true;
        for j in 0..slots_needed {
            let idx = i + j;
            if slots[idx].is_booked {
                valid = false;
                break;
            }
            if j > 0 && slots[i + j - 1].end_min != slots[idx].start_min {
                valid = false;
                break;
            }
        }
        if !valid {
            continue;
        }

        let block_start = slots[i].start_min;
        let block_end = slots[i + slots_needed - 1].end_min;

        if is_tight && has_bookings && !is_adjacent_to_booked(block_start, block_end, slots) {
            continue;
        }

        blocks.push(TimeBlock {
            start_min: block_start,
            end_min: block_end,
        });
    }

    blocks
}

fn is_adjacent_to_booked(block_start: i64, block_end: i64, all_slots: &[AvailableSlot]) -> bool {
    all_slots.iter().any(|slot| {
        slot.is_booked && (block_start == slot.end_min || block_end == slot.start_min)
    })
}

// ── Tests ──
