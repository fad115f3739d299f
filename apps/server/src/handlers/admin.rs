//! Owner dashboard endpoints. Everything here sits behind the Telegram
//! Mini App auth middleware; only the configured owner id gets through.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    auth,
    models::*,
    slots,
    validation::{self, BookingPayload},
    AppState,
};

use super::client::{
    booking_detail_select, create_booking_inner, free_booking_slots, process_refund_if_needed,
};

/// Hour grid used by "open day": 10:00 through 18:00.
const DAY_OPEN_MIN: i64 = 600;
const DAY_CLOSE_MIN: i64 = 1080;
const SLOT_UNIT_MIN: i64 = 60;

// ── Auth middleware ──

pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    match auth::authenticate_admin(header, &state.bot_token, state.admin_tg_id) {
        Some(_) => Ok(next.run(req).await),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Unauthorized")),
        )),
    }
}

// ── Services ──

/// GET /api/admin/services — full catalog, inactive included.
pub async fn list_all_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, StatusCode> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, slug, name, description, price_cents, duration_min, is_active, sort_order
         FROM services ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, (StatusCode, Json<ApiResponse<()>>)> {
    if body.slug.trim().is_empty() || body.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Slug and name are required")),
        ));
    }
    if !crate::money::is_valid_price(body.price_cents) || body.duration_min <= 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Price and duration must be positive")),
        ));
    }

    let id = sqlx::query(
        "INSERT INTO services (slug, name, description, price_cents, duration_min, is_active, sort_order)
         VALUES (?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(body.slug.trim())
    .bind(body.name.trim())
    .bind(body.description.as_deref().unwrap_or(""))
    .bind(body.price_cents)
    .bind(body.duration_min)
    .bind(body.sort_order.unwrap_or(0))
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("service INSERT failed: {}", e);
        (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("A service with this slug already exists")),
        )
    })?
    .last_insert_rowid();

    let service = fetch_service_by_id(&state, id).await.map_err(internal)?;
    Ok(Json(ApiResponse::success(service)))
}

/// PATCH /api/admin/services/:id — partial update.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, (StatusCode, Json<ApiResponse<()>>)> {
    let existing = sqlx::query_as::<_, Service>(
        "SELECT id, slug, name, description, price_cents, duration_min, is_active, sort_order
         FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(internal)?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Service not found")),
        )
    })?;

    let price = body.price_cents.unwrap_or(existing.price_cents);
    let duration = body.duration_min.unwrap_or(existing.duration_min);
    if !crate::money::is_valid_price(price) || duration <= 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Price and duration must be positive")),
        ));
    }

    sqlx::query(
        "UPDATE services SET name = ?, description = ?, price_cents = ?, duration_min = ?,
         is_active = ?, sort_order = ? WHERE id = ?",
    )
    .bind(body.name.unwrap_or(existing.name))
    .bind(body.description.unwrap_or(existing.description))
    .bind(price)
    .bind(duration)
    .bind(body.is_active.unwrap_or(existing.is_active))
    .bind(body.sort_order.unwrap_or(existing.sort_order))
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(internal)?;

    let service = fetch_service_by_id(&state, id).await.map_err(internal)?;
    Ok(Json(ApiResponse::success(service)))
}

// ── Slots ──

/// GET /api/admin/slots?date=YYYY-MM-DD
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<ApiResponse<Vec<AvailableSlot>>>, StatusCode> {
    let slots = sqlx::query_as::<_, AvailableSlot>(
        "SELECT id, date, start_min, end_min, is_booked, booking_id
         FROM available_slots WHERE date = ? ORDER BY start_min ASC",
    )
    .bind(&query.date)
    .fetch_all(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(ApiResponse::success(slots)))
}

/// POST /api/admin/slots — add explicit windows to a day.
///
/// Windows that fail the 0..1440 bounds check or overlap an existing slot
/// are reported back as skipped, the rest are inserted.
pub async fn create_slots(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSlotsRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, (StatusCode, Json<ApiResponse<()>>)> {
    if body.date.parse::<chrono::NaiveDate>().is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Date must be YYYY-MM-DD")),
        ));
    }

    let existing = sqlx::query_as::<_, AvailableSlot>(
        "SELECT id, date, start_min, end_min, is_booked, booking_id
         FROM available_slots WHERE date = ?",
    )
    .bind(&body.date)
    .fetch_all(&state.db)
    .await
    .map_err(internal)?;

    let mut created = 0;
    let mut skipped = Vec::new();

    for window in &body.slots {
        if !slots::is_valid_window(window.start_min, window.end_min) {
            skipped.push(window.start_min);
            continue;
        }
        let overlaps = existing
            .iter()
            .any(|s| window.start_min < s.end_min && s.start_min < window.end_min);
        if overlaps {
            skipped.push(window.start_min);
            continue;
        }

        sqlx::query(
            "INSERT INTO available_slots (date, start_min, end_min, is_booked) VALUES (?, ?, ?, 0)",
        )
        .bind(&body.date)
        .bind(window.start_min)
        .bind(window.end_min)
        .execute(&state.db)
        .await
        .map_err(internal)?;
        created += 1;
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "created": created,
        "skipped": skipped,
    }))))
}

/// POST /api/admin/slots/open-day — fill a day with the standard hour grid.
pub async fn open_day(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OpenDayRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, (StatusCode, Json<ApiResponse<()>>)> {
    let windows: Vec<SlotWindow> = (DAY_OPEN_MIN..DAY_CLOSE_MIN)
        .step_by(SLOT_UNIT_MIN as usize)
        .map(|start| SlotWindow {
            start_min: start,
            end_min: start + SLOT_UNIT_MIN,
        })
        .collect();

    create_slots(
        State(state),
        Json(CreateSlotsRequest {
            date: body.date,
            slots: windows,
        }),
    )
    .await
}

/// DELETE /api/admin/slots/:id — only free slots can be removed.
pub async fn delete_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, (StatusCode, Json<ApiResponse<()>>)> {
    let result = sqlx::query("DELETE FROM available_slots WHERE id = ? AND is_booked = 0")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(internal)?;

    if result.rows_affected() == 0 {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Slot is booked or does not exist")),
        ));
    }

    Ok(Json(ApiResponse::success("Slot removed")))
}

// ── Bookings ──

/// GET /api/admin/bookings?date= | ?from=&to= — defaults to today onward.
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, StatusCode> {
    let base = booking_detail_select();

    let bookings = if let Some(date) = &query.date {
        let sql = format!(
            "{base} WHERE b.date = ? AND b.status != 'expired'
             ORDER BY b.start_min ASC"
        );
        sqlx::query_as::<_, BookingDetail>(&sql)
            .bind(date)
            .fetch_all(&state.db)
            .await
    } else {
        let from = query
            .from
            .clone()
            .unwrap_or_else(|| slots::local_today(Utc::now(), state.tz).to_string());
        let to = query.to.clone().unwrap_or_else(|| "9999-12-31".into());
        let sql = format!(
            "{base} WHERE b.date >= ? AND b.date <= ? AND b.status != 'expired'
             ORDER BY b.date ASC, b.start_min ASC"
        );
        sqlx::query_as::<_, BookingDetail>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&state.db)
            .await
    }
    .map_err(|e| {
        tracing::error!("list_bookings: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/admin/bookings — walk-in: confirmed immediately, no deposit.
pub async fn create_walk_in(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BookingPayload>,
) -> Result<Json<ApiResponse<CreateBookingResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let now = Utc::now();

    let valid = validation::validate_walk_in_booking(&body, now, state.tz).map_err(|errors| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::invalid_fields(errors)),
        )
    })?;

    create_booking_inner(&state, valid, now, true).await
}

/// DELETE /api/admin/bookings/:id — owner cancellation, always refunds.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CancelBookingResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let booking = sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE id = ? AND status IN ('confirmed', 'pending_payment')",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(internal)?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Booking not found")),
        )
    })?;

    let refund_info = process_refund_if_needed(&state, &booking, true).await;

    sqlx::query(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = datetime('now') WHERE id = ?",
    )
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(internal)?;

    free_booking_slots(&state.db, id).await;

    Ok(Json(ApiResponse::success(CancelBookingResponse {
        message: "Booking cancelled".into(),
        refund_info,
    })))
}

// ── Clients ──

/// GET /api/admin/clients — visit counts included.
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ClientSummary>>>, StatusCode> {
    let clients = sqlx::query_as::<_, ClientSummary>(
        "SELECT c.id, c.name, c.phone, c.email, c.referral, c.phone_verified,
                COUNT(b.id) as visit_count, c.created_at
         FROM clients c
         LEFT JOIN bookings b ON b.client_id = c.id AND b.status = 'confirmed'
         GROUP BY c.id
         ORDER BY c.created_at DESC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(ApiResponse::success(clients)))
}

/// GET /api/admin/clients/:id — profile plus booking history.
pub async fn client_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ClientDetail>>, (StatusCode, Json<ApiResponse<()>>)> {
    let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Client not found")),
            )
        })?;

    let sql = format!(
        "{} WHERE b.client_id = ? ORDER BY b.date DESC, b.start_min DESC",
        booking_detail_select()
    );
    let bookings = sqlx::query_as::<_, BookingDetail>(&sql)
        .bind(id)
        .fetch_all(&state.db)
        .await
        .map_err(internal)?;

    Ok(Json(ApiResponse::success(ClientDetail { client, bookings })))
}

// ── Helpers ──

async fn fetch_service_by_id(state: &AppState, id: i64) -> Result<Service, sqlx::Error> {
    sqlx::query_as::<_, Service>(
        "SELECT id, slug, name, description, price_cents, duration_min, is_active, sort_order
         FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, Json<ApiResponse<()>>) {
    tracing::error!("admin handler error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("DB error")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_day_grid_shape() {
        let windows: Vec<(i64, i64)> = (DAY_OPEN_MIN..DAY_CLOSE_MIN)
            .step_by(SLOT_UNIT_MIN as usize)
            .map(|s| (s, s + SLOT_UNIT_MIN))
            .collect();
        assert_eq!(windows.len(), 8);
        assert_eq!(windows[0], (600, 660)); // 10:00
        assert_eq!(windows[7], (1020, 1080)); // 17:00–18:00
        for w in &windows {
            assert!(slots::is_valid_window(w.0, w.1));
        }
    }
}
