use serde::{Deserialize, Serialize};

use crate::validation::FieldErrors;

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub duration_min: i64,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AvailableSlot {
    pub id: i64,
    pub date: String,
    pub start_min: i64,
    pub end_min: i64,
    pub is_booked: bool,
    pub booking_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub phone_digits: String,
    pub phone_suffix: String,
    pub email: String,
    pub birth_date: String,
    pub referral: String,
    pub phone_verified: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub service_id: i64,
    pub client_id: i64,
    pub date: String,
    pub start_min: i64,
    pub end_min: i64,
    pub status: String,
    pub notes: String,
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
    pub deposit_cents: i64,
    pub reminder_sent: bool,
    pub created_at: String,
    pub cancelled_at: Option<String>,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailableTimesQuery {
    pub date: String,
    pub service: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailableDatesQuery {
    pub service: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub year: i32,
    pub month: u32,
    pub service: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TimeBlock {
    pub start_min: i64,
    pub end_min: i64,
}

#[derive(Debug, Serialize)]
pub struct AvailableTimesResponse {
    pub mode: String,
    pub times: Vec<TimeBlock>,
}

#[derive(Debug, Serialize)]
pub struct CalendarDay {
    pub date: String,
    pub total: i64,
    pub free: i64,
    pub bookable: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub duration_min: i64,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub duration_min: Option<i64>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSlotsRequest {
    pub date: String,
    pub slots: Vec<SlotWindow>,
}

#[derive(Debug, Deserialize)]
pub struct SlotWindow {
    pub start_min: i64,
    pub end_min: i64,
}

#[derive(Debug, Deserialize)]
pub struct OpenDayRequest {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Capability check for unauthenticated status/cancel calls: the caller
/// must present the phone the booking was made with.
#[derive(Debug, Deserialize)]
pub struct PhoneProofQuery {
    pub phone: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingDetail {
    pub id: i64,
    pub service_name: String,
    pub service_slug: String,
    pub price_cents: i64,
    pub deposit_cents: i64,
    pub date: String,
    pub start_min: i64,
    pub end_min: i64,
    pub client_name: String,
    pub client_phone: String,
    pub status: String,
    pub payment_status: String,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub booking: BookingDetail,
    /// Payment provider client secret for completing the deposit payment.
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingStatusResponse {
    pub status: String,
    pub payment_status: String,
}

#[derive(Debug, Serialize)]
pub struct CancelBookingResponse {
    pub message: String,
    pub refund_info: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClientSummary {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub referral: String,
    pub phone_verified: bool,
    pub visit_count: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ClientDetail {
    pub client: Client,
    pub bookings: Vec<BookingDetail>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyConfirm {
    pub phone: String,
    pub code: String,
}

// ── Response envelope ──

/// Error code for a payload that failed field validation (400).
pub const ERR_INVALID_FIELDS: &str = "invalid_fields";
/// Error code for a slot that is gone: already elapsed today or taken
/// between check and write (409). Clients should refresh availability,
/// not edit fields.
pub const ERR_STALE_SLOT: &str = "stale_slot";

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            field_errors: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            field_errors: None,
        }
    }

    /// MalformedField: every offending field with its message.
    pub fn invalid_fields(errors: FieldErrors) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ERR_INVALID_FIELDS.into()),
            field_errors: Some(errors),
        }
    }

    /// StaleSlot: a time-of-check race, not a field problem.
    pub fn stale_slot() -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ERR_STALE_SLOT.into()),
            field_errors: None,
        }
    }
}

// ── Telegram admin auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}
