//! Deposit payments through a Stripe-style payment-intent API.
//!
//! The server creates an intent for the deposit when a booking is made and
//! hands the client secret back to the frontend; the provider reports the
//! outcome to the webhook, which is authenticated with the `t=...,v1=...`
//! HMAC-SHA256 signature scheme.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{models::*, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Webhook timestamps older than this are rejected (replay protection).
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Unpaid bookings are released after this long.
const PENDING_PAYMENT_TTL_MINUTES: i64 = 15;

const API_BASE: &str = "https://api.stripe.com/v1";

// ── Provider calls ──

/// Create a payment intent for a booking deposit.
/// Returns `(intent_id, client_secret)`.
pub async fn create_payment_intent(
    secret_key: &str,
    booking_id: i64,
    amount_cents: i64,
    description: &str,
) -> anyhow::Result<(String, String)> {
    let client = reqwest::Client::new();

    let idempotency_key = format!(
        "booking-{}-{}",
        booking_id,
        chrono::Utc::now().timestamp_millis()
    );

    let params = [
        ("amount", amount_cents.to_string()),
        ("currency", "eur".into()),
        ("description", description.into()),
        ("metadata[booking_id]", booking_id.to_string()),
        ("automatic_payment_methods[enabled]", "true".into()),
    ];

    let resp = client
        .post(format!("{API_BASE}/payment_intents"))
        .bearer_auth(secret_key)
        .header("Idempotency-Key", &idempotency_key)
        .form(&params)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::error!("payment intent creation failed: {} - {}", status, text);
        anyhow::bail!("payment provider error: {}", status);
    }

    let json: serde_json::Value = resp.json().await?;
    let intent_id = json["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing intent id"))?
        .to_string();
    let client_secret = json["client_secret"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing client secret"))?
        .to_string();

    tracing::info!("payment intent {} created for booking {}", intent_id, booking_id);
    Ok((intent_id, client_secret))
}

/// Refund a deposit in full.
pub async fn create_refund(secret_key: &str, intent_id: &str, amount_cents: i64) -> anyhow::Result<()> {
    let client = reqwest::Client::new();

    let params = [
        ("payment_intent", intent_id.to_string()),
        ("amount", amount_cents.to_string()),
    ];

    let resp = client
        .post(format!("{API_BASE}/refunds"))
        .bearer_auth(secret_key)
        .form(&params)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::error!("refund failed: {} - {}", status, text);
        anyhow::bail!("refund error: {}", status);
    }

    tracing::info!("refund created for intent {}", intent_id);
    Ok(())
}

// ── Webhook signature ──

/// Verify a `t=<unix>,v1=<hex>` signature header against the raw payload.
///
/// The signed message is `"{t}.{payload}"`; any of the `v1` entries may
/// match (the provider sends several during secret rotation). Timestamps
/// outside the tolerance window fail regardless of the MAC.
pub fn verify_webhook_signature(
    secret: &str,
    signature_header: &str,
    payload: &str,
    now_ts: i64,
    tolerance_secs: i64,
) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let Some(t) = timestamp else { return false };
    if (now_ts - t).abs() > tolerance_secs {
        return false;
    }
    if candidates.is_empty() {
        return false;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(format!("{t}.{payload}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    candidates.iter().any(|c| *c == expected)
}

// ── Webhook endpoint ──

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: IntentObject,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// POST /api/payments/webhook — provider notifications for deposit intents.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_webhook_signature(
        &state.stripe_webhook_secret,
        signature,
        &body,
        chrono::Utc::now().timestamp(),
        SIGNATURE_TOLERANCE_SECS,
    ) {
        tracing::warn!("webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event: WebhookEvent = match serde_json::from_str(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("unparseable webhook payload: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(
        "payment webhook: type={}, intent={}",
        event.event_type,
        event.data.object.id
    );

    let booking_id: i64 = match event
        .data
        .object
        .metadata
        .get("booking_id")
        .and_then(|s| s.parse().ok())
    {
        Some(id) => id,
        None => {
            tracing::warn!("webhook missing booking_id metadata");
            // 200 so the provider stops retrying an event we cannot use
            return StatusCode::OK;
        }
    };

    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let result = sqlx::query(
                "UPDATE bookings SET status = 'confirmed', payment_status = 'paid'
                 WHERE id = ? AND status = 'pending_payment'",
            )
            .bind(booking_id)
            .execute(&state.db)
            .await;

            if let Err(e) = result {
                tracing::error!("failed to confirm booking {}: {}", booking_id, e);
                return StatusCode::INTERNAL_SERVER_ERROR;
            }

            notify_owner_of_confirmation(&state, booking_id).await;
        }

        "payment_intent.canceled" | "payment_intent.payment_failed" => {
            sqlx::query(
                "UPDATE bookings SET status = 'expired', payment_status = 'none'
                 WHERE id = ? AND status = 'pending_payment'",
            )
            .bind(booking_id)
            .execute(&state.db)
            .await
            .ok();

            super::client::free_booking_slots(&state.db, booking_id).await;
        }

        _ => {
            tracing::info!("ignoring webhook event: {}", event.event_type);
        }
    }

    StatusCode::OK
}

async fn notify_owner_of_confirmation(state: &AppState, booking_id: i64) {
    let query = format!(
        "{} WHERE b.id = ?",
        super::client::booking_detail_select()
    );
    let detail = sqlx::query_as::<_, BookingDetail>(&query)
        .bind(booking_id)
        .fetch_optional(&state.db)
        .await
        .ok()
        .flatten();

    if let Some(b) = detail {
        let message = format!(
            "\u{2705} New booking paid\n\n\
             {} — {}\n\
             {} {}–{}\n\
             {} ({})\n\
             Deposit {}",
            b.service_name,
            crate::money::format_eur(b.price_cents),
            b.date,
            crate::slots::minutes_to_hhmm(b.start_min),
            crate::slots::minutes_to_hhmm(b.end_min),
            b.client_name,
            b.client_phone,
            crate::money::format_eur(b.deposit_cents),
        );
        super::client::notify_owner(&state.bot_token, state.admin_tg_id, &message).await;
    }
}

// ── Expiry sweep ──

/// Release bookings whose deposit was never paid. Runs from a background
/// task every few minutes.
pub async fn expire_pending_payments(db: &sqlx::SqlitePool) {
    let expired_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM bookings
         WHERE status = 'pending_payment'
         AND datetime(created_at, ?) < datetime('now')",
    )
    .bind(format!("+{PENDING_PAYMENT_TTL_MINUTES} minutes"))
    .fetch_all(db)
    .await
    .unwrap_or_default();

    for booking_id in expired_ids {
        tracing::info!("expiring unpaid booking {}", booking_id);

        sqlx::query(
            "UPDATE bookings SET status = 'expired', payment_status = 'none'
             WHERE id = ? AND status = 'pending_payment'",
        )
        .bind(booking_id)
        .execute(db)
        .await
        .ok();

        super::client::free_booking_slots(db, booking_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const PAYLOAD: &str = r#"{"type":"payment_intent.succeeded"}"#;

    fn sign(secret: &str, t: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{t}.{payload}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_accepted() {
        let t = 1_750_000_000;
        let header = format!("t={t},v1={}", sign(SECRET, t, PAYLOAD));
        assert!(verify_webhook_signature(SECRET, &header, PAYLOAD, t + 10, 300));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let t = 1_750_000_000;
        let header = format!("t={t},v1={}", sign("whsec_other", t, PAYLOAD));
        assert!(!verify_webhook_signature(SECRET, &header, PAYLOAD, t + 10, 300));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let t = 1_750_000_000;
        let header = format!("t={t},v1={}", sign(SECRET, t, PAYLOAD));
        assert!(!verify_webhook_signature(SECRET, &header, "{}", t + 10, 300));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let t = 1_750_000_000;
        let header = format!("t={t},v1={}", sign(SECRET, t, PAYLOAD));
        assert!(!verify_webhook_signature(SECRET, &header, PAYLOAD, t + 301, 300));
    }

    #[test]
    fn test_rotation_any_v1_matches() {
        let t = 1_750_000_000;
        let good = sign(SECRET, t, PAYLOAD);
        let header = format!("t={t},v1=deadbeef,v1={good}");
        assert!(verify_webhook_signature(SECRET, &header, PAYLOAD, t, 300));
    }

    #[test]
    fn test_header_without_timestamp_rejected() {
        let t = 1_750_000_000;
        let header = format!("v1={}", sign(SECRET, t, PAYLOAD));
        assert!(!verify_webhook_signature(SECRET, &header, PAYLOAD, t, 300));
    }

    #[test]
    fn test_header_without_candidates_rejected() {
        assert!(!verify_webhook_signature(SECRET, "t=1750000000", PAYLOAD, 1_750_000_000, 300));
    }
}
