//! Phone verification: a 6-digit code per phone, hashed at rest, 10 minutes
//! to confirm, 5 attempts. Delivery goes through the configured SMS gateway;
//! without one (development) the code is logged instead.

use axum::{extract::State, http::StatusCode, Json};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::{
    models::{ApiResponse, VerifyConfirm, VerifyRequest},
    phone, AppState,
};

const CODE_TTL_MINUTES: i64 = 10;
const MAX_ATTEMPTS: i64 = 5;

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// POST /api/verify/request — issue a fresh code for a phone number.
pub async fn request_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<&'static str>>, (StatusCode, Json<ApiResponse<()>>)> {
    let digits = phone::normalize_digits(&body.phone);
    if !phone::is_valid_digit_count(&digits) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Phone must contain 10 to 15 digits")),
        ));
    }

    let code = generate_code();
    let expires_at = (chrono::Utc::now() + chrono::TimeDelta::minutes(CODE_TTL_MINUTES))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let created_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

    // A new request supersedes any outstanding code for the same phone.
    sqlx::query("DELETE FROM verification_codes WHERE phone_digits = ?")
        .bind(&digits)
        .execute(&state.db)
        .await
        .ok();

    sqlx::query(
        "INSERT INTO verification_codes (phone_digits, code_hash, expires_at, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&digits)
    .bind(hash_code(&code))
    .bind(&expires_at)
    .bind(&created_at)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("verification insert failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        )
    })?;

    deliver_code(&state, &body.phone, &code).await;

    Ok(Json(ApiResponse::success("Code sent")))
}

/// POST /api/verify/confirm — check a code and mark the phone verified.
pub async fn confirm_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyConfirm>,
) -> Result<Json<ApiResponse<&'static str>>, (StatusCode, Json<ApiResponse<()>>)> {
    let digits = phone::normalize_digits(&body.phone);

    let row = sqlx::query_as::<_, (i64, String, i64)>(
        "SELECT id, code_hash, attempts FROM verification_codes
         WHERE phone_digits = ? AND verified = 0 AND expires_at > datetime('now')
         ORDER BY id DESC LIMIT 1",
    )
    .bind(&digits)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("verification lookup failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("DB error")),
        )
    })?;

    let (id, code_hash, attempts) = row.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No active code for this phone")),
        )
    })?;

    if attempts >= MAX_ATTEMPTS {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::error("Too many attempts, request a new code")),
        ));
    }

    if hash_code(body.code.trim()) != code_hash {
        sqlx::query("UPDATE verification_codes SET attempts = attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Wrong code")),
        ));
    }

    sqlx::query("UPDATE verification_codes SET verified = 1 WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .ok();

    sqlx::query("UPDATE clients SET phone_verified = 1 WHERE phone_digits = ?")
        .bind(&digits)
        .execute(&state.db)
        .await
        .ok();

    Ok(Json(ApiResponse::success("Phone verified")))
}

async fn deliver_code(state: &AppState, raw_phone: &str, code: &str) {
    let Some(gateway) = state.sms_gateway_url.as_deref() else {
        tracing::info!("SMS gateway not configured; code for {}: {}", raw_phone, code);
        return;
    };

    let client = reqwest::Client::new();
    let result = client
        .post(gateway)
        .json(&serde_json::json!({
            "to": raw_phone,
            "message": format!("Your Velvet Studio verification code: {code}"),
        }))
        .send()
        .await;

    if let Err(e) = result {
        tracing::error!("SMS delivery failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let h = hash_code("123456");
        assert_eq!(h, hash_code("123456"));
        assert_eq!(h.len(), 64);
        assert_ne!(h, hash_code("654321"));
    }
}
