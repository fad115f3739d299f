//! Admin dashboard authentication.
//!
//! The dashboard runs as a Telegram Mini App, so admin requests carry the
//! Mini App `initData` blob in the Authorization header (`tma <initData>`).
//! We verify the HMAC per the Bot API contract and then check the user id
//! against the configured owner id. Clients of the public booking form are
//! not Telegram users and never pass through here.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::models::TelegramUser;

type HmacSha256 = Hmac<Sha256>;

/// initData older than this is rejected (replay protection).
const MAX_AUTH_AGE_SECS: i64 = 86400;

/// Validate `initData` and return the authenticated Telegram user.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    if let Some(auth_date) = params.get("auth_date").and_then(|s| s.parse::<i64>().ok()) {
        let age = chrono::Utc::now().timestamp() - auth_date;
        if age > MAX_AUTH_AGE_SECS {
            tracing::warn!("admin initData expired ({age}s old)");
            return None;
        }
    }

    // data-check-string: sorted key=value pairs, hash excluded
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    // secret_key = HMAC-SHA256("WebAppData", bot_token)
    let mut secret_mac =
        HmacSha256::new_from_slice(b"WebAppData").expect("HMAC can take key of any size");
    secret_mac.update(bot_token.as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac =
        HmacSha256::new_from_slice(&secret_key).expect("HMAC can take key of any size");
    mac.update(data_check_string.as_bytes());
    let computed_hash = hex::encode(mac.finalize().into_bytes());

    if computed_hash != *hash {
        tracing::warn!("admin initData hash mismatch");
        return None;
    }

    serde_json::from_str::<TelegramUser>(params.get("user")?).ok()
}

/// Extract and verify the admin from an `Authorization: tma <initData>` header.
/// Returns `None` for a missing/invalid header or a non-owner user.
pub fn authenticate_admin(
    auth_header: Option<&str>,
    bot_token: &str,
    admin_tg_id: i64,
) -> Option<TelegramUser> {
    let init_data = auth_header?.strip_prefix("tma ")?;
    let user = validate_init_data(init_data, bot_token)?;
    if user.id != admin_tg_id {
        tracing::warn!("non-admin user {} hit an admin endpoint", user.id);
        return None;
    }
    Some(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a correctly signed initData string the way Telegram does.
    fn signed_init_data(bot_token: &str, user_json: &str, auth_date: i64) -> String {
        let pairs = vec![
            ("auth_date".to_string(), auth_date.to_string()),
            ("user".to_string(), user_json.to_string()),
        ];
        let sorted: BTreeMap<_, _> = pairs.iter().cloned().collect();
        let data_check_string: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        secret_mac.update(bot_token.as_bytes());
        let secret_key = secret_mac.finalize().into_bytes();
        let mut mac = HmacSha256::new_from_slice(&secret_key).unwrap();
        mac.update(data_check_string.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        let mut encoded = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &sorted {
            encoded.append_pair(k, v);
        }
        encoded.append_pair("hash", &hash);
        encoded.finish()
    }

    const USER_JSON: &str = r#"{"id":7,"first_name":"Mia"}"#;

    #[test]
    fn test_valid_init_data_accepted() {
        let init = signed_init_data("42:token", USER_JSON, chrono::Utc::now().timestamp());
        let user = validate_init_data(&init, "42:token").unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.first_name, "Mia");
    }

    #[test]
    fn test_wrong_token_rejected() {
        let init = signed_init_data("42:token", USER_JSON, chrono::Utc::now().timestamp());
        assert!(validate_init_data(&init, "43:other").is_none());
    }

    #[test]
    fn test_expired_auth_date_rejected() {
        let stale = chrono::Utc::now().timestamp() - MAX_AUTH_AGE_SECS - 10;
        let init = signed_init_data("42:token", USER_JSON, stale);
        assert!(validate_init_data(&init, "42:token").is_none());
    }

    #[test]
    fn test_admin_gate_checks_owner_id() {
        let init = signed_init_data("42:token", USER_JSON, chrono::Utc::now().timestamp());
        let header = format!("tma {init}");
        assert!(authenticate_admin(Some(&header), "42:token", 7).is_some());
        assert!(authenticate_admin(Some(&header), "42:token", 8).is_none());
    }

    #[test]
    fn test_admin_gate_missing_or_malformed_header() {
        assert!(authenticate_admin(None, "42:token", 7).is_none());
        assert!(authenticate_admin(Some("Bearer xyz"), "42:token", 7).is_none());
    }
}
