mod auth;
mod db;
mod handlers;
mod models;
mod money;
mod phone;
mod rate_limit;
mod slots;
mod telegram_layer;
mod validation;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rate_limit::RateLimiter;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub bot_token: String,
    pub admin_tg_id: i64,
    pub started_at: Instant,
    /// Salon timezone; every wall-clock decision goes through this.
    pub tz: chrono_tz::Tz,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub sms_gateway_url: Option<String>,
    pub webapp_url: String,
}

/// Payment expiry check interval (seconds).
const PAYMENT_EXPIRY_INTERVAL_SECS: u64 = 300;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars (read before tracing so TelegramLayer can use them) ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:velvet.db?mode=rwc".into());
    let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");
    let admin_tg_id: i64 = std::env::var("ADMIN_TG_ID")
        .expect("ADMIN_TG_ID must be set")
        .parse()
        .expect("ADMIN_TG_ID must be a number");

    // A bad timezone name must stop startup, not silently fall back to UTC.
    let tz = slots::parse_salon_tz(
        &std::env::var("SALON_TZ").unwrap_or_else(|_| slots::DEFAULT_TZ.into()),
    )?;

    // ── Tracing: console + optional Telegram error notifications ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if !bot_token.is_empty() {
        let tg_layer = telegram_layer::TelegramLayer::new(bot_token.clone(), admin_tg_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Optional env vars ──
    let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY").unwrap_or_default();
    let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
    let sms_gateway_url = std::env::var("SMS_GATEWAY_URL").ok().filter(|v| !v.is_empty());
    let webapp_url =
        std::env::var("WEBAPP_URL").unwrap_or_else(|_| "https://example.com".into());

    if stripe_secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY not set — deposit payments will fail");
    }
    if sms_gateway_url.is_none() {
        tracing::warn!("SMS_GATEWAY_URL not set — verification codes go to the log");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        db: pool,
        bot_token,
        admin_tg_id,
        started_at: Instant::now(),
        tz,
        stripe_secret_key,
        stripe_webhook_secret,
        sms_gateway_url,
        webapp_url: webapp_url.clone(),
    });

    // ── Background task: expire unpaid bookings ──
    let expire_db = state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
            PAYMENT_EXPIRY_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            handlers::payment::expire_pending_payments(&expire_db).await;
        }
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier("public", 60, Duration::from_secs(60));
    rate_limiter.add_tier("booking", 5, Duration::from_secs(300));
    rate_limiter.add_tier("verify", 10, Duration::from_secs(600));
    rate_limiter.add_tier("client", 30, Duration::from_secs(60));
    rate_limiter.add_tier("admin", 120, Duration::from_secs(60));

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if webapp_url != "https://example.com" {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let tier = |name: &'static str| {
        from_fn_with_state((rate_limiter.clone(), name), rate_limit::rate_limit)
    };

    // ── Router (6 groups with per-group rate limits) ──

    // 1. No-limit: health checks + payment webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/payments/webhook",
            post(handlers::payment::payment_webhook),
        );

    // 2. Public: read-only availability endpoints (60 req/min)
    let public_routes = Router::new()
        .route("/api/services", get(handlers::client::list_services))
        .route(
            "/api/available-dates",
            get(handlers::client::available_dates),
        )
        .route(
            "/api/available-times",
            get(handlers::client::available_times),
        )
        .route("/api/calendar", get(handlers::client::calendar))
        .layer(tier("public"));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_booking))
        .layer(tier("booking"));

    // 4. Phone verification (10 req/10min)
    let verify_routes = Router::new()
        .route("/api/verify/request", post(handlers::verify::request_code))
        .route("/api/verify/confirm", post(handlers::verify::confirm_code))
        .layer(tier("verify"));

    // 5. Client booking management, phone-proofed (30 req/min)
    let client_routes = Router::new()
        .route(
            "/api/bookings/{id}/status",
            get(handlers::client::booking_status),
        )
        .route(
            "/api/bookings/{id}",
            delete(handlers::client::cancel_booking),
        )
        .layer(tier("client"));

    // 6. Admin: Mini App auth + 120 req/min
    let admin_routes = Router::new()
        .route(
            "/api/admin/services",
            get(handlers::admin::list_all_services).post(handlers::admin::create_service),
        )
        .route(
            "/api/admin/services/{id}",
            patch(handlers::admin::update_service),
        )
        .route(
            "/api/admin/slots",
            get(handlers::admin::list_slots).post(handlers::admin::create_slots),
        )
        .route(
            "/api/admin/slots/{id}",
            delete(handlers::admin::delete_slot),
        )
        .route(
            "/api/admin/slots/open-day",
            post(handlers::admin::open_day),
        )
        .route(
            "/api/admin/bookings",
            get(handlers::admin::list_bookings).post(handlers::admin::create_walk_in),
        )
        .route(
            "/api/admin/bookings/{id}",
            delete(handlers::admin::cancel_booking),
        )
        .route("/api/admin/clients", get(handlers::admin::list_clients))
        .route(
            "/api/admin/clients/{id}",
            get(handlers::admin::client_detail),
        )
        .layer(from_fn_with_state(
            state.clone(),
            handlers::admin::require_admin,
        ))
        .layer(tier("admin"));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(verify_routes)
        .merge(client_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Velvet Studio server starting on {} (tz {})", addr, tz.name());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
