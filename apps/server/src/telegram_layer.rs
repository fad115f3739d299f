//! Tracing layer that forwards ERROR events to the salon owner's Telegram
//! chat. Throttled (one message per 10 s) and deduplicated (identical
//! messages suppressed for 60 s) so a failing dependency cannot flood the
//! owner. Sends are spawned onto the runtime and never block the caller.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Decides whether an alert may go out right now. Separate from the layer
/// so the policy is testable without a subscriber.
struct Throttle {
    last_sent: Instant,
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            // allow the first message immediately
            last_sent: Instant::now() - MIN_INTERVAL,
            recent: Vec::new(),
        }
    }

    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, ts)| now.duration_since(*ts) < DEDUP_WINDOW);

        let duplicate = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = now.duration_since(self.last_sent) < MIN_INTERVAL;
        if duplicate || too_soon {
            return false;
        }

        self.last_sent = now;
        self.recent.push((hash, now));
        true
    }
}

pub struct TelegramLayer {
    bot_token: String,
    chat_id: i64,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl TelegramLayer {
    pub fn new(bot_token: String, chat_id: i64) -> Self {
        Self {
            bot_token,
            chat_id,
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };

        let should_send = self
            .throttle
            .lock()
            .map(|mut t| t.admit(hash, Instant::now()))
            .unwrap_or(false);
        if !should_send {
            return;
        }

        let target = event.metadata().target();
        let location = match (event.metadata().file(), event.metadata().line()) {
            (Some(f), Some(l)) => format!("{f}:{l}"),
            _ => "?".into(),
        };
        let stamp = chrono::Utc::now().format("%H:%M:%S UTC");
        let text = format!(
            "\u{26a0} <b>velvet-server error</b>\n\
             <code>{message}</code>\n\
             {target} ({location}) · {stamp}"
        );

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let client = self.http.clone();
        let chat_id = self.chat_id;
        tokio::spawn(async move {
            let _ = client
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML"
                }))
                .send()
                .await;
        });
    }
}

/// Collects the `message` field plus any structured fields from an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        if field.name() == "message" {
            self.message = val;
        } else {
            self.fields.push((field.name().to_string(), val));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_admitted() {
        let mut t = Throttle::new();
        assert!(t.admit(1, Instant::now()));
    }

    #[test]
    fn test_second_alert_throttled() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        // different message, inside the minimum interval
        assert!(!t.admit(2, now));
    }

    #[test]
    fn test_duplicate_suppressed_past_interval() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        t.last_sent = now - MIN_INTERVAL;
        assert!(!t.admit(1, now));
    }

    #[test]
    fn test_distinct_alert_admitted_past_interval() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        t.last_sent = now - MIN_INTERVAL;
        assert!(t.admit(2, now));
    }

    #[test]
    fn test_dedup_entry_expires() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        t.last_sent = now - MIN_INTERVAL;
        t.recent.clear();
        t.recent.push((1, now - DEDUP_WINDOW - Duration::from_secs(1)));
        assert!(t.admit(1, now));
    }

    #[test]
    fn test_visitor_message_only() {
        let mut v = MessageVisitor::default();
        v.message = "payment intent failed".into();
        assert_eq!(v.message(), "payment intent failed");
    }

    #[test]
    fn test_visitor_with_fields() {
        let mut v = MessageVisitor::default();
        v.message = "db error".into();
        v.fields.push(("booking_id".into(), "12".into()));
        assert_eq!(v.message(), "db error (booking_id=12)");
    }

    #[test]
    fn test_visitor_fields_only() {
        let v = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(v.message(), "error=timeout");
    }
}
