use chrono::{Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::sqlite::SqlitePoolOptions;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    utils::command::BotCommands,
};
use tokio::time::{interval, Duration};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "Today's bookings")]
    Today,
    #[command(description = "Tomorrow's bookings")]
    Tomorrow,
    #[command(description = "This week's bookings")]
    Week,
    #[command(description = "Help")]
    Help,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BookingInfo {
    id: i64,
    service_name: String,
    price_cents: i64,
    date: String,
    start_min: i64,
    end_min: i64,
    client_name: String,
    client_phone: String,
}

const BOOKING_SELECT: &str =
    "SELECT b.id, s.name as service_name, s.price_cents, b.date, b.start_min, b.end_min,
            c.name as client_name, c.phone as client_phone
     FROM bookings b
     JOIN services s ON s.id = b.service_id
     JOIN clients c ON c.id = b.client_id";

#[derive(Clone)]
struct BotState {
    pool: sqlx::SqlitePool,
    admin_tg_id: i64,
    tz: Tz,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:velvet.db?mode=rwc".into());
    let admin_tg_id: i64 = std::env::var("ADMIN_TG_ID")
        .expect("ADMIN_TG_ID must be set")
        .parse()
        .expect("ADMIN_TG_ID must be a number");
    let tz: Tz = std::env::var("SALON_TZ")
        .unwrap_or_else(|_| "Europe/Berlin".into())
        .parse()
        .expect("SALON_TZ must be an IANA timezone name");

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect(&database_url)
        .await?;

    let bot = Bot::new(&bot_token);

    tracing::info!("Velvet Studio bot starting (tz {})", tz.name());

    // Owner reminder digest, checked hourly
    let reminder_bot = bot.clone();
    let reminder_pool = pool.clone();
    tokio::spawn(async move {
        send_reminders(reminder_bot, reminder_pool, admin_tg_id, tz).await;
    });

    let state = BotState {
        pool,
        admin_tg_id,
        tz,
    };

    let cmd_handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint({
            let state = state.clone();
            move |bot: Bot, msg: Message, cmd: Command| {
                let state = state.clone();
                async move {
                    handle_command(bot, msg, cmd, &state).await?;
                    Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                }
            }
        });

    let callback_handler = Update::filter_callback_query().endpoint({
        let state = state.clone();
        move |bot: Bot, q: CallbackQuery| {
            let state = state.clone();
            async move {
                handle_callback(bot, q, &state).await?;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        }
    });

    let handler = dptree::entry().branch(cmd_handler).branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

// ── Command handlers ──

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: &BotState,
) -> anyhow::Result<()> {
    // The bot is the owner's dashboard; clients book through the website.
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);
    if user_id != state.admin_tg_id {
        bot.send_message(msg.chat.id, "This bot is for the salon owner only.")
            .await?;
        return Ok(());
    }

    match cmd {
        Command::Today => {
            let today = local_today(state.tz);
            send_day_bookings(&bot, msg.chat.id, &state.pool, &today.to_string(), "Today")
                .await?;
        }

        Command::Tomorrow => {
            let tomorrow = local_today(state.tz) + chrono::TimeDelta::days(1);
            send_day_bookings(
                &bot,
                msg.chat.id,
                &state.pool,
                &tomorrow.to_string(),
                "Tomorrow",
            )
            .await?;
        }

        Command::Week => {
            let from = local_today(state.tz);
            let to = from + chrono::TimeDelta::days(6);

            let bookings = sqlx::query_as::<_, BookingInfo>(&format!(
                "{BOOKING_SELECT}
                 WHERE b.date >= ? AND b.date <= ? AND b.status = 'confirmed'
                 ORDER BY b.date ASC, b.start_min ASC"
            ))
            .bind(from.to_string())
            .bind(to.to_string())
            .fetch_all(&state.pool)
            .await?;

            if bookings.is_empty() {
                bot.send_message(msg.chat.id, "No bookings in the next 7 days.")
                    .await?;
                return Ok(());
            }

            let total: i64 = bookings.iter().map(|b| b.price_cents).sum();
            let mut text = format!("📋 <b>Week of {}</b>\n\n", format_date(&from.to_string()));
            let mut current_date = String::new();
            for b in &bookings {
                if b.date != current_date {
                    current_date = b.date.clone();
                    text.push_str(&format!("<b>{}</b>\n", format_date(&b.date)));
                }
                text.push_str(&format!(
                    "  {}–{} · {} · {}\n",
                    minutes_to_hhmm(b.start_min),
                    minutes_to_hhmm(b.end_min),
                    b.client_name,
                    b.service_name,
                ));
            }
            text.push_str(&format!(
                "\n📊 {} bookings · {}",
                bookings.len(),
                format_eur(total)
            ));

            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::Html)
                .await?;
        }

        Command::Help => {
            bot.send_message(
                msg.chat.id,
                "💈 <b>Velvet Studio — owner bot</b>\n\n\
                 /today — today's bookings\n\
                 /tomorrow — tomorrow's bookings\n\
                 /week — next 7 days\n\
                 /help — this message",
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
    }

    Ok(())
}

// ── Callback query handler (inline cancel buttons) ──

async fn handle_callback(bot: Bot, q: CallbackQuery, state: &BotState) -> anyhow::Result<()> {
    let data = q.data.as_deref().unwrap_or("");
    let chat_id = q.message.as_ref().map(|m| m.chat().id);
    let user_id = q.from.id.0 as i64;

    if let Some(booking_id_str) = data.strip_prefix("cancel:") {
        if user_id != state.admin_tg_id {
            bot.answer_callback_query(&q.id).text("⛔").await?;
            return Ok(());
        }

        let booking_id: i64 = booking_id_str.parse().unwrap_or(0);

        let booking = sqlx::query_as::<_, BookingInfo>(&format!(
            "{BOOKING_SELECT} WHERE b.id = ? AND b.status = 'confirmed'"
        ))
        .bind(booking_id)
        .fetch_optional(&state.pool)
        .await?;

        if let Some(b) = booking {
            sqlx::query(
                "UPDATE bookings SET status = 'cancelled', cancelled_at = datetime('now')
                 WHERE id = ?",
            )
            .bind(booking_id)
            .execute(&state.pool)
            .await?;

            sqlx::query(
                "UPDATE available_slots SET is_booked = 0, booking_id = NULL
                 WHERE booking_id = ?",
            )
            .bind(booking_id)
            .execute(&state.pool)
            .await?;

            bot.answer_callback_query(&q.id)
                .text("✅ Booking cancelled")
                .await?;

            if let Some(cid) = chat_id {
                bot.send_message(
                    cid,
                    format!(
                        "✅ Cancelled: {} · {} {} ({})",
                        b.client_name,
                        format_date(&b.date),
                        minutes_to_hhmm(b.start_min),
                        b.client_phone,
                    ),
                )
                .await?;
            }
        } else {
            bot.answer_callback_query(&q.id)
                .text("Booking not found or already cancelled")
                .await?;
        }
    }

    Ok(())
}

// ── Day view ──

async fn send_day_bookings(
    bot: &Bot,
    chat_id: ChatId,
    pool: &sqlx::SqlitePool,
    date: &str,
    label: &str,
) -> anyhow::Result<()> {
    let bookings = sqlx::query_as::<_, BookingInfo>(&format!(
        "{BOOKING_SELECT}
         WHERE b.date = ? AND b.status = 'confirmed'
         ORDER BY b.start_min ASC"
    ))
    .bind(date)
    .fetch_all(pool)
    .await?;

    if bookings.is_empty() {
        bot.send_message(
            chat_id,
            format!("☀️ {} ({}) — no bookings, free day!", label, format_date(date)),
        )
        .await?;
        return Ok(());
    }

    let mut text = format!("📋 <b>{}</b> ({})\n\n", label, format_date(date));
    let total: i64 = bookings.iter().map(|b| b.price_cents).sum();

    for (i, b) in bookings.iter().enumerate() {
        text.push_str(&format!(
            "{}. <b>{} — {}</b>\n   {} ({})\n   {} · {}\n\n",
            i + 1,
            minutes_to_hhmm(b.start_min),
            minutes_to_hhmm(b.end_min),
            b.client_name,
            b.client_phone,
            b.service_name,
            format_eur(b.price_cents),
        ));
    }

    text.push_str(&format!(
        "━━━━━━━━━━━━━\n📊 Bookings: <b>{}</b> · Total: <b>{}</b>",
        bookings.len(),
        format_eur(total),
    ));

    let buttons: Vec<Vec<InlineKeyboardButton>> = bookings
        .iter()
        .map(|b| {
            vec![InlineKeyboardButton::callback(
                format!(
                    "❌ {} ({} {})",
                    b.client_name,
                    minutes_to_hhmm(b.start_min),
                    b.service_name,
                ),
                format!("cancel:{}", b.id),
            )]
        })
        .collect();

    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(InlineKeyboardMarkup::new(buttons))
        .await?;

    Ok(())
}

// ── Reminders ──

/// Once per hour, send the owner a digest of tomorrow's confirmed
/// bookings that have not been reminded about yet.
async fn send_reminders(bot: Bot, pool: sqlx::SqlitePool, admin_tg_id: i64, tz: Tz) {
    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut ticker = interval(Duration::from_secs(3600));

    loop {
        ticker.tick().await;

        let tomorrow = (local_today(tz) + chrono::TimeDelta::days(1)).to_string();

        let bookings = sqlx::query_as::<_, BookingInfo>(&format!(
            "{BOOKING_SELECT}
             WHERE b.date = ? AND b.status = 'confirmed' AND b.reminder_sent = 0
             ORDER BY b.start_min ASC"
        ))
        .bind(&tomorrow)
        .fetch_all(&pool)
        .await;

        let bookings = match bookings {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("reminder query failed: {}", e);
                continue;
            }
        };

        let mut text = format!(
            "🔔 <b>Tomorrow ({})</b>\n\n",
            format_date(&tomorrow)
        );
        for b in &bookings {
            text.push_str(&format!(
                "  {} · {} · {} ({})\n",
                minutes_to_hhmm(b.start_min),
                b.client_name,
                b.service_name,
                b.client_phone,
            ));
        }

        let sent = bot
            .send_message(ChatId(admin_tg_id), &text)
            .parse_mode(ParseMode::Html)
            .await;

        if sent.is_ok() {
            for b in &bookings {
                let _ = sqlx::query("UPDATE bookings SET reminder_sent = 1 WHERE id = ?")
                    .bind(b.id)
                    .execute(&pool)
                    .await;
            }
            tracing::info!("reminder digest sent ({} bookings)", bookings.len());
        }
    }
}

// ── Formatting helpers ──

fn local_today(tz: Tz) -> chrono::NaiveDate {
    tz.from_utc_datetime(&Utc::now().naive_utc()).date_naive()
}

fn minutes_to_hhmm(min: i64) -> String {
    format!("{:02}:{:02}", min / 60, min % 60)
}

fn format_eur(cents: i64) -> String {
    format!("€{}.{:02}", cents / 100, cents % 100)
}

fn format_date(date_str: &str) -> String {
    let months = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun",
        "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    match date_str.parse::<chrono::NaiveDate>() {
        Ok(d) => format!(
            "{} {} {}",
            d.day(),
            months[(d.month0()) as usize],
            d.year()
        ),
        Err(_) => date_str.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_to_hhmm() {
        assert_eq!(minutes_to_hhmm(0), "00:00");
        assert_eq!(minutes_to_hhmm(600), "10:00");
        assert_eq!(minutes_to_hhmm(1439), "23:59");
    }

    #[test]
    fn test_format_eur() {
        assert_eq!(format_eur(4500), "€45.00");
        assert_eq!(format_eur(95), "€0.95");
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date("2026-03-01"), "1 Mar 2026");
        assert_eq!(format_date("garbage"), "garbage");
    }
}
