use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // WAL: the bot and the server share this database
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, "001_init").await? {
        let migration_sql = include_str!("../migrations/001_init.sql");
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(pool).await.ok();
            }
        }
        mark_applied(pool, "001_init").await?;
        tracing::info!("Applied migration: 001_init");
    }

    if !is_applied(pool, "002_indexes").await? {
        for sql in [
            "CREATE INDEX IF NOT EXISTS idx_bookings_date ON bookings(date)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_client_id ON bookings(client_id)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_payment_status ON bookings(payment_status)",
            "CREATE INDEX IF NOT EXISTS idx_slots_date ON available_slots(date)",
            "CREATE INDEX IF NOT EXISTS idx_slots_date_booked ON available_slots(date, is_booked)",
            "CREATE INDEX IF NOT EXISTS idx_slots_booking_id ON available_slots(booking_id)",
            "CREATE INDEX IF NOT EXISTS idx_clients_phone_suffix ON clients(phone_suffix)",
            "CREATE INDEX IF NOT EXISTS idx_verification_phone ON verification_codes(phone_digits)",
        ] {
            sqlx::query(sql).execute(pool).await.ok();
        }
        mark_applied(pool, "002_indexes").await?;
        tracing::info!("Applied migration: 002_indexes");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

async fn is_applied(pool: &SqlitePool, name: &str) -> anyhow::Result<bool> {
    let applied: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(applied)
}

async fn mark_applied(pool: &SqlitePool, name: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}
