// Bootstrap utility: create the ADMIN / AGENT accounts and seed mandate numbers
// for the current year.
//
// Usage:
//   cargo run --bin seed_ledger -- [db_path]
//
// Environment:
//   SEED_ADMIN_EMAIL (default admin@example.com)
//   SEED_AGENT_EMAIL (default agent@example.com)
//   SEED_COUNT       (default 200)
//
// Re-running is safe: accounts are upserted by email and existing numbers are kept.

use chrono::{Datelike, Utc};
use mandate_ledger::config::{ConfigManager, LedgerConfig};
use mandate_ledger::db::{ensure_schema, open_sqlite_connection};
use mandate_ledger::engine::calendar::local_date;
use mandate_ledger::engine::SequencePool;
use mandate_ledger::repository::UserAccountRepository;
use mandate_ledger::{UserAccount, UserRole};
use std::sync::{Arc, Mutex};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    mandate_ledger::logging::init();

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(mandate_ledger::app::get_default_db_path);
    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;
    let conn = Arc::new(Mutex::new(conn));

    let config =
        ConfigManager::from_connection(conn.clone()).load_ledger_config(LedgerConfig::from_env()?)?;
    let count: i32 = env_or("SEED_COUNT", "200").parse()?;
    let now = Utc::now();

    let users = UserAccountRepository::from_connection(conn.clone());
    let admin = users.upsert_by_email(&UserAccount::new(
        &env_or("SEED_ADMIN_EMAIL", "admin@example.com"),
        UserRole::Admin,
        now,
    ))?;
    let agent = users.upsert_by_email(&UserAccount::new(
        &env_or("SEED_AGENT_EMAIL", "agent@example.com"),
        UserRole::Agent,
        now,
    ))?;

    let pool = SequencePool::from_config(&config);
    let year = local_date(now, config.utc_offset()).year();
    let inserted = {
        let c = conn.lock().map_err(|e| e.to_string())?;
        pool.ensure_seeded(&c, year, count, now)?
    };

    println!("db: {}", db_path);
    println!("admin: {} ({})", admin.email, admin.user_id);
    println!("agent: {} ({})", agent.email, agent.user_id);
    println!(
        "numbers: {} inserted for {} (seq {}..{})",
        inserted,
        year,
        pool.start_seq(),
        pool.start_seq() + count - 1
    );
    Ok(())
}
