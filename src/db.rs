// ==========================================
// 委托编号台账 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键/busy_timeout）
// - 统一建表（幂等），记录 schema_version
// - 统一时间戳存储格式（定宽 RFC3339 UTC，毫秒精度）
// ==========================================

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库（测试/演示用），同样应用统一配置并建表
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// 建表（幂等）
///
/// 约束:
/// - mandate_number: (year, seq) 唯一, code 唯一
/// - mandate_allocation: 同一编号最多一条活动分配（部分唯一索引）
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS user_account (
            user_id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            first_name TEXT,
            last_name TEXT,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mandate_number (
            number_id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            year INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (year, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_mandate_number_pool
          ON mandate_number(year, status, seq);

        CREATE TABLE IF NOT EXISTS mandate_allocation (
            allocation_id TEXT PRIMARY KEY,
            mandate_number_id TEXT NOT NULL REFERENCES mandate_number(number_id),
            user_id TEXT NOT NULL REFERENCES user_account(user_id),
            status TEXT NOT NULL,
            reserved_at TEXT NOT NULL,
            deadline_at TEXT NOT NULL,
            signed_at TEXT,
            released_at TEXT,
            release_reason TEXT,
            draft_reminded_at TEXT,
            signed_reminded_at TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS uq_allocation_active_number
          ON mandate_allocation(mandate_number_id)
          WHERE status IN ('RESERVED', 'DRAFT', 'SIGNED');

        CREATE INDEX IF NOT EXISTS idx_allocation_status_deadline
          ON mandate_allocation(status, deadline_at);

        CREATE INDEX IF NOT EXISTS idx_allocation_user
          ON mandate_allocation(user_id, reserved_at);

        CREATE TABLE IF NOT EXISTS allocation_deposit (
            deposit_id TEXT PRIMARY KEY,
            allocation_id TEXT NOT NULL REFERENCES mandate_allocation(allocation_id),
            kind TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_deposit_allocation
          ON allocation_deposit(allocation_id, kind, created_at);

        CREATE TABLE IF NOT EXISTS ledger_log (
            log_id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            allocation_id TEXT,
            mandate_number_id TEXT,
            detail TEXT,
            logged_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ledger_log_allocation
          ON ledger_log(allocation_id, logged_at);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 时间戳编解码
// ==========================================
// 定宽格式 "2025-01-08T10:00:00.000Z"，保证 SQL 中字符串比较与时间先后一致

/// 截断到毫秒（与存储精度对齐）
pub fn normalize_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// 时间戳 → 数据库文本
pub fn ts_to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 数据库文本 → 时间戳
pub fn ts_from_db(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// 从行中读取必填时间戳列
pub fn row_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    ts_from_db(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 从行中读取可空时间戳列
pub fn row_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => ts_from_db(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}
