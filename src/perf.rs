// ==========================================
// 委托编号台账 - 性能统计
// ==========================================
// 台账连接安装 trace/profile 回调: 统计语句数，记录慢 SQL
// 台账操作持有 PerfGuard，结束时输出耗时与语句数
// ==========================================

use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 慢 SQL 阈值（毫秒），0 表示未安装
static SLOW_SQL_MS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static SQL_COUNT: Cell<u64> = const { Cell::new(0) };
}

/// 安装语句统计
///
/// - `MANDATE_LEDGER_PERF_SQL=0/1` 关闭/开启（缺省: debug 开启）
/// - `MANDATE_LEDGER_SLOW_SQL_MS` 慢 SQL 阈值（缺省: debug 50，release 200）
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let enabled = std::env::var("MANDATE_LEDGER_PERF_SQL")
        .map(|v| matches!(v.trim(), "1" | "true" | "on"))
        .unwrap_or(cfg!(debug_assertions));
    if !enabled {
        SLOW_SQL_MS.store(0, Ordering::Relaxed);
        conn.trace(None);
        conn.profile(None);
        return;
    }

    let slow_ms = std::env::var("MANDATE_LEDGER_SLOW_SQL_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
    SLOW_SQL_MS.store(slow_ms, Ordering::Relaxed);

    conn.trace(Some(count_statement));
    conn.profile(Some(log_slow_statement));
}

fn count_statement(_sql: &str) {
    SQL_COUNT.with(|c| c.set(c.get().wrapping_add(1)));
}

fn log_slow_statement(sql: &str, duration: Duration) {
    let threshold = SLOW_SQL_MS.load(Ordering::Relaxed);
    let ms = duration.as_millis() as u64;
    if threshold > 0 && ms >= threshold {
        tracing::warn!(target: "slow_sql", duration_ms = ms, sql = %one_line(sql, 400), "慢 SQL");
    }
}

/// 压成单行并截断到 `max_len` 字节（按字符边界）
fn one_line(sql: &str, max_len: usize) -> String {
    let s = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// 操作耗时 + 语句数
///
/// 语句数按线程统计，跨 `.await` 的操作使用 [`PerfGuard::timing_only`]
pub struct PerfGuard {
    op: &'static str,
    start: Instant,
    sql_start: Option<u64>,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            start: Instant::now(),
            sql_start: Some(SQL_COUNT.with(|c| c.get())),
        }
    }

    pub fn timing_only(op: &'static str) -> Self {
        Self {
            op,
            start: Instant::now(),
            sql_start: None,
        }
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        match self.sql_start {
            Some(start) => {
                let sql_count = SQL_COUNT.with(|c| c.get()).wrapping_sub(start);
                tracing::debug!(target: "perf", op = self.op, elapsed_ms, sql_count, "done");
            }
            None => tracing::debug!(target: "perf", op = self.op, elapsed_ms, "done"),
        }
    }
}
