// ==========================================
// 委托编号台账 - 审计日志仓储
// ==========================================
// 红线: 日志只追加，不修改
// ==========================================

use crate::db::{row_ts, ts_to_db};
use crate::domain::ledger_log::LedgerLogEntry;
use crate::domain::types::LedgerAction;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

const LOG_COLUMNS: &str =
    "log_id, action, actor, allocation_id, mandate_number_id, detail, logged_at";

pub struct LedgerLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerLogRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_in(conn: &Connection, entry: &LedgerLogEntry) -> RepositoryResult<()> {
        let detail = entry
            .detail
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::FieldValueError {
                field: "detail".to_string(),
                message: e.to_string(),
            })?;
        conn.execute(
            &format!(
                "INSERT INTO ledger_log ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                LOG_COLUMNS
            ),
            params![
                entry.log_id,
                entry.action.as_str(),
                entry.actor,
                entry.allocation_id,
                entry.mandate_number_id,
                detail,
                ts_to_db(&entry.logged_at),
            ],
        )?;
        Ok(())
    }

    /// 分配的审计轨迹（时间升序）
    pub fn list_by_allocation(&self, allocation_id: &str) -> RepositoryResult<Vec<LedgerLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM ledger_log WHERE allocation_id = ?1 ORDER BY logged_at, rowid",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![allocation_id], map_log_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 最近的日志（时间降序）
    pub fn list_recent(&self, limit: u32) -> RepositoryResult<Vec<LedgerLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM ledger_log ORDER BY logged_at DESC, rowid DESC LIMIT ?1",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], map_log_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_log_row(row: &Row<'_>) -> rusqlite::Result<LedgerLogEntry> {
    let action_raw: String = row.get(1)?;
    let action = LedgerAction::from_db_str(&action_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("未知操作类型: {}", action_raw).into(),
        )
    })?;
    // detail 解析失败时保留为 None，不影响审计列表
    let detail = row
        .get::<_, Option<String>>(5)?
        .and_then(|s| serde_json::from_str(&s).ok());
    Ok(LedgerLogEntry {
        log_id: row.get(0)?,
        action,
        actor: row.get(2)?,
        allocation_id: row.get(3)?,
        mandate_number_id: row.get(4)?,
        detail,
        logged_at: row_ts(row, 6)?,
    })
}
