// ==========================================
// 委托编号台账 - 分配与递交仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约定: 时间戳以定宽文本存储，区间查询直接比较字符串
// ==========================================

use crate::db::{row_opt_ts, row_ts, ts_to_db};
use crate::domain::allocation::{Allocation, AllocationView, Deposit};
use crate::domain::types::{AllocationStatus, DepositKind, ReminderKind};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const ALLOCATION_COLUMNS: &str = "a.allocation_id, a.mandate_number_id, a.user_id, a.status, \
     a.reserved_at, a.deadline_at, a.signed_at, a.released_at, a.release_reason, \
     a.draft_reminded_at, a.signed_reminded_at";

const DEPOSIT_COLUMNS: &str = "deposit_id, allocation_id, kind, storage_key, created_at";

// ==========================================
// AllocationRepository
// ==========================================
/// 职责: 管理 mandate_allocation / allocation_deposit 表
pub struct AllocationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AllocationRepository {
    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 实例方法（自行加锁）
    // ==========================================

    pub fn find_by_id(&self, allocation_id: &str) -> RepositoryResult<Option<Allocation>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, allocation_id)
    }

    pub fn list_deposits(&self, allocation_id: &str) -> RepositoryResult<Vec<Deposit>> {
        let conn = self.get_conn()?;
        Self::list_deposits_in(&conn, allocation_id)
    }

    pub fn list_by_statuses(
        &self,
        statuses: &[AllocationStatus],
    ) -> RepositoryResult<Vec<Allocation>> {
        let conn = self.get_conn()?;
        Self::list_by_statuses_in(&conn, statuses)
    }

    pub fn list_expired(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Allocation>> {
        let conn = self.get_conn()?;
        Self::list_expired_in(&conn, now)
    }

    pub fn list_draft_reminder_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Allocation>> {
        let conn = self.get_conn()?;
        Self::list_draft_reminder_candidates_in(&conn, from, to)
    }

    pub fn list_signed_reminder_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<(Allocation, DateTime<Utc>)>> {
        let conn = self.get_conn()?;
        Self::list_signed_reminder_candidates_in(&conn, from, to)
    }

    /// 某用户的分配列表（reserved_at 降序），附编号与递交记录
    ///
    /// # 参数
    /// - `include_released`: 是否包含已回收的分配
    pub fn list_views_by_user(
        &self,
        user_id: &str,
        include_released: bool,
    ) -> RepositoryResult<Vec<AllocationView>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}, n.code
            FROM mandate_allocation a
            JOIN mandate_number n ON n.number_id = a.mandate_number_id
            WHERE a.user_id = ?1 AND (?2 = 1 OR a.status <> 'RELEASED')
            ORDER BY a.reserved_at DESC
            "#,
            ALLOCATION_COLUMNS
        );
        Self::collect_views(&conn, &sql, params![user_id, include_released as i64])
    }

    /// 管理员列表（可按状态过滤，reserved_at 降序）
    pub fn list_views(
        &self,
        status: Option<AllocationStatus>,
    ) -> RepositoryResult<Vec<AllocationView>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}, n.code
            FROM mandate_allocation a
            JOIN mandate_number n ON n.number_id = a.mandate_number_id
            WHERE (?1 IS NULL OR a.status = ?1)
            ORDER BY a.reserved_at DESC
            "#,
            ALLOCATION_COLUMNS
        );
        Self::collect_views(&conn, &sql, params![status.map(|s| s.to_db_str())])
    }

    fn collect_views(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> RepositoryResult<Vec<AllocationView>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                let allocation = map_allocation_row(row)?;
                let code: String = row.get(11)?;
                Ok((allocation, code))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut views = Vec::with_capacity(rows.len());
        for (allocation, code) in rows {
            let deposits = Self::list_deposits_in(conn, &allocation.allocation_id)?;
            views.push(AllocationView {
                allocation,
                code,
                deposits,
            });
        }
        Ok(views)
    }

    // ==========================================
    // 关联函数（由调用方提供连接/事务）
    // ==========================================

    pub fn find_by_id_in(
        conn: &Connection,
        allocation_id: &str,
    ) -> RepositoryResult<Option<Allocation>> {
        let sql = format!(
            "SELECT {} FROM mandate_allocation a WHERE a.allocation_id = ?1",
            ALLOCATION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![allocation_id], map_allocation_row)
            .optional()?)
    }

    /// 编号当前的活动分配（RESERVED/DRAFT/SIGNED）
    pub fn find_active_by_number_in(
        conn: &Connection,
        mandate_number_id: &str,
    ) -> RepositoryResult<Option<Allocation>> {
        let sql = format!(
            r#"
            SELECT {} FROM mandate_allocation a
            WHERE a.mandate_number_id = ?1 AND a.status IN ('RESERVED', 'DRAFT', 'SIGNED')
            ORDER BY a.reserved_at DESC
            LIMIT 1
            "#,
            ALLOCATION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![mandate_number_id], map_allocation_row)
            .optional()?)
    }

    /// 用户在某编号上的当前分配
    ///
    /// 优先返回活动分配；无活动分配时返回最近一次（含 RELEASED）
    pub fn find_current_by_code_and_user_in(
        conn: &Connection,
        code: &str,
        user_id: &str,
    ) -> RepositoryResult<Option<(Allocation, String)>> {
        let sql = format!(
            r#"
            SELECT {}, n.code
            FROM mandate_allocation a
            JOIN mandate_number n ON n.number_id = a.mandate_number_id
            WHERE n.code = ?1 AND a.user_id = ?2
            ORDER BY (a.status <> 'RELEASED') DESC, a.reserved_at DESC
            LIMIT 1
            "#,
            ALLOCATION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![code, user_id], |row| {
                Ok((map_allocation_row(row)?, row.get::<_, String>(11)?))
            })
            .optional()?)
    }

    /// 按状态列出分配（对账用）
    pub fn list_by_statuses_in(
        conn: &Connection,
        statuses: &[AllocationStatus],
    ) -> RepositoryResult<Vec<Allocation>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM mandate_allocation a WHERE a.status IN ({}) ORDER BY a.reserved_at",
            ALLOCATION_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(statuses.iter().map(|s| s.to_db_str())),
                map_allocation_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 已过期的 RESERVED/DRAFT 分配（deadline_at < now）
    pub fn list_expired_in(
        conn: &Connection,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Allocation>> {
        let sql = format!(
            r#"
            SELECT {} FROM mandate_allocation a
            WHERE a.status IN ('RESERVED', 'DRAFT') AND a.deadline_at < ?1
            ORDER BY a.deadline_at
            "#,
            ALLOCATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ts_to_db(&now)], map_allocation_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 草稿提醒候选: RESERVED、未提醒、reserved_at ∈ [from, to)
    pub fn list_draft_reminder_candidates_in(
        conn: &Connection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Allocation>> {
        let sql = format!(
            r#"
            SELECT {} FROM mandate_allocation a
            WHERE a.status = 'RESERVED'
              AND a.draft_reminded_at IS NULL
              AND a.reserved_at >= ?1 AND a.reserved_at < ?2
            ORDER BY a.reserved_at
            "#,
            ALLOCATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ts_to_db(&from), ts_to_db(&to)], map_allocation_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 签署提醒候选: DRAFT、未提醒、首个草稿递交时间 ∈ [from, to)
    ///
    /// # 返回
    /// (分配, 首个草稿递交时间)
    pub fn list_signed_reminder_candidates_in(
        conn: &Connection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<(Allocation, DateTime<Utc>)>> {
        let sql = format!(
            r#"
            SELECT {}, d.first_draft_at
            FROM mandate_allocation a
            JOIN (
                SELECT allocation_id, MIN(created_at) AS first_draft_at
                FROM allocation_deposit
                WHERE kind = 'DRAFT'
                GROUP BY allocation_id
            ) d ON d.allocation_id = a.allocation_id
            WHERE a.status = 'DRAFT'
              AND a.signed_reminded_at IS NULL
              AND d.first_draft_at >= ?1 AND d.first_draft_at < ?2
            ORDER BY d.first_draft_at
            "#,
            ALLOCATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ts_to_db(&from), ts_to_db(&to)], |row| {
                Ok((map_allocation_row(row)?, row_ts(row, 11)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 引用某编号的分配数量（任意状态）
    pub fn count_by_number_in(conn: &Connection, mandate_number_id: &str) -> RepositoryResult<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM mandate_allocation WHERE mandate_number_id = ?1",
            params![mandate_number_id],
            |row| row.get(0),
        )?)
    }

    pub fn insert_in(
        conn: &Connection,
        allocation: &Allocation,
        updated_at: &str,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO mandate_allocation (
                allocation_id, mandate_number_id, user_id, status,
                reserved_at, deadline_at, signed_at, released_at, release_reason,
                draft_reminded_at, signed_reminded_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                allocation.allocation_id,
                allocation.mandate_number_id,
                allocation.user_id,
                allocation.status.to_db_str(),
                ts_to_db(&allocation.reserved_at),
                ts_to_db(&allocation.deadline_at),
                allocation.signed_at.as_ref().map(ts_to_db),
                allocation.released_at.as_ref().map(ts_to_db),
                allocation.release_reason,
                allocation.draft_reminded_at.as_ref().map(ts_to_db),
                allocation.signed_reminded_at.as_ref().map(ts_to_db),
                updated_at,
            ],
        )?;
        Ok(())
    }

    /// 条件更新: 仅当当前状态为 expected 时写入 next 的可变字段
    ///
    /// # 返回
    /// 影响行数（0 表示状态已被并发修改）
    pub fn update_if_status_in(
        conn: &Connection,
        allocation_id: &str,
        expected: AllocationStatus,
        next: &Allocation,
        updated_at: &str,
    ) -> RepositoryResult<usize> {
        Ok(conn.execute(
            r#"
            UPDATE mandate_allocation SET
                status = ?1,
                deadline_at = ?2,
                signed_at = ?3,
                released_at = ?4,
                release_reason = ?5,
                draft_reminded_at = ?6,
                signed_reminded_at = ?7,
                updated_at = ?8
            WHERE allocation_id = ?9 AND status = ?10
            "#,
            params![
                next.status.to_db_str(),
                ts_to_db(&next.deadline_at),
                next.signed_at.as_ref().map(ts_to_db),
                next.released_at.as_ref().map(ts_to_db),
                next.release_reason,
                next.draft_reminded_at.as_ref().map(ts_to_db),
                next.signed_reminded_at.as_ref().map(ts_to_db),
                updated_at,
                allocation_id,
                expected.to_db_str(),
            ],
        )?)
    }

    /// 标记提醒已发送（仅首次生效）
    pub fn mark_reminded_in(
        conn: &Connection,
        allocation_id: &str,
        kind: ReminderKind,
        at: &DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let sql = match kind {
            ReminderKind::Draft => {
                "UPDATE mandate_allocation SET draft_reminded_at = ?1 WHERE allocation_id = ?2 AND draft_reminded_at IS NULL"
            }
            ReminderKind::Signed => {
                "UPDATE mandate_allocation SET signed_reminded_at = ?1 WHERE allocation_id = ?2 AND signed_reminded_at IS NULL"
            }
        };
        Ok(conn.execute(sql, params![ts_to_db(at), allocation_id])?)
    }

    // ==========================================
    // 递交记录
    // ==========================================

    pub fn insert_deposit_in(conn: &Connection, deposit: &Deposit) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO allocation_deposit (deposit_id, allocation_id, kind, storage_key, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                deposit.deposit_id,
                deposit.allocation_id,
                deposit.kind.to_db_str(),
                deposit.storage_key,
                ts_to_db(&deposit.created_at),
            ],
        )?;
        Ok(())
    }

    /// 分配的递交记录（created_at 升序）
    pub fn list_deposits_in(
        conn: &Connection,
        allocation_id: &str,
    ) -> RepositoryResult<Vec<Deposit>> {
        let sql = format!(
            "SELECT {} FROM allocation_deposit WHERE allocation_id = ?1 ORDER BY created_at, deposit_id",
            DEPOSIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![allocation_id], map_deposit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 首个草稿递交时间
    pub fn first_draft_at_in(
        conn: &Connection,
        allocation_id: &str,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = conn.query_row(
            "SELECT MIN(created_at) FROM allocation_deposit WHERE allocation_id = ?1 AND kind = 'DRAFT'",
            params![allocation_id],
            |row| row.get(0),
        )?;
        match raw {
            Some(raw) => crate::db::ts_from_db(&raw)
                .map(Some)
                .map_err(|e| RepositoryError::FieldValueError {
                    field: "created_at".to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

// ==========================================
// 行映射
// ==========================================
fn map_allocation_row(row: &Row<'_>) -> rusqlite::Result<Allocation> {
    let status_raw: String = row.get(3)?;
    let status = AllocationStatus::from_db_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("未知分配状态: {}", status_raw).into(),
        )
    })?;
    Ok(Allocation {
        allocation_id: row.get(0)?,
        mandate_number_id: row.get(1)?,
        user_id: row.get(2)?,
        status,
        reserved_at: row_ts(row, 4)?,
        deadline_at: row_ts(row, 5)?,
        signed_at: row_opt_ts(row, 6)?,
        released_at: row_opt_ts(row, 7)?,
        release_reason: row.get(8)?,
        draft_reminded_at: row_opt_ts(row, 9)?,
        signed_reminded_at: row_opt_ts(row, 10)?,
    })
}

fn map_deposit_row(row: &Row<'_>) -> rusqlite::Result<Deposit> {
    let kind_raw: String = row.get(2)?;
    let kind = DepositKind::from_db_str(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("未知递交类型: {}", kind_raw).into(),
        )
    })?;
    Ok(Deposit {
        deposit_id: row.get(0)?,
        allocation_id: row.get(1)?,
        kind,
        storage_key: row.get(3)?,
        created_at: row_ts(row, 4)?,
    })
}
