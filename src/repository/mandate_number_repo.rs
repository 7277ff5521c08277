// ==========================================
// 委托编号台账 - 委托编号仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约定: `*_in(conn, ..)` 关联函数可在事务内调用（Transaction 可解引用为 Connection）
// ==========================================

use crate::db::{row_ts, ts_to_db};
use crate::domain::mandate::MandateNumber;
use crate::domain::types::MandateStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

const NUMBER_COLUMNS: &str = "number_id, code, year, seq, status, created_at, updated_at";

// ==========================================
// NumberFilter - 编号列表过滤条件
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NumberFilter {
    pub status: Option<MandateStatus>,
    pub year: Option<i32>,
    pub code_contains: Option<String>,
    pub page: u32,      // 从 1 开始；0 视为 1
    pub page_size: u32, // 0 视为默认 20
}

impl NumberFilter {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    fn limit_offset(&self) -> (i64, i64) {
        let size = if self.page_size == 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        };
        let page = self.page.max(1);
        (size as i64, ((page - 1) as i64) * size as i64)
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberPage {
    pub items: Vec<MandateNumber>,
    pub total: i64,
}

// ==========================================
// MandateNumberRepository
// ==========================================
/// 职责: 管理 mandate_number 表
pub struct MandateNumberRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MandateNumberRepository {
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

    pub fn find_by_id(&self, number_id: &str) -> RepositoryResult<Option<MandateNumber>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, number_id)
    }

    pub fn find_by_code(&self, code: &str) -> RepositoryResult<Option<MandateNumber>> {
        let conn = self.get_conn()?;
        Self::find_by_code_in(&conn, code)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<MandateNumber>> {
        let conn = self.get_conn()?;
        Self::list_all_in(&conn)
    }

    pub fn insert(&self, number: &MandateNumber) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, number)
    }

    /// 按年份统计各状态数量
    pub fn count_by_status(&self, year: i32) -> RepositoryResult<Vec<(MandateStatus, i64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM mandate_number WHERE year = ?1 GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map(params![year], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (status, count) = row?;
            let status = MandateStatus::from_db_str(&status).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "status".to_string(),
                    message: status.clone(),
                }
            })?;
            out.push((status, count));
        }
        Ok(out)
    }

    /// 分页列表（year 降序, seq 升序）
    pub fn list(&self, filter: &NumberFilter) -> RepositoryResult<NumberPage> {
        let conn = self.get_conn()?;

        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(status) = filter.status {
            args.push(status.to_db_str().to_string().into());
            where_sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(year) = filter.year {
            args.push((year as i64).into());
            where_sql.push_str(&format!(" AND year = ?{}", args.len()));
        }
        if let Some(fragment) = filter.code_contains.as_deref().map(str::trim) {
            if !fragment.is_empty() {
                args.push(format!("%{}%", fragment).into());
                where_sql.push_str(&format!(" AND code LIKE ?{}", args.len()));
            }
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM mandate_number{}", where_sql),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let (limit, offset) = filter.limit_offset();
        let mut page_args = args.clone();
        page_args.push(limit.into());
        let limit_idx = page_args.len();
        page_args.push(offset.into());
        let offset_idx = page_args.len();

        let sql = format!(
            "SELECT {} FROM mandate_number{} ORDER BY year DESC, seq ASC LIMIT ?{} OFFSET ?{}",
            NUMBER_COLUMNS, where_sql, limit_idx, offset_idx
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(rusqlite::params_from_iter(page_args.iter()), map_number_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NumberPage { items, total })
    }

    // ==========================================
    // 关联函数（由调用方提供连接/事务）
    // ==========================================

    pub fn find_by_id_in(conn: &Connection, number_id: &str) -> RepositoryResult<Option<MandateNumber>> {
        let sql = format!("SELECT {} FROM mandate_number WHERE number_id = ?1", NUMBER_COLUMNS);
        Ok(conn
            .query_row(&sql, params![number_id], map_number_row)
            .optional()?)
    }

    pub fn find_by_code_in(conn: &Connection, code: &str) -> RepositoryResult<Option<MandateNumber>> {
        let sql = format!("SELECT {} FROM mandate_number WHERE code = ?1", NUMBER_COLUMNS);
        Ok(conn.query_row(&sql, params![code], map_number_row).optional()?)
    }

    /// 指定年份中 seq 最小的 AVAILABLE 编号
    pub fn find_lowest_available_in(
        conn: &Connection,
        year: i32,
    ) -> RepositoryResult<Option<MandateNumber>> {
        let sql = format!(
            "SELECT {} FROM mandate_number WHERE year = ?1 AND status = 'AVAILABLE' ORDER BY seq ASC LIMIT 1",
            NUMBER_COLUMNS
        );
        Ok(conn.query_row(&sql, params![year], map_number_row).optional()?)
    }

    /// 指定年份的最大 seq（空年份返回 None）
    pub fn max_seq_in(conn: &Connection, year: i32) -> RepositoryResult<Option<i32>> {
        let max: Option<i32> = conn.query_row(
            "SELECT MAX(seq) FROM mandate_number WHERE year = ?1",
            params![year],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    pub fn insert_in(conn: &Connection, number: &MandateNumber) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO mandate_number (number_id, code, year, seq, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                number.number_id,
                number.code,
                number.year,
                number.seq,
                number.status.to_db_str(),
                ts_to_db(&number.created_at),
                ts_to_db(&number.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 批量插入，已存在的 (year, seq) / code 跳过
    ///
    /// # 返回
    /// 实际插入的行数
    pub fn insert_batch_ignore_existing_in(
        conn: &Connection,
        numbers: &[MandateNumber],
    ) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare(
            r#"
            INSERT OR IGNORE INTO mandate_number (number_id, code, year, seq, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        let mut inserted = 0;
        for number in numbers {
            inserted += stmt.execute(params![
                number.number_id,
                number.code,
                number.year,
                number.seq,
                number.status.to_db_str(),
                ts_to_db(&number.created_at),
                ts_to_db(&number.updated_at),
            ])?;
        }
        Ok(inserted)
    }

    /// 条件更新状态，返回影响行数
    pub fn update_status_if_in(
        conn: &Connection,
        number_id: &str,
        expected: MandateStatus,
        status: MandateStatus,
        updated_at: &str,
    ) -> RepositoryResult<usize> {
        Ok(conn.execute(
            "UPDATE mandate_number SET status = ?1, updated_at = ?2 WHERE number_id = ?3 AND status = ?4",
            params![status.to_db_str(), updated_at, number_id, expected.to_db_str()],
        )?)
    }

    /// 无条件更新状态，返回影响行数
    pub fn set_status_in(
        conn: &Connection,
        number_id: &str,
        status: MandateStatus,
        updated_at: &str,
    ) -> RepositoryResult<usize> {
        Ok(conn.execute(
            "UPDATE mandate_number SET status = ?1, updated_at = ?2 WHERE number_id = ?3",
            params![status.to_db_str(), updated_at, number_id],
        )?)
    }

    /// 所有编号（对账用）
    pub fn list_all_in(conn: &Connection) -> RepositoryResult<Vec<MandateNumber>> {
        let sql = format!("SELECT {} FROM mandate_number ORDER BY year, seq", NUMBER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_number_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_in(conn: &Connection, number_id: &str) -> RepositoryResult<usize> {
        Ok(conn.execute(
            "DELETE FROM mandate_number WHERE number_id = ?1",
            params![number_id],
        )?)
    }
}

// ==========================================
// 行映射
// ==========================================
fn map_number_row(row: &Row<'_>) -> rusqlite::Result<MandateNumber> {
    let status_raw: String = row.get(4)?;
    let status = MandateStatus::from_db_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("未知编号状态: {}", status_raw).into(),
        )
    })?;
    Ok(MandateNumber {
        number_id: row.get(0)?,
        code: row.get(1)?,
        year: row.get(2)?,
        seq: row.get(3)?,
        status,
        created_at: row_ts(row, 5)?,
        updated_at: row_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::{TimeZone, Utc};

    fn setup() -> MandateNumberRepository {
        let conn = open_in_memory().unwrap();
        MandateNumberRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn seed(repo: &MandateNumberRepository, year: i32, seqs: &[i32]) {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for seq in seqs {
            repo.insert(&MandateNumber::new_available(year, *seq, now)).unwrap();
        }
    }

    #[test]
    fn test_lowest_available_and_max_seq() {
        let repo = setup();
        seed(&repo, 2025, &[462, 460, 461]);
        seed(&repo, 2024, &[900]);

        let conn = repo.get_conn().unwrap();
        let lowest = MandateNumberRepository::find_lowest_available_in(&conn, 2025)
            .unwrap()
            .unwrap();
        assert_eq!(lowest.code, "460 M 25");
        assert_eq!(MandateNumberRepository::max_seq_in(&conn, 2025).unwrap(), Some(462));
        assert_eq!(MandateNumberRepository::max_seq_in(&conn, 2026).unwrap(), None);
    }

    #[test]
    fn test_insert_batch_skips_existing() {
        let repo = setup();
        seed(&repo, 2025, &[460]);
        let now = Utc::now();
        let batch: Vec<_> = (460..463)
            .map(|seq| MandateNumber::new_available(2025, seq, now))
            .collect();

        let conn = repo.get_conn().unwrap();
        let inserted =
            MandateNumberRepository::insert_batch_ignore_existing_in(&conn, &batch).unwrap();
        assert_eq!(inserted, 2);
    }

    #[test]
    fn test_conditional_status_update() {
        let repo = setup();
        seed(&repo, 2025, &[460]);
        let n = repo.find_by_code("460 M 25").unwrap().unwrap();

        let conn = repo.get_conn().unwrap();
        let ts = "2025-01-02T00:00:00.000Z";
        let first = MandateNumberRepository::update_status_if_in(
            &conn,
            &n.number_id,
            MandateStatus::Available,
            MandateStatus::Reserved,
            ts,
        )
        .unwrap();
        let second = MandateNumberRepository::update_status_if_in(
            &conn,
            &n.number_id,
            MandateStatus::Available,
            MandateStatus::Reserved,
            ts,
        )
        .unwrap();
        assert_eq!((first, second), (1, 0));
    }

    #[test]
    fn test_list_filter_and_order() {
        let repo = setup();
        seed(&repo, 2024, &[10, 11]);
        seed(&repo, 2025, &[461, 460]);

        let page = repo.list(&NumberFilter::default()).unwrap();
        assert_eq!(page.total, 4);
        let codes: Vec<_> = page.items.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["460 M 25", "461 M 25", "10 M 24", "11 M 24"]);

        let filtered = repo
            .list(&NumberFilter {
                year: Some(2024),
                code_contains: Some("11".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.items[0].code, "11 M 24");

        let second_page = repo
            .list(&NumberFilter {
                page: 2,
                page_size: 3,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second_page.total, 4);
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.items[0].code, "11 M 24");
    }
}
