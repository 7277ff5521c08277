// ==========================================
// 委托编号台账 - 台账写入事务
// ==========================================
// 职责: 在单个 BEGIN IMMEDIATE 事务内完成 “读取 → 决策 → 写入”
// 红线: 闭包内只能使用 `*_in(conn, ..)` 关联函数读取，
//       不得调用仓储实例方法（同一 Mutex 会死锁）
// ==========================================

use crate::db::ts_to_db;
use crate::domain::ledger_write::LedgerWrite;
use crate::repository::allocation_repo::AllocationRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::ledger_log_repo::LedgerLogRepository;
use crate::repository::mandate_number_repo::MandateNumberRepository;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::{Arc, Mutex};

/// 落库前拦截（同一事务内执行，返回 Err 则整体回滚）
pub type BeforeApplyHook =
    Arc<dyn Fn(&Connection, &[LedgerWrite]) -> RepositoryResult<()> + Send + Sync>;

pub struct LedgerWriteRepository {
    conn: Arc<Mutex<Connection>>,
    before_apply: Option<BeforeApplyHook>,
}

impl LedgerWriteRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            before_apply: None,
        }
    }

    /// 注册落库前拦截（测试用于模拟决策与写入之间的并发修改）
    pub fn set_before_apply(&mut self, hook: BeforeApplyHook) {
        self.before_apply = Some(hook);
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在写事务内执行决策闭包并落库
    ///
    /// # 参数
    /// - `now`: 写入时间（updated_at）
    /// - `decide`: 读取当前状态并返回 (结果, 写入指令)
    ///
    /// # 返回
    /// - Ok(T): 全部写入成功并已提交
    /// - Err: 闭包失败或任一写入失败，事务整体回滚
    pub fn transact<T, E, F>(&self, now: DateTime<Utc>, decide: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<(T, Vec<LedgerWrite>), E>,
        E: From<RepositoryError>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;

        let (value, writes) = decide(&*tx)?;
        if let Some(hook) = &self.before_apply {
            hook(&tx, &writes)?;
        }
        Self::apply_writes_in(&tx, &writes, now)?;

        tx.commit().map_err(RepositoryError::from)?;
        tracing::debug!(writes = writes.len(), "台账事务已提交");
        Ok(value)
    }

    /// 顺序执行写入指令
    ///
    /// 条件写入影响 0 行 → VersionConflict
    pub fn apply_writes_in(
        conn: &Connection,
        writes: &[LedgerWrite],
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let updated_at = ts_to_db(&now);
        for write in writes {
            match write {
                LedgerWrite::ClaimNumber {
                    number_id,
                    expected,
                    status,
                } => {
                    let n = MandateNumberRepository::update_status_if_in(
                        conn,
                        number_id,
                        *expected,
                        *status,
                        &updated_at,
                    )?;
                    if n == 0 {
                        return Err(RepositoryError::version_conflict(format!(
                            "编号 {} 状态已不是 {}",
                            number_id, expected
                        )));
                    }
                }
                LedgerWrite::SetNumberStatus { number_id, status } => {
                    let n = MandateNumberRepository::set_status_in(
                        conn,
                        number_id,
                        *status,
                        &updated_at,
                    )?;
                    if n == 0 {
                        return Err(RepositoryError::NotFound {
                            entity: "MandateNumber".to_string(),
                            id: number_id.clone(),
                        });
                    }
                }
                LedgerWrite::InsertAllocation(allocation) => {
                    AllocationRepository::insert_in(conn, allocation, &updated_at).map_err(
                        |e| match e {
                            // 部分唯一索引: 编号已有活动分配
                            RepositoryError::UniqueConstraintViolation(msg) => {
                                RepositoryError::version_conflict(msg)
                            }
                            other => other,
                        },
                    )?;
                }
                LedgerWrite::UpdateAllocation {
                    allocation_id,
                    expected,
                    next,
                } => {
                    let n = AllocationRepository::update_if_status_in(
                        conn,
                        allocation_id,
                        *expected,
                        next,
                        &updated_at,
                    )?;
                    if n == 0 {
                        return Err(RepositoryError::version_conflict(format!(
                            "分配 {} 状态已不是 {}",
                            allocation_id, expected
                        )));
                    }
                }
                LedgerWrite::InsertDeposit(deposit) => {
                    AllocationRepository::insert_deposit_in(conn, deposit)?;
                }
                LedgerWrite::MarkReminded {
                    allocation_id,
                    kind,
                    at,
                } => {
                    AllocationRepository::mark_reminded_in(conn, allocation_id, *kind, at)?;
                }
                LedgerWrite::AppendLog(entry) => {
                    LedgerLogRepository::insert_in(conn, entry)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::mandate::MandateNumber;
    use crate::domain::types::MandateStatus;
    use chrono::TimeZone;

    fn setup() -> (Arc<Mutex<Connection>>, String) {
        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let number = MandateNumber::new_available(2025, 460, t0);
        MandateNumberRepository::from_connection(conn.clone())
            .insert(&number)
            .unwrap();
        (conn, number.number_id)
    }

    #[test]
    fn test_failed_claim_rolls_back_whole_batch() {
        let (conn, number_id) = setup();
        let repo = LedgerWriteRepository::from_connection(conn.clone());
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let writes = vec![
            LedgerWrite::SetNumberStatus {
                number_id: number_id.clone(),
                status: MandateStatus::Signed,
            },
            LedgerWrite::ClaimNumber {
                number_id: number_id.clone(),
                expected: MandateStatus::Reserved,
                status: MandateStatus::Signed,
            },
        ];
        let result: RepositoryResult<()> = repo.transact(now, |_| Ok(((), writes)));
        assert!(matches!(result, Err(RepositoryError::VersionConflict { .. })));

        let n = MandateNumberRepository::from_connection(conn)
            .find_by_id(&number_id)
            .unwrap()
            .unwrap();
        assert_eq!(n.status, MandateStatus::Available);
    }

    #[test]
    fn test_decide_reads_inside_transaction() {
        let (conn, number_id) = setup();
        let repo = LedgerWriteRepository::from_connection(conn.clone());
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let code: String = repo
            .transact(now, |tx| {
                let n = MandateNumberRepository::find_lowest_available_in(tx, 2025)?
                    .ok_or_else(|| RepositoryError::InternalError("empty".into()))?;
                let writes = vec![LedgerWrite::ClaimNumber {
                    number_id: n.number_id.clone(),
                    expected: MandateStatus::Available,
                    status: MandateStatus::Reserved,
                }];
                Ok::<_, RepositoryError>((n.code, writes))
            })
            .unwrap();
        assert_eq!(code, "460 M 25");

        let n = MandateNumberRepository::from_connection(conn)
            .find_by_id(&number_id)
            .unwrap()
            .unwrap();
        assert_eq!(n.status, MandateStatus::Reserved);
        assert_eq!(n.updated_at, now);
    }
}
