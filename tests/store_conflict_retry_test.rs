// ==========================================
// 并发冲突重试测试
// ==========================================
// 在决策与写入之间篡改行状态，模拟其他连接抢先修改
// 覆盖: 预留冲突重试一次 / 持续冲突上报 StoreConflict / 回收冲突重新读取
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod store_conflict_retry_test {
    use mandate_ledger::domain::LedgerWrite;
    use mandate_ledger::repository::{BeforeApplyHook, RepositoryError};
    use mandate_ledger::{
        AllocationLedger, AllocationStatus, LedgerConfig, LedgerError, MandateStatus,
        ReleaseReason, UserRole,
    };
    use rusqlite::{params, Connection};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::test_helpers::{create_test_db, insert_user, open_shared, t0};

    /// 抢占被认领的编号；`times` 次之后放行
    fn steal_claimed_number(calls: Arc<AtomicUsize>, times: usize) -> BeforeApplyHook {
        Arc::new(
            move |conn: &Connection, writes: &[LedgerWrite]| -> Result<(), RepositoryError> {
                for write in writes {
                    if let LedgerWrite::ClaimNumber { number_id, .. } = write {
                        if calls.fetch_add(1, Ordering::SeqCst) < times {
                            conn.execute(
                                "UPDATE mandate_number SET status = 'RESERVED' WHERE number_id = ?1",
                                params![number_id],
                            )
                            .map_err(RepositoryError::from)?;
                        }
                    }
                }
                Ok(())
            },
        )
    }

    /// 在回收写入前把分配改成 DRAFT；`armed` 为 false 时放行
    fn touch_allocation(
        armed: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        times: usize,
    ) -> BeforeApplyHook {
        Arc::new(
            move |conn: &Connection, writes: &[LedgerWrite]| -> Result<(), RepositoryError> {
                if !armed.load(Ordering::SeqCst) {
                    return Ok(());
                }
                for write in writes {
                    if let LedgerWrite::UpdateAllocation { allocation_id, .. } = write {
                        if calls.fetch_add(1, Ordering::SeqCst) < times {
                            conn.execute(
                                "UPDATE mandate_allocation SET status = 'DRAFT' WHERE allocation_id = ?1",
                                params![allocation_id],
                            )
                            .map_err(RepositoryError::from)?;
                        }
                    }
                }
                Ok(())
            },
        )
    }

    #[test]
    fn test_reserve_retries_once_after_conflict() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let agent = insert_user(&conn, "agent@example.com", UserRole::Agent);

        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = AllocationLedger::new(conn, LedgerConfig::default())
            .with_before_apply(steal_claimed_number(calls.clone(), 1));

        let reservation = ledger.reserve(&agent.user_id, t0()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // 第一次事务整体回滚，重试仍拿到最小编号
        assert_eq!(reservation.number.code, "460 M 25");
        assert_eq!(reservation.number.status, MandateStatus::Reserved);
        assert_eq!(ledger.list_my_allocations(&agent.user_id).unwrap().len(), 1);
    }

    #[test]
    fn test_reserve_reports_store_conflict_when_conflict_persists() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let agent = insert_user(&conn, "agent@example.com", UserRole::Agent);

        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = AllocationLedger::new(conn, LedgerConfig::default())
            .with_before_apply(steal_claimed_number(calls.clone(), usize::MAX));

        let err = ledger.reserve(&agent.user_id, t0()).unwrap_err();
        assert!(matches!(err, LedgerError::StoreConflict(_)), "{:?}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ledger.list_my_allocations(&agent.user_id).unwrap().is_empty());
    }

    #[test]
    fn test_release_rereads_after_conflict() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let agent = insert_user(&conn, "agent@example.com", UserRole::Agent);

        let armed = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = AllocationLedger::new(conn, LedgerConfig::default())
            .with_before_apply(touch_allocation(armed.clone(), calls.clone(), 1));

        let r = ledger.reserve(&agent.user_id, t0()).unwrap();
        armed.store(true, Ordering::SeqCst);

        let outcome = ledger
            .release(&r.allocation.allocation_id, ReleaseReason::Manual, "system", t0())
            .unwrap();
        assert!(outcome.was_released_now());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let a = ledger.find_allocation(&r.allocation.allocation_id).unwrap();
        assert_eq!(a.status, AllocationStatus::Released);
        assert_eq!(
            ledger.find_number_by_code("460 M 25").unwrap().status,
            MandateStatus::Available
        );
    }

    #[test]
    fn test_release_reports_store_conflict_when_conflict_persists() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let agent = insert_user(&conn, "agent@example.com", UserRole::Agent);

        let armed = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = AllocationLedger::new(conn, LedgerConfig::default())
            .with_before_apply(touch_allocation(armed.clone(), calls.clone(), usize::MAX));

        let r = ledger.reserve(&agent.user_id, t0()).unwrap();
        armed.store(true, Ordering::SeqCst);

        let err = ledger
            .release(&r.allocation.allocation_id, ReleaseReason::Manual, "system", t0())
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreConflict(_)), "{:?}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 两次事务均回滚
        let a = ledger.find_allocation(&r.allocation.allocation_id).unwrap();
        assert_eq!(a.status, AllocationStatus::Reserved);
    }
}
