// ==========================================
// 分配生命周期集成测试
// ==========================================
// 覆盖: 预留 → 草稿 → 签署；回收幂等；编号回收再分配；权限
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod ledger_lifecycle_test {
    use chrono::Duration;
    use mandate_ledger::{
        AllocationStatus, ApiError, DepositKind, LedgerConfig, MandateStatus,
    };

    use crate::test_helpers::{insert_user, setup_env, t0};

    #[test]
    fn test_reserve_draft_signed_flow() {
        let env = setup_env(LedgerConfig::default());
        let api = &env.state.mandate_api;

        let receipt = api.reserve(&env.agent.user_id, t0()).unwrap();
        assert_eq!(receipt.code, "460 M 25");
        assert_eq!(receipt.deadline_at, t0() + Duration::days(7));

        let draft = api
            .record_deposit("460 M 25", &env.agent.user_id, DepositKind::Draft, t0() + Duration::days(1))
            .unwrap();
        assert_eq!(draft.status, AllocationStatus::Draft);
        assert!(draft.storage_key.starts_with("460 M 25/draft-"));

        let signed = api
            .record_deposit("460 M 25", &env.agent.user_id, DepositKind::Signed, t0() + Duration::days(2))
            .unwrap();
        assert_eq!(signed.status, AllocationStatus::Signed);
        assert_eq!(signed.allocation_id, receipt.allocation_id);

        let number = env.state.ledger.find_number_by_code("460 M 25").unwrap();
        assert_eq!(number.status, MandateStatus::Signed);

        // 签署后不再接受递交
        let err = api
            .record_deposit("460 M 25", &env.agent.user_id, DepositKind::Signed, t0() + Duration::days(3))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        let mine = api.list_my_allocations(&env.agent.user_id).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].code, "460 M 25");
        assert_eq!(mine[0].deposits.len(), 2);
    }

    #[test]
    fn test_signed_directly_from_reserved() {
        let env = setup_env(LedgerConfig::default());
        let api = &env.state.mandate_api;
        api.reserve(&env.agent.user_id, t0()).unwrap();

        let signed = api
            .record_deposit("460 M 25", &env.agent.user_id, DepositKind::Signed, t0())
            .unwrap();
        assert_eq!(signed.status, AllocationStatus::Signed);
    }

    #[test]
    fn test_release_is_idempotent_and_number_is_reused() {
        let env = setup_env(LedgerConfig::default());
        let api = &env.state.mandate_api;

        let first = api.reserve(&env.agent.user_id, t0()).unwrap();
        let second = api.reserve(&env.agent.user_id, t0()).unwrap();
        assert_eq!(second.code, "461 M 25");

        api.release(&first.allocation_id, t0()).unwrap();
        api.release(&first.allocation_id, t0()).unwrap();

        let released = env.state.ledger.find_allocation(&first.allocation_id).unwrap();
        assert_eq!(released.status, AllocationStatus::Released);
        assert_eq!(released.release_reason.as_deref(), Some("manual"));

        // 释放后的最小 seq 优先
        let third = api.reserve(&env.agent.user_id, t0()).unwrap();
        assert_eq!(third.code, "460 M 25");
        assert_ne!(third.allocation_id, first.allocation_id);

        let mine = api.list_my_allocations(&env.agent.user_id).unwrap();
        assert_eq!(mine.len(), 2);
    }

    #[test]
    fn test_deposit_after_release_is_rejected() {
        let env = setup_env(LedgerConfig::default());
        let api = &env.state.mandate_api;
        let r = api.reserve(&env.agent.user_id, t0()).unwrap();
        api.release(&r.allocation_id, t0()).unwrap();

        let err = api
            .record_deposit("460 M 25", &env.agent.user_id, DepositKind::Draft, t0())
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_release_signed_is_invalid_transition() {
        let env = setup_env(LedgerConfig::default());
        let api = &env.state.mandate_api;
        let r = api.reserve(&env.agent.user_id, t0()).unwrap();
        api.record_deposit("460 M 25", &env.agent.user_id, DepositKind::Signed, t0())
            .unwrap();

        let err = api.release(&r.allocation_id, t0()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
    }

    #[test]
    fn test_unknown_code_and_foreign_user() {
        let env = setup_env(LedgerConfig::default());
        let api = &env.state.mandate_api;
        api.reserve(&env.agent.user_id, t0()).unwrap();

        let err = api
            .record_deposit("999 M 25", &env.agent.user_id, DepositKind::Draft, t0())
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let other = insert_user(&env.conn, "other@example.com", mandate_ledger::UserRole::Agent);
        let err = api
            .record_deposit("460 M 25", &other.user_id, DepositKind::Draft, t0())
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_admin_cannot_reserve() {
        let env = setup_env(LedgerConfig::default());
        let err = env
            .state
            .mandate_api
            .reserve(&env.admin.user_id, t0())
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}
