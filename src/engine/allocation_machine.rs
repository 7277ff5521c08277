// ==========================================
// 委托编号台账 - 分配状态机
// ==========================================
// 红线: 纯函数，不访问数据库
// 输入: (当前分配, 事件, now)
// 输出: (下一状态, 写入指令列表)
// ==========================================
// 状态图:
//   AVAILABLE --reserve--> RESERVED --draft--> DRAFT --signed--> SIGNED
//   RESERVED --signed--> SIGNED
//   RESERVED/DRAFT --release--> RELEASED（终态）
//   管理员强制改状态不受上表约束
// ==========================================

use crate::domain::allocation::{Allocation, Deposit};
use crate::domain::ledger_log::LedgerLogEntry;
use crate::domain::ledger_write::LedgerWrite;
use crate::domain::mandate::MandateNumber;
use crate::domain::types::{
    AllocationStatus, DepositKind, LedgerAction, MandateStatus, ReleaseReason,
};
use crate::engine::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde_json::json;

// ==========================================
// LedgerEvent - 分配事件
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    /// 递交文件
    Deposit {
        kind: DepositKind,
        storage_key: String,
    },
    /// 回收编号
    Release { reason: ReleaseReason },
    /// 管理员强制改状态
    AdminOverride { status: AllocationStatus },
}

impl LedgerEvent {
    pub fn name(&self) -> String {
        match self {
            LedgerEvent::Deposit { kind, .. } => format!("DEPOSIT_{}", kind),
            LedgerEvent::Release { reason } => format!("RELEASE({})", reason),
            LedgerEvent::AdminOverride { status } => format!("ADMIN_OVERRIDE({})", status),
        }
    }
}

// ==========================================
// Transition - 状态转换结果
// ==========================================
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: Allocation,
    pub writes: Vec<LedgerWrite>,
    pub changed: bool,
    pub deposit: Option<Deposit>,
}

impl Transition {
    fn unchanged(current: &Allocation) -> Self {
        Self {
            next: current.clone(),
            writes: Vec::new(),
            changed: false,
            deposit: None,
        }
    }
}

/// 规划预留: 占用编号 + 新建 RESERVED 分配
///
/// # 参数
/// - `action`: Reserve（经纪人自助）或 AdminAllocate（管理员指定）
/// - `actor`: 审计日志中的操作人
pub fn plan_reservation(
    number: &MandateNumber,
    user_id: &str,
    now: DateTime<Utc>,
    window_days: i64,
    action: LedgerAction,
    actor: &str,
) -> (Allocation, Vec<LedgerWrite>) {
    let allocation = Allocation::new_reserved(
        number.number_id.clone(),
        user_id.to_string(),
        now,
        window_days,
    );

    let log = LedgerLogEntry::new(action, actor, now)
        .with_allocation(&allocation.allocation_id)
        .with_number(&number.number_id)
        .with_detail(json!({
            "code": number.code,
            "user_id": user_id,
            "deadline_at": allocation.deadline_at,
        }));

    let writes = vec![
        LedgerWrite::ClaimNumber {
            number_id: number.number_id.clone(),
            expected: MandateStatus::Available,
            status: MandateStatus::Reserved,
        },
        LedgerWrite::InsertAllocation(allocation.clone()),
        LedgerWrite::AppendLog(log),
    ];
    (allocation, writes)
}

/// 对分配应用事件
///
/// # 返回
/// - Ok(Transition): changed=false 表示无需写入（幂等回收）
/// - Err(InvalidTransition): 当前状态不接受该事件
pub fn apply_event(
    current: &Allocation,
    event: &LedgerEvent,
    actor: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    match event {
        LedgerEvent::Deposit { kind, storage_key } => {
            apply_deposit(current, *kind, storage_key, actor, now)
        }
        LedgerEvent::Release { reason } => apply_release(current, *reason, actor, now),
        LedgerEvent::AdminOverride { status } => Ok(apply_override(current, *status, actor, now)),
    }
}

fn apply_deposit(
    current: &Allocation,
    kind: DepositKind,
    storage_key: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    if !current.status.is_open() {
        return Err(LedgerError::invalid_transition(
            current.status,
            format!("DEPOSIT_{}", kind),
        ));
    }

    let mut next = current.clone();
    let deposit = Deposit::new(
        current.allocation_id.clone(),
        kind,
        storage_key.to_string(),
        now,
    );

    let (action, number_status) = match kind {
        DepositKind::Draft => {
            next.status = AllocationStatus::Draft;
            (LedgerAction::DepositDraft, None)
        }
        DepositKind::Signed => {
            next.status = AllocationStatus::Signed;
            next.signed_at = Some(now);
            (LedgerAction::DepositSigned, Some(MandateStatus::Signed))
        }
    };

    let mut writes = vec![
        LedgerWrite::UpdateAllocation {
            allocation_id: current.allocation_id.clone(),
            expected: current.status,
            next: next.clone(),
        },
        LedgerWrite::InsertDeposit(deposit.clone()),
    ];
    if let Some(status) = number_status {
        writes.push(LedgerWrite::SetNumberStatus {
            number_id: current.mandate_number_id.clone(),
            status,
        });
    }
    writes.push(LedgerWrite::AppendLog(
        LedgerLogEntry::new(action, actor, now)
            .with_allocation(&current.allocation_id)
            .with_number(&current.mandate_number_id)
            .with_detail(json!({
                "from": current.status,
                "to": next.status,
                "storage_key": storage_key,
            })),
    ));

    Ok(Transition {
        changed: true,
        next,
        writes,
        deposit: Some(deposit),
    })
}

fn apply_release(
    current: &Allocation,
    reason: ReleaseReason,
    actor: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    match current.status {
        AllocationStatus::Released => Ok(Transition::unchanged(current)),
        AllocationStatus::Signed => Err(LedgerError::invalid_transition(
            current.status,
            format!("RELEASE({})", reason),
        )),
        AllocationStatus::Reserved | AllocationStatus::Draft => {
            let mut next = current.clone();
            next.status = AllocationStatus::Released;
            next.released_at = Some(now);
            next.release_reason = Some(reason.as_str().to_string());

            let writes = vec![
                LedgerWrite::UpdateAllocation {
                    allocation_id: current.allocation_id.clone(),
                    expected: current.status,
                    next: next.clone(),
                },
                LedgerWrite::SetNumberStatus {
                    number_id: current.mandate_number_id.clone(),
                    status: MandateStatus::Available,
                },
                LedgerWrite::AppendLog(
                    LedgerLogEntry::new(LedgerAction::Release, actor, now)
                        .with_allocation(&current.allocation_id)
                        .with_number(&current.mandate_number_id)
                        .with_detail(json!({
                            "from": current.status,
                            "reason": reason.as_str(),
                        })),
                ),
            ];
            Ok(Transition {
                next,
                writes,
                changed: true,
                deposit: None,
            })
        }
    }
}

fn apply_override(
    current: &Allocation,
    status: AllocationStatus,
    actor: &str,
    now: DateTime<Utc>,
) -> Transition {
    let mut next = current.clone();
    next.status = status;

    match status {
        AllocationStatus::Released => {
            if current.status != AllocationStatus::Released {
                next.released_at = Some(now);
                next.release_reason = Some(ReleaseReason::AdminOverride.as_str().to_string());
            }
        }
        active => {
            next.released_at = None;
            next.release_reason = None;
            if active == AllocationStatus::Signed {
                next.signed_at = current.signed_at.or(Some(now));
            } else {
                next.signed_at = None;
            }
        }
    }

    let mut writes = vec![LedgerWrite::UpdateAllocation {
        allocation_id: current.allocation_id.clone(),
        expected: current.status,
        next: next.clone(),
    }];
    // 已回收的分配不再持有编号，RELEASED → RELEASED 不得改写编号投影
    if current.status.is_active() || status.is_active() {
        writes.push(LedgerWrite::SetNumberStatus {
            number_id: current.mandate_number_id.clone(),
            status: status.projected_number_status(),
        });
    }
    writes.push(LedgerWrite::AppendLog(
        LedgerLogEntry::new(LedgerAction::AdminOverride, actor, now)
            .with_allocation(&current.allocation_id)
            .with_number(&current.mandate_number_id)
            .with_detail(json!({ "from": current.status, "to": status })),
    ));

    Transition {
        changed: status != current.status,
        next,
        writes,
        deposit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    fn reserved() -> Allocation {
        Allocation::new_reserved("n1".into(), "u1".into(), t0(), 7)
    }

    fn with_status(status: AllocationStatus) -> Allocation {
        let mut a = reserved();
        a.status = status;
        a
    }

    fn deposit(kind: DepositKind) -> LedgerEvent {
        LedgerEvent::Deposit {
            kind,
            storage_key: format!("460 M 25/{}-1.pdf", kind.to_db_str().to_lowercase()),
        }
    }

    fn number_writes(writes: &[LedgerWrite]) -> Vec<MandateStatus> {
        writes
            .iter()
            .filter_map(|w| match w {
                LedgerWrite::SetNumberStatus { status, .. } => Some(*status),
                LedgerWrite::ClaimNumber { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plan_reservation_claims_number_and_sets_deadline() {
        let number = MandateNumber::new_available(2025, 460, t0());
        let (alloc, writes) =
            plan_reservation(&number, "u1", t0(), 7, LedgerAction::Reserve, "u1");

        assert_eq!(alloc.status, AllocationStatus::Reserved);
        assert_eq!(alloc.deadline_at, Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap());
        assert!(matches!(
            writes[0],
            LedgerWrite::ClaimNumber {
                expected: MandateStatus::Available,
                status: MandateStatus::Reserved,
                ..
            }
        ));
        assert!(matches!(writes[1], LedgerWrite::InsertAllocation(_)));
        assert!(matches!(writes[2], LedgerWrite::AppendLog(_)));
    }

    #[test]
    fn test_draft_then_signed() {
        let now = t0() + chrono::Duration::days(2);
        let t = apply_event(&reserved(), &deposit(DepositKind::Draft), "u1", now).unwrap();
        assert_eq!(t.next.status, AllocationStatus::Draft);
        assert!(number_writes(&t.writes).is_empty());
        assert_eq!(t.deposit.as_ref().map(|d| d.kind), Some(DepositKind::Draft));

        let t2 = apply_event(&t.next, &deposit(DepositKind::Signed), "u1", now).unwrap();
        assert_eq!(t2.next.status, AllocationStatus::Signed);
        assert_eq!(t2.next.signed_at, Some(now));
        assert_eq!(number_writes(&t2.writes), vec![MandateStatus::Signed]);
    }

    #[test]
    fn test_second_draft_appends_deposit_only() {
        let draft = with_status(AllocationStatus::Draft);
        let t = apply_event(&draft, &deposit(DepositKind::Draft), "u1", t0()).unwrap();
        assert_eq!(t.next.status, AllocationStatus::Draft);
        assert!(t
            .writes
            .iter()
            .any(|w| matches!(w, LedgerWrite::InsertDeposit(_))));
    }

    #[test]
    fn test_reserved_can_go_straight_to_signed() {
        let t = apply_event(&reserved(), &deposit(DepositKind::Signed), "u1", t0()).unwrap();
        assert_eq!(t.next.status, AllocationStatus::Signed);
    }

    #[test]
    fn test_deposit_on_terminal_states_is_rejected() {
        for status in [AllocationStatus::Signed, AllocationStatus::Released] {
            let err = apply_event(&with_status(status), &deposit(DepositKind::Signed), "u1", t0())
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn test_release_rules() {
        let release = LedgerEvent::Release {
            reason: ReleaseReason::DeadlineExpired,
        };
        let now = t0() + chrono::Duration::days(8);

        let t = apply_event(&reserved(), &release, "system", now).unwrap();
        assert!(t.changed);
        assert_eq!(t.next.status, AllocationStatus::Released);
        assert_eq!(t.next.released_at, Some(now));
        assert_eq!(t.next.release_reason.as_deref(), Some("deadline_expired"));
        assert_eq!(number_writes(&t.writes), vec![MandateStatus::Available]);

        // 幂等: 已回收 → 无写入
        let again = apply_event(&t.next, &release, "system", now).unwrap();
        assert!(!again.changed);
        assert!(again.writes.is_empty());
        assert_eq!(again.next, t.next);

        let err = apply_event(&with_status(AllocationStatus::Signed), &release, "system", now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[test]
    fn test_admin_override_projection() {
        let cases = [
            (AllocationStatus::Reserved, MandateStatus::Reserved),
            (AllocationStatus::Draft, MandateStatus::Reserved),
            (AllocationStatus::Signed, MandateStatus::Signed),
            (AllocationStatus::Released, MandateStatus::Available),
        ];
        for (target, expected) in cases {
            let t = apply_event(
                &with_status(AllocationStatus::Signed),
                &LedgerEvent::AdminOverride { status: target },
                "admin",
                t0(),
            )
            .unwrap();
            assert_eq!(t.next.status, target);
            assert_eq!(number_writes(&t.writes), vec![expected]);
        }
    }

    #[test]
    fn test_admin_override_revives_released() {
        let mut released = with_status(AllocationStatus::Released);
        released.released_at = Some(t0());
        released.release_reason = Some("deadline_expired".into());

        let t = apply_event(
            &released,
            &LedgerEvent::AdminOverride {
                status: AllocationStatus::Signed,
            },
            "admin",
            t0(),
        )
        .unwrap();
        assert_eq!(t.next.released_at, None);
        assert_eq!(t.next.release_reason, None);
        assert_eq!(t.next.signed_at, Some(t0()));
    }

    #[test]
    fn test_admin_override_released_to_released_leaves_number() {
        let mut released = with_status(AllocationStatus::Released);
        released.released_at = Some(t0());
        released.release_reason = Some("manual".into());

        let t = apply_event(
            &released,
            &LedgerEvent::AdminOverride {
                status: AllocationStatus::Released,
            },
            "admin",
            t0(),
        )
        .unwrap();
        assert!(!t.changed);
        assert!(number_writes(&t.writes).is_empty());
        assert_eq!(t.next.released_at, Some(t0()));
        assert_eq!(t.next.release_reason.as_deref(), Some("manual"));
    }
}
