// ==========================================
// 委托编号台账 - 台账写入指令
// ==========================================
// 状态机只产出写入指令（数据），由仓储层在单个事务内统一落库
// 条件写入 (ClaimNumber / UpdateAllocation) 影响 0 行时整笔事务回滚
// ==========================================

use crate::domain::allocation::{Allocation, Deposit};
use crate::domain::ledger_log::LedgerLogEntry;
use crate::domain::types::{AllocationStatus, MandateStatus, ReminderKind};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    /// 条件更新编号状态: 仅当当前状态为 expected 时生效
    ClaimNumber {
        number_id: String,
        expected: MandateStatus,
        status: MandateStatus,
    },
    /// 无条件更新编号状态（投影同步）
    SetNumberStatus {
        number_id: String,
        status: MandateStatus,
    },
    InsertAllocation(Allocation),
    /// 条件更新分配: 仅当当前状态为 expected 时生效
    UpdateAllocation {
        allocation_id: String,
        expected: AllocationStatus,
        next: Allocation,
    },
    InsertDeposit(Deposit),
    /// 记录提醒已发送（仅当尚未标记时生效，不视为冲突）
    MarkReminded {
        allocation_id: String,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
    AppendLog(LedgerLogEntry),
}

impl LedgerWrite {
    /// 写入指令名称（日志用）
    pub fn name(&self) -> &'static str {
        match self {
            LedgerWrite::ClaimNumber { .. } => "claim_number",
            LedgerWrite::SetNumberStatus { .. } => "set_number_status",
            LedgerWrite::InsertAllocation(_) => "insert_allocation",
            LedgerWrite::UpdateAllocation { .. } => "update_allocation",
            LedgerWrite::InsertDeposit(_) => "insert_deposit",
            LedgerWrite::MarkReminded { .. } => "mark_reminded",
            LedgerWrite::AppendLog(_) => "append_log",
        }
    }
}
