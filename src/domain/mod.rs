// ==========================================
// 委托编号台账 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、写入指令
// 红线: 不含数据访问逻辑，不含引擎逻辑
// ==========================================

pub mod allocation;
pub mod ledger_log;
pub mod ledger_write;
pub mod mandate;
pub mod types;
pub mod user;

// 重导出核心类型
pub use allocation::{Allocation, AllocationView, Deposit};
pub use ledger_log::LedgerLogEntry;
pub use ledger_write::LedgerWrite;
pub use mandate::{format_code, parse_code, MandateNumber};
pub use types::{
    AllocationStatus, DepositKind, LedgerAction, MandateStatus, ReleaseReason, ReminderKind,
    UserRole,
};
pub use user::{Actor, UserAccount, SYSTEM_ACTOR};
