// ==========================================
// 委托编号台账 - 引擎层
// ==========================================
// 职责: 编号池 / 分配状态机 / 台账操作 / 巡检 / 对账
// 红线: 状态机与对账规划为纯函数，不访问数据库
// ==========================================

pub mod allocation_ledger;
pub mod allocation_machine;
pub mod calendar;
pub mod error;
pub mod reconciliation;
pub mod reminder;
pub mod sequence_pool;

// 重导出核心引擎
pub use allocation_ledger::{AllocationLedger, DepositRecord, NewNumber, ReleaseOutcome, Reservation};
pub use allocation_machine::{LedgerEvent, Transition};
pub use error::{LedgerError, LedgerResult};
pub use reconciliation::{StatusCorrection, SyncReport};
pub use reminder::{ReminderScheduler, SweepEntry, SweepFailure, SweepReport, SweepStep};
pub use sequence_pool::SequencePool;
