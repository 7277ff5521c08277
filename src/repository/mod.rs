// ==========================================
// 委托编号台账 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口，屏蔽数据库细节
// 约束: 所有查询使用参数化，防止 SQL 注入
// ==========================================

pub mod allocation_repo;
pub mod error;
pub mod ledger_log_repo;
pub mod ledger_write_repo;
pub mod mandate_number_repo;
pub mod user_account_repo;

// 重导出核心仓储
pub use allocation_repo::AllocationRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use ledger_log_repo::LedgerLogRepository;
pub use ledger_write_repo::{BeforeApplyHook, LedgerWriteRepository};
pub use mandate_number_repo::{MandateNumberRepository, NumberFilter, NumberPage};
pub use user_account_repo::UserAccountRepository;
