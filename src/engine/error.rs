// ==========================================
// 委托编号台账 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: InvalidTransition / Forbidden 不得被吞掉
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 台账引擎错误类型
#[derive(Error, Debug)]
pub enum LedgerError {
    /// 编号池无法提供编号（补号失败）
    #[error("年份 {year} 无可用编号: {reason}")]
    NoAvailableNumber { year: i32, reason: String },

    /// 状态机不允许的事件
    #[error("无效的状态转换: from={from} event={event}")]
    InvalidTransition { from: String, event: String },

    /// 调用方角色/归属不满足
    #[error("无权限: {0}")]
    Forbidden(String),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    /// 并发写入冲突（条件更新落空）
    #[error("并发冲突: {0}")]
    StoreConflict(String),

    /// 业务唯一性冲突（重复编号等）
    #[error("数据冲突: {0}")]
    Conflict(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl LedgerError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn invalid_transition(from: impl ToString, event: impl ToString) -> Self {
        LedgerError::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }

    pub fn is_store_conflict(&self) -> bool {
        matches!(self, LedgerError::StoreConflict(_))
    }
}

// 并发类仓储错误统一归为 StoreConflict，NotFound 透传
impl From<RepositoryError> for LedgerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { message } => LedgerError::StoreConflict(message),
            RepositoryError::DatabaseBusy(msg) => LedgerError::StoreConflict(msg),
            RepositoryError::NotFound { entity, id } => LedgerError::NotFound { entity, id },
            other => LedgerError::Repository(other),
        }
    }
}

/// Result 类型别名
pub type LedgerResult<T> = Result<T, LedgerError>;
