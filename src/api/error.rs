// ==========================================
// 委托编号台账 - API层错误类型
// ==========================================
// 职责: 将引擎/仓储错误转换为调用方可识别的错误
// 每个变体对应一个稳定的 code()，供前端/HTTP 层映射
// ==========================================

use crate::engine::error::LedgerError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无可用编号: {0}")]
    NoAvailableNumber(String),

    #[error("无效的状态转换: from={from} event={event}")]
    InvalidTransition { from: String, event: String },

    #[error("无权限: {0}")]
    Forbidden(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据冲突: {0}")]
    Conflict(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("并发冲突，请重试: {0}")]
    StoreConflict(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoAvailableNumber(_) => "NO_AVAILABLE_NUMBER",
            ApiError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::StoreConflict(_) => "STORE_CONFLICT",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::DatabaseConnectionError(_) => "DATABASE_CONNECTION_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { message } => ApiError::StoreConflict(message),
            RepositoryError::DatabaseBusy(msg) => ApiError::StoreConflict(msg),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::Conflict(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 LedgerError 转换
// ==========================================
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            e @ LedgerError::NoAvailableNumber { .. } => ApiError::NoAvailableNumber(e.to_string()),
            LedgerError::InvalidTransition { from, event } => {
                ApiError::InvalidTransition { from, event }
            }
            LedgerError::Forbidden(msg) => ApiError::Forbidden(msg),
            LedgerError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            LedgerError::StoreConflict(msg) => ApiError::StoreConflict(msg),
            LedgerError::Conflict(msg) => ApiError::Conflict(msg),
            LedgerError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            LedgerError::Repository(e) => e.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_codes() {
        let err: ApiError = LedgerError::invalid_transition("SIGNED", "RELEASE").into();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        let err: ApiError = LedgerError::StoreConflict("x".into()).into();
        assert_eq!(err.code(), "STORE_CONFLICT");

        let err: ApiError = LedgerError::NoAvailableNumber {
            year: 2025,
            reason: "batch".into(),
        }
        .into();
        assert_eq!(err.code(), "NO_AVAILABLE_NUMBER");
        assert!(err.to_string().contains("2025"));
    }

    #[test]
    fn test_repository_error_mapping() {
        let err: ApiError = RepositoryError::DatabaseBusy("locked".into()).into();
        assert_eq!(err.code(), "STORE_CONFLICT");

        let err: ApiError = RepositoryError::NotFound {
            entity: "Allocation".into(),
            id: "a1".into(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(ref m) if m.contains("a1")));
    }
}
