// ==========================================
// 委托编号台账 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 并发控制错误 =====
    #[error("版本冲突: {message}")]
    VersionConflict { message: String },

    #[error("数据库繁忙: {0}")]
    DatabaseBusy(String),

    // ===== 数据库错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    // ===== 数据质量错误 =====
    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    /// 是否为可重试的并发冲突（条件写入落空 / 数据库繁忙）
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RepositoryError::VersionConflict { .. } | RepositoryError::DatabaseBusy(_)
        )
    }

    pub fn version_conflict(message: impl Into<String>) -> Self {
        RepositoryError::VersionConflict {
            message: message.into(),
        }
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                RepositoryError::DatabaseBusy(msg.unwrap_or_else(|| code.to_string()))
            }
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                if msg.contains("UNIQUE") {
                    RepositoryError::UniqueConstraintViolation(msg)
                } else if msg.contains("FOREIGN KEY") {
                    RepositoryError::ForeignKeyViolation(msg)
                } else {
                    RepositoryError::DatabaseQueryError(msg)
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn test_unique_violation_is_mapped() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', 'k', 'v')",
            [],
        )
        .unwrap();
        let err: RepositoryError = conn
            .execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', 'k', 'v2')",
                [],
            )
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_version_conflict_is_conflict() {
        assert!(RepositoryError::version_conflict("0 rows").is_conflict());
        assert!(RepositoryError::DatabaseBusy("locked".into()).is_conflict());
    }
}
