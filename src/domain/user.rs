// ==========================================
// 委托编号台账 - 用户与身份
// ==========================================
// 说明: 认证协议不在本库范围内，这里只保存分配/通知所需的最小信息
// ==========================================

use crate::domain::types::UserRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// UserAccount - 用户账户
// ==========================================
// 对齐: user_account 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(email: &str, role: UserRole, now: DateTime<Utc>) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            first_name: None,
            last_name: None,
            role,
            active: true,
            created_at: now,
        }
    }

    /// 通知中使用的称呼：名字优先，否则取邮箱 @ 之前部分
    pub fn display_name(&self) -> String {
        match self.first_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(self.email.as_str())
                .to_string(),
        }
    }

    pub fn as_actor(&self) -> Actor {
        Actor {
            user_id: self.user_id.clone(),
            role: self.role,
        }
    }
}

// ==========================================
// Actor - 当前操作人
// ==========================================
// 由身份协作方提供 {id, role}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: UserRole,
}

impl Actor {
    /// 系统操作人（定时任务/对账）
    pub fn system() -> Self {
        Self {
            user_id: SYSTEM_ACTOR.to_string(),
            role: UserRole::Admin,
        }
    }
}

/// 定时任务/对账写入审计日志时使用的操作人
pub const SYSTEM_ACTOR: &str = "system";
