// ==========================================
// 委托编号台账 - 台账审计日志
// ==========================================
// 红线: 所有状态变更必须与日志在同一事务内写入
// 对齐: ledger_log 表
// ==========================================

use crate::domain::types::LedgerAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLogEntry {
    pub log_id: String,
    pub action: LedgerAction,
    pub actor: String,                     // 操作人 user_id 或 "system"
    pub allocation_id: Option<String>,     // 关联分配
    pub mandate_number_id: Option<String>, // 关联编号
    pub detail: Option<JsonValue>,         // 变更明细 (JSON)
    pub logged_at: DateTime<Utc>,
}

impl LedgerLogEntry {
    pub fn new(action: LedgerAction, actor: &str, now: DateTime<Utc>) -> Self {
        Self {
            log_id: Uuid::new_v4().to_string(),
            action,
            actor: actor.to_string(),
            allocation_id: None,
            mandate_number_id: None,
            detail: None,
            logged_at: now,
        }
    }

    pub fn with_allocation(mut self, allocation_id: &str) -> Self {
        self.allocation_id = Some(allocation_id.to_string());
        self
    }

    pub fn with_number(mut self, mandate_number_id: &str) -> Self {
        self.mandate_number_id = Some(mandate_number_id.to_string());
        self
    }

    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = Some(detail);
        self
    }
}
