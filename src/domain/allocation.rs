// ==========================================
// 委托编号台账 - 分配与递交领域模型
// ==========================================
// 红线: 同一编号最多一条非终态分配 (RESERVED/DRAFT/SIGNED)
// 红线: RELEASED 为终态，之后仅允许修改审计字段
// ==========================================

use crate::domain::types::{AllocationStatus, DepositKind, ReminderKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Allocation - 编号分配记录
// ==========================================
// 对齐: mandate_allocation 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    // ===== 主键与关联 =====
    pub allocation_id: String,
    pub mandate_number_id: String,
    pub user_id: String,

    // ===== 状态 =====
    pub status: AllocationStatus,

    // ===== 时间线 =====
    pub reserved_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,

    // ===== 提醒标记（保证每类提醒只发一次）=====
    pub draft_reminded_at: Option<DateTime<Utc>>,
    pub signed_reminded_at: Option<DateTime<Utc>>,
}

impl Allocation {
    /// 创建新的预留记录
    ///
    /// # 参数
    /// - `window_days`: 预留期限（天），deadline_at = now + window_days
    pub fn new_reserved(
        mandate_number_id: String,
        user_id: String,
        now: DateTime<Utc>,
        window_days: i64,
    ) -> Self {
        Self {
            allocation_id: Uuid::new_v4().to_string(),
            mandate_number_id,
            user_id,
            status: AllocationStatus::Reserved,
            reserved_at: now,
            deadline_at: now + Duration::days(window_days),
            signed_at: None,
            released_at: None,
            release_reason: None,
            draft_reminded_at: None,
            signed_reminded_at: None,
        }
    }

    /// 截止时间是否已过（严格小于）
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.deadline_at < now
    }

    /// 指定提醒是否已发送
    pub fn reminded_at(&self, kind: ReminderKind) -> Option<DateTime<Utc>> {
        match kind {
            ReminderKind::Draft => self.draft_reminded_at,
            ReminderKind::Signed => self.signed_reminded_at,
        }
    }
}

// ==========================================
// Deposit - 文件递交记录
// ==========================================
// 对齐: allocation_deposit 表
// 说明: 对象存储为外部协作方，这里只记录不透明的 storage_key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub deposit_id: String,
    pub allocation_id: String,
    pub kind: DepositKind,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl Deposit {
    pub fn new(
        allocation_id: String,
        kind: DepositKind,
        storage_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            deposit_id: Uuid::new_v4().to_string(),
            allocation_id,
            kind,
            storage_key,
            created_at: now,
        }
    }

    /// 生成对象存储键
    ///
    /// 格式: "{code}/{draft|signed}-{毫秒时间戳}.pdf"
    pub fn storage_key_for(code: &str, kind: DepositKind, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}-{}.pdf",
            code,
            kind.to_db_str().to_lowercase(),
            now.timestamp_millis()
        )
    }
}

// ==========================================
// AllocationView - 分配列表视图
// ==========================================
// 用途: 经纪人“我的编号”/管理员列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationView {
    pub allocation: Allocation,
    pub code: String,
    pub deposits: Vec<Deposit>,
}
