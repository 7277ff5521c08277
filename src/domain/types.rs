// ==========================================
// 委托编号台账 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 编号状态 (Mandate Number Status)
// ==========================================
// 由分配状态投影而来，见 AllocationStatus::projected_number_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateStatus {
    Available, // 可分配
    Reserved,  // 已预留（含草稿已递交）
    Signed,    // 已签署
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl MandateStatus {
    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AVAILABLE" => Some(MandateStatus::Available),
            "RESERVED" => Some(MandateStatus::Reserved),
            "SIGNED" => Some(MandateStatus::Signed),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MandateStatus::Available => "AVAILABLE",
            MandateStatus::Reserved => "RESERVED",
            MandateStatus::Signed => "SIGNED",
        }
    }
}

// ==========================================
// 分配状态 (Allocation Status)
// ==========================================
// RESERVED → DRAFT → SIGNED; RESERVED/DRAFT → RELEASED（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Reserved, // 已预留，未递交
    Draft,    // 已递交草稿
    Signed,   // 已递交签署件（成功终态）
    Released, // 已回收（终态）
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl AllocationStatus {
    pub const ACTIVE: [AllocationStatus; 3] = [
        AllocationStatus::Reserved,
        AllocationStatus::Draft,
        AllocationStatus::Signed,
    ];

    pub const OPEN: [AllocationStatus; 2] = [AllocationStatus::Reserved, AllocationStatus::Draft];

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RESERVED" => Some(AllocationStatus::Reserved),
            "DRAFT" => Some(AllocationStatus::Draft),
            "SIGNED" => Some(AllocationStatus::Signed),
            "RELEASED" => Some(AllocationStatus::Released),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AllocationStatus::Reserved => "RESERVED",
            AllocationStatus::Draft => "DRAFT",
            AllocationStatus::Signed => "SIGNED",
            AllocationStatus::Released => "RELEASED",
        }
    }

    /// 是否占用编号（非 RELEASED）
    pub fn is_active(&self) -> bool {
        !matches!(self, AllocationStatus::Released)
    }

    /// 是否仍可递交/回收（RESERVED 或 DRAFT）
    pub fn is_open(&self) -> bool {
        matches!(self, AllocationStatus::Reserved | AllocationStatus::Draft)
    }

    /// 分配状态 → 编号状态的投影
    ///
    /// {RESERVED, DRAFT → RESERVED; SIGNED → SIGNED; RELEASED → AVAILABLE}
    pub fn projected_number_status(&self) -> MandateStatus {
        match self {
            AllocationStatus::Reserved | AllocationStatus::Draft => MandateStatus::Reserved,
            AllocationStatus::Signed => MandateStatus::Signed,
            AllocationStatus::Released => MandateStatus::Available,
        }
    }
}

// ==========================================
// 递交类型 (Deposit Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositKind {
    Draft,  // 草稿
    Signed, // 签署件
}

impl fmt::Display for DepositKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl DepositKind {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(DepositKind::Draft),
            "SIGNED" => Some(DepositKind::Signed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            DepositKind::Draft => "DRAFT",
            DepositKind::Signed => "SIGNED",
        }
    }
}

// ==========================================
// 用户角色 (User Role)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin, // 管理员
    Agent, // 经纪人（可预留编号）
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl UserRole {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Some(UserRole::Admin),
            "AGENT" => Some(UserRole::Agent),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Agent => "AGENT",
        }
    }
}

// ==========================================
// 提醒类型 (Reminder Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderKind {
    Draft,  // 催递草稿（锚点: reserved_at）
    Signed, // 催递签署件（锚点: 首个草稿递交时间）
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderKind::Draft => write!(f, "DRAFT"),
            ReminderKind::Signed => write!(f, "SIGNED"),
        }
    }
}

// ==========================================
// 回收原因 (Release Reason)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    DeadlineExpired, // 到期自动回收
    AdminRelease,    // 管理员回收
    AdminOverride,   // 管理员强制改状态
    Manual,          // 协作方直接回收
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::DeadlineExpired => "deadline_expired",
            ReleaseReason::AdminRelease => "admin_release",
            ReleaseReason::AdminOverride => "admin_override",
            ReleaseReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 台账操作类型 (Ledger Action)
// ==========================================
// 用途: ledger_log 审计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAction {
    Reserve,        // 预留
    AdminAllocate,  // 管理员指定分配
    DepositDraft,   // 递交草稿
    DepositSigned,  // 递交签署件
    Release,        // 回收
    AdminOverride,  // 管理员强制改状态
    SyncStatus,     // 状态对账修正
    SeedBatch,      // 批量生成编号
    CreateNumber,   // 手工创建编号
    DeleteNumber,   // 删除编号
    RemindDraft,    // 草稿提醒已发送
    RemindSigned,   // 签署提醒已发送
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::Reserve => "RESERVE",
            LedgerAction::AdminAllocate => "ADMIN_ALLOCATE",
            LedgerAction::DepositDraft => "DEPOSIT_DRAFT",
            LedgerAction::DepositSigned => "DEPOSIT_SIGNED",
            LedgerAction::Release => "RELEASE",
            LedgerAction::AdminOverride => "ADMIN_OVERRIDE",
            LedgerAction::SyncStatus => "SYNC_STATUS",
            LedgerAction::SeedBatch => "SEED_BATCH",
            LedgerAction::CreateNumber => "CREATE_NUMBER",
            LedgerAction::DeleteNumber => "DELETE_NUMBER",
            LedgerAction::RemindDraft => "REMIND_DRAFT",
            LedgerAction::RemindSigned => "REMIND_SIGNED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        let action = match s {
            "RESERVE" => LedgerAction::Reserve,
            "ADMIN_ALLOCATE" => LedgerAction::AdminAllocate,
            "DEPOSIT_DRAFT" => LedgerAction::DepositDraft,
            "DEPOSIT_SIGNED" => LedgerAction::DepositSigned,
            "RELEASE" => LedgerAction::Release,
            "ADMIN_OVERRIDE" => LedgerAction::AdminOverride,
            "SYNC_STATUS" => LedgerAction::SyncStatus,
            "SEED_BATCH" => LedgerAction::SeedBatch,
            "CREATE_NUMBER" => LedgerAction::CreateNumber,
            "DELETE_NUMBER" => LedgerAction::DeleteNumber,
            "REMIND_DRAFT" => LedgerAction::RemindDraft,
            "REMIND_SIGNED" => LedgerAction::RemindSigned,
            _ => return None,
        };
        Some(action)
    }
}
