// ==========================================
// 委托编号台账 - 经纪人 API
// ==========================================
// 职责: 预留 / 递交 / 回收 / 巡检触发 / 对账 / 我的委托
// ==========================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::clock::Clock;
use crate::domain::allocation::AllocationView;
use crate::domain::types::{AllocationStatus, DepositKind, ReleaseReason};
use crate::domain::user::SYSTEM_ACTOR;
use crate::engine::{AllocationLedger, ReminderScheduler, SweepReport, SyncReport};

// ==========================================
// 响应类型
// ==========================================

/// 预留回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReceipt {
    pub allocation_id: String,
    pub code: String,
    pub deadline_at: DateTime<Utc>,
}

/// 递交回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub allocation_id: String,
    pub code: String,
    pub kind: DepositKind,
    pub status: AllocationStatus,
    pub storage_key: String,
    pub deposited_at: DateTime<Utc>,
}

// ==========================================
// MandateApi
// ==========================================
pub struct MandateApi {
    ledger: Arc<AllocationLedger>,
    scheduler: Arc<ReminderScheduler>,
    clock: Arc<dyn Clock>,
}

impl MandateApi {
    pub fn new(
        ledger: Arc<AllocationLedger>,
        scheduler: Arc<ReminderScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            clock,
        }
    }

    /// 预留下一个编号
    ///
    /// # 返回
    /// - Ok(ReservationReceipt): 编号与截止时间
    /// - Err(ApiError::Forbidden): 调用方不是经纪人
    pub fn reserve(&self, user_id: &str, now: DateTime<Utc>) -> ApiResult<ReservationReceipt> {
        if user_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("用户ID不能为空".to_string()));
        }
        let r = self.ledger.reserve(user_id, now)?;
        Ok(ReservationReceipt {
            allocation_id: r.allocation.allocation_id,
            code: r.number.code,
            deadline_at: r.allocation.deadline_at,
        })
    }

    /// 记录递交（草稿或签署件）
    pub fn record_deposit(
        &self,
        code: &str,
        user_id: &str,
        kind: DepositKind,
        now: DateTime<Utc>,
    ) -> ApiResult<DepositReceipt> {
        if code.trim().is_empty() {
            return Err(ApiError::InvalidInput("编号不能为空".to_string()));
        }
        let d = self
            .ledger
            .record_deposit_for_code(code.trim(), user_id, kind, now)?;
        Ok(DepositReceipt {
            allocation_id: d.allocation.allocation_id,
            code: d.code,
            kind,
            status: d.allocation.status,
            storage_key: d.deposit.storage_key,
            deposited_at: d.deposit.created_at,
        })
    }

    /// 回收分配（幂等）
    pub fn release(&self, allocation_id: &str, now: DateTime<Utc>) -> ApiResult<()> {
        self.ledger
            .release(allocation_id, ReleaseReason::Manual, SYSTEM_ACTOR, now)?;
        Ok(())
    }

    /// 手动触发一次巡检
    pub async fn run_sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        self.scheduler.run_sweep_once(now).await
    }

    /// 编号状态对账
    pub fn sync_statuses(&self) -> ApiResult<SyncReport> {
        Ok(self.ledger.sync_statuses(SYSTEM_ACTOR, self.clock.now())?)
    }

    /// 我的委托（未回收，最近在前，附递交记录）
    pub fn list_my_allocations(&self, user_id: &str) -> ApiResult<Vec<AllocationView>> {
        Ok(self.ledger.list_my_allocations(user_id)?)
    }
}
