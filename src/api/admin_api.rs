// ==========================================
// 委托编号台账 - 管理员 API
// ==========================================
// 职责: 编号维护 / 指定分配 / 强制改状态 / 巡检与对账 / 配置 / 审计日志
// 红线: 所有方法先校验调用方为 ADMIN
// ==========================================

use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::clock::Clock;
use crate::config::{ConfigField, ConfigManager, LedgerConfig};
use crate::domain::allocation::{Allocation, AllocationView};
use crate::domain::ledger_log::LedgerLogEntry;
use crate::domain::mandate::MandateNumber;
use crate::domain::types::{AllocationStatus, UserRole};
use crate::domain::user::Actor;
use crate::engine::{
    AllocationLedger, NewNumber, ReminderScheduler, Reservation, SweepReport, SyncReport,
};
use crate::repository::{LedgerLogRepository, NumberFilter, NumberPage};
use tracing::info;

pub struct AdminApi {
    ledger: Arc<AllocationLedger>,
    scheduler: Arc<ReminderScheduler>,
    logs: Arc<LedgerLogRepository>,
    config_manager: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
}

impl AdminApi {
    pub fn new(
        ledger: Arc<AllocationLedger>,
        scheduler: Arc<ReminderScheduler>,
        logs: Arc<LedgerLogRepository>,
        config_manager: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            logs,
            config_manager,
            clock,
        }
    }

    fn require_admin(actor: &Actor) -> ApiResult<()> {
        if actor.role != UserRole::Admin {
            return Err(ApiError::Forbidden(format!(
                "需要管理员权限: user_id={}",
                actor.user_id
            )));
        }
        Ok(())
    }

    // ==========================================
    // 编号
    // ==========================================

    pub fn list_numbers(&self, actor: &Actor, filter: &NumberFilter) -> ApiResult<NumberPage> {
        Self::require_admin(actor)?;
        Ok(self.ledger.list_numbers(filter)?)
    }

    /// 手工创建编号（year/seq/code 可缺省）
    pub fn create_number(&self, actor: &Actor, request: &NewNumber) -> ApiResult<MandateNumber> {
        Self::require_admin(actor)?;
        Ok(self
            .ledger
            .create_number(request, &actor.user_id, self.clock.now())?)
    }

    /// 删除未被引用的编号
    pub fn delete_number(&self, actor: &Actor, number_id: &str) -> ApiResult<()> {
        Self::require_admin(actor)?;
        Ok(self
            .ledger
            .delete_number(number_id, &actor.user_id, self.clock.now())?)
    }

    /// 将指定编号分配给经纪人
    pub fn allocate(&self, actor: &Actor, number_id: &str, user_id: &str) -> ApiResult<Reservation> {
        Self::require_admin(actor)?;
        Ok(self
            .ledger
            .admin_allocate(number_id, user_id, &actor.user_id, self.clock.now())?)
    }

    /// 回收编号上的活动分配
    pub fn release_number(&self, actor: &Actor, number_id: &str) -> ApiResult<Allocation> {
        Self::require_admin(actor)?;
        Ok(self
            .ledger
            .admin_release_number(number_id, &actor.user_id, self.clock.now())?)
    }

    // ==========================================
    // 分配
    // ==========================================

    pub fn list_allocations(
        &self,
        actor: &Actor,
        status: Option<AllocationStatus>,
    ) -> ApiResult<Vec<AllocationView>> {
        Self::require_admin(actor)?;
        Ok(self.ledger.list_allocations(status)?)
    }

    /// 强制修改分配状态
    pub fn override_status(
        &self,
        actor: &Actor,
        allocation_id: &str,
        status: AllocationStatus,
    ) -> ApiResult<Allocation> {
        Self::require_admin(actor)?;
        Ok(self
            .ledger
            .admin_override(allocation_id, status, &actor.user_id, self.clock.now())?)
    }

    // ==========================================
    // 巡检与对账
    // ==========================================

    pub async fn run_sweep_once(&self, actor: &Actor) -> ApiResult<SweepReport> {
        Self::require_admin(actor)?;
        info!(actor = %actor.user_id, "管理员手动触发巡检");
        Ok(self.scheduler.run_sweep_once(self.clock.now()).await)
    }

    pub fn sync_statuses(&self, actor: &Actor) -> ApiResult<SyncReport> {
        Self::require_admin(actor)?;
        Ok(self.ledger.sync_statuses(&actor.user_id, self.clock.now())?)
    }

    // ==========================================
    // 审计日志
    // ==========================================

    pub fn list_logs(&self, actor: &Actor, allocation_id: Option<&str>) -> ApiResult<Vec<LedgerLogEntry>> {
        Self::require_admin(actor)?;
        let logs = match allocation_id {
            Some(id) => self.logs.list_by_allocation(id)?,
            None => self.logs.list_recent(100)?,
        };
        Ok(logs)
    }

    // ==========================================
    // 配置（重启后生效）
    // ==========================================

    pub fn get_config_snapshot(&self, actor: &Actor) -> ApiResult<String> {
        Self::require_admin(actor)?;
        self.config_manager
            .get_config_snapshot()
            .map_err(|e| ApiError::DatabaseError(e.to_string()))
    }

    /// 写入全局配置项（先按字段规则校验）
    pub fn set_config(&self, actor: &Actor, key: &str, value: &str) -> ApiResult<()> {
        Self::require_admin(actor)?;
        let field = ConfigField::ALL
            .into_iter()
            .find(|f| f.kv_key() == key)
            .ok_or_else(|| ApiError::InvalidInput(format!("未知配置项: {}", key)))?;

        LedgerConfig::default()
            .with_overrides(|f| (f == field).then(|| value.to_string()))
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

        self.config_manager
            .set_global_config_value(key, value.trim())
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        info!(actor = %actor.user_id, key, value, "配置已更新");
        Ok(())
    }
}
