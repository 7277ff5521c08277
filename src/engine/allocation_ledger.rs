// ==========================================
// 委托编号台账 - 分配台账
// ==========================================
// 职责: 预留 / 递交 / 回收 / 管理员操作 / 状态对账
// 流程: 事务内读取 → 状态机决策 (纯函数) → 写入指令落库
// 红线: 编号状态与分配状态在同一事务内变更
// 红线: 同一编号最多一条活动分配（部分唯一索引兜底）
// ==========================================

use crate::config::LedgerConfig;
use crate::db::normalize_ts;
use crate::domain::allocation::{Allocation, AllocationView, Deposit};
use crate::domain::ledger_log::LedgerLogEntry;
use crate::domain::ledger_write::LedgerWrite;
use crate::domain::mandate::{format_code, MandateNumber};
use crate::domain::types::{
    AllocationStatus, DepositKind, LedgerAction, MandateStatus, ReleaseReason, ReminderKind,
    UserRole,
};
use crate::domain::user::UserAccount;
use crate::engine::allocation_machine::{apply_event, plan_reservation, LedgerEvent, Transition};
use crate::engine::calendar::{anchor_window, checked_add_days, local_date};
use crate::engine::error::{LedgerError, LedgerResult};
use crate::engine::reconciliation::{plan_status_sync, SyncReport};
use crate::engine::sequence_pool::SequencePool;
use crate::perf::PerfGuard;
use crate::repository::{
    AllocationRepository, BeforeApplyHook, LedgerWriteRepository, MandateNumberRepository,
    NumberFilter, NumberPage, RepositoryError, UserAccountRepository,
};
use chrono::{DateTime, Datelike, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

// ==========================================
// 返回类型
// ==========================================

/// 预留结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub allocation: Allocation,
    pub number: MandateNumber,
}

/// 递交结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub allocation: Allocation,
    pub deposit: Deposit,
    pub code: String,
}

/// 回收结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    Released(Allocation),
    /// 已处于 RELEASED，无写入
    AlreadyReleased(Allocation),
}

impl ReleaseOutcome {
    pub fn allocation(&self) -> &Allocation {
        match self {
            ReleaseOutcome::Released(a) | ReleaseOutcome::AlreadyReleased(a) => a,
        }
    }

    pub fn was_released_now(&self) -> bool {
        matches!(self, ReleaseOutcome::Released(_))
    }
}

/// 管理员手工创建编号的参数（缺省字段自动推导）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNumber {
    pub year: Option<i32>,
    pub seq: Option<i32>,
    pub code: Option<String>,
}

// ==========================================
// AllocationLedger
// ==========================================
pub struct AllocationLedger {
    writes: LedgerWriteRepository,
    numbers: MandateNumberRepository,
    allocations: AllocationRepository,
    users: UserAccountRepository,
    pool: SequencePool,
    config: LedgerConfig,
}

impl AllocationLedger {
    pub fn new(conn: Arc<Mutex<Connection>>, config: LedgerConfig) -> Self {
        Self {
            writes: LedgerWriteRepository::from_connection(conn.clone()),
            numbers: MandateNumberRepository::from_connection(conn.clone()),
            allocations: AllocationRepository::from_connection(conn.clone()),
            users: UserAccountRepository::from_connection(conn),
            pool: SequencePool::from_config(&config),
            config,
        }
    }

    /// 注册落库前拦截，见 [`LedgerWriteRepository::set_before_apply`]
    pub fn with_before_apply(mut self, hook: BeforeApplyHook) -> Self {
        self.writes.set_before_apply(hook);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn pool(&self) -> SequencePool {
        self.pool
    }

    /// 预留编号所属年份（按配置偏移的本地日期）
    pub fn reservation_year(&self, now: DateTime<Utc>) -> i32 {
        local_date(now, self.config.utc_offset()).year()
    }

    /// 台账写事务（闭包内只能使用 `*_in` 读取）
    fn transact<T, F>(&self, now: DateTime<Utc>, decide: F) -> LedgerResult<T>
    where
        F: FnOnce(&Connection) -> LedgerResult<(T, Vec<LedgerWrite>)>,
    {
        self.writes.transact(now, decide)
    }

    // ==========================================
    // 身份
    // ==========================================

    pub fn find_user(&self, user_id: &str) -> LedgerResult<Option<UserAccount>> {
        Ok(self.users.find_by_id(user_id)?)
    }

    /// 解析启用中的用户
    pub fn require_user(&self, user_id: &str) -> LedgerResult<UserAccount> {
        let user = self
            .users
            .find_by_id(user_id)?
            .ok_or_else(|| LedgerError::not_found("UserAccount", user_id))?;
        if !user.active {
            return Err(LedgerError::Forbidden(format!("用户已停用: {}", user_id)));
        }
        Ok(user)
    }

    // ==========================================
    // 预留
    // ==========================================

    /// 经纪人预留下一个可用编号
    ///
    /// # 错误
    /// - Forbidden: 非 AGENT
    /// - NoAvailableNumber: 编号池补号失败
    /// - StoreConflict: 重试一次后仍冲突
    #[instrument(skip(self))]
    pub fn reserve(&self, user_id: &str, now: DateTime<Utc>) -> LedgerResult<Reservation> {
        let _perf = PerfGuard::new("reserve");
        let user = self.require_user(user_id)?;
        if user.role != UserRole::Agent {
            return Err(LedgerError::Forbidden(format!(
                "仅经纪人可预留编号: user_id={}, role={}",
                user.user_id, user.role
            )));
        }

        let now = normalize_ts(now);
        self.check_window(now)?;
        let year = self.reservation_year(now);
        let reservation = match self.try_reserve(&user.user_id, year, now) {
            Err(e) if e.is_store_conflict() => {
                warn!(user_id = %user.user_id, error = %e, "预留并发冲突，重试一次");
                self.try_reserve(&user.user_id, year, now)
            }
            other => other,
        }?;

        info!(
            user_id = %user.user_id,
            code = %reservation.number.code,
            allocation_id = %reservation.allocation.allocation_id,
            deadline_at = %reservation.allocation.deadline_at,
            "编号已预留"
        );
        Ok(reservation)
    }

    fn try_reserve(&self, user_id: &str, year: i32, now: DateTime<Utc>) -> LedgerResult<Reservation> {
        self.transact(now, |tx| {
            let number = self.pool.reserve_next(tx, year, now)?;
            let (allocation, writes) = plan_reservation(
                &number,
                user_id,
                now,
                self.config.reservation_window_days,
                LedgerAction::Reserve,
                user_id,
            );
            Ok((
                Reservation {
                    allocation,
                    number: claimed(number, now),
                },
                writes,
            ))
        })
    }

    /// 管理员将指定编号分配给经纪人
    ///
    /// # 错误
    /// - InvalidInput: 目标用户不是经纪人
    /// - InvalidTransition: 编号不是 AVAILABLE
    #[instrument(skip(self))]
    pub fn admin_allocate(
        &self,
        number_id: &str,
        user_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Reservation> {
        let target = self.require_user(user_id)?;
        if target.role != UserRole::Agent {
            return Err(LedgerError::InvalidInput(format!(
                "目标用户不是经纪人: {}",
                user_id
            )));
        }

        let now = normalize_ts(now);
        self.check_window(now)?;
        let reservation = self.transact(now, |tx| {
            let number = MandateNumberRepository::find_by_id_in(tx, number_id)?
                .ok_or_else(|| LedgerError::not_found("MandateNumber", number_id))?;
            if number.status != MandateStatus::Available {
                return Err(LedgerError::invalid_transition(number.status, "ADMIN_ALLOCATE"));
            }
            let (allocation, writes) = plan_reservation(
                &number,
                &target.user_id,
                now,
                self.config.reservation_window_days,
                LedgerAction::AdminAllocate,
                actor,
            );
            Ok((
                Reservation {
                    allocation,
                    number: claimed(number, now),
                },
                writes,
            ))
        })?;

        info!(code = %reservation.number.code, user_id, actor, "管理员已分配编号");
        Ok(reservation)
    }

    // ==========================================
    // 递交
    // ==========================================

    /// 按分配ID记录递交
    #[instrument(skip(self))]
    pub fn record_deposit(
        &self,
        allocation_id: &str,
        kind: DepositKind,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<DepositRecord> {
        let now = normalize_ts(now);
        self.transact(now, |tx| {
            let allocation = AllocationRepository::find_by_id_in(tx, allocation_id)?
                .ok_or_else(|| LedgerError::not_found("Allocation", allocation_id))?;
            let number = MandateNumberRepository::find_by_id_in(tx, &allocation.mandate_number_id)?
                .ok_or_else(|| {
                    LedgerError::not_found("MandateNumber", allocation.mandate_number_id.clone())
                })?;
            plan_deposit(&allocation, &number.code, kind, actor, now)
        })
    }

    /// 按编号 + 经纪人记录递交
    ///
    /// 取该经纪人在此编号上的活动分配；仅剩已回收分配时返回 InvalidTransition，
    /// 从未分配给该经纪人时返回 NotFound
    #[instrument(skip(self))]
    pub fn record_deposit_for_code(
        &self,
        code: &str,
        user_id: &str,
        kind: DepositKind,
        now: DateTime<Utc>,
    ) -> LedgerResult<DepositRecord> {
        let user = self.require_user(user_id)?;
        let now = normalize_ts(now);
        let record = self.transact(now, |tx| {
            let (allocation, code) =
                AllocationRepository::find_current_by_code_and_user_in(tx, code, &user.user_id)?
                    .ok_or_else(|| {
                        LedgerError::not_found("Allocation", format!("{} / {}", code, user.user_id))
                    })?;
            plan_deposit(&allocation, &code, kind, &user.user_id, now)
        })?;

        info!(
            code = %record.code,
            kind = %kind,
            status = %record.allocation.status,
            storage_key = %record.deposit.storage_key,
            "递交已记录"
        );
        Ok(record)
    }

    // ==========================================
    // 回收
    // ==========================================

    /// 回收分配（RESERVED/DRAFT → RELEASED）
    ///
    /// 已回收时返回 AlreadyReleased；并发冲突时重新读取后重试一次
    ///
    /// # 错误
    /// - InvalidTransition: 分配已 SIGNED
    #[instrument(skip(self))]
    pub fn release(
        &self,
        allocation_id: &str,
        reason: ReleaseReason,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReleaseOutcome> {
        let now = normalize_ts(now);
        let outcome = match self.try_release(allocation_id, reason, actor, now) {
            Err(e) if e.is_store_conflict() => {
                warn!(allocation_id, error = %e, "回收并发冲突，重新读取后重试");
                self.try_release(allocation_id, reason, actor, now)
            }
            other => other,
        }?;

        if outcome.was_released_now() {
            info!(allocation_id, reason = %reason, "分配已回收");
        }
        Ok(outcome)
    }

    fn try_release(
        &self,
        allocation_id: &str,
        reason: ReleaseReason,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReleaseOutcome> {
        self.transact(now, |tx| {
            let current = AllocationRepository::find_by_id_in(tx, allocation_id)?
                .ok_or_else(|| LedgerError::not_found("Allocation", allocation_id))?;
            let Transition {
                next,
                writes,
                changed,
                ..
            } = apply_event(&current, &LedgerEvent::Release { reason }, actor, now)?;
            if !changed {
                return Ok((ReleaseOutcome::AlreadyReleased(current), Vec::new()));
            }
            Ok((ReleaseOutcome::Released(next), writes))
        })
    }

    /// 管理员按编号回收其活动分配
    ///
    /// # 错误
    /// - NotFound: 编号不存在或无活动分配
    /// - InvalidTransition: 活动分配已 SIGNED
    #[instrument(skip(self))]
    pub fn admin_release_number(
        &self,
        number_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Allocation> {
        let now = normalize_ts(now);
        self.transact(now, |tx| {
            let current = AllocationRepository::find_active_by_number_in(tx, number_id)?
                .ok_or_else(|| LedgerError::not_found("ActiveAllocation", number_id))?;
            let t = apply_event(
                &current,
                &LedgerEvent::Release {
                    reason: ReleaseReason::AdminRelease,
                },
                actor,
                now,
            )?;
            Ok((t.next, t.writes))
        })
    }

    // ==========================================
    // 管理员强制改状态
    // ==========================================

    /// 强制修改分配状态并同步编号投影（不受状态图约束）
    ///
    /// # 错误
    /// - Conflict: 复活已回收分配时编号已有其他活动分配
    #[instrument(skip(self))]
    pub fn admin_override(
        &self,
        allocation_id: &str,
        status: AllocationStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Allocation> {
        let now = normalize_ts(now);
        let next = self.transact(now, |tx| {
            let current = AllocationRepository::find_by_id_in(tx, allocation_id)?
                .ok_or_else(|| LedgerError::not_found("Allocation", allocation_id))?;

            if !current.status.is_active() && status.is_active() {
                if let Some(other) =
                    AllocationRepository::find_active_by_number_in(tx, &current.mandate_number_id)?
                {
                    return Err(LedgerError::Conflict(format!(
                        "编号已有活动分配: {}",
                        other.allocation_id
                    )));
                }
            }

            let t = apply_event(&current, &LedgerEvent::AdminOverride { status }, actor, now)?;
            Ok((t.next, t.writes))
        })?;

        info!(allocation_id, status = %status, actor, "管理员已强制修改分配状态");
        Ok(next)
    }

    // ==========================================
    // 编号管理
    // ==========================================

    /// 手工创建编号
    ///
    /// 缺省 year → 当前年份；缺省 seq → max(seq)+1 或 start_seq；缺省 code → "<seq> M <yy>"
    ///
    /// # 错误
    /// - Conflict: code 或 (year, seq) 已存在
    #[instrument(skip(self))]
    pub fn create_number(
        &self,
        request: &NewNumber,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<MandateNumber> {
        let now = normalize_ts(now);
        let year = request.year.unwrap_or_else(|| self.reservation_year(now));
        if let Some(seq) = request.seq {
            if seq < 1 {
                return Err(LedgerError::InvalidInput(format!("seq 必须为正数: {}", seq)));
            }
        }

        let number = self.transact(now, |tx| {
            let seq = match request.seq {
                Some(seq) => seq,
                None => {
                    let max_seq = MandateNumberRepository::max_seq_in(tx, year)?;
                    self.pool.next_seq(max_seq).ok_or_else(|| {
                        LedgerError::InvalidInput(format!("年份 {} 的 seq 已溢出", year))
                    })?
                }
            };
            let code = match request.code.as_deref().map(str::trim) {
                Some(code) if !code.is_empty() => code.to_string(),
                _ => format_code(seq, year),
            };

            if MandateNumberRepository::find_by_code_in(tx, &code)?.is_some() {
                return Err(LedgerError::Conflict(format!("编号已存在: {}", code)));
            }

            let number = MandateNumber::with_code(year, seq, code, now);
            MandateNumberRepository::insert_in(tx, &number).map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(msg) => LedgerError::Conflict(format!(
                    "编号已存在: year={}, seq={} ({})",
                    year, seq, msg
                )),
                other => other.into(),
            })?;

            let log = LedgerLogEntry::new(LedgerAction::CreateNumber, actor, now)
                .with_number(&number.number_id)
                .with_detail(json!({ "code": number.code, "year": year, "seq": seq }));
            Ok((number, vec![LedgerWrite::AppendLog(log)]))
        })?;

        info!(code = %number.code, actor, "编号已创建");
        Ok(number)
    }

    /// 删除编号（存在任何分配引用时拒绝）
    #[instrument(skip(self))]
    pub fn delete_number(&self, number_id: &str, actor: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        let now = normalize_ts(now);
        self.transact(now, |tx| {
            let number = MandateNumberRepository::find_by_id_in(tx, number_id)?
                .ok_or_else(|| LedgerError::not_found("MandateNumber", number_id))?;
            let refs = AllocationRepository::count_by_number_in(tx, number_id)?;
            if refs > 0 {
                return Err(LedgerError::Conflict(format!(
                    "编号 {} 仍被 {} 条分配引用",
                    number.code, refs
                )));
            }
            MandateNumberRepository::delete_in(tx, number_id)?;

            let log = LedgerLogEntry::new(LedgerAction::DeleteNumber, actor, now)
                .with_number(number_id)
                .with_detail(json!({ "code": number.code }));
            Ok(((), vec![LedgerWrite::AppendLog(log)]))
        })
    }

    // ==========================================
    // 状态对账
    // ==========================================

    /// 按活动分配修正编号状态（幂等）
    #[instrument(skip(self))]
    pub fn sync_statuses(&self, actor: &str, now: DateTime<Utc>) -> LedgerResult<SyncReport> {
        let _perf = PerfGuard::new("sync_statuses");
        let now = normalize_ts(now);
        let report = self.transact(now, |tx| {
            let numbers = MandateNumberRepository::list_all_in(tx)?;
            let active = AllocationRepository::list_by_statuses_in(tx, &AllocationStatus::ACTIVE)?;
            let corrections = plan_status_sync(&numbers, &active);

            let mut writes = Vec::with_capacity(corrections.len() * 2);
            for c in &corrections {
                writes.push(LedgerWrite::SetNumberStatus {
                    number_id: c.number_id.clone(),
                    status: c.to,
                });
                let mut log = LedgerLogEntry::new(LedgerAction::SyncStatus, actor, now)
                    .with_number(&c.number_id)
                    .with_detail(json!({ "code": c.code, "from": c.from, "to": c.to }));
                if let Some(allocation_id) = &c.allocation_id {
                    log = log.with_allocation(allocation_id);
                }
                writes.push(LedgerWrite::AppendLog(log));
            }

            Ok((
                SyncReport {
                    checked: numbers.len(),
                    corrections,
                },
                writes,
            ))
        })?;

        info!(checked = report.checked, corrected = report.corrected(), "编号状态对账完成");
        Ok(report)
    }

    // ==========================================
    // 巡检支持
    // ==========================================

    fn reminder_window(&self, now: DateTime<Utc>) -> LedgerResult<(DateTime<Utc>, DateTime<Utc>)> {
        let days = self.config.reminder_after_days;
        anchor_window(normalize_ts(now), days, self.config.utc_offset()).ok_or_else(|| {
            LedgerError::InvalidInput(format!("reminder_after_days 超出日期范围: {}", days))
        })
    }

    /// 预留期限可表示（防止配置天数溢出）
    fn check_window(&self, now: DateTime<Utc>) -> LedgerResult<()> {
        let days = self.config.reservation_window_days;
        checked_add_days(now, days).map(|_| ()).ok_or_else(|| {
            LedgerError::InvalidInput(format!("reservation_window_days 超出日期范围: {}", days))
        })
    }

    pub fn expired_allocations(&self, now: DateTime<Utc>) -> LedgerResult<Vec<Allocation>> {
        Ok(self.allocations.list_expired(normalize_ts(now))?)
    }

    /// 预留恰好 reminder_after_days 个自然日、尚未提醒的 RESERVED 分配
    pub fn draft_reminder_candidates(&self, now: DateTime<Utc>) -> LedgerResult<Vec<Allocation>> {
        let (from, to) = self.reminder_window(now)?;
        Ok(self.allocations.list_draft_reminder_candidates(from, to)?)
    }

    /// 首个草稿递交恰好 reminder_after_days 个自然日、尚未提醒的 DRAFT 分配
    pub fn signed_reminder_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<(Allocation, DateTime<Utc>)>> {
        let (from, to) = self.reminder_window(now)?;
        Ok(self.allocations.list_signed_reminder_candidates(from, to)?)
    }

    /// 记录提醒已发送
    pub fn mark_reminded(
        &self,
        allocation_id: &str,
        kind: ReminderKind,
        actor: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let now = normalize_ts(now);
        let action = match kind {
            ReminderKind::Draft => LedgerAction::RemindDraft,
            ReminderKind::Signed => LedgerAction::RemindSigned,
        };
        self.transact(now, |_tx| {
            let writes = vec![
                LedgerWrite::MarkReminded {
                    allocation_id: allocation_id.to_string(),
                    kind,
                    at: now,
                },
                LedgerWrite::AppendLog(
                    LedgerLogEntry::new(action, actor, now).with_allocation(allocation_id),
                ),
            ];
            Ok(((), writes))
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_allocation(&self, allocation_id: &str) -> LedgerResult<Allocation> {
        self.allocations
            .find_by_id(allocation_id)?
            .ok_or_else(|| LedgerError::not_found("Allocation", allocation_id))
    }

    pub fn find_number(&self, number_id: &str) -> LedgerResult<MandateNumber> {
        self.numbers
            .find_by_id(number_id)?
            .ok_or_else(|| LedgerError::not_found("MandateNumber", number_id))
    }

    pub fn find_number_by_code(&self, code: &str) -> LedgerResult<MandateNumber> {
        self.numbers
            .find_by_code(code)?
            .ok_or_else(|| LedgerError::not_found("MandateNumber", code))
    }

    pub fn list_deposits(&self, allocation_id: &str) -> LedgerResult<Vec<Deposit>> {
        Ok(self.allocations.list_deposits(allocation_id)?)
    }

    /// 经纪人的未回收分配（最近预留在前）
    pub fn list_my_allocations(&self, user_id: &str) -> LedgerResult<Vec<AllocationView>> {
        Ok(self.allocations.list_views_by_user(user_id, false)?)
    }

    pub fn list_allocations(
        &self,
        status: Option<AllocationStatus>,
    ) -> LedgerResult<Vec<AllocationView>> {
        Ok(self.allocations.list_views(status)?)
    }

    pub fn list_numbers(&self, filter: &NumberFilter) -> LedgerResult<NumberPage> {
        Ok(self.numbers.list(filter)?)
    }
}

// ==========================================
// 辅助函数
// ==========================================

/// 被占用后的编号快照
fn claimed(mut number: MandateNumber, now: DateTime<Utc>) -> MandateNumber {
    number.status = MandateStatus::Reserved;
    number.updated_at = now;
    number
}

/// 规划一次递交
fn plan_deposit(
    allocation: &Allocation,
    code: &str,
    kind: DepositKind,
    actor: &str,
    now: DateTime<Utc>,
) -> LedgerResult<(DepositRecord, Vec<LedgerWrite>)> {
    let storage_key = Deposit::storage_key_for(code, kind, now);
    let t = apply_event(
        allocation,
        &LedgerEvent::Deposit { kind, storage_key },
        actor,
        now,
    )?;
    let deposit = t
        .deposit
        .ok_or_else(|| LedgerError::invalid_transition(allocation.status, "DEPOSIT"))?;
    Ok((
        DepositRecord {
            allocation: t.next,
            deposit,
            code: code.to_string(),
        },
        t.writes,
    ))
}
