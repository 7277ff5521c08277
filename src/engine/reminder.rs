// ==========================================
// 委托编号台账 - 每日巡检
// ==========================================
// 步骤: 到期回收 → 草稿提醒 → 签署提醒
// 红线: 单条分配失败只记录，不中断巡检
// 红线: 提醒先发送后标记；发送失败不标记，计入报告
// ==========================================

use crate::db::normalize_ts;
use crate::domain::allocation::Allocation;
use crate::domain::types::{ReleaseReason, ReminderKind};
use crate::domain::user::SYSTEM_ACTOR;
use crate::engine::allocation_ledger::{AllocationLedger, ReleaseOutcome};
use crate::notify::{NotificationParams, NotificationSender, NotificationTemplate, Recipient};
use crate::perf::PerfGuard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// ==========================================
// 巡检报告
// ==========================================

/// 失败发生的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepStep {
    /// 查询候选集合失败
    Scan,
    Expire,
    /// 到期通知（回收已保留）
    ExpiryNotice,
    DraftReminder,
    SignedReminder,
}

impl fmt::Display for SweepStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SweepStep::Scan => "scan",
            SweepStep::Expire => "expire",
            SweepStep::ExpiryNotice => "expiry_notice",
            SweepStep::DraftReminder => "draft_reminder",
            SweepStep::SignedReminder => "signed_reminder",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub allocation_id: Option<String>,
    pub step: SweepStep,
    pub error: String,
}

/// 巡检处理过的分配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub allocation_id: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// 到期回收
    pub released: Vec<SweepEntry>,
    pub draft_reminders: Vec<SweepEntry>,
    pub signed_reminders: Vec<SweepEntry>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn fail(&mut self, allocation_id: Option<&str>, step: SweepStep, error: impl ToString) {
        let error = error.to_string();
        error!(allocation_id = ?allocation_id, step = %step, error = %error, "巡检单项失败");
        self.failures.push(SweepFailure {
            allocation_id: allocation_id.map(str::to_string),
            step,
            error,
        });
    }

    pub fn failures_at(&self, step: SweepStep) -> usize {
        self.failures.iter().filter(|f| f.step == step).count()
    }

    /// 本次巡检回收的分配 ID
    pub fn released_ids(&self) -> Vec<&str> {
        self.released.iter().map(|e| e.allocation_id.as_str()).collect()
    }
}

// ==========================================
// ReminderScheduler
// ==========================================
pub struct ReminderScheduler {
    ledger: Arc<AllocationLedger>,
    sender: Arc<dyn NotificationSender>,
}

impl ReminderScheduler {
    pub fn new(ledger: Arc<AllocationLedger>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { ledger, sender }
    }

    /// 执行一次巡检
    ///
    /// 总是完成并返回报告，单项错误计入 `failures`
    #[instrument(skip(self))]
    pub async fn run_sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let _perf = PerfGuard::timing_only("sweep");
        let now = normalize_ts(now);
        let mut report = SweepReport::default();

        self.expire_overdue(now, &mut report).await;
        self.send_reminders(ReminderKind::Draft, now, &mut report).await;
        self.send_reminders(ReminderKind::Signed, now, &mut report).await;

        info!(
            released = report.released.len(),
            draft_reminders = report.draft_reminders.len(),
            signed_reminders = report.signed_reminders.len(),
            failures = report.failures.len(),
            "巡检完成"
        );
        report
    }

    // ==========================================
    // 到期回收
    // ==========================================

    async fn expire_overdue(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let expired = match self.ledger.expired_allocations(now) {
            Ok(list) => list,
            Err(e) => {
                report.fail(None, SweepStep::Scan, e);
                return;
            }
        };

        for allocation in expired {
            let id = allocation.allocation_id.as_str();
            // 编号被分配引用时不可删除，回收前解析即可
            let code = match self.code_of(&allocation) {
                Ok(code) => code,
                Err(e) => {
                    report.fail(Some(id), SweepStep::Expire, e);
                    continue;
                }
            };
            match self
                .ledger
                .release(id, ReleaseReason::DeadlineExpired, SYSTEM_ACTOR, now)
            {
                Ok(ReleaseOutcome::Released(released)) => {
                    report.released.push(SweepEntry {
                        allocation_id: id.to_string(),
                        code: code.clone(),
                    });
                    if let Err(e) = self
                        .notify(&released, &code, NotificationTemplate::MandateExpired, false)
                        .await
                    {
                        warn!(allocation_id = id, error = %e, "到期通知发送失败，回收保留");
                        report.fail(Some(id), SweepStep::ExpiryNotice, e);
                    }
                }
                // 并发回收（API/管理员）已完成
                Ok(ReleaseOutcome::AlreadyReleased(_)) => {}
                Err(e) => report.fail(Some(id), SweepStep::Expire, e),
            }
        }
    }

    // ==========================================
    // 提醒
    // ==========================================

    async fn send_reminders(&self, kind: ReminderKind, now: DateTime<Utc>, report: &mut SweepReport) {
        let (step, template) = match kind {
            ReminderKind::Draft => (SweepStep::DraftReminder, NotificationTemplate::DraftReminder),
            ReminderKind::Signed => (SweepStep::SignedReminder, NotificationTemplate::SignedReminder),
        };

        let candidates = match kind {
            ReminderKind::Draft => self.ledger.draft_reminder_candidates(now),
            ReminderKind::Signed => self
                .ledger
                .signed_reminder_candidates(now)
                .map(|list| list.into_iter().map(|(a, _)| a).collect()),
        };
        let candidates = match candidates {
            Ok(list) => list,
            Err(e) => {
                report.fail(None, SweepStep::Scan, e);
                return;
            }
        };

        for allocation in candidates {
            let id = allocation.allocation_id.as_str();
            let code = match self.code_of(&allocation) {
                Ok(code) => code,
                Err(e) => {
                    report.fail(Some(id), step, e);
                    continue;
                }
            };
            if let Err(e) = self.notify(&allocation, &code, template, true).await {
                report.fail(Some(id), step, e);
                continue;
            }
            if let Err(e) = self.ledger.mark_reminded(id, kind, SYSTEM_ACTOR, now) {
                report.fail(Some(id), step, e);
                continue;
            }
            info!(allocation_id = id, code = %code, kind = %kind, "提醒已发送");
            let entry = SweepEntry {
                allocation_id: id.to_string(),
                code,
            };
            match kind {
                ReminderKind::Draft => report.draft_reminders.push(entry),
                ReminderKind::Signed => report.signed_reminders.push(entry),
            }
        }
    }

    fn code_of(&self, allocation: &Allocation) -> Result<String, String> {
        self.ledger
            .find_number(&allocation.mandate_number_id)
            .map(|n| n.code)
            .map_err(|e| e.to_string())
    }

    /// 解析收件人并发送
    async fn notify(
        &self,
        allocation: &Allocation,
        code: &str,
        template: NotificationTemplate,
        with_deadline: bool,
    ) -> Result<(), String> {
        let user = self
            .ledger
            .find_user(&allocation.user_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("用户不存在: {}", allocation.user_id))?;

        let mut params = NotificationParams::new(code);
        if with_deadline {
            params = params.with_deadline(allocation.deadline_at, self.ledger.config().utc_offset());
        }

        self.sender
            .send(&Recipient::from_user(&user), template, &params)
            .await
            .map_err(|e| e.to_string())
    }
}
