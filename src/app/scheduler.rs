// ==========================================
// 委托编号台账 - 每日定时触发
// ==========================================
// 每天在配置的本地时刻（默认 07:00）执行一次巡检
// 循环为串行: 本次巡检结束后再计算下一次触发时间
// ==========================================

use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::engine::calendar::{local_date, start_of_local_day};
use crate::engine::ReminderScheduler;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// 每日触发时刻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    hour: u32,
    minute: u32,
    offset: FixedOffset,
}

impl DailyTrigger {
    pub fn new(hour: u32, minute: u32, offset: FixedOffset) -> Self {
        Self {
            hour,
            minute,
            offset,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.sweep_hour, config.sweep_minute, config.utc_offset())
    }

    /// 严格晚于 now 的下一次触发时刻
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = |day| {
            start_of_local_day(day, self.offset)
                + Duration::hours(self.hour as i64)
                + Duration::minutes(self.minute as i64)
        };
        let today = local_date(now, self.offset);
        let candidate = at(today);
        if candidate > now {
            candidate
        } else {
            at(today + Duration::days(1))
        }
    }
}

/// 每日巡检循环，收到关闭信号后退出
pub async fn run_daily(
    scheduler: Arc<ReminderScheduler>,
    trigger: DailyTrigger,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = clock.now();
        let next = trigger.next_fire_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_fire_at = %next, "等待下一次巡检");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let report = scheduler.run_sweep_once(clock.now()).await;
                if !report.failures.is_empty() {
                    warn!(failures = report.failures.len(), "巡检存在失败项");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("每日巡检循环已退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::open_in_memory;
    use crate::engine::AllocationLedger;
    use crate::notify::LogOnlySender;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_next_fire_same_day() {
        let trigger = DailyTrigger::new(7, 0, utc());
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 5, 0, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(now),
            Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_fire_rolls_to_next_day() {
        let trigger = DailyTrigger::new(7, 0, utc());
        let at_seven = Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(at_seven),
            Utc.with_ymd_and_hms(2025, 3, 11, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_fire_respects_offset() {
        // 07:30 (UTC+2) == 05:30 UTC
        let trigger = DailyTrigger::new(7, 30, FixedOffset::east_opt(2 * 3600).unwrap());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(now),
            Utc.with_ymd_and_hms(2025, 6, 1, 5, 30, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_run_daily_stops_on_shutdown() {
        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        let ledger = Arc::new(AllocationLedger::new(conn, LedgerConfig::default()));
        let scheduler = Arc::new(ReminderScheduler::new(
            ledger,
            Arc::new(LogOnlySender::new("fr")),
        ));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap(),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_daily(
            scheduler,
            DailyTrigger::new(7, 0, utc()),
            clock,
            rx,
        ));
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
