// ==========================================
// 委托编号台账 - 日历计算
// ==========================================
// 提醒按 “自然日” 计算，自然日由配置的 UTC 偏移确定
// ==========================================

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

/// 时间戳在指定偏移下的本地日期
pub fn local_date(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

/// 本地日期零点对应的 UTC 时刻
pub fn start_of_local_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::default());
    let utc_naive = local_midnight - Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(utc_naive, Utc)
}

/// 两个时刻之间相差的自然日数（later - earlier）
pub fn calendar_days_between(
    earlier: DateTime<Utc>,
    later: DateTime<Utc>,
    offset: FixedOffset,
) -> i64 {
    (local_date(later, offset) - local_date(earlier, offset)).num_days()
}

/// 锚点时间窗口: 本地日期恰为 now 之前 `days` 天的 [from, to)
///
/// `days` 超出日期可表示范围时返回 None
pub fn anchor_window(
    now: DateTime<Utc>,
    days: i64,
    offset: FixedOffset,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let anchor_day = local_date(now, offset).checked_sub_signed(Duration::try_days(days)?)?;
    let utc_naive = anchor_day
        .and_time(NaiveTime::default())
        .checked_sub_signed(Duration::seconds(offset.local_minus_utc() as i64))?;
    let from = DateTime::from_naive_utc_and_offset(utc_naive, Utc);
    Some((from, from.checked_add_signed(Duration::days(1))?))
}

/// `now + days` 天，溢出时返回 None
pub fn checked_add_days(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(Duration::try_days(days)?)
}

/// 锚点是否恰好在 `days` 个自然日之前
pub fn is_reminder_due(
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    days: i64,
    offset: FixedOffset,
) -> bool {
    calendar_days_between(anchor, now, offset) == days
}
