// ==========================================
// 委托编号台账 - 台账配置
// ==========================================
// 层级: 默认值 → 环境变量 → config_kv (scope_id='global')
// ==========================================

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 天数类配置的上限（约十年）
pub const MAX_DAY_SPAN: i64 = 3650;

// ==========================================
// 配置字段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    StartSeq,
    BatchSize,
    ReservationWindowDays,
    ReminderAfterDays,
    SweepAt,
    UtcOffsetMinutes,
    NotifyLocale,
}

impl ConfigField {
    pub const ALL: [ConfigField; 7] = [
        ConfigField::StartSeq,
        ConfigField::BatchSize,
        ConfigField::ReservationWindowDays,
        ConfigField::ReminderAfterDays,
        ConfigField::SweepAt,
        ConfigField::UtcOffsetMinutes,
        ConfigField::NotifyLocale,
    ];

    /// 环境变量名
    pub fn env_var(&self) -> &'static str {
        match self {
            ConfigField::StartSeq => "START_SEQ",
            ConfigField::BatchSize => "SEED_BATCH",
            ConfigField::ReservationWindowDays => "RESERVATION_WINDOW_DAYS",
            ConfigField::ReminderAfterDays => "REMINDER_AFTER_DAYS",
            ConfigField::SweepAt => "SWEEP_AT",
            ConfigField::UtcOffsetMinutes => "SWEEP_UTC_OFFSET_MINUTES",
            ConfigField::NotifyLocale => "NOTIFY_LOCALE",
        }
    }

    /// config_kv 键名
    pub fn kv_key(&self) -> &'static str {
        match self {
            ConfigField::StartSeq => "start_seq",
            ConfigField::BatchSize => "seed_batch",
            ConfigField::ReservationWindowDays => "reservation_window_days",
            ConfigField::ReminderAfterDays => "reminder_after_days",
            ConfigField::SweepAt => "sweep_at",
            ConfigField::UtcOffsetMinutes => "sweep_utc_offset_minutes",
            ConfigField::NotifyLocale => "notify_locale",
        }
    }
}

/// 配置错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("配置项 {key} 的值无效: {value}")]
    InvalidValue { key: String, value: String },

    #[error("配置校验失败: {0}")]
    Validation(String),
}

// ==========================================
// LedgerConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub start_seq: i32,               // 空年份的首个 seq
    pub batch_size: i32,              // 每次补号数量
    pub reservation_window_days: i64, // 预留期限（天）
    pub reminder_after_days: i64,     // 提醒间隔（自然日）
    pub sweep_hour: u32,              // 每日巡检时刻
    pub sweep_minute: u32,
    pub utc_offset_minutes: i32,      // 巡检与自然日使用的 UTC 偏移
    pub locale: String,               // 通知语言
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            start_seq: 460,
            batch_size: 100,
            reservation_window_days: 7,
            reminder_after_days: 7,
            sweep_hour: 7,
            sweep_minute: 0,
            utc_offset_minutes: 0,
            locale: "fr".to_string(),
        }
    }
}

impl LedgerConfig {
    /// 从环境变量覆写默认值
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|field| std::env::var(field.env_var()).ok())
    }

    /// 用查找函数覆写各字段（返回 None 的字段保持原值）
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(ConfigField) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        for field in ConfigField::ALL {
            let raw = match lookup(field) {
                Some(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
                _ => continue,
            };
            self.apply(field, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn apply(&mut self, field: ConfigField, raw: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: field.kv_key().to_string(),
            value: raw.to_string(),
        };
        match field {
            ConfigField::StartSeq => self.start_seq = raw.parse().map_err(|_| invalid())?,
            ConfigField::BatchSize => self.batch_size = raw.parse().map_err(|_| invalid())?,
            ConfigField::ReservationWindowDays => {
                self.reservation_window_days = raw.parse().map_err(|_| invalid())?
            }
            ConfigField::ReminderAfterDays => {
                self.reminder_after_days = raw.parse().map_err(|_| invalid())?
            }
            ConfigField::SweepAt => {
                let (hour, minute) = parse_hh_mm(raw).ok_or_else(invalid)?;
                self.sweep_hour = hour;
                self.sweep_minute = minute;
            }
            ConfigField::UtcOffsetMinutes => {
                self.utc_offset_minutes = raw.parse().map_err(|_| invalid())?
            }
            ConfigField::NotifyLocale => self.locale = raw.to_lowercase(),
        }
        Ok(())
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_seq < 1 {
            return Err(ConfigError::Validation(format!(
                "start_seq 必须为正数: {}",
                self.start_seq
            )));
        }
        if self.batch_size < 1 {
            return Err(ConfigError::Validation(format!(
                "seed_batch 必须为正数: {}",
                self.batch_size
            )));
        }
        if self.reservation_window_days < 1 {
            return Err(ConfigError::Validation(format!(
                "reservation_window_days 必须为正数: {}",
                self.reservation_window_days
            )));
        }
        if self.reminder_after_days < 1 {
            return Err(ConfigError::Validation(format!(
                "reminder_after_days 必须为正数: {}",
                self.reminder_after_days
            )));
        }
        if self.reservation_window_days > MAX_DAY_SPAN {
            return Err(ConfigError::Validation(format!(
                "reservation_window_days 不得超过 {}: {}",
                MAX_DAY_SPAN, self.reservation_window_days
            )));
        }
        if self.reminder_after_days > MAX_DAY_SPAN {
            return Err(ConfigError::Validation(format!(
                "reminder_after_days 不得超过 {}: {}",
                MAX_DAY_SPAN, self.reminder_after_days
            )));
        }
        if self.sweep_hour > 23 || self.sweep_minute > 59 {
            return Err(ConfigError::Validation(format!(
                "sweep_at 超出范围: {:02}:{:02}",
                self.sweep_hour, self.sweep_minute
            )));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Validation(format!(
                "sweep_utc_offset_minutes 超出范围: {}",
                self.utc_offset_minutes
            )));
        }
        if !matches!(self.locale.as_str(), "fr" | "en") {
            return Err(ConfigError::Validation(format!(
                "notify_locale 仅支持 fr/en: {}",
                self.locale
            )));
        }
        Ok(())
    }

    /// 自然日/巡检使用的固定偏移
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// "HH:MM" 形式的巡检时刻
    pub fn sweep_at(&self) -> String {
        format!("{:02}:{:02}", self.sweep_hour, self.sweep_minute)
    }
}

/// 解析 "HH:MM"
fn parse_hh_mm(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(ConfigField, &str)]) -> impl Fn(ConfigField) -> Option<String> {
        let map: HashMap<ConfigField, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |field| map.get(&field).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.start_seq, 460);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.reservation_window_days, 7);
        assert_eq!(cfg.sweep_at(), "07:00");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_overrides_apply() {
        let cfg = LedgerConfig::default()
            .with_overrides(lookup_from(&[
                (ConfigField::StartSeq, "1"),
                (ConfigField::BatchSize, " 10 "),
                (ConfigField::SweepAt, "06:30"),
                (ConfigField::UtcOffsetMinutes, "60"),
                (ConfigField::NotifyLocale, "EN"),
            ]))
            .unwrap();
        assert_eq!(cfg.start_seq, 1);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!((cfg.sweep_hour, cfg.sweep_minute), (6, 30));
        assert_eq!(cfg.utc_offset().local_minus_utc(), 3600);
        assert_eq!(cfg.locale, "en");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = LedgerConfig::default()
            .with_overrides(lookup_from(&[(ConfigField::SweepAt, "25:00")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = LedgerConfig::default()
            .with_overrides(lookup_from(&[(ConfigField::BatchSize, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = LedgerConfig::default()
            .with_overrides(lookup_from(&[(ConfigField::StartSeq, "abc")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "start_seq".to_string(),
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_day_spans_are_bounded() {
        let err = LedgerConfig::default()
            .with_overrides(lookup_from(&[(ConfigField::ReminderAfterDays, "200000000000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = LedgerConfig::default()
            .with_overrides(lookup_from(&[(ConfigField::ReservationWindowDays, "3651")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let cfg = LedgerConfig {
            reservation_window_days: MAX_DAY_SPAN,
            reminder_after_days: MAX_DAY_SPAN,
            ..LedgerConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
