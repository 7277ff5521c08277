// ==========================================
// 委托编号台账 - 委托编号领域模型
// ==========================================
// 编号格式: "<seq> M <yy>"，例如 "460 M 25"
// 约束: (year, seq) 唯一，code 由 (seq, year) 确定性派生
// ==========================================

use crate::domain::types::MandateStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// MandateNumber - 委托编号
// ==========================================
// 对齐: mandate_number 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateNumber {
    pub number_id: String,     // 主键
    pub code: String,          // 展示编号 "<seq> M <yy>"
    pub year: i32,             // 年份（四位）
    pub seq: i32,              // 年内序号（单调递增）
    pub status: MandateStatus, // 编号状态（分配状态的投影）
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MandateNumber {
    /// 创建新的可分配编号
    pub fn new_available(year: i32, seq: i32, now: DateTime<Utc>) -> Self {
        Self::with_code(year, seq, format_code(seq, year), now)
    }

    /// 使用指定展示编号创建（管理员手工创建时允许自定义 code）
    pub fn with_code(year: i32, seq: i32, code: String, now: DateTime<Utc>) -> Self {
        Self {
            number_id: Uuid::new_v4().to_string(),
            code,
            year,
            seq,
            status: MandateStatus::Available,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == MandateStatus::Available
    }
}

/// 由 (seq, year) 生成展示编号
///
/// # 示例
/// - (460, 2025) → "460 M 25"
/// - (7, 2009) → "7 M 09"
pub fn format_code(seq: i32, year: i32) -> String {
    format!("{} M {:02}", seq, year.rem_euclid(100))
}

/// 解析展示编号，返回 (seq, 两位年份)
pub fn parse_code(code: &str) -> Option<(i32, i32)> {
    let mut parts = code.split_whitespace();
    let seq = parts.next()?.parse::<i32>().ok()?;
    if parts.next()? != "M" {
        return None;
    }
    let yy_raw = parts.next()?;
    if yy_raw.len() != 2 {
        return None;
    }
    let yy = yy_raw.parse::<i32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((seq, yy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_code() {
        assert_eq!(format_code(460, 2025), "460 M 25");
        assert_eq!(format_code(559, 2025), "559 M 25");
        assert_eq!(format_code(7, 2009), "7 M 09");
        assert_eq!(format_code(1, 2100), "1 M 00");
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("460 M 25"), Some((460, 25)));
        assert_eq!(parse_code("7 M 09"), Some((7, 9)));
        assert_eq!(parse_code("460 X 25"), None);
        assert_eq!(parse_code("460 M 2025"), None);
        assert_eq!(parse_code("460 M 25 extra"), None);
        assert_eq!(parse_code(""), None);
    }

    #[test]
    fn test_new_available_derives_code() {
        let now = Utc::now();
        let n = MandateNumber::new_available(2025, 461, now);
        assert_eq!(n.code, "461 M 25");
        assert!(n.is_available());
    }
}
