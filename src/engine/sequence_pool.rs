// ==========================================
// 委托编号台账 - 编号池
// ==========================================
// 职责: 按年份提供 seq 最小的可分配编号，年份耗尽时自动补号
// 红线: 编号按 seq 升序发放；同一 (year, seq) 只存在一条
// 说明: 本模块只负责 “找到/补充” 编号，占用由调用方在同一事务内完成
// ==========================================

use crate::config::LedgerConfig;
use crate::domain::ledger_log::LedgerLogEntry;
use crate::domain::mandate::MandateNumber;
use crate::domain::types::LedgerAction;
use crate::domain::user::SYSTEM_ACTOR;
use crate::engine::error::{LedgerError, LedgerResult};
use crate::repository::ledger_log_repo::LedgerLogRepository;
use crate::repository::mandate_number_repo::MandateNumberRepository;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, instrument};

// ==========================================
// SequencePool - 编号池
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct SequencePool {
    start_seq: i32,
    batch_size: i32,
}

impl SequencePool {
    pub fn new(start_seq: i32, batch_size: i32) -> Self {
        Self {
            start_seq,
            batch_size,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.start_seq, config.batch_size)
    }

    pub fn start_seq(&self) -> i32 {
        self.start_seq
    }

    pub fn batch_size(&self) -> i32 {
        self.batch_size
    }

    /// 下一个 seq: max(seq)+1，空年份从 start_seq 开始
    pub fn next_seq(&self, max_seq: Option<i32>) -> Option<i32> {
        match max_seq {
            Some(max) => max.checked_add(1),
            None => Some(self.start_seq),
        }
    }

    /// 规划一批连续编号（纯函数）
    ///
    /// # 返回
    /// - 空列表: 批量大小非正或 seq 溢出
    pub fn plan_batch(
        &self,
        year: i32,
        max_seq: Option<i32>,
        count: i32,
        now: DateTime<Utc>,
    ) -> Vec<MandateNumber> {
        let first = match self.next_seq(max_seq) {
            Some(first) => first,
            None => return Vec::new(),
        };
        if count <= 0 || first.checked_add(count - 1).is_none() {
            return Vec::new();
        }
        (first..first + count)
            .map(|seq| MandateNumber::new_available(year, seq, now))
            .collect()
    }

    /// 取 seq 最小的 AVAILABLE 编号；没有则补号一批后重试
    ///
    /// 须在写事务内调用，返回的编号尚未被占用
    ///
    /// # 错误
    /// - NoAvailableNumber: 补号失败（批量为空或未插入任何编号）
    #[instrument(skip(self, conn))]
    pub fn reserve_next(
        &self,
        conn: &Connection,
        year: i32,
        now: DateTime<Utc>,
    ) -> LedgerResult<MandateNumber> {
        if let Some(number) = MandateNumberRepository::find_lowest_available_in(conn, year)? {
            return Ok(number);
        }

        let inserted = self.seed_batch(conn, year, self.batch_size, now)?;
        if inserted == 0 {
            return Err(LedgerError::NoAvailableNumber {
                year,
                reason: "补号未插入任何编号".to_string(),
            });
        }

        MandateNumberRepository::find_lowest_available_in(conn, year)?.ok_or_else(|| {
            LedgerError::NoAvailableNumber {
                year,
                reason: "补号后仍无可用编号".to_string(),
            }
        })
    }

    /// 在年份末尾追加 count 个编号，返回实际插入数
    pub fn seed_batch(
        &self,
        conn: &Connection,
        year: i32,
        count: i32,
        now: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let max_seq = MandateNumberRepository::max_seq_in(conn, year)?;
        let batch = self.plan_batch(year, max_seq, count, now);
        let (first, last) = match (batch.first(), batch.last()) {
            (Some(first), Some(last)) => (first.seq, last.seq),
            _ => return Ok(0),
        };

        let inserted = MandateNumberRepository::insert_batch_ignore_existing_in(conn, &batch)?;
        LedgerLogRepository::insert_in(
            conn,
            &LedgerLogEntry::new(LedgerAction::SeedBatch, SYSTEM_ACTOR, now).with_detail(json!({
                "year": year,
                "from_seq": first,
                "to_seq": last,
                "inserted": inserted,
            })),
        )?;
        info!(year, from_seq = first, to_seq = last, inserted, "编号池补号完成");
        Ok(inserted)
    }

    /// 从 start_seq 起确保年份内至少有 [start_seq, start_seq + count) 的编号
    ///
    /// 已存在的编号跳过，可重复执行
    pub fn ensure_seeded(
        &self,
        conn: &Connection,
        year: i32,
        count: i32,
        now: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        if count <= 0 {
            return Ok(0);
        }
        let end = self
            .start_seq
            .checked_add(count)
            .ok_or_else(|| LedgerError::InvalidInput(format!("seq 溢出: count={}", count)))?;
        let batch: Vec<_> = (self.start_seq..end)
            .map(|seq| MandateNumber::new_available(year, seq, now))
            .collect();
        let inserted = MandateNumberRepository::insert_batch_ignore_existing_in(conn, &batch)?;
        if inserted > 0 {
            LedgerLogRepository::insert_in(
                conn,
                &LedgerLogEntry::new(LedgerAction::SeedBatch, SYSTEM_ACTOR, now).with_detail(
                    json!({
                        "year": year,
                        "from_seq": self.start_seq,
                        "to_seq": end - 1,
                        "inserted": inserted,
                    }),
                ),
            )?;
        }
        Ok(inserted)
    }
}

impl Default for SequencePool {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_plan_batch_from_start_seq() {
        let pool = SequencePool::new(460, 100);
        let batch = pool.plan_batch(2025, None, 100, now());
        assert_eq!(batch.len(), 100);
        assert_eq!(batch[0].code, "460 M 25");
        assert_eq!(batch[99].code, "559 M 25");
    }

    #[test]
    fn test_plan_batch_continues_after_max() {
        let pool = SequencePool::new(460, 3);
        let batch = pool.plan_batch(2025, Some(700), 3, now());
        let seqs: Vec<_> = batch.iter().map(|n| n.seq).collect();
        assert_eq!(seqs, vec![701, 702, 703]);

        assert!(pool.plan_batch(2025, Some(i32::MAX), 3, now()).is_empty());
        assert!(pool.plan_batch(2025, None, 0, now()).is_empty());
    }

    #[test]
    fn test_reserve_next_seeds_empty_year() {
        let conn = open_in_memory().unwrap();
        let pool = SequencePool::new(460, 100);

        let n = pool.reserve_next(&conn, 2025, now()).unwrap();
        assert_eq!(n.code, "460 M 25");
        assert_eq!(MandateNumberRepository::max_seq_in(&conn, 2025).unwrap(), Some(559));
    }

    #[test]
    fn test_reserve_next_prefers_lowest_available() {
        let conn = open_in_memory().unwrap();
        let pool = SequencePool::new(460, 5);
        pool.ensure_seeded(&conn, 2025, 5, now()).unwrap();
        conn.execute(
            "UPDATE mandate_number SET status = 'RESERVED' WHERE seq IN (460, 461)",
            [],
        )
        .unwrap();

        let n = pool.reserve_next(&conn, 2025, now()).unwrap();
        assert_eq!(n.seq, 462);
    }

    #[test]
    fn test_reserve_next_fails_when_batch_is_empty() {
        let conn = open_in_memory().unwrap();
        let pool = SequencePool::new(460, 0);
        let err = pool.reserve_next(&conn, 2025, now()).unwrap_err();
        assert!(matches!(err, LedgerError::NoAvailableNumber { year: 2025, .. }));
    }

    #[test]
    fn test_ensure_seeded_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let pool = SequencePool::new(460, 100);
        assert_eq!(pool.ensure_seeded(&conn, 2025, 200, now()).unwrap(), 200);
        assert_eq!(pool.ensure_seeded(&conn, 2025, 200, now()).unwrap(), 0);
        assert_eq!(MandateNumberRepository::max_seq_in(&conn, 2025).unwrap(), Some(659));
    }
}
