// ==========================================
// 委托编号台账 - 编号状态对账
// ==========================================
// 规则:
// - 有活动分配的编号 → 状态等于分配状态的投影
// - 无活动分配的 RESERVED/SIGNED 编号 → AVAILABLE
// 性质: 幂等、收敛（执行一次后再次规划结果为空）
// ==========================================

use crate::domain::allocation::Allocation;
use crate::domain::mandate::MandateNumber;
use crate::domain::types::MandateStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 单条编号状态修正
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCorrection {
    pub number_id: String,
    pub code: String,
    pub from: MandateStatus,
    pub to: MandateStatus,
    pub allocation_id: Option<String>,
}

/// 对账结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub checked: usize,
    pub corrections: Vec<StatusCorrection>,
}

impl SyncReport {
    pub fn corrected(&self) -> usize {
        self.corrections.len()
    }
}

/// 规划对账修正（纯函数）
///
/// # 参数
/// - `numbers`: 全部编号
/// - `active`: 全部活动分配（RESERVED/DRAFT/SIGNED）
pub fn plan_status_sync(numbers: &[MandateNumber], active: &[Allocation]) -> Vec<StatusCorrection> {
    // 同一编号理论上至多一条活动分配；若出现多条取最近预留的一条
    let mut by_number: HashMap<&str, &Allocation> = HashMap::new();
    for allocation in active.iter().filter(|a| a.status.is_active()) {
        by_number
            .entry(allocation.mandate_number_id.as_str())
            .and_modify(|existing| {
                if allocation.reserved_at > existing.reserved_at {
                    *existing = allocation;
                }
            })
            .or_insert(allocation);
    }

    numbers
        .iter()
        .filter_map(|number| {
            let owner = by_number.get(number.number_id.as_str());
            let target = owner
                .map(|a| a.status.projected_number_status())
                .unwrap_or(MandateStatus::Available);
            if number.status == target {
                return None;
            }
            Some(StatusCorrection {
                number_id: number.number_id.clone(),
                code: number.code.clone(),
                from: number.status,
                to: target,
                allocation_id: owner.map(|a| a.allocation_id.clone()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::AllocationStatus;
    use chrono::{TimeZone, Utc};

    fn number(seq: i32, status: MandateStatus) -> MandateNumber {
        let mut n = MandateNumber::new_available(
            2025,
            seq,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        n.status = status;
        n
    }

    fn allocation(number: &MandateNumber, status: AllocationStatus) -> Allocation {
        let mut a = Allocation::new_reserved(
            number.number_id.clone(),
            "u1".into(),
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            7,
        );
        a.status = status;
        a
    }

    #[test]
    fn test_orphan_reserved_and_signed_become_available() {
        let numbers = vec![
            number(460, MandateStatus::Reserved),
            number(461, MandateStatus::Signed),
            number(462, MandateStatus::Available),
        ];
        let corrections = plan_status_sync(&numbers, &[]);
        assert_eq!(corrections.len(), 2);
        assert!(corrections.iter().all(|c| c.to == MandateStatus::Available));
    }

    #[test]
    fn test_active_allocation_forces_projection() {
        let n1 = number(460, MandateStatus::Available);
        let n2 = number(461, MandateStatus::Reserved);
        let n3 = number(462, MandateStatus::Reserved);
        let active = vec![
            allocation(&n1, AllocationStatus::Draft),
            allocation(&n2, AllocationStatus::Signed),
            allocation(&n3, AllocationStatus::Reserved),
        ];
        let corrections = plan_status_sync(&[n1.clone(), n2.clone(), n3], &active);
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].number_id, n1.number_id);
        assert_eq!(corrections[0].to, MandateStatus::Reserved);
        assert_eq!(corrections[1].number_id, n2.number_id);
        assert_eq!(corrections[1].to, MandateStatus::Signed);
    }

    #[test]
    fn test_plan_converges_after_apply() {
        let mut numbers = vec![
            number(460, MandateStatus::Signed),
            number(461, MandateStatus::Available),
        ];
        let active = vec![allocation(&numbers[1], AllocationStatus::Reserved)];

        for c in plan_status_sync(&numbers, &active) {
            if let Some(n) = numbers.iter_mut().find(|n| n.number_id == c.number_id) {
                n.status = c.to;
            }
        }
        assert!(plan_status_sync(&numbers, &active).is_empty());
    }
}
