// ==========================================
// 委托编号台账 - 应用层
// ==========================================
// 职责: 状态装配与每日定时巡检
// ==========================================

pub mod scheduler;
pub mod state;

// 重导出
pub use scheduler::{run_daily, DailyTrigger};
pub use state::{get_default_db_path, AppState};
