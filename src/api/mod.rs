// ==========================================
// 委托编号台账 - API 层
// ==========================================
// 职责: 面向调用方的业务接口（经纪人 / 管理员）
// ==========================================

pub mod admin_api;
pub mod error;
pub mod mandate_api;

// 重导出核心类型
pub use admin_api::AdminApi;
pub use error::{ApiError, ApiResult};
pub use mandate_api::{DepositReceipt, MandateApi, ReservationReceipt};
