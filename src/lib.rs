// ==========================================
// 委托编号台账 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 委托编号分配 / 文件递交跟踪 / 到期自动回收
// ==========================================

// 初始化国际化系统（通知模板）
rust_i18n::i18n!("locales", fallback = "fr");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 状态机与业务规则
pub mod engine;

// 通知层 - 提醒/到期通知
pub mod notify;

// 配置层 - 系统配置
pub mod config;

// 时钟
pub mod clock;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 性能统计
pub mod perf;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 状态装配与定时调度
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AllocationStatus, DepositKind, LedgerAction, MandateStatus, ReleaseReason, ReminderKind,
    UserRole,
};

// 领域实体
pub use domain::{Actor, Allocation, Deposit, LedgerWrite, MandateNumber, UserAccount};

// 引擎
pub use engine::{
    AllocationLedger, LedgerError, LedgerResult, ReminderScheduler, SequencePool, SweepReport,
    SyncReport,
};

// 配置
pub use config::LedgerConfig;

// 时钟
pub use clock::{Clock, ManualClock, SystemClock};

// API
pub use api::{AdminApi, ApiError, ApiResult, DepositReceipt, MandateApi, ReservationReceipt};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "委托编号台账";
