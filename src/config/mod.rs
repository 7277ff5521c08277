// ==========================================
// 委托编号台账 - 配置层
// ==========================================
// 职责: 系统配置管理，支持多级覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod ledger_config;

pub use config_manager::ConfigManager;
pub use ledger_config::{ConfigError, ConfigField, LedgerConfig};
