// ==========================================
// 委托编号台账 - 应用状态
// ==========================================
// 职责: 打开数据库、装配仓储/引擎/API 实例
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{AdminApi, MandateApi};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigManager, LedgerConfig};
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::engine::{AllocationLedger, ReminderScheduler};
use crate::notify::{LogOnlySender, NotificationSender};
use crate::perf::install_sqlite_tracing;
use crate::repository::{LedgerLogRepository, UserAccountRepository};

/// 应用状态
///
/// 所有仓储共享同一个连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生效配置（默认值 → 环境变量 → config_kv）
    pub config: LedgerConfig,

    pub ledger: Arc<AllocationLedger>,
    pub scheduler: Arc<ReminderScheduler>,
    pub mandate_api: Arc<MandateApi>,
    pub admin_api: Arc<AdminApi>,

    /// 用户仓储（身份协作方）
    pub user_repo: Arc<UserAccountRepository>,

    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// 打开数据库并装配
    ///
    /// # 说明
    /// 1. 打开连接并应用 PRAGMA
    /// 2. 建表（幂等）
    /// 3. 叠加环境变量与 config_kv 得到配置
    /// 4. 使用 LogOnlySender 与系统时钟
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let mut conn =
            open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        ensure_schema(&conn).map_err(|e| format!("建表失败: {}", e))?;
        install_sqlite_tracing(&mut conn);
        let conn = Arc::new(Mutex::new(conn));

        let base = LedgerConfig::from_env().map_err(|e| format!("环境变量配置无效: {}", e))?;
        let config = ConfigManager::from_connection(conn.clone())
            .load_ledger_config(base)
            .map_err(|e| format!("加载配置失败: {}", e))?;
        tracing::info!(
            start_seq = config.start_seq,
            batch_size = config.batch_size,
            sweep_at = %config.sweep_at(),
            locale = %config.locale,
            "配置已加载"
        );

        let sender: Arc<dyn NotificationSender> = Arc::new(LogOnlySender::new(config.locale.clone()));
        let mut state = Self::from_parts(conn, config, sender, Arc::new(SystemClock));
        state.db_path = db_path;
        Ok(state)
    }

    /// 用给定连接/配置/协作方装配（测试注入）
    pub fn from_parts(
        conn: Arc<Mutex<Connection>>,
        config: LedgerConfig,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(AllocationLedger::new(conn.clone(), config.clone()));
        let scheduler = Arc::new(ReminderScheduler::new(ledger.clone(), sender));

        let mandate_api = Arc::new(MandateApi::new(
            ledger.clone(),
            scheduler.clone(),
            clock.clone(),
        ));
        let admin_api = Arc::new(AdminApi::new(
            ledger.clone(),
            scheduler.clone(),
            Arc::new(LedgerLogRepository::from_connection(conn.clone())),
            Arc::new(ConfigManager::from_connection(conn.clone())),
            clock.clone(),
        ));

        Self {
            db_path: String::new(),
            config,
            ledger,
            scheduler,
            mandate_api,
            admin_api,
            user_repo: Arc::new(UserAccountRepository::from_connection(conn)),
            clock,
        }
    }
}

/// 获取默认数据库路径
///
/// 优先级: MANDATE_LEDGER_DB_PATH → 用户数据目录 → ./mandate_ledger.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("MANDATE_LEDGER_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./mandate_ledger.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("mandate-ledger");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("mandate_ledger.db");
        }
    }

    path.to_string_lossy().to_string()
}
