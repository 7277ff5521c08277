// ==========================================
// 委托编号台账 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::ledger_config::{ConfigField, LedgerConfig};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    /// 读取所有 global 配置
    fn load_global_map(&self) -> Result<HashMap<String, String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let map = self.load_global_map()?;
        Ok(serde_json::to_string(&json!(map))?)
    }

    /// 在 base 之上叠加 config_kv 覆写
    ///
    /// # 参数
    /// - base: 默认值或已叠加环境变量的配置
    pub fn load_ledger_config(&self, base: LedgerConfig) -> Result<LedgerConfig, Box<dyn Error>> {
        let map = self.load_global_map()?;
        let config = base.with_overrides(|field: ConfigField| map.get(field.kv_key()).cloned())?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn manager() -> ConfigManager {
        ConfigManager::from_connection(Arc::new(Mutex::new(open_in_memory().unwrap())))
    }

    #[test]
    fn test_kv_overrides_base() {
        let mgr = manager();
        mgr.set_global_config_value("seed_batch", "25").unwrap();
        mgr.set_global_config_value("sweep_at", "08:15").unwrap();
        mgr.set_global_config_value("seed_batch", "30").unwrap();

        let base = LedgerConfig {
            start_seq: 1,
            ..LedgerConfig::default()
        };
        let cfg = mgr.load_ledger_config(base).unwrap();
        assert_eq!(cfg.start_seq, 1);
        assert_eq!(cfg.batch_size, 30);
        assert_eq!(cfg.sweep_at(), "08:15");
    }

    #[test]
    fn test_invalid_kv_value_is_error() {
        let mgr = manager();
        mgr.set_global_config_value("reservation_window_days", "-3").unwrap();
        assert!(mgr.load_ledger_config(LedgerConfig::default()).is_err());
    }

    #[test]
    fn test_snapshot_and_missing_key() {
        let mgr = manager();
        assert!(mgr.get_global_config_value("start_seq").unwrap().is_none());
        mgr.set_global_config_value("start_seq", "500").unwrap();
        let snapshot = mgr.get_config_snapshot().unwrap();
        assert!(snapshot.contains("\"start_seq\":\"500\""));
    }
}
