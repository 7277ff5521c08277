// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库 / 测试账号 / 记录型通知发送器 / 装配好的 AppState
// ==========================================
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mandate_ledger::app::AppState;
use mandate_ledger::db::{ensure_schema, open_sqlite_connection};
use mandate_ledger::notify::{
    NotificationParams, NotificationSender, NotificationTemplate, NotifyError, Recipient,
};
use mandate_ledger::repository::UserAccountRepository;
use mandate_ledger::{Actor, LedgerConfig, ManualClock, UserAccount, UserRole};
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接
pub fn open_shared(db_path: &str) -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(open_sqlite_connection(db_path).unwrap()))
}

/// 测试基准时间: 2025-01-01 10:00 UTC
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
}

/// 插入一个用户
pub fn insert_user(conn: &Arc<Mutex<Connection>>, email: &str, role: UserRole) -> UserAccount {
    let user = UserAccount::new(email, role, t0());
    UserAccountRepository::from_connection(conn.clone())
        .insert(&user)
        .unwrap();
    user
}

// ==========================================
// RecordingSender - 记录所有发送请求
// ==========================================

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub email: String,
    pub template: NotificationTemplate,
    pub params: NotificationParams,
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentNotification>>,
    failing_emails: Mutex<Vec<String>>,
}

impl RecordingSender {
    /// 对该邮箱的发送一律失败
    pub fn fail_for(&self, email: &str) {
        self.failing_emails.lock().unwrap().push(email.to_string());
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with(&self, template: NotificationTemplate) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        recipient: &Recipient,
        template: NotificationTemplate,
        params: &NotificationParams,
    ) -> Result<(), NotifyError> {
        if self
            .failing_emails
            .lock()
            .unwrap()
            .iter()
            .any(|e| e == &recipient.email)
        {
            return Err(NotifyError::Transport(format!("拒收: {}", recipient.email)));
        }
        self.sent.lock().unwrap().push(SentNotification {
            email: recipient.email.clone(),
            template,
            params: params.clone(),
        });
        Ok(())
    }
}

// ==========================================
// TestEnv - 装配好的测试环境
// ==========================================

pub struct TestEnv {
    pub _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub state: AppState,
    pub sender: Arc<RecordingSender>,
    pub clock: Arc<ManualClock>,
    pub admin: UserAccount,
    pub agent: UserAccount,
}

impl TestEnv {
    pub fn admin_actor(&self) -> Actor {
        self.admin.as_actor()
    }

    pub fn agent_actor(&self) -> Actor {
        self.agent.as_actor()
    }
}

/// 创建测试环境（一个 ADMIN + 一个 AGENT，时钟停在 t0）
pub fn setup_env(config: LedgerConfig) -> TestEnv {
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let admin = insert_user(&conn, "admin@example.com", UserRole::Admin);
    let agent = insert_user(&conn, "agent@example.com", UserRole::Agent);

    let sender = Arc::new(RecordingSender::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let state = AppState::from_parts(conn.clone(), config, sender.clone(), clock.clone());

    TestEnv {
        _temp_file: temp_file,
        db_path,
        conn,
        state,
        sender,
        clock,
        admin,
        agent,
    }
}
