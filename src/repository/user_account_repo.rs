// ==========================================
// 委托编号台账 - 用户账户仓储
// ==========================================
// 身份协作方: 按 user_id 解析 {id, role}，提供通知收件信息
// ==========================================

use crate::db::{row_ts, ts_to_db};
use crate::domain::types::UserRole;
use crate::domain::user::UserAccount;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const USER_COLUMNS: &str = "user_id, email, first_name, last_name, role, active, created_at";

pub struct UserAccountRepository {
    conn: Arc<Mutex<Connection>>,
}

impl UserAccountRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, user: &UserAccount) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO user_account ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                USER_COLUMNS
            ),
            params![
                user.user_id,
                user.email,
                user.first_name,
                user.last_name,
                user.role.to_db_str(),
                user.active as i64,
                ts_to_db(&user.created_at),
            ],
        )?;
        Ok(())
    }

    /// 按邮箱插入或更新（姓名/角色/启用状态），返回最终记录
    ///
    /// 已存在时保留原 user_id
    pub fn upsert_by_email(&self, user: &UserAccount) -> RepositoryResult<UserAccount> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO user_account ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(email) DO UPDATE SET
                    first_name = excluded.first_name,
                    last_name = excluded.last_name,
                    role = excluded.role,
                    active = excluded.active
                "#,
                USER_COLUMNS
            ),
            params![
                user.user_id,
                user.email,
                user.first_name,
                user.last_name,
                user.role.to_db_str(),
                user.active as i64,
                ts_to_db(&user.created_at),
            ],
        )?;
        Self::find_by_email_in(&conn, &user.email)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "UserAccount".to_string(),
            id: user.email.clone(),
        })
    }

    pub fn find_by_id(&self, user_id: &str) -> RepositoryResult<Option<UserAccount>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, user_id)
    }

    pub fn find_by_email(&self, email: &str) -> RepositoryResult<Option<UserAccount>> {
        let conn = self.get_conn()?;
        Self::find_by_email_in(&conn, &email.trim().to_lowercase())
    }

    pub fn find_by_id_in(conn: &Connection, user_id: &str) -> RepositoryResult<Option<UserAccount>> {
        let sql = format!("SELECT {} FROM user_account WHERE user_id = ?1", USER_COLUMNS);
        Ok(conn.query_row(&sql, params![user_id], map_user_row).optional()?)
    }

    pub fn find_by_email_in(conn: &Connection, email: &str) -> RepositoryResult<Option<UserAccount>> {
        let sql = format!("SELECT {} FROM user_account WHERE email = ?1", USER_COLUMNS);
        Ok(conn.query_row(&sql, params![email], map_user_row).optional()?)
    }
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    let role_raw: String = row.get(4)?;
    let role = UserRole::from_db_str(&role_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("未知角色: {}", role_raw).into(),
        )
    })?;
    Ok(UserAccount {
        user_id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        role,
        active: row.get::<_, i64>(5)? != 0,
        created_at: row_ts(row, 6)?,
    })
}
