// ==========================================
// 委托编号台账 - 通知发送
// ==========================================
// 接口: NotificationSender（传输层由实现者决定）
// 默认实现: LogOnlySender，仅写日志
// ==========================================

use crate::domain::user::UserAccount;
use crate::notify::template::{render, NotificationParams, NotificationTemplate, Recipient};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// 通知发送错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("收件人无效: {0}")]
    InvalidRecipient(String),

    #[error("发送失败: {0}")]
    Transport(String),
}

impl Recipient {
    pub fn from_user(user: &UserAccount) -> Self {
        Self {
            email: user.email.clone(),
            name: user.display_name(),
        }
    }
}

// ==========================================
// NotificationSender Trait
// ==========================================
// 实现者: LogOnlySender / 外部邮件网关
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送一条通知
    ///
    /// # 返回
    /// - Err: 发送失败，由调用方决定是否继续
    async fn send(
        &self,
        recipient: &Recipient,
        template: NotificationTemplate,
        params: &NotificationParams,
    ) -> Result<(), NotifyError>;
}

/// 仅记录日志的发送器（本地运行 / 未配置邮件网关）
pub struct LogOnlySender {
    locale: String,
}

impl LogOnlySender {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for LogOnlySender {
    async fn send(
        &self,
        recipient: &Recipient,
        template: NotificationTemplate,
        params: &NotificationParams,
    ) -> Result<(), NotifyError> {
        if recipient.email.trim().is_empty() {
            return Err(NotifyError::InvalidRecipient("邮箱为空".to_string()));
        }
        let message = render(&self.locale, template, recipient, params);
        info!(
            to = %recipient.email,
            template = %template,
            subject = %message.subject,
            "通知已生成（仅日志）"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_only_sender_rejects_empty_email() {
        let sender = LogOnlySender::new("fr");
        let recipient = Recipient {
            email: " ".to_string(),
            name: "x".to_string(),
        };
        let err = sender
            .send(
                &recipient,
                NotificationTemplate::MandateExpired,
                &NotificationParams::new("460 M 25"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn test_log_only_sender_ok() {
        let sender = LogOnlySender::new("en");
        let recipient = Recipient {
            email: "a@example.com".to_string(),
            name: "A".to_string(),
        };
        sender
            .send(
                &recipient,
                NotificationTemplate::DraftReminder,
                &NotificationParams::new("460 M 25"),
            )
            .await
            .unwrap();
    }
}
