// ==========================================
// 委托编号台账 - 通知模板
// ==========================================
// 模板: draft_reminder / signed_reminder / mandate_expired
// 文案: locales/*.yml（rust-i18n），按指定语言渲染
// ==========================================

use crate::i18n::t_in;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 通知模板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationTemplate {
    DraftReminder,
    SignedReminder,
    MandateExpired,
}

impl NotificationTemplate {
    /// i18n 键前缀
    pub fn key(&self) -> &'static str {
        match self {
            NotificationTemplate::DraftReminder => "notify.draft_reminder",
            NotificationTemplate::SignedReminder => "notify.signed_reminder",
            NotificationTemplate::MandateExpired => "notify.mandate_expired",
        }
    }
}

impl fmt::Display for NotificationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationTemplate::DraftReminder => "draft_reminder",
            NotificationTemplate::SignedReminder => "signed_reminder",
            NotificationTemplate::MandateExpired => "mandate_expired",
        };
        write!(f, "{}", name)
    }
}

/// 收件人
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

/// 模板参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationParams {
    pub code: String,
    /// 已按本地时区格式化的截止日期（dd/mm/YYYY）
    pub deadline: Option<String>,
}

impl NotificationParams {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>, offset: FixedOffset) -> Self {
        self.deadline = Some(
            deadline
                .with_timezone(&offset)
                .format("%d/%m/%Y")
                .to_string(),
        );
        self
    }
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// 按语言渲染通知（问候语 + 正文 + 署名）
pub fn render(
    locale: &str,
    template: NotificationTemplate,
    recipient: &Recipient,
    params: &NotificationParams,
) -> RenderedMessage {
    let deadline = params.deadline.as_deref().unwrap_or("");
    let args = [("code", params.code.as_str()), ("deadline", deadline)];

    let subject = t_in(locale, &format!("{}.subject", template.key()), &args);
    let greeting = t_in(locale, "notify.greeting", &[("name", recipient.name.as_str())]);
    let body = t_in(locale, &format!("{}.body", template.key()), &args);
    let signature = t_in(locale, "notify.signature", &[]);

    RenderedMessage {
        subject,
        body: format!("{}\n\n{}\n{}", greeting, body.trim_end(), signature.trim_end()),
    }
}
