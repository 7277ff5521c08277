// ==========================================
// 委托编号台账 - 通知层
// ==========================================

pub mod sender;
pub mod template;

pub use sender::{LogOnlySender, NotificationSender, NotifyError};
pub use template::{render, NotificationParams, NotificationTemplate, Recipient, RenderedMessage};
