pub mod feishu;
pub mod webhook;

pub use feishu::{DocumentStore, FeishuAuth, FeishuDrive, RemoteFile};
pub use webhook::{FeishuWebhook, Notifier};
