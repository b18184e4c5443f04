use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 账本中的 URL 状态：上传前写 pending，上传确认后改为 done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerState {
    Pending,
    Done,
}

impl LedgerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerState::Pending => "pending",
            LedgerState::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessedUrl {
    pub day: String,
    pub url: String,
    pub state: String,
    pub folder_token: Option<String>,
    pub file_name: Option<String>,
    pub updated_at: Option<String>,
}

impl ProcessedUrl {
    pub fn is_done(&self) -> bool {
        self.state == LedgerState::Done.as_str()
    }
}

/// 一封邮件对应的批次
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchRecord {
    pub label: String,
    pub day: String,
    pub subject: String,
    pub mail_date: String,
    pub folder_token: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Pending,
    Downloaded,
    Published,
    Discarded,
    Failed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Downloaded => "downloaded",
            LinkStatus::Published => "published",
            LinkStatus::Discarded => "discarded",
            LinkStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkRecord {
    pub id: i64,
    pub batch_label: String,
    pub title: String,
    pub url: String,
    pub status: String,
    pub pdf_path: Option<String>,
    pub error: Option<String>,
}
