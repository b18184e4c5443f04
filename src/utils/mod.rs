pub mod fs;
pub mod logger;
pub mod retry;
pub mod scheduler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("数据库错误: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("邮件错误: {0}")]
    MailError(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("PDF处理错误: {0}")]
    PdfError(String),

    #[error("OCR错误: {0}")]
    OcrError(String),

    #[error("大模型API错误: {0}")]
    LlmError(String),

    #[error("浏览器错误: {0}")]
    BrowserError(String),

    #[error("下载超时 ({secs}秒): {url}")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("飞书API错误 code={code}: {msg}")]
    FeishuError { code: i64, msg: String },
}

pub type BotResult<T> = Result<T, BotError>;
