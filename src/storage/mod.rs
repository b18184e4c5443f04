pub mod cache;
pub mod database;
pub mod models;
pub mod progress;

pub use database::Database;
pub use models::{BatchRecord, LinkRecord, LinkStatus, ProcessedUrl};
pub use progress::ProgressFile;
