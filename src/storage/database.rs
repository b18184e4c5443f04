use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::crawler::PaperLink;
use crate::storage::models::{BatchRecord, LedgerState, LinkRecord, LinkStatus, ProcessedUrl};
use crate::utils::BotResult;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> BotResult<Self> {
        if let Some(parent) = database_url
            .strip_prefix("sqlite:")
            .map(Path::new)
            .and_then(Path::parent)
        {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                database_url
                    .parse::<SqliteConnectOptions>()?
                    .create_if_missing(true),
            )
            .await?;

        info!("数据库连接成功: {}", database_url);
        Ok(Self { pool })
    }

    /// 内存库只能有一个连接，否则每个连接各是一个库
    pub async fn in_memory() -> BotResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub async fn init_schema(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_urls (
                day TEXT NOT NULL,
                url TEXT NOT NULL,
                state TEXT NOT NULL,
                folder_token TEXT,
                file_name TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (day, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                label TEXT PRIMARY KEY,
                day TEXT NOT NULL,
                subject TEXT NOT NULL,
                mail_date TEXT NOT NULL,
                folder_token TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_label TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                pdf_path TEXT,
                error TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(batch_label, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    // ---- 已处理 URL 账本 ----

    pub async fn ledger_entry(&self, day: &str, url: &str) -> BotResult<Option<ProcessedUrl>> {
        let entry = sqlx::query_as::<_, ProcessedUrl>(
            "SELECT day, url, state, folder_token, file_name, updated_at
             FROM processed_urls WHERE day = ? AND url = ?",
        )
        .bind(day)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// 当天是否已经确认发布过
    pub async fn is_processed(&self, day: &str, url: &str) -> BotResult<bool> {
        Ok(self
            .ledger_entry(day, url)
            .await?
            .map(|e| e.is_done())
            .unwrap_or(false))
    }

    /// 上传前写入 pending
    pub async fn begin_publish(
        &self,
        day: &str,
        url: &str,
        folder_token: &str,
        file_name: &str,
    ) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_urls (day, url, state, folder_token, file_name, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(day, url) DO UPDATE SET
                state = excluded.state,
                folder_token = excluded.folder_token,
                file_name = excluded.file_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(day)
        .bind(url)
        .bind(LedgerState::Pending.as_str())
        .bind(folder_token)
        .bind(file_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 上传确认后改为 done；没有 pending 记录时直接插入 done
    pub async fn confirm_publish(&self, day: &str, url: &str) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_urls (day, url, state, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(day, url) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(day)
        .bind(url)
        .bind(LedgerState::Done.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 上传失败，撤销 pending
    pub async fn abort_publish(&self, day: &str, url: &str) -> BotResult<()> {
        sqlx::query("DELETE FROM processed_urls WHERE day = ? AND url = ? AND state = ?")
            .bind(day)
            .bind(url)
            .bind(LedgerState::Pending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn processed_count(&self, day: &str) -> BotResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM processed_urls WHERE day = ? AND state = ?",
        )
        .bind(day)
        .bind(LedgerState::Done.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ---- 批次与文件夹 ----

    pub async fn get_batch(&self, label: &str) -> BotResult<Option<BatchRecord>> {
        let batch = sqlx::query_as::<_, BatchRecord>(
            "SELECT label, day, subject, mail_date, folder_token, created_at
             FROM batches WHERE label = ?",
        )
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;
        Ok(batch)
    }

    /// 登记批次，已存在时保留原有的 folder_token
    pub async fn save_batch(
        &self,
        label: &str,
        day: &str,
        subject: &str,
        mail_date: &str,
    ) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (label, day, subject, mail_date)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(label) DO UPDATE SET day = excluded.day
            "#,
        )
        .bind(label)
        .bind(day)
        .bind(subject)
        .bind(mail_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_batch_folder(&self, label: &str, folder_token: &str) -> BotResult<()> {
        sqlx::query("UPDATE batches SET folder_token = ? WHERE label = ?")
            .bind(folder_token)
            .bind(label)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn batches_for_day(&self, day: &str) -> BotResult<Vec<BatchRecord>> {
        let batches = sqlx::query_as::<_, BatchRecord>(
            "SELECT label, day, subject, mail_date, folder_token, created_at
             FROM batches WHERE day = ? ORDER BY mail_date",
        )
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(batches)
    }

    // ---- 提取到的链接 ----

    /// 重复的链接忽略，返回新插入的条数
    pub async fn save_links(&self, batch_label: &str, links: &[PaperLink]) -> BotResult<u64> {
        let mut inserted = 0;
        for link in links {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO paper_links (batch_label, title, url) VALUES (?, ?, ?)",
            )
            .bind(batch_label)
            .bind(&link.title)
            .bind(&link.url)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn links_for_batch(&self, batch_label: &str) -> BotResult<Vec<LinkRecord>> {
        let links = sqlx::query_as::<_, LinkRecord>(
            "SELECT id, batch_label, title, url, status, pdf_path, error
             FROM paper_links WHERE batch_label = ? ORDER BY id",
        )
        .bind(batch_label)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    pub async fn update_link_status(
        &self,
        id: i64,
        status: LinkStatus,
        pdf_path: Option<&str>,
        error: Option<&str>,
    ) -> BotResult<()> {
        sqlx::query(
            "UPDATE paper_links SET status = ?, pdf_path = COALESCE(?, pdf_path), error = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(pdf_path)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_all_tables(&self) -> BotResult<()> {
        sqlx::query("DELETE FROM paper_links").execute(&self.pool).await?;
        sqlx::query("DELETE FROM batches").execute(&self.pool).await?;
        sqlx::query("DELETE FROM processed_urls").execute(&self.pool).await?;
        info!("数据库已清空");
        Ok(())
    }
}
