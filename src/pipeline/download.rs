use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use url::Url;

use super::batches::batch_dir_name;
use crate::config::CrawlerConfig;
use crate::crawler::browser::DOWNLOAD_NAME_LEN;
use crate::crawler::{gated_domain, Acquirer, PaperLink, SharedBrowser};
use crate::storage::models::{BatchRecord, LinkRecord};
use crate::storage::{Database, LinkStatus};
use crate::utils::fs::{create_unique, sanitize_file_name};
use crate::utils::BotResult;

const MAX_WORKERS: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub failed: usize,
}

/// 把当天登记的链接下载到 `downloads/<YYYYMMDD>/<主题>&&time&&<日期>/`
pub struct BatchDownloader {
    config: CrawlerConfig,
    acquirer: Acquirer,
    db: Arc<Database>,
    root: PathBuf,
}

impl BatchDownloader {
    pub fn new(
        config: &CrawlerConfig,
        db: Arc<Database>,
        downloads_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> BotResult<Self> {
        Ok(Self {
            config: config.clone(),
            acquirer: Acquirer::new(config, work_dir)?,
            db,
            root: downloads_dir.into(),
        })
    }

    pub fn batch_dir(&self, batch: &BatchRecord) -> PathBuf {
        self.root
            .join(&batch.day)
            .join(batch_dir_name(&batch.subject, &batch.mail_date))
    }

    /// `concurrent` 时共用一个浏览器会话，worker 数限制在 1..=3
    pub async fn download_day(&self, day: &str, concurrent: bool, workers: usize) -> BotResult<DownloadReport> {
        let batches = self.db.batches_for_day(day).await?;
        if batches.is_empty() {
            info!("{} 没有登记的批次，请先执行 fetch", day);
            return Ok(DownloadReport::default());
        }

        let workers = workers.clamp(1, MAX_WORKERS);
        let mut report = DownloadReport::default();

        for batch in &batches {
            let pending: Vec<LinkRecord> = self
                .db
                .links_for_batch(&batch.label)
                .await?
                .into_iter()
                .filter(|l| {
                    l.status == LinkStatus::Pending.as_str() || l.status == LinkStatus::Failed.as_str()
                })
                .collect();
            if pending.is_empty() {
                continue;
            }

            let dir = self.batch_dir(batch);
            tokio::fs::create_dir_all(&dir).await?;
            info!("批次 [{}] 待下载 {} 篇 -> {}", batch.label, pending.len(), dir.display());

            let results = if concurrent && self.config.browser.enabled {
                self.download_concurrent(&dir, &pending, workers).await
            } else {
                self.download_sequential(&dir, &pending).await
            };

            for (record, result) in results {
                match result {
                    Ok(path) => {
                        report.downloaded += 1;
                        self.db
                            .update_link_status(
                                record.id,
                                LinkStatus::Downloaded,
                                Some(path.to_string_lossy().as_ref()),
                                None,
                            )
                            .await?;
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!("下载失败 {}: {}", record.url, e);
                        let message = e.to_string();
                        self.db
                            .update_link_status(record.id, LinkStatus::Failed, None, Some(&message))
                            .await?;
                    }
                }
            }
        }

        info!("✅ 下载完成: 成功 {} 篇, 失败 {} 篇", report.downloaded, report.failed);
        Ok(report)
    }

    async fn download_sequential<'a>(
        &self,
        dir: &Path,
        records: &'a [LinkRecord],
    ) -> Vec<(&'a LinkRecord, BotResult<PathBuf>)> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let result = self.fetch_to(dir, &to_link(record)).await;
            results.push((record, result));
        }
        results
    }

    async fn download_concurrent<'a>(
        &self,
        dir: &Path,
        records: &'a [LinkRecord],
        workers: usize,
    ) -> Vec<(&'a LinkRecord, BotResult<PathBuf>)> {
        let browser = match SharedBrowser::open(
            self.config.browser.clone(),
            &self.config.user_agent,
            self.config.cookie_string.clone(),
            dir.to_path_buf(),
        )
        .await
        {
            Ok(browser) => browser,
            Err(e) => {
                warn!("浏览器会话启动失败，改为顺序下载: {}", e);
                return self.download_sequential(dir, records).await;
            }
        };

        info!("并发下载，worker 数: {}", workers);
        let results = stream::iter(records)
            .map(|record| {
                let browser = &browser;
                async move {
                    let link = to_link(record);
                    let domain = Url::parse(&link.url)
                        .ok()
                        .and_then(|u| gated_domain(&u, &self.config.browser.gated_domains));
                    let result = match domain {
                        Some(domain) => browser.download(&link, &domain).await,
                        None => self.fetch_to(dir, &link).await,
                    };
                    (record, result)
                }
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;

        browser.close().await;
        results
    }

    async fn fetch_to(&self, dir: &Path, link: &PaperLink) -> BotResult<PathBuf> {
        let bytes = self.acquirer.fetch(&link.url).await?;
        let stem = sanitize_file_name(&link.title, DOWNLOAD_NAME_LEN);
        let (target, mut file) = create_unique(dir, &stem, "pdf").await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        info!("✅ 已保存: {}", target.display());
        Ok(target)
    }
}

fn to_link(record: &LinkRecord) -> PaperLink {
    PaperLink {
        title: record.title.clone(),
        url: record.url.clone(),
    }
}
