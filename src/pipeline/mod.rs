pub mod batches;
pub mod download;

pub use batches::{batches_from_dir, retry_batch};
pub use download::BatchDownloader;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::{AppConfig, TaxonomyConfig};
use crate::crawler::{extract_links, Acquirer, PaperLink};
use crate::mail::{ImapMailSource, MailMessage, MailSource};
use crate::parser::{ExtractedDocument, FeishuOcr, PdftoppmRenderer, TextExtractor};
use crate::publisher::{DocumentStore, FeishuAuth, FeishuDrive, FeishuWebhook, Notifier};
use crate::storage::models::ProcessedUrl;
use crate::storage::{Database, LinkStatus, ProgressFile};
use crate::summarizer::{OpenAiCompatModel, PaperSummary, Summarizer};
use crate::utils::fs::{today_str, unique_path, EMAIL_DATE_LAYOUT};
use crate::utils::{BotError, BotResult};

/// 一封邮件（或一个下载目录）对应的一批文献
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub subject: String,
    /// `YYYY-MM-DD_HH-MM-SS`
    pub mail_date: String,
    pub links: Vec<PaperLink>,
}

impl Batch {
    /// 同一批次内重复的链接只保留第一次出现
    pub fn new(subject: impl Into<String>, mail_date: impl Into<String>, links: Vec<PaperLink>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let links = links
            .into_iter()
            .filter(|link| seen.insert(link.url.clone()))
            .collect();
        Self {
            subject: subject.into(),
            mail_date: mail_date.into(),
            links,
        }
    }

    pub fn from_message(message: &MailMessage) -> Self {
        Self::new(
            message.subject.trim(),
            message.date.format(EMAIL_DATE_LAYOUT).to_string(),
            extract_links(&message.body),
        )
    }

    /// 飞书文件夹名，也是批次登记表的主键
    pub fn label(&self) -> String {
        format!("{}_{}", self.mail_date, self.subject)
    }
}

/// 把链接或本地路径变成文本
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load(&self, location: &str) -> BotResult<ExtractedDocument>;
}

/// 下载 PDF 后逐页提取文本/OCR
pub struct PdfSource {
    acquirer: Acquirer,
    extractor: TextExtractor,
}

impl PdfSource {
    pub fn new(acquirer: Acquirer, extractor: TextExtractor) -> Self {
        Self {
            acquirer,
            extractor,
        }
    }
}

#[async_trait]
impl ContentSource for PdfSource {
    async fn load(&self, location: &str) -> BotResult<ExtractedDocument> {
        let bytes = self.acquirer.fetch(location).await?;
        info!("获取PDF成功: {} ({} 字节)", location, bytes.len());
        self.extractor.extract(&bytes).await
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub batches: usize,
    pub published: usize,
    pub discarded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    fn absorb(&mut self, other: RunReport) {
        self.batches += other.batches;
        self.published += other.published;
        self.discarded += other.discarded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum LinkOutcome {
    Skipped,
    Published,
    Discarded,
}

pub struct Pipeline {
    mail: Arc<dyn MailSource>,
    source: Arc<dyn ContentSource>,
    summarizer: Summarizer,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    db: Arc<Database>,
    progress: ProgressFile,
    work_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        mail: Arc<dyn MailSource>,
        source: Arc<dyn ContentSource>,
        summarizer: Summarizer,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        db: Arc<Database>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let data_dir = data_dir.into();
        Self {
            mail,
            source,
            summarizer,
            store,
            notifier,
            db,
            progress: ProgressFile::new(&data_dir),
            work_dir: data_dir.join("tmp"),
        }
    }

    /// 按配置装配 IMAP、下载、OCR、大模型和飞书客户端
    pub async fn from_config(config: &AppConfig, taxonomy: TaxonomyConfig) -> Result<Self> {
        let work_dir = config.storage.work_dir();

        let db = Database::new(&config.storage.database_url())
            .await
            .context("连接数据库失败")?;
        db.init_schema().await.context("初始化数据库表失败")?;

        let auth = Arc::new(FeishuAuth::new(&config.feishu).context("创建飞书客户端失败")?);
        let extractor = TextExtractor::new(
            config.extract.max_pages,
            Arc::new(PdftoppmRenderer::new(&config.extract, work_dir.clone())),
            Arc::new(FeishuOcr::new(auth.clone())),
            work_dir.clone(),
        );
        let acquirer = Acquirer::new(&config.crawler, work_dir).context("创建下载客户端失败")?;

        let model = OpenAiCompatModel::new(config.llm.clone()).context("创建大模型客户端失败")?;
        if !model.is_configured() {
            warn!("⚠️ 大模型 api_key 未配置，请在 config/settings.toml 中设置 [llm] api_key");
        }
        if config.feishu.root_folder_token.is_empty() {
            warn!("⚠️ 未配置飞书 root_folder_token，文件夹将创建在应用根目录");
        }

        Ok(Self::new(
            Arc::new(ImapMailSource::new(config.imap.clone())),
            Arc::new(PdfSource::new(acquirer, extractor)),
            Summarizer::new(Arc::new(model), taxonomy, config.llm.max_input_chars),
            Arc::new(FeishuDrive::new(auth, config.feishu.root_folder_token.clone())),
            Arc::new(FeishuWebhook::new(config.feishu.webhook_url.clone())),
            Arc::new(db),
            config.storage.data_dir(),
        ))
    }

    /// 拉取邮件 → 提取链接 → 逐批处理
    pub async fn run(&self) -> RunReport {
        let batches = self.collect_batches().await;
        let mut report = RunReport::default();
        for batch in &batches {
            report.absorb(self.process_batch(batch).await);
        }
        info!(
            "✅ 本次运行完成: {} 个批次, 发布 {} 篇, 忽略 {} 篇, 跳过 {} 篇, 失败 {} 篇",
            report.batches, report.published, report.discarded, report.skipped, report.failed
        );
        match self.db.processed_count(&today_str()).await {
            Ok(count) => info!("今日累计发布 {} 篇", count),
            Err(e) => warn!("统计今日发布数失败: {}", e),
        }
        report
    }

    /// 拉取邮件并提取链接，不做任何下载
    pub async fn collect_batches(&self) -> Vec<Batch> {
        let messages = self.mail.fetch_recent().await;
        if messages.is_empty() {
            info!("没有需要处理的邮件");
            return Vec::new();
        }

        let mut batches = Vec::new();
        for message in &messages {
            let batch = Batch::from_message(message);
            if batch.links.is_empty() {
                warn!("邮件 [{}] 未提取到链接，跳过", batch.subject);
                continue;
            }
            info!("邮件 [{}] 提取到 {} 个链接", batch.subject, batch.links.len());
            batches.push(batch);
        }
        batches
    }

    /// 登记批次和链接，返回 url → 链接记录 id
    pub async fn record_batch(&self, batch: &Batch) -> BotResult<HashMap<String, i64>> {
        let label = batch.label();
        self.db
            .save_batch(&label, &today_str(), &batch.subject, &batch.mail_date)
            .await?;
        let inserted = self.db.save_links(&label, &batch.links).await?;
        if inserted > 0 {
            info!("批次 [{}] 新登记 {} 个链接", label, inserted);
        }
        Ok(self
            .db
            .links_for_batch(&label)
            .await?
            .into_iter()
            .map(|record| (record.url, record.id))
            .collect())
    }

    pub async fn process_batch(&self, batch: &Batch) -> RunReport {
        let mut report = RunReport::default();
        if batch.links.is_empty() {
            return report;
        }

        let label = batch.label();
        let day = today_str();
        let link_ids = self.record_batch(batch).await.unwrap_or_else(|e| {
            warn!("登记批次失败 [{}]: {}", label, e);
            HashMap::new()
        });

        let folder = match self.resolve_folder(&label).await {
            Ok(token) => token,
            Err(e) => {
                error!("获取文件夹失败 [{}]: {}", label, e);
                self.notifier
                    .notify(&format!(
                        "❌异常: 获取文件夹token失败\n主题: {}\n错误: {}",
                        batch.subject, e
                    ))
                    .await;
                report.failed = batch.links.len();
                return report;
            }
        };

        report.batches = 1;
        let total = batch.links.len();
        self.notifier
            .notify(&format!(
                "开始执行主题为:{}的邮件,总共{}条数据,获取到文件夹token:{}",
                batch.subject, total, folder
            ))
            .await;

        for (index, link) in batch.links.iter().enumerate() {
            info!("处理第 {}/{} 条: {}", index + 1, total, link.url);
            let link_id = link_ids.get(&link.url).copied();

            match self.process_link(&day, &folder, link).await {
                Ok(LinkOutcome::Skipped) => report.skipped += 1,
                Ok(LinkOutcome::Published) => {
                    report.published += 1;
                    self.mark_link(link_id, LinkStatus::Published, None).await;
                }
                Ok(LinkOutcome::Discarded) => {
                    report.discarded += 1;
                    self.notifier
                        .notify(&format!(":文档:大模型分析为忽略类型,跳过: {}", link.url))
                        .await;
                    self.mark_link(link_id, LinkStatus::Discarded, None).await;
                }
                Err(e) => {
                    report.failed += 1;
                    error!("处理文献失败 {}: {}", link.url, e);
                    self.notifier
                        .notify(&format!(
                            "❌异常: 处理文献失败\n链接: {}\n错误: {}",
                            link.url, e
                        ))
                        .await;
                    let message = e.to_string();
                    self.mark_link(link_id, LinkStatus::Failed, Some(&message)).await;
                }
            }

            if let Err(e) = self.progress.write(total, index + 1).await {
                warn!("写入进度文件失败: {}", e);
            }
        }

        self.notifier
            .notify(&format!(
                "结束执行主题为:{}的邮件,发布{}条,忽略{}条,跳过{}条,失败{}条",
                batch.subject, report.published, report.discarded, report.skipped, report.failed
            ))
            .await;
        report
    }

    /// 优先复用登记过的文件夹，没有时新建
    async fn resolve_folder(&self, label: &str) -> BotResult<String> {
        if let Some(token) = self
            .db
            .get_batch(label)
            .await?
            .and_then(|batch| batch.folder_token)
            .filter(|token| !token.is_empty())
        {
            info!("复用已有文件夹: {}", token);
            return Ok(token);
        }

        let token = self.store.create_folder(label).await?;
        if token.is_empty() {
            return Err(BotError::FeishuError {
                code: -1,
                msg: "返回的文件夹token为空".to_string(),
            });
        }
        self.db.set_batch_folder(label, &token).await?;
        info!("创建文件夹成功: {} -> {}", label, token);
        Ok(token)
    }

    async fn process_link(&self, day: &str, folder: &str, link: &PaperLink) -> BotResult<LinkOutcome> {
        if let Some(entry) = self.db.ledger_entry(day, &link.url).await? {
            if entry.is_done() {
                info!("今日已处理，跳过: {}", link.url);
                return Ok(LinkOutcome::Skipped);
            }
            if self.reconcile_pending(&entry).await {
                return Ok(LinkOutcome::Skipped);
            }
        }

        let document = self.source.load(&link.url).await?;
        if document.text.trim().is_empty() {
            return Err(BotError::PdfError("未提取到任何文本".to_string()));
        }
        info!(
            "文本提取完成: 共 {} 页, 处理 {} 页, OCR {} 页",
            document.pages_total, document.pages_processed, document.ocr_pages
        );

        let Some(summary) = self.summarizer.process(&document.text, link).await? else {
            return Ok(LinkOutcome::Discarded);
        };

        self.publish(day, folder, &link.url, &summary).await?;
        Ok(LinkOutcome::Published)
    }

    /// 上次中断在上传阶段：文件已在文件夹中则补记 done
    async fn reconcile_pending(&self, entry: &ProcessedUrl) -> bool {
        let (Some(folder), Some(name)) = (&entry.folder_token, &entry.file_name) else {
            return false;
        };

        match self.store.list_files(folder).await {
            Ok(files) if files.iter().any(|f| &f.name == name) => {
                info!("上次上传已完成，补记账本: {}", entry.url);
                if let Err(e) = self.db.confirm_publish(&entry.day, &entry.url).await {
                    warn!("补记账本失败 {}: {}", entry.url, e);
                }
                true
            }
            Ok(_) => {
                info!("上次上传未完成，重新处理: {}", entry.url);
                false
            }
            Err(e) => {
                warn!("查询文件夹失败，重新处理 {}: {}", entry.url, e);
                false
            }
        }
    }

    async fn publish(&self, day: &str, folder: &str, url: &str, summary: &PaperSummary) -> BotResult<()> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = unique_path(&self.work_dir, &summary.label, "md");
        tokio::fs::write(&path, &summary.markdown).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.db.begin_publish(day, url, folder, &file_name).await?;
        if let Err(e) = self.store.upload(folder, &path).await {
            if let Err(db_err) = self.db.abort_publish(day, url).await {
                warn!("撤销账本记录失败 {}: {}", url, db_err);
            }
            // 重试时沿用同一个文件名
            if let Err(fs_err) = tokio::fs::remove_file(&path).await {
                warn!("删除临时文件失败 {}: {}", path.display(), fs_err);
            }
            return Err(e);
        }
        self.db.confirm_publish(day, url).await?;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("删除临时文件失败 {}: {}", path.display(), e);
        }
        info!("✅ 已上传: {}", file_name);
        Ok(())
    }

    async fn mark_link(&self, id: Option<i64>, status: LinkStatus, error: Option<&str>) {
        let Some(id) = id else { return };
        if let Err(e) = self.db.update_link_status(id, status, None, error).await {
            warn!("更新链接状态失败 (id={}): {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Local;

    use crate::publisher::RemoteFile;
    use crate::summarizer::testing::ScriptedModel;

    const PAPER_URL: &str = "https://x/y.pdf";
    const SUMMARY: &str = "# 深度图谱\n\n## 研究问题\n细胞图谱";
    const KEEP: &str = r#"{"category": "生物数据分析", "subcategories": ["深度学习"], "tier": "第一类", "ignore": false}"#;

    struct FakeMail(Vec<MailMessage>);

    #[async_trait]
    impl MailSource for FakeMail {
        async fn fetch_recent(&self) -> Vec<MailMessage> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentSource for FakeSource {
        async fn load(&self, _location: &str) -> BotResult<ExtractedDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractedDocument {
                text: "Single-cell atlas of the mouse brain".to_string(),
                pages_total: 1,
                pages_processed: 1,
                ocr_pages: 0,
            })
        }
    }

    #[derive(Default)]
    struct FakeStore {
        fail_folder: bool,
        fail_upload: AtomicBool,
        folders: Mutex<Vec<String>>,
        /// (folder, 文件名, 内容)
        uploads: Mutex<Vec<(String, String, String)>>,
        existing: Mutex<Vec<RemoteFile>>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn create_folder(&self, name: &str) -> BotResult<String> {
            if self.fail_folder {
                return Err(BotError::FeishuError {
                    code: 99991663,
                    msg: "token invalid".to_string(),
                });
            }
            self.folders.lock().unwrap().push(name.to_string());
            Ok("fldcnBatch".to_string())
        }

        async fn upload(&self, folder_token: &str, path: &Path) -> BotResult<String> {
            if self.fail_upload.load(Ordering::SeqCst) {
                return Err(BotError::FeishuError {
                    code: 1061045,
                    msg: "upload failed".to_string(),
                });
            }
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let content = std::fs::read_to_string(path).unwrap();
            self.uploads
                .lock()
                .unwrap()
                .push((folder_token.to_string(), name, content));
            Ok("boxcnFile".to_string())
        }

        async fn list_files(&self, _folder_token: &str) -> BotResult<Vec<RemoteFile>> {
            Ok(self.existing.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }
    }

    fn alert() -> MailMessage {
        MailMessage {
            sender: "openRxiv-mailer@alerts.highwire.org".to_string(),
            subject: "bioRxiv Alert".to_string(),
            date: Local::now().fixed_offset(),
            body: format!(
                r#"<html><body>
                <div class="citation_title">Deep atlas</div>
                <div class="view_list"><a href="{}">[PDF]</a></div>
                </body></html>"#,
                PAPER_URL
            ),
        }
    }

    struct Harness {
        pipeline: Pipeline,
        source: Arc<FakeSource>,
        store: Arc<FakeStore>,
        notifier: Arc<RecordingNotifier>,
        db: Arc<Database>,
        _dir: tempfile::TempDir,
        work_dir: PathBuf,
    }

    async fn harness(messages: Vec<MailMessage>, model: ScriptedModel, store: FakeStore) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let db = Arc::new(Database::in_memory().await.unwrap());

        let pipeline = Pipeline::new(
            Arc::new(FakeMail(messages)),
            source.clone(),
            Summarizer::new(Arc::new(model), TaxonomyConfig::default(), 65500),
            store.clone(),
            notifier.clone(),
            db.clone(),
            dir.path(),
        );
        Harness {
            pipeline,
            source,
            store,
            notifier,
            db,
            work_dir: dir.path().join("tmp"),
            _dir: dir,
        }
    }

    fn md_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn keep_uploads_and_records_ledger() {
        let h = harness(
            vec![alert()],
            ScriptedModel::new(&[SUMMARY, KEEP]),
            FakeStore::default(),
        )
        .await;

        let report = h.pipeline.run().await;
        assert_eq!(report.published, 1);
        assert_eq!(report.batches, 1);

        let uploads = h.store.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let (folder, name, content) = &uploads[0];
        assert_eq!(folder, "fldcnBatch");
        assert_eq!(name, &format!("{}_Deep_atlas.md", today_str()));
        assert!(content.contains("- 一级分类：生物数据分析"));
        assert!(content.ends_with(&format!("## 原文链接\n{}\n", PAPER_URL)));

        assert!(md_files(&h.work_dir).is_empty());
        assert!(h.db.is_processed(&today_str(), PAPER_URL).await.unwrap());

        let folders = h.store.folders.lock().unwrap().clone();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].ends_with("_bioRxiv Alert"));
        let links = h.db.links_for_batch(&folders[0]).await.unwrap();
        assert_eq!(links[0].status, "published");

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert!(messages[0].starts_with("开始执行主题为:bioRxiv Alert的邮件,总共1条数据"));
        assert!(messages.last().unwrap().starts_with("结束执行主题为:bioRxiv Alert"));
    }

    #[tokio::test]
    async fn discard_skips_upload_and_notifies() {
        let h = harness(
            vec![alert()],
            ScriptedModel::new(&[SUMMARY, "忽略"]),
            FakeStore::default(),
        )
        .await;

        let report = h.pipeline.run().await;
        assert_eq!(report.discarded, 1);
        assert!(h.store.uploads.lock().unwrap().is_empty());
        assert!(!h.db.is_processed(&today_str(), PAPER_URL).await.unwrap());

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert!(messages
            .iter()
            .any(|m| m.contains("大模型分析为忽略类型") && m.contains(PAPER_URL)));
    }

    #[tokio::test]
    async fn second_run_same_day_does_no_work() {
        // 只准备了一篇的回复，第二次再调用大模型会报错
        let h = harness(
            vec![alert()],
            ScriptedModel::new(&[SUMMARY, KEEP]),
            FakeStore::default(),
        )
        .await;

        h.pipeline.run().await;
        let report = h.pipeline.run().await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.uploads.lock().unwrap().len(), 1);
        // 文件夹复用
        assert_eq!(h.store.folders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_mail_means_no_notifications() {
        let h = harness(Vec::new(), ScriptedModel::new(&[]), FakeStore::default()).await;
        let report = h.pipeline.run().await;
        assert_eq!(report, RunReport::default());
        assert!(h.notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn folder_failure_aborts_batch() {
        let store = FakeStore {
            fail_folder: true,
            ..Default::default()
        };
        let h = harness(vec![alert()], ScriptedModel::new(&[]), store).await;

        let report = h.pipeline.run().await;
        assert_eq!(report.batches, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("❌异常: 获取文件夹token失败"));
    }

    #[tokio::test]
    async fn upload_failure_rolls_back_pending_entry() {
        let store = FakeStore {
            fail_upload: AtomicBool::new(true),
            ..Default::default()
        };
        let h = harness(vec![alert()], ScriptedModel::new(&[SUMMARY, KEEP]), store).await;

        let report = h.pipeline.run().await;
        assert_eq!(report.failed, 1);
        assert!(h.db.ledger_entry(&today_str(), PAPER_URL).await.unwrap().is_none());
        assert!(md_files(&h.work_dir).is_empty());

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert!(messages.iter().any(|m| m.starts_with("❌异常: 处理文献失败")));
        assert!(messages.last().unwrap().starts_with("结束执行主题为"));
    }

    #[tokio::test]
    async fn retry_after_failed_upload_keeps_file_name() {
        let store = FakeStore {
            fail_upload: AtomicBool::new(true),
            ..Default::default()
        };
        let h = harness(
            vec![alert()],
            ScriptedModel::new(&[SUMMARY, KEEP, SUMMARY, KEEP]),
            store,
        )
        .await;

        assert_eq!(h.pipeline.run().await.failed, 1);
        h.store.fail_upload.store(false, Ordering::SeqCst);
        assert_eq!(h.pipeline.run().await.published, 1);

        let uploads = h.store.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].1.ends_with("_Deep_atlas.md"));
        assert!(!uploads[0].1.contains("_1.md"));
        assert!(md_files(&h.work_dir).is_empty());
    }

    #[tokio::test]
    async fn pending_entry_confirmed_when_file_exists() {
        let store = FakeStore::default();
        store.existing.lock().unwrap().push(RemoteFile {
            token: "boxcnOld".to_string(),
            name: "20250101_Deep_atlas.md".to_string(),
            kind: "file".to_string(),
        });
        let h = harness(vec![alert()], ScriptedModel::new(&[]), store).await;
        h.db.begin_publish(&today_str(), PAPER_URL, "fldcnBatch", "20250101_Deep_atlas.md")
            .await
            .unwrap();

        let report = h.pipeline.run().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
        assert!(h.db.is_processed(&today_str(), PAPER_URL).await.unwrap());
    }

    #[tokio::test]
    async fn pending_entry_reprocessed_when_file_missing() {
        let h = harness(
            vec![alert()],
            ScriptedModel::new(&[SUMMARY, KEEP]),
            FakeStore::default(),
        )
        .await;
        h.db.begin_publish(&today_str(), PAPER_URL, "fldcnBatch", "lost.md")
            .await
            .unwrap();

        let report = h.pipeline.run().await;
        assert_eq!(report.published, 1);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_drops_duplicate_links() {
        let link = PaperLink {
            title: "a".to_string(),
            url: "https://x/a.pdf".to_string(),
        };
        let batch = Batch::new("s", "2025-01-01_08-00-00", vec![link.clone(), link]);
        assert_eq!(batch.links.len(), 1);
        assert_eq!(batch.label(), "2025-01-01_08-00-00_s");
    }
}
