use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use super::browser::BrowserDownloader;
use crate::config::CrawlerConfig;
use crate::utils::{BotError, BotResult};

const PDF_MAGIC: &[u8] = b"%PDF";

/// 本地路径、普通 HTTP 和浏览器下载三种方式获取 PDF 字节
pub struct Acquirer {
    client: Client,
    config: CrawlerConfig,
    browser: Option<BrowserDownloader>,
    work_dir: PathBuf,
}

impl Acquirer {
    pub fn new(config: &CrawlerConfig, work_dir: impl Into<PathBuf>) -> BotResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let browser = config.browser.enabled.then(|| {
            BrowserDownloader::new(
                config.browser.clone(),
                config.user_agent.clone(),
                config.cookie_string.clone(),
            )
        });

        Ok(Self {
            client,
            config: config.clone(),
            browser,
            work_dir: work_dir.into(),
        })
    }

    pub async fn fetch(&self, location: &str) -> BotResult<Vec<u8>> {
        let Some(url) = Url::parse(location).ok().filter(|u| u.scheme().starts_with("http")) else {
            debug!("读取本地文件: {}", location);
            return Ok(tokio::fs::read(location).await?);
        };

        let gated = self.gated_domain(&url);
        if let Some(domain) = &gated {
            if self.browser.is_some() {
                return self.fetch_via_browser(location, domain).await;
            }
        }

        if self.config.request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
        }

        match self.fetch_http(location).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => match (&gated, &self.browser) {
                (Some(domain), Some(_)) => {
                    warn!("直接下载失败，改用浏览器: {} ({})", location, e);
                    self.fetch_via_browser(location, domain).await
                }
                _ => Err(e),
            },
        }
    }

    async fn fetch_http(&self, url: &str) -> BotResult<Vec<u8>> {
        info!("下载PDF: {}", url);
        let mut request = self.client.get(url).header(USER_AGENT, &self.config.user_agent);
        if !self.config.cookie_string.is_empty() {
            request = request.header(COOKIE, &self.config.cookie_string);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::PdfError(format!("下载失败，状态码: {}", status)));
        }

        let bytes = response.bytes().await?;
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(BotError::PdfError(format!("响应不是PDF文件: {}", url)));
        }
        Ok(bytes.to_vec())
    }

    async fn fetch_via_browser(&self, url: &str, domain: &str) -> BotResult<Vec<u8>> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| BotError::BrowserError("浏览器下载未启用".to_string()))?;

        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let attempt_dir = self.work_dir.join(format!("browser-{}", nonce));
        tokio::fs::create_dir_all(&attempt_dir).await?;

        let result: BotResult<Vec<u8>> = async {
            let path = browser.download(url, domain, &attempt_dir).await?;
            Ok(tokio::fs::read(&path).await?)
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&attempt_dir).await {
            debug!("清理下载目录失败 {}: {}", attempt_dir.display(), e);
        }
        result
    }

    fn gated_domain(&self, url: &Url) -> Option<String> {
        gated_domain(url, &self.config.browser.gated_domains)
    }
}

/// 返回命中的受保护域名（用于 cookie 作用域）
pub fn gated_domain(url: &Url, domains: &[String]) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    domains
        .iter()
        .find(|d| host == d.as_str() || host.ends_with(&format!(".{}", d)))
        .cloned()
}

/// 浏览器下载中的文件是 `.crdownload`/`.part`/`.tmp` 后缀，只有 `.pdf` 才算完成
pub fn is_completed_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

pub fn list_pdfs(dir: &Path) -> HashSet<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_completed_pdf(p))
                .collect()
        })
        .unwrap_or_default()
}

/// 轮询下载目录，直到出现一个不在 `ignore` 中的完整 PDF 或超时
pub async fn wait_for_download(
    dir: &Path,
    ignore: &HashSet<PathBuf>,
    timeout: Duration,
    interval: Duration,
) -> Option<PathBuf> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut fresh: Vec<PathBuf> = list_pdfs(dir)
            .into_iter()
            .filter(|p| !ignore.contains(p))
            .filter(|p| std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
            .collect();
        fresh.sort();
        if let Some(path) = fresh.into_iter().next() {
            info!("下载完成: {}", path.display());
            return Some(path);
        }

        if Instant::now() >= deadline {
            warn!("下载超时: {}", dir.display());
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}
