use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use fantoccini::cookies::Cookie;
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::download::{list_pdfs, wait_for_download};
use super::links::PaperLink;
use crate::config::BrowserConfig;
use crate::utils::fs::sanitize_file_name;
use crate::utils::{BotError, BotResult};

/// 批量下载时文件名的最大长度
pub const DOWNLOAD_NAME_LEN: usize = 80;

/// 解析 `name=value; name2=value2` 形式的 cookie 字符串
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|item| {
            let (name, value) = item.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

async fn open_session(
    config: &BrowserConfig,
    user_agent: &str,
    download_dir: &Path,
) -> BotResult<Client> {
    let download_dir = std::fs::canonicalize(download_dir)?;

    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--window-size=1920,1080".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if !user_agent.is_empty() {
        args.push(format!("--user-agent={}", user_agent));
    }

    let mut caps = serde_json::Map::new();
    caps.insert(
        "goog:chromeOptions".to_string(),
        json!({
            "args": args,
            "prefs": {
                "download.default_directory": download_dir.to_string_lossy(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
                "plugins.always_open_pdf_externally": true,
                "profile.default_content_setting_values.automatic_downloads": 1
            }
        }),
    );

    let client = ClientBuilder::rustls()
        .map_err(|e| BotError::BrowserError(e.to_string()))?
        .capabilities(caps)
        .connect(&config.webdriver_url)
        .await
        .map_err(|e| BotError::BrowserError(format!("无法连接 WebDriver: {}", e)))?;
    Ok(client)
}

/// 访问站点首页建立会话，并注入作用域为 `.<domain>` 的 cookie
async fn prepare_domain(
    client: &Client,
    url: &str,
    domain: &str,
    cookie_string: &str,
    settle: Duration,
) -> BotResult<()> {
    let parsed = Url::parse(url).map_err(|e| BotError::BrowserError(e.to_string()))?;
    let root = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or(domain));

    client
        .goto(&root)
        .await
        .map_err(|e| BotError::BrowserError(format!("访问 {} 失败: {}", root, e)))?;
    tokio::time::sleep(settle).await;

    let cookies = parse_cookie_string(cookie_string);
    if cookies.is_empty() {
        return Ok(());
    }

    info!("正在设置 {} 个 Cookie...", cookies.len());
    for (name, value) in cookies {
        let mut cookie = Cookie::new(name.clone(), value);
        cookie.set_domain(format!(".{}", domain));
        cookie.set_path("/");
        if let Err(e) = client.add_cookie(cookie).await {
            warn!("设置 Cookie {} 失败: {}", name, e);
        }
    }
    Ok(())
}

/// 每次下载都新建并关闭一个浏览器会话
pub struct BrowserDownloader {
    config: BrowserConfig,
    user_agent: String,
    cookie_string: String,
}

impl BrowserDownloader {
    pub fn new(config: BrowserConfig, user_agent: String, cookie_string: String) -> Self {
        Self {
            config,
            user_agent,
            cookie_string,
        }
    }

    pub async fn download(&self, url: &str, domain: &str, dir: &Path) -> BotResult<PathBuf> {
        let client = open_session(&self.config, &self.user_agent, dir).await?;
        let result = self.download_with(&client, url, domain, dir).await;

        if let Err(e) = client.close().await {
            debug!("关闭浏览器会话失败: {}", e);
        }
        result
    }

    async fn download_with(
        &self,
        client: &Client,
        url: &str,
        domain: &str,
        dir: &Path,
    ) -> BotResult<PathBuf> {
        let before = list_pdfs(dir);
        prepare_domain(
            client,
            url,
            domain,
            &self.cookie_string,
            Duration::from_secs(self.config.settle_secs),
        )
        .await?;

        info!("浏览器访问: {}", url);
        // PDF 被直接下载时导航本身可能报错，以下载目录为准
        if let Err(e) = client.goto(url).await {
            warn!("页面导航返回错误: {}", e);
        }

        wait_for_download(
            dir,
            &before,
            Duration::from_secs(self.config.download_timeout_secs),
            Duration::from_millis(self.config.poll_interval_ms),
        )
        .await
        .ok_or_else(|| BotError::DownloadTimeout {
            url: url.to_string(),
            secs: self.config.download_timeout_secs,
        })
    }
}

/// 共享下载目录里已被领取的文件。打开会话前已存在的文件、
/// 其他任务已领取或改名后的文件，都不会再被交给新的等待者
pub struct DownloadClaims {
    dir: PathBuf,
    claimed: StdMutex<HashSet<PathBuf>>,
}

impl DownloadClaims {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let existing = list_pdfs(&dir);
        Self {
            dir,
            claimed: StdMutex::new(existing),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        match self.claimed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 导航前调用：目录里当前的文件加上已领取的文件
    pub fn snapshot(&self) -> HashSet<PathBuf> {
        let mut seen = list_pdfs(&self.dir);
        seen.extend(self.lock().iter().cloned());
        seen
    }

    /// 等待一个不在 `ignore` 中且未被领取的新文件并领取它，超时返回 None
    pub async fn take(
        &self,
        mut ignore: HashSet<PathBuf>,
        timeout: Duration,
        interval: Duration,
    ) -> Option<PathBuf> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let found = wait_for_download(&self.dir, &ignore, remaining, interval).await?;
            let fresh = self.lock().insert(found.clone());
            if fresh {
                return Some(found);
            }
            debug!("文件已被其他任务领取: {}", found.display());
            ignore.insert(found);
        }
    }

    /// 把领取到的文件改成 `<stem>.pdf`，目标名在锁内选定并登记
    pub async fn rename(&self, found: &Path, stem: &str) -> BotResult<PathBuf> {
        let target = {
            let mut claimed = self.lock();
            let mut counter = 0;
            loop {
                let candidate = if counter == 0 {
                    self.dir.join(format!("{stem}.pdf"))
                } else {
                    self.dir.join(format!("{stem}_{counter}.pdf"))
                };
                if !candidate.exists() && !claimed.contains(&candidate) {
                    claimed.insert(candidate.clone());
                    break candidate;
                }
                counter += 1;
            }
        };
        tokio::fs::rename(found, &target).await?;
        Ok(target)
    }
}

/// 多个下载任务共享的浏览器会话：导航串行，等待下载并行
pub struct SharedBrowser {
    client: Mutex<Client>,
    claims: DownloadClaims,
    config: BrowserConfig,
    prepared: Mutex<HashSet<String>>,
    cookie_string: String,
}

impl SharedBrowser {
    pub async fn open(
        config: BrowserConfig,
        user_agent: &str,
        cookie_string: String,
        download_dir: PathBuf,
    ) -> BotResult<Self> {
        tokio::fs::create_dir_all(&download_dir).await?;
        let client = open_session(&config, user_agent, &download_dir).await?;
        Ok(Self {
            client: Mutex::new(client),
            claims: DownloadClaims::new(download_dir),
            config,
            prepared: Mutex::new(HashSet::new()),
            cookie_string,
        })
    }

    /// 下载一篇文献并按标题重命名，返回批次目录中的最终路径
    pub async fn download(&self, link: &PaperLink, domain: &str) -> BotResult<PathBuf> {
        let before = {
            let client = self.client.lock().await;

            let mut prepared = self.prepared.lock().await;
            if !prepared.contains(domain) {
                prepare_domain(
                    &client,
                    &link.url,
                    domain,
                    &self.cookie_string,
                    Duration::from_secs(self.config.settle_secs),
                )
                .await?;
                prepared.insert(domain.to_string());
            }
            drop(prepared);

            let before = self.claims.snapshot();
            info!("浏览器访问: {}", link.url);
            if let Err(e) = client.goto(&link.url).await {
                warn!("页面导航返回错误: {}", e);
            }
            before
        };

        let found = self
            .claims
            .take(
                before,
                Duration::from_secs(self.config.download_timeout_secs),
                Duration::from_millis(self.config.poll_interval_ms),
            )
            .await
            .ok_or_else(|| BotError::DownloadTimeout {
                url: link.url.clone(),
                secs: self.config.download_timeout_secs,
            })?;

        let target = self
            .claims
            .rename(&found, &sanitize_file_name(&link.title, DOWNLOAD_NAME_LEN))
            .await?;
        info!("✅ 已保存: {}", target.display());
        Ok(target)
    }

    pub async fn close(self) {
        let client = self.client.into_inner();
        if let Err(e) = client.close().await {
            debug!("关闭浏览器会话失败: {}", e);
        }
    }
}
