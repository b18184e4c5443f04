pub mod taxonomy;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use taxonomy::TaxonomyConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
const ENV_PREFIX: &str = "RXIVBOT";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub imap: ImapConfig,
    pub crawler: CrawlerConfig,
    pub extract: ExtractConfig,
    pub llm: LlmConfig,
    pub feishu: FeishuConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub account: String,
    /// 邮箱授权码
    pub password: String,
    pub mailbox: String,
    /// 监控的发件人地址
    pub senders: Vec<String>,
    pub days_recent: i64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub request_delay_ms: u64,
    /// `name=value; name2=value2`，注入到浏览器会话和 HTTP 请求
    pub cookie_string: String,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub webdriver_url: String,
    pub headless: bool,
    /// 需要走浏览器下载的域名（有五秒盾/人机验证）
    pub gated_domains: Vec<String>,
    pub download_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// 建立域名 session 后的等待时间
    pub settle_secs: u64,
    /// `download --concurrent` 未指定 --workers 时使用
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub max_pages: usize,
    pub render_dpi: u32,
    pub pdftoppm_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    /// 提交给大模型前的最大字符数
    pub max_input_chars: usize,
    pub proxy: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeishuConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,
    /// 所有批次文件夹的父目录
    pub root_folder_token: String,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    pub data_dir: String,
    pub log_dir: String,
}

impl AppConfig {
    /// 读取配置文件（可选）并叠加 `RXIVBOT__SECTION__KEY` 环境变量
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("imap.senders")
                    .with_list_parse_key("crawler.browser.gated_domains")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir().join("downloads")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_dir().join("tmp")
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "imap.qq.com".to_string(),
            port: 993,
            account: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
            senders: vec![
                "openRxiv-mailer@alerts.highwire.org".to_string(),
                "cshljnls-mailer@alerts.highwire.org".to_string(),
            ],
            days_recent: 1,
            max_attempts: 5,
            backoff_base_ms: 1000,
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0 Safari/537.36".to_string(),
            request_timeout_secs: 60,
            request_delay_ms: 3000,
            cookie_string: String::new(),
            browser: BrowserConfig::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            gated_domains: vec!["biorxiv.org".to_string(), "medrxiv.org".to_string()],
            download_timeout_secs: 30,
            poll_interval_ms: 1000,
            settle_secs: 5,
            workers: 3,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_pages: 10000,
            render_dpi: 150,
            pdftoppm_path: "pdftoppm".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://ark.cn-beijing.volces.com/api/v3/chat/completions".to_string(),
            model: "deepseek-v3-241226".to_string(),
            temperature: 0.3,
            max_input_chars: 65500,
            proxy: String::new(),
            timeout_secs: 300,
        }
    }
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.feishu.cn/open-apis".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            root_folder_token: String::new(),
            webhook_url: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./data/rxivbot.db".to_string(),
            data_dir: "./data".to_string(),
            log_dir: "./logs".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.imap.max_attempts, 5);
        assert_eq!(config.llm.max_input_chars, 65500);
        assert_eq!(config.imap.senders.len(), 2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[imap]\naccount = \"bot@example.com\"\ndays_recent = 3\n\n[extract]\nmax_pages = 15\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.imap.account, "bot@example.com");
        assert_eq!(config.imap.days_recent, 3);
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.extract.max_pages, 15);
        assert_eq!(config.extract.render_dpi, 150);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut config = AppConfig::default();
        config.feishu.root_folder_token = "fldcnRoot".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.feishu.root_folder_token, "fldcnRoot");
    }
}
