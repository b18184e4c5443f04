pub mod decode;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};

use crate::config::ImapConfig;
use crate::utils::retry::with_backoff;
use crate::utils::{BotError, BotResult};

pub use decode::{parse_message, ERROR_CONTENT};

#[derive(Debug, Clone)]
pub struct MailMessage {
    pub sender: String,
    pub subject: String,
    pub date: DateTime<FixedOffset>,
    pub body: String,
}

#[async_trait]
pub trait MailSource: Send + Sync {
    /// 返回白名单发件人在最近窗口内的邮件，连接彻底失败时返回空列表
    async fn fetch_recent(&self) -> Vec<MailMessage>;
}

pub struct ImapMailSource {
    config: ImapConfig,
}

impl ImapMailSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    async fn fetch_once(&self) -> BotResult<Vec<Vec<u8>>> {
        let host = self.config.host.as_str();
        let tcp = TcpStream::connect((host, self.config.port)).await?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| BotError::MailError(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        let server_name = rustls::pki_types::ServerName::try_from(host.to_owned())
            .map_err(|e| BotError::MailError(format!("无效的主机名 {}: {}", host, e)))?;
        let stream = TlsConnector::from(Arc::new(tls_config))
            .connect(server_name, tcp)
            .await?;

        let mut client = async_imap::Client::new(stream);
        let _greeting = client.read_response().await;

        let mut session = client
            .login(&self.config.account, &self.config.password)
            .await
            .map_err(|(e, _)| BotError::MailError(format!("登录失败: {}", e)))?;
        info!("✅ 邮箱登录成功: {}", self.config.account);

        session
            .select(&self.config.mailbox)
            .await
            .map_err(|e| BotError::MailError(format!("选择邮箱失败: {}", e)))?;

        let since = (Local::now() - chrono::Duration::days(self.config.days_recent))
            .format("%d-%b-%Y")
            .to_string();

        let mut seqs = BTreeSet::new();
        for sender in &self.config.senders {
            let query = format!("FROM \"{}\" SINCE {}", sender, since);
            let found = session
                .search(&query)
                .await
                .map_err(|e| BotError::MailError(format!("搜索失败 ({}): {}", query, e)))?;
            debug!("{} 命中 {} 封邮件", query, found.len());
            seqs.extend(found);
        }

        let mut raws = Vec::new();
        for seq in seqs {
            let fetched: Vec<_> = match session.fetch(seq.to_string(), "RFC822").await {
                Ok(stream) => match stream.try_collect().await {
                    Ok(items) => items,
                    Err(e) => {
                        warn!("读取邮件 {} 失败: {}", seq, e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("获取邮件 {} 失败: {}", seq, e);
                    continue;
                }
            };
            raws.extend(fetched.iter().filter_map(|f| f.body().map(|b| b.to_vec())));
        }

        if let Err(e) = session.logout().await {
            debug!("退出登录失败: {}", e);
        }
        Ok(raws)
    }

    /// 发件人包含白名单地址，且日期在最近 `days_recent` 天内
    fn accept(&self, message: &MailMessage) -> bool {
        let sender = message.sender.to_lowercase();
        let allowed = self
            .config
            .senders
            .iter()
            .any(|s| sender.contains(&s.to_lowercase()));
        let cutoff = Local::now() - chrono::Duration::days(self.config.days_recent);
        allowed && message.date >= cutoff
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_recent(&self) -> Vec<MailMessage> {
        let base_delay = Duration::from_millis(self.config.backoff_base_ms);
        let raws = match with_backoff("IMAP 获取邮件", self.config.max_attempts, base_delay, |_| {
            self.fetch_once()
        })
        .await
        {
            Ok(raws) => raws,
            Err(e) => {
                error!("❌ 邮箱连接失败，放弃本次运行: {}", e);
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for raw in raws {
            match parse_message(&raw) {
                Ok(message) if self.accept(&message) => messages.push(message),
                Ok(message) => debug!("跳过邮件: {} ({})", message.subject, message.sender),
                Err(e) => warn!("解析邮件失败，已跳过: {}", e),
            }
        }

        messages.sort_by_key(|m| m.date);
        info!("📬 获取到 {} 封符合条件的邮件", messages.len());
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, days_ago: i64) -> MailMessage {
        MailMessage {
            sender: sender.to_string(),
            subject: "alert".to_string(),
            date: (Local::now() - chrono::Duration::days(days_ago)).fixed_offset(),
            body: String::new(),
        }
    }

    #[test]
    fn accepts_allow_listed_recent_sender() {
        let source = ImapMailSource::new(ImapConfig::default());
        assert!(source.accept(&message("bioRxiv <openRxiv-mailer@alerts.highwire.org>", 0)));
        assert!(!source.accept(&message("someone@example.com", 0)));
        assert!(!source.accept(&message("openRxiv-mailer@alerts.highwire.org", 3)));
    }

    #[tokio::test]
    async fn unreachable_server_yields_empty_result() {
        let config = ImapConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            max_attempts: 5,
            backoff_base_ms: 1,
            ..ImapConfig::default()
        };
        let source = ImapMailSource::new(config);
        assert!(source.fetch_recent().await.is_empty());
    }
}
