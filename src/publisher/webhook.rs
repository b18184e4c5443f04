use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

/// 进度/异常通知。发送失败只记日志，不影响主流程。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// 飞书群机器人 webhook
pub struct FeishuWebhook {
    client: Client,
    url: String,
}

impl FeishuWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for FeishuWebhook {
    async fn notify(&self, text: &str) {
        if self.url.is_empty() {
            info!("[通知] {}", text);
            return;
        }

        let payload = json!({
            "msg_type": "text",
            "content": { "text": text }
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("通知已发送: {}", text);
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("通知发送失败 {}: {}", status, body);
            }
            Err(e) => warn!("通知发送失败: {}", e),
        }
    }
}
