use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::prompts::PromptTemplate;
use crate::config::LlmConfig;
use crate::utils::{BotError, BotResult};

const MAX_ATTEMPTS: u32 = 3;
/// 每次成功调用后的间隔
const RATE_SPACING: Duration = Duration::from_millis(500);

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &PromptTemplate) -> BotResult<String>;
}

/// OpenAI 兼容的 chat/completions 请求体
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct OpenAiCompatModel {
    client: reqwest::Client,
    config: LlmConfig,
    retry_base: Duration,
}

impl OpenAiCompatModel {
    pub fn new(config: LlmConfig) -> BotResult<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if !config.proxy.is_empty() {
            match reqwest::Proxy::all(&config.proxy) {
                Ok(proxy) => {
                    info!("使用代理: {}", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("代理配置无效 '{}': {}", config.proxy, e);
                }
            }
        }

        let client = builder.build()?;
        Ok(Self {
            client,
            config,
            retry_base: Duration::from_millis(500),
        })
    }

    /// 检查 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty() && self.config.api_key != "your-api-key"
    }

    async fn do_request(&self, prompt: &PromptTemplate) -> BotResult<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::LlmError(format!("API 返回错误 {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| BotError::LlmError(format!("解析 API 响应失败: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BotError::LlmError("响应中没有 choices".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    /// 带重试：失败后等待 500ms * 2^n
    async fn complete(&self, prompt: &PromptTemplate) -> BotResult<String> {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = self.retry_base * 2u32.pow(attempt);
                info!(
                    "API 重试 ({}/{})，等待 {}ms...",
                    attempt + 1,
                    MAX_ATTEMPTS,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match self.do_request(prompt).await {
                Ok(content) => {
                    tokio::time::sleep(RATE_SPACING).await;
                    return Ok(content);
                }
                Err(e) => {
                    warn!("API 调用失败 (尝试 {}/{}): {}", attempt + 1, MAX_ATTEMPTS, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BotError::LlmError("API 调用失败".to_string())))
    }
}
