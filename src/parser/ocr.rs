use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::publisher::FeishuAuth;
use crate::utils::BotResult;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 输入 JPEG 的 Base64，返回识别出的文本（按行拼接）
    async fn recognize(&self, image_base64: &str) -> BotResult<String>;
}

#[derive(Debug, Deserialize)]
struct RecognizeData {
    #[serde(default)]
    text_list: Vec<String>,
}

/// 飞书通用文字识别
pub struct FeishuOcr {
    auth: Arc<FeishuAuth>,
}

impl FeishuOcr {
    pub fn new(auth: Arc<FeishuAuth>) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl OcrEngine for FeishuOcr {
    async fn recognize(&self, image_base64: &str) -> BotResult<String> {
        let url = format!(
            "{}/optical_char_recognition/v1/image/basic_recognize",
            self.auth.base_url()
        );
        let request = self
            .auth
            .client()
            .post(&url)
            .json(&json!({ "image": image_base64 }));
        let data: RecognizeData = self.auth.send_json(request).await?;
        Ok(data.text_list.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeishuConfig;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn joins_text_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "tenant_access_token": "t-1", "expire": 7200
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/optical_char_recognition/v1/image/basic_recognize"))
            .and(body_json(json!({ "image": "aGVsbG8=" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "text_list": ["Figure 1", "Cell counts"] }
            })))
            .mount(&server)
            .await;

        let config = FeishuConfig {
            base_url: server.uri(),
            app_id: "cli_x".to_string(),
            app_secret: "secret".to_string(),
            ..FeishuConfig::default()
        };
        let ocr = FeishuOcr::new(Arc::new(FeishuAuth::new(&config).unwrap()));
        assert_eq!(ocr.recognize("aGVsbG8=").await.unwrap(), "Figure 1\nCell counts");
    }
}
