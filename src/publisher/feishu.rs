use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::FeishuConfig;
use crate::storage::cache::Cache;
use crate::utils::{BotError, BotResult};

const TOKEN_KEY: &str = "tenant_access_token";
const LIST_PAGE_SIZE: u32 = 100;
/// token 失效/过期的错误码，出现时清掉缓存，下一次请求重新获取
const INVALID_TOKEN_CODES: [i64; 3] = [99991661, 99991663, 99991668];

/// 云空间中的文件或文件夹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub token: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 在根目录下创建文件夹，返回 folder token
    async fn create_folder(&self, name: &str) -> BotResult<String>;
    /// 上传文件到指定文件夹，返回 file token
    async fn upload(&self, folder_token: &str, path: &Path) -> BotResult<String>;
    async fn list_files(&self, folder_token: &str) -> BotResult<Vec<RemoteFile>>;
}

/// 开放平台统一的响应外壳
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub(crate) fn into_data(self) -> BotResult<T> {
        if self.code != 0 {
            return Err(BotError::FeishuError {
                code: self.code,
                msg: self.msg,
            });
        }
        self.data.ok_or_else(|| BotError::FeishuError {
            code: self.code,
            msg: "响应缺少 data 字段".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: i64,
}

/// tenant_access_token 获取与缓存，过期前 5 分钟刷新
pub struct FeishuAuth {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    cache: Cache<String>,
}

impl FeishuAuth {
    pub fn new(config: &FeishuConfig) -> BotResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            cache: Cache::new(chrono::Duration::minutes(5)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn tenant_token(&self) -> BotResult<String> {
        if let Some(token) = self.cache.get(TOKEN_KEY) {
            return Ok(token);
        }
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            return Err(BotError::ConfigError(
                "未配置飞书 app_id / app_secret".to_string(),
            ));
        }

        let url = format!("{}/auth/v3/tenant_access_token/internal", self.base_url);
        let response: TokenResponse = self
            .client
            .post(&url)
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await?
            .json()
            .await?;

        if response.code != 0 {
            return Err(BotError::FeishuError {
                code: response.code,
                msg: response.msg,
            });
        }

        debug!("获取 tenant_access_token 成功，有效期 {} 秒", response.expire);
        self.cache.set(
            TOKEN_KEY.to_string(),
            response.tenant_access_token.clone(),
            chrono::Duration::seconds(response.expire),
        );
        Ok(response.tenant_access_token)
    }

    /// 带鉴权的 JSON 请求，解析统一外壳
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> BotResult<T> {
        let token = self.tenant_token().await?;
        let response: ApiResponse<T> = request.bearer_auth(token).send().await?.json().await?;
        if INVALID_TOKEN_CODES.contains(&response.code) {
            warn!("tenant_access_token 已失效 (code={})，清除缓存", response.code);
            self.cache.invalidate(TOKEN_KEY);
        }
        response.into_data()
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

#[derive(Debug, Deserialize)]
struct FolderData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    file_token: String,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// 飞书云空间
pub struct FeishuDrive {
    auth: Arc<FeishuAuth>,
    root_folder_token: String,
}

impl FeishuDrive {
    pub fn new(auth: Arc<FeishuAuth>, root_folder_token: String) -> Self {
        Self {
            auth,
            root_folder_token,
        }
    }
}

#[async_trait]
impl DocumentStore for FeishuDrive {
    async fn create_folder(&self, name: &str) -> BotResult<String> {
        let url = format!("{}/drive/v1/files/create_folder", self.auth.base_url());
        let request = self
            .auth
            .client()
            .post(&url)
            .json(&json!({ "name": name, "folder_token": self.root_folder_token }));
        let data: FolderData = self.auth.send_json(request).await?;
        info!("📁 创建文件夹成功: {} ({})", name, data.token);
        Ok(data.token)
    }

    async fn upload(&self, folder_token: &str, path: &Path) -> BotResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BotError::IoError(std::io::Error::other("缺少文件名")))?;

        let form = Form::new()
            .text("file_name", file_name.clone())
            .text("parent_type", "explorer")
            .text("parent_node", folder_token.to_string())
            .text("size", bytes.len().to_string())
            .part("file", Part::bytes(bytes).file_name(file_name.clone()));

        let url = format!("{}/drive/v1/files/upload_all", self.auth.base_url());
        let request = self.auth.client().post(&url).multipart(form);
        let data: UploadData = self.auth.send_json(request).await?;
        info!("☁️ 上传成功: {} ({})", file_name, data.file_token);
        Ok(data.file_token)
    }

    async fn list_files(&self, folder_token: &str) -> BotResult<Vec<RemoteFile>> {
        let url = format!("{}/drive/v1/files", self.auth.base_url());
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("folder_token", folder_token.to_string()),
                ("page_size", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let request = self.auth.client().get(&url).query(&query);
            let data: ListData = self.auth.send_json(request).await?;
            files.extend(data.files);

            match data.next_page_token.filter(|t| data.has_more && !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }
}
