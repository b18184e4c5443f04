pub mod classify;
pub mod client;
pub mod prompts;

pub use classify::{parse_classification, Classification};
pub use client::{ChatModel, OpenAiCompatModel};
pub use prompts::PromptTemplate;

use std::sync::Arc;

use chrono::Local;
use tracing::info;

use crate::config::TaxonomyConfig;
use crate::crawler::PaperLink;
use crate::utils::fs::{sanitize_file_name, DEFAULT_NAME_LEN};
use crate::utils::BotResult;

/// 可发布的总结结果
#[derive(Debug, Clone)]
pub struct PaperSummary {
    /// `YYYYMMDD_<标题>`，用作文件名
    pub label: String,
    pub markdown: String,
}

/// 总结 + 分类两步流水线
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    taxonomy: TaxonomyConfig,
    max_input_chars: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>, taxonomy: TaxonomyConfig, max_input_chars: usize) -> Self {
        Self {
            model,
            taxonomy,
            max_input_chars,
        }
    }

    /// 返回 `None` 表示分类结果为丢弃
    pub async fn process(&self, text: &str, link: &PaperLink) -> BotResult<Option<PaperSummary>> {
        let input = prompts::truncate_chars(text, self.max_input_chars);
        if input.len() < text.len() {
            info!(
                "输入内容长度为 {}，超过最大长度 {}，已截断",
                text.chars().count(),
                self.max_input_chars
            );
        }

        let summary = self
            .model
            .complete(&prompts::summarize_prompt(input, &link.url, &self.taxonomy))
            .await?;

        let classify_input = prompts::truncate_chars(&summary, self.max_input_chars);
        let raw = self
            .model
            .complete(&prompts::classify_prompt(classify_input, &self.taxonomy))
            .await?;
        let classification = parse_classification(&raw, &self.taxonomy);
        info!("文献分类: {:?}", classification);

        let (primary, secondary) = match &classification {
            Classification::Discard { reason } => {
                info!("分类为丢弃 ({})，跳过: {}", reason, link.url);
                return Ok(None);
            }
            Classification::Keep { primary, secondary } => (primary, secondary),
        };

        let markdown = format!(
            "{}\n\n## 文献分类\n- 一级分类：{}\n- 二级分类：{}\n\n## 原文链接\n{}\n",
            summary.trim_end(),
            primary,
            secondary.join("、"),
            link.url
        );

        Ok(Some(PaperSummary {
            label: make_label(&link.title, &summary),
            markdown,
        }))
    }
}

/// 标题为空时退回到总结里的一级标题
fn make_label(title: &str, summary: &str) -> String {
    let heading = summary
        .lines()
        .find_map(|l| l.trim().strip_prefix("# "))
        .unwrap_or("untitled");
    let source = if title.trim().is_empty() { heading } else { title };
    format!(
        "{}_{}",
        Local::now().format("%Y%m%d"),
        sanitize_file_name(source, DEFAULT_NAME_LEN)
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 依次返回预设回复，并记录收到的提示词
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        pub prompts: Mutex<Vec<PromptTemplate>>,
    }

    impl ScriptedModel {
        pub fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// 每篇文献都先返回总结，再返回同一个分类结果
        pub fn repeating(summary: &str, classification: &str, times: usize) -> Self {
            let mut replies = Vec::new();
            for _ in 0..times {
                replies.push(summary);
                replies.push(classification);
            }
            Self::new(&replies)
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, prompt: &PromptTemplate) -> BotResult<String> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| crate::utils::BotError::LlmError("no scripted reply".to_string()))
        }
    }
}
