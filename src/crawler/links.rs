use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::mail::ERROR_CONTENT;
use crate::utils::fs::{sanitize_file_name, DEFAULT_NAME_LEN};

/// 邮件中提取出的一篇文献。`url` 在本地目录/补充模式下也可以是文件路径。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperLink {
    pub title: String,
    pub url: String,
}

/// 纯文本格式中标题行以 7 个空格开头
const TITLE_INDENT: &str = "       ";

pub fn extract_links(content: &str) -> Vec<PaperLink> {
    let links = if content.contains(ERROR_CONTENT) {
        info!("正文含解码失败标记，使用纯文本方式提取链接");
        extract_from_plaintext(content)
    } else {
        extract_from_html(content)
    };
    info!("提取到 {} 个文献链接", links.len());
    links
}

fn extract_from_html(content: &str) -> Vec<PaperLink> {
    let doc = Html::parse_document(content);
    let (Ok(title_sel), Ok(list_sel), Ok(anchor_sel)) = (
        Selector::parse("div.citation_title"),
        Selector::parse("div.view_list"),
        Selector::parse("a[href]"),
    ) else {
        return Vec::new();
    };

    let titles: Vec<String> = doc
        .select(&title_sel)
        .map(|node| node.text().collect::<String>().trim().to_string())
        .collect();

    let mut urls = Vec::new();
    for list in doc.select(&list_sel) {
        let anchors: Vec<_> = list
            .select(&anchor_sel)
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                href.starts_with("http")
                    .then(|| (href.to_string(), a.text().collect::<String>()))
            })
            .collect();

        if let Some((href, _)) = anchors.iter().find(|(_, text)| text.trim() == "[PDF]") {
            urls.push(href.clone());
        } else if let Some((href, _)) = anchors.first() {
            // 没有 [PDF] 链接时用文章页地址拼出全文 PDF
            let article = href.split('?').next().unwrap_or(href);
            urls.push(format!("{}.full.pdf", article));
        }
    }

    if titles.len() != urls.len() {
        debug!("标题数 {} 与链接数 {} 不一致", titles.len(), urls.len());
    }

    urls.into_iter()
        .enumerate()
        .map(|(i, url)| {
            let url = normalize_url(&url);
            let title = match titles.get(i).filter(|t| !t.is_empty()) {
                Some(t) => sanitize_file_name(t, DEFAULT_NAME_LEN),
                None => title_from_url(&url),
            };
            PaperLink { title, url }
        })
        .collect()
}

fn extract_from_plaintext(content: &str) -> Vec<PaperLink> {
    let parts: Vec<&str> = content.split("http://").collect();
    let mut links = Vec::new();

    for i in 1..parts.len() {
        let Some(rest) = parts[i].split_whitespace().next() else {
            continue;
        };
        let url = normalize_url(&format!("http://{}", rest));

        let title = parts[i - 1]
            .split("\\r\\n")
            .flat_map(|chunk| chunk.split(['\r', '\n']))
            .filter(|line| !line.trim().is_empty() && line.starts_with(TITLE_INDENT))
            .last()
            .map(|line| sanitize_file_name(line.trim(), DEFAULT_NAME_LEN))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| title_from_url(&url));

        links.push(PaperLink { title, url });
    }
    links
}

fn repeated_question_marks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\?{2,}").expect("static regex"))
}

fn legacy_abstract() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"cgi/content/abstract/(\d{4}\.\d{2}\.\d{2}\.\d+v\d+)").expect("static regex")
    })
}

/// 修正提醒邮件中常见的链接问题
pub fn normalize_url(raw: &str) -> String {
    let mut url = unwrap_redirect(raw.trim()).unwrap_or_else(|| raw.trim().to_string());

    url = repeated_question_marks().replace_all(&url, "?").into_owned();
    if let Some(stripped) = url.strip_suffix("?collection") {
        url = stripped.to_string();
    }
    if let Some(stripped) = url.strip_suffix('?') {
        url = stripped.to_string();
    }

    if let Some(caps) = legacy_abstract().captures(&url) {
        let rewritten = format!("https://www.biorxiv.org/content/10.1101/{}.abstract", &caps[1]);
        debug!("旧格式链接 {} 转换为 {}", url, rewritten);
        return rewritten;
    }
    url
}

/// 跳转链接（`...?url=<encoded>`）还原为真实地址
fn unwrap_redirect(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .filter(|v| v.starts_with("http"))
}

/// 没有标题时用链接最后一段作为标题
pub(crate) fn title_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path);
    let stem = segment
        .strip_suffix(".full.pdf")
        .or_else(|| segment.strip_suffix(".pdf"))
        .unwrap_or(segment);
    let title = sanitize_file_name(stem, DEFAULT_NAME_LEN);
    if title.is_empty() {
        "untitled".to_string()
    } else {
        title
    }
}
