use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TaxonomyConfig;

/// 分类结果：保留（附分类）或丢弃（附原因）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Keep {
        primary: String,
        secondary: Vec<String>,
    },
    Discard {
        reason: String,
    },
}

impl Classification {
    pub fn is_discard(&self) -> bool {
        matches!(self, Classification::Discard { .. })
    }
}

/// 分类角色要求输出的结构
#[derive(Debug, Deserialize)]
struct ClassificationRecord {
    #[serde(default)]
    category: String,
    #[serde(default)]
    subcategories: Subcategories,
    #[serde(default)]
    tier: String,
    #[serde(default, deserialize_with = "flag")]
    ignore: bool,
}

impl ClassificationRecord {
    /// 字段名不对时 serde 仍会给出全默认值的记录
    fn is_blank(&self) -> bool {
        self.category.trim().is_empty() && self.tier.trim().is_empty() && !self.ignore
    }
}

/// `ignore` 可能是布尔值，也可能是 "true" / "是" 这样的字符串
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1" | "是")
        }
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    })
}

/// 模型有时把二级分类写成字符串而不是数组
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Subcategories {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl Subcategories {
    fn into_vec(self) -> Vec<String> {
        match self {
            Subcategories::None => Vec::new(),
            Subcategories::One(s) => s
                .split(['、', ',', '，'])
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            Subcategories::Many(v) => v,
        }
    }
}

/// 解析分类角色的输出。结构化解析失败时退回到丢弃标记的子串匹配，永不报错。
pub fn parse_classification(raw: &str, taxonomy: &TaxonomyConfig) -> Classification {
    match parse_record(raw) {
        Some(record) if !record.is_blank() => from_record(record, taxonomy),
        _ => {
            debug!("分类结果不是有效 JSON，使用关键字匹配");
            fallback(raw, taxonomy)
        }
    }
}

fn parse_record(raw: &str) -> Option<ClassificationRecord> {
    let body = strip_fence(raw.trim());
    if let Ok(record) = serde_json::from_str(body) {
        return Some(record);
    }
    // 前后夹杂说明文字时取第一个 `{` 到最后一个 `}`
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn from_record(record: ClassificationRecord, taxonomy: &TaxonomyConfig) -> Classification {
    let category = record.category.trim().to_string();
    let tier = record.tier.trim();

    let reason = if record.ignore {
        Some("ignore=true".to_string())
    } else if taxonomy.is_discard_marker(&category) {
        Some(format!("category={}", category))
    } else if !tier.is_empty() && tier == taxonomy.discard_tier {
        Some(format!("tier={}", tier))
    } else {
        None
    };

    match reason {
        Some(reason) => Classification::Discard { reason },
        None => Classification::Keep {
            primary: category,
            secondary: record.subcategories.into_vec(),
        },
    }
}

fn fallback(raw: &str, taxonomy: &TaxonomyConfig) -> Classification {
    if let Some(marker) = taxonomy
        .discard_markers
        .iter()
        .find(|m| !m.is_empty() && raw.contains(m.as_str()))
    {
        return Classification::Discard {
            reason: format!("包含标记 {}", marker),
        };
    }

    let primary = raw.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
    if primary.is_empty() {
        warn!("分类结果为空，按未分类保留");
    }
    Classification::Keep {
        primary,
        secondary: Vec::new(),
    }
}
