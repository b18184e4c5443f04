use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TAXONOMY_PATH: &str = "config/taxonomy.toml";

/// 文献分类体系，供两个大模型角色的提示词和分类结果判定使用
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    /// 一级分类
    pub primary: Vec<String>,
    /// 二级分类（研究方向）
    pub secondary: Vec<String>,
    /// 出现即视为"丢弃"的标记
    pub discard_markers: Vec<String>,
    /// 结构化结果中表示丢弃的层级取值
    pub discard_tier: String,
}

impl TaxonomyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: TaxonomyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn is_discard_marker(&self, value: &str) -> bool {
        let value = value.trim();
        self.discard_markers.iter().any(|m| m == value)
    }

    pub fn primary_list(&self) -> String {
        self.primary
            .iter()
            .map(|c| format!("'{}'", c))
            .collect::<Vec<_>>()
            .join("、")
    }

    pub fn secondary_list(&self) -> String {
        self.secondary.join("、")
    }
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            primary: vec![
                "生物信息学算法".to_string(),
                "生物数据分析".to_string(),
                "计算生物学建模".to_string(),
            ],
            secondary: [
                "机器学习", "序列分析", "基因比对", "结构预测", "算法开发", "深度学习",
                "大模型", "数据处理", "单细胞数据注释工具", "单细胞多组学分析",
                "空间转录组数据分析", "统计分析",
                "多组学整合（基因组、转录组、蛋白质组、代谢组、表观组等）",
                "实验数据挖掘", "数学建模", "系统生物学", "计算模拟", "网络分析",
                "生物物理建模",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            discard_markers: vec!["忽略".to_string()],
            discard_tier: "第三类".to_string(),
        }
    }
}
