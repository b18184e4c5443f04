use crate::config::TaxonomyConfig;

/// 一次大模型调用的提示词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

/// 按字符截断（不是字节）
pub fn truncate_chars(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

/// 角色一：清理、翻译并总结论文
pub fn summarize_prompt(content: &str, url: &str, taxonomy: &TaxonomyConfig) -> PromptTemplate {
    let system = "你是一名专业的学术内容处理专家，能够高效地清理、翻译和总结学术论文，\
                  确保技术术语的准确性和学术严谨性。"
        .to_string();

    let user = format!(
        "请清理以下 PDF 文件内容，并将其转换为学术论文的格式，同时翻译成中文。\n\
         确保输出的格式如下：\n\
         【原文链接】：{url}\n\
         【精读地址】从 PDF 中提取的 DOI 链接或官方发布地址\n\
         【代码地址】从 PDF 中提取的代码仓库地址，如 GitHub/Zenodo 等，若无则填写“文中未提供”\n\
         - 论文标题使用一级标题（#）\n\
         - 其他部分（研究问题、关键词、方法、创新点和结论）使用二级标题（##）\n\
         - 删除冗余信息，如广告、非学术内容、页眉页脚等\n\
         - 从 PDF 文件中提取论文标题、作者、DOI、arXiv/bioRxiv 链接（如果有）\n\
         - {primary} 为文献领域分类的一级分类\n\
         - {secondary} 为二级分类\n\n\
         输出大纲：论文中文标题、论文英文标题、关键词、期刊、作者和作者单位、研究问题、方法、\
         创新点、文献领域分类（一级分类 二级分类）、研究内容补充、扩展应用、结论、总结。\
         研究问题、方法、创新点和结论均需输出中文，参考文献可忽略。\n\n\
         内容如下：\n\n{content}",
        url = url,
        primary = taxonomy.primary_list(),
        secondary = taxonomy.secondary_list(),
        content = content,
    );

    PromptTemplate { system, user }
}

/// 角色二：判断文献类型，要求输出 JSON
pub fn classify_prompt(summary: &str, taxonomy: &TaxonomyConfig) -> PromptTemplate {
    let discard = taxonomy
        .discard_markers
        .first()
        .map(String::as_str)
        .unwrap_or("忽略");

    let system = format!(
        "你是一名精通生物学与计算机算法交叉领域的专家，擅长分析文献的研究问题、数据类型、\
         计算方法和生物学背景，从而准确判断其所属的学术领域。一级分类：{}；二级分类：{}。",
        taxonomy.primary_list(),
        taxonomy.secondary_list()
    );

    let user = format!(
        "请阅读以下论文内容，分析其研究问题、方法和结论，判断该论文属于哪个一级分类，\
         并给出对应的二级分类。请基于论文的核心研究内容进行判断，而不是仅仅依赖于关键词。\n\
         只输出一个 JSON 对象，不要输出任何其他内容：\n\
         {{\"category\": \"一级分类\", \"subcategories\": [\"二级分类\"], \"tier\": \"第一类/第二类/{tier}\", \"ignore\": false}}\n\
         如果不属于上述任何领域，category 填写 \"{discard}\"，tier 填写 \"{tier}\"，ignore 填写 true。\n\n\
         论文内容如下：\n\n{summary}",
        tier = taxonomy.discard_tier,
        discard = discard,
        summary = summary,
    );

    PromptTemplate { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate_chars("单细胞abc", 3), "单细胞");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn prompts_embed_taxonomy_and_link() {
        let taxonomy = TaxonomyConfig::default();
        let p = summarize_prompt("BODY", "https://x/y.pdf", &taxonomy);
        assert!(p.user.contains("【原文链接】：https://x/y.pdf"));
        assert!(p.user.contains("'生物数据分析'"));
        assert!(p.user.ends_with("BODY"));

        let c = classify_prompt("SUMMARY", &taxonomy);
        assert!(c.user.contains("\"忽略\""));
        assert!(c.user.contains("第三类"));
        assert!(c.user.ends_with("SUMMARY"));
    }
}
