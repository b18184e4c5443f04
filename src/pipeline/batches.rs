use std::path::Path;

use chrono::Local;
use tracing::{info, warn};

use super::Batch;
use crate::crawler::links::title_from_url;
use crate::crawler::{normalize_url, PaperLink};
use crate::utils::fs::{format_email_date, sanitize_file_name, DEFAULT_NAME_LEN, EMAIL_DATE_LAYOUT};
use crate::utils::BotResult;

/// 下载目录名 `<主题>&&time&&<日期>` 中的分隔符
pub const DIR_SEPARATOR: &str = "&&time&&";
pub const RETRY_SUBJECT: &str = "异常文件补充";

pub fn batch_dir_name(subject: &str, mail_date: &str) -> String {
    format!(
        "{}{}{}",
        sanitize_file_name(subject, DEFAULT_NAME_LEN),
        DIR_SEPARATOR,
        mail_date
    )
}

/// 扫描下载目录，每个 `<主题>&&time&&<日期>` 子目录是一个批次，
/// 目录下的 PDF 按文件名排序，标题取文件名
pub fn batches_from_dir(root: &Path) -> BotResult<Vec<Batch>> {
    if let Some(batch) = batch_from_subdir(root)? {
        return Ok(vec![batch]);
    }

    let mut dirs: Vec<_> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let mut batches = Vec::new();
    for dir in dirs {
        match batch_from_subdir(&dir)? {
            Some(batch) if batch.links.is_empty() => {
                info!("目录中没有PDF文件，跳过: {}", dir.display());
            }
            Some(batch) => batches.push(batch),
            None => warn!("目录名不符合 <主题>{}<日期> 格式，跳过: {}", DIR_SEPARATOR, dir.display()),
        }
    }
    Ok(batches)
}

fn batch_from_subdir(dir: &Path) -> BotResult<Option<Batch>> {
    let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(None);
    };
    let Some((subject, date)) = name.split_once(DIR_SEPARATOR) else {
        return Ok(None);
    };

    let mut pdfs: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();

    let links = pdfs
        .into_iter()
        .map(|path| PaperLink {
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            url: path.to_string_lossy().into_owned(),
        })
        .collect();

    Ok(Some(Batch::new(subject, format_email_date(date), links)))
}

/// 读取异常清单（每行一个链接或本地路径，`#` 开头为注释），
/// 归入 `异常文件补充` 批次重新处理
pub async fn retry_batch(list_file: &Path) -> BotResult<Batch> {
    let content = tokio::fs::read_to_string(list_file).await?;
    let mut links = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("http://") || line.starts_with("https://") {
            let url = normalize_url(line);
            links.push(PaperLink {
                title: title_from_url(&url),
                url,
            });
            continue;
        }

        let path = Path::new(line);
        if !path.exists() {
            warn!("文件路径不存在: {}", line);
            continue;
        }
        links.push(PaperLink {
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            url: line.to_string(),
        });
    }

    Ok(Batch::new(
        RETRY_SUBJECT,
        Local::now().format(EMAIL_DATE_LAYOUT).to_string(),
        links,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_name_round_trips_into_batch() {
        let root = tempfile::tempdir().unwrap();
        let name = batch_dir_name("bioRxiv: Alert", "2025-03-01_08-30-00");
        assert_eq!(name, "bioRxiv__Alert&&time&&2025-03-01_08-30-00");

        let dir = root.path().join(&name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("B_paper.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.join("A_paper.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir_all(root.path().join("misc")).unwrap();

        let batches = batches_from_dir(root.path()).unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.subject, "bioRxiv__Alert");
        assert_eq!(batch.mail_date, "2025-03-01_08-30-00");
        let titles: Vec<_> = batch.links.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["A_paper", "B_paper"]);
        assert!(batch.links[0].url.ends_with("A_paper.pdf"));
    }

    #[test]
    fn batch_dir_itself_is_accepted() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Alert&&time&&2025-03-01_08-30-00");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("x.pdf"), b"%PDF").unwrap();

        let batches = batches_from_dir(&dir).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].label(), "2025-03-01_08-30-00_Alert");
    }

    #[tokio::test]
    async fn retry_list_mixes_urls_and_paths() {
        let root = tempfile::tempdir().unwrap();
        let pdf = root.path().join("failed paper.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        let list = root.path().join("error_file.txt");
        std::fs::write(
            &list,
            format!(
                "# 昨天失败的\nhttps://www.biorxiv.org/content/10.1101/2025.01.01.123v1.full.pdf?\n\n{}\n/missing/file.pdf\n",
                pdf.display()
            ),
        )
        .unwrap();

        let batch = retry_batch(&list).await.unwrap();
        assert_eq!(batch.subject, RETRY_SUBJECT);
        assert_eq!(batch.links.len(), 2);
        assert_eq!(
            batch.links[0].url,
            "https://www.biorxiv.org/content/10.1101/2025.01.01.123v1.full.pdf"
        );
        assert_eq!(batch.links[1].title, "failed paper");
    }
}
