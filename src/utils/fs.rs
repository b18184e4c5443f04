use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use tokio::fs::{File, OpenOptions};

pub const DEFAULT_NAME_LEN: usize = 100;
/// 批次目录和文件夹名里的日期格式
pub const EMAIL_DATE_LAYOUT: &str = "%Y-%m-%d_%H-%M-%S";

fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[/\\:*?"<>|\s]"#).expect("static regex"))
}

/// 清理文件名：非法字符和空白替换为下划线，去掉首尾的 `_` 和 `.`，按字符数截断
pub fn sanitize_file_name(name: &str, max_len: usize) -> String {
    let replaced = illegal_chars().replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c| c == '_' || c == '.');
    trimmed.chars().take(max_len).collect()
}

/// 当天日期 YYYYMMDD（本地时间），账本和进度文件按它分日
pub fn today_str() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// 把邮件日期转成 `YYYY-MM-DD_HH-MM-SS`，无法解析时使用当前时间
pub fn format_email_date(raw: &str) -> String {
    const OUT: &str = EMAIL_DATE_LAYOUT;
    let raw = raw.trim();

    if NaiveDateTime::parse_from_str(raw, OUT).is_ok() {
        return raw.to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.format(OUT).to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(OUT).to_string();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.format(OUT).to_string();
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return dt.format(OUT).to_string();
            }
        }
    }

    tracing::warn!("⚠️ 无法解析邮件日期格式: {}，使用当前时间", raw);
    Local::now().format(OUT).to_string()
}

/// 目标文件已存在时追加 `_1`, `_2` ... 直到不冲突
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{counter}.{ext}"));
        counter += 1;
    }
    candidate
}

/// 与 [`unique_path`] 相同的命名规则，但用 `create_new` 原子地占用文件名，
/// 并发写入同名文件时不会互相覆盖
pub async fn create_unique(dir: &Path, stem: &str, ext: &str) -> io::Result<(PathBuf, File)> {
    let mut counter = 0;
    loop {
        let candidate = if counter == 0 {
            dir.join(format!("{stem}.{ext}"))
        } else {
            dir.join(format!("{stem}_{counter}.{ext}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_illegal_and_whitespace() {
        assert_eq!(
            sanitize_file_name("Single-cell: a/b \"test\"?", 100),
            "Single-cell__a_b__test"
        );
        assert_eq!(sanitize_file_name("  ..hidden.. ", 100), "hidden");
    }

    #[test]
    fn sanitize_caps_by_chars_not_bytes() {
        let title = "单细胞转录组".repeat(30);
        let clean = sanitize_file_name(&title, 100);
        assert_eq!(clean.chars().count(), 100);
    }

    #[test]
    fn email_date_formats() {
        assert_eq!(
            format_email_date("Mon, 13 Oct 2025 10:30:45 +0800"),
            "2025-10-13_10-30-45"
        );
        assert_eq!(format_email_date("2025-10-13T10:30:45"), "2025-10-13_10-30-45");
        assert_eq!(format_email_date("2025/10/13"), "2025-10-13_00-00-00");
        assert_eq!(format_email_date("2025-10-13_10-30-45"), "2025-10-13_10-30-45");
    }

    #[test]
    fn unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "paper", "pdf");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_path(dir.path(), "paper", "pdf");
        assert_eq!(second.file_name().unwrap(), "paper_1.pdf");
    }

    #[tokio::test]
    async fn concurrent_create_unique_never_shares_a_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("paper.pdf"), b"old").unwrap();

        let (a, b, c) = tokio::join!(
            create_unique(dir.path(), "paper", "pdf"),
            create_unique(dir.path(), "paper", "pdf"),
            create_unique(dir.path(), "paper", "pdf"),
        );
        let mut names: Vec<_> = [a, b, c]
            .into_iter()
            .map(|r| r.unwrap().0.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["paper_1.pdf", "paper_2.pdf", "paper_3.pdf"]);
        assert_eq!(std::fs::read(dir.path().join("paper.pdf")).unwrap(), b"old");
    }
}
