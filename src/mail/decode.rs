use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use mailparse::{body::Body, MailHeaderMap, ParsedMail};
use tracing::warn;

use super::MailMessage;
use crate::utils::{BotError, BotResult};

/// Base64 内容彻底无法解码时写入正文的标记，链接提取据此切换到纯文本解析
pub const ERROR_CONTENT: &str = "无法解码的Base64内容";

/// 解析原始 RFC822 邮件。头部缺失会报错，正文解码永不失败。
pub fn parse_message(raw: &[u8]) -> BotResult<MailMessage> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| BotError::MailError(e.to_string()))?;

    let sender = parsed.headers.get_first_value("From").unwrap_or_default();
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let date_header = parsed
        .headers
        .get_first_value("Date")
        .ok_or_else(|| BotError::MailError("缺少 Date 头".to_string()))?;
    let date = parse_date(&date_header)?;

    let mut body = String::new();
    collect_text(&parsed, &mut body);

    Ok(MailMessage {
        sender,
        subject,
        date,
        body,
    })
}

fn parse_date(value: &str) -> BotResult<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value.trim()) {
        return Ok(dt);
    }
    let ts = mailparse::dateparse(value)
        .map_err(|e| BotError::MailError(format!("无法解析日期 '{}': {}", value, e)))?;
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| BotError::MailError(format!("日期超出范围: {}", value)))
}

/// 依次拼接所有 text/plain 和 text/html 部分
fn collect_text(part: &ParsedMail<'_>, out: &mut String) {
    if part.subparts.is_empty() {
        let mime = part.ctype.mimetype.to_ascii_lowercase();
        if mime == "text/plain" || mime == "text/html" {
            out.push_str(&decode_part(part));
        }
        return;
    }
    for sub in &part.subparts {
        collect_text(sub, out);
    }
}

/// 按 Content-Transfer-Encoding 解码单个部分
pub fn decode_part(part: &ParsedMail<'_>) -> String {
    let body = match part.get_body_encoded() {
        Body::Base64(encoded) => match encoded.get_decoded_as_string() {
            Ok(text) => return text,
            Err(_) => encoded.get_raw().to_vec(),
        },
        Body::QuotedPrintable(encoded) => {
            return encoded
                .get_decoded_as_string()
                .unwrap_or_else(|e| format!("[解码错误: {}]", e));
        }
        Body::SevenBit(text) | Body::EightBit(text) => {
            return text
                .get_as_string()
                .unwrap_or_else(|_| String::from_utf8_lossy(text.get_raw()).into_owned());
        }
        Body::Binary(binary) => return String::from_utf8_lossy(binary.get_raw()).into_owned(),
    };

    decode_base64_lenient(&body)
}

/// 严格解码失败后：先补齐 `=` 填充，再剔除非 Base64 字符，都失败则返回错误标记
pub fn decode_base64_lenient(payload: &[u8]) -> String {
    let compact: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if let Ok(bytes) = STANDARD.decode(&compact) {
        return String::from_utf8_lossy(&bytes).into_owned();
    }

    let mut padded = compact.clone();
    let missing = padded.len() % 4;
    if missing != 0 {
        padded.extend(std::iter::repeat(b'=').take(4 - missing));
        if let Ok(bytes) = STANDARD.decode(&padded) {
            return String::from_utf8_lossy(&bytes).into_owned();
        }
    }

    let mut cleaned: Vec<u8> = compact
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
        .collect();
    let missing = cleaned.len() % 4;
    if missing != 0 {
        cleaned.extend(std::iter::repeat(b'=').take(4 - missing));
    }
    if let Ok(bytes) = STANDARD.decode(&cleaned) {
        return String::from_utf8_lossy(&bytes).into_owned();
    }

    warn!("Base64 内容无法解码，长度 {} 字节", payload.len());
    format!("[{}: {}]", ERROR_CONTENT, String::from_utf8_lossy(payload))
}
