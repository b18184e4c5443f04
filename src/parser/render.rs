use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use tokio::process::Command;

use crate::config::ExtractConfig;
use crate::utils::{BotError, BotResult};

/// 把 PDF 的某一页渲染成 PNG
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_png(&self, pdf_path: &Path, page: u32) -> BotResult<Vec<u8>>;
}

/// 调用 poppler 的 pdftoppm
pub struct PdftoppmRenderer {
    binary: String,
    dpi: u32,
    out_dir: PathBuf,
}

impl PdftoppmRenderer {
    pub fn new(config: &ExtractConfig, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: config.pdftoppm_path.clone(),
            dpi: config.render_dpi,
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render_png(&self, pdf_path: &Path, page: u32) -> BotResult<Vec<u8>> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let stem = pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        let prefix = self.out_dir.join(format!("{}-p{}", stem, page));
        let page_arg = page.to_string();

        let output = Command::new(&self.binary)
            .args(["-f", &page_arg, "-l", &page_arg, "-r", &self.dpi.to_string()])
            .args(["-png", "-singlefile"])
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| BotError::OcrError(format!("无法启动 {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(BotError::OcrError(format!(
                "第 {} 页渲染失败: {}",
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let png_path = PathBuf::from(format!("{}.png", prefix.display()));
        let bytes = tokio::fs::read(&png_path).await?;
        tokio::fs::remove_file(&png_path).await?;
        Ok(bytes)
    }
}

/// 页面图片转成 JPEG 后 Base64 编码，OCR 接口只收这个格式
pub fn to_jpeg_base64(png: &[u8]) -> BotResult<String> {
    let img = image::load_from_memory(png).map_err(|e| BotError::OcrError(e.to_string()))?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Jpeg)
        .map_err(|e| BotError::OcrError(e.to_string()))?;
    Ok(STANDARD.encode(buf.into_inner()))
}

#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 128]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
