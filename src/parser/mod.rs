pub mod image_analyzer;
pub mod ocr;
pub mod pdf_parser;
pub mod render;

pub use ocr::{FeishuOcr, OcrEngine};
pub use pdf_parser::{plan_pages, PagePlan};
pub use render::{PageRenderer, PdftoppmRenderer};

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::BotResult;

/// 按页顺序拼接的文本（原生文本和 OCR 结果混合）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub text: String,
    pub pages_total: usize,
    pub pages_processed: usize,
    pub ocr_pages: usize,
}

pub struct TextExtractor {
    max_pages: usize,
    renderer: Arc<dyn PageRenderer>,
    ocr: Arc<dyn OcrEngine>,
    work_dir: PathBuf,
}

impl TextExtractor {
    pub fn new(
        max_pages: usize,
        renderer: Arc<dyn PageRenderer>,
        ocr: Arc<dyn OcrEngine>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            max_pages,
            renderer,
            ocr,
            work_dir: work_dir.into(),
        }
    }

    pub async fn extract(&self, pdf: &[u8]) -> BotResult<ExtractedDocument> {
        let plan = plan_pages(pdf, self.max_pages)?;
        let needs_ocr = plan.pages.iter().any(|p| matches!(p, PagePlan::Ocr { .. }));

        // pdftoppm 需要读文件，只有存在图片页时才落盘
        let pdf_path = if needs_ocr {
            tokio::fs::create_dir_all(&self.work_dir).await?;
            let nonce = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let path = self.work_dir.join(format!("ocr-{}.pdf", nonce));
            tokio::fs::write(&path, pdf).await?;
            Some(path)
        } else {
            None
        };

        let mut parts = Vec::with_capacity(plan.pages.len());
        let mut ocr_pages = 0;
        for page in &plan.pages {
            match page {
                PagePlan::Text { text, .. } => {
                    if !text.trim().is_empty() {
                        parts.push(text.clone());
                    }
                }
                PagePlan::Ocr { number } => {
                    ocr_pages += 1;
                    let Some(path) = &pdf_path else { continue };
                    parts.push(self.ocr_page(path, *number).await);
                }
            }
        }

        if let Some(path) = &pdf_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("删除临时PDF失败 {}: {}", path.display(), e);
            }
        }

        let document = ExtractedDocument {
            text: parts.join("\n"),
            pages_total: plan.pages_total,
            pages_processed: plan.pages.len(),
            ocr_pages,
        };
        info!(
            "文本提取完成: {}/{} 页, OCR {} 页, {} 字符",
            document.pages_processed,
            document.pages_total,
            document.ocr_pages,
            document.text.chars().count()
        );
        Ok(document)
    }

    /// 渲染或识别失败时该页记为空字符串
    async fn ocr_page(&self, pdf_path: &std::path::Path, number: u32) -> String {
        let result = async {
            let png = self.renderer.render_png(pdf_path, number).await?;
            let encoded = render::to_jpeg_base64(&png)?;
            self.ocr.recognize(&encoded).await
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!("第 {} 页 OCR 失败: {}", number, e);
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::pdf_parser::fixtures::build_pdf;
    use super::*;
    use crate::utils::BotError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRenderer {
        calls: AtomicUsize,
        fail_page: Option<u32>,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render_png(&self, pdf_path: &Path, page: u32) -> BotResult<Vec<u8>> {
            assert!(pdf_path.exists());
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(page) == self.fail_page {
                return Err(BotError::OcrError("render failed".to_string()));
            }
            Ok(render::tiny_png())
        }
    }

    struct FakeOcr;

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(&self, image_base64: &str) -> BotResult<String> {
            assert!(!image_base64.is_empty());
            Ok("OCR-TEXT".to_string())
        }
    }

    fn extractor(max_pages: usize, fail_page: Option<u32>, dir: &Path) -> (TextExtractor, Arc<FakeRenderer>) {
        let renderer = Arc::new(FakeRenderer {
            calls: AtomicUsize::new(0),
            fail_page,
        });
        let extractor = TextExtractor::new(max_pages, renderer.clone(), Arc::new(FakeOcr), dir);
        (extractor, renderer)
    }

    #[tokio::test]
    async fn image_pages_use_ocr_text() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, renderer) = extractor(10, None, dir.path());
        let doc = extractor.extract(&build_pdf(&[false, true, false])).await.unwrap();

        assert_eq!(doc.pages_processed, 3);
        assert_eq!(doc.ocr_pages, 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert!(doc.text.contains("Page1"));
        assert!(doc.text.contains("OCR-TEXT"));
        assert!(!doc.text.contains("Page2"));
        let p1 = doc.text.find("Page1").unwrap();
        let ocr = doc.text.find("OCR-TEXT").unwrap();
        let p3 = doc.text.find("Page3").unwrap();
        assert!(p1 < ocr && ocr < p3);
    }

    #[tokio::test]
    async fn processes_exactly_min_of_pages_and_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, renderer) = extractor(2, None, dir.path());
        let doc = extractor
            .extract(&build_pdf(&[true, true, true, true]))
            .await
            .unwrap();

        assert_eq!(doc.pages_total, 4);
        assert_eq!(doc.pages_processed, 2);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ocr_failure_leaves_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, _) = extractor(10, Some(1), dir.path());
        let doc = extractor.extract(&build_pdf(&[true, false])).await.unwrap();

        assert_eq!(doc.pages_processed, 2);
        assert!(!doc.text.contains("OCR-TEXT"));
        assert!(doc.text.contains("Page2"));
        // 临时 PDF 已清理
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
