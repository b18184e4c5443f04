use lopdf::Document;
use tracing::{info, warn};

use super::image_analyzer::page_has_images;
use crate::utils::{BotError, BotResult};

/// 单页的处理方式
#[derive(Debug, Clone, PartialEq)]
pub enum PagePlan {
    /// 无图片，使用原生文本
    Text { number: u32, text: String },
    /// 含图片，整页渲染后 OCR
    Ocr { number: u32 },
}

#[derive(Debug)]
pub struct DocumentPlan {
    pub pages_total: usize,
    pub pages: Vec<PagePlan>,
}

/// 解析 PDF 并决定前 `max_pages` 页各自的处理方式。
/// 同步完成，`Document` 不会跨越 await。
pub fn plan_pages(pdf: &[u8], max_pages: usize) -> BotResult<DocumentPlan> {
    let doc = Document::load_mem(pdf).map_err(|e| BotError::PdfError(e.to_string()))?;
    let pages = doc.get_pages();
    let pages_total = pages.len();
    let take = pages_total.min(max_pages);
    info!("PDF共 {} 页，处理前 {} 页", pages_total, take);

    let plans = pages
        .into_iter()
        .take(take)
        .map(|(number, page_id)| {
            if page_has_images(&doc, page_id) {
                return PagePlan::Ocr { number };
            }
            let text = doc.extract_text(&[number]).unwrap_or_else(|e| {
                warn!("第 {} 页文本提取失败: {}", number, e);
                String::new()
            });
            PagePlan::Text { number, text }
        })
        .collect();

    Ok(DocumentPlan {
        pages_total,
        pages: plans,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// 生成测试 PDF：`true` 表示该页放一张图片，`false` 表示纯文本页
    pub fn build_pdf(layout: &[bool]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0],
        ));

        let mut kids = Vec::new();
        for (i, has_image) in layout.iter().enumerate() {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("Page{}", i + 1))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));

            let resources = if *has_image {
                dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => dictionary! { "Im1" => image_id },
                }
            } else {
                dictionary! { "Font" => dictionary! { "F1" => font_id } }
            };
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => layout.len() as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save pdf");
        out
    }
}
