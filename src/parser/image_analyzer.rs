use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

/// Form XObject 嵌套的最大深度
const MAX_FORM_DEPTH: u32 = 3;
/// 沿 Parent 链查找继承资源的最大层数
const MAX_PARENT_HOPS: u32 = 32;

/// 判断页面是否引用了图片（直接引用、嵌套在 Form XObject 中，或通过页面树继承的资源）
pub fn page_has_images(doc: &Document, page_id: ObjectId) -> bool {
    let Some(page) = page_resources_owner(doc, page_id) else {
        return false;
    };
    dict_has_images(doc, page, 0)
}

/// Resources 可以从父节点继承，返回实际携带 Resources 的字典
fn page_resources_owner(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut current = page_id;
    for _ in 0..MAX_PARENT_HOPS {
        let dict = doc.get_dictionary(current).ok()?;
        if dict.has(b"Resources") {
            return Some(dict);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

fn dict_has_images(doc: &Document, dict: &Dictionary, depth: u32) -> bool {
    if depth > MAX_FORM_DEPTH {
        return false;
    }

    let Some(xobjects) = get_xobjects_from_dict(doc, dict) else {
        return false;
    };

    for (name, value) in xobjects.iter() {
        let Ok((_, object)) = doc.dereference(value) else {
            continue;
        };
        let Ok(stream) = object.as_stream() else {
            continue;
        };

        match subtype(&stream.dict) {
            Some("Image") => {
                debug!("发现图片 XObject: {}", String::from_utf8_lossy(name));
                return true;
            }
            Some("Form") if dict_has_images(doc, &stream.dict, depth + 1) => return true,
            _ => {}
        }
    }
    false
}

fn subtype(dict: &Dictionary) -> Option<&str> {
    dict.get(b"Subtype")
        .ok()
        .and_then(|s| s.as_name().ok())
        .and_then(|n| std::str::from_utf8(n).ok())
}

/// Resources -> XObject 字典，两级都允许是间接引用
fn get_xobjects_from_dict<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<&'a Dictionary> {
    let res_ref = dict.get(b"Resources").ok()?;
    let (_, res_obj) = doc.dereference(res_ref).ok()?;
    let res_dict = res_obj.as_dict().ok()?;
    let xobj_ref = res_dict.get(b"XObject").ok()?;
    let (_, xobj_obj) = doc.dereference(xobj_ref).ok()?;
    xobj_obj.as_dict().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn image_stream() -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0],
        )
    }

    #[test]
    fn detects_image_through_inherited_resources_and_forms() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(image_stream());
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
            },
            b"/Im0 Do".to_vec(),
        ));

        // 第一页自带空资源，第二页继承 Pages 上的资源（Form 里嵌图片）
        let plain = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! {},
        });
        let inherited = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![plain.into(), inherited.into()],
                "Count" => 2,
                "Resources" => dictionary! { "XObject" => dictionary! { "Fm0" => form_id } },
            }),
        );

        assert!(!page_has_images(&doc, plain));
        assert!(page_has_images(&doc, inherited));
    }
}
