use lopdf::{dictionary, Document, Object, ObjectId};

use crate::error::RenderError;

/// Page attributes a page may inherit from its page-tree ancestors
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

const MAX_TREE_DEPTH: usize = 32;

fn pdf_err(e: lopdf::Error) -> RenderError {
    RenderError::Pdf(e.to_string())
}

/// Concatenate PDFs into one document, keeping the input order.
///
/// A single input is returned unchanged.
pub fn merge_pages<B: AsRef<[u8]>>(documents: &[B]) -> Result<Vec<u8>, RenderError> {
    match documents {
        [] => return Err(RenderError::Pdf("no pages to merge".to_string())),
        [single] => return Ok(single.as_ref().to_vec()),
        _ => {}
    }

    let mut merged = Document::with_version("1.7");
    let mut kids: Vec<ObjectId> = Vec::new();

    for (index, bytes) in documents.iter().enumerate() {
        let mut doc = Document::load_mem(bytes.as_ref())
            .map_err(|e| RenderError::Pdf(format!("copy {}: {e}", index + 1)))?;
        if doc.is_encrypted() {
            return Err(RenderError::Pdf(format!("copy {} is encrypted", index + 1)));
        }

        doc.renumber_objects_with(merged.max_id + 1);
        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        for &page_id in &page_ids {
            inherit_page_attributes(&mut doc, page_id)?;
        }

        merged.max_id = merged.max_id.max(doc.max_id);
        for (id, object) in doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Outlines" | b"Outline" => {}
                _ => {
                    merged.objects.insert(id, object);
                }
            }
        }
        kids.extend(page_ids);
    }

    let pages_id = merged.new_object_id();
    for &kid in &kids {
        let page = merged
            .get_object_mut(kid)
            .and_then(Object::as_dict_mut)
            .map_err(pdf_err)?;
        page.set("Parent", pages_id);
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.prune_objects();

    let mut out = Vec::new();
    merged.save_to(&mut out).map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(out)
}

/// Number of pages in a PDF document.
pub fn page_count(bytes: &[u8]) -> Result<usize, RenderError> {
    let doc = Document::load_mem(bytes).map_err(pdf_err)?;
    Ok(doc.get_pages().len())
}

/// Copy inherited attributes onto the page itself; its page tree is dropped
/// when merging.
fn inherit_page_attributes(doc: &mut Document, page_id: ObjectId) -> Result<(), RenderError> {
    let page = doc.get_dictionary(page_id).map_err(pdf_err)?;
    let mut inherited: Vec<(&[u8], Object)> = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    for _ in 0..MAX_TREE_DEPTH {
        let Some(parent_id) = parent else { break };
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        for key in INHERITABLE {
            if page.has(key) || inherited.iter().any(|(k, _)| *k == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                inherited.push((key, value.clone()));
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    if inherited.is_empty() {
        return Ok(());
    }
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(pdf_err)?;
    for (key, value) in inherited {
        page.set(key.to_vec(), value);
    }
    Ok(())
}
