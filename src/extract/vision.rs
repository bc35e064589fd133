//! Vision transcription strategy.
//!
//! Pitch decks are usually slide exports: each page is one big embedded JPEG.
//! This strategy pulls the largest image from the first page and asks a
//! vision-capable model for a verbatim transcription. Everything stays in
//! memory; no intermediate files are written.

use anyhow::{bail, Context, Result};
use lopdf::{Document, Object};
use tracing::debug;

use super::{ExtractionStrategy, StrategyKind};
use crate::openrouter::{Message, OpenRouterClient};
use crate::upload::UploadedDocument;

const TRANSCRIBE_PROMPT: &str = "Transcribe ALL text visible in this pitch deck slide, \
verbatim and in reading order. Include headings, bullet points, numbers, captions and \
contact details exactly as written. Output only the transcribed text, no commentary.";

pub struct VisionStrategy {
    client: OpenRouterClient,
}

impl VisionStrategy {
    pub fn new(client: OpenRouterClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for VisionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vision
    }

    async fn extract(&self, doc: &UploadedDocument) -> Result<String> {
        let data = tokio::fs::read(&doc.path)
            .await
            .with_context(|| format!("Failed to read {:?}", doc.path))?;

        let jpeg = first_page_image(&data)?;
        debug!(
            "VisionStrategy: first-page image {} bytes from {}",
            jpeg.len(),
            doc.original_name
        );

        let messages = vec![
            Message::system("You are a precise document transcription engine."),
            Message::user_with_image(TRANSCRIBE_PROMPT, "image/jpeg", &jpeg),
        ];

        self.client
            .chat(messages)
            .await
            .context("Vision transcription call failed")
    }
}

/// Extract the largest DCTDecode (JPEG) image embedded in the first page.
///
/// Fails on corrupt or zero-page documents and on pages whose content is a
/// text layer or a non-JPEG raster; callers treat that as a normal
/// fall-through to the next strategy.
pub fn first_page_image(data: &[u8]) -> Result<Vec<u8>> {
    let doc = Document::load_mem(data).context("Failed to parse PDF")?;

    let pages = doc.get_pages();
    let &first_page_id = pages.values().next().context("PDF has no pages")?;

    let (resources, resource_ids) = doc.get_page_resources(first_page_id);

    let mut best: Option<(i64, Vec<u8>)> = None;

    let mut dicts: Vec<&lopdf::Dictionary> = Vec::new();
    if let Some(dict) = resources {
        dicts.push(dict);
    }
    for id in resource_ids {
        if let Ok(dict) = doc.get_dictionary(id) {
            dicts.push(dict);
        }
    }

    for dict in dicts {
        let Ok(xobjects) = dict.get(b"XObject").and_then(Object::as_dict) else {
            continue;
        };
        for (_, entry) in xobjects.iter() {
            let Ok(id) = entry.as_reference() else { continue };
            let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|n| n == &b"Image"[..])
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            if !has_dct_filter(stream.dict.get(b"Filter").ok()) {
                continue;
            }
            let area = stream.dict.get(b"Width").and_then(Object::as_i64).unwrap_or(0)
                * stream.dict.get(b"Height").and_then(Object::as_i64).unwrap_or(0);
            if best.as_ref().map(|(a, _)| area > *a).unwrap_or(true) {
                best = Some((area, stream.content.clone()));
            }
        }
    }

    let (_, jpeg) = best.context("First page has no embedded JPEG image")?;

    // Sanity-check the magic bytes before shipping it to the model.
    match image::guess_format(&jpeg) {
        Ok(image::ImageFormat::Jpeg) => Ok(jpeg),
        Ok(other) => bail!("Embedded image is {:?}, not JPEG", other),
        Err(e) => bail!("Embedded image data is unreadable: {}", e),
    }
}

fn has_dct_filter(filter: Option<&Object>) -> bool {
    match filter {
        Some(Object::Name(name)) => name.as_slice() == &b"DCTDecode"[..],
        Some(Object::Array(items)) => items
            .iter()
            .any(|o| matches!(o, Object::Name(n) if n.as_slice() == &b"DCTDecode"[..])),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    /// Minimal one-page PDF, optionally with an embedded JPEG XObject.
    fn build_pdf(with_image: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut resources = dictionary! {};
        if with_image {
            // JFIF magic so format sniffing recognizes it as JPEG.
            let jpeg_bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Filter" => "DCTDecode",
                    "Width" => 1280,
                    "Height" => 720,
                },
                jpeg_bytes,
            ));
            resources = dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            };
        }

        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn corrupt_pdf_fails_cleanly() {
        let err = first_page_image(b"definitely not a pdf").unwrap_err();
        assert!(err.to_string().contains("parse PDF"));
    }

    #[test]
    fn page_without_image_fails_cleanly() {
        let pdf = build_pdf(false);
        let err = first_page_image(&pdf).unwrap_err();
        assert!(err.to_string().contains("no embedded JPEG"));
    }

    #[test]
    fn embedded_jpeg_is_found() {
        let pdf = build_pdf(true);
        let jpeg = first_page_image(&pdf).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
