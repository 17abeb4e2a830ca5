//! Response body decoders
//!
//! One decoder per supported content type. Decoders that produce a view
//! (`json`, `pdf`, `csv`) return a `serde_json::Value` suitable for
//! [`flatten`](super::flatten::flatten); the rest only validate the body.

use std::io::Cursor;

use image::GenericImageView;
use lopdf::Object;
use serde_json::{json, Map, Value};

use crate::common::DecodeError;

/// Declared response content types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Html,
    Image,
    Pdf,
    Csv,
    Zip,
}

impl ContentType {
    /// Parse a short name or MIME type
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        let essence = raw.split(';').next().unwrap_or_default().trim();
        let parsed = match essence {
            "json" | "application/json" => ContentType::Json,
            "html" | "text/html" => ContentType::Html,
            "image" | "jpeg" | "jpg" | "png" | "gif" | "webp" | "bmp" => ContentType::Image,
            "pdf" | "application/pdf" => ContentType::Pdf,
            "csv" | "text/csv" => ContentType::Csv,
            "zip" | "application/zip" => ContentType::Zip,
            other if other.starts_with("image/") => ContentType::Image,
            _ => return None,
        };
        Some(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContentType::Json => "json",
            ContentType::Html => "html",
            ContentType::Image => "image",
            ContentType::Pdf => "pdf",
            ContentType::Csv => "csv",
            ContentType::Zip => "zip",
        }
    }

    /// Check that `body` is well-formed for this content type
    pub fn validate(&self, body: &[u8]) -> Result<(), DecodeError> {
        match self {
            ContentType::Json => decode_json(body).map(|_| ()),
            ContentType::Html => validate_html(body),
            ContentType::Image => image_dimensions(body).map(|_| ()),
            ContentType::Pdf => validate_pdf(body),
            ContentType::Csv => validate_csv(body),
            ContentType::Zip => validate_zip(body),
        }
    }
}

/// Decode a JSON body
///
/// Empty bodies and a literal `null` are rejected.
pub fn decode_json(body: &[u8]) -> Result<Value, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Json("empty body".to_string()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => Err(DecodeError::Json("body decodes to null".to_string())),
        Ok(value) => Ok(value),
        Err(e) => Err(DecodeError::Json(e.to_string())),
    }
}

fn validate_html(body: &[u8]) -> Result<(), DecodeError> {
    let text = std::str::from_utf8(body).map_err(|e| DecodeError::Html(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Html("empty body".to_string()));
    }
    let has_tag = text
        .find('<')
        .map(|start| text[start + 1..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '!' || c == '/'))
        .unwrap_or(false);
    if !has_tag {
        return Err(DecodeError::Html("no markup found".to_string()));
    }
    Ok(())
}

/// Decode an image and return its `(width, height)`
pub fn image_dimensions(body: &[u8]) -> Result<(u32, u32), DecodeError> {
    let image = image::load_from_memory(body).map_err(|e| DecodeError::Image(e.to_string()))?;
    Ok(image.dimensions())
}

fn validate_pdf(body: &[u8]) -> Result<(), DecodeError> {
    if body.starts_with(b"%PDF-") {
        Ok(())
    } else {
        Err(DecodeError::Pdf("missing %PDF- signature".to_string()))
    }
}

/// Decode a PDF into a view
///
/// The view has `Details` (the document info dictionary), `Text`,
/// `Stripped` (text with everything but ASCII letters and digits removed)
/// and `Pages`, a 0-based list of per-page `Text` and `Stripped`.
pub fn decode_pdf(body: &[u8]) -> Result<Value, DecodeError> {
    validate_pdf(body)?;
    let document = lopdf::Document::load_mem(body).map_err(|e| DecodeError::Pdf(e.to_string()))?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let mut pages = Vec::with_capacity(page_numbers.len());
    let mut texts = Vec::with_capacity(page_numbers.len());
    for number in &page_numbers {
        let text = document
            .extract_text(&[*number])
            .map_err(|e| DecodeError::Pdf(format!("page {}: {}", number, e)))?;
        pages.push(json!({"Text": text, "Stripped": strip(&text)}));
        texts.push(text);
    }

    let text = texts.join("\n\n");
    Ok(json!({
        "Details": Value::Object(document_details(&document)),
        "Stripped": strip(&text),
        "Text": text,
        "Pages": pages,
    }))
}

fn strip(text: &str) -> String {
    text.chars().filter(char::is_ascii_alphanumeric).collect()
}

fn document_details(document: &lopdf::Document) -> Map<String, Value> {
    let mut details = Map::new();
    let Ok(info) = document.trailer.get(b"Info") else {
        return details;
    };
    let dictionary = match info {
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        Object::Dictionary(dictionary) => Some(dictionary),
        _ => None,
    };
    if let Some(dictionary) = dictionary {
        for (key, value) in dictionary.iter() {
            if let Object::String(bytes, _) = value {
                details.insert(
                    String::from_utf8_lossy(key).into_owned(),
                    Value::String(pdf_text(bytes)),
                );
            }
        }
    }
    details
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise byte text
fn pdf_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn validate_csv(body: &[u8]) -> Result<(), DecodeError> {
    if body.is_empty() {
        return Err(DecodeError::Csv("empty body".to_string()));
    }
    std::str::from_utf8(body)
        .map(|_| ())
        .map_err(|e| DecodeError::Csv(e.to_string()))
}

/// Decode a CSV body into `{"r0": [..], "r1": [..]}`
///
/// Deliberately naive: each record (a line, `\r\n` tolerated) loses its first
/// and last character and is split on `","`. Quoted separators and embedded
/// newlines are not supported. A trailing newline yields a final record with
/// a single empty field.
pub fn decode_csv(body: &[u8]) -> Result<Value, DecodeError> {
    validate_csv(body)?;
    let text = String::from_utf8_lossy(body);

    let mut rows = Map::new();
    for (index, line) in text.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let chars: Vec<char> = line.chars().collect();
        let inner: String = if chars.len() < 2 {
            String::new()
        } else {
            chars[1..chars.len() - 1].iter().collect()
        };
        let fields: Vec<Value> = inner
            .split("\",\"")
            .map(|field| Value::String(field.to_string()))
            .collect();
        rows.insert(format!("r{}", index), Value::Array(fields));
    }
    Ok(Value::Object(rows))
}

fn validate_zip(body: &[u8]) -> Result<(), DecodeError> {
    zip::ZipArchive::new(Cursor::new(body))
        .map(|_| ())
        .map_err(|e| DecodeError::Zip(e.to_string()))
}

/// Build a one-page PDF showing `text`, titled `title`
#[cfg(test)]
pub(crate) fn sample_pdf(title: &str, text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Stream};

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(24)]),
            Operation::new("Td", vec![Object::Integer(100), Object::Integer(600)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = document.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = document.add_object(dictionary! {
        "Title" => Object::string_literal(title),
    });
    document.trailer.set("Root", catalog_id);
    document.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).unwrap();
    bytes
}
