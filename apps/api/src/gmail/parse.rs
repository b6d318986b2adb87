//! Gmail REST resources and the helpers that pick resume attachments out of
//! a message payload.

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::Deserialize;

use crate::gmail::docx;
use crate::gmail::query::{file_extension, is_resume_file};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResource {
    pub id: String,
    pub payload: MessagePart,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(rename = "data", default)]
    pub data_base64: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentGetResponse {
    pub data: Option<String>,
}

/// Subject, sender and date of a message, with the values Gmail shows when
/// the header is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub subject: String,
    pub from: String,
    pub date: String,
}

impl MessageSummary {
    pub fn from_headers(headers: &[Header]) -> Self {
        Self {
            subject: find_header(headers, "Subject")
                .unwrap_or("No Subject")
                .to_string(),
            from: find_header(headers, "From").unwrap_or("Unknown").to_string(),
            date: find_header(headers, "Date").unwrap_or_default().to_string(),
        }
    }
}

/// Case-insensitive header lookup.
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Every part in the tree, at any depth, that carries a resume attachment.
pub fn resume_parts(part: &MessagePart) -> Vec<&MessagePart> {
    let mut found = Vec::new();
    collect_resume_parts(part, &mut found);
    found
}

fn collect_resume_parts<'a>(part: &'a MessagePart, found: &mut Vec<&'a MessagePart>) {
    if !part.filename.is_empty() && is_resume_file(&part.filename) {
        found.push(part);
    }
    for child in &part.parts {
        collect_resume_parts(child, found);
    }
}

pub fn decode_base64(data: &str) -> anyhow::Result<Vec<u8>> {
    // Gmail pads some payloads and not others.
    let trimmed = data.trim_end_matches('=');
    let padded = match trimmed.len() % 4 {
        2 => format!("{trimmed}=="),
        3 => format!("{trimmed}="),
        _ => trimmed.to_string(),
    };
    URL_SAFE
        .decode(padded)
        .map_err(|e| anyhow!("Failed to decode base64 body data: {e}"))
}

/// Plain text of a resume attachment. `None` for formats without an extractor.
pub fn extract_text(filename: &str, bytes: &[u8]) -> anyhow::Result<Option<String>> {
    match file_extension(filename).as_deref() {
        Some("pdf") => {
            let text = pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| anyhow!("Failed to extract text from {filename}: {e}"))?;
            Ok(Some(text))
        }
        Some("docx") => docx::extract_docx_text(bytes)
            .map(Some)
            .with_context(|| format!("Failed to extract text from {filename}")),
        _ => Ok(None),
    }
}
