//! Plain text from Word (.docx) attachments: the `<w:t>` runs of
//! `word/document.xml`, one line per paragraph.

use std::io::{Cursor, Read};

use anyhow::Context;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    combinator::opt,
    sequence::{preceded, terminated},
    IResult,
};
use zip::ZipArchive;

const DOCUMENT_XML: &str = "word/document.xml";

/// Parses one `<w:t>` run (attributes such as `xml:space` allowed) and returns
/// its raw content.
fn parse_wt_tag(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag("<w:t")(input)?;
    let (input, _) = alt((tag(">"), preceded(tag(" "), terminated(is_not(">"), tag(">")))))(input)?;
    let (input, content) = opt(is_not("<"))(input)?;
    let (input, _) = tag("</w:t>")(input)?;
    Ok((input, content.unwrap_or_default()))
}

/// Concatenated text of every `<w:t>` run in one paragraph.
fn paragraph_text(paragraph: &str) -> String {
    let mut text = String::new();
    let mut remaining = paragraph;

    while let Some(pos) = remaining.find("<w:t") {
        remaining = &remaining[pos..];
        match parse_wt_tag(remaining) {
            Ok((rest, content)) => {
                text.push_str(&unescape_xml(content));
                remaining = rest;
            }
            // <w:tab/>, <w:tbl>, self-closing runs
            Err(_) => remaining = &remaining[4..],
        }
    }
    text
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text of a `document.xml` body, paragraphs separated by newlines.
pub fn parse_document_xml(content: &str) -> String {
    content
        .split("</w:p>")
        .map(paragraph_text)
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unzips a .docx and extracts its text.
pub fn extract_docx_text(bytes: &[u8]) -> anyhow::Result<String> {
    tracing::trace!("parsing docx");

    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("Not a valid .docx archive")?;
    let mut file = archive
        .by_name(DOCUMENT_XML)
        .with_context(|| format!("{DOCUMENT_XML} missing from .docx"))?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .with_context(|| format!("Failed to read {DOCUMENT_XML}"))?;

    Ok(parse_document_xml(&xml))
}
