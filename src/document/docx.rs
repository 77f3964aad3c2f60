//! Minimal WordprocessingML (.docx) editing.
//!
//! A `.docx` is a zip archive; the body text lives in `word/document.xml`.
//! Existing documents are edited in place: every other part is copied
//! through untouched and new paragraphs are spliced into the body just
//! before its section properties, so documents written by other tools keep
//! their styles and layout.

use anyhow::{anyhow, Context, Result};
use quick_xml::escape::{escape, resolve_predefined_entity};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Read, Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;

const DOCUMENT_PART: &str = "word/document.xml";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:rPr><w:sz w:val="22"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="480"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="200"/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:sz w:val="26"/></w:rPr></w:style></w:styles>"#;

const EMPTY_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/></w:sectPr></w:body></w:document>"#;

/// One body paragraph as read back from `document.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(u8, String),
    Paragraph(String),
}

pub struct DocxDocument {
    /// Every part except `word/document.xml`, in archive order
    parts: Vec<(String, Vec<u8>)>,
    body: String,
}

impl DocxDocument {
    /// An empty A4 document with `Heading1`/`Heading2` styles.
    pub fn new() -> Self {
        Self {
            parts: vec![
                ("[Content_Types].xml".to_string(), CONTENT_TYPES.as_bytes().to_vec()),
                ("_rels/.rels".to_string(), PACKAGE_RELS.as_bytes().to_vec()),
                ("word/_rels/document.xml.rels".to_string(), DOCUMENT_RELS.as_bytes().to_vec()),
                ("word/styles.xml".to_string(), STYLES.as_bytes().to_vec()),
            ],
            body: EMPTY_BODY.to_string(),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("invalid document {}", path.display()))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut parts = Vec::with_capacity(archive.len());
        let mut body = None;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;

            if name == DOCUMENT_PART {
                body = Some(String::from_utf8(bytes).context("document.xml is not UTF-8")?);
            } else {
                parts.push((name, bytes));
            }
        }

        let body = body.ok_or_else(|| anyhow!("archive has no {}", DOCUMENT_PART))?;
        Ok(Self { parts, body })
    }

    /// `level` 1 or 2 maps to the `Heading1`/`Heading2` paragraph styles.
    pub fn add_heading(&mut self, text: &str, level: u8) -> Result<()> {
        let style = format!("Heading{}", level.clamp(1, 9));
        self.insert_paragraph(Some(&style), text)
    }

    pub fn add_paragraph(&mut self, text: &str) -> Result<()> {
        self.insert_paragraph(None, text)
    }

    fn insert_paragraph(&mut self, style: Option<&str>, text: &str) -> Result<()> {
        let at = body_insertion_point(&self.body)?;
        let xml = paragraph_xml(style, text);
        self.body.insert_str(at, &xml);
        Ok(())
    }

    pub fn blocks(&self) -> Result<Vec<Block>> {
        parse_blocks(&self.body)
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let mut zip = zip::ZipWriter::new(writer);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let mut wrote_body = false;
        for (name, bytes) in &self.parts {
            // keep [Content_Types].xml first, body right after the package parts
            if !wrote_body && name.starts_with("word/") {
                zip.start_file(DOCUMENT_PART, options)?;
                zip.write_all(self.body.as_bytes())?;
                wrote_body = true;
            }
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        if !wrote_body {
            zip.start_file(DOCUMENT_PART, options)?;
            zip.write_all(self.body.as_bytes())?;
        }

        zip.finish()?;
        Ok(())
    }

    /// Write to a sibling temp file, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".docx-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| anyhow!("failed to save {}: {}", path.display(), e.error))?;
        Ok(())
    }
}

impl Default for DocxDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn paragraph_xml(style: Option<&str>, text: &str) -> String {
    let mut xml = String::from("<w:p>");
    if let Some(style) = style {
        xml.push_str(&format!(r#"<w:pPr><w:pStyle w:val="{}"/></w:pPr>"#, style));
    }
    xml.push_str("<w:r>");
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            xml.push_str("<w:br/>");
        }
        xml.push_str(r#"<w:t xml:space="preserve">"#);
        xml.push_str(&escape(line));
        xml.push_str("</w:t>");
    }
    xml.push_str("</w:r></w:p>");
    xml
}

/// Byte offset where new body paragraphs go: before a trailing `w:sectPr`
/// that is a direct child of `w:body`, otherwise before `</w:body>`.
fn body_insertion_point(xml: &str) -> Result<usize> {
    let mut reader = Reader::from_str(xml);
    let mut depth_in_body: Option<usize> = None;
    let mut sect_pr_start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                match depth_in_body {
                    Some(0) if e.local_name().as_ref() == b"sectPr" => sect_pr_start = Some(before),
                    _ => {}
                }
                match depth_in_body {
                    Some(depth) => depth_in_body = Some(depth + 1),
                    None if e.local_name().as_ref() == b"body" => depth_in_body = Some(0),
                    None => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if depth_in_body == Some(0) && e.local_name().as_ref() == b"sectPr" {
                    sect_pr_start = Some(before);
                }
            }
            Ok(Event::End(e)) => match depth_in_body {
                Some(0) if e.local_name().as_ref() == b"body" => {
                    return Ok(sect_pr_start.unwrap_or(before));
                }
                Some(depth) => {
                    depth_in_body = Some(depth.saturating_sub(1));
                    // sectPr must be the last child; anything after it moves the insertion point
                    if depth == 1 && e.local_name().as_ref() != b"sectPr" {
                        sect_pr_start = None;
                    }
                }
                None => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("XML parsing error: {}", e)),
            _ => {}
        }
    }

    Err(anyhow!("document.xml has no w:body element"))
}

fn parse_blocks(xml: &str) -> Result<Vec<Block>> {
    let mut reader = Reader::from_str(xml);

    let mut blocks = Vec::new();
    let mut in_paragraph = false;
    let mut in_text = false;
    let mut style: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = true;
                    style = None;
                    text.clear();
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"pStyle" if in_paragraph => {
                    style = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"val")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                }
                b"br" if in_paragraph => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    text.push_str(&e.decode().unwrap_or_default());
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text {
                    let name = String::from_utf8_lossy(&e);
                    if let Some(resolved) = resolve_predefined_entity(&name) {
                        text.push_str(resolved);
                    } else if let Ok(Some(ch)) = e.resolve_char_ref() {
                        text.push(ch);
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if in_paragraph => {
                    in_paragraph = false;
                    let content = std::mem::take(&mut text);
                    let level = style
                        .as_deref()
                        .and_then(|s| s.strip_prefix("Heading"))
                        .and_then(|n| n.parse::<u8>().ok());
                    blocks.push(match level {
                        Some(level) => Block::Heading(level, content),
                        None => Block::Paragraph(content),
                    });
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("XML parsing error: {}", e)),
            _ => {}
        }
    }

    Ok(blocks)
}
