//! Minimal PPTX reader/writer.
//!
//! A presentation is an OOXML zip. This module exposes a narrow text contract
//! per slide and leaves every other part untouched:
//!
//! | Part | Use |
//! |------|-----|
//! | `ppt/slides/slideN.xml` | shape text (`<p:sp>` → `<a:p>` → `<a:t>`) |
//! | `ppt/slides/_rels/slideN.xml.rels` | link to the notes slide |
//! | `ppt/notesSlides/notesSlideN.xml` | body placeholder text |
//! | `docProps/core.xml` | core properties (title, author, dates) |
//!
//! Slides are ordered by their numeric suffix.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use thiserror::Error;

const SLIDE_PREFIX: &str = "ppt/slides/slide";
const CORE_PROPS: &str = "docProps/core.xml";
const NOTES_REL_SUFFIX: &str = "/notesSlide";

#[derive(Debug, Error)]
pub enum PptxError {
    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid PPTX archive: {0}")]
    Archive(String),

    #[error("malformed XML in {part}: {reason}")]
    Xml { part: String, reason: String },

    #[error("slide {0} has no notes page")]
    NoNotesPage(usize),
}

#[derive(Debug, Clone)]
struct SlidePart {
    part: String,
    notes: Option<String>,
}

/// In-memory presentation. Parts are kept as raw bytes in archive order.
#[derive(Debug, Clone)]
pub struct Presentation {
    entries: Vec<(String, Vec<u8>)>,
    slides: Vec<SlidePart>,
}

impl Presentation {
    pub fn open(path: &Path) -> Result<Self, PptxError> {
        let bytes = std::fs::read(path).map_err(|e| PptxError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PptxError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| PptxError::Archive(e.to_string()))?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| PptxError::Archive(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| PptxError::Archive(e.to_string()))?;
            entries.push((name, data));
        }

        let mut slide_names: Vec<(u32, String)> = entries
            .iter()
            .filter_map(|(name, _)| {
                let num = name.strip_prefix(SLIDE_PREFIX)?.strip_suffix(".xml")?;
                Some((num.parse().ok()?, name.clone()))
            })
            .collect();
        if slide_names.is_empty() && !entries.iter().any(|(n, _)| n == "ppt/presentation.xml") {
            return Err(PptxError::Archive("ppt/presentation.xml not found".into()));
        }
        slide_names.sort_by_key(|(num, _)| *num);

        let mut presentation = Self {
            entries,
            slides: Vec::with_capacity(slide_names.len()),
        };
        for (_, part) in slide_names {
            let notes = presentation.notes_part_for(&part)?;
            presentation.slides.push(SlidePart { part, notes });
        }
        Ok(presentation)
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    fn replace_entry(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = data,
            None => self.entries.push((name.to_string(), data)),
        }
    }

    fn notes_part_for(&self, slide_part: &str) -> Result<Option<String>, PptxError> {
        let file = slide_part.rsplit('/').next().unwrap_or(slide_part);
        let rels_name = format!("ppt/slides/_rels/{}.rels", file);
        let rels = match self.entry(&rels_name) {
            Some(rels) => rels,
            None => return Ok(None),
        };

        let mut reader = Reader::from_reader(rels);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let kind = attr(&e, b"Type").unwrap_or_default();
                    if kind.ends_with(NOTES_REL_SUFFIX) {
                        if let Some(target) = attr(&e, b"Target") {
                            return Ok(Some(resolve_target("ppt/slides", &target)));
                        }
                    }
                }
                Ok(Event::Eof) => return Ok(None),
                Err(e) => {
                    return Err(PptxError::Xml {
                        part: rels_name,
                        reason: e.to_string(),
                    })
                }
                _ => {}
            }
            buf.clear();
        }
    }

    fn slide(&self, index: usize) -> Option<&SlidePart> {
        self.slides.get(index)
    }

    /// Text of every shape on slide `index` (0-based), shapes joined by a space.
    pub fn slide_text(&self, index: usize) -> Result<String, PptxError> {
        let slide = match self.slide(index) {
            Some(slide) => slide,
            None => return Ok(String::new()),
        };
        let xml = self.entry(&slide.part).unwrap_or_default();
        let shapes = shape_texts(xml, &slide.part, ShapeFilter::All)?;
        Ok(shapes
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Speaker notes of slide `index`, empty when the slide has none.
    pub fn notes_text(&self, index: usize) -> Result<String, PptxError> {
        let notes = match self.slide(index).and_then(|s| s.notes.as_deref()) {
            Some(notes) => notes,
            None => return Ok(String::new()),
        };
        let xml = self.entry(notes).unwrap_or_default();
        Ok(shape_texts(xml, notes, ShapeFilter::BodyPlaceholder)?.join("\n"))
    }

    /// Core document properties keyed by element name (`title`, `creator`, ...).
    pub fn core_properties(&self) -> Result<BTreeMap<String, String>, PptxError> {
        let mut props = BTreeMap::new();
        let xml = match self.entry(CORE_PROPS) {
            Some(xml) => xml,
            None => return Ok(props),
        };
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut depth = 0usize;
        let mut current: Option<String> = None;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    if depth == 2 {
                        current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                    }
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                    if depth < 2 {
                        current = None;
                    }
                }
                Ok(Event::Text(t)) => {
                    if let Some(key) = &current {
                        let text = t.unescape().map_err(|e| PptxError::Xml {
                            part: CORE_PROPS.into(),
                            reason: e.to_string(),
                        })?;
                        let text = text.trim();
                        if !text.is_empty() {
                            props.insert(key.clone(), text.to_string());
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(PptxError::Xml {
                        part: CORE_PROPS.into(),
                        reason: e.to_string(),
                    })
                }
                _ => {}
            }
            buf.clear();
        }
        Ok(props)
    }

    /// Replace the text of the first text-bearing shape on slide `index`.
    /// A text box is added when the slide has none.
    pub fn set_slide_text(&mut self, index: usize, text: &str) -> Result<(), PptxError> {
        let part = match self.slide(index) {
            Some(slide) => slide.part.clone(),
            None => return Ok(()),
        };
        let xml = self.entry(&part).unwrap_or_default().to_vec();
        let updated = rewrite_text_body(&xml, &part, ShapeFilter::All, text, true)?;
        self.replace_entry(&part, updated);
        Ok(())
    }

    /// Replace the speaker notes of slide `index`.
    pub fn set_notes_text(&mut self, index: usize, text: &str) -> Result<(), PptxError> {
        let notes = self
            .slide(index)
            .and_then(|s| s.notes.clone())
            .ok_or(PptxError::NoNotesPage(index + 1))?;
        let xml = self.entry(&notes).unwrap_or_default().to_vec();
        let updated = rewrite_text_body(&xml, &notes, ShapeFilter::BodyPlaceholder, text, false)?;
        self.replace_entry(&notes, updated);
        Ok(())
    }

    /// Serialize back to a zip archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PptxError> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, data) in &self.entries {
                zip.start_file(name.as_str(), options)
                    .map_err(|e| PptxError::Archive(e.to_string()))?;
                zip.write_all(data)
                    .map_err(|e| PptxError::Archive(e.to_string()))?;
            }
            zip.finish().map_err(|e| PptxError::Archive(e.to_string()))?;
        }
        Ok(buf)
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Resolve a relationship target like `../notesSlides/notesSlide1.xml`.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ShapeFilter {
    All,
    /// Only shapes holding a `<p:ph type="body"/>` placeholder.
    BodyPlaceholder,
}

fn is_body_placeholder(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"ph" && attr(e, b"type").as_deref() == Some("body")
}

/// Text of each shape, paragraphs joined by newlines.
fn shape_texts(xml: &[u8], part: &str, filter: ShapeFilter) -> Result<Vec<String>, PptxError> {
    let xml_err = |e: quick_xml::Error| PptxError::Xml {
        part: part.to_string(),
        reason: e.to_string(),
    };
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut shapes = Vec::new();

    let mut sp_depth = 0usize;
    let mut is_body = false;
    let mut in_text = false;
    let mut paragraphs: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sp" => {
                    sp_depth += 1;
                    if sp_depth == 1 {
                        is_body = false;
                        paragraphs.clear();
                    }
                }
                b"p" if sp_depth > 0 => paragraphs.push(String::new()),
                b"t" if sp_depth > 0 => in_text = true,
                _ if is_body_placeholder(&e) => is_body = true,
                _ => {}
            },
            Event::Empty(e) => {
                if sp_depth > 0 && is_body_placeholder(&e) {
                    is_body = true;
                }
            }
            Event::Text(t) if in_text => {
                let text = t.unescape().map_err(xml_err)?;
                if let Some(last) = paragraphs.last_mut() {
                    last.push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"sp" => {
                    sp_depth = sp_depth.saturating_sub(1);
                    if sp_depth == 0 && (filter == ShapeFilter::All || is_body) {
                        shapes.push(paragraphs.join("\n").trim().to_string());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

fn paragraphs_xml(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            format!(
                "<a:p><a:r><a:rPr lang=\"en-US\" dirty=\"0\"/><a:t>{}</a:t></a:r></a:p>",
                quick_xml::escape::escape(line)
            )
        })
        .collect()
}

fn textbox_xml(id: u32, text: &str) -> String {
    let paragraphs = paragraphs_xml(text);
    format!(
        "<p:sp><p:nvSpPr><p:cNvPr id=\"{id}\" name=\"TextBox {id}\"/><p:cNvSpPr txBox=\"1\"/><p:nvPr/></p:nvSpPr>\
<p:spPr><a:xfrm><a:off x=\"914400\" y=\"914400\"/><a:ext cx=\"914400\" cy=\"914400\"/></a:xfrm>\
<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></p:spPr>\
<p:txBody><a:bodyPr wrap=\"none\"/><a:lstStyle/>{paragraphs}</p:txBody></p:sp>"
    )
}

/// Stream `xml`, replacing the paragraphs of the first matching text body.
fn rewrite_text_body(
    xml: &[u8],
    part: &str,
    filter: ShapeFilter,
    text: &str,
    add_textbox: bool,
) -> Result<Vec<u8>, PptxError> {
    let xml_err = |reason: String| PptxError::Xml {
        part: part.to_string(),
        reason,
    };
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + text.len() + 128));
    let mut buf = Vec::new();

    let mut sp_depth = 0usize;
    let mut is_body = false;
    let mut in_target = false;
    let mut skip_depth = 0usize;
    let mut done = false;
    let mut max_id = 0u32;

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_err(e.to_string()))?;

        if skip_depth > 0 {
            match &event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                _ => {}
            }
            continue;
        }

        match &event {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == b"cNvPr" {
                    if let Some(id) = attr(e, b"id").and_then(|v| v.parse::<u32>().ok()) {
                        max_id = max_id.max(id);
                    }
                }
                if is_body_placeholder(e) {
                    is_body = true;
                }
            }
            _ => {}
        }

        match &event {
            Event::Start(e) if e.local_name().as_ref() == b"sp" => {
                sp_depth += 1;
                if sp_depth == 1 {
                    is_body = false;
                }
            }
            Event::Start(e)
                if e.local_name().as_ref() == b"txBody"
                    && sp_depth > 0
                    && !done
                    && (filter == ShapeFilter::All || is_body) =>
            {
                in_target = true;
            }
            Event::Start(e) if in_target && e.local_name().as_ref() == b"p" => {
                skip_depth = 1;
                continue;
            }
            Event::Empty(e) if in_target && e.local_name().as_ref() == b"p" => {
                continue;
            }
            Event::End(e) if in_target && e.local_name().as_ref() == b"txBody" => {
                let raw = paragraphs_xml(text);
                writer
                    .write_event(Event::Text(BytesText::from_escaped(raw.as_str())))
                    .map_err(|e| xml_err(e.to_string()))?;
                in_target = false;
                done = true;
            }
            Event::End(e) if e.local_name().as_ref() == b"sp" => {
                sp_depth = sp_depth.saturating_sub(1);
            }
            Event::End(e) if e.local_name().as_ref() == b"spTree" && !done && add_textbox => {
                let raw = textbox_xml(max_id + 1, text);
                writer
                    .write_event(Event::Text(BytesText::from_escaped(raw.as_str())))
                    .map_err(|e| xml_err(e.to_string()))?;
                done = true;
            }
            Event::Eof => break,
            _ => {}
        }

        writer
            .write_event(event)
            .map_err(|e| xml_err(e.to_string()))?;
    }

    if !done {
        return Err(xml_err("no text body found".into()));
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    const NS: &str = "xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" \
xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"";

    fn shape(id: u32, paragraphs: &[&str]) -> String {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<a:p><a:r><a:t>{}</a:t></a:r></a:p>", quick_xml::escape::escape(*p)))
            .collect();
        format!(
            "<p:sp><p:nvSpPr><p:cNvPr id=\"{id}\" name=\"Shape {id}\"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr>\
<p:spPr/><p:txBody><a:bodyPr/><a:lstStyle/>{body}</p:txBody></p:sp>"
        )
    }

    fn slide_xml(shapes: &[String]) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><p:sld {NS}><p:cSld><p:spTree>\
<p:nvGrpSpPr><p:cNvPr id=\"1\" name=\"\"/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>{}\
</p:spTree></p:cSld></p:sld>",
            shapes.concat()
        )
    }

    fn notes_xml(notes: &str) -> String {
        let notes = quick_xml::escape::escape(notes);
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><p:notes {NS}><p:cSld><p:spTree>\
<p:sp><p:nvSpPr><p:cNvPr id=\"2\" name=\"Slide Image\"/><p:cNvSpPr/><p:nvPr><p:ph type=\"sldImg\"/></p:nvPr></p:nvSpPr><p:spPr/></p:sp>\
<p:sp><p:nvSpPr><p:cNvPr id=\"3\" name=\"Notes\"/><p:cNvSpPr/><p:nvPr><p:ph type=\"body\" idx=\"1\"/></p:nvPr></p:nvSpPr>\
<p:spPr/><p:txBody><a:bodyPr/><a:lstStyle/><a:p><a:r><a:t>{notes}</a:t></a:r></a:p></p:txBody></p:sp>\
<p:sp><p:nvSpPr><p:cNvPr id=\"4\" name=\"Number\"/><p:cNvSpPr/><p:nvPr><p:ph type=\"sldNum\"/></p:nvPr></p:nvSpPr>\
<p:spPr/><p:txBody><a:bodyPr/><a:p><a:r><a:t>7</a:t></a:r></a:p></p:txBody></p:sp>\
</p:spTree></p:cSld></p:notes>"
        )
    }

    /// Deck with one `(title, body, notes)` triple per slide.
    pub fn deck(slides: &[(&str, &str, Option<&str>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("[Content_Types].xml", opts).unwrap();
            zip.write_all(b"<?xml version=\"1.0\"?><Types/>").unwrap();
            zip.start_file("ppt/presentation.xml", opts).unwrap();
            zip.write_all(format!("<p:presentation {NS}/>").as_bytes()).unwrap();
            zip.start_file("docProps/core.xml", opts).unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><cp:coreProperties \
xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:title>Quarterly Review</dc:title>\
<dc:creator>Ops Team</dc:creator><cp:revision>3</cp:revision></cp:coreProperties>",
            )
            .unwrap();

            for (i, (title, body, notes)) in slides.iter().enumerate() {
                let n = i + 1;
                let shapes = vec![shape(2, &[*title]), shape(3, &[*body])];
                zip.start_file(format!("ppt/slides/slide{n}.xml"), opts).unwrap();
                zip.write_all(slide_xml(&shapes).as_bytes()).unwrap();
                if let Some(notes) = notes {
                    zip.start_file(format!("ppt/slides/_rels/slide{n}.xml.rels"), opts)
                        .unwrap();
                    zip.write_all(
                        format!(
                            "<?xml version=\"1.0\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/notesSlide\" Target=\"../notesSlides/notesSlide{n}.xml\"/>\
</Relationships>"
                        )
                        .as_bytes(),
                    )
                    .unwrap();
                    zip.start_file(format!("ppt/notesSlides/notesSlide{n}.xml"), opts)
                        .unwrap();
                    zip.write_all(notes_xml(notes).as_bytes()).unwrap();
                }
            }
            zip.finish().unwrap();
        }
        buf
    }

    /// Deck whose only slide has no shapes at all.
    pub fn empty_slide_deck() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("ppt/presentation.xml", opts).unwrap();
            zip.write_all(format!("<p:presentation {NS}/>").as_bytes()).unwrap();
            zip.start_file("ppt/slides/slide1.xml", opts).unwrap();
            zip.write_all(slide_xml(&[]).as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }
}
