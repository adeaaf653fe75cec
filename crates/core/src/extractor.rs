use crate::error::ExtractionError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use regex::{Captures, Regex};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    WordDoc,
    Image,
    PlainText,
}

impl DocumentKind {
    /// Kind for a recognised extension, compared case-insensitively.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::WordDoc),
            "png" | "jpg" | "jpeg" | "tiff" | "tif" | "bmp" => Some(Self::Image),
            "txt" | "md" | "text" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let extension = path.extension().and_then(|ext| ext.to_str());
        match extension.and_then(Self::from_extension) {
            Some(kind) => kind,
            None => {
                debug!(path = %path.display(), "unrecognized extension, reading as plain text");
                Self::PlainText
            }
        }
    }
}

/// Turns an image into text.
pub trait OcrEngine {
    fn recognize(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Runs the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: PathBuf,
    pub language: Option<String>,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: None,
        }
    }
}

impl TesseractOcr {
    fn resolve_binary(&self) -> Result<PathBuf, ExtractionError> {
        if self.binary.components().count() > 1 || self.binary.exists() {
            return Ok(self.binary.clone());
        }
        which::which(&self.binary).map_err(|error| {
            ExtractionError::Ocr(format!("{} not found: {error}", self.binary.display()))
        })
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, path: &Path) -> Result<String, ExtractionError> {
        let binary = self.resolve_binary()?;
        let mut command = Command::new(&binary);
        command.arg(path).arg("stdout");
        if let Some(language) = &self.language {
            command.arg("-l").arg(language);
        }

        let output = command.output().map_err(|error| {
            ExtractionError::Ocr(format!("failed to run {}: {error}", binary.display()))
        })?;

        if !output.status.success() {
            return Err(ExtractionError::Ocr(format!(
                "tesseract exited with {} for {}: {}",
                output.status,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Sends images to a multimodal OCR service over HTTP.
pub struct EndpointOcr {
    config: OcrEndpointConfig,
    client: Client,
}

impl EndpointOcr {
    pub fn new(config: OcrEndpointConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    image_base64: String,
    mime_type: &'static str,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

impl OcrEngine for EndpointOcr {
    fn recognize(&self, path: &Path) -> Result<String, ExtractionError> {
        let image = fs::read(path).map_err(|source| io_error(path, source))?;
        let payload = OcrRequest {
            image_base64: STANDARD.encode(image),
            mime_type: image_mime_type(path),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(ExtractionError::Ocr(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json()?;
        payload_text(&payload, path)
    }
}

fn image_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn payload_text(payload: &OcrResponse, path: &Path) -> Result<String, ExtractionError> {
    if let Some(listed) = &payload.pages {
        let mut pages = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                (!text.is_empty()).then(|| (page.page.unwrap_or(1), text.to_string()))
            })
            .collect::<Vec<_>>();
        pages.sort_by_key(|(number, _)| *number);

        if !pages.is_empty() {
            return Ok(pages
                .into_iter()
                .map(|(_, text)| text)
                .collect::<Vec<_>>()
                .join("\n"));
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .map(str::trim)
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages.join("\n"));
        }
    }

    Err(ExtractionError::Ocr(format!(
        "OCR response was empty for {}",
        path.display()
    )))
}

/// Converts files of any supported kind into a single text blob.
pub struct TextExtractor {
    ocr: Box<dyn OcrEngine + Send + Sync>,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(Box::new(TesseractOcr::default()))
    }
}

impl TextExtractor {
    pub fn new(ocr: Box<dyn OcrEngine + Send + Sync>) -> Self {
        Self { ocr }
    }

    pub fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let kind = DocumentKind::from_path(path);
        debug!(path = %path.display(), ?kind, "extracting text");

        match kind {
            DocumentKind::Pdf => extract_pdf(path),
            DocumentKind::WordDoc => extract_word_document(path),
            DocumentKind::Image => self.ocr.recognize(path),
            DocumentKind::PlainText => read_plain_text(path),
        }
    }
}

pub fn extract_pdf(path: &Path) -> Result<String, ExtractionError> {
    let document = Document::load(path).map_err(|error| ExtractionError::Pdf(error.to_string()))?;
    let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
    if page_numbers.is_empty() {
        return Err(ExtractionError::Pdf(format!("no pages in {}", path.display())));
    }

    let mut pages = Vec::new();
    for page_no in page_numbers {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| ExtractionError::Pdf(format!("page {page_no}: {error}")))?;
        pages.push(text.trim_end_matches('\n').to_string());
    }

    Ok(pages.join("\n"))
}

/// Reads the paragraphs of an Office Open XML (`.docx`) document.
pub fn extract_word_document(path: &Path) -> Result<String, ExtractionError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| ExtractionError::WordDoc(format!("{}: {error}", path.display())))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| ExtractionError::WordDoc(format!("{}: {error}", path.display())))?
        .read_to_string(&mut xml)
        .map_err(|source| io_error(path, source))?;

    document_xml_paragraphs(&xml).map(|paragraphs| paragraphs.join("\n"))
}

fn document_xml_paragraphs(xml: &str) -> Result<Vec<String>, ExtractionError> {
    let paragraph_re = Regex::new(r"(?s)<w:p(?:\s[^>]*?)?/>|<w:p(?:\s[^>]*)?>(.*?)</w:p>")
        .map_err(|error| ExtractionError::WordDoc(error.to_string()))?;
    let run_re = Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab/>|<w:br/>")
        .map_err(|error| ExtractionError::WordDoc(error.to_string()))?;

    let mut paragraphs = Vec::new();
    for paragraph in paragraph_re.captures_iter(xml) {
        let body = paragraph.get(1).map(|body| body.as_str()).unwrap_or_default();
        let mut text = String::new();
        for run in run_re.captures_iter(body) {
            match run.get(1) {
                Some(content) => text.push_str(&decode_entities(content.as_str())),
                None if run.get(0).is_some_and(|tag| tag.as_str() == "<w:tab/>") => text.push('\t'),
                None => text.push('\n'),
            }
        }
        paragraphs.push(text);
    }

    Ok(paragraphs)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let entity_re = match Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|lt|gt|amp|quot|apos);") {
        Ok(re) => re,
        Err(_) => return text.to_string(),
    };

    entity_re
        .replace_all(text, |captures: &Captures| {
            let name = &captures[1];
            let decoded = match name {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if name.starts_with("#x") => u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32),
                _ => name[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

/// Reads a file as UTF-8, dropping invalid byte sequences.
pub fn read_plain_text(path: &Path) -> Result<String, ExtractionError> {
    let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
    Ok(decode_utf8_ignoring_invalid(&bytes))
}

fn decode_utf8_ignoring_invalid(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    let mut rest = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                decoded.push_str(valid);
                return decoded;
            }
            Err(error) => {
                let (valid, after) = rest.split_at(error.valid_up_to());
                decoded.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = error.error_len().unwrap_or(after.len());
                rest = &after[skip..];
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ExtractionError {
    ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _path: &Path) -> Result<String, ExtractionError> {
            Ok(self.0.to_string())
        }
    }

    fn write_docx(path: &Path, document_xml: &str) -> Result<(), Box<dyn std::error::Error>> {
        let file = File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options)?;
        zip.write_all(document_xml.as_bytes())?;
        zip.finish()?;
        Ok(())
    }

    #[test]
    fn kinds_are_chosen_by_extension_ignoring_case() {
        assert_eq!(DocumentKind::from_path(Path::new("a/Report.PDF")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path(Path::new("memo.Docx")), DocumentKind::WordDoc);
        assert_eq!(DocumentKind::from_path(Path::new("legacy.doc")), DocumentKind::WordDoc);
        assert_eq!(DocumentKind::from_path(Path::new("scan.JPEG")), DocumentKind::Image);
        assert_eq!(DocumentKind::from_path(Path::new("notes.txt")), DocumentKind::PlainText);
        assert_eq!(DocumentKind::from_path(Path::new("data.csv")), DocumentKind::PlainText);
        assert_eq!(DocumentKind::from_path(Path::new("README")), DocumentKind::PlainText);
        assert_eq!(DocumentKind::from_extension("csv"), None);
    }

    #[test]
    fn plain_text_drops_invalid_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.log");
        fs::write(&path, b"caf\xc3\xa9 \xff\xfebar\xe2\x82")?;

        assert_eq!(TextExtractor::default().extract(&path)?, "café bar");
        Ok(())
    }

    #[test]
    fn extraction_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "The sun is a star.\nWater boils at 100C.")?;

        let extractor = TextExtractor::default();
        assert_eq!(extractor.extract(&path)?, extractor.extract(&path)?);
        Ok(())
    }

    #[test]
    fn images_go_through_the_ocr_engine() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.png");
        fs::write(&path, b"\x89PNG")?;

        let extractor = TextExtractor::new(Box::new(FixedOcr("recognized words")));
        assert_eq!(extractor.extract(&path)?, "recognized words");
        Ok(())
    }

    #[test]
    fn word_documents_yield_one_line_per_paragraph() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("memo.docx");
        write_docx(
            &path,
            r#"<?xml version="1.0"?><w:document><w:body>
<w:p w:rsidR="00A1"><w:r><w:t>Fish &amp; chips</w:t></w:r><w:r><w:t xml:space="preserve"> today</w:t></w:r></w:p>
<w:p/>
<w:p><w:pPr><w:jc w:val="left"/></w:pPr><w:r><w:t>Col</w:t><w:tab/><w:t>&#x41;</w:t></w:r></w:p>
</w:body></w:document>"#,
        )?;

        let text = TextExtractor::default().extract(&path)?;
        assert_eq!(text, "Fish & chips today\n\nCol\tA");
        Ok(())
    }

    #[test]
    fn corrupt_documents_fail_instead_of_falling_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docx = dir.path().join("broken.docx");
        let pdf = dir.path().join("broken.pdf");
        fs::write(&docx, b"not a zip archive")?;
        fs::write(&pdf, b"%PDF-1.4\n%broken")?;

        let extractor = TextExtractor::default();
        assert!(matches!(extractor.extract(&docx), Err(ExtractionError::WordDoc(_))));
        assert!(matches!(extractor.extract(&pdf), Err(ExtractionError::Pdf(_))));
        Ok(())
    }

    #[test]
    fn missing_files_report_io_errors() {
        let result = TextExtractor::default().extract(Path::new("/definitely/missing.txt"));
        assert!(matches!(result, Err(ExtractionError::Io { .. })));
    }

    #[test]
    fn ocr_payload_with_pages_keeps_nonempty_text_in_page_order() {
        let response = OcrResponse {
            pages: Some(vec![
                OcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
                OcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                OcrPage {
                    page: Some(1),
                    text: Some(" Page 1 ".to_string()),
                },
            ]),
            text: None,
        };

        let text = payload_text(&response, Path::new("x.png")).expect("pages should parse");
        assert_eq!(text, "Page 1\nPage 3");
    }

    #[test]
    fn ocr_payload_falls_back_to_form_feed_text() {
        let response = OcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let text = payload_text(&response, Path::new("x.png")).expect("text should parse");
        assert_eq!(text, "First\nSecond");
    }

    #[test]
    fn empty_ocr_payload_is_an_error() {
        let response = OcrResponse {
            pages: Some(Vec::new()),
            text: Some("\u{000C}".to_string()),
        };
        assert!(payload_text(&response, Path::new("x.png")).is_err());
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(image_mime_type(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("a.tif")), "image/tiff");
    }
}
