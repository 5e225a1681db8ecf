use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;
use crate::types::Document;

/// Form feed, the page separator in plain-text sources.
const PAGE_BREAK: char = '\u{c}';

/// Load every `.pdf` and `.txt` file under `dir`, sorted by path.
///
/// A file that cannot be read or extracted is reported and skipped.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    let files = list_source_files(dir);
    if files.is_empty() {
        warn!(dir = %dir.display(), "no .pdf or .txt files found");
        return Ok(vec![]);
    }
    let mut docs = Vec::with_capacity(files.len());
    for (i, path) in files.iter().enumerate() {
        info!(file = %path.display(), "loading document {}/{}", i + 1, files.len());
        match load_document(path) {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable document"),
        }
    }
    Ok(docs)
}

pub fn load_document(path: &Path) -> Result<Document> {
    let pages = match extension(path).as_deref() {
        Some("pdf") => pdf_extract::extract_text_by_pages(path).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?,
        _ => split_pages(&read_text_lossy(path)?),
    };
    Ok(Document::new(source_name(path), pages))
}

/// Split plain text into pages on form feeds. A trailing form feed does not
/// open an extra page.
pub fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) { pages.pop(); }
    pages
}

fn read_text_lossy(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

fn source_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.to_string_lossy().to_string(), |n| n.to_string_lossy().to_string())
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

fn list_source_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| matches!(extension(p).as_deref(), Some("pdf" | "txt")))
        .collect();
    files.sort();
    files
}
