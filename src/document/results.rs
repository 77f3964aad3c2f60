//! Result document publishing and the outputs listing.
//!
//! Every finished transcription is appended to `<media_root>/<stem>.docx`
//! (created on first use with a top-level "Transcrições" heading). The file
//! is then renamed to a timestamped name, which becomes the job's result.
//! Because of that rename, the next job starts a fresh working document.
//!
//! Append and rename run under one process-wide lock, so two jobs finishing
//! together never write the same file or claim the same final name.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::document::docx::DocxDocument;

pub const DOCUMENT_TITLE: &str = "Transcrições";
pub const ENTRY_HEADING: &str = "Nova Transcrição";

/// One file under the media root, as shown by the outputs listing.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEntry {
    pub name: String,
    /// Size in KB, rounded to two decimals
    pub size_kb: f64,
    pub modified: DateTime<Local>,
}

pub struct ResultDocument {
    media_root: PathBuf,
    stem: String,
    lock: Mutex<()>,
}

impl ResultDocument {
    pub fn new(media_root: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            media_root: media_root.into(),
            stem: stem.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    fn working_path(&self) -> PathBuf {
        self.media_root.join(format!("{}.docx", self.stem))
    }

    /// Append `text` as a new entry and rename the document to its final,
    /// timestamped name. Returns that file name. Blocking.
    pub fn publish(&self, text: &str) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        std::fs::create_dir_all(&self.media_root)
            .with_context(|| format!("failed to create {}", self.media_root.display()))?;

        let working = self.working_path();
        let mut doc = if working.exists() {
            debug!(path = %working.display(), "Appending to existing result document");
            DocxDocument::open(&working)?
        } else {
            let mut doc = DocxDocument::new();
            doc.add_heading(DOCUMENT_TITLE, 1)?;
            doc
        };

        let now = Local::now();
        doc.add_heading(&format!("{} ({})", ENTRY_HEADING, now.format("%d/%m/%Y %H:%M")), 2)?;
        doc.add_paragraph(text)?;
        doc.save(&working)?;

        let final_path = self.unique_final_path(&now);
        std::fs::rename(&working, &final_path).with_context(|| {
            format!("failed to rename {} to {}", working.display(), final_path.display())
        })?;

        let name = file_name_of(&final_path);
        info!(file = %name, chars = text.chars().count(), "Result document published");
        Ok(name)
    }

    /// `<stem>_%Y%m%dT%H%M%S.docx`, with `_<n>` appended while the name is taken.
    fn unique_final_path(&self, now: &DateTime<Local>) -> PathBuf {
        let base = format!("{}_{}", self.stem, now.format("%Y%m%dT%H%M%S"));
        let mut candidate = self.media_root.join(format!("{}.docx", base));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.media_root.join(format!("{}_{}.docx", base, n));
            n += 1;
        }
        candidate
    }

    /// Regular files under the media root, newest first. Blocking.
    pub fn list_outputs(&self) -> Result<Vec<OutputEntry>> {
        let read_dir = match std::fs::read_dir(&self.media_root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            entries.push(OutputEntry {
                name,
                size_kb: (metadata.len() as f64 / 1024.0 * 100.0).round() / 100.0,
                modified: metadata.modified()?.into(),
            });
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Path of a file directly under the media root, or `None` if `name`
    /// is not a plain file name or no such file exists.
    pub fn resolve_output(&self, name: &str) -> Option<PathBuf> {
        if !is_plain_file_name(name) {
            return None;
        }
        let path = self.media_root.join(name);
        path.is_file().then_some(path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// No separators, no parent references, no hidden files.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().map(|n| n == name).unwrap_or(false)
}
