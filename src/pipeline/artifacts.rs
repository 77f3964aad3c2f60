//! Temporary files owned by one job.
//!
//! Every file here lives in the scratch directory as a [`tempfile::TempPath`].
//! [`JobArtifacts::cleanup`] deletes them explicitly and logs failures; the
//! `TempPath` destructors remove anything left behind if the job task panics
//! or is aborted before reaching cleanup.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::audio::extension_of;

/// The uploaded media file, as written to disk by the upload handler.
#[derive(Debug)]
pub struct UploadedArtifact {
    path: TempPath,
    original_name: String,
    extension: String,
    size: u64,
}

impl UploadedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Lower-cased, with the dot (`".mp4"`), or empty.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    #[cfg(test)]
    pub fn from_bytes(scratch_dir: &Path, original_name: &str, bytes: &[u8]) -> io::Result<Self> {
        let extension = extension_of(original_name);
        let mut tmp = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&extension)
            .tempfile_in(scratch_dir)?;
        io::Write::write_all(&mut tmp, bytes)?;

        Ok(Self {
            path: tmp.into_temp_path(),
            original_name: original_name.to_string(),
            extension,
            size: bytes.len() as u64,
        })
    }
}

/// Streams an upload into a scratch file chunk by chunk.
///
/// The file keeps the upload's extension so ffmpeg can use it as a format
/// hint. Dropping the writer before [`UploadWriter::finish`] deletes the file.
pub struct UploadWriter {
    file: tokio::fs::File,
    path: TempPath,
    original_name: String,
    extension: String,
    size: u64,
}

impl UploadWriter {
    pub fn create(scratch_dir: &Path, original_name: &str) -> io::Result<Self> {
        let extension = extension_of(original_name);
        let tmp = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&extension)
            .tempfile_in(scratch_dir)?;
        let (file, path) = tmp.into_parts();

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
            original_name: original_name.to_string(),
            extension,
            size: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn finish(mut self) -> io::Result<UploadedArtifact> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        Ok(UploadedArtifact {
            path: self.path,
            original_name: self.original_name,
            extension: self.extension,
            size: self.size,
        })
    }
}

/// The upload plus every intermediate file produced for one job.
#[derive(Debug)]
pub struct JobArtifacts {
    scratch_dir: PathBuf,
    upload: UploadedArtifact,
    intermediates: Vec<TempPath>,
}

impl JobArtifacts {
    pub fn new(upload: UploadedArtifact, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            upload,
            intermediates: Vec::new(),
        }
    }

    pub fn upload(&self) -> &UploadedArtifact {
        &self.upload
    }

    /// Reserve a fresh `.wav` path in the scratch directory, owned by this job.
    pub fn new_intermediate(&mut self, label: &str) -> io::Result<PathBuf> {
        let path = tempfile::Builder::new()
            .prefix(&format!("{}-", label))
            .suffix(".wav")
            .tempfile_in(&self.scratch_dir)?
            .into_temp_path();

        let owned = path.to_path_buf();
        self.intermediates.push(path);
        Ok(owned)
    }

    pub fn intermediate_count(&self) -> usize {
        self.intermediates.len()
    }

    /// Every path this job owns, upload first.
    #[cfg(test)]
    pub fn paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.upload.path().to_path_buf())
            .chain(self.intermediates.iter().map(|p| p.to_path_buf()))
            .collect()
    }

    /// Delete every artifact. Failures are logged, never returned.
    /// Returns how many files were removed.
    pub fn cleanup(self) -> usize {
        let mut removed = 0;
        let all = std::iter::once(self.upload.path).chain(self.intermediates);

        for path in all {
            let shown = path.to_path_buf();
            match path.close() {
                Ok(()) => {
                    debug!(path = %shown.display(), "Removed temporary file");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %shown.display(), error = %e, "Failed to remove temporary file"),
            }
        }

        removed
    }
}
