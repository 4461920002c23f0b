//! Collision-safe file materialization
//!
//! Downloads are streamed into a hidden `.part` file next to their target.
//! Once the content is complete and synced, the file is hard-linked under
//! the first free sanitized name, so concurrent workers saving `report.pdf`
//! into the same directory end up with `report.pdf`, `report_1.pdf`, ...
//! and never overwrite each other. A final name only ever shows complete
//! content, even when the process is killed mid-download; a failed download
//! leaves nothing behind.

use crate::error::{Error, Result};
use crate::resolver::ResolvedAttachment;
use crate::types::MaterializedFile;
use crate::utils::{content_disposition_filename, has_extension};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Maximum length of a sanitized file name, in characters
pub const MAX_FILENAME_CHARS: usize = 200;

/// Maximum stem length kept when a name has to be truncated
const MAX_STEM_CHARS: usize = 190;

/// Maximum number of `_N` suffixes tried before giving up
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Write buffer size
const WRITE_BUFFER_SIZE: usize = 8192;

/// Name used when sanitizing leaves nothing
const DEFAULT_FILENAME: &str = "attachment";

/// A file written by [`FileMaterializer::save`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedFile {
    /// Final path
    pub path: PathBuf,
    /// Bytes written
    pub byte_count: u64,
}

/// Replace characters that are invalid in file names and cap the length
///
/// `<>:"/\|?*` and control characters become `_`. Names longer than
/// [`MAX_FILENAME_CHARS`] keep their extension and lose the end of the stem.
///
/// # Examples
///
/// ```
/// use graph_chat_export::materialize::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Q3: plan/draft?.docx"), "Q3_ plan_draft_.docx");
/// assert_eq!(sanitize_filename(""), "attachment");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    // "." and ".." would address the directory itself
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return DEFAULT_FILENAME.to_string();
    }

    if cleaned.chars().count() <= MAX_FILENAME_CHARS {
        return cleaned.to_string();
    }

    let (stem, ext) = split_extension(cleaned);
    let ext_chars = ext.map_or(0, |e| e.chars().count() + 1);
    let keep = MAX_STEM_CHARS.min(MAX_FILENAME_CHARS.saturating_sub(ext_chars));
    let stem: String = stem.chars().take(keep).collect();
    match ext {
        // An extension too long to fit is not kept
        Some(ext) if ext_chars < MAX_FILENAME_CHARS => format!("{stem}.{ext}"),
        _ => cleaned.chars().take(MAX_STEM_CHARS).collect(),
    }
}

/// Split `name` into stem and extension (without the dot)
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(i) if i + 1 == name.len() => (name, None),
        Some(i) => (&name[..i], Some(&name[i + 1..])),
    }
}

/// Candidate name for collision attempt `n` (`n == 0` is the name itself)
fn candidate_name(stem: &str, ext: Option<&str>, n: u32) -> String {
    match (n, ext) {
        (0, Some(ext)) => format!("{stem}.{ext}"),
        (0, None) => stem.to_string(),
        (n, Some(ext)) => format!("{stem}_{n}.{ext}"),
        (n, None) => format!("{stem}_{n}"),
    }
}

/// Persists byte streams under unique, filesystem-safe names
#[derive(Clone, Copy, Debug, Default)]
pub struct FileMaterializer;

impl FileMaterializer {
    /// Create a materializer
    pub fn new() -> Self {
        Self
    }

    /// Stream `content` into `dir` under a unique name derived from `suggested_name`
    ///
    /// # Errors
    /// - [`Error::FileCollision`] when no free name is found
    /// - [`Error::Io`] / [`Error::Network`] when writing or reading the stream fails;
    ///   nothing is left on disk in that case
    pub async fn save<S>(&self, content: S, dir: &Path, suggested_name: &str) -> Result<SavedFile>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        fs::create_dir_all(dir).await?;

        let name = sanitize_filename(suggested_name);
        let (temp_path, file) = create_temp(dir, &name).await?;
        // Removes the temp file on every exit, including a dropped future
        let _temp = TempFile::new(temp_path.clone());

        let byte_count = write_stream(content, file).await?;
        let path = claim(dir, &name, &temp_path).await?;

        debug!(path = %path.display(), byte_count, "Saved file");
        Ok(SavedFile { path, byte_count })
    }

    /// Persist a resolved attachment into `dir`
    ///
    /// When the reference's name has no extension, a file name announced by
    /// the server's `Content-Disposition` header is preferred.
    pub async fn materialize(&self, resolved: ResolvedAttachment, dir: &Path) -> Result<MaterializedFile> {
        let ResolvedAttachment {
            reference, response, ..
        } = resolved;

        let name = if has_extension(&reference.suggested_name) {
            reference.suggested_name.clone()
        } else {
            content_disposition_filename(response.headers())
                .unwrap_or_else(|| reference.suggested_name.clone())
        };

        let stream = response.bytes_stream().map(|chunk| chunk.map_err(Error::from));
        let saved = self.save(stream, dir, &name).await?;

        Ok(MaterializedFile {
            path: saved.path,
            byte_count: saved.byte_count,
            source_reference: reference,
        })
    }
}

/// Create the hidden temp file a download is streamed into
async fn create_temp(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    loop {
        let path = dir.join(format!(".{}.{:08x}.part", name, rand::random::<u32>()));
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Link the finished `temp_path` under the first free candidate name in `dir`
///
/// `hard_link` fails when the target exists, which makes each claim atomic.
async fn claim(dir: &Path, name: &str, temp_path: &Path) -> Result<PathBuf> {
    let (stem, ext) = split_extension(name);

    for n in 0..=MAX_RENAME_ATTEMPTS {
        let path = dir.join(candidate_name(stem, ext, n));
        match fs::hard_link(temp_path, &path).await {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::FileCollision {
        path: dir.join(name),
        reason: format!(
            "Could not find unique filename after {} attempts",
            MAX_RENAME_ATTEMPTS
        ),
    })
}

async fn write_stream<S>(content: S, file: File) -> Result<u64>
where
    S: Stream<Item = Result<Bytes>>,
{
    let mut content = std::pin::pin!(content);
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let mut written = 0u64;

    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    Ok(written)
}

/// Deletes a temp file when dropped
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove temp file");
        }
    }
}
