//! Attachment download per chat, and re-processing of earlier exports.

use crate::error::{Error, Result};
use crate::materialize::sanitize_filename;
use crate::model::{Chat, ChatMessage};
use crate::types::{AttachmentTally, ContentReference, Event, MaterializedFile};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ChatExporter;

/// Marker contained in the names of export files
const EXPORT_FILE_MARKER: &str = "private_chats";

impl ChatExporter {
    /// Download every attachment referenced by `messages` of `chat`
    ///
    /// Files go to `{output_dir}/attachments/{chat label}/`. Per-attachment
    /// failures are counted and reported as events.
    ///
    /// # Errors
    /// Returns the first error that stops downloads (missing credentials,
    /// cancellation); downloads already running are finished first,
    /// attachments not yet started are skipped. An exhausted retry budget
    /// only fails the attachment it happened on.
    pub async fn download_chat_attachments(
        &self,
        chat: &Chat,
        messages: &[ChatMessage],
    ) -> Result<AttachmentTally> {
        match self.download_attachments_counted(chat, messages).await {
            (tally, None) => Ok(tally),
            (_, Some(e)) => Err(e),
        }
    }

    /// Like [`download_chat_attachments`](Self::download_chat_attachments),
    /// but keeps the counts of the attachments handled before a stop
    pub(crate) async fn download_attachments_counted(
        &self,
        chat: &Chat,
        messages: &[ChatMessage],
    ) -> (AttachmentTally, Option<Error>) {
        let references: Vec<ContentReference> = messages
            .iter()
            .flat_map(|message| self.extractor.extract(message, &chat.id))
            .collect();

        let mut tally = AttachmentTally::default();
        if references.is_empty() {
            return (tally, None);
        }

        let dir = self
            .config
            .export
            .attachments_dir()
            .join(sanitize_filename(&chat.folder_label()));
        info!(
            chat_id = %chat.id,
            references = references.len(),
            dir = %dir.display(),
            "Downloading attachments"
        );

        // Cancelled by the exporter's token, or locally once credentials are gone
        let stop = self.cancel.child_token();
        let mut downloads = futures::stream::iter(references)
            .map(|reference| {
                let dir = dir.as_path();
                let stop = &stop;
                async move {
                    let result = self.download_one(&reference, dir, stop).await;
                    (reference, result)
                }
            })
            .buffer_unordered(self.config.export.max_concurrent_downloads);

        let mut stopped = None;
        while let Some((reference, result)) = downloads.next().await {
            match result {
                Ok(file) => {
                    tally.saved += 1;
                    self.emit_event(Event::AttachmentSaved {
                        chat_id: chat.id.clone(),
                        path: file.path,
                        byte_count: file.byte_count,
                        source_kind: reference.source_kind,
                    });
                }
                Err(e) if e.stops_downloads() => {
                    if stopped.is_none() {
                        stop.cancel();
                        stopped = Some(e);
                    }
                }
                Err(e) => {
                    tally.failed += 1;
                    warn!(
                        chat_id = %chat.id,
                        name = %reference.suggested_name,
                        url = %reference.raw_url,
                        error = %e,
                        "Attachment download failed"
                    );
                    let attempts = match &e {
                        Error::Resolution(failure) => failure.attempts.clone(),
                        _ => Vec::new(),
                    };
                    self.emit_event(Event::AttachmentFailed {
                        chat_id: chat.id.clone(),
                        name: reference.suggested_name.clone(),
                        code: e.code().to_string(),
                        error: e.to_string(),
                        attempts,
                    });
                }
            }
        }

        if let Some(e) = &stopped {
            warn!(
                chat_id = %chat.id,
                saved = tally.saved,
                failed = tally.failed,
                error = %e,
                "Attachment downloads stopped"
            );
        }
        (tally, stopped)
    }

    async fn download_one(
        &self,
        reference: &ContentReference,
        dir: &Path,
        stop: &CancellationToken,
    ) -> Result<MaterializedFile> {
        if stop.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let resolved = self.resolver.resolve(reference).await?;
        self.materializer.materialize(resolved, dir).await
    }

    /// Download the attachments of an earlier export file
    ///
    /// Messages are grouped by the chat recorded in their `chatInfo`;
    /// messages without one are filed under `chat_unknown`.
    pub async fn download_from_export(&self, export_file: &Path) -> Result<AttachmentTally> {
        let raw = tokio::fs::read(export_file).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read export '{}': {}", export_file.display(), e),
            ))
        })?;
        let messages: Vec<ChatMessage> = serde_json::from_slice(&raw)?;
        info!(
            file = %export_file.display(),
            messages = messages.len(),
            "Loaded export"
        );

        let mut by_chat: BTreeMap<String, (Chat, Vec<ChatMessage>)> = BTreeMap::new();
        for message in messages {
            let chat = message.chat_info.clone().unwrap_or_default();
            by_chat
                .entry(chat.id.clone())
                .or_insert_with(|| (chat, Vec::new()))
                .1
                .push(message);
        }

        let mut tally = AttachmentTally::default();
        for (chat, messages) in by_chat.values() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let chat_tally = self.download_chat_attachments(chat, messages).await?;
            tally.absorb(chat_tally);
        }

        info!(
            saved = tally.saved,
            failed = tally.failed,
            dir = %self.config.export.attachments_dir().display(),
            "Attachment download finished"
        );
        Ok(tally)
    }
}

/// Export files in `output_dir`, newest first
///
/// A missing directory yields an empty list.
pub async fn list_available_exports(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut exports = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_export = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".json") && n.contains(EXPORT_FILE_MARKER));
        if is_export && entry.file_type().await?.is_file() {
            exports.push(path);
        }
    }

    exports.sort_by(|a, b| {
        export_timestamp(b)
            .cmp(&export_timestamp(a))
            .then_with(|| b.cmp(a))
    });
    Ok(exports)
}

/// `{date}_{time}` suffix of an export file name (`private_chats_{mode}_{date}_{time}.json`)
fn export_timestamp(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let mut parts = stem.rsplitn(3, '_');
    match (parts.next(), parts.next()) {
        (Some(time), Some(date)) => format!("{date}_{time}"),
        _ => String::new(),
    }
}
