//! Full export runs.

use crate::error::{Error, Result};
use crate::model::{Chat, ChatMessage};
use crate::types::{AttachmentTally, Event, ExportSummary};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

use super::ChatExporter;

/// How the chat loop ended
enum Stop {
    Finished,
    Cancelled,
    Fatal(Error),
}

impl ChatExporter {
    /// Export every chat (or the configured subset)
    ///
    /// Steps:
    /// 1. confirm the credentials with `/me`
    /// 2. list chats, limited by `export.mode` / `export.max_chats`
    /// 3. per chat: page through its messages, then download its attachments
    ///    when `export.download_attachments` is set
    /// 4. write all messages to `{output_dir}/private_chats_{mode}_{timestamp}.json`
    ///
    /// Failures of a single chat or attachment are counted and the run goes on.
    /// Cancellation stops between chats and still writes what was fetched.
    ///
    /// # Errors
    /// Returns fatal errors (credentials rejected, retry budget exhausted on
    /// a chat or message listing).
    /// Messages fetched before the error are still written to disk.
    pub async fn export_all(&self) -> Result<ExportSummary> {
        let started = Instant::now();
        let mut summary = ExportSummary::default();

        if self.my_display_name().await.is_none() {
            self.test_connection().await?;
        }
        let me = self.my_display_name().await;

        let mut chats = self.list_chats().await?;
        if let Some(limit) = self.config.export.chat_limit() {
            chats.truncate(limit);
        }
        let total = chats.len();
        info!(chats = total, mode = self.config.export.mode.as_str(), "Starting export");
        self.emit_event(Event::ChatsListed { count: total });

        let mut all_messages: Vec<ChatMessage> = Vec::new();
        let mut stop = Stop::Finished;

        for (index, chat) in chats.iter().enumerate() {
            if index > 0 && !self.pause(self.config.export.chat_delay).await {
                stop = Stop::Cancelled;
                break;
            }
            if self.cancel.is_cancelled() {
                stop = Stop::Cancelled;
                break;
            }

            let label = chat.display_label(me.as_deref());
            info!(chat_id = %chat.id, chat = %label, index = index + 1, total, "Exporting chat");
            self.emit_event(Event::ChatStarted {
                chat_id: chat.id.clone(),
                display: label,
                index: index + 1,
                total,
            });

            match self.export_chat(chat, &mut summary, &mut all_messages).await {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    stop = Stop::Cancelled;
                    break;
                }
                Err(e) => {
                    stop = Stop::Fatal(e);
                    break;
                }
            }
        }

        if !all_messages.is_empty() {
            summary.export_file = Some(self.write_export(&all_messages).await?);
        }

        let stats = self.executor.stats();
        summary.rate_limit_waits = stats.rate_limit_waits();
        summary.token_refreshes = stats.token_refreshes();
        summary.cancelled = matches!(stop, Stop::Cancelled);
        summary.duration = started.elapsed();

        info!(
            chats_exported = summary.chats_exported,
            chats_failed = summary.chats_failed,
            messages = summary.messages,
            attachments_saved = summary.attachments.saved,
            attachments_failed = summary.attachments.failed,
            rate_limit_waits = summary.rate_limit_waits,
            token_refreshes = summary.token_refreshes,
            cancelled = summary.cancelled,
            duration_secs = summary.duration.as_secs_f64(),
            "Export finished"
        );
        for (chat_type, count) in &summary.messages_by_chat_type {
            info!(chat_type = %chat_type, messages = count, "Messages by chat type");
        }
        self.emit_event(Event::ExportComplete {
            summary: summary.clone(),
        });

        match stop {
            Stop::Fatal(e) => {
                error!(error = %e, "Export aborted");
                Err(e)
            }
            Stop::Finished | Stop::Cancelled => Ok(summary),
        }
    }

    /// Fetch one chat's messages and attachments into the run totals
    ///
    /// Only fatal errors are returned; anything else is counted.
    async fn export_chat(
        &self,
        chat: &Chat,
        summary: &mut ExportSummary,
        all_messages: &mut Vec<ChatMessage>,
    ) -> Result<()> {
        let collected = self.fetch_messages(chat).await;
        let messages = collected.items;

        match collected.error {
            Some(e) if e.is_fatal() => {
                // Keep what was fetched before the error in the export file
                self.record_messages(chat, &messages, summary);
                all_messages.extend(messages);
                return Err(e);
            }
            Some(e) => {
                warn!(chat_id = %chat.id, fetched = messages.len(), error = %e, "Chat export incomplete");
                summary.chats_failed += 1;
                self.emit_event(Event::ChatFailed {
                    chat_id: chat.id.clone(),
                    error: e.to_string(),
                });
            }
            None => summary.chats_exported += 1,
        }

        self.record_messages(chat, &messages, summary);

        let (attachments, stopped) =
            if self.config.export.download_attachments && !messages.is_empty() {
                self.download_attachments_counted(chat, &messages).await
            } else {
                (AttachmentTally::default(), None)
            };
        summary.attachments.absorb(attachments);

        self.emit_event(Event::ChatFinished {
            chat_id: chat.id.clone(),
            messages: messages.len(),
            attachments,
        });
        all_messages.extend(messages);
        match stopped {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_messages(&self, chat: &Chat, messages: &[ChatMessage], summary: &mut ExportSummary) {
        summary.messages += messages.len();
        *summary
            .messages_by_chat_type
            .entry(chat.chat_type_or_unknown().to_string())
            .or_default() += messages.len();
        self.emit_event(Event::MessagesFetched {
            chat_id: chat.id.clone(),
            count: messages.len(),
            running_total: summary.messages,
        });
    }

    /// Write `messages` as a pretty-printed JSON array
    async fn write_export(&self, messages: &[ChatMessage]) -> Result<PathBuf> {
        let dir = &self.config.export.output_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create output directory '{}': {}", dir.display(), e),
            ))
        })?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!(
            "private_chats_{}_{}.json",
            self.config.export.mode.as_str(),
            timestamp
        ));

        let json = serde_json::to_vec_pretty(messages)?;
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), messages = messages.len(), "Export written");
        Ok(path)
    }

    /// Sleep for `delay` unless cancelled first; `false` when cancelled
    async fn pause(&self, delay: std::time::Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}
