//! Chat export orchestration split into focused submodules.
//!
//! The `ChatExporter` struct and its methods are organized by domain:
//! - [`chats`] - Connection test, chat listing and message paging
//! - [`attachments`] - Reference extraction, resolution and download per chat
//! - [`run`] - Full export runs and the JSON export file

mod attachments;
mod chats;
mod run;


pub use attachments::list_available_exports;

use crate::auth::TokenProvider;
use crate::client::RequestExecutor;
use crate::config::Config;
use crate::error::Result;
use crate::extract::ContentReferenceExtractor;
use crate::materialize::FileMaterializer;
use crate::model::UserProfile;
use crate::resolver::AttachmentResolver;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

/// Number of events buffered per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Exports private chats and their attachments
///
/// Chats are traversed one after the other; attachments of a chat are
/// downloaded concurrently, bounded by `export.max_concurrent_downloads`.
pub struct ChatExporter {
    config: Arc<Config>,
    executor: Arc<RequestExecutor>,
    extractor: ContentReferenceExtractor,
    resolver: AttachmentResolver,
    materializer: FileMaterializer,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
    me: RwLock<Option<UserProfile>>,
}

impl ChatExporter {
    /// Create an exporter
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be created
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use graph_chat_export::auth::{CachedTokenProvider, StaticTokenSource};
    /// use graph_chat_export::{ChatExporter, Config};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let tokens = Arc::new(CachedTokenProvider::new(StaticTokenSource::new("eyJ0...")));
    ///     let exporter = ChatExporter::new(Config::default(), tokens)?;
    ///
    ///     let mut events = exporter.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("{:?}", event);
    ///         }
    ///     });
    ///
    ///     let summary = exporter.export_all().await?;
    ///     println!("{} messages exported", summary.messages);
    ///     Ok(())
    /// }
    /// ```
    pub fn new(config: Config, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        config.validate()?;

        let executor = Arc::new(RequestExecutor::new(
            &config.graph,
            config.retry.clone(),
            tokens,
        )?);
        let resolver = AttachmentResolver::new(
            executor.clone(),
            config.graph.clone(),
            config.resolver.clone(),
        );
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            executor,
            extractor: ContentReferenceExtractor::new()?,
            resolver,
            materializer: FileMaterializer::new(),
            event_tx,
            cancel: CancellationToken::new(),
            me: RwLock::new(None),
        })
    }

    /// Subscribe to export events
    ///
    /// Each subscriber receives every event emitted after it subscribed. A
    /// subscriber that falls more than 1000 events behind gets
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the export between chats and between attachments
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a clean stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The configuration the exporter runs with
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Request engine shared by every call of this exporter
    pub fn executor(&self) -> Arc<RequestExecutor> {
        Arc::clone(&self.executor)
    }

    /// Emit an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
