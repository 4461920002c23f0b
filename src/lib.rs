//! # graph-chat-export
//!
//! Exports a user's private chat history and attachments from the Microsoft
//! Graph API to local files.
//!
//! ## Design
//!
//! - **Resilient requests** - 429 and 401 responses are recovered from
//!   within a bounded retry budget ([`client`], [`retry`])
//! - **Multi-strategy attachments** - files hidden behind sharing links,
//!   inline hosted images and plain links in message bodies are found
//!   ([`extract`]) and fetched through an ordered strategy chain ([`resolver`])
//! - **Collision-safe output** - concurrent downloads never overwrite each
//!   other and never leave partial files under a final name ([`materialize`])
//! - **Pluggable credentials** - the crate never logs in; it asks a
//!   [`TokenProvider`] for headers
//! - **Event-driven** - front ends subscribe to [`Event`]s for progress
//!
//! ## Quick Start
//!
//! ```no_run
//! use graph_chat_export::auth::{CachedTokenProvider, FileTokenSource};
//! use graph_chat_export::{ChatExporter, Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tokens = Arc::new(CachedTokenProvider::new(FileTokenSource::new("token.txt")));
//!     let exporter = ChatExporter::new(Config::default(), tokens)?;
//!
//!     let summary = graph_chat_export::run_with_shutdown(
//!         exporter.cancellation_token(),
//!         exporter.export_all(),
//!     )
//!     .await?;
//!     println!("{} messages in {:?}", summary.messages, summary.export_file);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Token provider seam and token sources
pub mod auth;
/// Authenticated request engine with pagination
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Chat export orchestration (decomposed into focused submodules)
pub mod exporter;
/// Content reference extraction from messages
pub mod extract;
/// Collision-safe file writing
pub mod materialize;
/// Graph resource model
pub mod model;
/// Attachment resolution strategies
pub mod resolver;
/// Bounded recovery from rate limiting and token expiry
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use auth::{AuthHeaders, CachedTokenProvider, TokenProvider, TokenSource};
pub use client::{Collected, RequestExecutor, RequestOutcome};
pub use config::{Config, ExportMode};
pub use error::{Error, ResolutionFailure, Result};
pub use exporter::{ChatExporter, list_available_exports};
pub use extract::ContentReferenceExtractor;
pub use materialize::FileMaterializer;
pub use resolver::{AttachmentResolver, ResolvedAttachment};
pub use types::{
    AttachmentTally, ContentReference, Event, ExportSummary, MaterializedFile, ResolutionAttempt,
    SourceKind, Strategy,
};

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `work` and cancel `token` when a termination signal arrives
///
/// The exporter checks its token between chats and between attachments, so
/// a signal lets the running chat finish and the export file still gets
/// written. Signals arriving after `work` completed are not observed.
///
/// - **Unix:** SIGTERM and SIGINT, with fallbacks if registration fails.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown<F, T>(token: CancellationToken, work: F) -> T
where
    F: Future<Output = T>,
{
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Stopping after the current chat");
            token.cancel();
        })
    };

    let output = work.await;
    watcher.abort();
    output
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    async fn recv_or_pending(signal: Option<&mut Signal>) {
        match signal {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    // Registration can fail in restricted environments (containers, tests)
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| tracing::warn!(error = %e, "Could not register SIGTERM handler"))
        .ok();
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| tracing::warn!(error = %e, "Could not register SIGINT handler"))
        .ok();

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
        tokio::signal::ctrl_c().await.ok();
        return;
    }

    tokio::select! {
        _ = recv_or_pending(sigterm.as_mut()) => tracing::info!("Received SIGTERM signal"),
        _ = recv_or_pending(sigint.as_mut()) => tracing::info!("Received SIGINT signal (Ctrl+C)"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
