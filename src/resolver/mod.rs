//! Attachment resolution
//!
//! A content reference only says where a file was seen, not how to fetch it.
//! Files shared from a document library are often unreachable through their
//! browser URL with a Graph token, so the resolver walks an ordered chain of
//! strategies until one returns content:
//!
//! | # | Strategy    | Applies to                | Request |
//! |---|-------------|---------------------------|---------|
//! | 1 | SharedItem  | document-library hosts    | `{graph}/shares/u!{base64url(url)}/driveItem/content` |
//! | 2 | DirectUrl   | every reference           | the raw URL |
//! | 3 | DrivePath   | document-library hosts    | `{graph}/me/drive/root:{path}:/content` |
//!
//! Each failed strategy is logged and recorded as a [`ResolutionAttempt`];
//! only running out of strategies fails the reference.

use crate::client::{RequestExecutor, UnauthorizedPolicy};
use crate::config::{GraphConfig, ResolverConfig};
use crate::error::{Error, ResolutionFailure, Result};
use crate::types::{AttemptOutcome, ContentReference, ResolutionAttempt, SourceKind, Strategy};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;


/// A reference whose content is ready to be streamed
#[derive(Debug)]
pub struct ResolvedAttachment {
    /// The reference that was resolved
    pub reference: ContentReference,
    /// Response of the winning strategy (body not yet read)
    pub response: reqwest::Response,
    /// Every attempt made, the successful one last
    pub attempts: Vec<ResolutionAttempt>,
}

impl ResolvedAttachment {
    /// Strategy that produced the content
    pub fn strategy(&self) -> Option<Strategy> {
        self.attempts.last().map(|a| a.strategy)
    }
}

/// Runs the strategy chain for content references
pub struct AttachmentResolver {
    executor: Arc<RequestExecutor>,
    graph: GraphConfig,
    config: ResolverConfig,
}

impl AttachmentResolver {
    /// Create a resolver that issues its requests through `executor`
    pub fn new(executor: Arc<RequestExecutor>, graph: GraphConfig, config: ResolverConfig) -> Self {
        Self {
            executor,
            graph,
            config,
        }
    }

    /// Strategies applicable to `reference`, in the order they are tried
    pub fn plan(&self, reference: &ContentReference) -> Vec<(Strategy, String)> {
        let direct = (Strategy::DirectUrl, reference.raw_url.clone());
        if reference.source_kind == SourceKind::HostedInlineImage {
            return vec![direct];
        }

        let Ok(parsed) = Url::parse(&reference.raw_url) else {
            return vec![direct];
        };
        let is_library = parsed
            .host_str()
            .is_some_and(|host| self.config.is_document_library_host(host));
        if !is_library {
            return vec![direct];
        }

        let mut plan = vec![
            (
                Strategy::SharedItem,
                self.graph.url(&format!(
                    "shares/{}/driveItem/content",
                    encode_sharing_url(&reference.raw_url)
                )),
            ),
            direct,
        ];
        if let Some(path) = drive_relative_path(&parsed) {
            plan.push((
                Strategy::DrivePath,
                self.graph.url(&format!("me/drive/root:{}:/content", path)),
            ));
        }
        plan
    }

    /// Try each strategy until one yields content
    ///
    /// # Errors
    /// - [`Error::Resolution`] when every strategy failed
    /// - missing credentials and cancellation are returned as-is without
    ///   trying the remaining strategies; an exhausted retry budget only
    ///   fails the strategy it happened in
    pub async fn resolve(&self, reference: &ContentReference) -> Result<ResolvedAttachment> {
        let mut attempts = Vec::new();

        for (strategy, url) in self.plan(reference) {
            let policy = if self.is_graph_url(&url) {
                UnauthorizedPolicy::Refresh
            } else {
                UnauthorizedPolicy::Fail
            };

            let outcome = match self.executor.get(&url, None, policy).await {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    if response.content_length() == Some(0) {
                        AttemptOutcome::Error("empty body".to_string())
                    } else {
                        debug!(
                            name = %reference.suggested_name,
                            strategy = strategy.as_str(),
                            "Resolved attachment"
                        );
                        attempts.push(ResolutionAttempt {
                            strategy,
                            url,
                            outcome: AttemptOutcome::Success,
                        });
                        return Ok(ResolvedAttachment {
                            reference: reference.clone(),
                            response,
                            attempts,
                        });
                    }
                }
                Ok(response) => AttemptOutcome::Status(response.status().as_u16()),
                Err(e) if e.stops_downloads() => return Err(e),
                Err(Error::Http { status, .. }) => AttemptOutcome::Status(status),
                Err(e) => AttemptOutcome::Error(e.to_string()),
            };

            warn!(
                name = %reference.suggested_name,
                strategy = strategy.as_str(),
                ordinal = strategy.ordinal(),
                outcome = ?outcome,
                "Resolution strategy failed"
            );
            attempts.push(ResolutionAttempt {
                strategy,
                url,
                outcome,
            });
        }

        Err(ResolutionFailure {
            name: reference.suggested_name.clone(),
            attempts,
        }
        .into())
    }

    fn is_graph_url(&self, url: &str) -> bool {
        let graph_host = Url::parse(&self.graph.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        graph_host.is_some() && graph_host == host
    }
}

/// Encode a sharing URL for the `/shares/{id}` endpoint
///
/// # Examples
///
/// ```
/// use graph_chat_export::resolver::encode_sharing_url;
///
/// assert_eq!(
///     encode_sharing_url("https://contoso.sharepoint.com/personal/u/Documents/report.pdf"),
///     "u!aHR0cHM6Ly9jb250b3NvLnNoYXJlcG9pbnQuY29tL3BlcnNvbmFsL3UvRG9jdW1lbnRzL3JlcG9ydC5wZGY"
/// );
/// ```
pub fn encode_sharing_url(url: &str) -> String {
    format!("u!{}", URL_SAFE_NO_PAD.encode(url.as_bytes()))
}

/// Path of a library file relative to the signed-in user's drive root
///
/// Personal sites (`/personal/{user}/Documents/...`) lose their prefix; any
/// other path is used whole. Segments are re-encoded; `None` when nothing is
/// left to address.
pub fn drive_relative_path(url: &Url) -> Option<String> {
    let segments: Vec<String> = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();

    let relative = match segments.as_slice() {
        [personal, _user, documents, rest @ ..]
            if personal.eq_ignore_ascii_case("personal")
                && documents.eq_ignore_ascii_case("Documents") =>
        {
            rest
        }
        all => all,
    };

    if relative.is_empty() {
        return None;
    }

    Some(
        relative
            .iter()
            .map(|s| format!("/{}", urlencoding::encode(s)))
            .collect(),
    )
}
