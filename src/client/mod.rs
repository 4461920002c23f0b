//! Authenticated request engine
//!
//! [`RequestExecutor`] issues GET requests with the token provider's headers
//! and recovers from the two conditions the API uses for flow control:
//! - **429** waits for `Retry-After` (default 60 s) and re-issues the identical request
//! - **401** invalidates the token generation that was used and retries with a fresh one
//!
//! Both loops are bounded by [`RecoveryBudget`]. Any other non-2xx status or a
//! transport error ends the request. Collection endpoints are followed through
//! `@odata.nextLink` by [`RequestExecutor::pages`]; query parameters are only
//! sent with the first request because continuation links already carry them.

use crate::auth::TokenProvider;
use crate::config::{GraphConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::model::Page;
use crate::retry::{RecoveryBudget, RecoveryStats, parse_retry_after};
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};


/// Query parameters for the first request of a traversal
pub type QueryParams = Vec<(String, String)>;

/// Maximum number of response-body characters included in failure logs
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// Classified result of a single request
#[derive(Debug)]
pub enum RequestOutcome<T = reqwest::Response> {
    /// 2xx response
    Success(T),
    /// 429 with the wait the server asked for
    RateLimited {
        /// Parsed `Retry-After` (or the configured default)
        retry_after: Duration,
    },
    /// 401; carries the token generation that was rejected
    Unauthorized {
        /// Generation of the rejected token
        generation: u64,
    },
    /// Transport error or any other non-2xx status
    TransportFailure(Error),
}

/// What to do when a request comes back 401
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnauthorizedPolicy {
    /// Refresh the token and retry (requests to the Graph API)
    Refresh,
    /// Report the 401 as a failure (third-party hosts that reject our token)
    Fail,
}

/// Items gathered from a paginated traversal
#[derive(Debug)]
pub struct Collected<T> {
    /// Items of all pages fetched successfully, in order
    pub items: Vec<T>,
    /// Number of pages fetched
    pub pages: usize,
    /// The error that ended the traversal early, if any
    pub error: Option<Error>,
}

impl<T> Collected<T> {
    /// Whether every page was fetched
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Issues authenticated requests with bounded 429/401 recovery
pub struct RequestExecutor {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryConfig,
    stats: Arc<RecoveryStats>,
}

impl RequestExecutor {
    /// Create an executor
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(
        graph: &GraphConfig,
        retry: RetryConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(graph.request_timeout)
            .user_agent(concat!("graph-chat-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            tokens,
            retry,
            stats: Arc::new(RecoveryStats::default()),
        })
    }

    /// Recovery counters shared by every request of this executor
    pub fn stats(&self) -> Arc<RecoveryStats> {
        self.stats.clone()
    }

    /// Issue one request and classify the response
    ///
    /// # Errors
    /// Only fails when the token provider cannot produce credentials; every
    /// HTTP-level result is expressed as a [`RequestOutcome`].
    pub async fn execute_once(
        &self,
        url: &str,
        query: Option<&[(String, String)]>,
    ) -> Result<RequestOutcome> {
        let headers = self.tokens.current_auth_headers().await?;

        let mut request = self
            .http
            .get(url)
            .header(AUTHORIZATION, &headers.authorization)
            .header(CONTENT_TYPE, &headers.content_type);
        if let Some(query) = query {
            request = request.query(query);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Request failed");
                return Ok(RequestOutcome::TransportFailure(Error::Network(e)));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let header = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            let retry_after =
                parse_retry_after(header, chrono::Utc::now(), self.retry.default_retry_after);
            return Ok(RequestOutcome::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Ok(RequestOutcome::Unauthorized {
                generation: headers.generation,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
            warn!(url, status = status.as_u16(), body = %preview, "Request returned error status");
            return Ok(RequestOutcome::TransportFailure(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }

        Ok(RequestOutcome::Success(response))
    }

    /// Issue a request, recovering from 429 and (per `policy`) 401
    ///
    /// # Errors
    /// - [`Error::RetryExhausted`] when the recovery budget runs out
    /// - [`Error::Http`] / [`Error::Network`] for other failures
    /// - [`Error::Auth`] when no credentials can be obtained
    pub async fn get(
        &self,
        url: &str,
        query: Option<&[(String, String)]>,
        policy: UnauthorizedPolicy,
    ) -> Result<reqwest::Response> {
        let mut budget = RecoveryBudget::new(&self.retry);

        loop {
            budget.record_attempt();
            match self.execute_once(url, query).await? {
                RequestOutcome::Success(response) => {
                    if budget.attempts() > 1 {
                        info!(url, attempts = budget.attempts(), "Request succeeded after recovery");
                    }
                    return Ok(response);
                }
                RequestOutcome::RateLimited { retry_after } => {
                    let wait = budget.rate_limit_wait(url, retry_after)?;
                    warn!(
                        url,
                        attempt = budget.attempts(),
                        retry_after_secs = retry_after.as_secs(),
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting before retry"
                    );
                    self.stats.record_rate_limit(wait);
                    tokio::time::sleep(wait).await;
                }
                RequestOutcome::Unauthorized { generation } => match policy {
                    UnauthorizedPolicy::Fail => {
                        return Err(Error::Http {
                            status: StatusCode::UNAUTHORIZED.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    UnauthorizedPolicy::Refresh => {
                        budget.auth_refresh(url)?;
                        warn!(url, generation, "Token rejected, refreshing");
                        self.tokens.invalidate(generation).await;
                        self.stats.record_token_refresh();
                    }
                },
                RequestOutcome::TransportFailure(e) => return Err(e),
            }
        }
    }

    /// Fetch one JSON document with recovery
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: Option<&[(String, String)]>,
    ) -> Result<T> {
        let response = self.get(url, query, UnauthorizedPolicy::Refresh).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch one page of a collection
    pub async fn fetch_page(&self, url: &str, query: Option<&[(String, String)]>) -> Result<Page> {
        self.get_json(url, query).await
    }

    /// Lazily follow a collection from `initial_url` to its last page
    ///
    /// The stream ends after the last page or right after yielding the first
    /// error. A continuation link that was already visited also ends it, so no
    /// page is ever yielded twice.
    pub fn pages(
        &self,
        initial_url: &str,
        query: Option<QueryParams>,
    ) -> impl Stream<Item = Result<Page>> + '_ {
        let cursor = PageCursor {
            next: Some(initial_url.to_string()),
            query,
            seen: HashSet::new(),
        };

        futures::stream::unfold(cursor, move |mut cursor| async move {
            let url = cursor.next.take()?;
            cursor.seen.insert(url.clone());
            let query = cursor.query.take();

            match self.fetch_page(&url, query.as_deref()).await {
                Ok(page) => {
                    match page.next_link.as_deref() {
                        Some(next) if cursor.seen.contains(next) => {
                            warn!(url = next, "Continuation link repeats a fetched page, stopping");
                        }
                        Some(next) => cursor.next = Some(next.to_string()),
                        None => {}
                    }
                    Some((Ok(page), cursor))
                }
                Err(e) => Some((Err(e), cursor)),
            }
        })
    }

    /// Gather every item of a collection
    ///
    /// `page_delay` is slept between pages. Items that do not deserialize as
    /// `T` are logged and skipped; a failing page ends the traversal and is
    /// reported in [`Collected::error`] next to the items gathered so far.
    pub async fn collect_all<T: DeserializeOwned>(
        &self,
        initial_url: &str,
        query: Option<QueryParams>,
        page_delay: Duration,
    ) -> Collected<T> {
        let mut collected = Collected {
            items: Vec::new(),
            pages: 0,
            error: None,
        };

        let pages = self.pages(initial_url, query);
        futures::pin_mut!(pages);

        while let Some(page) = pages.next().await {
            match page {
                Ok(page) => {
                    collected.pages += 1;
                    let has_more = page.next_link.is_some();
                    for item in page.value {
                        match serde_json::from_value::<T>(item) {
                            Ok(item) => collected.items.push(item),
                            Err(e) => warn!(url = initial_url, error = %e, "Skipping malformed item"),
                        }
                    }
                    debug!(
                        url = initial_url,
                        pages = collected.pages,
                        items = collected.items.len(),
                        "Page fetched"
                    );
                    if has_more && !page_delay.is_zero() {
                        tokio::time::sleep(page_delay).await;
                    }
                }
                Err(e) => {
                    warn!(
                        url = initial_url,
                        pages = collected.pages,
                        error = %e,
                        "Pagination ended early"
                    );
                    collected.error = Some(e);
                }
            }
        }

        collected
    }
}

/// Continuation state of one traversal
struct PageCursor {
    next: Option<String>,
    query: Option<QueryParams>,
    seen: HashSet<String>,
}
