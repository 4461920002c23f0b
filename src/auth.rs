//! Token provider seam
//!
//! The request executor never logs in by itself. It asks a [`TokenProvider`]
//! for the current auth headers and, after a 401, invalidates the token
//! generation it used. [`CachedTokenProvider`] caches the token minted by a
//! [`TokenSource`] and coordinates refreshes: the cache lock is held while a
//! new token is minted, and invalidating an already-replaced generation is a
//! no-op, so concurrent workers that hit 401 on the same stale token cause a
//! single refresh.
//!
//! Interactive flows (device code, browser) live outside this crate; they can
//! write a token file or expose a command, or implement [`TokenSource`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Headers attached to every authenticated request
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    /// `Authorization` header value (`Bearer ...`)
    pub authorization: String,
    /// `Content-Type` header value
    pub content_type: String,
    /// Generation of the token these headers carry
    pub generation: u64,
}

impl std::fmt::Debug for AuthHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHeaders")
            .field("authorization", &"<redacted>")
            .field("content_type", &self.content_type)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Credential collaborator used by the request executor
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Headers for the current token, minting one if none is cached
    async fn current_auth_headers(&self) -> Result<AuthHeaders>;

    /// Drop the token of `generation` so the next call mints a fresh one
    ///
    /// Calls naming a generation that was already replaced do nothing.
    async fn invalidate(&self, generation: u64);
}

/// Something that can mint a bearer token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce a fresh access token
    async fn mint(&self) -> Result<String>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

struct CachedToken {
    secret: String,
    generation: u64,
}

/// Caching provider with a single-flight refresh guard
pub struct CachedTokenProvider<S> {
    source: S,
    cached: Mutex<Option<CachedToken>>,
    next_generation: AtomicU64,
    mints: AtomicU64,
}

impl<S: TokenSource> CachedTokenProvider<S> {
    /// Wrap a token source
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            mints: AtomicU64::new(0),
        }
    }

    /// Number of tokens minted so far
    pub fn mint_count(&self) -> u64 {
        self.mints.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<S: TokenSource> TokenProvider for CachedTokenProvider<S> {
    async fn current_auth_headers(&self) -> Result<AuthHeaders> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            let secret = self.source.mint().await?;
            let secret = secret.trim().to_string();
            if secret.is_empty() {
                return Err(Error::Auth(format!(
                    "token source '{}' returned an empty token",
                    self.source.name()
                )));
            }
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            self.mints.fetch_add(1, Ordering::Relaxed);
            tracing::info!(source = self.source.name(), generation, "Access token acquired");
            *cached = Some(CachedToken { secret, generation });
        }

        match cached.as_ref() {
            Some(token) => Ok(bearer_headers(&token.secret, token.generation)),
            None => Err(Error::Auth("token cache is empty".into())),
        }
    }

    async fn invalidate(&self, generation: u64) {
        let mut cached = self.cached.lock().await;
        match cached.as_ref() {
            Some(token) if token.generation == generation => {
                tracing::info!(generation, "Access token invalidated");
                *cached = None;
            }
            _ => {
                tracing::debug!(generation, "Ignoring invalidation of a replaced token");
            }
        }
    }
}

fn bearer_headers(secret: &str, generation: u64) -> AuthHeaders {
    AuthHeaders {
        authorization: format!("Bearer {secret}"),
        content_type: "application/json".to_string(),
        generation,
    }
}

/// A fixed token (for example from `GRAPH_ACCESS_TOKEN`)
///
/// Re-minting returns the same value, so a 401 on an expired static token
/// ends in `RetryExhausted` once the refresh budget is spent.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Use `token` as the bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn mint(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Reads the token from a file on every mint
///
/// Lets an external login helper refresh the file while an export runs.
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    /// Read tokens from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn mint(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Auth(format!(
                "failed to read token file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Runs a shell command and uses its trimmed stdout as the token
///
/// For example `az account get-access-token --resource-type ms-graph --query accessToken -o tsv`.
pub struct CommandTokenSource {
    command: String,
}

impl CommandTokenSource {
    /// Run `command` through the platform shell on every mint
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TokenSource for CommandTokenSource {
    async fn mint(&self) -> Result<String> {
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };

        let output = command
            .arg(&self.command)
            .output()
            .await
            .map_err(|e| Error::Auth(format!("failed to run token command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Auth(format!(
                "token command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| Error::Auth(format!("token command produced invalid UTF-8: {}", e)))
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
