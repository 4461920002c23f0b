//! Utility functions for file names and URLs

use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use std::path::Path;

/// Extension used when an attachment name cannot be derived from its URL or metadata
pub const FALLBACK_EXTENSION: &str = "pdf";

/// Last path segment of `url`, percent-decoded
///
/// Returns `None` for unparseable URLs and for URLs whose path ends in `/`.
///
/// # Examples
///
/// ```
/// use graph_chat_export::utils::filename_from_url;
///
/// assert_eq!(
///     filename_from_url("https://contoso.sharepoint.com/Shared%20Documents/Q3%20plan.docx?web=1").as_deref(),
///     Some("Q3 plan.docx")
/// );
/// assert_eq!(filename_from_url("https://contoso.sharepoint.com/"), None);
/// ```
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string());
    Some(decoded)
}

/// Whether `name` ends in a non-empty extension
pub fn has_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| !ext.is_empty())
}

/// Name for a structured file attachment
///
/// The URL basename wins; otherwise the attachment name when it carries an
/// extension; otherwise `{name-or-id}.pdf`.
pub fn attachment_file_name(url: &str, name: Option<&str>, id: &str) -> String {
    if let Some(from_url) = filename_from_url(url) {
        return from_url;
    }

    let name = name.map(str::trim).filter(|n| !n.is_empty());
    match name {
        Some(name) if has_extension(name) => name.to_string(),
        Some(name) => format!("{}.{}", name, FALLBACK_EXTENSION),
        None if !id.is_empty() => format!("{}.{}", id, FALLBACK_EXTENSION),
        None => format!("attachment.{}", FALLBACK_EXTENSION),
    }
}

/// File name announced by a `Content-Disposition` header
///
/// Prefers the RFC 5987 `filename*=charset'lang'value` form over `filename=`.
pub fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;

    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            let encoded = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"'))
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }
    plain
}
