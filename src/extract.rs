//! Content reference extraction
//!
//! Turns one chat message into the list of files worth downloading, in a
//! fixed order:
//! 1. structured `reference` attachments (files shared from a document library)
//! 2. inline images hosted by the chat service (`.../hostedContents/{id}/$value`)
//! 3. file-looking URLs in the body markup
//!
//! Extraction is pure: the same message always yields the same references,
//! and a URL is never emitted twice for one message.

use crate::error::{Error, Result};
use crate::model::ChatMessage;
use crate::types::{ContentReference, SourceKind};
use crate::utils::attachment_file_name;
use regex::Regex;
use std::collections::HashSet;

/// Body URLs with these extensions are downloaded
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "rar", "txt",
];

/// Body URLs containing any of these are downloaded
pub const DOCUMENT_HOST_KEYWORDS: &[&str] = &["sharepoint.com", "onedrive", "1drv.ms"];

/// Characters stripped from the end of URLs found in running text
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', ')', ']', '!', '?'];

/// Scans messages for downloadable content
#[derive(Debug, Clone)]
pub struct ContentReferenceExtractor {
    hosted: Regex,
    url: Regex,
    item_id: Regex,
}

impl ContentReferenceExtractor {
    /// Compile the extraction patterns
    ///
    /// # Errors
    /// Returns error if a pattern fails to compile
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::Other(format!("invalid extraction pattern '{}': {}", pattern, e)))
        };

        Ok(Self {
            hosted: compile(r#"https?://[^\s"'<>]+?/hostedContents/([^\s"'<>/]+)/\$value"#)?,
            url: compile(r#"https?://[^\s"'<>]+"#)?,
            item_id: compile(r#"itemid\s*=\s*["']([^"']+)["']"#)?,
        })
    }

    /// References found in `message`, which belongs to chat `chat_id`
    pub fn extract(&self, message: &ChatMessage, chat_id: &str) -> Vec<ContentReference> {
        let mut references = Vec::new();
        let mut emitted = HashSet::new();

        let mut push = |reference: ContentReference| {
            if emitted.insert(reference.raw_url.clone()) {
                references.push(reference);
            }
        };

        for attachment in &message.attachments {
            if attachment.content_type != "reference" {
                continue;
            }
            let Some(url) = attachment
                .content_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
            else {
                continue;
            };
            push(ContentReference {
                source_kind: SourceKind::StructuredAttachment,
                raw_url: url.to_string(),
                suggested_name: attachment_file_name(url, attachment.name.as_deref(), &attachment.id),
                mime_hint: None,
                size_hint: None,
                origin_message_id: message.id.clone(),
                origin_chat_id: chat_id.to_string(),
            });
        }

        let markup = message.body.content.as_str();
        let mut hosted_urls = HashSet::new();
        for captures in self.hosted.captures_iter(markup) {
            let (Some(whole), Some(content_id)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let url = decode_entities(whole.as_str());
            let name_id = self
                .item_id_in_enclosing_tag(markup, whole.start(), whole.end())
                .or_else(|| self.first_item_id(markup))
                .unwrap_or_else(|| content_id.as_str().to_string());

            hosted_urls.insert(url.clone());
            push(ContentReference {
                source_kind: SourceKind::HostedInlineImage,
                raw_url: url,
                suggested_name: format!("image_{}.jpg", name_id),
                mime_hint: Some("image/jpeg".to_string()),
                size_hint: None,
                origin_message_id: message.id.clone(),
                origin_chat_id: chat_id.to_string(),
            });
        }

        for found in self.url.find_iter(markup) {
            let url = decode_entities(found.as_str().trim_end_matches(TRAILING_PUNCTUATION));
            if hosted_urls.contains(&url) || self.hosted.is_match(&url) || !looks_like_document(&url) {
                continue;
            }
            let suggested_name = attachment_file_name(&url, None, &message.id);
            push(ContentReference {
                source_kind: SourceKind::HeuristicUrlMatch,
                raw_url: url,
                suggested_name,
                mime_hint: None,
                size_hint: None,
                origin_message_id: message.id.clone(),
                origin_chat_id: chat_id.to_string(),
            });
        }

        references
    }

    /// `itemid` attribute of the tag that contains `start..end`
    fn item_id_in_enclosing_tag(&self, markup: &str, start: usize, end: usize) -> Option<String> {
        let tag_start = markup[..start].rfind('<')?;
        // A '>' between the tag opening and the URL means the URL is not inside a tag
        if markup[tag_start..start].contains('>') {
            return None;
        }
        let tag_end = markup[end..].find('>').map_or(markup.len(), |i| end + i);
        self.item_id
            .captures(&markup[tag_start..tag_end])
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn first_item_id(&self, markup: &str) -> Option<String> {
        self.item_id
            .captures(markup)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Whether a body URL points at a document worth downloading
fn looks_like_document(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    if DOCUMENT_HOST_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return true;
    }

    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => return false,
    };
    DOCUMENT_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{ext}")))
}

fn decode_entities(url: &str) -> String {
    url.replace("&amp;", "&")
}
