//! Graph resource model
//!
//! Typed views over the JSON the API returns. Every field tolerates being
//! absent or `null` and defaults to an empty value; fields this crate does not
//! use are kept in `extra` so that re-serializing a message loses nothing.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Deserialize `null` the same way as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One page of a collection response
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Page {
    /// Items of this page
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: Vec<Value>,

    /// Absolute URL of the next page; `None` ends the sequence
    #[serde(
        rename = "@odata.nextLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_link: Option<String>,
}

/// Signed-in user, as returned by `/me`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Object ID
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Display name
    #[serde(default, deserialize_with = "null_as_default")]
    pub display_name: String,
    /// Sign-in name (usually the e-mail address)
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_principal_name: String,
}

/// Member of a chat (expanded with `$expand=members`)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Fields not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chat conversation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Chat ID
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Topic (usually absent for 1:1 chats)
    #[serde(default)]
    pub topic: Option<String>,
    /// `oneOnOne`, `group`, `meeting`, ...
    #[serde(default, deserialize_with = "null_as_default")]
    pub chat_type: String,
    /// Members, when expanded
    #[serde(default, deserialize_with = "null_as_default")]
    pub members: Vec<ChatMember>,
    /// Fields not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chat {
    /// Chat type, or `unknown` when the API omitted it
    pub fn chat_type_or_unknown(&self) -> &str {
        if self.chat_type.is_empty() {
            "unknown"
        } else {
            &self.chat_type
        }
    }

    /// Human-readable label
    ///
    /// `me` is the signed-in user's display name and is left out of 1:1 labels.
    pub fn display_label(&self, me: Option<&str>) -> String {
        let topic = self.topic.as_deref().unwrap_or("untitled");
        let members: Vec<&str> = self
            .members
            .iter()
            .map(|m| m.display_name.as_deref().unwrap_or("unknown user"))
            .collect();

        match self.chat_type.as_str() {
            "oneOnOne" => match members.iter().find(|name| Some(**name) != me) {
                Some(other) => format!("1:1 with {other}"),
                None => format!("1:1 ({topic})"),
            },
            "group" => format!("Group: {topic} ({} members)", members.len()),
            _ => format!("{}: {topic}", self.chat_type_or_unknown()),
        }
    }

    /// Label used for the chat's attachment directory
    pub fn folder_label(&self) -> String {
        match self.topic.as_deref().map(str::trim) {
            Some(topic) if !topic.is_empty() => topic.to_string(),
            _ if self.id.is_empty() => "chat_unknown".to_string(),
            _ => format!("chat_{}", self.id),
        }
    }
}

/// Message body
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    /// `html` or `text`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Body markup
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

/// Structured attachment of a message
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAttachment {
    /// Attachment ID
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// `reference` for files, `messageReference`, card types, ...
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: String,
    /// Location of the file for `reference` attachments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// File name shown in the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fields not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chat message
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message ID
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Creation timestamp as sent by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<String>,
    /// Body
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: ItemBody,
    /// Structured attachments
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<ChatAttachment>,
    /// Chat the message was exported from (added by the exporter)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_info: Option<Chat>,
    /// Origin marker added by the exporter (`private_chat`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Fields not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
