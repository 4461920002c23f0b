//! Connection test, chat listing and message paging.

use crate::client::{Collected, QueryParams};
use crate::config::PAGE_SIZE;
use crate::error::Result;
use crate::model::{Chat, ChatMessage, UserProfile};
use crate::types::Event;
use tracing::{info, warn};

use super::ChatExporter;

/// `sourceType` written into every exported message
pub const PRIVATE_CHAT_SOURCE: &str = "private_chat";

fn params(pairs: &[(&str, &str)]) -> QueryParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl ChatExporter {
    /// Fetch the signed-in user's profile
    ///
    /// Fails with the request error when the token is not accepted, which
    /// makes this the cheapest way to check credentials before an export.
    pub async fn test_connection(&self) -> Result<UserProfile> {
        let url = self.config.graph.url("me");
        let profile: UserProfile = self.executor.get_json(&url, None).await?;

        info!(
            display_name = %profile.display_name,
            user_principal_name = %profile.user_principal_name,
            "Connected"
        );
        self.emit_event(Event::Connected {
            display_name: profile.display_name.clone(),
            user_principal_name: profile.user_principal_name.clone(),
        });
        *self.me.write().await = Some(profile.clone());
        Ok(profile)
    }

    /// List the user's chats with their members
    ///
    /// A listing that fails after some pages keeps the chats fetched so far;
    /// it only fails when nothing was fetched or the error is fatal.
    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let url = self.config.graph.url("me/chats");
        let page_size = PAGE_SIZE.to_string();
        let query = params(&[("$expand", "members"), ("$top", page_size.as_str())]);

        let collected: Collected<Chat> = self
            .executor
            .collect_all(&url, Some(query), self.config.export.page_delay)
            .await;

        match collected.error {
            Some(e) if e.is_fatal() || collected.items.is_empty() => Err(e),
            Some(e) => {
                warn!(
                    chats = collected.items.len(),
                    error = %e,
                    "Chat listing incomplete, continuing with the chats fetched"
                );
                Ok(collected.items)
            }
            None => {
                info!(chats = collected.items.len(), "Chats listed");
                Ok(collected.items)
            }
        }
    }

    /// Fetch every message of `chat`, newest first
    ///
    /// Each message is annotated with the chat it came from and
    /// `sourceType = "private_chat"`. A failure part-way is returned in
    /// [`Collected::error`] next to the messages fetched before it.
    pub async fn fetch_messages(&self, chat: &Chat) -> Collected<ChatMessage> {
        let url = self
            .config
            .graph
            .url(&format!("me/chats/{}/messages", chat.id));
        let page_size = PAGE_SIZE.to_string();
        let query = params(&[("$top", page_size.as_str()), ("$orderby", "createdDateTime desc")]);

        let mut collected: Collected<ChatMessage> = self
            .executor
            .collect_all(&url, Some(query), self.config.export.page_delay)
            .await;

        for message in &mut collected.items {
            message.chat_info = Some(chat.clone());
            message.source_type = Some(PRIVATE_CHAT_SOURCE.to_string());
        }
        collected
    }

    /// Display name of the signed-in user, once [`test_connection`](Self::test_connection) ran
    pub(crate) async fn my_display_name(&self) -> Option<String> {
        self.me
            .read()
            .await
            .as_ref()
            .map(|profile| profile.display_name.clone())
    }
}
