//! Graph response fixtures and mock mounting helpers

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Signed-in user returned by `/me`
pub fn profile() -> Value {
    json!({
        "id": "user-1",
        "displayName": "Ana Lima",
        "userPrincipalName": "ana@contoso.com"
    })
}

/// Chat resource with members expanded
pub fn chat(id: &str, chat_type: &str, topic: Option<&str>, members: &[&str]) -> Value {
    json!({
        "id": id,
        "topic": topic,
        "chatType": chat_type,
        "createdDateTime": "2024-01-10T09:00:00Z",
        "members": members
            .iter()
            .map(|name| json!({ "displayName": name }))
            .collect::<Vec<_>>()
    })
}

/// Message with an HTML body
pub fn html_message(id: &str, html: &str) -> Value {
    json!({
        "id": id,
        "messageType": "message",
        "createdDateTime": "2024-05-01T10:00:00Z",
        "from": { "user": { "displayName": "Bruno" } },
        "body": { "contentType": "html", "content": html },
        "attachments": []
    })
}

/// Message carrying a structured `reference` attachment
pub fn reference_message(id: &str, content_url: &str, name: &str) -> Value {
    json!({
        "id": id,
        "messageType": "message",
        "createdDateTime": "2024-05-01T11:00:00Z",
        "body": {
            "contentType": "html",
            "content": format!(r#"<attachment id="{id}-a"></attachment>"#)
        },
        "attachments": [{
            "id": format!("{id}-a"),
            "contentType": "reference",
            "contentUrl": content_url,
            "name": name
        }]
    })
}

/// One page of a collection; `next_link` is emitted as `@odata.nextLink`
pub fn page(items: Value, next_link: Option<&str>) -> Value {
    match next_link {
        Some(link) => json!({ "value": items, "@odata.nextLink": link }),
        None => json!({ "value": items }),
    }
}

/// Mount `/me` answering with [`profile`]
pub async fn mount_profile(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile()))
        .mount(server)
        .await;
}

/// Mount `/me/chats` answering with a single page
pub async fn mount_chat_list(server: &MockServer, chats: Value) {
    Mock::given(method("GET"))
        .and(path("/me/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(chats, None)))
        .mount(server)
        .await;
}

/// Mount a chat's message collection answering with a single page
pub async fn mount_messages(server: &MockServer, chat_id: &str, messages: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/me/chats/{chat_id}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(messages, None)))
        .mount(server)
        .await;
}

/// Mount a binary file at `file_path`
pub async fn mount_file(server: &MockServer, file_path: &str, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}
