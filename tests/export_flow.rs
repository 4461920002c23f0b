//! End-to-end export runs against a mock Graph API
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test export_flow
//! ```

mod common;

use common::{
    assert_files_exist, assert_no_partial_files, chat, collect_events_until, create_mock_exporter,
    drain_events, file_names, html_message, mock_config, mount_chat_list, mount_file,
    mount_messages, mount_profile, page, reference_message, static_tokens,
};
use graph_chat_export::auth::{CachedTokenProvider, FileTokenSource};
use graph_chat_export::resolver::encode_sharing_url;
use graph_chat_export::{ChatExporter, Event, SourceKind, list_available_exports};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Traversal
// ============================================================================

#[tokio::test]
async fn test_paginated_messages_are_exported_across_chats() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_profile(&server).await;
    mount_chat_list(
        &server,
        json!([
            chat("c1", "group", Some("Launch"), &["Ana Lima", "Bruno"]),
            chat("c2", "oneOnOne", None, &["Ana Lima", "Carla"]),
        ]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/me/chats/c1/messages"))
        .and(query_param_is_missing("$skiptoken"))
        .and(query_param("$top", "50"))
        .and(query_param("$orderby", "createdDateTime desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            json!([html_message("m3", "<p>three</p>"), html_message("m2", "<p>two</p>")]),
            Some(&format!("{base}/me/chats/c1/messages?$skiptoken=page2")),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/chats/c1/messages"))
        .and(query_param("$skiptoken", "page2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(json!([html_message("m1", "<p>one</p>")]), None)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_messages(&server, "c2", json!([html_message("m9", "<p>hey</p>")])).await;

    let (exporter, _temp_dir) = create_mock_exporter(&base);
    let summary = exporter.export_all().await.unwrap();

    assert_eq!(summary.chats_exported, 2);
    assert_eq!(summary.chats_failed, 0);
    assert_eq!(summary.messages, 4);
    assert_eq!(summary.messages_by_chat_type.get("group"), Some(&3));
    assert_eq!(summary.messages_by_chat_type.get("oneOnOne"), Some(&1));

    let exported: Vec<Value> =
        serde_json::from_slice(&std::fs::read(summary.export_file.unwrap()).unwrap()).unwrap();
    let ids: Vec<&str> = exported.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["m3", "m2", "m1", "m9"]);
    assert_eq!(exported[3]["chatInfo"]["chatType"], "oneOnOne");
    assert_eq!(exported[0]["from"]["user"]["displayName"], "Bruno");
}

#[tokio::test]
async fn test_progress_events_follow_the_run() {
    let server = MockServer::start().await;
    mount_profile(&server).await;
    mount_chat_list(
        &server,
        json!([
            chat("c1", "group", Some("Launch"), &["Ana Lima"]),
            chat("c2", "group", Some("Retro"), &["Ana Lima"]),
        ]),
    )
    .await;
    mount_messages(&server, "c1", json!([html_message("m1", "<p>a</p>")])).await;
    mount_messages(&server, "c2", json!([html_message("m2", "<p>b</p>")])).await;

    let (exporter, _temp_dir) = create_mock_exporter(&server.uri());
    let mut events = exporter.subscribe();

    let (result, events) = tokio::join!(
        exporter.export_all(),
        collect_events_until(&mut events, Duration::from_secs(10), |e| {
            matches!(e, Event::ExportComplete { .. })
        })
    );
    result.unwrap();

    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            Event::Connected { .. } => "connected",
            Event::ChatsListed { .. } => "listed",
            Event::ChatStarted { .. } => "started",
            Event::MessagesFetched { .. } => "fetched",
            Event::ChatFinished { .. } => "finished",
            Event::ExportComplete { .. } => "complete",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        [
            "connected", "listed", "started", "fetched", "finished", "started", "fetched",
            "finished", "complete"
        ]
    );

    match &events[0] {
        Event::Connected { display_name, .. } => assert_eq!(display_name, "Ana Lima"),
        other => panic!("unexpected first event: {other:?}"),
    }
    let running_totals: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::MessagesFetched { running_total, .. } => Some(*running_total),
            _ => None,
        })
        .collect();
    assert_eq!(running_totals, [1, 2]);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_rate_limit_and_expired_token_are_recovered() {
    let server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let token_file = temp_dir.path().join("token.txt");
    std::fs::write(&token_file, "old-token\n").unwrap();

    mount_profile(&server).await;
    Mock::given(method("GET"))
        .and(path("/me/chats"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/chats"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            json!([chat("c1", "group", Some("Launch"), &["Ana Lima"])]),
            None,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/chats/c1/messages"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_messages(&server, "c1", json!([html_message("m1", "<p>hi</p>")])).await;

    let config = mock_config(&server.uri(), &temp_dir);
    let tokens = Arc::new(CachedTokenProvider::new(FileTokenSource::new(&token_file)));
    let exporter = ChatExporter::new(config, tokens).unwrap();

    // The first token is cached by the connection check, then rotated on disk
    exporter.test_connection().await.unwrap();
    std::fs::write(&token_file, "new-token\n").unwrap();

    let summary = exporter.export_all().await.unwrap();

    assert_eq!(summary.chats_exported, 1);
    assert_eq!(summary.messages, 1);
    assert_eq!(summary.token_refreshes, 1);
    assert_eq!(summary.rate_limit_waits, 1);
}

// ============================================================================
// Attachments
// ============================================================================

#[tokio::test]
async fn test_document_library_reference_is_fetched_through_sharing_link() {
    let server = MockServer::start().await;
    let base = server.uri();
    let shared_url = format!("{base}/personal/ana_contoso_com/Documents/Shared/plan.docx");

    mount_profile(&server).await;
    mount_chat_list(&server, json!([chat("c1", "group", Some("Launch"), &["Ana Lima"])])).await;
    mount_messages(
        &server,
        "c1",
        json!([
            reference_message("m1", &shared_url, "plan.docx"),
            html_message(
                "m2",
                &format!(r#"<img src="{base}/chats/c1/messages/m2/hostedContents/h1/$value" itemid="pic">"#)
            ),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/shares/{}/driveItem/content",
            encode_sharing_url(&shared_url)
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04plan".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/personal/ana_contoso_com/Documents/Shared/plan.docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"wrong".to_vec()))
        .expect(0)
        .mount(&server)
        .await;
    mount_file(&server, "/chats/c1/messages/m2/hostedContents/h1/$value", &[0xFF, 0xD8]).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = mock_config(&base, &temp_dir);
    config.resolver.document_library_hosts = vec!["127.0.0.1".to_string()];
    let exporter = ChatExporter::new(config, static_tokens("test-token")).unwrap();
    let mut events = exporter.subscribe();

    let summary = exporter.export_all().await.unwrap();
    assert_eq!(summary.attachments.saved, 2);
    assert_eq!(summary.attachments.failed, 0);

    let chat_dir = temp_dir.path().join("exports").join("attachments").join("Launch");
    assert_files_exist(&chat_dir, &["plan.docx", "image_pic.jpg"]);
    assert_no_partial_files(&chat_dir);
    assert_eq!(std::fs::read(chat_dir.join("plan.docx")).unwrap(), b"PK\x03\x04plan");

    let kinds: Vec<SourceKind> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::AttachmentSaved { source_kind, .. } => Some(source_kind),
            _ => None,
        })
        .collect();
    assert!(kinds.contains(&SourceKind::StructuredAttachment));
    assert!(kinds.contains(&SourceKind::HostedInlineImage));
}

#[tokio::test]
async fn test_attachments_can_be_fetched_from_an_earlier_export() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_profile(&server).await;
    mount_chat_list(&server, json!([chat("c1", "oneOnOne", None, &["Ana Lima", "Carla"])])).await;
    mount_messages(
        &server,
        "c1",
        json!([
            html_message("m1", &format!(r#"<a href="{base}/files/notes.txt">notes</a>"#)),
            html_message("m2", &format!(r#"see {base}/files/agenda.pdf, thanks"#)),
        ]),
    )
    .await;
    mount_file(&server, "/files/notes.txt", b"notes").await;
    mount_file(&server, "/files/agenda.pdf", b"%PDF-1.7").await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = mock_config(&base, &temp_dir);
    config.export.download_attachments = false;
    let exporter = ChatExporter::new(config.clone(), static_tokens("test-token")).unwrap();
    let summary = exporter.export_all().await.unwrap();
    assert_eq!(summary.attachments.saved, 0);

    let available = list_available_exports(&config.export.output_dir).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(Some(&available[0]), summary.export_file.as_ref());

    config.export.download_attachments = true;
    let exporter = ChatExporter::new(config.clone(), static_tokens("test-token")).unwrap();
    let tally = exporter.download_from_export(&available[0]).await.unwrap();
    assert_eq!(tally.saved, 2);
    assert_eq!(tally.failed, 0);

    let chat_dir = config.export.attachments_dir().join("chat_c1");
    assert_eq!(file_names(&chat_dir), ["agenda.pdf", "notes.txt"]);
}

#[tokio::test]
async fn test_missing_export_directory_lists_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let exports = list_available_exports(&temp_dir.path().join("nope")).await.unwrap();
    assert!(exports.is_empty());
}
