//! Event and file assertions for integration tests

use graph_chat_export::Event;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Collect events until `stop_predicate` matches, the channel closes or `timeout` passes
pub async fn collect_events_until<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Events already buffered in the channel
pub fn drain_events(events: &mut Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

/// Assert that every file in `expected_files` exists in `dir`
pub fn assert_files_exist(dir: &Path, expected_files: &[&str]) {
    for file in expected_files {
        let path = dir.join(file);
        assert!(path.exists(), "Expected file not found: {}", path.display());
    }
}

/// Assert that no `.part` temp files were left behind in `dir`
pub fn assert_no_partial_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        assert!(!name.ends_with(".part"), "Partial file left behind: {name}");
    }
}

/// Names of all regular files in `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
