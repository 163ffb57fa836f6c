//! Custom assertions for flat files, spill directories and events

use std::path::Path;
use std::time::Duration;

use flatfile_dl::{Event, NodeData, codec};
use tokio::sync::broadcast;

/// Read every node of a flat file (plain or `.zst`)
pub fn read_flat_file(path: &Path) -> Vec<NodeData> {
    codec::open_file(path)
        .expect("open flat file")
        .collect::<Result<Vec<_>, _>>()
        .expect("decode flat file")
}

/// Paths of every node in a flat file
pub fn read_paths(path: &Path) -> Vec<String> {
    read_flat_file(path)
        .iter()
        .map(NodeData::path_string)
        .collect()
}

/// Single value of property `name`
pub fn property<'a>(node: &'a NodeData, name: &str) -> Option<&'a str> {
    node.properties
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| p.values().first())
        .and_then(|v| v.as_deref())
}

/// Assert nodes are in strictly increasing path order
pub fn assert_strictly_ordered(nodes: &[NodeData]) {
    for pair in nodes.windows(2) {
        assert!(
            pair[0].path < pair[1].path,
            "{} is not before {}",
            pair[0].path_string(),
            pair[1].path_string()
        );
    }
}

/// Assert no spill run file is left anywhere under `root`
pub fn assert_no_spill_files(root: &Path) {
    let leftovers: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().display().to_string())
        .collect();
    assert!(leftovers.is_empty(), "spill files left behind: {leftovers:?}");

    let dirs = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .count();
    assert_eq!(dirs, 0, "spill directory left behind under {}", root.display());
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    result.ok().flatten()
}

/// Every event currently buffered
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
