use std::fs;
use std::sync::{Arc, Mutex};

use release_mirror::contract::StateStore;
use release_mirror::state::{GlobalState, JsonStateStore};
use tempfile::tempdir;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect the level of every emitted event.
struct LevelCollector {
    levels: Arc<Mutex<Vec<Level>>>,
}

impl<S> Layer<S> for LevelCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.levels.lock().unwrap().push(*event.metadata().level());
    }
}

#[test]
fn malformed_state_emits_exactly_one_warning() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("downloaded_assets.json");
    fs::write(&path, "not json at all").unwrap();

    let levels = Arc::new(Mutex::new(Vec::new()));
    let subscriber = Registry::default().with(LevelCollector {
        levels: levels.clone(),
    });

    let state = tracing::subscriber::with_default(subscriber, || {
        let store = JsonStateStore::open(&path).unwrap();
        store.load().unwrap()
    });

    assert!(state.is_empty());
    let warnings = levels
        .lock()
        .unwrap()
        .iter()
        .filter(|l| **l == Level::WARN)
        .count();
    assert_eq!(warnings, 1);
    assert!(dir.path().join("downloaded_assets.json.bak").exists());
}

#[test]
fn save_replaces_document_in_full() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/dir/state.json");
    let store = JsonStateStore::open(&path).unwrap();

    let mut first = GlobalState::default();
    first.target_mut("a").record(1, "one.zip");
    first.target_mut("b").record(2, "two.zip");
    store.save(&first).unwrap();

    let mut second = GlobalState::default();
    second.target_mut("a").record(1, "one.zip");
    store.save(&second).unwrap();

    assert_eq!(store.load().unwrap(), second);
    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "state.json" && name != "state.json.lock")
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {leftovers:?}");
}
