#[path = "support/mod.rs"]
mod support;

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;

use canopy::{
    GraphStore, Record, RowId, StoreError, StoreOptions, StoreState, UpdateMode, UpdateStatus,
};
use rusqlite::params;
use tempfile::tempdir;

use support::{init_tracing, row_count, sample_tree};

fn open(path: &std::path::Path) -> GraphStore {
    let store = GraphStore::open(path, StoreOptions::ephemeral()).expect("open store");
    store.flush();
    store
}

fn write(store: &GraphStore, mutate: impl FnOnce(&mut canopy::DeltaEncoder)) {
    let (tx, rx) = mpsc::channel();
    let status = store.update(
        UpdateMode::Sync,
        mutate,
        Some(Box::new(move |ok| {
            let _ = tx.send(ok);
        })),
    );
    assert_eq!(status, UpdateStatus::Accepted);
    let ok = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("completion delivered");
    assert!(ok, "save failed");
}

fn ids_by_path(record: &Record) -> HashMap<String, RowId> {
    let mut ids = HashMap::new();
    let mut path = Vec::new();
    record.walk(&mut |node, depth| {
        path.truncate(depth);
        path.push(format!("{}:{}", node.key(), node.identifier()));
        if let Some(id) = node.storage_id() {
            ids.insert(path.join("/"), id);
        }
    });
    ids
}

#[test]
fn tree_survives_reopen() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.db");
    {
        let store = open(&path);
        assert_eq!(store.state(), StoreState::Ready);
        assert!(store.record().is_none());
        write(&store, |e| e.replace_record(sample_tree()));
        assert_eq!(store.location(), path.as_path());
    }
    let store = open(&path);
    let loaded = store.record().expect("loaded tree");
    assert!(loaded.content_eq(&sample_tree()), "{loaded}");
    assert_eq!(row_count(&path), 5);
}

#[test]
fn orphan_rows_are_pruned_on_load() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("orphans.db");
    drop({
        let store = open(&path);
        write(&store, |e| e.replace_record(sample_tree()));
        store
    });

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO Node (key, identifier, parent, data) VALUES ('window', 'ghost', 9999, x'00')",
            [],
        )
        .unwrap();
        let ghost = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO Node (key, identifier, parent, data) VALUES ('tab', 'ghost', ?1, NULL)",
            params![ghost],
        )
        .unwrap();
    }
    assert_eq!(row_count(&path), 7);

    let store = open(&path);
    assert_eq!(store.state(), StoreState::Ready);
    assert!(store.record().expect("loaded").content_eq(&sample_tree()));
    assert_eq!(store.stats().load_failures, 0);
    drop(store);
    assert_eq!(row_count(&path), 5, "orphan chain removed from disk");
}

#[test]
fn storage_ids_are_stable() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("ids.db");
    let saved = {
        let store = open(&path);
        write(&store, |e| e.replace_record(sample_tree()));
        let before = ids_by_path(&store.record().expect("saved"));
        assert_eq!(before.len(), 5);

        write(&store, |e| {
            let root = e.record_mut();
            root.upsert_child("window", "1")
                .replace_data(b"bounds:5,5".to_vec());
            root.upsert_child("window", "3")
                .replace_data(b"bounds:20,20".to_vec());
        });
        let after = ids_by_path(&store.record().expect("saved"));
        for (path, id) in &before {
            assert_eq!(after.get(path), Some(id), "{path} moved");
        }
        after
    };
    let store = open(&path);
    assert_eq!(ids_by_path(&store.record().expect("loaded")), saved);
}

#[test]
fn deleting_a_subtree_removes_its_rows() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("delete.db");
    {
        let store = open(&path);
        write(&store, |e| e.replace_record(sample_tree()));
        write(&store, |e| {
            e.record_mut().remove_child("window", "2");
        });
        let stats = store.stats();
        assert_eq!(stats.rows_deleted, 3);
        assert_eq!(stats.rows_inserted, 5);
    }
    assert_eq!(row_count(&path), 2);
    let store = open(&path);
    let loaded = store.record().expect("loaded");
    assert!(loaded.child("window", "2").is_none());
    assert_eq!(loaded.node_count(), 2);
}

#[test]
fn corrupt_table_is_rebuilt_empty() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.db");
    drop(open(&path));
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        for name in ["a", "b"] {
            conn.execute(
                "INSERT INTO Node (key, identifier, parent, data) VALUES ('', ?1, 0, NULL)",
                params![name],
            )
            .unwrap();
        }
    }

    let store = open(&path);
    assert_eq!(store.state(), StoreState::Ready);
    assert!(store.record().is_none());
    let stats = store.stats();
    assert_eq!(stats.load_failures, 1);
    assert_eq!(stats.recoveries, 1);
    write(&store, |e| e.replace_record(sample_tree()));
    drop(store);
    assert_eq!(row_count(&path), 5);
}

#[test]
fn second_store_is_locked_out_until_invalidated() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let store = open(&path);
    match GraphStore::open(&path, StoreOptions::ephemeral()) {
        Err(StoreError::Locked(locked)) => assert!(locked.ends_with("locked.db-lock")),
        other => panic!("expected lock failure, got {other:?}"),
    }

    store.invalidate();
    store.flush();
    assert!(!store.is_valid());
    let reopened = open(&path);
    assert!(reopened.is_valid());
}

#[test]
fn when_ready_runs_on_the_callback_thread() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = GraphStore::open(dir.path().join("ready.db"), StoreOptions::ephemeral())
        .expect("open store");
    let (tx, rx) = mpsc::channel();
    for i in 0..3 {
        let tx = tx.clone();
        store.when_ready(move || {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send((i, name));
        });
    }
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv_timeout(Duration::from_secs(10)).expect("ready"));
    }
    let order: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, vec![0, 1, 2]);
    for (_, name) in seen {
        assert_eq!(name.as_deref(), Some("canopy-graph-store-callbacks"));
    }
}
