#[path = "support/mod.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use canopy::{
    Dispatch, GraphStore, ManualDispatcher, Record, StoreOptions, UpdateMode, UpdateStatus,
};
use proptest::prelude::*;
use tempfile::tempdir;

use support::FaultyBackend;

#[derive(Debug, Clone)]
enum Edit {
    SetWindow(usize, Vec<u8>),
    SetTab(usize, usize, Vec<u8>),
    RemoveWindow(usize),
    RemoveTab(usize, usize),
    AddWindow(u8),
    AddTab(usize, u8),
}

fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 0..3)
}

fn arb_tree() -> impl Strategy<Value = Record> {
    let window = (payload(), prop::collection::vec(payload(), 0..4));
    (payload(), prop::collection::vec(window, 0..5)).prop_map(|(data, windows)| {
        let mut root = Record::root().with_data(data);
        for (w, (data, tabs)) in windows.into_iter().enumerate() {
            let mut window = Record::new("window", format!("w{w}")).with_data(data);
            for (t, data) in tabs.into_iter().enumerate() {
                window = window.with_child(Record::new("tab", format!("t{t}")).with_data(data));
            }
            root = root.with_child(window);
        }
        root
    })
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0usize..8, payload()).prop_map(|(w, d)| Edit::SetWindow(w, d)),
        (0usize..8, 0usize..8, payload()).prop_map(|(w, t, d)| Edit::SetTab(w, t, d)),
        (0usize..8).prop_map(Edit::RemoveWindow),
        (0usize..8, 0usize..8).prop_map(|(w, t)| Edit::RemoveTab(w, t)),
        (0u8..4).prop_map(Edit::AddWindow),
        (0usize..8, 0u8..4).prop_map(|(w, id)| Edit::AddTab(w, id)),
    ]
}

fn nth_id(record: &Record, index: usize) -> Option<String> {
    let children = record.children();
    if children.is_empty() {
        None
    } else {
        Some(children[index % children.len()].identifier().to_string())
    }
}

fn apply(root: &mut Record, edit: &Edit) {
    match edit {
        Edit::SetWindow(w, data) => {
            if let Some(id) = nth_id(root, *w) {
                if let Some(window) = root.child_mut("window", &id) {
                    window.replace_data(data.clone());
                }
            }
        }
        Edit::SetTab(w, t, data) => {
            let Some(wid) = nth_id(root, *w) else { return };
            let Some(window) = root.child_mut("window", &wid) else { return };
            if let Some(tid) = nth_id(window, *t) {
                if let Some(tab) = window.child_mut("tab", &tid) {
                    tab.replace_data(data.clone());
                }
            }
        }
        Edit::RemoveWindow(w) => {
            if let Some(id) = nth_id(root, *w) {
                root.remove_child("window", &id);
            }
        }
        Edit::RemoveTab(w, t) => {
            let Some(wid) = nth_id(root, *w) else { return };
            let Some(window) = root.child_mut("window", &wid) else { return };
            if let Some(tid) = nth_id(window, *t) {
                window.remove_child("tab", &tid);
            }
        }
        Edit::AddWindow(id) => {
            root.upsert_child("window", &format!("x{id}"))
                .replace_data(vec![*id]);
        }
        Edit::AddTab(w, id) => {
            let Some(wid) = nth_id(root, *w) else { return };
            if let Some(window) = root.child_mut("window", &wid) {
                window
                    .upsert_child("tab", &format!("x{id}"))
                    .replace_data(vec![*id]);
            }
        }
    }
}

fn flatten(record: &Record) -> BTreeMap<String, Vec<u8>> {
    let mut nodes = BTreeMap::new();
    let mut path = Vec::new();
    record.walk(&mut |node, depth| {
        path.truncate(depth);
        path.push(format!("{}:{}", node.key(), node.identifier()));
        nodes.insert(path.join("/"), node.data().to_vec());
    });
    nodes
}

/// (inserted, updated, deleted) between two flattened trees.
fn expected_writes(
    before: &BTreeMap<String, Vec<u8>>,
    after: &BTreeMap<String, Vec<u8>>,
) -> (usize, usize, usize) {
    let inserted = after.keys().filter(|k| !before.contains_key(*k)).count();
    let deleted = before.keys().filter(|k| !after.contains_key(*k)).count();
    let updated = after
        .iter()
        .filter(|(k, data)| before.get(*k).is_some_and(|old| old != *data))
        .count();
    (inserted, updated, deleted)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_save_writes_only_changed_nodes(
        initial in arb_tree(),
        edits in prop::collection::vec(arb_edit(), 0..12),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("minimal.db");
        let (backend, faults) = FaultyBackend::new(&path);
        let store = GraphStore::with_backend(
            backend,
            StoreOptions::ephemeral(),
            Arc::new(ManualDispatcher::new()) as Arc<dyn Dispatch>,
        )
        .unwrap();

        let seed = initial.clone();
        let status = store.update(UpdateMode::Sync, move |e| e.replace_record(seed), None);
        prop_assert_eq!(status, UpdateStatus::Accepted);
        prop_assert_eq!(faults.inserts.load(Ordering::SeqCst), initial.node_count());

        let mut edited = (*store.record().unwrap()).clone();
        for edit in &edits {
            apply(&mut edited, edit);
        }
        let (inserted, updated, deleted) = expected_writes(&flatten(&initial), &flatten(&edited));

        faults.reset_counts();
        let replay = edits.clone();
        let status = store.update(
            UpdateMode::Sync,
            move |e| {
                for edit in &replay {
                    apply(e.record_mut(), edit);
                }
            },
            None,
        );
        prop_assert_eq!(status, UpdateStatus::Accepted);
        prop_assert_eq!(faults.inserts.load(Ordering::SeqCst), inserted);
        prop_assert_eq!(faults.updates.load(Ordering::SeqCst), updated);
        prop_assert_eq!(faults.deletes.load(Ordering::SeqCst), deleted);
        prop_assert!(store.is_valid());
        drop(store);

        let reopened = GraphStore::open(&path, StoreOptions::ephemeral()).unwrap();
        reopened.flush();
        let loaded = reopened.record().unwrap();
        prop_assert!(loaded.content_eq(&edited), "loaded {} expected {}", loaded, edited);
    }
}
