use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::types::{Generation, RowId};

/// One node of the persisted tree.
///
/// A record owns its children, so parentage is structural: the parent row id
/// written to storage is derived from the enclosing record while saving.
/// `storage_id` stays `None` until the backend assigns a row on first insert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Record {
    key: String,
    identifier: String,
    #[serde(serialize_with = "serialize_hex")]
    data: Vec<u8>,
    generation: Generation,
    storage_id: Option<RowId>,
    children: Vec<Record>,
}

fn serialize_hex<S: serde::Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(data))
}

impl Record {
    /// Deepest tree the store loads or saves.
    ///
    /// Diffing, cloning and comparing recurse once per level, so deeper
    /// trees are refused instead of risking the worker's stack.
    pub const MAX_DEPTH: usize = 512;

    /// Creates an empty record with the given key and identifier.
    pub fn new(key: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            identifier: identifier.into(),
            data: Vec::new(),
            generation: Generation::Unknown,
            storage_id: None,
            children: Vec::new(),
        }
    }

    /// Creates the conventional root record (empty key and identifier).
    pub fn root() -> Self {
        Self::new("", "")
    }

    /// Builder-style payload setter.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Builder-style generation setter.
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Record) -> Self {
        self.children.push(child);
        self
    }

    pub(crate) fn from_row(key: String, identifier: String, data: Vec<u8>, rowid: RowId) -> Self {
        Self {
            key,
            identifier,
            data,
            generation: Generation::Unknown,
            storage_id: Some(rowid),
            children: Vec::new(),
        }
    }

    /// Semantic name of this field.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Disambiguates siblings sharing a key.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Opaque payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Change-tracking tag.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Backend row id, once persisted.
    pub fn storage_id(&self) -> Option<RowId> {
        self.storage_id
    }

    /// Child records in insertion order.
    pub fn children(&self) -> &[Record] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Record> {
        &mut self.children
    }

    pub(crate) fn set_storage_id(&mut self, rowid: Option<RowId>) {
        self.storage_id = rowid;
    }

    /// Returns true when this record has the given key and identifier.
    pub fn matches(&self, key: &str, identifier: &str) -> bool {
        self.key == key && self.identifier == identifier
    }

    /// Replaces the payload and records the caller's generation for it.
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>, generation: Generation) {
        self.data = data.into();
        self.generation = generation;
    }

    /// Replaces the payload and advances the generation.
    pub fn replace_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
        self.bump_generation();
    }

    /// Advances the generation so the next save compares this record.
    pub fn bump_generation(&mut self) {
        self.generation = self.generation.next();
    }

    /// Overrides the generation tag.
    pub fn set_generation(&mut self, generation: Generation) {
        self.generation = generation;
    }

    /// First child with the given key and identifier.
    pub fn child(&self, key: &str, identifier: &str) -> Option<&Record> {
        self.children.iter().find(|c| c.matches(key, identifier))
    }

    /// Mutable access to the first child with the given key and identifier.
    pub fn child_mut(&mut self, key: &str, identifier: &str) -> Option<&mut Record> {
        self.children.iter_mut().find(|c| c.matches(key, identifier))
    }

    /// Returns the matching child, creating an empty one if absent.
    pub fn upsert_child(&mut self, key: &str, identifier: &str) -> &mut Record {
        let idx = match self.children.iter().position(|c| c.matches(key, identifier)) {
            Some(idx) => idx,
            None => {
                self.children.push(Record::new(key, identifier));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    /// Appends a child, even if a sibling with the same key exists.
    pub fn push_child(&mut self, child: Record) -> &mut Record {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Detaches and returns the first matching child with its subtree.
    pub fn remove_child(&mut self, key: &str, identifier: &str) -> Option<Record> {
        let idx = self.children.iter().position(|c| c.matches(key, identifier))?;
        Some(self.children.remove(idx))
    }

    /// Keeps only the children for which `keep` returns true.
    pub fn retain_children(&mut self, keep: impl FnMut(&Record) -> bool) {
        self.children.retain(keep);
    }

    /// Follows a path of `(key, identifier)` pairs from this record.
    pub fn find(&self, path: &[(&str, &str)]) -> Option<&Record> {
        path.iter()
            .try_fold(self, |node, (key, identifier)| node.child(key, identifier))
    }

    /// Number of records in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Record::node_count).sum::<usize>()
    }

    /// Number of levels in this subtree; a lone record has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1usize)];
        while let Some((record, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            pending.extend(record.children.iter().map(|child| (child, depth + 1)));
        }
        deepest
    }

    /// Visits the subtree in pre-order together with each record's depth.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Record, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a>(&'a self, depth: usize, visit: &mut impl FnMut(&'a Record, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visit);
        }
    }

    /// Clears every storage id in the subtree.
    pub fn erase_storage_ids(&mut self) {
        self.storage_id = None;
        for child in &mut self.children {
            child.erase_storage_ids();
        }
    }

    /// Clears the storage ids that appear in `ids`, leaving the rest intact.
    pub(crate) fn erase_storage_ids_in(&mut self, ids: &HashSet<RowId>) {
        if self.storage_id.is_some_and(|id| ids.contains(&id)) {
            self.storage_id = None;
        }
        for child in &mut self.children {
            child.erase_storage_ids_in(ids);
        }
    }

    /// Structural equality ignoring storage ids, generations and sibling order.
    pub fn content_eq(&self, other: &Record) -> bool {
        if self.key != other.key
            || self.identifier != other.identifier
            || self.data != other.data
            || self.children.len() != other.children.len()
        {
            return false;
        }
        let mut used = vec![false; other.children.len()];
        self.children.iter().all(|mine| {
            let hit = other
                .children
                .iter()
                .enumerate()
                .position(|(idx, theirs)| !used[idx] && mine.content_eq(theirs));
            match hit {
                Some(idx) => {
                    used[idx] = true;
                    true
                }
                None => false,
            }
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = Ok(());
        self.walk(&mut |record, depth| {
            if result.is_err() {
                return;
            }
            let rowid = record
                .storage_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".into());
            result = writeln!(
                f,
                "{:indent$}{}[{}] #{} ({} bytes)",
                "",
                record.key,
                record.identifier,
                rowid,
                record.data.len(),
                indent = depth * 2
            );
        });
        result
    }
}
