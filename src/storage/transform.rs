use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::storage::record::Record;
use crate::types::RowId;

/// Flat row as read from the `Node` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRow {
    /// Record key.
    pub key: String,
    /// Record identifier.
    pub identifier: String,
    /// Row id of the parent, or [`RowId::ROOT_PARENT`].
    pub parent: RowId,
    /// Row id of this row.
    pub rowid: RowId,
    /// Payload; NULL columns are read as empty.
    pub data: Vec<u8>,
}

/// Rebuilds a [`Record`] tree from the rows of the `Node` table.
///
/// Exactly one row must have the root parent and every other row must be
/// reachable from it. Children are ordered by row id.
#[derive(Debug)]
pub struct TableTransformer {
    rows: Vec<NodeRow>,
}

impl TableTransformer {
    /// Wraps a row set; order does not matter.
    pub fn new(mut rows: Vec<NodeRow>) -> Self {
        rows.sort_by_key(|row| row.rowid);
        Self { rows }
    }

    /// Row ids whose parent is neither the root sentinel nor a known row.
    pub fn orphans(&self) -> Vec<RowId> {
        let known: HashMap<RowId, usize> = self.index();
        self.rows
            .iter()
            .filter(|row| !row.parent.is_root_parent() && !known.contains_key(&row.parent))
            .map(|row| row.rowid)
            .collect()
    }

    fn index(&self) -> HashMap<RowId, usize> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.rowid, idx))
            .collect()
    }

    /// Builds the tree, `None` for an empty table.
    pub fn root(self) -> Result<Option<Record>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        let index = self.index();
        if index.len() != self.rows.len() {
            return Err(StoreError::structure("duplicate row ids"));
        }

        let mut root = None;
        let mut children: HashMap<RowId, Vec<usize>> = HashMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            if row.parent.is_root_parent() {
                if root.replace(idx).is_some() {
                    return Err(StoreError::structure("more than one root row"));
                }
                continue;
            }
            if !index.contains_key(&row.parent) {
                return Err(StoreError::structure(format!(
                    "row {} references missing parent {}",
                    row.rowid, row.parent
                )));
            }
            children.entry(row.parent).or_default().push(idx);
        }
        let Some(root) = root else {
            return Err(StoreError::structure("no root row"));
        };

        let order = preorder(root, &self.rows, &children)?;
        let total = self.rows.len();
        if order.len() != total {
            return Err(StoreError::structure(format!(
                "{} rows unreachable from the root",
                total - order.len()
            )));
        }
        let mut slots: Vec<Option<NodeRow>> = self.rows.into_iter().map(Some).collect();
        assemble(root, &order, &mut slots, &children).map(Some)
    }
}

/// Row indices reachable from `root`, parents before children.
fn preorder(
    root: usize,
    rows: &[NodeRow],
    children: &HashMap<RowId, Vec<usize>>,
) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(rows.len());
    let mut pending = vec![(root, 1usize)];
    while let Some((idx, depth)) = pending.pop() {
        if depth > Record::MAX_DEPTH {
            return Err(StoreError::structure(format!(
                "tree deeper than {} levels",
                Record::MAX_DEPTH
            )));
        }
        order.push(idx);
        if let Some(kids) = children.get(&rows[idx].rowid) {
            pending.extend(kids.iter().rev().map(|&child| (child, depth + 1)));
        }
    }
    Ok(order)
}

/// Builds records bottom-up so no level needs its own stack frame.
fn assemble(
    root: usize,
    order: &[usize],
    slots: &mut [Option<NodeRow>],
    children: &HashMap<RowId, Vec<usize>>,
) -> Result<Record> {
    let mut built: Vec<Option<Record>> = (0..slots.len()).map(|_| None).collect();
    for &idx in order.iter().rev() {
        let row = slots[idx]
            .take()
            .ok_or_else(|| StoreError::structure("row visited twice"))?;
        let rowid = row.rowid;
        let mut record = Record::from_row(row.key, row.identifier, row.data, rowid);
        for &child in children.get(&rowid).map(Vec::as_slice).unwrap_or(&[]) {
            let child = built[child]
                .take()
                .ok_or_else(|| StoreError::structure("child built out of order"))?;
            record.push_child(child);
        }
        built[idx] = Some(record);
    }
    built[root]
        .take()
        .ok_or_else(|| StoreError::structure("root row not built"))
}
