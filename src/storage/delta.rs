use std::sync::Arc;

use crate::storage::record::Record;
use crate::types::RowId;

/// Working copy of the tree handed to update closures, paired with the
/// baseline it will be diffed against.
#[derive(Debug, Clone)]
pub struct DeltaEncoder {
    previous: Option<Arc<Record>>,
    record: Record,
}

/// Kind of change a [`DiffStep`] describes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiffKind {
    /// The record is new; it has no row yet.
    Insert,
    /// The record exists on both sides and may need a rewrite.
    Update,
    /// The record disappeared from the new tree.
    Delete,
}

/// One per-record difference between the baseline and the working tree.
///
/// `parent` is the row id the record hangs under: [`RowId::ROOT_PARENT`] for
/// the root, `None` when the parent has not been assigned a row (which only
/// happens if an insert step was not persisted by the visitor).
#[derive(Debug)]
pub struct DiffStep<'a> {
    /// Record in the baseline.
    pub before: Option<&'a Record>,
    /// Record in the working tree; the visitor may assign its storage id.
    pub after: Option<&'a mut Record>,
    /// Row id of the owning record.
    pub parent: Option<RowId>,
}

impl DiffStep<'_> {
    /// Classifies the step.
    pub fn kind(&self) -> DiffKind {
        match (&self.before, &self.after) {
            (Some(_), Some(_)) => DiffKind::Update,
            (None, Some(_)) => DiffKind::Insert,
            _ => DiffKind::Delete,
        }
    }
}

impl DeltaEncoder {
    /// Seeds the working tree with a copy of `previous`, or an empty root.
    pub fn new(previous: Option<Arc<Record>>) -> Self {
        let record = previous
            .as_deref()
            .cloned()
            .unwrap_or_else(Record::root);
        Self { previous, record }
    }

    /// Encoder that will insert `record` from scratch.
    pub fn fresh(mut record: Record) -> Self {
        record.erase_storage_ids();
        Self {
            previous: None,
            record,
        }
    }

    /// The working tree.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable access to the working tree.
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Replaces the working tree wholesale.
    pub fn replace_record(&mut self, record: Record) {
        self.record = record;
    }

    /// The baseline the working tree is diffed against.
    pub fn previous(&self) -> Option<&Arc<Record>> {
        self.previous.as_ref()
    }

    /// Points the encoder at a different baseline.
    pub(crate) fn rebase(&mut self, previous: Option<Arc<Record>>) {
        self.previous = previous;
    }

    /// Consumes the encoder and returns the working tree.
    pub fn into_record(self) -> Record {
        self.record
    }

    /// Walks baseline and working tree in lockstep and reports every record.
    ///
    /// Children are paired by `(key, identifier)`; siblings sharing both are
    /// paired in order. Insert and update steps are reported parent first so
    /// a visitor that assigns `after`'s storage id makes it available as the
    /// `parent` of the children that follow. Deleted subtrees are reported
    /// children first.
    ///
    /// The walk recurses once per level; the store only hands it trees
    /// within [`Record::MAX_DEPTH`].
    pub fn enumerate<E, F>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(DiffStep<'_>) -> Result<(), E>,
    {
        let previous = self.previous.as_deref();
        let root_parent = Some(RowId::ROOT_PARENT);
        match previous {
            Some(before) if before.matches(self.record.key(), self.record.identifier()) => {
                walk(Some(before), Some(&mut self.record), root_parent, &mut visit)
            }
            Some(before) => {
                walk(Some(before), None, root_parent, &mut visit)?;
                walk(None, Some(&mut self.record), root_parent, &mut visit)
            }
            None => walk(None, Some(&mut self.record), root_parent, &mut visit),
        }
    }
}

fn walk<E, F>(
    before: Option<&Record>,
    after: Option<&mut Record>,
    parent: Option<RowId>,
    visit: &mut F,
) -> Result<(), E>
where
    F: FnMut(DiffStep<'_>) -> Result<(), E>,
{
    match after {
        None => {
            let Some(before) = before else {
                return Ok(());
            };
            for child in before.children() {
                walk(Some(child), None, before.storage_id(), visit)?;
            }
            visit(DiffStep {
                before: Some(before),
                after: None,
                parent,
            })
        }
        Some(after) => {
            visit(DiffStep {
                before,
                after: Some(&mut *after),
                parent,
            })?;
            let own = after.storage_id();
            let previous_children: &[Record] = before.map(Record::children).unwrap_or(&[]);
            let mut paired = vec![false; previous_children.len()];
            for child in after.children_mut().iter_mut() {
                let counterpart = previous_children
                    .iter()
                    .enumerate()
                    .position(|(idx, old)| {
                        !paired[idx] && old.matches(child.key(), child.identifier())
                    });
                let old = counterpart.map(|idx| {
                    paired[idx] = true;
                    &previous_children[idx]
                });
                walk(old, Some(child), own, visit)?;
            }
            for (old, was_paired) in previous_children.iter().zip(paired) {
                if !was_paired {
                    walk(Some(old), None, own, visit)?;
                }
            }
            Ok(())
        }
    }
}
