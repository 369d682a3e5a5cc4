//! Table layout and row-level statements for the `Node` table.

use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::primitives::backend::{Backend, Row, Value};
use crate::storage::record::Record;
use crate::storage::transform::{NodeRow, TableTransformer};
use crate::types::RowId;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS Node (
    key TEXT NOT NULL,
    identifier TEXT NOT NULL,
    parent INTEGER NOT NULL,
    data BLOB
)";
const CREATE_PARENT_INDEX: &str = "CREATE INDEX IF NOT EXISTS parent_index ON Node (parent)";
const PRUNE_ORPHANS: &str =
    "DELETE FROM Node WHERE parent != 0 AND parent NOT IN (SELECT rowid FROM Node)";
const SELECT_ROWS: &str = "SELECT key, identifier, parent, rowid, data FROM Node ORDER BY rowid";
const INSERT_ROW: &str = "INSERT INTO Node (key, identifier, parent, data) VALUES (?1, ?2, ?3, ?4)";
const UPDATE_ROW: &str = "UPDATE Node SET data = ?1 WHERE rowid = ?2";
const DELETE_ROW: &str = "DELETE FROM Node WHERE rowid = ?1";

/// Creates the table and its parent index if absent.
pub fn initialize<B: Backend>(backend: &mut B) -> Result<()> {
    backend.execute(CREATE_TABLE, &[])?;
    backend.execute(CREATE_PARENT_INDEX, &[])?;
    Ok(())
}

/// Deletes rows whose parent row no longer exists, repeating until the
/// table is closed under the parent relation. Returns the rows removed.
pub fn prune_orphans<B: Backend>(backend: &mut B) -> Result<usize> {
    let mut total = 0;
    loop {
        let removed = backend.execute(PRUNE_ORPHANS, &[])?;
        if removed == 0 {
            break;
        }
        total += removed;
    }
    if total > 0 {
        info!(rows = total, "schema.prune_orphans");
    }
    Ok(total)
}

/// Reads every row ordered by row id.
pub fn read_rows<B: Backend>(backend: &mut B) -> Result<Vec<NodeRow>> {
    backend
        .query(SELECT_ROWS, &[])?
        .into_iter()
        .map(decode_row)
        .collect()
}

/// Bootstraps the schema, prunes orphans and rebuilds the stored tree.
pub fn load<B: Backend>(backend: &mut B) -> Result<Option<Record>> {
    initialize(backend)?;
    prune_orphans(backend)?;
    let rows = read_rows(backend)?;
    let count = rows.len();
    let root = TableTransformer::new(rows).root()?;
    debug!(rows = count, "schema.load");
    Ok(root)
}

/// Inserts a row and returns its new row id.
pub fn insert_row<B: Backend>(backend: &mut B, record: &Record, parent: RowId) -> Result<RowId> {
    backend.execute(
        INSERT_ROW,
        &[
            Value::Text(record.key().to_string()),
            Value::Text(record.identifier().to_string()),
            Value::Integer(parent.0),
            Value::Blob(record.data().to_vec()),
        ],
    )?;
    backend.last_inserted_id()
}

/// Overwrites the payload of an existing row.
pub fn update_row<B: Backend>(backend: &mut B, rowid: RowId, data: &[u8]) -> Result<()> {
    let changed = backend.execute(UPDATE_ROW, &[Value::Blob(data.to_vec()), Value::Integer(rowid.0)])?;
    expect_one(changed, rowid)
}

/// Deletes one row.
pub fn delete_row<B: Backend>(backend: &mut B, rowid: RowId) -> Result<()> {
    let changed = backend.execute(DELETE_ROW, &[Value::Integer(rowid.0)])?;
    expect_one(changed, rowid)
}

fn expect_one(changed: usize, rowid: RowId) -> Result<()> {
    if changed == 1 {
        Ok(())
    } else {
        Err(StoreError::structure(format!(
            "row {rowid} changed {changed} rows"
        )))
    }
}

fn decode_row(row: Row) -> Result<NodeRow> {
    let mut columns = row.into_iter();
    let mut next = || {
        columns
            .next()
            .ok_or_else(|| StoreError::structure("short row"))
    };
    let key = text(next()?)?;
    let identifier = text(next()?)?;
    let parent = integer(next()?)?;
    let rowid = integer(next()?)?;
    let data = match next()? {
        Value::Blob(bytes) => bytes,
        Value::Null => Vec::new(),
        Value::Text(text) => text.into_bytes(),
        other => {
            return Err(StoreError::structure(format!(
                "unexpected data column {other:?}"
            )))
        }
    };
    Ok(NodeRow {
        key,
        identifier,
        parent: RowId(parent),
        rowid: RowId(rowid),
        data,
    })
}

fn text(value: Value) -> Result<String> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(StoreError::structure(format!("expected text, got {other:?}"))),
    }
}

fn integer(value: Value) -> Result<i64> {
    match value {
        Value::Integer(n) => Ok(n),
        other => Err(StoreError::structure(format!(
            "expected integer, got {other:?}"
        ))),
    }
}
