use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, info};

use super::{Backend, Row, Value};
use crate::error::{Result, StoreError};
use crate::primitives::concurrency::FileLock;
use crate::types::RowId;

/// Value applied to `PRAGMA synchronous` when the connection opens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Synchronous {
    /// Sync on every commit.
    Full,
    /// Sync at WAL checkpoints only.
    Normal,
    /// Never sync (tests only).
    Off,
}

impl Synchronous {
    fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Full => "FULL",
            Synchronous::Normal => "NORMAL",
            Synchronous::Off => "OFF",
        }
    }
}

/// [`Backend`] over a single SQLite file in WAL mode.
///
/// The exclusive lock lives in a `<db>-lock` sidecar so it survives
/// [`Backend::unlink`], which removes the database and its WAL files.
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    synchronous: Synchronous,
    busy_timeout: Duration,
    read_only: bool,
    conn: Option<Connection>,
    lock: Option<FileLock>,
}

impl SqliteBackend {
    /// Creates a closed backend for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            synchronous: Synchronous::Full,
            busy_timeout: Duration::from_secs(5),
            read_only: false,
            conn: None,
            lock: None,
        }
    }

    /// Sets the durability mode used on the next open.
    pub fn with_synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Sets how long SQLite waits on a busy database.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Opens without write access and without touching the journal mode.
    ///
    /// The database must already exist; statements that write fail.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Path of the sidecar lock file.
    pub fn lock_path(&self) -> PathBuf {
        sidecar_path(&self.path, "-lock")
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }
}

impl Backend for SqliteBackend {
    fn location(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        if self.read_only {
            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(self.busy_timeout)?;
            debug!(db_path = %self.path.display(), "sqlite_backend.opened_read_only");
            self.conn = Some(conn);
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", self.synchronous.pragma_value())?;
        debug!(
            db_path = %self.path.display(),
            journal_mode = %mode,
            synchronous = ?self.synchronous,
            "sqlite_backend.opened"
        );
        self.conn = Some(conn);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_conn, err)) = conn.close() {
                debug!(error = %err, "sqlite_backend.close_failed");
            }
        }
    }

    fn lock(&mut self) -> Result<()> {
        if self.lock.is_none() {
            self.lock = Some(FileLock::acquire(self.lock_path())?);
        }
        Ok(())
    }

    fn unlock(&mut self) {
        self.lock = None;
    }

    fn unlink(&mut self) -> Result<()> {
        self.close();
        for path in [
            self.path.clone(),
            sidecar_path(&self.path, "-wal"),
            sidecar_path(&self.path, "-shm"),
        ] {
            remove_if_exists(&path)?;
        }
        info!(db_path = %self.path.display(), "sqlite_backend.unlinked");
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        Ok(self.conn()?.execute(sql, params_from_iter(params))?)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns)
                .map(|idx| row.get::<_, Value>(idx))
                .collect::<rusqlite::Result<Row>>()?;
            out.push(values);
        }
        Ok(out)
    }

    fn last_inserted_id(&self) -> Result<RowId> {
        Ok(RowId(self.conn()?.last_insert_rowid()))
    }

    fn begin(&mut self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("canopy"));
    name.push(suffix);
    let mut output = path.to_path_buf();
    output.set_file_name(name);
    output
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
