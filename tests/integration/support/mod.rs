#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use canopy::primitives::backend::{Row, Value};
use canopy::{Backend, Record, Result, RowId, SqliteBackend, StoreError, Synchronous};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("canopy=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

#[derive(Debug, Default)]
struct Plan {
    pass: usize,
    fail: usize,
}

/// Counters and armed failures shared between a test and its backend.
#[derive(Debug, Default)]
pub struct Faults {
    writes: Mutex<Plan>,
    open_failures: AtomicUsize,
    pub inserts: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub unlinks: AtomicUsize,
}

impl Faults {
    /// Lets `pass` row writes through, then fails the next `fail`.
    pub fn fail_writes(&self, pass: usize, fail: usize) {
        *self.writes.lock() = Plan { pass, fail };
    }

    /// Fails the next `count` opens.
    pub fn fail_opens(&self, count: usize) {
        self.open_failures.store(count, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.inserts.store(0, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }

    pub fn unlinks(&self) -> usize {
        self.unlinks.load(Ordering::SeqCst)
    }

    fn should_fail_write(&self) -> bool {
        let mut plan = self.writes.lock();
        if plan.pass > 0 {
            plan.pass -= 1;
            false
        } else if plan.fail > 0 {
            plan.fail -= 1;
            true
        } else {
            false
        }
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Io(io::Error::new(io::ErrorKind::Other, format!("injected {what} failure")))
}

/// SQLite backend that counts row writes and fails on demand.
#[derive(Debug)]
pub struct FaultyBackend {
    inner: SqliteBackend,
    faults: Arc<Faults>,
}

impl FaultyBackend {
    pub fn new(path: &Path) -> (Self, Arc<Faults>) {
        let faults = Arc::new(Faults::default());
        let backend = Self {
            inner: SqliteBackend::new(path).with_synchronous(Synchronous::Off),
            faults: Arc::clone(&faults),
        };
        (backend, faults)
    }

    fn row_counter(&self, sql: &str) -> Option<&AtomicUsize> {
        if sql.starts_with("INSERT") {
            Some(&self.faults.inserts)
        } else if sql.starts_with("UPDATE") {
            Some(&self.faults.updates)
        } else if sql.starts_with("DELETE") && sql.contains("rowid =") {
            Some(&self.faults.deletes)
        } else {
            None
        }
    }
}

impl Backend for FaultyBackend {
    fn location(&self) -> &Path {
        self.inner.location()
    }

    fn open(&mut self) -> Result<()> {
        let armed = self
            .faults
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(injected("open"));
        }
        self.inner.open()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn lock(&mut self) -> Result<()> {
        self.inner.lock()
    }

    fn unlock(&mut self) {
        self.inner.unlock();
    }

    fn unlink(&mut self) -> Result<()> {
        self.faults.unlinks.fetch_add(1, Ordering::SeqCst);
        self.inner.unlink()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        if let Some(counter) = self.row_counter(sql) {
            if self.faults.should_fail_write() {
                return Err(injected("write"));
            }
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.inner.query(sql, params)
    }

    fn last_inserted_id(&self) -> Result<RowId> {
        self.inner.last_inserted_id()
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }
}

pub fn sample_tree() -> Record {
    Record::root()
        .with_data(b"session".to_vec())
        .with_child(Record::new("window", "1").with_data(b"bounds:0,0".to_vec()))
        .with_child(
            Record::new("window", "2")
                .with_data(b"bounds:10,10".to_vec())
                .with_child(Record::new("tab", "a").with_data(b"https://a".to_vec()))
                .with_child(Record::new("tab", "b").with_data(b"https://b".to_vec())),
        )
}

/// Row count of the `Node` table, read with a separate connection.
pub fn row_count(path: &Path) -> i64 {
    let conn = rusqlite::Connection::open(path).expect("open sqlite");
    conn.query_row("SELECT COUNT(*) FROM Node", [], |row| row.get(0))
        .expect("count rows")
}
