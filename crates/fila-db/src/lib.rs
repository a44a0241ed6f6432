mod ops;
mod table_ops;
mod tables;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{io, ops as std_ops, result};

use fila_core::Timestamp;
use redb_bincode::{ReadTransaction, WriteTransaction};
use snafu::{Location, ResultExt as _, Snafu};
use tokio::task::JoinError;
use tracing::debug;

pub use self::tables::*;

const LOG_TARGET: &str = "fila::db";

/// Database schema version; bump on incompatible table changes.
const DB_VERSION: u64 = 0;

pub struct WriteTransactionCtx {
    dbtx: WriteTransaction,
    on_commit: std::sync::Mutex<Vec<Box<dyn FnOnce() + 'static>>>,
}

impl From<WriteTransaction> for WriteTransactionCtx {
    fn from(dbtx: WriteTransaction) -> Self {
        Self {
            dbtx,
            on_commit: std::sync::Mutex::new(vec![]),
        }
    }
}

impl std_ops::Deref for WriteTransactionCtx {
    type Target = WriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.dbtx
    }
}

impl std_ops::DerefMut for WriteTransactionCtx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.dbtx
    }
}

impl WriteTransactionCtx {
    /// Run `f` after the transaction commits successfully.
    ///
    /// Used to publish in-memory effects (subscriber fan-out, push enqueue)
    /// only once the durable write is known to have landed.
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        self.on_commit
            .lock()
            .expect("Locking failed")
            .push(Box::new(f));
    }

    fn commit(self) -> result::Result<(), redb::CommitError> {
        let Self { dbtx, on_commit } = self;

        dbtx.commit()?;

        for hook in on_commit.lock().expect("Locking failed").drain(..) {
            hook();
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum TableDumpError {
    #[snafu(display("Unknown table `{name}`"))]
    UnknownTable { name: String },
}
pub type TableDumpResult<T> = std::result::Result<T, TableDumpError>;

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(visibility(pub))]
    #[snafu(display("Short code already maps to a different session"))]
    CodeTaken {
        #[snafu(implicit)]
        location: Location,
    },
}
pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,

    /// Monotonically increasing counter disambiguating events appended
    /// within the same millisecond. Process-wide; see the `events` table
    /// docs for why it does not need to survive restarts.
    event_order_counter: AtomicU64,
}

impl Database {
    pub async fn mk_db_path(data_dir: &std::path::Path) -> std::result::Result<PathBuf, io::Error> {
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(data_dir.join("fila.redb"))
    }

    pub async fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner).await
    }

    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");

        let inner = tokio::task::spawn_blocking(move || redb::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;

        Self::open_inner(inner).await
    }

    async fn open_inner(inner: redb::Database) -> DbResult<Database> {
        let inner = redb_bincode::Database::from(inner);

        Self::write_with_inner(&inner, |tx| {
            Self::init_tables_tx(tx)?;
            Self::verify_db_version_tx(&mut tx.open_table(&db_version::TABLE)?)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            inner,
            event_order_counter: AtomicU64::new(0),
        })
    }

    pub(crate) fn next_event_order(&self) -> u64 {
        self.event_order_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn init_tables_tx(tx: &WriteTransactionCtx) -> DbResult<()> {
        tx.open_table(&db_version::TABLE)?;
        tx.open_table(&sessions::TABLE)?;
        tx.open_table(&sessions_by_code::TABLE)?;
        tx.open_table(&parties::TABLE)?;
        tx.open_table(&events::TABLE)?;
        tx.open_table(&push_subscriptions::TABLE)?;
        tx.open_table(&push_subscriptions_rev::TABLE)?;
        tx.open_table(&snapshots::TABLE)?;
        Ok(())
    }

    fn verify_db_version_tx(db_version_t: &mut db_version::Table) -> DbResult<()> {
        let db_ver = db_version_t.get(&())?.map(|g| g.value());

        match db_ver {
            Some(db_ver) if DB_VERSION < db_ver => {
                return DbVersionTooHighSnafu {
                    db_ver,
                    code_ver: DB_VERSION,
                }
                .fail();
            }
            Some(_) => {}
            None => {
                db_version_t.insert(&(), &DB_VERSION)?;
            }
        }
        Ok(())
    }

    pub async fn compact(&mut self) -> Result<bool, redb::CompactionError> {
        tokio::task::block_in_place(|| self.inner.as_raw_mut().compact())
    }
}

impl Database {
    pub async fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let mut dbtx =
                WriteTransactionCtx::from(inner.begin_write().context(TransactionSnafu)?);
            let res = f(&mut dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::write_with_inner(&self.inner, f).await
    }

    pub async fn read_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = inner.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::read_with_inner(&self.inner, f).await
    }

    pub async fn dump_table(&self, name: &str) -> TableDumpResult<()> {
        self.read_with(|tx| {
            match name {
                "sessions" => Self::dump_table_dbtx(tx, &tables::sessions::TABLE)?,
                "sessions_by_code" => Self::dump_table_dbtx(tx, &tables::sessions_by_code::TABLE)?,
                "parties" => Self::dump_table_dbtx(tx, &tables::parties::TABLE)?,
                "events" => Self::dump_table_dbtx(tx, &tables::events::TABLE)?,
                "push_subscriptions" => {
                    Self::dump_table_dbtx(tx, &tables::push_subscriptions::TABLE)?
                }
                "snapshots" => Self::dump_table_dbtx(tx, &tables::snapshots::TABLE)?,
                _ => {
                    return Ok(Err(UnknownTableSnafu {
                        name: name.to_string(),
                    }
                    .build()));
                }
            }
            Ok(Ok(()))
        })
        .await
        .expect("Database panic")
    }
}

/// An event appended together with its assigned log position.
#[derive(Debug, Clone)]
pub struct AppendedEvent {
    pub ts: Timestamp,
    pub order: u64,
}

#[cfg(test)]
mod tests;
