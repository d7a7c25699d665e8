use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{mpsc, Mutex};
use std::thread::JoinHandle;

use log::{debug, error, info};
use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};

use crate::entity_store::types::{Action, EntityDelta, EntityKey, EntityKind, EntityRecord};
use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{self as entities, counters};
use crate::storage::storage_trait::ConfigDatabase;

type DbFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce(DatabaseConnection) -> DbFuture + Send>;

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        json TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS entities_kind ON entities(kind);",
    "CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );",
];

/// SQLite configuration database on SeaORM.
///
/// The async driver lives on its own thread with a current-thread runtime. Every
/// call ships a job to that thread and blocks on the reply, so the API is usable
/// from plain threads and from inside other runtimes alike.
pub struct DatabaseStorage {
    url: String,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Option<JoinHandle<()>>,
}

impl DatabaseStorage {
    /// Default database filename used under the system directory
    pub const DEFAULT_DB_FILE: &'static str = "netadapter.sqlite3";

    /// Create or open a SQLite file, creating its parent directory when needed.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        }
        Self::open(&format!("sqlite://{}?mode=rwc", path.display()))
    }

    pub fn open(url: &str) -> Result<Self, StorageError> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StorageError>>();
        let thread_url = url.to_string();
        let worker = std::thread::Builder::new()
            .name("db-worker".to_string())
            .spawn(move || db_thread(thread_url, jobs_rx, ready_tx))
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("[storage] Opened {}", url);
                Ok(Self {
                    url: url.to_string(),
                    jobs: Mutex::new(Some(jobs_tx)),
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(StorageError::ConnectionFailed(format!("{}: worker exited", url)))
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs `f` on the DB thread and waits for its result.
    fn call<T, F, Fut>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(DatabaseConnection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |db| {
            Box::pin(async move {
                let _ = reply_tx.send(f(db).await);
            })
        });
        {
            let guard = self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let sender = guard
                .as_ref()
                .ok_or_else(|| StorageError::ConnectionFailed("database closed".to_string()))?;
            sender
                .send(job)
                .map_err(|_| StorageError::ConnectionFailed("database worker gone".to_string()))?;
        }
        reply_rx
            .recv()
            .map_err(|_| StorageError::ConnectionFailed("database worker dropped the request".to_string()))?
    }
}

fn db_thread(url: String, jobs: mpsc::Receiver<Job>, ready: mpsc::Sender<Result<(), StorageError>>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(StorageError::ConnectionFailed(e.to_string())));
            return;
        }
    };
    let db = match rt.block_on(connect(&url)) {
        Ok(db) => db,
        Err(e) => {
            error!("[storage] Cannot open {}: {}", url, e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while let Ok(job) = jobs.recv() {
        rt.block_on(job(db.clone()));
    }
    if let Err(e) = rt.block_on(db.close()) {
        debug!("[storage] Close failed: {}", e);
    }
}

async fn connect(url: &str) -> Result<DatabaseConnection, StorageError> {
    let db = Database::connect(url)
        .await
        .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
    for statement in SCHEMA {
        db.execute_unprepared(statement)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
    }
    Ok(db)
}

impl Drop for DatabaseStorage {
    fn drop(&mut self) {
        let sender = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// A single row change, prepared off the DB thread.
#[derive(Debug)]
enum RowWrite {
    Upsert { id: String, kind: String, json: String },
    Delete { id: String },
}

impl RowWrite {
    fn upsert(record: &EntityRecord) -> Result<Self, StorageError> {
        Ok(RowWrite::Upsert {
            id: record.key().storage_id(),
            kind: record.kind().as_str().to_string(),
            json: serde_json::to_string(record).map_err(|e| StorageError::WriteFailed(e.to_string()))?,
        })
    }

    fn of_delta(delta: &EntityDelta) -> Result<Vec<Self>, StorageError> {
        let mut writes = Vec::new();
        match delta.action {
            Action::Create => writes.push(Self::upsert(&delta.record)?),
            Action::Modify => {
                if let Some(old_key) = &delta.old_key {
                    if *old_key != delta.record.key() {
                        writes.push(RowWrite::Delete {
                            id: old_key.storage_id(),
                        });
                    }
                }
                writes.push(Self::upsert(&delta.record)?);
            }
            Action::Delete => writes.push(RowWrite::Delete {
                id: delta.target_key().storage_id(),
            }),
        }
        Ok(writes)
    }

    async fn run<C: ConnectionTrait>(self, conn: &C) -> Result<(), StorageError> {
        match self {
            RowWrite::Upsert { id, kind, json } => {
                let row = entities::ActiveModel {
                    id: Set(id),
                    kind: Set(kind),
                    json: Set(json),
                };
                entities::Entity::insert(row)
                    .on_conflict(
                        OnConflict::column(entities::Column::Id)
                            .update_columns([entities::Column::Kind, entities::Column::Json])
                            .to_owned(),
                    )
                    .exec_without_returning(conn)
                    .await
                    .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            }
            RowWrite::Delete { id } => {
                entities::Entity::delete_by_id(id)
                    .exec(conn)
                    .await
                    .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl ConfigDatabase for DatabaseStorage {
    fn load_records(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, StorageError> {
        self.call(move |db| async move {
            let rows = entities::Entity::find()
                .filter(entities::Column::Kind.eq(kind.as_str()))
                .order_by_asc(entities::Column::Id)
                .all(&db)
                .await
                .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            rows.into_iter()
                .map(|row| {
                    serde_json::from_str::<EntityRecord>(&row.json)
                        .map_err(|e| StorageError::ReadFailed(format!("{}: {}", row.id, e)))
                })
                .collect()
        })
    }

    fn upsert_record(&self, record: &EntityRecord) -> Result<(), StorageError> {
        let write = RowWrite::upsert(record)?;
        self.call(move |db| async move { write.run(&db).await })
    }

    fn delete_record(&self, key: &EntityKey) -> Result<(), StorageError> {
        let write = RowWrite::Delete { id: key.storage_id() };
        self.call(move |db| async move { write.run(&db).await })
    }

    /// One transaction per edit: a failed row rolls back the rows before it.
    fn apply_deltas(&self, deltas: &[EntityDelta]) -> Result<(), StorageError> {
        let mut writes = Vec::new();
        for delta in deltas {
            writes.extend(RowWrite::of_delta(delta)?);
        }
        let count = writes.len();
        self.call(move |db| async move {
            let txn = db
                .begin()
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            for write in writes {
                // dropping the transaction rolls it back
                write.run(&txn).await?;
            }
            txn.commit()
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            debug!("[store] Committed {} row writes", count);
            Ok(())
        })
    }

    fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        let name = name.to_string();
        self.call(move |db| async move {
            let row = counters::Entity::find_by_id(name)
                .one(&db)
                .await
                .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            Ok(row.map(|r| r.value))
        })
    }

    fn set_counter(&self, name: &str, value: i64) -> Result<(), StorageError> {
        let name = name.to_string();
        self.call(move |db| async move {
            let row = counters::ActiveModel {
                name: Set(name),
                value: Set(value),
            };
            counters::Entity::insert(row)
                .on_conflict(
                    OnConflict::column(counters::Column::Name)
                        .update_column(counters::Column::Value)
                        .to_owned(),
                )
                .exec_without_returning(&db)
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            Ok(())
        })
    }
}
