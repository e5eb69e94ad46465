//! Persistence access layer.
//!
//! [`StateStore`] runs typed reads and writes against pooled connections.
//! Failures are reported through the log and swallowed here: every operation
//! returns `None`/`false` when it did not complete, and callers treat that as
//! a reported failure.

pub mod memory;
pub mod schema;

use std::fmt;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{error, info};
use sqlx::AnyPool;
use sqlx::AnyConnection;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::core::{LastEvent, MarkerRead, Result, StateRecord, SyncError};
pub use memory::MemoryRepository;

/// Typed state operations used by the join and quit paths.
#[async_trait]
pub trait StateRepository: Send + Sync + 'static {
    /// Reads only the marker of `id`.
    async fn read_marker(&self, id: Uuid) -> Option<MarkerRead>;

    /// Reads the full row of `id`; `Some(None)` means there is no row.
    async fn read_record(&self, id: Uuid) -> Option<Option<StateRecord>>;

    /// Replaces the row of `record.id`.
    ///
    /// Groups the record does not carry keep their stored payload.
    async fn write_record(&self, record: StateRecord) -> bool;

    /// Sets the marker of an existing row to `loaded`.
    async fn mark_loaded(&self, id: Uuid) -> bool;

    async fn close(&self) {}
}

/// SQL-backed state store
///
/// Owns the connection pool for its whole lifetime: created by
/// [`StateStore::connect`], closed by [`StateRepository::close`].
pub struct StateStore {
    pool: AnyPool,
    target: String,
    max_connections: u32,
}

impl StateStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;
        sqlx::any::install_default_drivers();

        let target = config.to_url();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout_duration())
            .idle_timeout(config.idle_timeout_duration())
            .max_lifetime(config.max_lifetime_duration())
            .connect(&config.connection_url())
            .await
            .map_err(|err| {
                SyncError::Connection(format!(
                    "failed to establish a connection to '{}': {}",
                    target, err
                ))
            })?;

        info!(
            "State store connected: target='{}' max_connections={}",
            target, config.max_connections
        );

        Ok(Self {
            pool,
            target,
            max_connections: config.max_connections,
        })
    }

    /// Runs `op` on a fresh pooled connection.
    ///
    /// The connection goes back to the pool on every exit path. If no
    /// connection can be acquired `op` is never invoked. Either failure is
    /// logged and yields `None`; nothing is retried.
    pub async fn with_connection<T, F>(&self, op: F) -> Option<T>
    where
        F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "Failed to acquire a database connection: target='{}' error='{}'",
                    self.target,
                    SyncError::from(err)
                );
                return None;
            }
        };

        let result = op(&mut *conn).await;
        drop(conn);

        match result {
            Ok(value) => Some(value),
            Err(err) => {
                error!(
                    "Database access failed: target='{}' error='{}'",
                    self.target, err
                );
                None
            }
        }
    }

    /// Creates the `entity_state` table if it does not exist.
    pub async fn setup_schema(&self) -> Option<()> {
        self.with_connection(|conn| create_table(conn).boxed()).await
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.pool.size() as usize;
        let idle = self.pool.num_idle();

        PoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
            max_connections: self.max_connections as usize,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl StateRepository for StateStore {
    async fn read_marker(&self, id: Uuid) -> Option<MarkerRead> {
        let key = id.to_string();
        self.with_connection(move |conn| select_marker(conn, key).boxed())
            .await
    }

    async fn read_record(&self, id: Uuid) -> Option<Option<StateRecord>> {
        let key = id.to_string();
        self.with_connection(move |conn| select_record(conn, key).boxed())
            .await
    }

    async fn write_record(&self, record: StateRecord) -> bool {
        self.with_connection(move |conn| replace_record(conn, record).boxed())
            .await
            .is_some()
    }

    async fn mark_loaded(&self, id: Uuid) -> bool {
        let key = id.to_string();
        self.with_connection(move |conn| update_marker(conn, key, LastEvent::Loaded).boxed())
            .await
            .unwrap_or(false)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("State store closed: target='{}'", self.target);
    }
}

async fn create_table(conn: &mut AnyConnection) -> Result<()> {
    sqlx::query(schema::SETUP).execute(&mut *conn).await?;
    Ok(())
}

async fn select_marker(conn: &mut AnyConnection, key: String) -> Result<MarkerRead> {
    let row = sqlx::query(schema::SELECT_MARKER)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(MarkerRead::Marker(schema::marker_from_row(&row)?)),
        None => Ok(MarkerRead::NoRow),
    }
}

async fn select_record(conn: &mut AnyConnection, key: String) -> Result<Option<StateRecord>> {
    let row = sqlx::query(schema::SELECT_RECORD)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| schema::record_from_row(&row)).transpose()
}

// Read-merge-replace relies on a single writer per entity; the replace itself
// is one statement, so marker and payload always land together.
async fn replace_record(conn: &mut AnyConnection, mut record: StateRecord) -> Result<()> {
    if let Some(stored) = select_record(conn, record.id.to_string()).await? {
        record.merge_missing_from(&stored);
    }

    schema::bind_record(sqlx::query(schema::REPLACE_RECORD), &record)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn update_marker(conn: &mut AnyConnection, key: String, marker: LastEvent) -> Result<bool> {
    let result = sqlx::query(schema::UPDATE_MARKER)
        .bind(marker.as_column().map(str::to_string))
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} idle, max {}",
            self.active_connections,
            self.total_connections,
            self.idle_connections,
            self.max_connections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::config::SavingConfig;
    use crate::core::Group;
    use crate::entity::{ItemStack, MemoryEntity};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn sqlite_store(dir: &TempDir) -> StateStore {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("state.db").display());
        let config = DatabaseConfig::from_url(&url).unwrap();
        let store = StateStore::connect(&config).await.unwrap();
        assert!(store.setup_schema().await.is_some());
        store
    }

    fn player(id: Uuid) -> MemoryEntity {
        let mut entity = MemoryEntity::new(id);
        entity.health = 10.0;
        entity.level = 12;
        entity.exp = 0.5;
        entity.main[3] = Some(ItemStack::new("bread", 7));
        entity.recipes.insert("minecraft:bread".parse().unwrap());
        entity
    }

    #[tokio::test]
    async fn test_missing_row() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        let id = Uuid::new_v4();

        assert_eq!(store.read_marker(id).await, Some(MarkerRead::NoRow));
        assert_eq!(store.read_record(id).await, Some(None));
        assert!(!store.mark_loaded(id).await);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        let id = Uuid::new_v4();

        let record = codec::capture(&SavingConfig::all(), &player(id));
        assert!(store.write_record(record.clone()).await);

        assert_eq!(
            store.read_marker(id).await,
            Some(MarkerRead::Marker(LastEvent::Saved))
        );
        assert_eq!(store.read_record(id).await, Some(Some(record)));
    }

    #[tokio::test]
    async fn test_replace_keeps_one_row_per_id() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        let id = Uuid::new_v4();

        let mut entity = player(id);
        assert!(store.write_record(codec::capture(&SavingConfig::all(), &entity)).await);
        entity.health = 3.5;
        assert!(store.write_record(codec::capture(&SavingConfig::all(), &entity)).await);

        let stored = store.read_record(id).await.flatten().unwrap();
        assert_eq!(stored.vitals.map(|v| v.health), Some(3.5));
    }

    #[tokio::test]
    async fn test_disabled_group_payload_survives_writes() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        let id = Uuid::new_v4();

        let mut entity = player(id);
        let full = codec::capture(&SavingConfig::all(), &entity);
        assert!(store.write_record(full.clone()).await);

        let vitals_only = SavingConfig::all().with(Group::Inventory, false);
        for health in [8.0, 6.0] {
            entity.health = health;
            entity.main[3] = None;
            assert!(store.write_record(codec::capture(&vitals_only, &entity)).await);
        }

        let stored = store.read_record(id).await.flatten().unwrap();
        assert_eq!(stored.inventory, full.inventory);
        assert_eq!(stored.vitals.map(|v| v.health), Some(6.0));
        assert_eq!(stored.last_event, LastEvent::Saved);
    }

    #[tokio::test]
    async fn test_mark_loaded() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        let id = Uuid::new_v4();

        assert!(store.write_record(codec::capture(&SavingConfig::all(), &player(id))).await);
        assert!(store.mark_loaded(id).await);
        assert_eq!(
            store.read_marker(id).await,
            Some(MarkerRead::Marker(LastEvent::Loaded))
        );
    }

    #[tokio::test]
    async fn test_setup_schema_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        assert!(store.setup_schema().await.is_some());
    }

    #[tokio::test]
    async fn test_operation_error_is_reported_as_none() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;

        let result = store
            .with_connection(|conn| {
                async move {
                    sqlx::query("SELECT * FROM no_such_table")
                        .execute(&mut *conn)
                        .await?;
                    Ok::<(), SyncError>(())
                }
                .boxed()
            })
            .await;
        assert!(result.is_none());

        // the connection went back to the pool
        assert_eq!(store.read_marker(Uuid::new_v4()).await, Some(MarkerRead::NoRow));
    }

    #[tokio::test]
    async fn test_closed_pool_skips_operation() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        store.close().await;
        assert!(store.is_closed());

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let result = store
            .with_connection(move |_conn| {
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok::<(), SyncError>(())
                }
                .boxed()
            })
            .await;

        assert!(result.is_none());
        assert!(!invoked.load(Ordering::SeqCst));
        assert_eq!(store.read_marker(Uuid::new_v4()).await, None);
        assert!(
            !store
                .write_record(StateRecord::new(Uuid::new_v4()))
                .await
        );
    }

    #[tokio::test]
    async fn test_nested_call_uses_its_own_connection() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(sqlite_store(&dir).await);
        let id = Uuid::new_v4();

        let inner = Arc::clone(&store);
        let result = store
            .with_connection(move |_conn| {
                async move { Ok::<_, SyncError>(inner.read_marker(id).await) }.boxed()
            })
            .await;

        assert_eq!(result, Some(Some(MarkerRead::NoRow)));
    }

    #[tokio::test]
    async fn test_nested_call_on_exhausted_pool_times_out() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("state.db").display());
        let config = DatabaseConfig::from_url(&url)
            .unwrap()
            .max_connections(1)
            .connect_timeout(Duration::from_millis(200));
        let store = Arc::new(StateStore::connect(&config).await.unwrap());
        assert!(store.setup_schema().await.is_some());

        let inner = Arc::clone(&store);
        let nested = store.with_connection(move |_conn| {
            async move { Ok::<_, SyncError>(inner.read_marker(Uuid::new_v4()).await) }.boxed()
        });
        let result = tokio::time::timeout(Duration::from_secs(5), nested)
            .await
            .expect("nested acquisition must not deadlock");

        assert_eq!(result, Some(None));
        assert_eq!(store.read_marker(Uuid::new_v4()).await, Some(MarkerRead::NoRow));
    }

    #[tokio::test]
    async fn test_concurrent_writers_share_bounded_pool() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(sqlite_store(&dir).await);

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let id = Uuid::new_v4();
                    let written = store
                        .write_record(codec::capture(&SavingConfig::all(), &player(id)))
                        .await;
                    (id, written)
                })
            })
            .collect();

        for handle in handles {
            let (id, written) = handle.await.unwrap();
            assert!(written);
            assert_eq!(
                store.read_marker(id).await,
                Some(MarkerRead::Marker(LastEvent::Saved))
            );
        }

        let stats = store.stats();
        assert!(stats.total_connections <= 3);
        assert_eq!(stats.max_connections, 3);
    }
}
