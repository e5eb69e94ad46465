// ============================================================================
// roamstate: entity state that follows players across nodes
// ============================================================================

pub mod codec;
pub mod config;
pub mod core;
pub mod entity;
pub mod gate;
pub mod store;
pub mod sync;

use std::future::Future;
use std::sync::Arc;

use log::{info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use config::{Config, DatabaseConfig, SavingConfig, SyncConfig};
pub use crate::core::{Group, LastEvent, MarkerRead, Result, StateRecord, SyncError};
pub use entity::{EntityDirectory, EntityHandle, EntityTask, MemoryDirectory, MemoryEntity};
pub use gate::{AccessGate, GateTicket, Interaction, InteractionRejected};
pub use store::{MemoryRepository, PoolStats, StateRepository, StateStore};
pub use sync::{AbandonReason, JoinOutcome, JoinState, JoinSynchronizer, QuitHandler};

// ============================================================================
// Node facade
// ============================================================================

/// How a departure ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureOutcome {
    Saved,
    Failed,
    /// The entity left before its state was loaded on this node; the stored
    /// row was left untouched.
    SkippedUnloaded,
}

/// One node's state synchronization: the store, the access gate and the
/// arrival and departure handlers wired together.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use roamstate::{Config, JoinOutcome, MemoryDirectory, MemoryEntity, MemoryRepository, StateSync};
/// use uuid::Uuid;
///
/// # #[tokio::main]
/// # async fn main() -> roamstate::Result<()> {
/// let mut config = Config::default();
/// config.sync.initial_delay_ms = 0;
///
/// let directory = Arc::new(MemoryDirectory::new());
/// let node = StateSync::with_repository(
///     config,
///     Arc::new(MemoryRepository::new()),
///     directory.clone(),
/// )?;
///
/// let id = Uuid::new_v4();
/// directory.connect(MemoryEntity::new(id));
/// let outcome = node.on_arrival(id).await.expect("join task");
/// assert!(matches!(outcome, JoinOutcome::Applied { first_join: true, .. }));
/// # Ok(())
/// # }
/// ```
pub struct StateSync {
    repository: Arc<dyn StateRepository>,
    gate: Arc<AccessGate>,
    join: JoinSynchronizer,
    quit: QuitHandler,
}

impl StateSync {
    /// Connects to the configured database and creates the state table if
    /// needed. Must be called from within a tokio runtime.
    pub async fn start(config: Config, directory: Arc<dyn EntityDirectory>) -> Result<Self> {
        config.validate()?;

        let store = StateStore::connect(&config.database).await?;
        if store.setup_schema().await.is_none() {
            store.close().await;
            return Err(SyncError::Operation(
                "failed to create the entity_state table".to_string(),
            ));
        }

        Self::with_repository(config, Arc::new(store), directory)
    }

    /// Wires a node around an existing repository. Must be called from
    /// within a tokio runtime.
    pub fn with_repository(
        config: Config,
        repository: Arc<dyn StateRepository>,
        directory: Arc<dyn EntityDirectory>,
    ) -> Result<Self> {
        config.sync.validate().map_err(SyncError::Config)?;
        let runtime = Handle::try_current()
            .map_err(|err| SyncError::Config(format!("no tokio runtime available: {}", err)))?;

        let gate = Arc::new(AccessGate::new());
        let join = JoinSynchronizer::new(
            Arc::clone(&repository),
            directory,
            Arc::clone(&gate),
            config.saving,
            config.sync.clone(),
            runtime,
        );
        let quit = QuitHandler::new(Arc::clone(&repository), config.saving);

        info!(
            "State sync started: groups={:?} max_attempts={:?}",
            config.saving.enabled_groups().map(Group::name).collect::<Vec<_>>(),
            config.sync.max_attempts
        );

        Ok(Self {
            repository,
            gate,
            join,
            quit,
        })
    }

    /// Blocks the arriving entity and starts waiting for its state.
    pub fn on_arrival(&self, id: Uuid) -> JoinHandle<JoinOutcome> {
        self.join.on_arrival(id)
    }

    /// Captures the departing entity now and saves it.
    ///
    /// Any pending arrival of the entity is abandoned. An entity that is
    /// still blocked is not saved.
    pub fn on_departure(
        &self,
        entity: &dyn EntityHandle,
    ) -> impl Future<Output = DepartureOutcome> + Send + use<> {
        let id = entity.id();
        let save = if self.gate.is_blocked(id) {
            warn!("Skipping save of an entity whose state was never loaded: entity='{}'", id);
            None
        } else {
            Some(self.quit.save(entity))
        };
        self.join.cancel(id);

        async move {
            let Some(save) = save else {
                return DepartureOutcome::SkippedUnloaded;
            };
            if save.await {
                DepartureOutcome::Saved
            } else {
                DepartureOutcome::Failed
            }
        }
    }

    /// Rejects `interaction` while the state of `id` is not loaded.
    pub fn permit(
        &self,
        id: Uuid,
        interaction: Interaction,
    ) -> std::result::Result<(), InteractionRejected> {
        self.gate.permit(id, interaction)
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn is_loaded(&self, id: Uuid) -> bool {
        self.join.is_loaded(id)
    }

    pub fn join_state(&self, id: Uuid) -> Option<JoinState> {
        self.join.state(id)
    }

    /// Closes the repository. Pending arrivals keep polling and fail their
    /// reads until they reach the retry ceiling.
    pub async fn shutdown(&self) {
        self.repository.close().await;
        info!("State sync stopped: blocked={}", self.gate.blocked_count());
    }
}
