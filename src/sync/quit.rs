use std::future::Future;
use std::sync::Arc;

use log::{error, info};

use crate::codec;
use crate::config::SavingConfig;
use crate::entity::EntityHandle;
use crate::store::StateRepository;

/// Persists an entity's state when it leaves this node.
#[derive(Clone)]
pub struct QuitHandler {
    repository: Arc<dyn StateRepository>,
    saving: SavingConfig,
}

impl QuitHandler {
    pub fn new(repository: Arc<dyn StateRepository>, saving: SavingConfig) -> Self {
        Self { repository, saving }
    }

    /// Captures `entity` now and writes it with the `saved` marker.
    ///
    /// The returned future does not borrow `entity`; it resolves to whether
    /// the write succeeded.
    pub fn save(&self, entity: &dyn EntityHandle) -> impl Future<Output = bool> + Send + use<> {
        let record = codec::capture(&self.saving, entity);
        let repository = Arc::clone(&self.repository);

        async move {
            let id = record.id;
            if repository.write_record(record).await {
                info!("State saved: entity='{}'", id);
                true
            } else {
                error!("Failed to save state: entity='{}'", id);
                false
            }
        }
    }
}
