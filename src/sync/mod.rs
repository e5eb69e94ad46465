//! Arrival and departure protocols.
//!
//! An arrival blocks the entity at the [`AccessGate`] and waits until the
//! node it came from has written its state (marker `saved`), then applies
//! that state on the entity's owning thread and lifts the block. A departure
//! captures the live state and writes it with the marker `saved`.

pub mod quit;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

use crate::codec;
use crate::config::{SavingConfig, SyncConfig};
use crate::core::{LastEvent, MarkerRead, Result, StateRecord};
use crate::entity::{EntityDirectory, EntityHandle};
use crate::gate::{AccessGate, GateTicket};
use crate::store::StateRepository;
pub use quit::QuitHandler;

/// Progress of one arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Arrived,
    Waiting,
    Polling { attempt: u32 },
    Applied,
    Abandoned,
}

impl fmt::Display for JoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinState::Arrived => f.write_str("arrived"),
            JoinState::Waiting => f.write_str("waiting"),
            JoinState::Polling { attempt } => write!(f, "polling({})", attempt),
            JoinState::Applied => f.write_str("applied"),
            JoinState::Abandoned => f.write_str("abandoned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The entity left before its state was applied.
    Departed,
    /// A newer arrival of the same entity took over.
    Superseded,
    /// `max_attempts` marker reads did not see a `saved` marker.
    RetryCeiling,
}

/// How an arrival ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// State resolved and the gate was lifted.
    ///
    /// `first_join` means no row existed and the entity kept its defaults.
    /// `complete` is `false` when a group failed to decode; groups applied
    /// before it stay applied.
    Applied { first_join: bool, complete: bool },
    /// This node applied the entity's state since its last departure.
    AlreadyApplied,
    Abandoned(AbandonReason),
}

enum Attempt {
    Resolved(JoinOutcome),
    Lost(AbandonReason),
    Retry,
    Unresolvable,
}

/// Runs the wait-and-poll protocol for every arrival on this node.
///
/// Cloning is cheap; clones share the session ledger.
#[derive(Clone)]
pub struct JoinSynchronizer {
    inner: Arc<JoinInner>,
}

struct JoinInner {
    repository: Arc<dyn StateRepository>,
    directory: Arc<dyn EntityDirectory>,
    gate: Arc<AccessGate>,
    saving: SavingConfig,
    policy: SyncConfig,
    /// Entities whose state this node applied since their last departure.
    sessions: Mutex<HashSet<Uuid>>,
    states: Mutex<HashMap<Uuid, JoinState>>,
    runtime: Handle,
}

impl JoinSynchronizer {
    pub fn new(
        repository: Arc<dyn StateRepository>,
        directory: Arc<dyn EntityDirectory>,
        gate: Arc<AccessGate>,
        saving: SavingConfig,
        policy: SyncConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(JoinInner {
                repository,
                directory,
                gate,
                saving,
                policy,
                sessions: Mutex::new(HashSet::new()),
                states: Mutex::new(HashMap::new()),
                runtime,
            }),
        }
    }

    /// Blocks `id` and starts polling for its state.
    ///
    /// Returns immediately; the returned handle resolves once the arrival is
    /// applied or abandoned.
    pub fn on_arrival(&self, id: Uuid) -> JoinHandle<JoinOutcome> {
        let ticket = self.inner.gate.block(id);
        self.inner.set_state(id, ticket, JoinState::Arrived);

        let inner = Arc::clone(&self.inner);
        let span = info_span!("join", entity = %id);
        self.inner
            .runtime
            .spawn(async move { inner.run(id, ticket).await }.instrument(span))
    }

    /// Forgets the session of `id` and lifts its block, ending any pending
    /// arrival as [`AbandonReason::Departed`].
    pub fn cancel(&self, id: Uuid) {
        let mut sessions = self.inner.sessions();
        sessions.remove(&id);
        self.inner.states().remove(&id);
        if self.inner.gate.release(id) {
            info!("Join cancelled: entity='{}'", id);
        }
    }

    /// Whether this node applied the state of `id` since its last departure.
    pub fn is_loaded(&self, id: Uuid) -> bool {
        self.inner.sessions().contains(&id)
    }

    pub fn state(&self, id: Uuid) -> Option<JoinState> {
        self.inner.states().get(&id).copied()
    }
}

impl JoinInner {
    async fn run(self: Arc<Self>, id: Uuid, ticket: GateTicket) -> JoinOutcome {
        self.set_state(id, ticket, JoinState::Waiting);
        sleep(self.policy.initial_delay()).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if let Some(reason) = self.lost(id, ticket) {
                return self.abandon(reason);
            }
            self.set_state(id, ticket, JoinState::Polling { attempt });

            if self.sessions().contains(&id) {
                if self.gate.release_ticket(id, ticket) {
                    self.set_applied(id, JoinState::Applied);
                }
                event!(Level::DEBUG, attempt, "state already applied on this node");
                return JoinOutcome::AlreadyApplied;
            }

            let unresolvable = match self.attempt(id, ticket).await {
                Attempt::Resolved(outcome) => return outcome,
                Attempt::Lost(reason) => return self.abandon(reason),
                Attempt::Retry => false,
                Attempt::Unresolvable => true,
            };

            if let Some(max) = self.policy.max_attempts {
                if attempt >= max {
                    return self.give_up(id, ticket, attempt, unresolvable);
                }
            }

            event!(Level::DEBUG, attempt, "state not ready, retrying");
            sleep(self.policy.poll_interval()).await;
        }
    }

    async fn attempt(&self, id: Uuid, ticket: GateTicket) -> Attempt {
        let record = match self.repository.read_marker(id).await {
            Some(MarkerRead::NoRow) => None,
            Some(MarkerRead::Marker(LastEvent::Saved)) => {
                match self.repository.read_record(id).await {
                    Some(Some(record)) if record.last_event == LastEvent::Saved => Some(record),
                    _ => return Attempt::Retry,
                }
            }
            Some(MarkerRead::Marker(_)) | None => return Attempt::Retry,
        };

        match record {
            None => self.keep_defaults(id, ticket).await,
            Some(record) => self.apply(id, ticket, record).await,
        }
    }

    /// Resolves a first join once the entity is reachable on this node.
    async fn keep_defaults(&self, id: Uuid, ticket: GateTicket) -> Attempt {
        let (tx, rx) = oneshot::channel();
        let gate = Arc::clone(&self.gate);

        let dispatched = self
            .directory
            .dispatch(
                id,
                Box::new(move |_entity: &mut dyn EntityHandle| {
                    let _ = tx.send(gate.holds(id, ticket));
                }),
            )
            .await;

        if !dispatched {
            event!(Level::DEBUG, "entity not resolvable on this node");
            return Attempt::Unresolvable;
        }

        match rx.await {
            Ok(true) => {}
            Ok(false) => return Attempt::Lost(self.lost_reason(id)),
            Err(_) => return Attempt::Unresolvable,
        }

        if !self.finish(id, ticket) {
            return Attempt::Lost(self.lost_reason(id));
        }
        info!("First join, keeping default state: entity='{}'", id);
        Attempt::Resolved(JoinOutcome::Applied {
            first_join: true,
            complete: true,
        })
    }

    async fn apply(&self, id: Uuid, ticket: GateTicket, record: StateRecord) -> Attempt {
        let (tx, rx) = oneshot::channel();
        let gate = Arc::clone(&self.gate);
        let saving = self.saving;

        let dispatched = self
            .directory
            .dispatch(
                id,
                Box::new(move |entity: &mut dyn EntityHandle| {
                    let result = if gate.holds(id, ticket) {
                        Some(codec::apply(&saving, &record, entity))
                    } else {
                        None
                    };
                    let _ = tx.send(result);
                }),
            )
            .await;

        if !dispatched {
            event!(Level::DEBUG, "entity not resolvable on this node");
            return Attempt::Unresolvable;
        }

        let applied: Result<()> = match rx.await {
            Ok(Some(result)) => result,
            Ok(None) => return Attempt::Lost(self.lost_reason(id)),
            Err(_) => return Attempt::Unresolvable,
        };

        let complete = match applied {
            Ok(()) => true,
            Err(err) => {
                error!("Failed to apply stored state: entity='{}' error='{}'", id, err);
                false
            }
        };

        if !self.finish(id, ticket) {
            return Attempt::Lost(self.lost_reason(id));
        }
        info!("State applied: entity='{}' complete={}", id, complete);

        if self.policy.claim_on_load && !self.repository.mark_loaded(id).await {
            warn!("Failed to write the loaded marker: entity='{}'", id);
        }

        Attempt::Resolved(JoinOutcome::Applied {
            first_join: false,
            complete,
        })
    }

    /// Records the session and lifts the block, if `ticket` still holds it.
    fn finish(&self, id: Uuid, ticket: GateTicket) -> bool {
        let mut sessions = self.sessions();
        if !self.gate.release_ticket(id, ticket) {
            return false;
        }
        sessions.insert(id);
        self.set_applied(id, JoinState::Applied);
        true
    }

    fn give_up(&self, id: Uuid, ticket: GateTicket, attempts: u32, unresolvable: bool) -> JoinOutcome {
        let mut sessions = self.sessions();
        if !self.gate.release_ticket(id, ticket) {
            drop(sessions);
            return self.abandon(self.lost_reason(id));
        }
        if unresolvable {
            self.states().remove(&id);
        } else {
            sessions.insert(id);
            self.set_applied(id, JoinState::Abandoned);
        }
        drop(sessions);

        warn!(
            "No saved state after {} attempts, keeping current state: entity='{}'",
            attempts, id
        );
        JoinOutcome::Abandoned(AbandonReason::RetryCeiling)
    }

    fn abandon(&self, reason: AbandonReason) -> JoinOutcome {
        event!(Level::DEBUG, ?reason, "join abandoned");
        JoinOutcome::Abandoned(reason)
    }

    fn lost(&self, id: Uuid, ticket: GateTicket) -> Option<AbandonReason> {
        if self.gate.holds(id, ticket) {
            None
        } else {
            Some(self.lost_reason(id))
        }
    }

    fn lost_reason(&self, id: Uuid) -> AbandonReason {
        match self.gate.ticket(id) {
            Some(_) => AbandonReason::Superseded,
            None => AbandonReason::Departed,
        }
    }

    fn set_state(&self, id: Uuid, ticket: GateTicket, state: JoinState) {
        let mut states = self.states();
        if self.gate.holds(id, ticket) {
            states.insert(id, state);
            event!(Level::DEBUG, %state, "join state changed");
        }
    }

    // Called with the session ledger locked, after the ticket was released.
    fn set_applied(&self, id: Uuid, state: JoinState) {
        self.states().insert(id, state);
        event!(Level::DEBUG, %state, "join state changed");
    }

    fn sessions(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn states(&self) -> MutexGuard<'_, HashMap<Uuid, JoinState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
