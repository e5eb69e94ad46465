use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use uuid::Uuid;

/// Identifies the arrival that blocked an entity.
///
/// Every [`AccessGate::block`] issues a new ticket, so a stale synchronizer
/// can tell that a newer arrival (or a departure) took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GateTicket(u64);

/// Actions a not-yet-loaded entity may not perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    InventoryClick,
    ItemPickup,
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::InventoryClick => f.write_str("inventory click"),
            Interaction::ItemPickup => f.write_str("item pickup"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{interaction} rejected: state of entity '{id}' is not loaded yet")]
pub struct InteractionRejected {
    pub id: Uuid,
    pub interaction: Interaction,
}

/// Entities whose state has not been loaded on this node yet.
///
/// An id is blocked from `block` until the matching `release`; absence means
/// interaction is permitted. Nothing is persisted.
#[derive(Debug, Default)]
pub struct AccessGate {
    pending: RwLock<HashMap<Uuid, GateTicket>>,
    next_ticket: AtomicU64,
}

impl AccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks `id`. Blocking an already blocked id keeps it blocked and
    /// supersedes the previous ticket.
    pub fn block(&self, id: Uuid) -> GateTicket {
        let ticket = GateTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1);
        self.write().insert(id, ticket);
        ticket
    }

    /// Unblocks `id`; returns whether it was blocked.
    pub fn release(&self, id: Uuid) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Unblocks `id` only if `ticket` is still the current one.
    pub fn release_ticket(&self, id: Uuid, ticket: GateTicket) -> bool {
        let mut pending = self.write();
        if pending.get(&id) == Some(&ticket) {
            pending.remove(&id);
            true
        } else {
            false
        }
    }

    pub fn is_blocked(&self, id: Uuid) -> bool {
        self.read().contains_key(&id)
    }

    pub fn ticket(&self, id: Uuid) -> Option<GateTicket> {
        self.read().get(&id).copied()
    }

    /// Whether `ticket` is the one currently blocking `id`.
    pub fn holds(&self, id: Uuid, ticket: GateTicket) -> bool {
        self.ticket(id) == Some(ticket)
    }

    /// Rejects `interaction` while `id` is blocked.
    pub fn permit(&self, id: Uuid, interaction: Interaction) -> Result<(), InteractionRejected> {
        if self.is_blocked(id) {
            Err(InteractionRejected { id, interaction })
        } else {
            Ok(())
        }
    }

    pub fn blocked_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, GateTicket>> {
        self.pending.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, GateTicket>> {
        self.pending.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_block_until_release() {
        let gate = AccessGate::new();
        let id = Uuid::new_v4();

        assert!(!gate.is_blocked(id));
        gate.block(id);
        assert!(gate.is_blocked(id));
        assert!(gate.release(id));
        assert!(!gate.is_blocked(id));
    }

    #[test]
    fn test_block_and_release_are_idempotent() {
        let gate = AccessGate::new();
        let id = Uuid::new_v4();

        gate.block(id);
        gate.block(id);
        assert_eq!(gate.blocked_count(), 1);

        assert!(gate.release(id));
        assert!(!gate.release(id));
        assert!(!gate.release(Uuid::new_v4()));
        assert_eq!(gate.blocked_count(), 0);
    }

    #[test]
    fn test_newer_ticket_supersedes() {
        let gate = AccessGate::new();
        let id = Uuid::new_v4();

        let first = gate.block(id);
        let second = gate.block(id);
        assert_ne!(first, second);
        assert!(!gate.holds(id, first));
        assert!(gate.holds(id, second));

        assert!(!gate.release_ticket(id, first));
        assert!(gate.is_blocked(id));
        assert!(gate.release_ticket(id, second));
        assert!(!gate.is_blocked(id));
    }

    #[test]
    fn test_blocked_interactions_are_rejected() {
        let gate = AccessGate::new();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        gate.block(id);
        for interaction in [Interaction::InventoryClick, Interaction::ItemPickup] {
            assert_eq!(
                gate.permit(id, interaction),
                Err(InteractionRejected { id, interaction })
            );
            assert!(gate.permit(other, interaction).is_ok());
        }

        gate.release(id);
        assert!(gate.permit(id, Interaction::ItemPickup).is_ok());
    }

    #[test]
    fn test_concurrent_blocks_issue_unique_tickets() {
        let gate = Arc::new(AccessGate::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    (0..100).map(|_| gate.block(Uuid::new_v4())).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut tickets: Vec<GateTicket> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        let total = tickets.len();
        tickets.sort_by_key(|ticket| ticket.0);
        tickets.dedup();

        assert_eq!(tickets.len(), total);
        assert_eq!(gate.blocked_count(), 800);
    }
}
