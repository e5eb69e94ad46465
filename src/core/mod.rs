pub mod error;
pub mod types;

pub use error::{Result, SyncError};
pub use types::{
    Consumption, Group, InventoryPayload, LastEvent, MarkerRead, Progression, StateRecord, Vitals,
};
