use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One config-toggled cluster of related attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Vitals,
    Progression,
    Consumption,
    Effects,
    Knowledge,
    Inventory,
}

impl Group {
    /// Every group, in the order the codec captures and applies them.
    pub const ALL: [Group; 6] = [
        Group::Vitals,
        Group::Progression,
        Group::Consumption,
        Group::Effects,
        Group::Knowledge,
        Group::Inventory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Group::Vitals => "vitals",
            Group::Progression => "progression",
            Group::Consumption => "consumption",
            Group::Effects => "effects",
            Group::Knowledge => "knowledge",
            Group::Inventory => "inventory",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The consistency marker stored next to every record.
///
/// Only `Saved` means the row is the complete result of a departure and may
/// be read as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastEvent {
    #[default]
    None,
    Loaded,
    Saved,
}

impl LastEvent {
    /// Column representation; `None` is stored as SQL NULL.
    pub fn as_column(self) -> Option<&'static str> {
        match self {
            LastEvent::None => None,
            LastEvent::Loaded => Some("loaded"),
            LastEvent::Saved => Some("saved"),
        }
    }

    /// Parses a stored marker. Unknown values never count as `Saved`.
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            Some("saved") | Some("save") => LastEvent::Saved,
            Some("loaded") | Some("load") => LastEvent::Loaded,
            _ => LastEvent::None,
        }
    }
}

/// Result of the narrow marker projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRead {
    /// The entity has never been saved.
    NoRow,
    Marker(LastEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub air: i32,
    pub fire_ticks: i32,
    pub glowing: bool,
    pub health: f64,
    pub absorption: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progression {
    pub level: i32,
    /// Progress towards the next level, `0.0..=1.0`.
    pub exp: f64,
    pub total_experience: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub food_level: i32,
    pub exhaustion: f64,
    pub saturation: f64,
}

/// Serialized containers of the inventory group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryPayload {
    pub main: String,
    pub armor: String,
    pub auxiliary: String,
    pub selected_slot: i32,
}

/// Flat, storable snapshot of an entity's attributes.
///
/// Every group is optional: a group is `None` when it was disabled at capture
/// time or has never been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: Uuid,
    pub vitals: Option<Vitals>,
    pub progression: Option<Progression>,
    pub consumption: Option<Consumption>,
    pub effects: Option<String>,
    pub recipes: Option<String>,
    pub inventory: Option<InventoryPayload>,
    pub last_event: LastEvent,
}

impl StateRecord {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            vitals: None,
            progression: None,
            consumption: None,
            effects: None,
            recipes: None,
            inventory: None,
            last_event: LastEvent::None,
        }
    }

    pub fn has_group(&self, group: Group) -> bool {
        match group {
            Group::Vitals => self.vitals.is_some(),
            Group::Progression => self.progression.is_some(),
            Group::Consumption => self.consumption.is_some(),
            Group::Effects => self.effects.is_some(),
            Group::Knowledge => self.recipes.is_some(),
            Group::Inventory => self.inventory.is_some(),
        }
    }

    /// Fills every group this record does not carry from `stored`.
    ///
    /// The marker and the groups already present are left as they are.
    pub fn merge_missing_from(&mut self, stored: &StateRecord) {
        if self.vitals.is_none() {
            self.vitals = stored.vitals.clone();
        }
        if self.progression.is_none() {
            self.progression = stored.progression.clone();
        }
        if self.consumption.is_none() {
            self.consumption = stored.consumption.clone();
        }
        if self.effects.is_none() {
            self.effects = stored.effects.clone();
        }
        if self.recipes.is_none() {
            self.recipes = stored.recipes.clone();
        }
        if self.inventory.is_none() {
            self.inventory = stored.inventory.clone();
        }
    }
}
