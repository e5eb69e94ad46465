//! Host-facing entity capabilities.
//!
//! The host runtime owns the live entities. This crate only sees them through
//! [`EntityHandle`] and reaches them through an [`EntityDirectory`], which
//! runs work on the thread that owns the handle.

pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use memory::{MemoryDirectory, MemoryEntity};

/// Namespace assumed for recipe keys written without one.
pub const DEFAULT_NAMESPACE: &str = "minecraft";

/// Number of hotbar slots addressable by the selected-slot index.
pub const HOTBAR_SLOTS: i32 = 9;

/// An item as an opaque key/value descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemStack(pub Map<String, Value>);

impl ItemStack {
    pub fn new(kind: &str, amount: u32) -> Self {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::from(kind));
        map.insert("amount".to_string(), Value::from(amount));
        Self(map)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }
}

/// A status effect as an opaque key/value descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusEffect(pub Map<String, Value>);

impl StatusEffect {
    pub fn new(effect: &str, duration: i32, amplifier: i32) -> Self {
        let mut map = Map::new();
        map.insert("effect".to_string(), Value::from(effect));
        map.insert("duration".to_string(), Value::from(duration));
        map.insert("amplifier".to_string(), Value::from(amplifier));
        Self(map)
    }

    /// The effect type, used by hosts that keep one effect per type.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("effect").and_then(Value::as_str)
    }
}

/// Identifier of a discovered recipe, `namespace:path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipeKey {
    namespace: String,
    path: String,
}

impl RecipeKey {
    pub fn new(namespace: &str, path: &str) -> Result<Self, String> {
        if namespace.is_empty() || !namespace.chars().all(is_namespace_char) {
            return Err(format!("invalid recipe namespace '{}'", namespace));
        }

        if path.is_empty() || !path.chars().all(|c| is_namespace_char(c) || c == '/') {
            return Err(format!("invalid recipe path '{}'", path));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn is_namespace_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.')
}

impl FromStr for RecipeKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, path)) => Self::new(namespace, path),
            None => Self::new(DEFAULT_NAMESPACE, s),
        }
    }
}

impl TryFrom<String> for RecipeKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecipeKey> for String {
    fn from(key: RecipeKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for RecipeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

/// Slot containers persisted by the inventory group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Main,
    Armor,
    /// Per-entity storage kept outside the inventory (e.g. an ender chest).
    Auxiliary,
}

impl Container {
    pub const ALL: [Container; 3] = [Container::Main, Container::Armor, Container::Auxiliary];
}

/// Live attributes of one connected entity.
///
/// Implementations are only ever called from the thread that owns the
/// entity; see [`EntityDirectory::dispatch`].
pub trait EntityHandle {
    fn id(&self) -> Uuid;

    fn remaining_air(&self) -> i32;
    fn set_remaining_air(&mut self, air: i32);
    fn fire_ticks(&self) -> i32;
    fn set_fire_ticks(&mut self, ticks: i32);
    fn is_glowing(&self) -> bool;
    fn set_glowing(&mut self, glowing: bool);
    fn health(&self) -> f64;
    fn set_health(&mut self, health: f64);
    fn absorption(&self) -> f64;
    fn set_absorption(&mut self, amount: f64);

    fn level(&self) -> i32;
    fn set_level(&mut self, level: i32);
    fn exp(&self) -> f32;
    fn set_exp(&mut self, exp: f32);
    fn total_experience(&self) -> i32;
    fn set_total_experience(&mut self, total: i32);

    fn food_level(&self) -> i32;
    fn set_food_level(&mut self, level: i32);
    fn exhaustion(&self) -> f32;
    fn set_exhaustion(&mut self, exhaustion: f32);
    fn saturation(&self) -> f32;
    fn set_saturation(&mut self, saturation: f32);

    fn active_effects(&self) -> Vec<StatusEffect>;
    fn clear_effects(&mut self);
    fn add_effect(&mut self, effect: StatusEffect);

    fn discovered_recipes(&self) -> Vec<RecipeKey>;
    fn discover_recipe(&mut self, key: RecipeKey);

    fn slots(&self, container: Container) -> Vec<Option<ItemStack>>;
    fn clear_container(&mut self, container: Container);
    fn set_slots(&mut self, container: Container, slots: Vec<Option<ItemStack>>);
    fn selected_slot(&self) -> i32;
    fn set_selected_slot(&mut self, slot: i32);
}

/// Work to run against a live entity on its owning thread.
pub type EntityTask = Box<dyn FnOnce(&mut dyn EntityHandle) + Send + 'static>;

/// Resolves entities connected to this node.
#[async_trait]
pub trait EntityDirectory: Send + Sync + 'static {
    /// Runs `task` against the entity with `id` on the thread that owns it.
    ///
    /// Returns `false` without running the task when the entity is not
    /// connected to this node.
    async fn dispatch(&self, id: Uuid, task: EntityTask) -> bool;
}
