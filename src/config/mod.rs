pub mod database;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Group, Result, SyncError};
pub use database::DatabaseConfig;

/// Node configuration: where state lives, which groups are persisted and how
/// arrivals wait for a remote write.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub saving: SavingConfig,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!("failed to read '{}': {}", path.display(), err))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().map_err(SyncError::Config)?;
        self.sync.validate().map_err(SyncError::Config)
    }
}

/// Which attribute groups are read from and written to entities.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavingConfig {
    #[serde(alias = "health")]
    pub vitals: bool,
    #[serde(alias = "experience")]
    pub progression: bool,
    #[serde(alias = "food")]
    pub consumption: bool,
    pub effects: bool,
    #[serde(alias = "recipeBook", alias = "recipe_book")]
    pub knowledge: bool,
    pub inventory: bool,
}

impl SavingConfig {
    pub fn all() -> Self {
        Self {
            vitals: true,
            progression: true,
            consumption: true,
            effects: true,
            knowledge: true,
            inventory: true,
        }
    }

    pub fn none() -> Self {
        Self {
            vitals: false,
            progression: false,
            consumption: false,
            effects: false,
            knowledge: false,
            inventory: false,
        }
    }

    /// Exactly the given groups.
    pub fn only(groups: &[Group]) -> Self {
        groups
            .iter()
            .fold(Self::none(), |config, group| config.with(*group, true))
    }

    pub fn with(mut self, group: Group, enabled: bool) -> Self {
        match group {
            Group::Vitals => self.vitals = enabled,
            Group::Progression => self.progression = enabled,
            Group::Consumption => self.consumption = enabled,
            Group::Effects => self.effects = enabled,
            Group::Knowledge => self.knowledge = enabled,
            Group::Inventory => self.inventory = enabled,
        }
        self
    }

    pub fn is_enabled(&self, group: Group) -> bool {
        match group {
            Group::Vitals => self.vitals,
            Group::Progression => self.progression,
            Group::Consumption => self.consumption,
            Group::Effects => self.effects,
            Group::Knowledge => self.knowledge,
            Group::Inventory => self.inventory,
        }
    }

    pub fn enabled_groups(&self) -> impl Iterator<Item = Group> + '_ {
        Group::ALL
            .into_iter()
            .filter(move |group| self.is_enabled(*group))
    }
}

impl Default for SavingConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// Timing of the join wait-and-poll protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between arrival and the first marker read.
    pub initial_delay_ms: u64,
    /// Delay between two marker reads.
    pub poll_interval_ms: u64,
    /// Polling attempts before giving up; `None` polls until the marker flips.
    pub max_attempts: Option<u32>,
    /// Write the `loaded` marker after applying a stored record.
    pub claim_on_load: bool,
}

impl SyncConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be > 0".to_string());
        }

        if self.max_attempts == Some(0) {
            return Err("max_attempts must be > 0 when set".to_string());
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            poll_interval_ms: 1_000,
            max_attempts: Some(30),
            claim_on_load: false,
        }
    }
}
