//! Table layout of `entity_state` and the mapping between its rows and
//! [`StateRecord`]. The statements are plain SQL understood by both MySQL /
//! MariaDB and SQLite.

use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Row};
use uuid::Uuid;

use crate::codec::narrow;
use crate::core::{
    Consumption, InventoryPayload, LastEvent, Progression, Result, StateRecord, SyncError, Vitals,
};

pub const SETUP: &str = include_str!("../../sql/setup.sql");

pub const SELECT_MARKER: &str = "SELECT last_event FROM entity_state WHERE id = ?";

pub const SELECT_RECORD: &str = "SELECT id, air, fire_ticks, glowing, health, absorption, \
     xp_level, xp_progress, xp_total, food_level, food_exhaustion, food_saturation, \
     effects, recipes, inventory, armor, auxiliary, selected_slot, last_event \
     FROM entity_state WHERE id = ?";

pub const REPLACE_RECORD: &str = "REPLACE INTO entity_state (id, air, fire_ticks, glowing, \
     health, absorption, xp_level, xp_progress, xp_total, food_level, food_exhaustion, \
     food_saturation, effects, recipes, inventory, armor, auxiliary, selected_slot, last_event) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub const UPDATE_MARKER: &str = "UPDATE entity_state SET last_event = ? WHERE id = ?";

pub type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Binds every column of `REPLACE_RECORD`, in order.
pub fn bind_record<'q>(query: AnyQuery<'q>, record: &StateRecord) -> AnyQuery<'q> {
    let vitals = record.vitals.as_ref();
    let progression = record.progression.as_ref();
    let consumption = record.consumption.as_ref();
    let inventory = record.inventory.as_ref();

    query
        .bind(record.id.to_string())
        .bind(vitals.map(|v| i64::from(v.air)))
        .bind(vitals.map(|v| i64::from(v.fire_ticks)))
        .bind(vitals.map(|v| i64::from(v.glowing)))
        .bind(vitals.map(|v| v.health))
        .bind(vitals.map(|v| v.absorption))
        .bind(progression.map(|p| i64::from(p.level)))
        .bind(progression.map(|p| p.exp))
        .bind(progression.map(|p| i64::from(p.total_experience)))
        .bind(consumption.map(|c| i64::from(c.food_level)))
        .bind(consumption.map(|c| c.exhaustion))
        .bind(consumption.map(|c| c.saturation))
        .bind(record.effects.clone())
        .bind(record.recipes.clone())
        .bind(inventory.map(|i| i.main.clone()))
        .bind(inventory.map(|i| i.armor.clone()))
        .bind(inventory.map(|i| i.auxiliary.clone()))
        .bind(inventory.map(|i| i64::from(i.selected_slot)))
        .bind(record.last_event.as_column().map(str::to_string))
}

/// Reads a full row. A group is present only when all of its columns are.
pub fn record_from_row(row: &AnyRow) -> Result<StateRecord> {
    let raw_id: String = row.try_get("id")?;
    let id = Uuid::parse_str(raw_id.trim())
        .map_err(|err| SyncError::Operation(format!("invalid entity id '{}': {}", raw_id, err)))?;

    let mut record = StateRecord::new(id);

    record.vitals = match (
        int(row, "air")?,
        int(row, "fire_ticks")?,
        int(row, "glowing")?,
        float(row, "health")?,
        float(row, "absorption")?,
    ) {
        (Some(air), Some(fire_ticks), Some(glowing), Some(health), Some(absorption)) => {
            Some(Vitals {
                air: narrow::to_i32(air),
                fire_ticks: narrow::to_i32(fire_ticks),
                glowing: glowing != 0,
                health,
                absorption,
            })
        }
        _ => None,
    };

    record.progression = match (
        int(row, "xp_level")?,
        float(row, "xp_progress")?,
        int(row, "xp_total")?,
    ) {
        (Some(level), Some(exp), Some(total)) => Some(Progression {
            level: narrow::to_i32(level),
            exp,
            total_experience: narrow::to_i32(total),
        }),
        _ => None,
    };

    record.consumption = match (
        int(row, "food_level")?,
        float(row, "food_exhaustion")?,
        float(row, "food_saturation")?,
    ) {
        (Some(food_level), Some(exhaustion), Some(saturation)) => Some(Consumption {
            food_level: narrow::to_i32(food_level),
            exhaustion,
            saturation,
        }),
        _ => None,
    };

    record.effects = text(row, "effects")?;
    record.recipes = text(row, "recipes")?;

    record.inventory = match (
        text(row, "inventory")?,
        text(row, "armor")?,
        text(row, "auxiliary")?,
        int(row, "selected_slot")?,
    ) {
        (Some(main), Some(armor), Some(auxiliary), Some(slot)) => Some(InventoryPayload {
            main,
            armor,
            auxiliary,
            selected_slot: narrow::to_i32(slot),
        }),
        _ => None,
    };

    record.last_event = marker_from_row(row)?;
    Ok(record)
}

pub fn marker_from_row(row: &AnyRow) -> Result<LastEvent> {
    Ok(LastEvent::from_column(text(row, "last_event")?.as_deref()))
}

fn int(row: &AnyRow, column: &str) -> Result<Option<i64>> {
    Ok(row.try_get(column)?)
}

fn float(row: &AnyRow, column: &str) -> Result<Option<f64>> {
    Ok(row.try_get(column)?)
}

fn text(row: &AnyRow, column: &str) -> Result<Option<String>> {
    Ok(row.try_get(column)?)
}
