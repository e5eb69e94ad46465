//! Mapping between an entity's live attributes and a flat [`StateRecord`].
//!
//! Only the groups enabled in the [`SavingConfig`] are touched in either
//! direction. Structured groups (effects, recipes, inventory containers) are
//! stored as JSON text.

pub mod narrow;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::SavingConfig;
use crate::core::{
    Consumption, Group, InventoryPayload, LastEvent, Progression, Result, StateRecord, SyncError,
    Vitals,
};
use crate::entity::{Container, EntityHandle, ItemStack, RecipeKey, StatusEffect};

/// Reads the enabled groups of `entity` into a record marked `Saved`.
pub fn capture(config: &SavingConfig, entity: &dyn EntityHandle) -> StateRecord {
    let mut record = StateRecord::new(entity.id());

    for group in config.enabled_groups() {
        match group {
            Group::Vitals => {
                record.vitals = Some(Vitals {
                    air: entity.remaining_air(),
                    fire_ticks: entity.fire_ticks(),
                    glowing: entity.is_glowing(),
                    health: entity.health(),
                    absorption: entity.absorption(),
                });
            }
            Group::Progression => {
                record.progression = Some(Progression {
                    level: entity.level(),
                    exp: f64::from(entity.exp()),
                    total_experience: entity.total_experience(),
                });
            }
            Group::Consumption => {
                record.consumption = Some(Consumption {
                    food_level: entity.food_level(),
                    exhaustion: f64::from(entity.exhaustion()),
                    saturation: f64::from(entity.saturation()),
                });
            }
            Group::Effects => {
                record.effects = Some(encode(&entity.active_effects()));
            }
            Group::Knowledge => {
                let recipes: Vec<String> = entity
                    .discovered_recipes()
                    .iter()
                    .map(RecipeKey::to_string)
                    .collect();
                record.recipes = Some(encode(&recipes));
            }
            Group::Inventory => {
                record.inventory = Some(InventoryPayload {
                    main: encode(&entity.slots(Container::Main)),
                    armor: encode(&entity.slots(Container::Armor)),
                    auxiliary: encode(&entity.slots(Container::Auxiliary)),
                    selected_slot: entity.selected_slot(),
                });
            }
        }
    }

    record.last_event = LastEvent::Saved;
    record
}

/// Writes the enabled groups carried by `record` onto `entity`.
///
/// Groups are applied in [`Group::ALL`] order. A group the record does not
/// carry leaves the live attributes alone. A structured group is decoded in
/// full before its destination is cleared; if decoding fails the call stops
/// with [`SyncError::Decode`] and the groups applied before it stay applied.
pub fn apply(config: &SavingConfig, record: &StateRecord, entity: &mut dyn EntityHandle) -> Result<()> {
    for group in config.enabled_groups() {
        match group {
            Group::Vitals => {
                if let Some(vitals) = &record.vitals {
                    entity.set_remaining_air(vitals.air);
                    entity.set_fire_ticks(vitals.fire_ticks);
                    entity.set_glowing(vitals.glowing);
                    entity.set_health(narrow::non_negative(vitals.health));
                    entity.set_absorption(narrow::non_negative(vitals.absorption));
                }
            }
            Group::Progression => {
                if let Some(progression) = &record.progression {
                    entity.set_level(progression.level);
                    entity.set_exp(narrow::fraction(progression.exp));
                    entity.set_total_experience(progression.total_experience);
                }
            }
            Group::Consumption => {
                if let Some(consumption) = &record.consumption {
                    entity.set_food_level(consumption.food_level);
                    entity.set_exhaustion(narrow::to_f32(consumption.exhaustion));
                    entity.set_saturation(narrow::to_f32(consumption.saturation));
                }
            }
            Group::Effects => {
                if let Some(effects) = &record.effects {
                    let effects: Vec<StatusEffect> = decode(Group::Effects, effects)?;
                    entity.clear_effects();
                    for effect in effects {
                        entity.add_effect(effect);
                    }
                }
            }
            Group::Knowledge => {
                if let Some(recipes) = &record.recipes {
                    let keys = decode_recipes(recipes)?;
                    for key in keys {
                        entity.discover_recipe(key);
                    }
                }
            }
            Group::Inventory => {
                if let Some(inventory) = &record.inventory {
                    let main = decode_slots(&inventory.main)?;
                    let armor = decode_slots(&inventory.armor)?;
                    let auxiliary = decode_slots(&inventory.auxiliary)?;

                    for (container, slots) in Container::ALL.into_iter().zip([main, armor, auxiliary]) {
                        entity.clear_container(container);
                        entity.set_slots(container, slots);
                    }
                    entity.set_selected_slot(narrow::hotbar_slot(inventory.selected_slot));
                }
            }
        }
    }

    Ok(())
}

fn encode<T: Serialize + ?Sized>(value: &T) -> String {
    // Maps with string keys and plain values always serialize.
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn decode<T: DeserializeOwned>(group: Group, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|err| SyncError::decode(group, err.to_string()))
}

fn decode_slots(payload: &str) -> Result<Vec<Option<ItemStack>>> {
    decode(Group::Inventory, payload)
}

fn decode_recipes(payload: &str) -> Result<Vec<RecipeKey>> {
    let raw: Vec<String> = decode(Group::Knowledge, payload)?;
    raw.iter()
        .map(|entry| entry.parse().map_err(|err: String| SyncError::decode(Group::Knowledge, err)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::MemoryEntity;
    use uuid::Uuid;

    fn seasoned_entity(id: Uuid) -> MemoryEntity {
        let mut entity = MemoryEntity::new(id);
        entity.air = 120;
        entity.fire_ticks = 40;
        entity.glowing = true;
        entity.health = 10.0;
        entity.absorption = 4.0;
        entity.level = 31;
        entity.exp = 0.25;
        entity.total_experience = 1_500;
        entity.food_level = 14;
        entity.exhaustion = 2.5;
        entity.saturation = 1.0;
        entity.effects = vec![
            StatusEffect::new("speed", 600, 1),
            StatusEffect::new("night_vision", 9_600, 0),
        ];
        entity.recipes.insert("minecraft:torch".parse().unwrap());
        entity.recipes.insert("minecraft:furnace".parse().unwrap());
        entity.main[0] = Some(ItemStack::new("diamond_pickaxe", 1).with("damage", 17));
        entity.main[8] = Some(ItemStack::new("cobblestone", 64));
        entity.armor[3] = Some(ItemStack::new("iron_helmet", 1));
        entity.auxiliary[26] = Some(ItemStack::new("ender_pearl", 16));
        entity.selected_slot = 8;
        entity
    }

    fn configs() -> Vec<SavingConfig> {
        let mut configs = vec![SavingConfig::all(), SavingConfig::none()];
        for group in Group::ALL {
            configs.push(SavingConfig::only(&[group]));
            configs.push(SavingConfig::all().with(group, false));
        }
        configs
    }

    #[test]
    fn test_capture_marks_saved() {
        let entity = seasoned_entity(Uuid::new_v4());
        for config in configs() {
            assert_eq!(capture(&config, &entity).last_event, LastEvent::Saved);
        }
    }

    #[test]
    fn test_capture_leaves_disabled_groups_unset() {
        let entity = seasoned_entity(Uuid::new_v4());
        for config in configs() {
            let record = capture(&config, &entity);
            for group in Group::ALL {
                assert_eq!(record.has_group(group), config.is_enabled(group), "{group}");
            }
        }
    }

    #[test]
    fn test_round_trip_per_config() {
        let id = Uuid::new_v4();
        let source = seasoned_entity(id);

        for config in configs() {
            let record = capture(&config, &source);
            let fresh = MemoryEntity::new(id);
            let mut target = fresh.clone();
            apply(&config, &record, &mut target).unwrap();

            let expect = |group: Group| if config.is_enabled(group) { &source } else { &fresh };

            let vitals = expect(Group::Vitals);
            assert_eq!(
                (target.air, target.fire_ticks, target.glowing, target.health, target.absorption),
                (vitals.air, vitals.fire_ticks, vitals.glowing, vitals.health, vitals.absorption)
            );

            let progression = expect(Group::Progression);
            assert_eq!(
                (target.level, target.exp, target.total_experience),
                (progression.level, progression.exp, progression.total_experience)
            );

            let consumption = expect(Group::Consumption);
            assert_eq!(
                (target.food_level, target.exhaustion, target.saturation),
                (consumption.food_level, consumption.exhaustion, consumption.saturation)
            );

            assert_eq!(target.effects, expect(Group::Effects).effects);
            assert_eq!(target.recipes, expect(Group::Knowledge).recipes);

            let inventory = expect(Group::Inventory);
            assert_eq!(target.main, inventory.main);
            assert_eq!(target.armor, inventory.armor);
            assert_eq!(target.auxiliary, inventory.auxiliary);
            assert_eq!(target.selected_slot, inventory.selected_slot);
        }
    }

    #[test]
    fn test_null_slots_keep_their_position() {
        let source = seasoned_entity(Uuid::new_v4());
        let record = capture(&SavingConfig::only(&[Group::Inventory]), &source);
        let payload = record.inventory.unwrap();

        let slots: Vec<Option<ItemStack>> = serde_json::from_str(&payload.main).unwrap();
        assert_eq!(slots.len(), 36);
        assert!(slots[0].is_some());
        assert!(slots[1..8].iter().all(Option::is_none));
        assert!(slots[8].is_some());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let id = Uuid::new_v4();
        let record = capture(&SavingConfig::all(), &seasoned_entity(id));

        let mut once = MemoryEntity::new(id);
        apply(&SavingConfig::all(), &record, &mut once).unwrap();

        let mut twice = once.clone();
        apply(&SavingConfig::all(), &record, &mut twice).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_clears_stale_slots_and_effects() {
        let id = Uuid::new_v4();
        let record = capture(&SavingConfig::all(), &seasoned_entity(id));

        let mut target = MemoryEntity::new(id);
        target.main[20] = Some(ItemStack::new("dirt", 3));
        target.effects.push(StatusEffect::new("poison", 100, 0));

        apply(&SavingConfig::all(), &record, &mut target).unwrap();

        assert!(target.main[20].is_none());
        assert!(target.effects.iter().all(|e| e.kind() != Some("poison")));
    }

    #[test]
    fn test_absent_group_does_not_overwrite() {
        let id = Uuid::new_v4();
        let mut record = StateRecord::new(id);
        record.last_event = LastEvent::Saved;

        let mut target = seasoned_entity(id);
        let before = target.clone();
        apply(&SavingConfig::all(), &record, &mut target).unwrap();

        assert_eq!(target, before);
    }

    #[test]
    fn test_disabled_group_is_not_applied() {
        let id = Uuid::new_v4();
        let record = capture(&SavingConfig::all(), &seasoned_entity(id));

        let mut target = MemoryEntity::new(id);
        apply(&SavingConfig::all().with(Group::Vitals, false), &record, &mut target).unwrap();

        assert_eq!(target.health, 20.0);
        assert_eq!(target.level, 31);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let id = Uuid::new_v4();
        let mut record = StateRecord::new(id);
        record.vitals = Some(Vitals {
            air: 300,
            fire_ticks: -20,
            glowing: false,
            health: -3.0,
            absorption: f64::NAN,
        });
        record.progression = Some(Progression {
            level: 2,
            exp: 1.7,
            total_experience: 40,
        });
        record.consumption = Some(Consumption {
            food_level: 20,
            exhaustion: 1e300,
            saturation: f64::NEG_INFINITY,
        });
        record.inventory = Some(InventoryPayload {
            main: "[]".to_string(),
            armor: "[]".to_string(),
            auxiliary: "[]".to_string(),
            selected_slot: 42,
        });

        let mut target = MemoryEntity::new(id);
        apply(&SavingConfig::all(), &record, &mut target).unwrap();

        assert_eq!(target.fire_ticks, -20);
        assert_eq!(target.health, 0.0);
        assert_eq!(target.absorption, 0.0);
        assert_eq!(target.exp, 1.0);
        assert_eq!(target.exhaustion, f32::MAX);
        assert_eq!(target.saturation, f32::MIN);
        assert_eq!(target.selected_slot, 8);
    }

    #[test]
    fn test_malformed_group_is_fail_partial() {
        let id = Uuid::new_v4();
        let mut record = capture(&SavingConfig::all(), &seasoned_entity(id));
        record.recipes = Some(r#"["minecraft:torch", "Not A Key"]"#.to_string());

        let mut target = MemoryEntity::new(id);
        let err = apply(&SavingConfig::all(), &record, &mut target).unwrap_err();

        assert!(matches!(err, SyncError::Decode { group: Group::Knowledge, .. }));
        // applied before the failure
        assert_eq!(target.health, 10.0);
        assert_eq!(target.effects.len(), 2);
        // not reached
        assert!(target.recipes.is_empty());
        assert!(target.main.iter().all(Option::is_none));
    }

    #[test]
    fn test_malformed_container_leaves_inventory_untouched() {
        let id = Uuid::new_v4();
        let mut record = capture(&SavingConfig::only(&[Group::Inventory]), &seasoned_entity(id));
        if let Some(inventory) = record.inventory.as_mut() {
            inventory.auxiliary = "{not json".to_string();
        }

        let mut target = MemoryEntity::new(id);
        target.main[5] = Some(ItemStack::new("bread", 2));

        let err = apply(&SavingConfig::all(), &record, &mut target).unwrap_err();
        assert!(matches!(err, SyncError::Decode { group: Group::Inventory, .. }));
        assert_eq!(target.main[5], Some(ItemStack::new("bread", 2)));
    }
}
