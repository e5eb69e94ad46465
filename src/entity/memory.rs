use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Container, EntityDirectory, EntityHandle, EntityTask, ItemStack, RecipeKey, StatusEffect};

const MAIN_SLOTS: usize = 36;
const ARMOR_SLOTS: usize = 4;
const AUXILIARY_SLOTS: usize = 27;

/// Plain in-memory entity, starting from a freshly spawned player's state.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    pub id: Uuid,
    pub air: i32,
    pub fire_ticks: i32,
    pub glowing: bool,
    pub health: f64,
    pub absorption: f64,
    pub level: i32,
    pub exp: f32,
    pub total_experience: i32,
    pub food_level: i32,
    pub exhaustion: f32,
    pub saturation: f32,
    pub effects: Vec<StatusEffect>,
    pub recipes: BTreeSet<RecipeKey>,
    pub main: Vec<Option<ItemStack>>,
    pub armor: Vec<Option<ItemStack>>,
    pub auxiliary: Vec<Option<ItemStack>>,
    pub selected_slot: i32,
}

impl MemoryEntity {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            air: 300,
            fire_ticks: 0,
            glowing: false,
            health: 20.0,
            absorption: 0.0,
            level: 0,
            exp: 0.0,
            total_experience: 0,
            food_level: 20,
            exhaustion: 0.0,
            saturation: 5.0,
            effects: Vec::new(),
            recipes: BTreeSet::new(),
            main: vec![None; MAIN_SLOTS],
            armor: vec![None; ARMOR_SLOTS],
            auxiliary: vec![None; AUXILIARY_SLOTS],
            selected_slot: 0,
        }
    }

    fn container(&self, container: Container) -> &Vec<Option<ItemStack>> {
        match container {
            Container::Main => &self.main,
            Container::Armor => &self.armor,
            Container::Auxiliary => &self.auxiliary,
        }
    }

    fn container_mut(&mut self, container: Container) -> &mut Vec<Option<ItemStack>> {
        match container {
            Container::Main => &mut self.main,
            Container::Armor => &mut self.armor,
            Container::Auxiliary => &mut self.auxiliary,
        }
    }
}

impl EntityHandle for MemoryEntity {
    fn id(&self) -> Uuid {
        self.id
    }

    fn remaining_air(&self) -> i32 {
        self.air
    }

    fn set_remaining_air(&mut self, air: i32) {
        self.air = air;
    }

    fn fire_ticks(&self) -> i32 {
        self.fire_ticks
    }

    fn set_fire_ticks(&mut self, ticks: i32) {
        self.fire_ticks = ticks;
    }

    fn is_glowing(&self) -> bool {
        self.glowing
    }

    fn set_glowing(&mut self, glowing: bool) {
        self.glowing = glowing;
    }

    fn health(&self) -> f64 {
        self.health
    }

    fn set_health(&mut self, health: f64) {
        self.health = health;
    }

    fn absorption(&self) -> f64 {
        self.absorption
    }

    fn set_absorption(&mut self, amount: f64) {
        self.absorption = amount;
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn set_level(&mut self, level: i32) {
        self.level = level;
    }

    fn exp(&self) -> f32 {
        self.exp
    }

    fn set_exp(&mut self, exp: f32) {
        self.exp = exp;
    }

    fn total_experience(&self) -> i32 {
        self.total_experience
    }

    fn set_total_experience(&mut self, total: i32) {
        self.total_experience = total;
    }

    fn food_level(&self) -> i32 {
        self.food_level
    }

    fn set_food_level(&mut self, level: i32) {
        self.food_level = level;
    }

    fn exhaustion(&self) -> f32 {
        self.exhaustion
    }

    fn set_exhaustion(&mut self, exhaustion: f32) {
        self.exhaustion = exhaustion;
    }

    fn saturation(&self) -> f32 {
        self.saturation
    }

    fn set_saturation(&mut self, saturation: f32) {
        self.saturation = saturation;
    }

    fn active_effects(&self) -> Vec<StatusEffect> {
        self.effects.clone()
    }

    fn clear_effects(&mut self) {
        self.effects.clear();
    }

    // One effect per kind; a new effect replaces an active one of the same kind.
    fn add_effect(&mut self, effect: StatusEffect) {
        match effect.kind() {
            Some(kind) => {
                let kind = kind.to_string();
                self.effects.retain(|active| active.kind() != Some(kind.as_str()));
            }
            None => self.effects.retain(|active| active != &effect),
        }
        self.effects.push(effect);
    }

    fn discovered_recipes(&self) -> Vec<RecipeKey> {
        self.recipes.iter().cloned().collect()
    }

    fn discover_recipe(&mut self, key: RecipeKey) {
        self.recipes.insert(key);
    }

    fn slots(&self, container: Container) -> Vec<Option<ItemStack>> {
        self.container(container).clone()
    }

    fn clear_container(&mut self, container: Container) {
        for slot in self.container_mut(container).iter_mut() {
            *slot = None;
        }
    }

    // Keeps the container size; extra slots are dropped, missing ones stay empty.
    fn set_slots(&mut self, container: Container, slots: Vec<Option<ItemStack>>) {
        let target = self.container_mut(container);
        for (index, slot) in target.iter_mut().enumerate() {
            *slot = slots.get(index).cloned().flatten();
        }
    }

    fn selected_slot(&self) -> i32 {
        self.selected_slot
    }

    fn set_selected_slot(&mut self, slot: i32) {
        self.selected_slot = slot;
    }
}

/// Directory of in-memory entities connected to one node.
///
/// Tasks run inline on the calling task while the directory lock is held.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entities: Mutex<HashMap<Uuid, MemoryEntity>>,
    dispatches: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects an entity, replacing any previous one with the same id.
    pub fn connect(&self, entity: MemoryEntity) {
        self.lock().insert(entity.id, entity);
    }

    pub fn disconnect(&self, id: Uuid) -> Option<MemoryEntity> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryEntity> {
        self.lock().get(&id).cloned()
    }

    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut MemoryEntity)) -> bool {
        match self.lock().get_mut(&id) {
            Some(entity) => {
                f(entity);
                true
            }
            None => false,
        }
    }

    /// Number of tasks that ran against a connected entity.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, MemoryEntity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EntityDirectory for MemoryDirectory {
    async fn dispatch(&self, id: Uuid, task: EntityTask) -> bool {
        let mut entities = self.lock();
        match entities.get_mut(&id) {
            Some(entity) => {
                task(entity);
                self.dispatches.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}
