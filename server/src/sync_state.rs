use std::collections::{BTreeMap, VecDeque};

use scenesync_shared::{ComponentId, EntityId, Transform};

/// Bitset over attribute slot indices, one bit per pending edit.
#[derive(Debug, Clone, Default)]
pub struct AttributeDirtyMask {
    bits: Vec<u64>,
}

impl AttributeDirtyMask {
    pub fn set(&mut self, index: u8) {
        let word = index as usize / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << (index as usize % 64);
    }

    pub fn clear(&mut self, index: u8) {
        let word = index as usize / 64;
        if let Some(bits) = self.bits.get_mut(word) {
            *bits &= !(1 << (index as usize % 64));
        }
    }

    pub fn is_set(&self, index: u8) -> bool {
        let word = index as usize / 64;
        self.bits
            .get(word)
            .map(|bits| bits & (1 << (index as usize % 64)) != 0)
            .unwrap_or(false)
    }

    pub fn any(&self) -> bool {
        self.bits.iter().any(|bits| *bits != 0)
    }

    pub fn clear_all(&mut self) {
        self.bits.clear();
    }

    /// Returns the set indices in ascending order and clears the mask.
    pub fn take_indices(&mut self) -> Vec<u8> {
        let mut indices = Vec::new();
        for (word, bits) in self.bits.iter().enumerate() {
            let mut bits = *bits;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                indices.push((word * 64 + bit) as u8);
                bits &= bits - 1;
            }
        }
        self.bits.clear();
        indices
    }
}

/// Pending replication work for one component, scoped to one connection.
#[derive(Debug, Clone, Default)]
pub struct ComponentSyncState {
    pub is_new: bool,
    pub removed: bool,
    pub in_queue: bool,
    pub dirty_attributes: AttributeDirtyMask,
    /// Slot index → true for a pending attribute creation, false for a
    /// pending removal.
    pub new_and_removed_attributes: BTreeMap<u8, bool>,
}

impl ComponentSyncState {
    fn mark_processed(&mut self) {
        self.is_new = false;
        self.removed = false;
        self.dirty_attributes.clear_all();
        self.new_and_removed_attributes.clear();
    }

    pub fn has_pending(&self) -> bool {
        self.is_new
            || self.removed
            || self.dirty_attributes.any()
            || !self.new_and_removed_attributes.is_empty()
    }
}

/// Pending replication work for one entity, scoped to one connection.
#[derive(Debug, Clone, Default)]
pub struct EntitySyncState {
    pub is_new: bool,
    pub removed: bool,
    pub in_queue: bool,
    /// Last transform flushed to this connection, for edit throttling.
    pub sent_transform: Option<Transform>,
    components: BTreeMap<ComponentId, ComponentSyncState>,
    dirty_components: VecDeque<ComponentId>,
}

impl EntitySyncState {
    pub fn component_state(&self, id: &ComponentId) -> Option<&ComponentSyncState> {
        self.components.get(id)
    }

    pub fn component_state_mut(&mut self, id: &ComponentId) -> &mut ComponentSyncState {
        self.components.entry(*id).or_default()
    }

    pub fn remove_component_state(&mut self, id: &ComponentId) {
        self.components.remove(id);
    }

    /// Queues the component for the next drain unless it already holds a
    /// queue slot.
    pub fn enqueue_component(&mut self, id: ComponentId) {
        let state = self.components.entry(id).or_default();
        if !state.in_queue {
            state.in_queue = true;
            self.dirty_components.push_back(id);
        }
    }

    pub fn pop_dirty_component(&mut self) -> Option<ComponentId> {
        let id = self.dirty_components.pop_front()?;
        if let Some(state) = self.components.get_mut(&id) {
            state.in_queue = false;
        }
        Some(id)
    }

    /// Marks the whole entity as flushed: clears creation/removal flags and
    /// every component's pending work, so nothing recorded so far will be
    /// sent again.
    pub fn mark_processed(&mut self) {
        self.is_new = false;
        self.removed = false;
        while let Some(id) = self.dirty_components.pop_front() {
            if let Some(state) = self.components.get_mut(&id) {
                state.in_queue = false;
            }
        }
        for state in self.components.values_mut() {
            state.mark_processed();
        }
    }

    pub fn has_queued_components(&self) -> bool {
        !self.dirty_components.is_empty()
    }
}

/// Per-connection mirror of what that connection still needs to receive:
/// dirty entities in enqueue order, each with its dirty components and
/// attribute-level pending work.
///
/// An entity or component holds at most one queue slot at a time; the
/// `in_queue` flags guard re-enqueueing. State entries are created lazily by
/// the first dirty mark and destroyed when a removal has been flushed, or
/// immediately when a never-sent creation is cancelled.
#[derive(Default)]
pub struct SceneSyncState {
    entities: BTreeMap<EntityId, EntitySyncState>,
    dirty_entities: VecDeque<EntityId>,
}

impl SceneSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.dirty_entities.is_empty()
    }

    pub fn entity_state(&self, id: &EntityId) -> Option<&EntitySyncState> {
        self.entities.get(id)
    }

    pub fn entity_state_mut(&mut self, id: &EntityId) -> Option<&mut EntitySyncState> {
        self.entities.get_mut(id)
    }

    pub fn remove_entity_state(&mut self, id: &EntityId) {
        self.entities.remove(id);
    }

    pub fn enqueue_entity(&mut self, id: EntityId) {
        let state = self.entities.entry(id).or_default();
        if !state.in_queue {
            state.in_queue = true;
            self.dirty_entities.push_back(id);
        }
    }

    pub fn pop_dirty_entity(&mut self) -> Option<EntityId> {
        let id = self.dirty_entities.pop_front()?;
        if let Some(state) = self.entities.get_mut(&id) {
            state.in_queue = false;
        }
        Some(id)
    }

    // Dirty-mark API, driven by the sync manager's fan-out.

    pub fn mark_entity_new(&mut self, id: EntityId) {
        let state = self.entities.entry(id).or_default();
        state.is_new = true;
        self.enqueue_entity(id);
    }

    pub fn mark_entity_removed(&mut self, id: EntityId) {
        match self.entities.get_mut(&id) {
            // Created and deleted before the creation was ever flushed:
            // collapse to untracked, no message goes out.
            Some(state) if state.is_new => {
                self.entities.remove(&id);
            }
            Some(state) => {
                state.removed = true;
                self.enqueue_entity(id);
            }
            None => {
                let state = self.entities.entry(id).or_default();
                state.removed = true;
                self.enqueue_entity(id);
            }
        }
    }

    pub fn mark_component_new(&mut self, entity: EntityId, component: ComponentId) {
        let entity_state = self.entities.entry(entity).or_default();
        let state = entity_state.component_state_mut(&component);
        state.is_new = true;
        state.removed = false;
        entity_state.enqueue_component(component);
        self.enqueue_entity(entity);
    }

    pub fn mark_component_removed(&mut self, entity: EntityId, component: ComponentId) {
        let entity_state = self.entities.entry(entity).or_default();
        match entity_state.component_state(&component) {
            // Never flushed: untrack, send nothing.
            Some(state) if state.is_new => {
                entity_state.remove_component_state(&component);
                return;
            }
            _ => {}
        }
        let state = entity_state.component_state_mut(&component);
        state.removed = true;
        state.dirty_attributes.clear_all();
        state.new_and_removed_attributes.clear();
        entity_state.enqueue_component(component);
        self.enqueue_entity(entity);
    }

    pub fn mark_attribute_dirty(&mut self, entity: EntityId, component: ComponentId, index: u8) {
        let entity_state = self.entities.entry(entity).or_default();
        let state = entity_state.component_state_mut(&component);
        state.dirty_attributes.set(index);
        entity_state.enqueue_component(component);
        self.enqueue_entity(entity);
    }

    pub fn mark_attribute_created(&mut self, entity: EntityId, component: ComponentId, index: u8) {
        let entity_state = self.entities.entry(entity).or_default();
        let state = entity_state.component_state_mut(&component);
        state.new_and_removed_attributes.insert(index, true);
        entity_state.enqueue_component(component);
        self.enqueue_entity(entity);
    }

    pub fn mark_attribute_removed(&mut self, entity: EntityId, component: ComponentId, index: u8) {
        let entity_state = self.entities.entry(entity).or_default();
        let state = entity_state.component_state_mut(&component);
        // A creation that was never flushed cancels out entirely.
        if state.new_and_removed_attributes.get(&index) == Some(&true) {
            state.new_and_removed_attributes.remove(&index);
            state.dirty_attributes.clear(index);
            return;
        }
        state.new_and_removed_attributes.insert(index, false);
        state.dirty_attributes.clear(index);
        entity_state.enqueue_component(component);
        self.enqueue_entity(entity);
    }

    // Mark-processed API, used for the no-echo guarantee: after applying a
    // connection's own mutation, its state is updated as if the change had
    // already been flushed to it.

    pub fn mark_entity_processed(&mut self, id: EntityId) {
        let state = self.entities.entry(id).or_default();
        state.mark_processed();
    }

    pub fn mark_component_processed(&mut self, entity: EntityId, component: ComponentId) {
        if let Some(entity_state) = self.entities.get_mut(&entity) {
            let state = entity_state.component_state_mut(&component);
            state.mark_processed();
        }
    }

    pub fn mark_attribute_processed(&mut self, entity: EntityId, component: ComponentId, index: u8) {
        if let Some(entity_state) = self.entities.get_mut(&entity) {
            let state = entity_state.component_state_mut(&component);
            state.dirty_attributes.clear(index);
            state.new_and_removed_attributes.remove(&index);
        }
    }

    /// Drops everything, used when the manager is re-bound to a new scene.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.dirty_entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SceneSyncState;
    use scenesync_shared::{ComponentId, EntityId};

    const ENTITY: EntityId = EntityId::Authoritative(1);
    const COMPONENT: ComponentId = ComponentId::Authoritative(1);

    #[test]
    fn entity_holds_one_queue_slot() {
        let mut state = SceneSyncState::new();
        state.mark_entity_new(ENTITY);
        state.mark_attribute_dirty(ENTITY, COMPONENT, 0);
        state.mark_attribute_dirty(ENTITY, COMPONENT, 1);
        assert_eq!(state.pop_dirty_entity(), Some(ENTITY));
        assert_eq!(state.pop_dirty_entity(), None);
    }

    #[test]
    fn create_then_remove_before_flush_is_untracked() {
        let mut state = SceneSyncState::new();
        state.mark_entity_new(ENTITY);
        state.mark_entity_removed(ENTITY);
        assert!(state.entity_state(&ENTITY).is_none());
    }

    #[test]
    fn component_create_then_remove_collapses() {
        let mut state = SceneSyncState::new();
        state.mark_component_new(ENTITY, COMPONENT);
        state.mark_component_removed(ENTITY, COMPONENT);
        let entity_state = state.entity_state(&ENTITY).unwrap();
        assert!(entity_state.component_state(&COMPONENT).is_none());
    }

    #[test]
    fn attribute_create_then_remove_cancels() {
        let mut state = SceneSyncState::new();
        state.mark_attribute_created(ENTITY, COMPONENT, 3);
        state.mark_attribute_removed(ENTITY, COMPONENT, 3);
        let component_state = state
            .entity_state(&ENTITY)
            .unwrap()
            .component_state(&COMPONENT)
            .unwrap();
        assert!(component_state.new_and_removed_attributes.is_empty());
        assert!(!component_state.dirty_attributes.any());
    }

    #[test]
    fn mark_processed_clears_pending_work() {
        let mut state = SceneSyncState::new();
        state.mark_entity_new(ENTITY);
        state.mark_attribute_dirty(ENTITY, COMPONENT, 2);
        state.mark_entity_processed(ENTITY);
        let entity_state = state.entity_state(&ENTITY).unwrap();
        assert!(!entity_state.is_new);
        assert!(!entity_state
            .component_state(&COMPONENT)
            .unwrap()
            .has_pending());
    }

    #[test]
    fn removal_of_flushed_entity_is_queued() {
        let mut state = SceneSyncState::new();
        state.mark_entity_new(ENTITY);
        state.mark_entity_processed(ENTITY);
        state.mark_entity_removed(ENTITY);
        let entity_state = state.entity_state(&ENTITY).unwrap();
        assert!(entity_state.removed);
        assert!(!entity_state.is_new);
    }
}
