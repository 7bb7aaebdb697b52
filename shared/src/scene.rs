use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    ids::{ComponentId, EntityId, IdAllocator},
    value::{AttributeType, AttributeValue},
};

/// How a scene mutation propagates.
///
/// Every journal entry carries its tag; the sync layer fans out only
/// `Replicate` entries. `LocalOnly` changes stay on this host, and
/// `Disconnected` marks a remote peer's change being applied, so the sync
/// layer does not re-trigger its own fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Replicate,
    LocalOnly,
    Disconnected,
}

/// Entity action execution flags, combinable bitwise.
pub mod execution {
    pub const LOCAL: u8 = 1;
    pub const SERVER: u8 = 2;
    pub const PEERS: u8 = 4;
}

/// Errors from scene mutations. These are reference-class failures: the
/// sync layer logs and skips the offending sub-operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("No entity {id:?} in scene")]
    NoSuchEntity { id: EntityId },

    #[error("Entity {entity:?} has no component {component:?}")]
    NoSuchComponent {
        entity: EntityId,
        component: ComponentId,
    },

    #[error("Component {component:?} of entity {entity:?} has no attribute at index {index}")]
    NoSuchAttribute {
        entity: EntityId,
        component: ComponentId,
        index: u8,
    },

    #[error("Entity id {id:?} is already in use")]
    EntityIdTaken { id: EntityId },

    #[error("Component id {component:?} is already in use on entity {entity:?}")]
    ComponentIdTaken {
        entity: EntityId,
        component: ComponentId,
    },

    #[error("Attribute index {index} is already occupied on component {component:?}")]
    AttributeIndexTaken {
        component: ComponentId,
        index: u8,
    },

    #[error("Attribute at index {index} has type {actual:?}, expected {expected:?}")]
    AttributeTypeMismatch {
        index: u8,
        expected: AttributeType,
        actual: AttributeType,
    },

    #[error("Attribute at index {index} is static and cannot be removed")]
    StaticAttribute { index: u8 },

    #[error("Proposed ids cannot be stored in the authoritative scene")]
    ProposedId,
}

/// A scene mutation notification, drained once per tick by the sync layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    EntityCreated(EntityId),
    EntityRemoved(EntityId),
    ComponentAdded(EntityId, ComponentId),
    ComponentRemoved(EntityId, ComponentId),
    AttributeChanged(EntityId, ComponentId, u8),
    AttributeAdded(EntityId, ComponentId, u8),
    AttributeRemoved(EntityId, ComponentId, u8),
    ActionTriggered {
        entity: EntityId,
        action: String,
        params: Vec<String>,
        execution: u8,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub value: AttributeValue,
    /// Dynamic attributes carry a name on the wire; static ones are known
    /// from the component type.
    pub name: Option<String>,
    pub dynamic: bool,
}

#[derive(Debug, Clone)]
pub struct Component {
    pub id: ComponentId,
    pub type_id: u32,
    pub name: String,
    pub replicated: bool,
    // Slot vector: static attributes occupy the leading indices, dynamic
    // attributes may leave holes after removal.
    attributes: Vec<Option<Attribute>>,
}

impl Component {
    pub fn new(
        id: ComponentId,
        type_id: u32,
        name: String,
        replicated: bool,
        static_attrs: Vec<AttributeValue>,
    ) -> Self {
        let attributes = static_attrs
            .into_iter()
            .map(|value| {
                Some(Attribute {
                    value,
                    name: None,
                    dynamic: false,
                })
            })
            .collect();
        Self {
            id,
            type_id,
            name,
            replicated,
            attributes,
        }
    }

    /// Total slot count, including holes. This is the `N` of the bitmask
    /// encoding.
    pub fn attribute_slots(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute(&self, index: u8) -> Option<&Attribute> {
        self.attributes.get(index as usize).and_then(Option::as_ref)
    }

    pub fn attribute_type(&self, index: u8) -> Option<AttributeType> {
        self.attribute(index).map(|attr| attr.value.type_of())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (u8, &Attribute)> {
        self.attributes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|attr| (index as u8, attr)))
    }

    fn set_value(&mut self, index: u8, value: AttributeValue) -> Result<(), SceneError> {
        let slot = self
            .attributes
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(SceneError::NoSuchAttribute {
                entity: EntityId::Authoritative(0),
                component: self.id,
                index,
            })?;
        let expected = slot.value.type_of();
        let actual = value.type_of();
        if expected != actual {
            return Err(SceneError::AttributeTypeMismatch {
                index,
                expected,
                actual,
            });
        }
        slot.value = value;
        Ok(())
    }

    fn insert_dynamic(
        &mut self,
        index: u8,
        name: String,
        value: AttributeValue,
    ) -> Result<(), SceneError> {
        let slot_index = index as usize;
        if slot_index >= self.attributes.len() {
            self.attributes.resize(slot_index + 1, None);
        }
        if self.attributes[slot_index].is_some() {
            return Err(SceneError::AttributeIndexTaken {
                component: self.id,
                index,
            });
        }
        self.attributes[slot_index] = Some(Attribute {
            value,
            name: Some(name),
            dynamic: true,
        });
        Ok(())
    }

    fn remove_dynamic(&mut self, index: u8) -> Result<(), SceneError> {
        let slot = self
            .attributes
            .get_mut(index as usize)
            .ok_or(SceneError::NoSuchAttribute {
                entity: EntityId::Authoritative(0),
                component: self.id,
                index,
            })?;
        match slot {
            Some(attr) if attr.dynamic => {
                *slot = None;
                Ok(())
            }
            Some(_) => Err(SceneError::StaticAttribute { index }),
            None => Err(SceneError::NoSuchAttribute {
                entity: EntityId::Authoritative(0),
                component: self.id,
                index,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    /// Replicated but never persisted.
    pub temporary: bool,
    /// Never replicated.
    pub local: bool,
    components: BTreeMap<ComponentId, Component>,
    component_ids: IdAllocator,
}

impl Entity {
    fn new(id: EntityId, temporary: bool, local: bool) -> Self {
        Self {
            id,
            temporary,
            local,
            components: BTreeMap::new(),
            component_ids: IdAllocator::new(),
        }
    }

    pub fn component(&self, id: &ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }
}

/// The authoritative entity/component/attribute graph.
///
/// Every mutation takes a [`ChangeType`]; `Replicate` mutations of non-local
/// targets are appended to an internal journal which the sync manager drains
/// once per tick. This is the statically-typed stand-in for signal/slot
/// change notifications.
pub struct Scene {
    entities: BTreeMap<EntityId, Entity>,
    entity_ids: IdAllocator,
    journal: Vec<(SceneEvent, ChangeType)>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            entity_ids: IdAllocator::new(),
            journal: Vec::new(),
        }
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drains all notifications journaled since the last call.
    pub fn take_events(&mut self) -> Vec<(SceneEvent, ChangeType)> {
        std::mem::take(&mut self.journal)
    }

    pub fn allocate_entity_id(&mut self) -> EntityId {
        let entities = &self.entities;
        let value = self
            .entity_ids
            .allocate(|candidate| entities.contains_key(&EntityId::Authoritative(candidate)));
        EntityId::Authoritative(value)
    }

    pub fn create_entity(
        &mut self,
        id: EntityId,
        temporary: bool,
        local: bool,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        if !id.is_authoritative() {
            return Err(SceneError::ProposedId);
        }
        if self.entities.contains_key(&id) {
            return Err(SceneError::EntityIdTaken { id });
        }
        self.entities.insert(id, Entity::new(id, temporary, local));
        if !local {
            self.journal.push((SceneEvent::EntityCreated(id), change));
        }
        Ok(())
    }

    pub fn remove_entity(&mut self, id: EntityId, change: ChangeType) -> Result<(), SceneError> {
        let entity = self
            .entities
            .remove(&id)
            .ok_or(SceneError::NoSuchEntity { id })?;
        if !entity.local {
            self.journal.push((SceneEvent::EntityRemoved(id), change));
        }
        Ok(())
    }

    pub fn allocate_component_id(&mut self, entity: EntityId) -> Result<ComponentId, SceneError> {
        let entity = self
            .entities
            .get_mut(&entity)
            .ok_or(SceneError::NoSuchEntity { id: entity })?;
        let components = &entity.components;
        let value = entity
            .component_ids
            .allocate(|candidate| components.contains_key(&ComponentId::Authoritative(candidate)));
        Ok(ComponentId::Authoritative(value))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_component(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        type_id: u32,
        name: String,
        replicated: bool,
        static_attrs: Vec<AttributeValue>,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        if !component_id.is_authoritative() {
            return Err(SceneError::ProposedId);
        }
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or(SceneError::NoSuchEntity { id: entity_id })?;
        if entity.components.contains_key(&component_id) {
            return Err(SceneError::ComponentIdTaken {
                entity: entity_id,
                component: component_id,
            });
        }
        entity.components.insert(
            component_id,
            Component::new(component_id, type_id, name, replicated, static_attrs),
        );
        if !entity.local && replicated {
            self.journal.push((
                SceneEvent::ComponentAdded(entity_id, component_id),
                change,
            ));
        }
        Ok(())
    }

    pub fn remove_component(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or(SceneError::NoSuchEntity { id: entity_id })?;
        let component =
            entity
                .components
                .remove(&component_id)
                .ok_or(SceneError::NoSuchComponent {
                    entity: entity_id,
                    component: component_id,
                })?;
        if !entity.local && component.replicated {
            self.journal.push((
                SceneEvent::ComponentRemoved(entity_id, component_id),
                change,
            ));
        }
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        value: AttributeValue,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or(SceneError::NoSuchEntity { id: entity_id })?;
        let component =
            entity
                .components
                .get_mut(&component_id)
                .ok_or(SceneError::NoSuchComponent {
                    entity: entity_id,
                    component: component_id,
                })?;
        component.set_value(index, value).map_err(|err| match err {
            SceneError::NoSuchAttribute { .. } => SceneError::NoSuchAttribute {
                entity: entity_id,
                component: component_id,
                index,
            },
            other => other,
        })?;
        if !entity.local && component.replicated {
            self.journal.push((
                SceneEvent::AttributeChanged(entity_id, component_id, index),
                change,
            ));
        }
        Ok(())
    }

    pub fn add_dynamic_attribute(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        name: String,
        value: AttributeValue,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or(SceneError::NoSuchEntity { id: entity_id })?;
        let component =
            entity
                .components
                .get_mut(&component_id)
                .ok_or(SceneError::NoSuchComponent {
                    entity: entity_id,
                    component: component_id,
                })?;
        component.insert_dynamic(index, name, value)?;
        if !entity.local && component.replicated {
            self.journal.push((
                SceneEvent::AttributeAdded(entity_id, component_id, index),
                change,
            ));
        }
        Ok(())
    }

    pub fn remove_attribute(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or(SceneError::NoSuchEntity { id: entity_id })?;
        let component =
            entity
                .components
                .get_mut(&component_id)
                .ok_or(SceneError::NoSuchComponent {
                    entity: entity_id,
                    component: component_id,
                })?;
        component.remove_dynamic(index).map_err(|err| match err {
            SceneError::NoSuchAttribute { .. } => SceneError::NoSuchAttribute {
                entity: entity_id,
                component: component_id,
                index,
            },
            other => other,
        })?;
        if !entity.local && component.replicated {
            self.journal.push((
                SceneEvent::AttributeRemoved(entity_id, component_id, index),
                change,
            ));
        }
        Ok(())
    }

    pub fn trigger_action(
        &mut self,
        entity_id: EntityId,
        action: String,
        params: Vec<String>,
        execution: u8,
        change: ChangeType,
    ) -> Result<(), SceneError> {
        let entity = self
            .entities
            .get(&entity_id)
            .ok_or(SceneError::NoSuchEntity { id: entity_id })?;
        if !entity.local {
            self.journal.push((
                SceneEvent::ActionTriggered {
                    entity: entity_id,
                    action,
                    params,
                    execution,
                },
                change,
            ));
        }
        Ok(())
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
