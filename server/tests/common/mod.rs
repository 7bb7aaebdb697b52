//! Shared harness for the sync manager integration tests: an in-memory
//! transport that records outbound frames, and a minimal client-side scene
//! mirror that applies them.
use std::collections::BTreeMap;

use scenesync_server::shared::{
    AttributeValue, ComponentBlock, ComponentId, EntityId, Scene, SyncMessage,
};
use scenesync_server::{
    ConnectionHandle, SyncManager, Transport, TransportEvent,
};

#[derive(Default)]
pub struct MemoryTransport {
    pub sent: Vec<(ConnectionHandle, Vec<u8>)>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, connection: ConnectionHandle, payload: &[u8]) {
        self.sent.push((connection, payload.to_vec()));
    }
}

impl MemoryTransport {
    /// Removes and returns every frame queued for one connection, in send
    /// order.
    pub fn take_for(&mut self, connection: ConnectionHandle) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        self.sent.retain(|(handle, payload)| {
            if *handle == connection {
                frames.push(payload.clone());
                false
            } else {
                true
            }
        });
        frames
    }
}

/// Pushes a Connected event, ticks, and authenticates the connection, the
/// way a login module would.
pub fn connect_and_authenticate(
    manager: &mut SyncManager,
    scene: &mut Scene,
    transport: &mut MemoryTransport,
    handle: ConnectionHandle,
) {
    manager.transport_events().push(TransportEvent::Connected(handle));
    manager.tick(scene, transport);
    assert!(manager.authenticate_connection(handle, scene));
}

#[derive(Default)]
pub struct RemoteComponent {
    pub attributes: BTreeMap<u8, AttributeValue>,
}

impl RemoteComponent {
    fn slots(&self) -> usize {
        self.attributes
            .keys()
            .next_back()
            .map(|index| *index as usize + 1)
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct RemoteEntity {
    pub components: BTreeMap<ComponentId, RemoteComponent>,
}

/// A client's view of the scene, rebuilt purely from received frames.
#[derive(Default)]
pub struct RemoteView {
    pub entities: BTreeMap<EntityId, RemoteEntity>,
}

impl RemoteView {
    pub fn apply_all(&mut self, frames: &[Vec<u8>]) {
        for frame in frames {
            self.apply(frame);
        }
    }

    pub fn apply(&mut self, frame: &[u8]) {
        let message = SyncMessage::from_frame(frame).expect("undecodable frame");
        match message {
            SyncMessage::CreateEntity {
                entity_id,
                components,
                ..
            } => {
                let entity = self.entities.entry(entity_id).or_default();
                for block in components {
                    Self::insert_block(entity, block);
                }
            }
            SyncMessage::CreateComponents {
                entity_id,
                components,
                ..
            } => {
                let entity = self.entities.get_mut(&entity_id).expect("unknown entity");
                for block in components {
                    Self::insert_block(entity, block);
                }
            }
            SyncMessage::CreateAttributes {
                entity_id,
                attributes,
                ..
            } => {
                let entity = self.entities.get_mut(&entity_id).expect("unknown entity");
                for attr in attributes {
                    let component = entity
                        .components
                        .get_mut(&attr.component_id)
                        .expect("unknown component");
                    component.attributes.insert(attr.index, attr.value);
                }
            }
            SyncMessage::EditAttributes {
                entity_id,
                components,
                ..
            } => {
                let entity = self.entities.get_mut(&entity_id).expect("unknown entity");
                for edit in components {
                    let component = entity
                        .components
                        .get_mut(&edit.component_id)
                        .expect("unknown component");
                    let slots = component.slots();
                    let changes = edit
                        .decode_with(slots, |index| {
                            component.attributes.get(&index).map(|value| value.type_of())
                        })
                        .expect("undecodable edit payload");
                    for (index, value) in changes {
                        component.attributes.insert(index, value);
                    }
                }
            }
            SyncMessage::RemoveAttributes {
                entity_id,
                attributes,
                ..
            } => {
                let entity = self.entities.get_mut(&entity_id).expect("unknown entity");
                for (component_id, index) in attributes {
                    if let Some(component) = entity.components.get_mut(&component_id) {
                        component.attributes.remove(&index);
                    }
                }
            }
            SyncMessage::RemoveComponents {
                entity_id,
                component_ids,
                ..
            } => {
                let entity = self.entities.get_mut(&entity_id).expect("unknown entity");
                for component_id in component_ids {
                    entity.components.remove(&component_id);
                }
            }
            SyncMessage::RemoveEntity { entity_id, .. } => {
                self.entities.remove(&entity_id);
            }
            SyncMessage::CreateEntityReply { .. }
            | SyncMessage::CreateComponentsReply { .. }
            | SyncMessage::EntityAction { .. } => {}
        }
    }

    fn insert_block(entity: &mut RemoteEntity, block: ComponentBlock) {
        let dump = block.attrs.expect("component block with unknown types");
        let mut component = RemoteComponent::default();
        for (index, value) in dump.static_attrs.into_iter().enumerate() {
            component.attributes.insert(index as u8, value);
        }
        for attr in dump.dynamic_attrs {
            component.attributes.insert(attr.index, attr.value);
        }
        entity.components.insert(block.component_id, component);
    }

    /// Checks that this view holds exactly the replicated content of the
    /// authoritative scene.
    pub fn assert_matches(&self, scene: &Scene) {
        let replicated: Vec<&scenesync_server::shared::Entity> =
            scene.entities().filter(|entity| !entity.local).collect();
        assert_eq!(self.entities.len(), replicated.len());
        for entity in replicated {
            let remote = self
                .entities
                .get(&entity.id)
                .unwrap_or_else(|| panic!("entity {:?} missing from remote view", entity.id));
            let components: Vec<_> = entity
                .components()
                .filter(|component| component.replicated)
                .collect();
            assert_eq!(remote.components.len(), components.len());
            for component in components {
                let remote_component = remote
                    .components
                    .get(&component.id)
                    .unwrap_or_else(|| panic!("component {:?} missing", component.id));
                for (index, attr) in component.attributes() {
                    assert_eq!(
                        remote_component.attributes.get(&index),
                        Some(&attr.value),
                        "attribute {index} of component {:?} diverged",
                        component.id
                    );
                }
            }
        }
    }
}
