use std::collections::BTreeMap;

use log::{info, trace, warn};

use scenesync_shared::{
    execution, AttributeDump, AttributeValue, BitCounter, ChangeType, Component, ComponentBlock,
    ComponentEdit, ComponentId, ComponentIdRewrite, DynamicAttribute, Entity, EntityId,
    NewAttribute, Scene, SceneEvent, Serde, SyncMessage, Transform, DEFAULT_SCENE_ID,
};

use crate::{
    connection::{Connection, ConnectionState},
    error::ProtocolError,
    sync_state::SceneSyncState,
    transport::{ConnectionHandle, Transport, TransportEvent, TransportEventQueue},
};

/// Encoded attribute blocks larger than this are rejected instead of sent.
const MAX_ATTRIBUTE_BLOCK_BYTES: usize = 64 * 1024;

/// Transform edits within this distance of the last flushed transform are
/// elided.
const TRANSFORM_EPSILON: f32 = 1e-4;

/// Tunables for the sync manager.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Seconds between outbound flush ticks.
    pub update_period: f32,
}

impl SyncConfig {
    /// Allow max 100 updates per second.
    pub fn new(update_period: f32) -> Self {
        Self {
            update_period: update_period.max(0.01),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(0.04)
    }
}

/// Events surfaced to the embedding application after each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(ConnectionHandle),
    Disconnected(ConnectionHandle),
    /// The connection sent a malformed frame and has been moved to
    /// `Disconnecting`; the registry should force-close it.
    ProtocolViolation {
        connection: ConnectionHandle,
        error: ProtocolError,
    },
    /// An entity action with the server execution bit, for the application
    /// to carry out.
    EntityAction {
        connection: ConnectionHandle,
        entity: EntityId,
        action: String,
        params: Vec<String>,
        execution: u8,
    },
}

/// Orchestrates replication: fans authoritative scene changes into every
/// connection's sync state, drains those states through the wire codec on a
/// fixed tick, and applies validated inbound mutations back onto the scene
/// with creation id reconciliation.
pub struct SyncManager {
    config: SyncConfig,
    update_acc: f32,
    connections: BTreeMap<ConnectionHandle, Connection>,
    transport_events: TransportEventQueue,
    events: Vec<ServerEvent>,
}

impl SyncManager {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            update_acc: 0.0,
            connections: BTreeMap::new(),
            transport_events: TransportEventQueue::new(),
            events: Vec::new(),
        }
    }

    /// Handle for transport workers to push Connected/Disconnected/Data
    /// events into. Cloning is cheap; all clones feed the same queue.
    pub fn transport_events(&self) -> TransportEventQueue {
        self.transport_events.clone()
    }

    pub fn connection_state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.connections.get(&handle).map(Connection::state)
    }

    /// Accepts a login for a connection awaiting authentication: binds a
    /// fresh sync state and marks every replicated entity for the initial
    /// full sync. Login itself is owned by the embedding application.
    pub fn authenticate_connection(&mut self, handle: ConnectionHandle, scene: &Scene) -> bool {
        let Some(connection) = self.connections.get_mut(&handle) else {
            return false;
        };
        if !connection.authenticate() {
            return false;
        }
        if let Some(state) = connection.sync_state.as_mut() {
            for entity in scene.entities() {
                if entity.local {
                    continue;
                }
                state.mark_entity_new(entity.id);
            }
        }
        info!("connection {handle}: authenticated, initial sync queued");
        true
    }

    /// Server-side kick. The transport is expected to observe the close and
    /// deliver a Disconnected event, which removes the connection.
    pub fn disconnect_connection(&mut self, handle: ConnectionHandle) {
        if let Some(connection) = self.connections.get_mut(&handle) {
            connection.begin_disconnect();
        }
    }

    /// Re-binds the manager to a (new) scene: every authenticated
    /// connection's state is cleared and rebuilt as a full initial sync.
    pub fn rebind_scene(&mut self, scene: &Scene) {
        for connection in self.connections.values_mut() {
            let Some(state) = connection.sync_state.as_mut() else {
                continue;
            };
            state.clear();
            for entity in scene.entities() {
                if entity.local {
                    continue;
                }
                state.mark_entity_new(entity.id);
            }
        }
    }

    /// Accumulates frame time and runs a tick once per update period.
    pub fn update(
        &mut self,
        frametime: f32,
        scene: &mut Scene,
        transport: &mut dyn Transport,
    ) -> Vec<ServerEvent> {
        self.update_acc += frametime;
        if self.update_acc < self.config.update_period {
            return Vec::new();
        }
        self.update_acc %= self.config.update_period;
        self.tick(scene, transport)
    }

    /// One full tick: drain the transport queue completely, fan journaled
    /// scene changes into every connection's sync state, then flush each
    /// authenticated connection.
    pub fn tick(&mut self, scene: &mut Scene, transport: &mut dyn Transport) -> Vec<ServerEvent> {
        for event in self.transport_events.drain() {
            match event {
                TransportEvent::Connected(handle) => {
                    let mut connection = Connection::new(handle);
                    connection.on_connected();
                    self.connections.insert(handle, connection);
                    self.events.push(ServerEvent::Connected(handle));
                    info!("connection {handle}: connected, awaiting authentication");
                }
                TransportEvent::Disconnected(handle) => {
                    if let Some(mut connection) = self.connections.remove(&handle) {
                        connection.begin_disconnect();
                        connection.remove();
                        self.events.push(ServerEvent::Disconnected(handle));
                        info!("connection {handle}: removed");
                    }
                }
                TransportEvent::Data(handle, frame) => {
                    let alive = matches!(
                        self.connection_state(handle),
                        Some(ConnectionState::Authenticating | ConnectionState::Authenticated)
                    );
                    if !alive {
                        continue;
                    }
                    if let Err(err) = self.handle_frame(handle, &frame, scene, transport) {
                        warn!("connection {handle}: fatal protocol error: {err}");
                        if let Some(connection) = self.connections.get_mut(&handle) {
                            connection.begin_disconnect();
                        }
                        self.events.push(ServerEvent::ProtocolViolation {
                            connection: handle,
                            error: err,
                        });
                    }
                }
            }
        }

        for (event, change) in scene.take_events() {
            if change == ChangeType::Replicate {
                self.fan_out(&event, transport);
            }
        }

        let handles: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_authenticated())
            .map(|(handle, _)| *handle)
            .collect();
        for handle in handles {
            let Some(connection) = self.connections.get_mut(&handle) else {
                continue;
            };
            let Some(state) = connection.sync_state.as_mut() else {
                continue;
            };
            if let Err(err) = flush_state(handle, state, scene, transport) {
                warn!("connection {handle}: outbound flush failed: {err}");
                connection.begin_disconnect();
                self.events.push(ServerEvent::ProtocolViolation {
                    connection: handle,
                    error: err,
                });
            }
        }

        std::mem::take(&mut self.events)
    }

    // Fan-out of one journaled scene change into every connection's sync
    // state. Peer-targeted entity actions are forwarded immediately instead
    // of being queued.
    fn fan_out(&mut self, event: &SceneEvent, transport: &mut dyn Transport) {
        if let SceneEvent::ActionTriggered {
            entity,
            action,
            params,
            execution: exec_bits,
        } = event
        {
            if exec_bits & execution::PEERS != 0 {
                let frame = SyncMessage::EntityAction {
                    entity_id: *entity,
                    action: action.clone(),
                    execution: *exec_bits,
                    params: params.clone(),
                }
                .to_frame();
                for connection in self.connections.values() {
                    if connection.is_authenticated() {
                        transport.send(connection.handle, &frame);
                    }
                }
            }
            return;
        }
        self.apply_event_to_states(event);
    }

    fn apply_event_to_states(&mut self, event: &SceneEvent) {
        for connection in self.connections.values_mut() {
            let Some(state) = connection.sync_state.as_mut() else {
                continue;
            };
            match event {
                SceneEvent::EntityCreated(id) => state.mark_entity_new(*id),
                SceneEvent::EntityRemoved(id) => state.mark_entity_removed(*id),
                SceneEvent::ComponentAdded(entity, component) => {
                    state.mark_component_new(*entity, *component)
                }
                SceneEvent::ComponentRemoved(entity, component) => {
                    state.mark_component_removed(*entity, *component)
                }
                SceneEvent::AttributeChanged(entity, component, index) => {
                    state.mark_attribute_dirty(*entity, *component, *index)
                }
                SceneEvent::AttributeAdded(entity, component, index) => {
                    state.mark_attribute_created(*entity, *component, *index)
                }
                SceneEvent::AttributeRemoved(entity, component, index) => {
                    state.mark_attribute_removed(*entity, *component, *index)
                }
                SceneEvent::ActionTriggered { .. } => {}
            }
        }
    }

    fn origin_state_mut(&mut self, handle: ConnectionHandle) -> Option<&mut SceneSyncState> {
        self.connections
            .get_mut(&handle)
            .and_then(|connection| connection.sync_state.as_mut())
    }

    // Inbound dispatch. The origin handle is threaded explicitly through
    // every handler; there is no ambient "current sender".
    fn handle_frame(
        &mut self,
        origin: ConnectionHandle,
        frame: &[u8],
        scene: &mut Scene,
        transport: &mut dyn Transport,
    ) -> Result<(), ProtocolError> {
        let message = SyncMessage::from_frame(frame)?;
        trace!("connection {origin}: received message id {}", message.message_id());

        // Unauthenticated connections may trigger nothing except their own
        // login, which is handled outside this module. Drop silently.
        let authenticated = self
            .connections
            .get(&origin)
            .map(Connection::is_authenticated)
            .unwrap_or(false);
        if !authenticated {
            trace!("connection {origin}: dropping message from unauthenticated sender");
            return Ok(());
        }

        match message {
            SyncMessage::CreateEntity {
                scene_id,
                entity_id,
                temporary,
                components,
            } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_create_entity(
                        origin, scene, transport, entity_id, temporary, components,
                    );
                }
            }
            SyncMessage::CreateComponents {
                scene_id,
                entity_id,
                components,
            } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_create_components(origin, scene, transport, entity_id, components);
                }
            }
            SyncMessage::CreateAttributes {
                scene_id,
                entity_id,
                attributes,
            } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_create_attributes(origin, scene, entity_id, attributes);
                }
            }
            SyncMessage::EditAttributes {
                scene_id,
                entity_id,
                components,
            } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_edit_attributes(origin, scene, entity_id, components);
                }
            }
            SyncMessage::RemoveAttributes {
                scene_id,
                entity_id,
                attributes,
            } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_remove_attributes(origin, scene, entity_id, attributes);
                }
            }
            SyncMessage::RemoveComponents {
                scene_id,
                entity_id,
                component_ids,
            } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_remove_components(origin, scene, entity_id, component_ids);
                }
            }
            SyncMessage::RemoveEntity { scene_id, entity_id } => {
                if check_scene_id(origin, scene_id) {
                    self.handle_remove_entity(origin, scene, entity_id);
                }
            }
            SyncMessage::EntityAction {
                entity_id,
                action,
                execution: exec_bits,
                params,
            } => {
                self.handle_entity_action(origin, scene, transport, entity_id, action, exec_bits, params);
            }
            SyncMessage::CreateEntityReply { .. } | SyncMessage::CreateComponentsReply { .. } => {
                warn!("connection {origin}: client-only reply message received, ignoring");
            }
        }
        Ok(())
    }

    fn handle_create_entity(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        transport: &mut dyn Transport,
        proposed_id: EntityId,
        temporary: bool,
        components: Vec<ComponentBlock>,
    ) {
        // The sender's proposal is never used: the scene-owned generator
        // always allocates the authoritative id.
        let entity_id = scene.allocate_entity_id();
        if let Err(err) = scene.create_entity(entity_id, temporary, false, ChangeType::Disconnected)
        {
            warn!("connection {origin}: CreateEntity failed: {err}");
            return;
        }

        let mut rewrites = Vec::new();
        for block in components {
            let ComponentBlock {
                component_id: proposed_component,
                type_id,
                name,
                attrs,
            } = block;
            let Some(dump) = attrs else {
                warn!("connection {origin}: skipping component block with unrecognized attribute types");
                continue;
            };
            let Ok(component_id) = scene.allocate_component_id(entity_id) else {
                continue;
            };
            if let Err(err) = scene.add_component(
                entity_id,
                component_id,
                type_id,
                name,
                true,
                dump.static_attrs,
                ChangeType::Disconnected,
            ) {
                warn!("connection {origin}: skipping component: {err}");
                continue;
            }
            for attr in dump.dynamic_attrs {
                if let Err(err) = scene.add_dynamic_attribute(
                    entity_id,
                    component_id,
                    attr.index,
                    attr.name,
                    attr.value,
                    ChangeType::Disconnected,
                ) {
                    warn!("connection {origin}: skipping dynamic attribute: {err}");
                }
            }
            rewrites.push(ComponentIdRewrite {
                proposed: proposed_component,
                authoritative: component_id,
            });
        }

        // Fan the create out to every connection as a replicated change,
        // then mark the origin's state processed so the create is not
        // echoed back to its author.
        self.apply_event_to_states(&SceneEvent::EntityCreated(entity_id));
        if let Some(state) = self.origin_state_mut(origin) {
            state.mark_entity_processed(entity_id);
        }

        info!(
            "connection {origin}: created entity {entity_id:?} (proposed {proposed_id:?}, {} components)",
            rewrites.len()
        );
        let reply = SyncMessage::CreateEntityReply {
            scene_id: DEFAULT_SCENE_ID,
            proposed_entity_id: proposed_id,
            entity_id,
            component_ids: rewrites,
        };
        transport.send(origin, &reply.to_frame());
    }

    fn handle_create_components(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        transport: &mut dyn Transport,
        entity_id: EntityId,
        components: Vec<ComponentBlock>,
    ) {
        if scene.entity(&entity_id).is_none() {
            warn!("connection {origin}: CreateComponents for missing entity {entity_id:?}");
            return;
        }

        let mut rewrites = Vec::new();
        let mut created = Vec::new();
        for block in components {
            let ComponentBlock {
                component_id: proposed_component,
                type_id,
                name,
                attrs,
            } = block;
            let Some(dump) = attrs else {
                warn!("connection {origin}: skipping component block with unrecognized attribute types");
                continue;
            };
            let Ok(component_id) = scene.allocate_component_id(entity_id) else {
                continue;
            };
            if let Err(err) = scene.add_component(
                entity_id,
                component_id,
                type_id,
                name,
                true,
                dump.static_attrs,
                ChangeType::Disconnected,
            ) {
                warn!("connection {origin}: skipping component: {err}");
                continue;
            }
            for attr in dump.dynamic_attrs {
                if let Err(err) = scene.add_dynamic_attribute(
                    entity_id,
                    component_id,
                    attr.index,
                    attr.name,
                    attr.value,
                    ChangeType::Disconnected,
                ) {
                    warn!("connection {origin}: skipping dynamic attribute: {err}");
                }
            }
            rewrites.push(ComponentIdRewrite {
                proposed: proposed_component,
                authoritative: component_id,
            });
            created.push(component_id);
        }

        for component_id in &created {
            self.apply_event_to_states(&SceneEvent::ComponentAdded(entity_id, *component_id));
        }
        if let Some(state) = self.origin_state_mut(origin) {
            for component_id in &created {
                state.mark_component_processed(entity_id, *component_id);
            }
        }

        let reply = SyncMessage::CreateComponentsReply {
            scene_id: DEFAULT_SCENE_ID,
            entity_id,
            component_ids: rewrites,
        };
        transport.send(origin, &reply.to_frame());
    }

    fn handle_create_attributes(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        entity_id: EntityId,
        attributes: Vec<NewAttribute>,
    ) {
        for attr in attributes {
            let NewAttribute {
                component_id,
                index,
                name,
                value,
            } = attr;
            if let Err(err) = scene.add_dynamic_attribute(
                entity_id,
                component_id,
                index,
                name,
                value,
                ChangeType::Disconnected,
            ) {
                warn!("connection {origin}: CreateAttributes: {err}");
                continue;
            }
            self.apply_event_to_states(&SceneEvent::AttributeAdded(entity_id, component_id, index));
            if let Some(state) = self.origin_state_mut(origin) {
                state.mark_attribute_processed(entity_id, component_id, index);
            }
        }
    }

    fn handle_edit_attributes(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        entity_id: EntityId,
        components: Vec<ComponentEdit>,
    ) {
        // Decode against the authoritative view first, then apply. Each
        // component's payload is length-isolated, so a payload this build
        // cannot read (for example an attribute slot we do not have) skips
        // just that component edit.
        let mut decoded: Vec<(ComponentId, Vec<(u8, AttributeValue)>)> = Vec::new();
        {
            let Some(entity) = scene.entity(&entity_id) else {
                warn!("connection {origin}: EditAttributes for missing entity {entity_id:?}");
                return;
            };
            for edit in &components {
                let Some(component) = entity.component(&edit.component_id) else {
                    warn!(
                        "connection {origin}: EditAttributes for missing component {:?}",
                        edit.component_id
                    );
                    continue;
                };
                match edit.decode_with(component.attribute_slots(), |index| {
                    component.attribute_type(index)
                }) {
                    Ok(changes) => decoded.push((edit.component_id, changes)),
                    Err(err) => {
                        warn!(
                            "connection {origin}: undecodable edit payload for component {:?}: {err}",
                            edit.component_id
                        );
                    }
                }
            }
        }

        for (component_id, changes) in decoded {
            for (index, value) in changes {
                if let Err(err) = scene.set_attribute(
                    entity_id,
                    component_id,
                    index,
                    value,
                    ChangeType::Disconnected,
                ) {
                    warn!("connection {origin}: EditAttributes: {err}");
                    continue;
                }
                self.apply_event_to_states(&SceneEvent::AttributeChanged(
                    entity_id,
                    component_id,
                    index,
                ));
                if let Some(state) = self.origin_state_mut(origin) {
                    state.mark_attribute_processed(entity_id, component_id, index);
                }
            }
        }
    }

    fn handle_remove_attributes(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        entity_id: EntityId,
        attributes: Vec<(ComponentId, u8)>,
    ) {
        for (component_id, index) in attributes {
            if let Err(err) =
                scene.remove_attribute(entity_id, component_id, index, ChangeType::Disconnected)
            {
                warn!("connection {origin}: RemoveAttributes: {err}");
                continue;
            }
            self.apply_event_to_states(&SceneEvent::AttributeRemoved(
                entity_id,
                component_id,
                index,
            ));
            if let Some(state) = self.origin_state_mut(origin) {
                state.mark_attribute_processed(entity_id, component_id, index);
            }
        }
    }

    fn handle_remove_components(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        entity_id: EntityId,
        component_ids: Vec<ComponentId>,
    ) {
        for component_id in component_ids {
            if let Err(err) =
                scene.remove_component(entity_id, component_id, ChangeType::Disconnected)
            {
                warn!("connection {origin}: RemoveComponents: {err}");
                continue;
            }
            self.apply_event_to_states(&SceneEvent::ComponentRemoved(entity_id, component_id));
            if let Some(state) = self.origin_state_mut(origin) {
                if let Some(entity_state) = state.entity_state_mut(&entity_id) {
                    entity_state.remove_component_state(&component_id);
                }
            }
        }
    }

    fn handle_remove_entity(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        entity_id: EntityId,
    ) {
        if let Err(err) = scene.remove_entity(entity_id, ChangeType::Disconnected) {
            warn!("connection {origin}: RemoveEntity: {err}");
            return;
        }
        self.apply_event_to_states(&SceneEvent::EntityRemoved(entity_id));
        if let Some(state) = self.origin_state_mut(origin) {
            state.remove_entity_state(&entity_id);
        }
        info!("connection {origin}: removed entity {entity_id:?}");
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_entity_action(
        &mut self,
        origin: ConnectionHandle,
        scene: &mut Scene,
        transport: &mut dyn Transport,
        entity_id: EntityId,
        action: String,
        exec_bits: u8,
        params: Vec<String>,
    ) {
        if scene.entity(&entity_id).is_none() {
            warn!("connection {origin}: EntityAction for missing entity {entity_id:?}");
            return;
        }
        if let Err(err) = scene.trigger_action(
            entity_id,
            action.clone(),
            params.clone(),
            exec_bits,
            ChangeType::Disconnected,
        ) {
            warn!("connection {origin}: EntityAction: {err}");
            return;
        }

        if exec_bits & execution::SERVER != 0 {
            self.events.push(ServerEvent::EntityAction {
                connection: origin,
                entity: entity_id,
                action: action.clone(),
                params: params.clone(),
                execution: exec_bits,
            });
        }

        if exec_bits & execution::PEERS != 0 {
            let frame = SyncMessage::EntityAction {
                entity_id,
                action,
                execution: exec_bits,
                params,
            }
            .to_frame();
            for connection in self.connections.values() {
                if connection.handle != origin && connection.is_authenticated() {
                    transport.send(connection.handle, &frame);
                }
            }
        }
    }
}

fn check_scene_id(origin: ConnectionHandle, scene_id: u64) -> bool {
    if scene_id != DEFAULT_SCENE_ID {
        warn!("connection {origin}: message for unknown scene {scene_id}, skipping");
        return false;
    }
    true
}

/// Serializes one replicated component in full: type id, name, static
/// attributes by position, dynamic attributes tagged with index/type/name.
/// A block over the size limit is a [`ProtocolError::EncodingOverflow`].
fn dump_component(component: &Component) -> Result<ComponentBlock, ProtocolError> {
    let mut static_attrs = Vec::new();
    let mut dynamic_attrs = Vec::new();
    for (index, attr) in component.attributes() {
        if attr.dynamic {
            dynamic_attrs.push(DynamicAttribute {
                index,
                name: attr.name.clone().unwrap_or_default(),
                value: attr.value.clone(),
            });
        } else {
            static_attrs.push(attr.value.clone());
        }
    }
    let block = ComponentBlock {
        component_id: component.id,
        type_id: component.type_id,
        name: component.name.clone(),
        attrs: Some(AttributeDump {
            static_attrs,
            dynamic_attrs,
        }),
    };

    let mut counter = BitCounter::new();
    block.ser(&mut counter);
    let size = counter.bit_count() / 8;
    if size > MAX_ATTRIBUTE_BLOCK_BYTES {
        return Err(ProtocolError::EncodingOverflow {
            size,
            limit: MAX_ATTRIBUTE_BLOCK_BYTES,
        });
    }
    Ok(block)
}

fn entity_transform(entity: &Entity) -> Option<Transform> {
    for component in entity.components() {
        for (_, attr) in component.attributes() {
            if let AttributeValue::Transform(transform) = &attr.value {
                return Some(*transform);
            }
        }
    }
    None
}

struct PendingEdit {
    component_id: ComponentId,
    slots: usize,
    changes: Vec<(u8, AttributeValue)>,
}

/// Drains one connection's sync state in enqueue order, emitting the
/// minimal set of messages. Only non-empty messages are sent; a state with
/// no pending work produces zero bytes. An oversized encoding aborts the
/// flush with no partial message sent; the caller reports the violation.
fn flush_state(
    handle: ConnectionHandle,
    state: &mut SceneSyncState,
    scene: &Scene,
    transport: &mut dyn Transport,
) -> Result<(), ProtocolError> {
    while let Some(entity_id) = state.pop_dirty_entity() {
        let Some(entity_state) = state.entity_state(&entity_id) else {
            continue;
        };
        let (is_removed, is_new) = (entity_state.removed, entity_state.is_new);

        if is_removed && is_new {
            // Should have been untracked at mark time; recover by sending
            // the creation instead of silently dropping it.
            warn!("entity {entity_id:?} flagged both new and removed, re-queueing as creation");
            if let Some(entity_state) = state.entity_state_mut(&entity_id) {
                entity_state.removed = false;
            }
            state.enqueue_entity(entity_id);
            continue;
        }

        if is_removed {
            let frame = SyncMessage::RemoveEntity {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
            }
            .to_frame();
            transport.send(handle, &frame);
            state.remove_entity_state(&entity_id);
            continue;
        }

        if is_new {
            let Some(entity) = scene.entity(&entity_id) else {
                // Removed from the scene before the creation was flushed.
                state.remove_entity_state(&entity_id);
                continue;
            };
            let mut components = Vec::new();
            for component in entity.components() {
                if !component.replicated {
                    continue;
                }
                components.push(dump_component(component)?);
            }
            // Mark everything serialized as processed before the send, so
            // the create is not redundantly re-sent next tick.
            if let Some(entity_state) = state.entity_state_mut(&entity_id) {
                entity_state.mark_processed();
                entity_state.sent_transform = entity_transform(entity);
            }
            let frame = SyncMessage::CreateEntity {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
                temporary: entity.temporary,
                components,
            }
            .to_frame();
            transport.send(handle, &frame);
            continue;
        }

        // Modified entity: drain its component queue into up to five
        // batched messages.
        let Some(entity) = scene.entity(&entity_id) else {
            state.remove_entity_state(&entity_id);
            continue;
        };
        let Some(entity_state) = state.entity_state_mut(&entity_id) else {
            continue;
        };

        let mut removed_components: Vec<ComponentId> = Vec::new();
        let mut removed_attributes: Vec<(ComponentId, u8)> = Vec::new();
        let mut new_components: Vec<ComponentBlock> = Vec::new();
        let mut new_attributes: Vec<NewAttribute> = Vec::new();
        let mut pending_edits: Vec<PendingEdit> = Vec::new();

        while let Some(component_id) = entity_state.pop_dirty_component() {
            let (comp_removed, comp_new) = {
                let component_state = entity_state.component_state_mut(&component_id);
                (component_state.removed, component_state.is_new)
            };

            if comp_removed {
                removed_components.push(component_id);
                entity_state.remove_component_state(&component_id);
                continue;
            }

            let Some(component) = entity.component(&component_id) else {
                warn!("component {component_id:?} missing from scene, dropping its sync state");
                entity_state.remove_component_state(&component_id);
                continue;
            };

            if comp_new {
                new_components.push(dump_component(component)?);
                let component_state = entity_state.component_state_mut(&component_id);
                component_state.is_new = false;
                component_state.dirty_attributes.clear_all();
                component_state.new_and_removed_attributes.clear();
                continue;
            }

            let component_state = entity_state.component_state_mut(&component_id);
            let pending_attrs = std::mem::take(&mut component_state.new_and_removed_attributes);
            let dirty = component_state.dirty_attributes.take_indices();

            for (index, created) in pending_attrs {
                if created {
                    let Some(attr) = component.attribute(index) else {
                        warn!("created attribute {index} missing from component {component_id:?}");
                        continue;
                    };
                    new_attributes.push(NewAttribute {
                        component_id,
                        index,
                        name: attr.name.clone().unwrap_or_default(),
                        value: attr.value.clone(),
                    });
                } else {
                    removed_attributes.push((component_id, index));
                }
            }

            let mut changes = Vec::new();
            for index in dirty {
                let Some(attr) = component.attribute(index) else {
                    continue;
                };
                changes.push((index, attr.value.clone()));
            }
            if !changes.is_empty() {
                pending_edits.push(PendingEdit {
                    component_id,
                    slots: component.attribute_slots(),
                    changes,
                });
            }
        }

        // Transform throttle: an edit whose only payload is a transform
        // within epsilon of the last one flushed is elided.
        if removed_components.is_empty()
            && removed_attributes.is_empty()
            && new_components.is_empty()
            && new_attributes.is_empty()
            && pending_edits.len() == 1
            && pending_edits[0].changes.len() == 1
        {
            if let (Some(previous), (_, AttributeValue::Transform(next))) =
                (entity_state.sent_transform, &pending_edits[0].changes[0])
            {
                if previous.approx_eq(next, TRANSFORM_EPSILON) {
                    pending_edits.clear();
                }
            }
        }
        for edit in &pending_edits {
            for (_, value) in &edit.changes {
                if let AttributeValue::Transform(transform) = value {
                    entity_state.sent_transform = Some(*transform);
                }
            }
        }

        if !removed_components.is_empty() {
            let frame = SyncMessage::RemoveComponents {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
                component_ids: removed_components,
            }
            .to_frame();
            transport.send(handle, &frame);
        }
        if !removed_attributes.is_empty() {
            let frame = SyncMessage::RemoveAttributes {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
                attributes: removed_attributes,
            }
            .to_frame();
            transport.send(handle, &frame);
        }
        if !new_components.is_empty() {
            let frame = SyncMessage::CreateComponents {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
                components: new_components,
            }
            .to_frame();
            transport.send(handle, &frame);
        }
        if !new_attributes.is_empty() {
            let frame = SyncMessage::CreateAttributes {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
                attributes: new_attributes,
            }
            .to_frame();
            transport.send(handle, &frame);
        }
        if !pending_edits.is_empty() {
            let mut components = Vec::with_capacity(pending_edits.len());
            for edit in &pending_edits {
                let encoded = ComponentEdit::encode(edit.component_id, edit.slots, &edit.changes);
                if encoded.payload.len() > MAX_ATTRIBUTE_BLOCK_BYTES {
                    return Err(ProtocolError::EncodingOverflow {
                        size: encoded.payload.len(),
                        limit: MAX_ATTRIBUTE_BLOCK_BYTES,
                    });
                }
                components.push(encoded);
            }
            let frame = SyncMessage::EditAttributes {
                scene_id: DEFAULT_SCENE_ID,
                entity_id,
                components,
            }
            .to_frame();
            transport.send(handle, &frame);
        }
    }
    Ok(())
}
