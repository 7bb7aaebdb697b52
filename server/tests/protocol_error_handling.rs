//! Fault isolation: malformed frames are fatal for their sender only,
//! reference errors skip the sub-operation, and unauthenticated senders are
//! ignored.
mod common;

use common::{connect_and_authenticate, MemoryTransport, RemoteView};

use scenesync_server::shared::{
    AttributeValue, ChangeType, EntityId, Scene, SyncMessage, WireError, DEFAULT_SCENE_ID,
};
use scenesync_server::{
    ConnectionState, ProtocolError, ServerEvent, SyncConfig, SyncManager, TransportEvent,
};

#[test]
fn truncated_frame_disconnects_only_the_sender() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 2);

    let mut frame = SyncMessage::RemoveEntity {
        scene_id: DEFAULT_SCENE_ID,
        entity_id: EntityId::Authoritative(1),
    }
    .to_frame()
    .to_vec();
    frame.truncate(1);
    manager
        .transport_events()
        .push(TransportEvent::Data(1, frame.into_boxed_slice()));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(events.iter().any(|event| matches!(
        event,
        ServerEvent::ProtocolViolation {
            connection: 1,
            error: ProtocolError::Malformed(_),
        }
    )));
    assert_eq!(
        manager.connection_state(1),
        Some(ConnectionState::Disconnecting)
    );
    assert_eq!(
        manager.connection_state(2),
        Some(ConnectionState::Authenticated)
    );

    // The healthy connection keeps receiving updates.
    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();
    manager.tick(&mut scene, &mut transport);
    assert!(transport.take_for(1).is_empty());
    assert_eq!(transport.take_for(2).len(), 1);
}

#[test]
fn unknown_message_id_is_a_protocol_violation() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);

    manager
        .transport_events()
        .push(TransportEvent::Data(1, vec![42].into_boxed_slice()));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(events.contains(&ServerEvent::ProtocolViolation {
        connection: 1,
        error: ProtocolError::Malformed(WireError::UnknownMessageId { id: 42 }),
    }));
}

#[test]
fn unauthenticated_mutations_are_dropped_silently() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();

    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();

    // Connected but never authenticated.
    manager.transport_events().push(TransportEvent::Connected(1));
    manager.tick(&mut scene, &mut transport);

    let frame = SyncMessage::RemoveEntity {
        scene_id: DEFAULT_SCENE_ID,
        entity_id,
    }
    .to_frame();
    manager
        .transport_events()
        .push(TransportEvent::Data(1, frame));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(scene.entity(&entity_id).is_some());
    assert!(events.is_empty());
    assert_eq!(
        manager.connection_state(1),
        Some(ConnectionState::Authenticating)
    );
    assert!(transport.take_for(1).is_empty());
}

#[test]
fn missing_entity_reference_skips_without_disconnecting() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);

    let frame = SyncMessage::RemoveEntity {
        scene_id: DEFAULT_SCENE_ID,
        entity_id: EntityId::Authoritative(99),
    }
    .to_frame();
    manager
        .transport_events()
        .push(TransportEvent::Data(1, frame));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(events.is_empty());
    assert_eq!(
        manager.connection_state(1),
        Some(ConnectionState::Authenticated)
    );

    // The connection still syncs normally afterwards.
    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();
    manager.tick(&mut scene, &mut transport);
    let mut view = RemoteView::default();
    view.apply_all(&transport.take_for(1));
    assert_eq!(view.entities.len(), 1);
}

#[test]
fn oversized_attribute_block_is_a_protocol_error() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 2);

    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();
    let component_id = scene.allocate_component_id(entity_id).unwrap();
    scene
        .add_component(
            entity_id,
            component_id,
            20,
            "Blob".to_string(),
            true,
            vec![AttributeValue::Str("x".repeat(70 * 1024))],
            ChangeType::Replicate,
        )
        .unwrap();
    let events = manager.tick(&mut scene, &mut transport);

    // The whole creation is rejected, never sent with the component
    // silently missing, and each affected connection is told why.
    for handle in [1, 2] {
        assert!(events.iter().any(|event| matches!(
            event,
            ServerEvent::ProtocolViolation {
                connection,
                error: ProtocolError::EncodingOverflow { .. },
            } if *connection == handle
        )));
        assert_eq!(
            manager.connection_state(handle),
            Some(ConnectionState::Disconnecting)
        );
        assert!(transport.take_for(handle).is_empty());
    }
}

#[test]
fn kicked_connection_stops_receiving_updates() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);

    manager.disconnect_connection(1);
    assert_eq!(
        manager.connection_state(1),
        Some(ConnectionState::Disconnecting)
    );

    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();
    manager.tick(&mut scene, &mut transport);
    assert!(transport.take_for(1).is_empty());
}

#[test]
fn disconnect_drops_pending_sync_state() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);

    // Change queued but never flushed before the disconnect arrives.
    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();
    manager
        .transport_events()
        .push(TransportEvent::Disconnected(1));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(events.contains(&ServerEvent::Disconnected(1)));
    assert_eq!(manager.connection_state(1), None);
    assert!(transport.take_for(1).is_empty());
}
