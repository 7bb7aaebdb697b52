//! Inbound entity actions: the server execution bit surfaces an event to
//! the application, the peers bit forwards the action to everyone except
//! its sender, and actions never change scene state.
mod common;

use common::{connect_and_authenticate, MemoryTransport};

use scenesync_server::shared::{execution, ChangeType, EntityId, Scene, SyncMessage};
use scenesync_server::{ServerEvent, SyncConfig, SyncManager, TransportEvent};

fn spawn_entity(scene: &mut Scene) -> EntityId {
    let entity_id = scene.allocate_entity_id();
    scene
        .create_entity(entity_id, false, false, ChangeType::Replicate)
        .unwrap();
    entity_id
}

fn action_frame(entity_id: EntityId, exec_bits: u8) -> Box<[u8]> {
    SyncMessage::EntityAction {
        entity_id,
        action: "Jump".to_string(),
        execution: exec_bits,
        params: vec!["2.5".to_string()],
    }
    .to_frame()
}

#[test]
fn server_bit_surfaces_an_event() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);

    let entity_id = spawn_entity(&mut scene);
    manager.tick(&mut scene, &mut transport);
    transport.take_for(1);

    manager
        .transport_events()
        .push(TransportEvent::Data(1, action_frame(entity_id, execution::SERVER)));
    let events = manager.tick(&mut scene, &mut transport);

    assert_eq!(
        events,
        vec![ServerEvent::EntityAction {
            connection: 1,
            entity: entity_id,
            action: "Jump".to_string(),
            params: vec!["2.5".to_string()],
            execution: execution::SERVER,
        }]
    );
    // Not a state change: nothing is replicated.
    assert!(transport.sent.is_empty());
}

#[test]
fn peers_bit_forwards_to_everyone_but_the_sender() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 2);
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 3);

    let entity_id = spawn_entity(&mut scene);
    manager.tick(&mut scene, &mut transport);
    for handle in [1, 2, 3] {
        transport.take_for(handle);
    }

    manager
        .transport_events()
        .push(TransportEvent::Data(2, action_frame(entity_id, execution::PEERS)));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(events.is_empty());
    assert!(transport.take_for(2).is_empty());
    for handle in [1, 3] {
        let frames = transport.take_for(handle);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            SyncMessage::from_frame(&frames[0]).unwrap(),
            SyncMessage::EntityAction { ref action, .. } if action == "Jump"
        ));
    }
}

#[test]
fn action_on_missing_entity_is_skipped() {
    let mut scene = Scene::new();
    let mut manager = SyncManager::new(SyncConfig::default());
    let mut transport = MemoryTransport::default();
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 1);
    connect_and_authenticate(&mut manager, &mut scene, &mut transport, 2);

    manager.transport_events().push(TransportEvent::Data(
        1,
        action_frame(EntityId::Authoritative(99), execution::SERVER | execution::PEERS),
    ));
    let events = manager.tick(&mut scene, &mut transport);

    assert!(events.is_empty());
    assert!(transport.sent.is_empty());
}
