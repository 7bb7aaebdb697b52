//! # Scenesync Server
//! The authoritative half of the scenesync protocol: owns the canonical
//! scene, validates and applies mutations received from connected clients,
//! and replicates every scene change to every authenticated connection.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use scenesync_shared::{
        execution, Attribute, AttributeDump, AttributeType, AttributeValue, BitReader, BitWrite,
        BitWriter, ChangeType, Component, ComponentBlock, ComponentEdit, ComponentId,
        ComponentIdRewrite, DynamicAttribute, Entity, EntityId, NewAttribute, Quat, Scene,
        SceneError, SceneEvent, Serde, SerdeErr, SyncMessage, Transform,
        UnsignedVariableInteger, Vec3, WireError, DEFAULT_SCENE_ID,
    };
}

mod connection;
mod error;
mod manager;
mod sync_state;
mod transport;

pub use connection::{Connection, ConnectionState};
pub use error::ProtocolError;
pub use manager::{ServerEvent, SyncConfig, SyncManager};
pub use sync_state::{
    AttributeDirtyMask, ComponentSyncState, EntitySyncState, SceneSyncState,
};
pub use transport::{ConnectionHandle, Transport, TransportEvent, TransportEventQueue};
