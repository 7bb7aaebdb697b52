//! # Scenesync Shared
//! Common functionality shared between the scenesync server & client crates:
//! tagged entity/component identifiers, attribute values, the authoritative
//! scene data model with its change journal, and the wire message catalogue.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use scenesync_serde::{
    BitCounter, BitReader, BitWrite, BitWriter, Serde, SerdeErr, UnsignedVariableInteger,
};

mod ids;
mod messages;
mod scene;
mod value;

pub use ids::{ComponentId, EntityId, IdAllocator};
pub use messages::{
    pick_encoding, AttributeDump, AttributeEncoding, ComponentBlock, ComponentEdit,
    ComponentIdRewrite, DynamicAttribute, NewAttribute, SyncMessage, WireError, CREATE_ATTRIBUTES,
    CREATE_COMPONENTS, CREATE_COMPONENTS_REPLY, CREATE_ENTITY, CREATE_ENTITY_REPLY,
    DEFAULT_SCENE_ID, EDIT_ATTRIBUTES, ENTITY_ACTION, REMOVE_ATTRIBUTES, REMOVE_COMPONENTS,
    REMOVE_ENTITY,
};
pub use scene::{
    execution, Attribute, ChangeType, Component, Entity, Scene, SceneError, SceneEvent,
};
pub use value::{AttributeType, AttributeValue, Quat, Transform, Vec3};
