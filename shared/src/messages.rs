use scenesync_serde::{BitReader, BitWrite, BitWriter, Serde, SerdeErr, UnsignedVariableInteger};
use thiserror::Error;

use crate::{
    ids::{ComponentId, EntityId},
    value::{AttributeType, AttributeValue},
};

/// Placeholder for future multi-scene support; always written as 0.
pub const DEFAULT_SCENE_ID: u64 = 0;

// Wire message ids, kept from the original protocol numbering.
pub const CREATE_ENTITY: u8 = 110;
pub const CREATE_COMPONENTS: u8 = 111;
pub const CREATE_ATTRIBUTES: u8 = 112;
pub const EDIT_ATTRIBUTES: u8 = 113;
pub const REMOVE_ATTRIBUTES: u8 = 114;
pub const REMOVE_COMPONENTS: u8 = 115;
pub const REMOVE_ENTITY: u8 = 116;
pub const CREATE_ENTITY_REPLY: u8 = 117;
pub const CREATE_COMPONENTS_REPLY: u8 = 118;
pub const ENTITY_ACTION: u8 = 120;

/// Errors from decoding a whole sync message frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("Unknown message id {id}")]
    UnknownMessageId { id: u8 },

    #[error(transparent)]
    Serde(#[from] SerdeErr),
}

fn ser_varint(writer: &mut dyn BitWrite, value: u64) {
    UnsignedVariableInteger::<7>::new(value).ser(writer);
}

fn de_varint(reader: &mut BitReader) -> Result<u64, SerdeErr> {
    Ok(UnsignedVariableInteger::<7>::de(reader)?.get())
}

fn de_varint_u32(reader: &mut BitReader) -> Result<u32, SerdeErr> {
    u32::try_from(de_varint(reader)?).map_err(|_| SerdeErr::ValueOutOfRange)
}

/// A dynamically-added attribute inside a component dump, tagged with its
/// slot index, type and name.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicAttribute {
    pub index: u8,
    pub name: String,
    pub value: AttributeValue,
}

/// Full attribute dump of one component: static attributes by position,
/// then dynamic attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeDump {
    pub static_attrs: Vec<AttributeValue>,
    pub dynamic_attrs: Vec<DynamicAttribute>,
}

impl AttributeDump {
    fn ser_into(&self, writer: &mut dyn BitWrite) {
        ser_varint(writer, self.static_attrs.len() as u64);
        for value in &self.static_attrs {
            value.type_of().to_wire().ser(writer);
            value.ser_value(writer);
        }
        ser_varint(writer, self.dynamic_attrs.len() as u64);
        for attr in &self.dynamic_attrs {
            attr.index.ser(writer);
            attr.value.type_of().to_wire().ser(writer);
            attr.name.ser(writer);
            attr.value.ser_value(writer);
        }
    }

    /// Parses a dump out of an attribute block. `Ok(None)` means the block
    /// contained a type tag this build does not know; the caller still
    /// consumed the block thanks to its length prefix and can skip it.
    fn parse(bytes: &[u8]) -> Result<Option<Self>, SerdeErr> {
        let mut reader = BitReader::new(bytes);
        let static_count = de_varint(&mut reader)? as usize;
        let mut static_attrs = Vec::new();
        for _ in 0..static_count {
            let raw_type = u8::de(&mut reader)?;
            let Some(ty) = AttributeType::from_wire(raw_type) else {
                return Ok(None);
            };
            static_attrs.push(AttributeValue::de_typed(&mut reader, ty)?);
        }
        let dynamic_count = de_varint(&mut reader)? as usize;
        let mut dynamic_attrs = Vec::new();
        for _ in 0..dynamic_count {
            let index = u8::de(&mut reader)?;
            let raw_type = u8::de(&mut reader)?;
            let Some(ty) = AttributeType::from_wire(raw_type) else {
                return Ok(None);
            };
            let name = String::de(&mut reader)?;
            let value = AttributeValue::de_typed(&mut reader, ty)?;
            dynamic_attrs.push(DynamicAttribute { index, name, value });
        }
        Ok(Some(Self {
            static_attrs,
            dynamic_attrs,
        }))
    }
}

/// One component inside a CreateEntity / CreateComponents message.
///
/// The attribute dump travels as a length-prefixed block so a receiver that
/// does not recognize the component's content can skip it; such a skipped
/// block decodes to `attrs: None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentBlock {
    pub component_id: ComponentId,
    pub type_id: u32,
    pub name: String,
    pub attrs: Option<AttributeDump>,
}

impl Serde for ComponentBlock {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.component_id.ser(writer);
        ser_varint(writer, self.type_id as u64);
        self.name.ser(writer);
        let mut block = BitWriter::new();
        self.attrs
            .as_ref()
            .unwrap_or(&AttributeDump::default())
            .ser_into(&mut block);
        let bytes = block.to_bytes();
        ser_varint(writer, bytes.len() as u64);
        writer.write_bytes(&bytes);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let component_id = ComponentId::de(reader)?;
        let type_id = de_varint_u32(reader)?;
        let name = String::de(reader)?;
        let block_len = de_varint(reader)? as usize;
        let mut bytes = Vec::new();
        reader.read_bytes(block_len, &mut bytes)?;
        let attrs = AttributeDump::parse(&bytes)?;
        Ok(Self {
            component_id,
            type_id,
            name,
            attrs,
        })
    }
}

/// Which payload layout an EditAttributes component block uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeEncoding {
    /// u8 count, then (u8 index, value) per changed attribute;
    /// costs about `8 + 8k` bits for `k` changes.
    IndexList,
    /// One presence bit per attribute slot, values for set bits;
    /// costs about `N` bits for `N` slots.
    Bitmask,
}

/// Chooses the cheaper layout for a component with `total_slots` attribute
/// slots of which `dirty_count` changed.
pub fn pick_encoding(total_slots: usize, dirty_count: usize) -> AttributeEncoding {
    if total_slots <= 8 * dirty_count + 8 {
        AttributeEncoding::Bitmask
    } else {
        AttributeEncoding::IndexList
    }
}

/// Per-component payload of an EditAttributes message. The payload is a
/// length-prefixed blob starting with a one-bit encoding selector, so a
/// receiver missing the component can still skip it.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentEdit {
    pub component_id: ComponentId,
    pub payload: Box<[u8]>,
}

impl ComponentEdit {
    /// Encodes `changes` (slot index, new value) for a component with
    /// `total_slots` attribute slots, picking the cheaper layout.
    pub fn encode(
        component_id: ComponentId,
        total_slots: usize,
        changes: &[(u8, AttributeValue)],
    ) -> Self {
        let mut block = BitWriter::new();
        match pick_encoding(total_slots, changes.len()) {
            AttributeEncoding::Bitmask => {
                block.write_bit(true);
                for slot in 0..total_slots {
                    match changes.iter().find(|(index, _)| *index as usize == slot) {
                        Some((_, value)) => {
                            block.write_bit(true);
                            value.ser_value(&mut block);
                        }
                        None => block.write_bit(false),
                    }
                }
            }
            AttributeEncoding::IndexList => {
                block.write_bit(false);
                (changes.len() as u8).ser(&mut block);
                for (index, value) in changes {
                    index.ser(&mut block);
                    value.ser_value(&mut block);
                }
            }
        }
        Self {
            component_id,
            payload: block.to_bytes(),
        }
    }

    /// Decodes the payload against the receiver's view of the component:
    /// `total_slots` is its slot count and `attr_type` resolves a slot index
    /// to the attribute's type. A slot the receiver does not have makes the
    /// rest of the payload unreadable, so that surfaces as an error and the
    /// caller skips this one component edit.
    pub fn decode_with<F>(
        &self,
        total_slots: usize,
        attr_type: F,
    ) -> Result<Vec<(u8, AttributeValue)>, SerdeErr>
    where
        F: Fn(u8) -> Option<AttributeType>,
    {
        let mut reader = BitReader::new(&self.payload);
        let mut changes = Vec::new();
        if bool::de(&mut reader)? {
            for slot in 0..total_slots {
                if !reader.read_bit()? {
                    continue;
                }
                let index = u8::try_from(slot).map_err(|_| SerdeErr::ValueOutOfRange)?;
                let ty = attr_type(index).ok_or(SerdeErr::ValueOutOfRange)?;
                changes.push((index, AttributeValue::de_typed(&mut reader, ty)?));
            }
        } else {
            let count = u8::de(&mut reader)?;
            for _ in 0..count {
                let index = u8::de(&mut reader)?;
                let ty = attr_type(index).ok_or(SerdeErr::ValueOutOfRange)?;
                changes.push((index, AttributeValue::de_typed(&mut reader, ty)?));
            }
        }
        Ok(changes)
    }
}

impl Serde for ComponentEdit {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.component_id.ser(writer);
        ser_varint(writer, self.payload.len() as u64);
        writer.write_bytes(&self.payload);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let component_id = ComponentId::de(reader)?;
        let payload_len = de_varint(reader)? as usize;
        let mut payload = Vec::new();
        reader.read_bytes(payload_len, &mut payload)?;
        Ok(Self {
            component_id,
            payload: payload.into_boxed_slice(),
        })
    }
}

/// A dynamically-created attribute announced by CreateAttributes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttribute {
    pub component_id: ComponentId,
    pub index: u8,
    pub name: String,
    pub value: AttributeValue,
}

impl Serde for NewAttribute {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.component_id.ser(writer);
        self.index.ser(writer);
        self.value.type_of().to_wire().ser(writer);
        self.name.ser(writer);
        self.value.ser_value(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let component_id = ComponentId::de(reader)?;
        let index = u8::de(reader)?;
        let raw_type = u8::de(reader)?;
        let ty = AttributeType::from_wire(raw_type).ok_or(SerdeErr::ValueOutOfRange)?;
        let name = String::de(reader)?;
        let value = AttributeValue::de_typed(reader, ty)?;
        Ok(Self {
            component_id,
            index,
            name,
            value,
        })
    }
}

/// An id rewrite handed back by a creation reply: the id the sender
/// proposed, and the authoritative id the server allocated instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentIdRewrite {
    pub proposed: ComponentId,
    pub authoritative: ComponentId,
}

impl Serde for ComponentIdRewrite {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.proposed.ser(writer);
        self.authoritative.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            proposed: ComponentId::de(reader)?,
            authoritative: ComponentId::de(reader)?,
        })
    }
}

/// The fixed catalogue of synchronization messages.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    CreateEntity {
        scene_id: u64,
        entity_id: EntityId,
        temporary: bool,
        components: Vec<ComponentBlock>,
    },
    CreateEntityReply {
        scene_id: u64,
        proposed_entity_id: EntityId,
        entity_id: EntityId,
        component_ids: Vec<ComponentIdRewrite>,
    },
    CreateComponents {
        scene_id: u64,
        entity_id: EntityId,
        components: Vec<ComponentBlock>,
    },
    CreateComponentsReply {
        scene_id: u64,
        entity_id: EntityId,
        component_ids: Vec<ComponentIdRewrite>,
    },
    CreateAttributes {
        scene_id: u64,
        entity_id: EntityId,
        attributes: Vec<NewAttribute>,
    },
    EditAttributes {
        scene_id: u64,
        entity_id: EntityId,
        components: Vec<ComponentEdit>,
    },
    RemoveAttributes {
        scene_id: u64,
        entity_id: EntityId,
        attributes: Vec<(ComponentId, u8)>,
    },
    RemoveComponents {
        scene_id: u64,
        entity_id: EntityId,
        component_ids: Vec<ComponentId>,
    },
    RemoveEntity {
        scene_id: u64,
        entity_id: EntityId,
    },
    EntityAction {
        entity_id: EntityId,
        action: String,
        execution: u8,
        params: Vec<String>,
    },
}

impl SyncMessage {
    pub fn message_id(&self) -> u8 {
        match self {
            SyncMessage::CreateEntity { .. } => CREATE_ENTITY,
            SyncMessage::CreateEntityReply { .. } => CREATE_ENTITY_REPLY,
            SyncMessage::CreateComponents { .. } => CREATE_COMPONENTS,
            SyncMessage::CreateComponentsReply { .. } => CREATE_COMPONENTS_REPLY,
            SyncMessage::CreateAttributes { .. } => CREATE_ATTRIBUTES,
            SyncMessage::EditAttributes { .. } => EDIT_ATTRIBUTES,
            SyncMessage::RemoveAttributes { .. } => REMOVE_ATTRIBUTES,
            SyncMessage::RemoveComponents { .. } => REMOVE_COMPONENTS,
            SyncMessage::RemoveEntity { .. } => REMOVE_ENTITY,
            SyncMessage::EntityAction { .. } => ENTITY_ACTION,
        }
    }

    pub fn ser(&self, writer: &mut dyn BitWrite) {
        self.message_id().ser(writer);
        match self {
            SyncMessage::CreateEntity {
                scene_id,
                entity_id,
                temporary,
                components,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                u8::from(*temporary).ser(writer);
                components.ser(writer);
            }
            SyncMessage::CreateEntityReply {
                scene_id,
                proposed_entity_id,
                entity_id,
                component_ids,
            } => {
                ser_varint(writer, *scene_id);
                proposed_entity_id.ser(writer);
                entity_id.ser(writer);
                component_ids.ser(writer);
            }
            SyncMessage::CreateComponents {
                scene_id,
                entity_id,
                components,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                components.ser(writer);
            }
            SyncMessage::CreateComponentsReply {
                scene_id,
                entity_id,
                component_ids,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                component_ids.ser(writer);
            }
            SyncMessage::CreateAttributes {
                scene_id,
                entity_id,
                attributes,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                attributes.ser(writer);
            }
            SyncMessage::EditAttributes {
                scene_id,
                entity_id,
                components,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                components.ser(writer);
            }
            SyncMessage::RemoveAttributes {
                scene_id,
                entity_id,
                attributes,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                ser_varint(writer, attributes.len() as u64);
                for (component_id, index) in attributes {
                    component_id.ser(writer);
                    index.ser(writer);
                }
            }
            SyncMessage::RemoveComponents {
                scene_id,
                entity_id,
                component_ids,
            } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
                ser_varint(writer, component_ids.len() as u64);
                for component_id in component_ids {
                    component_id.ser(writer);
                }
            }
            SyncMessage::RemoveEntity { scene_id, entity_id } => {
                ser_varint(writer, *scene_id);
                entity_id.ser(writer);
            }
            SyncMessage::EntityAction {
                entity_id,
                action,
                execution,
                params,
            } => {
                entity_id.ser(writer);
                action.ser(writer);
                execution.ser(writer);
                params.ser(writer);
            }
        }
    }

    pub fn de(reader: &mut BitReader) -> Result<Self, WireError> {
        let id = u8::de(reader)?;
        Ok(match id {
            CREATE_ENTITY => SyncMessage::CreateEntity {
                scene_id: de_varint(reader)?,
                entity_id: EntityId::de(reader)?,
                temporary: u8::de(reader)? != 0,
                components: Vec::<ComponentBlock>::de(reader)?,
            },
            CREATE_ENTITY_REPLY => SyncMessage::CreateEntityReply {
                scene_id: de_varint(reader)?,
                proposed_entity_id: EntityId::de(reader)?,
                entity_id: EntityId::de(reader)?,
                component_ids: Vec::<ComponentIdRewrite>::de(reader)?,
            },
            CREATE_COMPONENTS => SyncMessage::CreateComponents {
                scene_id: de_varint(reader)?,
                entity_id: EntityId::de(reader)?,
                components: Vec::<ComponentBlock>::de(reader)?,
            },
            CREATE_COMPONENTS_REPLY => SyncMessage::CreateComponentsReply {
                scene_id: de_varint(reader)?,
                entity_id: EntityId::de(reader)?,
                component_ids: Vec::<ComponentIdRewrite>::de(reader)?,
            },
            CREATE_ATTRIBUTES => SyncMessage::CreateAttributes {
                scene_id: de_varint(reader)?,
                entity_id: EntityId::de(reader)?,
                attributes: Vec::<NewAttribute>::de(reader)?,
            },
            EDIT_ATTRIBUTES => SyncMessage::EditAttributes {
                scene_id: de_varint(reader)?,
                entity_id: EntityId::de(reader)?,
                components: Vec::<ComponentEdit>::de(reader)?,
            },
            REMOVE_ATTRIBUTES => {
                let scene_id = de_varint(reader)?;
                let entity_id = EntityId::de(reader)?;
                let count = de_varint(reader)? as usize;
                let mut attributes = Vec::new();
                for _ in 0..count {
                    attributes.push((ComponentId::de(reader)?, u8::de(reader)?));
                }
                SyncMessage::RemoveAttributes {
                    scene_id,
                    entity_id,
                    attributes,
                }
            }
            REMOVE_COMPONENTS => {
                let scene_id = de_varint(reader)?;
                let entity_id = EntityId::de(reader)?;
                let count = de_varint(reader)? as usize;
                let mut component_ids = Vec::new();
                for _ in 0..count {
                    component_ids.push(ComponentId::de(reader)?);
                }
                SyncMessage::RemoveComponents {
                    scene_id,
                    entity_id,
                    component_ids,
                }
            }
            REMOVE_ENTITY => SyncMessage::RemoveEntity {
                scene_id: de_varint(reader)?,
                entity_id: EntityId::de(reader)?,
            },
            ENTITY_ACTION => SyncMessage::EntityAction {
                entity_id: EntityId::de(reader)?,
                action: String::de(reader)?,
                execution: u8::de(reader)?,
                params: Vec::<String>::de(reader)?,
            },
            other => return Err(WireError::UnknownMessageId { id: other }),
        })
    }

    /// Encodes this message as one transport frame.
    pub fn to_frame(&self) -> Box<[u8]> {
        let mut writer = BitWriter::new();
        self.ser(&mut writer);
        writer.to_bytes()
    }

    /// Decodes one transport frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, WireError> {
        let mut reader = BitReader::new(frame);
        Self::de(&mut reader)
    }
}
