use scenesync_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

/// Identifies an entity within a scene.
///
/// Ids carry their namespace: `Authoritative` ids come from the server-owned
/// generator, `Proposed` ids are client-tentative values that have not been
/// confirmed yet. The two never collide because the tag travels on the wire
/// (one namespace bit ahead of the varint value), and the type system keeps
/// reconciliation honest: a `Proposed` id can never be stored in the
/// authoritative scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Authoritative(u32),
    Proposed(u32),
}

impl EntityId {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, EntityId::Authoritative(_))
    }

    pub fn value(&self) -> u32 {
        match self {
            EntityId::Authoritative(value) | EntityId::Proposed(value) => *value,
        }
    }
}

impl Serde for EntityId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bit(!self.is_authoritative());
        UnsignedVariableInteger::<7>::new(self.value()).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let proposed = reader.read_bit()?;
        let raw = UnsignedVariableInteger::<7>::de(reader)?.get();
        let value = u32::try_from(raw).map_err(|_| SerdeErr::ValueOutOfRange)?;
        if proposed {
            Ok(EntityId::Proposed(value))
        } else {
            Ok(EntityId::Authoritative(value))
        }
    }
}

/// Identifies a component within its owning entity. Same namespace scheme as
/// [`EntityId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentId {
    Authoritative(u32),
    Proposed(u32),
}

impl ComponentId {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, ComponentId::Authoritative(_))
    }

    pub fn value(&self) -> u32 {
        match self {
            ComponentId::Authoritative(value) | ComponentId::Proposed(value) => *value,
        }
    }
}

impl Serde for ComponentId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bit(!self.is_authoritative());
        UnsignedVariableInteger::<7>::new(self.value()).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let proposed = reader.read_bit()?;
        let raw = UnsignedVariableInteger::<7>::de(reader)?.get();
        let value = u32::try_from(raw).map_err(|_| SerdeErr::ValueOutOfRange)?;
        if proposed {
            Ok(ComponentId::Proposed(value))
        } else {
            Ok(ComponentId::Authoritative(value))
        }
    }
}

/// Hands out authoritative id values sequentially, skipping values the
/// caller reports as still live. Wraps around and never yields 0.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate<F: Fn(u32) -> bool>(&mut self, in_use: F) -> u32 {
        loop {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if self.next == 0 {
                self.next = 1;
            }
            if candidate != 0 && !in_use(candidate) {
                return candidate;
            }
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
