use scenesync_serde::{BitReader, BitWrite, Serde, SerdeErr};

/// Wire tag for an attribute's value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Bool = 1,
    Int = 2,
    Real = 3,
    Str = 4,
    Vec3 = 5,
    Quat = 6,
    Transform = 7,
}

impl AttributeType {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(AttributeType::Bool),
            2 => Some(AttributeType::Int),
            3 => Some(AttributeType::Real),
            4 => Some(AttributeType::Str),
            5 => Some(AttributeType::Vec3),
            6 => Some(AttributeType::Quat),
            7 => Some(AttributeType::Transform),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Serde for Vec3 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.x.ser(writer);
        self.y.ser(writer);
        self.z.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            x: f32::de(reader)?,
            y: f32::de(reader)?,
            z: f32::de(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl Serde for Quat {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.x.ser(writer);
        self.y.ser(writer);
        self.z.ser(writer);
        self.w.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            x: f32::de(reader)?,
            y: f32::de(reader)?,
            z: f32::de(reader)?,
            w: f32::de(reader)?,
        })
    }
}

/// Position / euler rotation / scale triple, the payload of placeable-style
/// components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    /// Componentwise comparison within `epsilon`, used by the outbound
    /// transform throttle.
    pub fn approx_eq(&self, other: &Transform, epsilon: f32) -> bool {
        fn close(a: Vec3, b: Vec3, epsilon: f32) -> bool {
            (a.x - b.x).abs() <= epsilon
                && (a.y - b.y).abs() <= epsilon
                && (a.z - b.z).abs() <= epsilon
        }
        close(self.position, other.position, epsilon)
            && close(self.rotation, other.rotation, epsilon)
            && close(self.scale, other.scale, epsilon)
    }
}

impl Serde for Transform {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.position.ser(writer);
        self.rotation.ser(writer);
        self.scale.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            position: Vec3::de(reader)?,
            rotation: Vec3::de(reader)?,
            scale: Vec3::de(reader)?,
        })
    }
}

/// A single attribute value. Each variant has a fixed binary encoding; the
/// enclosing block carries a length so receivers can skip payloads they do
/// not understand.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i32),
    Real(f32),
    Str(String),
    Vec3(Vec3),
    Quat(Quat),
    Transform(Transform),
}

impl AttributeValue {
    pub fn type_of(&self) -> AttributeType {
        match self {
            AttributeValue::Bool(_) => AttributeType::Bool,
            AttributeValue::Int(_) => AttributeType::Int,
            AttributeValue::Real(_) => AttributeType::Real,
            AttributeValue::Str(_) => AttributeType::Str,
            AttributeValue::Vec3(_) => AttributeType::Vec3,
            AttributeValue::Quat(_) => AttributeType::Quat,
            AttributeValue::Transform(_) => AttributeType::Transform,
        }
    }

    /// Writes the value alone; the type tag is carried by the caller.
    pub fn ser_value(&self, writer: &mut dyn BitWrite) {
        match self {
            AttributeValue::Bool(value) => value.ser(writer),
            AttributeValue::Int(value) => value.ser(writer),
            AttributeValue::Real(value) => value.ser(writer),
            AttributeValue::Str(value) => value.ser(writer),
            AttributeValue::Vec3(value) => value.ser(writer),
            AttributeValue::Quat(value) => value.ser(writer),
            AttributeValue::Transform(value) => value.ser(writer),
        }
    }

    /// Reads a value whose type the caller already knows.
    pub fn de_typed(reader: &mut BitReader, ty: AttributeType) -> Result<Self, SerdeErr> {
        Ok(match ty {
            AttributeType::Bool => AttributeValue::Bool(bool::de(reader)?),
            AttributeType::Int => AttributeValue::Int(i32::de(reader)?),
            AttributeType::Real => AttributeValue::Real(f32::de(reader)?),
            AttributeType::Str => AttributeValue::Str(String::de(reader)?),
            AttributeType::Vec3 => AttributeValue::Vec3(Vec3::de(reader)?),
            AttributeType::Quat => AttributeValue::Quat(Quat::de(reader)?),
            AttributeType::Transform => AttributeValue::Transform(Transform::de(reader)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeType, AttributeValue, Transform, Vec3};
    use scenesync_serde::{BitReader, BitWriter};

    #[test]
    fn typed_values_round_trip() {
        let values = [
            AttributeValue::Bool(true),
            AttributeValue::Int(-40),
            AttributeValue::Real(2.25),
            AttributeValue::Str("avatar".into()),
            AttributeValue::Vec3(Vec3::new(1.0, 2.0, 3.0)),
            AttributeValue::Transform(Transform::default()),
        ];
        for value in values {
            let mut writer = BitWriter::new();
            value.ser_value(&mut writer);
            let bytes = writer.to_bytes();
            let mut reader = BitReader::new(&bytes);
            let decoded = AttributeValue::de_typed(&mut reader, value.type_of()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        assert_eq!(AttributeType::from_wire(0), None);
        assert_eq!(AttributeType::from_wire(200), None);
    }

    #[test]
    fn transform_epsilon_comparison() {
        let a = Transform::default();
        let mut b = Transform::default();
        b.position.x = 0.0005;
        assert!(a.approx_eq(&b, 0.001));
        b.position.x = 0.5;
        assert!(!a.approx_eq(&b, 0.001));
    }
}
