use serde::{Deserialize, Serialize};

/// The scalar element types a register can present.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Float64 => 8,
        }
    }
}

/// Describes the data of a register: the cooked type presented to the
/// application after conversion, and the raw transport type, if the register
/// supports raw access at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDescriptor {
    /// Element type after conversion.
    pub cooked: ScalarType,
    /// Element type on the wire. `None` if the register has no raw view.
    pub raw: Option<ScalarType>,
}

impl DataDescriptor {
    /// Descriptor for a register transported as 32 bit integers and
    /// presented as such — the common case for numeric addressed devices.
    pub fn int32() -> Self {
        Self {
            cooked: ScalarType::Int32,
            raw: Some(ScalarType::Int32),
        }
    }

    /// Descriptor with a cooked type only (no raw access possible).
    pub fn cooked_only(cooked: ScalarType) -> Self {
        Self { cooked, raw: None }
    }
}
