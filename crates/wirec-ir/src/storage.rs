//! Structural type shapes ("storages") and their wire form.
//!
//! A shape is an ordered sequence of primitive elements, each optionally
//! carrying a size and/or a reference to another definition. Shapes derive
//! `Eq + Hash` and the module interns them directly as map keys, so two
//! structurally equal shapes always share one [`StorageRef`].

use crate::code::CodecError;
use crate::ids::ObjectId;
use crate::varint::{VarintError, read_varint, write_varint};

pub use crate::ids::StorageRef;

/// Primitive element tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Uint = 0,
    Int = 1,
    Float = 2,
    Bool = 3,
    /// Fixed-length sequence; `size` is the element count, the element
    /// shape follows as the next element in the sequence.
    Array = 4,
    /// Variable-length sequence; the element shape follows.
    Vector = 5,
    /// Reference to another format; `size` stores bit width + 1 so zero
    /// remains "unset".
    StructRef = 6,
    Enum = 7,
    /// One of several struct branches; `size` is the branch count and the
    /// branches follow as StructRef elements.
    Variant = 8,
    Optional = 9,
    ByteVector = 10,
    /// Calling-convention marker for synthesized bit-field setters.
    PropertySetterReturn = 11,
    /// Calling-convention marker for encoder/decoder results.
    CoderReturn = 12,
}

impl StorageKind {
    fn from_u64(value: u64) -> Result<StorageKind, CodecError> {
        use StorageKind::*;
        const ALL: [StorageKind; 13] = [
            Uint, Int, Float, Bool, Array, Vector, StructRef, Enum, Variant, Optional,
            ByteVector, PropertySetterReturn, CoderReturn,
        ];
        ALL.get(value as usize)
            .copied()
            .ok_or(CodecError::UnknownEnum { what: "storage kind", value })
    }

    pub fn name(self) -> &'static str {
        match self {
            StorageKind::Uint => "uint",
            StorageKind::Int => "int",
            StorageKind::Float => "float",
            StorageKind::Bool => "bool",
            StorageKind::Array => "array",
            StorageKind::Vector => "vector",
            StorageKind::StructRef => "struct_ref",
            StorageKind::Enum => "enum",
            StorageKind::Variant => "variant",
            StorageKind::Optional => "optional",
            StorageKind::ByteVector => "byte_vector",
            StorageKind::PropertySetterReturn => "property_setter_return",
            StorageKind::CoderReturn => "coder_return",
        }
    }
}

/// One element of a shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Storage {
    pub kind: StorageKind,
    /// Bit width, element count or branch count, depending on `kind`.
    pub size: Option<u64>,
    /// Referenced definition, for StructRef/Enum/Variant elements.
    pub reference: Option<ObjectId>,
}

impl Storage {
    pub fn sized(kind: StorageKind, size: u64) -> Storage {
        Storage { kind, size: Some(size), reference: None }
    }

    pub fn bare(kind: StorageKind) -> Storage {
        Storage { kind, size: None, reference: None }
    }

    pub fn reference(kind: StorageKind, reference: ObjectId) -> Storage {
        Storage { kind, size: None, reference: Some(reference) }
    }

    pub fn struct_ref(reference: ObjectId) -> Storage {
        Storage { kind: StorageKind::StructRef, size: None, reference: Some(reference) }
    }
}

/// A complete shape: an ordered element sequence, interned as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Storages(pub Vec<Storage>);

impl Storages {
    pub fn single(storage: Storage) -> Storages {
        Storages(vec![storage])
    }

    pub fn uint(bits: u64) -> Storages {
        Storages::single(Storage::sized(StorageKind::Uint, bits))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Storage> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Storage> {
        self.0.iter()
    }

    /// Append the wire form: element count, then per element a kind, a
    /// presence bitmap, and the present optional values.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(self.0.len() as u64, out)?;
        for element in &self.0 {
            write_varint(element.kind as u64, out)?;
            let presence =
                u64::from(element.size.is_some()) | (u64::from(element.reference.is_some()) << 1);
            write_varint(presence, out)?;
            if let Some(size) = element.size {
                write_varint(size, out)?;
            }
            if let Some(reference) = element.reference {
                write_varint(reference.0, out)?;
            }
        }
        Ok(())
    }

    /// Read one shape from the front of `input`, advancing it.
    pub fn decode(input: &mut &[u8]) -> Result<Storages, CodecError> {
        let count = read_varint(input)?;
        let mut elements = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let kind = StorageKind::from_u64(read_varint(input)?)?;
            let presence = read_varint(input)?;
            let size = if presence & 1 != 0 {
                Some(read_varint(input)?)
            } else {
                None
            };
            let reference = if presence & 2 != 0 {
                Some(ObjectId(read_varint(input)?))
            } else {
                None
            };
            elements.push(Storage { kind, size, reference });
        }
        Ok(Storages(elements))
    }

    /// Short rendering for dumps, e.g. `uint:8` or `struct_ref(#5)`.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|s| {
                let mut text = s.kind.name().to_string();
                if let Some(size) = s.size {
                    text.push_str(&format!(":{size}"));
                }
                if let Some(reference) = s.reference {
                    text.push_str(&format!("({reference})"));
                }
                text
            })
            .collect();
        parts.join(" ")
    }
}

impl FromIterator<Storage> for Storages {
    fn from_iter<I: IntoIterator<Item = Storage>>(iter: I) -> Storages {
        Storages(iter.into_iter().collect())
    }
}
