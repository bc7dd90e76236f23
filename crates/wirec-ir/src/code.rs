//! The tagged instruction model.
//!
//! One `macro_rules!` table defines every operation together with exactly
//! the operand fields it uses, and generates:
//! - `Op`: the closed tag enumeration (numbering is table order),
//! - `Code`: one struct variant per operation,
//! - the wire codec (tag byte followed by each operand as a varint).
//!
//! An instruction can only be built with the fields its tag uses, so a
//! malformed combination is unrepresentable.

use thiserror::Error;

use crate::ids::{ObjectId, StorageRef};
use crate::varint::{VarintError, read_varint, write_varint};

/// Error from instruction decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error(transparent)]
    Varint(#[from] VarintError),
    #[error("unknown operation tag {0:#04x}")]
    UnknownOp(u8),
    #[error("invalid {what} discriminant {value}")]
    UnknownEnum { what: &'static str, value: u64 },
}

/// Byte-order selector carried by integer wire operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Endian {
    #[default]
    Big = 0,
    Little = 1,
    Native = 2,
    Dynamic = 3,
}

impl Endian {
    fn from_u64(value: u64) -> Result<Endian, CodecError> {
        Ok(match value {
            0 => Endian::Big,
            1 => Endian::Little,
            2 => Endian::Native,
            3 => Endian::Dynamic,
            v => return Err(CodecError::UnknownEnum { what: "endian", value: v }),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Endian::Big => "big",
            Endian::Little => "little",
            Endian::Native => "native",
            Endian::Dynamic => "dynamic",
        }
    }
}

/// Byte order plus, for [`Endian::Dynamic`], the site that resolves it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EndianExpr {
    pub endian: Endian,
    /// DynamicEndian site deciding the order, null for static orders.
    pub dynamic_ref: ObjectId,
}

impl EndianExpr {
    pub fn fixed(endian: Endian) -> EndianExpr {
        EndianExpr { endian, dynamic_ref: ObjectId::NULL }
    }

    pub fn dynamic(site: ObjectId) -> EndianExpr {
        EndianExpr { endian: Endian::Dynamic, dynamic_ref: site }
    }
}

/// Binary operators used by synthesized and converted expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    Shl = 5,
    Shr = 6,
    BitAnd = 7,
    BitOr = 8,
    BitXor = 9,
    Eq = 10,
    Ne = 11,
    Lt = 12,
    Le = 13,
    Gt = 14,
    Ge = 15,
    LogicalAnd = 16,
    LogicalOr = 17,
}

impl BinOp {
    fn from_u64(value: u64) -> Result<BinOp, CodecError> {
        use BinOp::*;
        const ALL: [BinOp; 18] = [
            Add, Sub, Mul, Div, Mod, Shl, Shr, BitAnd, BitOr, BitXor, Eq, Ne, Lt, Le, Gt,
            Ge, LogicalAnd, LogicalOr,
        ];
        ALL.get(value as usize)
            .copied()
            .ok_or(CodecError::UnknownEnum { what: "binary op", value })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::LogicalAnd => "&&",
            BinOp::LogicalOr => "||",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not = 0,
    BitNot = 1,
    Neg = 2,
}

impl UnOp {
    fn from_u64(value: u64) -> Result<UnOp, CodecError> {
        Ok(match value {
            0 => UnOp::Not,
            1 => UnOp::BitNot,
            2 => UnOp::Neg,
            v => return Err(CodecError::UnknownEnum { what: "unary op", value: v }),
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Not => "!",
            UnOp::BitNot => "~",
            UnOp::Neg => "-",
        }
    }
}

/// How a merged conditional slot came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeMode {
    /// Freshly allocated for a (parent, type shape) group.
    StrictType = 0,
    /// Reuses an existing slot with identical shape and parameter list.
    StrictCommonType = 1,
}

impl MergeMode {
    fn from_u64(value: u64) -> Result<MergeMode, CodecError> {
        Ok(match value {
            0 => MergeMode::StrictType,
            1 => MergeMode::StrictCommonType,
            v => return Err(CodecError::UnknownEnum { what: "merge mode", value: v }),
        })
    }
}

/// Role of a defined function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    #[default]
    Free = 0,
    Encode = 1,
    Decode = 2,
    BitGetter = 3,
    BitSetter = 4,
}

impl FunctionKind {
    fn from_u64(value: u64) -> Result<FunctionKind, CodecError> {
        Ok(match value {
            0 => FunctionKind::Free,
            1 => FunctionKind::Encode,
            2 => FunctionKind::Decode,
            3 => FunctionKind::BitGetter,
            4 => FunctionKind::BitSetter,
            v => return Err(CodecError::UnknownEnum { what: "function kind", value: v }),
        })
    }
}

/// One wire operand: everything in an instruction body is a varint (or a
/// count-prefixed run of varints).
trait Operand: Sized {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError>;
    fn read(input: &mut &[u8]) -> Result<Self, CodecError>;
}

impl Operand for u64 {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(*self, out)
    }

    fn read(input: &mut &[u8]) -> Result<u64, CodecError> {
        Ok(read_varint(input)?)
    }
}

impl Operand for ObjectId {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(self.0, out)
    }

    fn read(input: &mut &[u8]) -> Result<ObjectId, CodecError> {
        Ok(ObjectId(read_varint(input)?))
    }
}

impl Operand for StorageRef {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(self.0, out)
    }

    fn read(input: &mut &[u8]) -> Result<StorageRef, CodecError> {
        Ok(StorageRef(read_varint(input)?))
    }
}

impl Operand for Endian {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(*self as u64, out)
    }

    fn read(input: &mut &[u8]) -> Result<Endian, CodecError> {
        Endian::from_u64(read_varint(input)?)
    }
}

impl Operand for EndianExpr {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        self.endian.write(out)?;
        self.dynamic_ref.write(out)
    }

    fn read(input: &mut &[u8]) -> Result<EndianExpr, CodecError> {
        Ok(EndianExpr {
            endian: Endian::read(input)?,
            dynamic_ref: ObjectId::read(input)?,
        })
    }
}

impl Operand for BinOp {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(*self as u64, out)
    }

    fn read(input: &mut &[u8]) -> Result<BinOp, CodecError> {
        BinOp::from_u64(read_varint(input)?)
    }
}

impl Operand for UnOp {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(*self as u64, out)
    }

    fn read(input: &mut &[u8]) -> Result<UnOp, CodecError> {
        UnOp::from_u64(read_varint(input)?)
    }
}

impl Operand for MergeMode {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(*self as u64, out)
    }

    fn read(input: &mut &[u8]) -> Result<MergeMode, CodecError> {
        MergeMode::from_u64(read_varint(input)?)
    }
}

impl Operand for FunctionKind {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(*self as u64, out)
    }

    fn read(input: &mut &[u8]) -> Result<FunctionKind, CodecError> {
        FunctionKind::from_u64(read_varint(input)?)
    }
}

impl Operand for Vec<ObjectId> {
    fn write(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
        write_varint(self.len() as u64, out)?;
        for id in self {
            id.write(out)?;
        }
        Ok(())
    }

    fn read(input: &mut &[u8]) -> Result<Vec<ObjectId>, CodecError> {
        let count = read_varint(input)?;
        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            items.push(ObjectId::read(input)?);
        }
        Ok(items)
    }
}

macro_rules! instructions {
    (
        $( $(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty),* $(,)? } )*
    ) => {
        /// Operation tags. Numbering is stable and follows table order.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Op {
            $($name),*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[$(Op::$name),*];

            pub fn from_u8(tag: u8) -> Option<Op> {
                Op::ALL.get(tag as usize).copied()
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$name => stringify!($name)),*
                }
            }
        }

        /// One tagged instruction in the module stream.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Code {
            $( $(#[$meta])* $name { $($field: $ty),* } ),*
        }

        impl Code {
            pub fn op(&self) -> Op {
                match self {
                    $(Code::$name { .. } => Op::$name),*
                }
            }

            /// Append the wire form: tag byte, then each operand as varint.
            pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), VarintError> {
                match self {
                    $(Code::$name { $($field),* } => {
                        out.push(Op::$name as u8);
                        $(Operand::write($field, out)?;)*
                    })*
                }
                Ok(())
            }

            /// Read one instruction from the front of `input`, advancing it.
            pub fn decode(input: &mut &[u8]) -> Result<Code, CodecError> {
                let (&tag, rest) = input.split_first().ok_or(VarintError::UnexpectedEof)?;
                *input = rest;
                let op = Op::from_u8(tag).ok_or(CodecError::UnknownOp(tag))?;
                Ok(match op {
                    $(Op::$name => Code::$name { $($field: Operand::read(input)?),* }),*
                })
            }
        }
    };
}

instructions! {
    // Program and type scopes.
    DefineProgram { ident: ObjectId }
    EndProgram {}
    DefineFormat { ident: ObjectId }
    EndFormat {}
    DefineFunction { ident: ObjectId, belong: ObjectId, kind: FunctionKind }
    EndFunction {}
    DefineEnum { ident: ObjectId, base: StorageRef }
    EndEnum {}
    DefineState { ident: ObjectId }
    EndState {}
    DefineUnion { ident: ObjectId }
    EndUnion {}
    DefineUnionMember { ident: ObjectId, belong: ObjectId }
    EndUnionMember {}
    DefineBitField { ident: ObjectId, belong: ObjectId, storage: StorageRef }
    EndBitField {}
    DefineProperty { ident: ObjectId, belong: ObjectId }
    EndProperty {}
    /// Self-contained byte-granular region attached to an abstract wire op.
    DefineFallback { ident: ObjectId }
    EndFallback {}

    // Leaf definitions.
    DefineField { ident: ObjectId, belong: ObjectId, storage: StorageRef }
    DefineVariable { ident: ObjectId, init: ObjectId, storage: StorageRef }
    DefineConstant { ident: ObjectId, value: ObjectId, storage: StorageRef }
    DefineEnumMember { ident: ObjectId, value: u64 }
    DefineParameter { ident: ObjectId, storage: StorageRef }
    PropertyInputParameter { ident: ObjectId, belong: ObjectId, storage: StorageRef }
    EncoderParameter { ident: ObjectId, belong: ObjectId }
    DecoderParameter { ident: ObjectId, belong: ObjectId }
    StateVariableParameter { ident: ObjectId, state_var: ObjectId }
    /// Associates `belong` (a format) with its encoder function.
    DefineEncoder { belong: ObjectId, func: ObjectId }
    /// Associates `belong` (a format) with its decoder function.
    DefineDecoder { belong: ObjectId, func: ObjectId }

    // Forward placeholders produced by flattening and binding.
    DeclareProgram { ident: ObjectId }
    DeclareFormat { ident: ObjectId }
    DeclareFunction { ident: ObjectId }
    DeclareEnum { ident: ObjectId }
    DeclareState { ident: ObjectId }
    DeclareUnion { ident: ObjectId }
    DeclareUnionMember { ident: ObjectId }
    DeclareBitField { ident: ObjectId }
    DeclareProperty { ident: ObjectId }

    // Control flow.
    If { cond: ObjectId }
    Elif { cond: ObjectId }
    Else {}
    EndIf {}
    Match { target: ObjectId }
    ExhaustiveMatch { target: ObjectId }
    Case { cond: ObjectId }
    DefaultCase {}
    EndCase {}
    EndMatch {}
    LoopInfinite {}
    LoopCondition { cond: ObjectId }
    EndLoop {}
    Break {}
    Continue {}
    Ret { value: ObjectId }
    /// Setter success signal; setters do not return a value.
    RetPropertySetterOk {}

    // Expressions and statements.
    ImmediateInt { ident: ObjectId, value: u64 }
    ImmediateTrue { ident: ObjectId }
    ImmediateFalse { ident: ObjectId }
    Binary { ident: ObjectId, op: BinOp, left: ObjectId, right: ObjectId }
    Unary { ident: ObjectId, op: UnOp, operand: ObjectId }
    Assign { left: ObjectId, right: ObjectId }
    Cast { ident: ObjectId, storage: StorageRef, operand: ObjectId }
    Access { ident: ObjectId, base: ObjectId, member: ObjectId }
    Index { ident: ObjectId, base: ObjectId, index: ObjectId }
    ArraySize { ident: ObjectId, array: ObjectId }
    Assert { cond: ObjectId }
    NewObject { ident: ObjectId, storage: StorageRef }
    ReserveSize { target: ObjectId, size: ObjectId }
    ExplicitError { message: ObjectId }

    // Abstract wire operations.
    EncodeInt { target: ObjectId, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    DecodeInt { target: ObjectId, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    EncodeIntVector { target: ObjectId, len: ObjectId, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    EncodeIntVectorFixed { target: ObjectId, count: u64, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    DecodeIntVector { target: ObjectId, len: ObjectId, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    DecodeIntVectorFixed { target: ObjectId, count: u64, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    DecodeIntVectorUntilEof { target: ObjectId, bit_size: u64, endian: EndianExpr, fallback: ObjectId }
    EncodeBytes { target: ObjectId, len: ObjectId }
    DecodeBytes { target: ObjectId, len: ObjectId }
    DecodeBytesUntilEof { target: ObjectId }
    CallEncode { target: ObjectId, obj: ObjectId, size_surplus: u64 }
    CallDecode { target: ObjectId, obj: ObjectId, size_surplus: u64 }
    /// True iff the referenced endian site (null = native host order)
    /// resolves to little endian.
    IsLittleEndian { ident: ObjectId, endian_ref: ObjectId, fallback: ObjectId }
    /// Site whose byte order is decided by `selector` at run time.
    DynamicEndian { ident: ObjectId, selector: ObjectId, fallback: ObjectId }

    // Conditional-field merging.
    ConditionalField { ident: ObjectId, cond: ObjectId, field: ObjectId, belong: ObjectId }
    MergedConditionalField { ident: ObjectId, storage: StorageRef, params: Vec<ObjectId>, merge_mode: MergeMode }
    ConditionalProperty { ident: ObjectId, cond: ObjectId, merged: ObjectId, belong: ObjectId }

    // Out-of-band annotations.
    Metadata { name: ObjectId, refs: Vec<ObjectId> }
}

impl Op {
    /// END tag closing the scope this op opens, if any.
    pub fn end_counterpart(self) -> Option<Op> {
        Some(match self {
            Op::DefineProgram => Op::EndProgram,
            Op::DefineFormat => Op::EndFormat,
            Op::DefineFunction => Op::EndFunction,
            Op::DefineEnum => Op::EndEnum,
            Op::DefineState => Op::EndState,
            Op::DefineUnion => Op::EndUnion,
            Op::DefineUnionMember => Op::EndUnionMember,
            Op::DefineBitField => Op::EndBitField,
            Op::DefineProperty => Op::EndProperty,
            Op::DefineFallback => Op::EndFallback,
            _ => return None,
        })
    }

    /// DECLARE placeholder for this DEFINE scope.
    ///
    /// Fallback regions are self-contained and deliberately have none; a
    /// scope-opening tag outside this mapping is a flattening error.
    pub fn declare_counterpart(self) -> Option<Op> {
        Some(match self {
            Op::DefineProgram => Op::DeclareProgram,
            Op::DefineFormat => Op::DeclareFormat,
            Op::DefineFunction => Op::DeclareFunction,
            Op::DefineEnum => Op::DeclareEnum,
            Op::DefineState => Op::DeclareState,
            Op::DefineUnion => Op::DeclareUnion,
            Op::DefineUnionMember => Op::DeclareUnionMember,
            Op::DefineBitField => Op::DeclareBitField,
            Op::DefineProperty => Op::DeclareProperty,
            _ => return None,
        })
    }

    /// True for tags that close a scope.
    pub fn is_end(self) -> bool {
        matches!(
            self,
            Op::EndProgram
                | Op::EndFormat
                | Op::EndFunction
                | Op::EndEnum
                | Op::EndState
                | Op::EndUnion
                | Op::EndUnionMember
                | Op::EndBitField
                | Op::EndProperty
                | Op::EndFallback
        )
    }
}

impl Code {
    /// Identifier this instruction *defines*, if it defines one.
    ///
    /// Every returned id is registered in the module's ident→index table.
    pub fn defined_ident(&self) -> Option<ObjectId> {
        match self {
            Code::DefineProgram { ident }
            | Code::DefineFormat { ident }
            | Code::DefineFunction { ident, .. }
            | Code::DefineEnum { ident, .. }
            | Code::DefineState { ident }
            | Code::DefineUnion { ident }
            | Code::DefineUnionMember { ident, .. }
            | Code::DefineBitField { ident, .. }
            | Code::DefineProperty { ident, .. }
            | Code::DefineFallback { ident }
            | Code::DefineField { ident, .. }
            | Code::DefineVariable { ident, .. }
            | Code::DefineConstant { ident, .. }
            | Code::DefineEnumMember { ident, .. }
            | Code::DefineParameter { ident, .. }
            | Code::PropertyInputParameter { ident, .. }
            | Code::EncoderParameter { ident, .. }
            | Code::DecoderParameter { ident, .. }
            | Code::StateVariableParameter { ident, .. }
            | Code::ImmediateInt { ident, .. }
            | Code::ImmediateTrue { ident }
            | Code::ImmediateFalse { ident }
            | Code::Binary { ident, .. }
            | Code::Unary { ident, .. }
            | Code::Cast { ident, .. }
            | Code::Access { ident, .. }
            | Code::Index { ident, .. }
            | Code::ArraySize { ident, .. }
            | Code::NewObject { ident, .. }
            | Code::IsLittleEndian { ident, .. }
            | Code::DynamicEndian { ident, .. }
            | Code::ConditionalField { ident, .. }
            | Code::MergedConditionalField { ident, .. }
            | Code::ConditionalProperty { ident, .. } => Some(*ident),
            _ => None,
        }
    }

    /// Type shape carried by this instruction, for diagnostics.
    pub fn storage(&self) -> Option<StorageRef> {
        match self {
            Code::DefineEnum { base: storage, .. }
            | Code::DefineBitField { storage, .. }
            | Code::DefineField { storage, .. }
            | Code::DefineVariable { storage, .. }
            | Code::DefineConstant { storage, .. }
            | Code::DefineParameter { storage, .. }
            | Code::PropertyInputParameter { storage, .. }
            | Code::Cast { storage, .. }
            | Code::NewObject { storage, .. }
            | Code::MergedConditionalField { storage, .. } => Some(*storage),
            _ => None,
        }
    }
}
