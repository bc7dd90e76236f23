//! Byte-granular fallback lowering.
//!
//! Runtimes without native multi-byte integer support execute a fallback
//! region instead of the abstract wire operation. This pass synthesizes
//! one self-contained DefineFallback region per eligible site, appends the
//! regions at the end of the stream, and links each site to its region
//! through the `fallback` operand. A region stages each integer through a
//! byte buffer: a shift/mask loop assembles or splits the value and a
//! single byte-array transfer moves the buffer. Vectors run the same per
//! element inside an outer loop; until-EOF decodes do one bulk byte read
//! followed by reassembly.
//!
//! Eligible are integer transfers whose width is a multiple of 8 other
//! than 8 itself. Single-byte and sub-byte transfers need no fallback.
//! Dynamic-endian sites are lowered first: each gets a region computing an
//! is-little flag variable, which the integer regions branch on. The pass
//! is idempotent, a site with a non-null `fallback` is left alone.

use std::collections::HashMap;

use wirec_ir::code::{BinOp, Code, Endian, EndianExpr};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;
use wirec_ir::storage::{Storage, StorageKind, Storages};

use super::{TransformError, fresh};

/// Transfer direction of the site being lowered.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Dir {
    Encode,
    Decode,
}

/// Element-count source for vector sites.
#[derive(Clone, Copy)]
enum Len {
    Fixed(u64),
    Ident(ObjectId),
    UntilEof,
}

fn eligible(bit_size: u64) -> bool {
    bit_size != 0 && bit_size != 8 && bit_size % 8 == 0
}

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let mut code = module.code().to_vec();
    let mut regions: Vec<Code> = Vec::new();
    let mut little_flags: HashMap<ObjectId, ObjectId> = HashMap::new();

    // Dynamic-endian sites first: integer regions branch on their flags.
    for instr in code.iter_mut() {
        if let Code::DynamicEndian { ident, selector, fallback } = instr {
            if fallback.is_null() {
                let (region, flag) = lower_dynamic(module, &mut regions, *selector);
                *fallback = region;
                little_flags.insert(*ident, flag);
            }
        }
    }

    for instr in code.iter_mut() {
        match *instr {
            Code::EncodeInt { target, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = scalar_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Encode,
                    target,
                    bit_size,
                    endian,
                );
            }
            Code::DecodeInt { target, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = scalar_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Decode,
                    target,
                    bit_size,
                    endian,
                );
            }
            Code::EncodeIntVector { target, len, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = vector_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Encode,
                    target,
                    Len::Ident(len),
                    bit_size,
                    endian,
                );
            }
            Code::EncodeIntVectorFixed { target, count, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = vector_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Encode,
                    target,
                    Len::Fixed(count),
                    bit_size,
                    endian,
                );
            }
            Code::DecodeIntVector { target, len, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = vector_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Decode,
                    target,
                    Len::Ident(len),
                    bit_size,
                    endian,
                );
            }
            Code::DecodeIntVectorFixed { target, count, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = vector_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Decode,
                    target,
                    Len::Fixed(count),
                    bit_size,
                    endian,
                );
            }
            Code::DecodeIntVectorUntilEof { target, bit_size, endian, ref mut fallback }
                if fallback.is_null() && eligible(bit_size) =>
            {
                *fallback = vector_region(
                    module,
                    &mut regions,
                    &little_flags,
                    Dir::Decode,
                    target,
                    Len::UntilEof,
                    bit_size,
                    endian,
                );
            }
            Code::IsLittleEndian { endian_ref, ref mut fallback, .. }
                if fallback.is_null() =>
            {
                if let Some(&flag) = little_flags.get(&endian_ref) {
                    *fallback = flag;
                }
            }
            _ => {}
        }
    }

    code.extend(regions);
    module.replace_code(code);
    Ok(())
}

// --- region builders ----------------------------------------------------

/// `is_little = selector == 1; if selector == 2 { is_little = host order }`
fn lower_dynamic(
    module: &mut Module,
    out: &mut Vec<Code>,
    selector: ObjectId,
) -> (ObjectId, ObjectId) {
    let region = fresh(module, "endian.fallback");
    out.push(Code::DefineFallback { ident: region });
    let one = imm(module, out, 1);
    let from_selector = binary(module, out, BinOp::Eq, selector, one);
    let bool_shape = module.get_storage_ref(Storages::single(Storage::bare(StorageKind::Bool)));
    let flag = fresh(module, "is_little");
    out.push(Code::DefineVariable { ident: flag, init: from_selector, storage: bool_shape });
    let two = imm(module, out, 2);
    let wants_host = binary(module, out, BinOp::Eq, selector, two);
    out.push(Code::If { cond: wants_host });
    let host = fresh(module, "host_little");
    out.push(Code::IsLittleEndian {
        ident: host,
        endian_ref: ObjectId::NULL,
        fallback: ObjectId::NULL,
    });
    out.push(Code::Assign { left: flag, right: host });
    out.push(Code::EndIf {});
    out.push(Code::EndFallback {});
    (region, flag)
}

fn scalar_region(
    module: &mut Module,
    out: &mut Vec<Code>,
    flags: &HashMap<ObjectId, ObjectId>,
    dir: Dir,
    target: ObjectId,
    bit_size: u64,
    endian: EndianExpr,
) -> ObjectId {
    let region = fresh(module, "int.fallback");
    out.push(Code::DefineFallback { ident: region });
    with_endianness(module, out, flags, endian, |module, out, little| {
        byte_loop(module, out, dir, target, bit_size, little);
    });
    out.push(Code::EndFallback {});
    region
}

fn vector_region(
    module: &mut Module,
    out: &mut Vec<Code>,
    flags: &HashMap<ObjectId, ObjectId>,
    dir: Dir,
    target: ObjectId,
    len: Len,
    bit_size: u64,
    endian: EndianExpr,
) -> ObjectId {
    let region = fresh(module, "vector.fallback");
    out.push(Code::DefineFallback { ident: region });
    match len {
        Len::UntilEof => until_eof_body(module, out, flags, target, bit_size, endian),
        Len::Fixed(count) => {
            let count = imm(module, out, count);
            element_loop(module, out, flags, dir, target, count, bit_size, endian);
        }
        Len::Ident(count) => {
            element_loop(module, out, flags, dir, target, count, bit_size, endian);
        }
    }
    out.push(Code::EndFallback {});
    region
}

/// Per-element loop delegating each element to the scalar byte loop.
fn element_loop(
    module: &mut Module,
    out: &mut Vec<Code>,
    flags: &HashMap<ObjectId, ObjectId>,
    dir: Dir,
    target: ObjectId,
    count: ObjectId,
    bit_size: u64,
    endian: EndianExpr,
) {
    let zero = imm(module, out, 0);
    let one = imm(module, out, 1);
    let index_shape = module.get_storage_ref(Storages::uint(64));
    let j = fresh(module, "i");
    out.push(Code::DefineVariable { ident: j, init: zero, storage: index_shape });
    let cond = binary(module, out, BinOp::Lt, j, count);
    out.push(Code::LoopCondition { cond });
    match dir {
        Dir::Encode => {
            let elem = fresh(module, "elem");
            out.push(Code::Index { ident: elem, base: target, index: j });
            with_endianness(module, out, flags, endian, |module, out, little| {
                byte_loop(module, out, Dir::Encode, elem, bit_size, little);
            });
        }
        Dir::Decode => {
            let elem_shape = module.get_storage_ref(Storages::uint(bit_size));
            let elem = fresh(module, "elem");
            out.push(Code::DefineVariable { ident: elem, init: zero, storage: elem_shape });
            with_endianness(module, out, flags, endian, |module, out, little| {
                byte_loop(module, out, Dir::Decode, elem, bit_size, little);
            });
            let slot = fresh(module, "slot");
            out.push(Code::Index { ident: slot, base: target, index: j });
            out.push(Code::Assign { left: slot, right: elem });
        }
    }
    let next = binary(module, out, BinOp::Add, j, one);
    out.push(Code::Assign { left: j, right: next });
    out.push(Code::EndLoop {});
}

/// Bulk byte read, element-count check, then reassembly.
fn until_eof_body(
    module: &mut Module,
    out: &mut Vec<Code>,
    flags: &HashMap<ObjectId, ObjectId>,
    target: ObjectId,
    bit_size: u64,
    endian: EndianExpr,
) {
    let n = bit_size / 8;
    let byte_shape =
        module.get_storage_ref(Storages::single(Storage::bare(StorageKind::ByteVector)));
    let bytes = fresh(module, "bytes");
    out.push(Code::NewObject { ident: bytes, storage: byte_shape });
    out.push(Code::DecodeBytesUntilEof { target: bytes });
    let total = fresh(module, "total");
    out.push(Code::ArraySize { ident: total, array: bytes });
    let n_imm = imm(module, out, n);
    let rem = binary(module, out, BinOp::Mod, total, n_imm);
    let zero = imm(module, out, 0);
    let aligned = binary(module, out, BinOp::Eq, rem, zero);
    out.push(Code::Assert { cond: aligned });
    let count = binary(module, out, BinOp::Div, total, n_imm);
    out.push(Code::ReserveSize { target, size: count });

    let one = imm(module, out, 1);
    let index_shape = module.get_storage_ref(Storages::uint(64));
    let j = fresh(module, "i");
    out.push(Code::DefineVariable { ident: j, init: zero, storage: index_shape });
    let cond = binary(module, out, BinOp::Lt, j, count);
    out.push(Code::LoopCondition { cond });
    let elem_shape = module.get_storage_ref(Storages::uint(bit_size));
    let elem = fresh(module, "elem");
    out.push(Code::DefineVariable { ident: elem, init: zero, storage: elem_shape });
    let base = binary(module, out, BinOp::Mul, j, n_imm);
    with_endianness(module, out, flags, endian, |module, out, little| {
        assemble_loop(module, out, elem, bytes, base, n, little);
    });
    let slot = fresh(module, "slot");
    out.push(Code::Index { ident: slot, base: target, index: j });
    out.push(Code::Assign { left: slot, right: elem });
    let next = binary(module, out, BinOp::Add, j, one);
    out.push(Code::Assign { left: j, right: next });
    out.push(Code::EndLoop {});
}

/// Emit `body` once when the byte order is statically known, or under an
/// if/else on the little-endian flag when it is decided at run time.
fn with_endianness<F>(
    module: &mut Module,
    out: &mut Vec<Code>,
    flags: &HashMap<ObjectId, ObjectId>,
    endian: EndianExpr,
    mut body: F,
) where
    F: FnMut(&mut Module, &mut Vec<Code>, bool),
{
    let flag = match endian.endian {
        Endian::Big => return body(module, out, false),
        Endian::Little => return body(module, out, true),
        Endian::Native => {
            let host = fresh(module, "host_little");
            out.push(Code::IsLittleEndian {
                ident: host,
                endian_ref: ObjectId::NULL,
                fallback: ObjectId::NULL,
            });
            host
        }
        Endian::Dynamic => match flags.get(&endian.dynamic_ref) {
            Some(&flag) => flag,
            // Unresolved site: network order.
            None => return body(module, out, false),
        },
    };
    out.push(Code::If { cond: flag });
    body(module, out, true);
    out.push(Code::Else {});
    body(module, out, false);
    out.push(Code::EndIf {});
}

/// Stage one integer through a `bit_size / 8` byte buffer: a shift/mask
/// loop fills or drains the buffer, a single byte-array operation moves
/// it over the wire.
fn byte_loop(
    module: &mut Module,
    out: &mut Vec<Code>,
    dir: Dir,
    value: ObjectId,
    bit_size: u64,
    little: bool,
) {
    let n = bit_size / 8;
    let zero = imm(module, out, 0);
    let one = imm(module, out, 1);
    let eight = imm(module, out, 8);
    let n_imm = imm(module, out, n);
    let byte_shape =
        module.get_storage_ref(Storages::single(Storage::bare(StorageKind::ByteVector)));
    let buf = fresh(module, "buf");
    out.push(Code::NewObject { ident: buf, storage: byte_shape });
    out.push(Code::ReserveSize { target: buf, size: n_imm });
    if dir == Dir::Decode {
        out.push(Code::DecodeBytes { target: buf, len: n_imm });
        out.push(Code::Assign { left: value, right: zero });
    }
    let index_shape = module.get_storage_ref(Storages::uint(64));
    let i = fresh(module, "i");
    out.push(Code::DefineVariable { ident: i, init: zero, storage: index_shape });
    let cond = binary(module, out, BinOp::Lt, i, n_imm);
    out.push(Code::LoopCondition { cond });
    let shift = byte_shift(module, out, i, n, eight, little);
    match dir {
        Dir::Encode => {
            let moved = binary(module, out, BinOp::Shr, value, shift);
            let ff = imm(module, out, 0xff);
            let byte = binary(module, out, BinOp::BitAnd, moved, ff);
            let slot = fresh(module, "slot");
            out.push(Code::Index { ident: slot, base: buf, index: i });
            out.push(Code::Assign { left: slot, right: byte });
        }
        Dir::Decode => {
            let byte = fresh(module, "byte");
            out.push(Code::Index { ident: byte, base: buf, index: i });
            let wide = binary(module, out, BinOp::Shl, byte, shift);
            let merged = binary(module, out, BinOp::BitOr, value, wide);
            out.push(Code::Assign { left: value, right: merged });
        }
    }
    let next = binary(module, out, BinOp::Add, i, one);
    out.push(Code::Assign { left: i, right: next });
    out.push(Code::EndLoop {});
    if dir == Dir::Encode {
        out.push(Code::EncodeBytes { target: buf, len: n_imm });
    }
}

/// Rebuild one integer from a byte vector slice starting at `base`.
fn assemble_loop(
    module: &mut Module,
    out: &mut Vec<Code>,
    elem: ObjectId,
    bytes: ObjectId,
    base: ObjectId,
    n: u64,
    little: bool,
) {
    let zero = imm(module, out, 0);
    let one = imm(module, out, 1);
    let eight = imm(module, out, 8);
    let n_imm = imm(module, out, n);
    let index_shape = module.get_storage_ref(Storages::uint(64));
    let k = fresh(module, "k");
    out.push(Code::DefineVariable { ident: k, init: zero, storage: index_shape });
    out.push(Code::Assign { left: elem, right: zero });
    let cond = binary(module, out, BinOp::Lt, k, n_imm);
    out.push(Code::LoopCondition { cond });
    let idx = binary(module, out, BinOp::Add, base, k);
    let byte = fresh(module, "byte");
    out.push(Code::Index { ident: byte, base: bytes, index: idx });
    let shift = byte_shift(module, out, k, n, eight, little);
    let wide = binary(module, out, BinOp::Shl, byte, shift);
    let merged = binary(module, out, BinOp::BitOr, elem, wide);
    out.push(Code::Assign { left: elem, right: merged });
    let next = binary(module, out, BinOp::Add, k, one);
    out.push(Code::Assign { left: k, right: next });
    out.push(Code::EndLoop {});
}

/// Shift for byte `i` of `n`: `i * 8` little endian, `(n - 1 - i) * 8` big.
fn byte_shift(
    module: &mut Module,
    out: &mut Vec<Code>,
    i: ObjectId,
    n: u64,
    eight: ObjectId,
    little: bool,
) -> ObjectId {
    if little {
        binary(module, out, BinOp::Mul, i, eight)
    } else {
        let top = imm(module, out, n - 1);
        let flipped = binary(module, out, BinOp::Sub, top, i);
        binary(module, out, BinOp::Mul, flipped, eight)
    }
}

fn imm(module: &mut Module, out: &mut Vec<Code>, value: u64) -> ObjectId {
    let ident = fresh(module, "imm");
    out.push(Code::ImmediateInt { ident, value });
    ident
}

fn binary(
    module: &mut Module,
    out: &mut Vec<Code>,
    op: BinOp,
    left: ObjectId,
    right: ObjectId,
) -> ObjectId {
    let ident = fresh(module, "tmp");
    out.push(Code::Binary { ident, op, left, right });
    ident
}
