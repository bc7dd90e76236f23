//! Bit-field packing and accessor derivation.
//!
//! A converted bit field declares its shape as the concatenation of its
//! member shapes. This pass computes each member's bit width, repacks the
//! owner as a single unsigned integer of the total width, and derives a
//! getter and a setter function per member right after the bit-field
//! scope. Each member record is followed by placeholders declaring its
//! accessor pair. Members are packed most significant first.
//!
//! Width computation follows struct references recursively; a reference
//! cycle makes the total undecidable, in which case the declared shape is
//! kept and no accessors are derived.

use std::collections::HashSet;

use wirec_ir::code::{BinOp, Code, FunctionKind, UnOp};
use wirec_ir::ids::{ObjectId, StorageRef};
use wirec_ir::module::Module;
use wirec_ir::storage::{StorageKind, Storages};

use super::{TransformError, fresh, skip_scope};

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let code = module.code().to_vec();
    let mut out = Vec::with_capacity(code.len());
    let mut pos = 0;
    while pos < code.len() {
        if let Code::DefineBitField { ident, belong, .. } = code[pos] {
            let start = pos;
            skip_scope(&code, &mut pos)?;
            derive(module, &code[start..pos], ident, belong, &mut out)?;
        } else {
            out.push(code[pos].clone());
            pos += 1;
        }
    }
    module.replace_code(out);
    Ok(())
}

fn derive(
    module: &mut Module,
    region: &[Code],
    owner: ObjectId,
    belong: ObjectId,
    out: &mut Vec<Code>,
) -> Result<(), TransformError> {
    let mut members = Vec::new();
    for instr in region {
        if let Code::DefineField { ident, storage, .. } = instr {
            let shape = module.get_storage(*storage)?.clone();
            match shape_bits(module, &shape, &mut HashSet::new(), *ident)? {
                Some(bits) => members.push((*ident, *storage, bits)),
                None => {
                    out.extend(region.iter().cloned());
                    return Ok(());
                }
            }
        }
    }
    let total: u64 = members.iter().map(|m| m.2).sum();
    if total == 0 || total > 64 {
        // Nothing to pack, or wider than the packed-integer model allows.
        out.extend(region.iter().cloned());
        return Ok(());
    }

    // Accessor ids are allocated up front so the member records can
    // declare them.
    let mut plans = Vec::with_capacity(members.len());
    let mut offset = 0;
    for (member, storage, width) in members {
        let shift = total - offset - width;
        offset += width;
        let name = module.ident_text(member).unwrap_or("field").to_string();
        let getter = fresh(module, &format!("{name}.get"));
        let setter = fresh(module, &format!("{name}.set"));
        plans.push(Plan { member, storage, width, shift, getter, setter });
    }

    let packed = module.get_storage_ref(Storages::uint(total));
    out.push(Code::DefineBitField { ident: owner, belong, storage: packed });
    for instr in &region[1..] {
        out.push(instr.clone());
        if let Code::DefineField { ident, .. } = instr
            && let Some(plan) = plans.iter().find(|p| p.member == *ident)
        {
            out.push(Code::DeclareFunction { ident: plan.getter });
            out.push(Code::DeclareFunction { ident: plan.setter });
        }
    }

    for plan in &plans {
        emit_getter(module, out, owner, plan);
        emit_setter(module, out, owner, plan, packed);
    }
    Ok(())
}

struct Plan {
    member: ObjectId,
    storage: StorageRef,
    width: u64,
    shift: u64,
    getter: ObjectId,
    setter: ObjectId,
}

fn mask(width: u64) -> u64 {
    if width >= 64 { u64::MAX } else { (1 << width) - 1 }
}

/// `value = cast((owner >> shift) & mask)`
fn emit_getter(module: &mut Module, out: &mut Vec<Code>, owner: ObjectId, plan: &Plan) {
    out.push(Code::DefineFunction {
        ident: plan.getter,
        belong: owner,
        kind: FunctionKind::BitGetter,
    });
    let shift_imm = fresh(module, "shift");
    out.push(Code::ImmediateInt { ident: shift_imm, value: plan.shift });
    let shifted = fresh(module, "shifted");
    out.push(Code::Binary { ident: shifted, op: BinOp::Shr, left: owner, right: shift_imm });
    let mask_imm = fresh(module, "mask");
    out.push(Code::ImmediateInt { ident: mask_imm, value: mask(plan.width) });
    let masked = fresh(module, "masked");
    out.push(Code::Binary { ident: masked, op: BinOp::BitAnd, left: shifted, right: mask_imm });
    let value = fresh(module, "value");
    out.push(Code::Cast { ident: value, storage: plan.storage, operand: masked });
    out.push(Code::Ret { value });
    out.push(Code::EndFunction {});
}

/// `assert value <= mask;
///  owner = (owner & !(mask << shift)) | ((cast(value) & mask) << shift)`
fn emit_setter(
    module: &mut Module,
    out: &mut Vec<Code>,
    owner: ObjectId,
    plan: &Plan,
    packed: StorageRef,
) {
    out.push(Code::DefineFunction {
        ident: plan.setter,
        belong: owner,
        kind: FunctionKind::BitSetter,
    });
    let input = fresh(module, "value");
    out.push(Code::PropertyInputParameter {
        ident: input,
        belong: plan.member,
        storage: plan.storage,
    });
    let mask_imm = fresh(module, "mask");
    out.push(Code::ImmediateInt { ident: mask_imm, value: mask(plan.width) });
    let in_range = fresh(module, "in_range");
    out.push(Code::Binary { ident: in_range, op: BinOp::Le, left: input, right: mask_imm });
    out.push(Code::Assert { cond: in_range });
    // Widen to the packed container before shifting into position.
    let widened = fresh(module, "widened");
    out.push(Code::Cast { ident: widened, storage: packed, operand: input });
    let masked = fresh(module, "masked");
    out.push(Code::Binary { ident: masked, op: BinOp::BitAnd, left: widened, right: mask_imm });
    let shift_imm = fresh(module, "shift");
    out.push(Code::ImmediateInt { ident: shift_imm, value: plan.shift });
    let moved = fresh(module, "moved");
    out.push(Code::Binary { ident: moved, op: BinOp::Shl, left: masked, right: shift_imm });
    let hole_imm = fresh(module, "hole");
    out.push(Code::ImmediateInt { ident: hole_imm, value: mask(plan.width) << plan.shift });
    let hole = fresh(module, "keep");
    out.push(Code::Unary { ident: hole, op: UnOp::BitNot, operand: hole_imm });
    let cleared = fresh(module, "cleared");
    out.push(Code::Binary { ident: cleared, op: BinOp::BitAnd, left: owner, right: hole });
    let merged = fresh(module, "merged");
    out.push(Code::Binary { ident: merged, op: BinOp::BitOr, left: cleared, right: moved });
    out.push(Code::Assign { left: owner, right: merged });
    out.push(Code::RetPropertySetterOk {});
    out.push(Code::EndFunction {});
}

/// Total bit width of a shape, `None` when undecidable.
fn shape_bits(
    module: &Module,
    shape: &Storages,
    visiting: &mut HashSet<ObjectId>,
    member: ObjectId,
) -> Result<Option<u64>, TransformError> {
    let elements = &shape.0;
    let mut total = 0u64;
    let mut i = 0;
    while i < elements.len() {
        let element = elements[i];
        i += 1;
        let bits = match element.kind {
            StorageKind::Uint | StorageKind::Int | StorageKind::Float => match element.size {
                Some(bits) => Some(bits),
                None => return Err(TransformError::UnexpectedStorage(member)),
            },
            StorageKind::Bool => Some(8),
            StorageKind::Enum => match element.reference {
                Some(reference) => enum_bits(module, reference, visiting, member)?,
                None => return Err(TransformError::UnexpectedStorage(member)),
            },
            StorageKind::StructRef => match (element.size, element.reference) {
                // Cached width is stored as width + 1.
                (Some(cached), _) if cached > 0 => Some(cached - 1),
                (_, Some(reference)) => struct_bits(module, reference, visiting, member)?,
                _ => return Err(TransformError::UnexpectedStorage(member)),
            },
            StorageKind::Variant => {
                // Branches follow inline; width is the widest branch.
                // Every branch must reference a struct.
                let count = element.size.unwrap_or(0) as usize;
                let mut widest = Some(0u64);
                for _ in 0..count {
                    let branch = *elements
                        .get(i)
                        .ok_or(TransformError::UnexpectedStorage(member))?;
                    i += 1;
                    if branch.kind != StorageKind::StructRef {
                        return Err(TransformError::UnexpectedStorage(member));
                    }
                    let branch_bits =
                        shape_bits(module, &Storages::single(branch), visiting, member)?;
                    widest = match (widest, branch_bits) {
                        (Some(w), Some(b)) => Some(w.max(b)),
                        _ => None,
                    };
                }
                widest
            }
            _ => return Err(TransformError::UnexpectedStorage(member)),
        };
        match bits {
            Some(bits) => total += bits,
            None => return Ok(None),
        }
    }
    Ok(Some(total))
}

fn enum_bits(
    module: &Module,
    reference: ObjectId,
    visiting: &mut HashSet<ObjectId>,
    member: ObjectId,
) -> Result<Option<u64>, TransformError> {
    let index = match module.ident_index(reference) {
        Ok(index) => index,
        Err(_) => return Ok(None),
    };
    match &module.code()[index] {
        Code::DefineEnum { base, .. } => {
            let shape = module.get_storage(*base)?.clone();
            shape_bits(module, &shape, visiting, member)
        }
        _ => Err(TransformError::UnexpectedStorage(member)),
    }
}

/// Maximum bit width of a referenced definition, following nested fields.
fn struct_bits(
    module: &Module,
    reference: ObjectId,
    visiting: &mut HashSet<ObjectId>,
    member: ObjectId,
) -> Result<Option<u64>, TransformError> {
    if !visiting.insert(reference) {
        return Ok(None);
    }
    let result = (|| {
        let index = match module.ident_index(reference) {
            Ok(index) => index,
            Err(_) => return Ok(None),
        };
        let code = module.code();
        match &code[index] {
            Code::DefineBitField { storage, .. } => {
                let shape = module.get_storage(*storage)?.clone();
                shape_bits(module, &shape, visiting, member)
            }
            Code::DefineFormat { .. } => scope_bits(module, code, index, visiting, member),
            Code::DefineUnion { .. } => union_bits(module, code, index, visiting, member),
            _ => Err(TransformError::UnexpectedStorage(member)),
        }
    })();
    visiting.remove(&reference);
    result
}

/// Sum of direct field widths of the scope opened at `start`, with nested
/// unions contributing their widest branch. Functions, properties and
/// state blocks hold no wire bits and are skipped.
fn scope_bits(
    module: &Module,
    code: &[Code],
    start: usize,
    visiting: &mut HashSet<ObjectId>,
    member: ObjectId,
) -> Result<Option<u64>, TransformError> {
    let mut total = 0u64;
    let mut pos = start + 1;
    loop {
        let instr = code.get(pos).ok_or_else(|| {
            TransformError::UnterminatedScope(code[start].op())
        })?;
        let bits = match instr {
            Code::DefineField { storage, .. } => {
                let shape = module.get_storage(*storage)?.clone();
                shape_bits(module, &shape, visiting, member)?
            }
            Code::DefineBitField { storage, .. } => {
                let shape = module.get_storage(*storage)?.clone();
                let bits = shape_bits(module, &shape, visiting, member)?;
                skip_scope(code, &mut pos)?;
                match bits {
                    Some(bits) => {
                        total += bits;
                        continue;
                    }
                    None => return Ok(None),
                }
            }
            Code::DefineUnion { .. } => {
                let bits = union_bits(module, code, pos, visiting, member)?;
                skip_scope(code, &mut pos)?;
                match bits {
                    Some(bits) => {
                        total += bits;
                        continue;
                    }
                    None => return Ok(None),
                }
            }
            Code::DefineFunction { .. }
            | Code::DefineProperty { .. }
            | Code::DefineState { .. } => {
                skip_scope(code, &mut pos)?;
                continue;
            }
            other if other.op().is_end() => return Ok(Some(total)),
            _ => {
                pos += 1;
                continue;
            }
        };
        match bits {
            Some(bits) => total += bits,
            None => return Ok(None),
        }
        pos += 1;
    }
}

/// Widest member of the union opened at `start`.
fn union_bits(
    module: &Module,
    code: &[Code],
    start: usize,
    visiting: &mut HashSet<ObjectId>,
    member: ObjectId,
) -> Result<Option<u64>, TransformError> {
    let mut widest = 0u64;
    let mut pos = start + 1;
    loop {
        match code.get(pos) {
            Some(Code::DefineUnionMember { .. }) => {
                match scope_bits(module, code, pos, visiting, member)? {
                    Some(bits) => widest = widest.max(bits),
                    None => return Ok(None),
                }
                skip_scope(code, &mut pos)?;
            }
            Some(Code::EndUnion {}) => return Ok(Some(widest)),
            Some(_) => pos += 1,
            None => return Err(TransformError::UnterminatedScope(code[start].op())),
        }
    }
}
