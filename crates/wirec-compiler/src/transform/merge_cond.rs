//! Conditional-field merging.
//!
//! Within one property, conditional fields sharing the owner and the
//! exact type shape are folded into a single merged slot; each original
//! field becomes a ConditionalProperty record pointing at the slot. The
//! merged slots are emitted just before the property's END tag, carrying
//! the folded field list as ordered parameters.
//!
//! A group whose shape and ordered condition list match a slot created
//! for an earlier property reuses that slot instead of declaring a second
//! one: the group's fields fold into the existing slot's parameter list
//! and the slot is marked StrictCommonType. Freshly allocated slots are
//! StrictType.

use indexmap::IndexMap;

use wirec_ir::code::{Code, MergeMode};
use wirec_ir::ids::{ObjectId, StorageRef};
use wirec_ir::module::Module;

use super::{TransformError, fresh, skip_scope};

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let code = module.code().to_vec();
    let mut out = Vec::with_capacity(code.len());
    // Every slot created so far, by shape and ordered conditions.
    let mut seen: Vec<SeenSlot> = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        if matches!(code[pos], Code::DefineProperty { .. }) {
            let start = pos;
            skip_scope(&code, &mut pos)?;
            merge_region(module, &code[start..pos], &mut seen, &mut out)?;
        } else {
            out.push(code[pos].clone());
            pos += 1;
        }
    }
    module.replace_code(out);
    Ok(())
}

struct Group {
    fields: Vec<ObjectId>,
    conds: Vec<ObjectId>,
}

struct SeenSlot {
    storage: StorageRef,
    conds: Vec<ObjectId>,
    slot: ObjectId,
    /// Index of the slot's declaration in the rebuilt stream.
    at: usize,
}

fn merge_region(
    module: &mut Module,
    region: &[Code],
    seen: &mut Vec<SeenSlot>,
    out: &mut Vec<Code>,
) -> Result<(), TransformError> {
    // Group the region's conditional fields by owner and exact shape,
    // preserving first-appearance order.
    let mut groups: IndexMap<(ObjectId, StorageRef), Group> = IndexMap::new();
    for instr in region {
        if let Code::ConditionalField { cond, field, belong, .. } = instr {
            let Some(storage) = field_storage(module, *field) else {
                continue;
            };
            let group = groups
                .entry((*belong, storage))
                .or_insert_with(|| Group { fields: Vec::new(), conds: Vec::new() });
            group.fields.push(*field);
            group.conds.push(*cond);
        }
    }

    // One slot per group. A group matching a slot from an earlier
    // property reuses it: the fields fold into its parameter list and
    // its mode flips to StrictCommonType.
    let mut slot_of: IndexMap<ObjectId, ObjectId> = IndexMap::new();
    let mut slots: Vec<(ObjectId, StorageRef, Vec<ObjectId>, Vec<ObjectId>)> = Vec::new();
    for ((_, storage), group) in &groups {
        let reused = seen
            .iter()
            .find(|s| s.storage == *storage && s.conds == group.conds)
            .map(|s| (s.slot, s.at));
        let slot = match reused {
            Some((slot, at)) => {
                if let Code::MergedConditionalField { params, merge_mode, .. } = &mut out[at] {
                    params.extend(group.fields.iter().copied());
                    *merge_mode = MergeMode::StrictCommonType;
                }
                slot
            }
            None => {
                let slot = fresh(module, "merged");
                slots.push((slot, *storage, group.conds.clone(), group.fields.clone()));
                slot
            }
        };
        for &field in &group.fields {
            slot_of.insert(field, slot);
        }
    }

    let Some((end, body)) = region.split_last() else {
        return Ok(());
    };
    for instr in body {
        match instr {
            Code::ConditionalField { ident, cond, belong, field } => {
                match slot_of.get(field) {
                    Some(&merged) => out.push(Code::ConditionalProperty {
                        ident: *ident,
                        cond: *cond,
                        merged,
                        belong: *belong,
                    }),
                    None => out.push(instr.clone()),
                }
            }
            other => out.push(other.clone()),
        }
    }
    for (slot, storage, conds, fields) in slots {
        seen.push(SeenSlot { storage, conds, slot, at: out.len() });
        out.push(Code::MergedConditionalField {
            ident: slot,
            storage,
            params: fields,
            merge_mode: MergeMode::StrictType,
        });
    }
    out.push(end.clone());
    Ok(())
}

/// Shape of the field's defining instruction, if it has one.
fn field_storage(module: &Module, field: ObjectId) -> Option<StorageRef> {
    let index = module.ident_index(field).ok()?;
    module.code().get(index)?.storage()
}
