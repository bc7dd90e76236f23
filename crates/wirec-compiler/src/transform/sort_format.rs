//! Dependency ordering of formats.
//!
//! Reorders format definitions so every format appears after the formats
//! its fields reference, with ties broken by first appearance. The
//! DECLARE placeholders inside each program region are reordered to
//! match, each format definition travels together with its hoisted
//! children, and whole program chunks are reordered by their earliest
//! format. Reference cycles keep their first-seen order. The pass is
//! deterministic and idempotent, and records the final [start, end)
//! instruction range of every program chunk on the module.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use wirec_ir::code::{Code, Op};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;

use super::{Segment, TransformError, segments};

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let code = module.code().to_vec();
    let segs = segments(&code)?;

    // Formats in first-seen order, and their format-to-format field deps.
    let mut order: Vec<ObjectId> = Vec::new();
    let mut format_set: HashSet<ObjectId> = HashSet::new();
    for seg in &segs {
        if seg.op == Op::DefineFormat {
            if let Some(ident) = code[seg.start].defined_ident() {
                order.push(ident);
                format_set.insert(ident);
            }
        }
    }
    let mut deps: IndexMap<ObjectId, Vec<ObjectId>> = IndexMap::new();
    for seg in &segs {
        if seg.op != Op::DefineFormat {
            continue;
        }
        let Some(ident) = code[seg.start].defined_ident() else {
            continue;
        };
        let entry = deps.entry(ident).or_default();
        for instr in &code[seg.start..seg.end] {
            if let Code::DefineField { storage, .. } = instr {
                for element in module.get_storage(*storage)?.iter() {
                    if let Some(reference) = element.reference {
                        if reference != ident
                            && format_set.contains(&reference)
                            && !entry.contains(&reference)
                        {
                            entry.push(reference);
                        }
                    }
                }
            }
        }
    }
    let rank = toposort(&order, &deps);

    // Split the stream: leading leaves, program chunks, trailing fallback
    // regions.
    let mut prelude: Vec<Segment> = Vec::new();
    let mut chunks: Vec<Vec<Segment>> = Vec::new();
    let mut tail: Vec<Segment> = Vec::new();
    for seg in segs {
        if seg.op == Op::DefineFallback {
            tail.push(seg);
        } else if seg.op == Op::DefineProgram {
            chunks.push(vec![seg]);
        } else if let Some(chunk) = chunks.last_mut() {
            chunk.push(seg);
        } else {
            prelude.push(seg);
        }
    }

    // Chunks follow their earliest format.
    chunks.sort_by_key(|chunk| {
        chunk
            .iter()
            .filter(|seg| seg.op == Op::DefineFormat)
            .filter_map(|seg| code[seg.start].defined_ident())
            .filter_map(|ident| rank.get(&ident).copied())
            .min()
            .unwrap_or(usize::MAX)
    });

    let mut out = Vec::with_capacity(code.len());
    for seg in &prelude {
        emit_segment(&code, seg, &mut out);
    }
    let mut programs = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let start = out.len();
        emit_chunk(&code, chunk, &rank, &mut out);
        programs.push((start, out.len()));
    }
    for seg in &tail {
        emit_segment(&code, seg, &mut out);
    }
    module.replace_code(out);
    module.programs = programs;
    Ok(())
}

/// Emit one program chunk with its formats in dependency order.
fn emit_chunk(
    code: &[Code],
    chunk: &[Segment],
    rank: &HashMap<ObjectId, usize>,
    out: &mut Vec<Code>,
) {
    // The program region lists its direct children as placeholders; a
    // following segment headed by one of those idents starts a child
    // group that moves as a unit.
    let program = &chunk[0];
    let mut declared: HashSet<ObjectId> = HashSet::new();
    for instr in &code[program.start..program.end] {
        match instr {
            Code::DeclareFormat { ident }
            | Code::DeclareEnum { ident }
            | Code::DeclareState { ident }
            | Code::DeclareUnion { ident }
            | Code::DeclareBitField { ident }
            | Code::DeclareProperty { ident }
            | Code::DeclareFunction { ident } => {
                declared.insert(*ident);
            }
            _ => {}
        }
    }

    // Reorder the format placeholders inside the program region.
    let region: Vec<Code> = code[program.start..program.end]
        .iter()
        .filter(|instr| !matches!(instr, Code::DeclareProgram { .. }))
        .cloned()
        .collect();
    let mut format_decls: Vec<ObjectId> = region
        .iter()
        .filter_map(|instr| match instr {
            Code::DeclareFormat { ident } => Some(*ident),
            _ => None,
        })
        .collect();
    format_decls.sort_by_key(|ident| rank.get(ident).copied().unwrap_or(usize::MAX));
    let mut next_decl = format_decls.into_iter();
    for instr in region {
        match instr {
            Code::DeclareFormat { .. } => {
                if let Some(ident) = next_decl.next() {
                    out.push(Code::DeclareFormat { ident });
                }
            }
            other => out.push(other),
        }
    }

    // Group the child segments and reorder the format groups.
    let mut groups: Vec<(Option<ObjectId>, Vec<Segment>)> = Vec::new();
    for seg in &chunk[1..] {
        let head = code[seg.start].defined_ident();
        let is_child = head.is_some_and(|ident| declared.contains(&ident));
        if is_child || groups.is_empty() {
            let format_head = match (seg.op, head) {
                (Op::DefineFormat, Some(ident)) => Some(ident),
                _ => None,
            };
            groups.push((format_head, vec![*seg]));
        } else if let Some(group) = groups.last_mut() {
            group.1.push(*seg);
        }
    }
    let mut format_groups: Vec<usize> = groups
        .iter()
        .enumerate()
        .filter_map(|(i, (head, _))| head.map(|_| i))
        .collect();
    let mut sorted = format_groups.clone();
    sorted.sort_by_key(|&i| {
        groups[i]
            .0
            .and_then(|ident| rank.get(&ident).copied())
            .unwrap_or(usize::MAX)
    });
    let placement: HashMap<usize, usize> =
        format_groups.drain(..).zip(sorted).collect();
    for (i, (head, segments)) in groups.iter().enumerate() {
        let source = match head {
            Some(_) => &groups[placement[&i]].1,
            None => segments,
        };
        for seg in source {
            emit_segment(code, seg, out);
        }
    }
}

fn emit_segment(code: &[Code], seg: &Segment, out: &mut Vec<Code>) {
    out.extend(code[seg.start..seg.end].iter().cloned());
}

/// Kahn's algorithm; among ready nodes the first-seen one wins, and any
/// cycle remainder keeps first-seen order.
fn toposort(
    order: &[ObjectId],
    deps: &IndexMap<ObjectId, Vec<ObjectId>>,
) -> HashMap<ObjectId, usize> {
    let mut remaining: Vec<ObjectId> = order.to_vec();
    let mut emitted: HashSet<ObjectId> = HashSet::new();
    let mut rank = HashMap::with_capacity(order.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|ident| {
            deps.get(ident)
                .map(|list| list.iter().all(|dep| emitted.contains(dep)))
                .unwrap_or(true)
        });
        // No ready node means a cycle: emit the first remaining one.
        let index = ready.unwrap_or(0);
        let ident = remaining.remove(index);
        rank.insert(ident, rank.len());
        emitted.insert(ident);
    }
    rank
}
