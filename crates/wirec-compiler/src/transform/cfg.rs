//! Control-flow graph construction.
//!
//! Runs last: every function and fallback region of the final stream gets
//! a graph with a synthetic entry and exit, one node per basic block, and
//! edges for if/elif/else chains, match arms, loops, break, continue and
//! early returns. Blocks accumulate the statically known bit size of the
//! wire operations they contain.
//!
//! After all graphs exist, one propagation round folds each callee's total
//! into the calling block and stores it in the call's `size_surplus`
//! operand. The round is not repeated, so recursive coder chains do not
//! diverge.

use std::collections::HashMap;

use wirec_ir::cfg::{Cfg, CfgNodeId};
use wirec_ir::code::{Code, Op};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;

use super::{TransformError, skip_scope};

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let code = module.code().to_vec();
    let mut cfgs: Vec<Cfg> = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        match code[pos].op() {
            Op::DefineFunction | Op::DefineFallback => {
                let start = pos;
                skip_scope(&code, &mut pos)?;
                let ident = code[start].defined_ident().unwrap_or(ObjectId::NULL);
                cfgs.push(build(&code, start, pos, ident)?);
            }
            _ => pos += 1,
        }
    }

    // One round of call-size propagation over the finished graphs.
    let by_ident: HashMap<ObjectId, usize> =
        cfgs.iter().enumerate().map(|(i, cfg)| (cfg.ident, i)).collect();
    let base: Vec<u64> = cfgs.iter().map(Cfg::total_bits).collect();
    let stream = module.code_mut();
    for cfg in cfgs.iter_mut() {
        for id in 0..cfg.len() {
            let node = CfgNodeId(id as u32);
            let indices = cfg.node(node).indices.clone();
            let mut extra = 0;
            for index in indices {
                match &mut stream[index] {
                    Code::CallEncode { target, size_surplus, .. }
                    | Code::CallDecode { target, size_surplus, .. } => {
                        let bits = by_ident.get(target).map(|&i| base[i]).unwrap_or(0);
                        *size_surplus = bits;
                        extra += bits;
                    }
                    _ => {}
                }
            }
            cfg.node_mut(node).sum_bits += extra;
        }
    }
    module.cfgs = cfgs;
    Ok(())
}

enum Frame {
    If { origin: CfgNodeId, join: CfgNodeId, has_else: bool },
    Match { decision: CfgNodeId, join: CfgNodeId, exhaustive: bool, has_default: bool },
    Loop { header: CfgNodeId, after: CfgNodeId },
}

/// Build the graph for the region `[start, end)`, whose first instruction
/// opens the scope and whose last closes it.
fn build(code: &[Code], start: usize, end: usize, ident: ObjectId) -> Result<Cfg, TransformError> {
    let region_op = code[start].op();
    let mut cfg = Cfg::new(ident);
    let mut current = cfg.add_node();
    cfg.add_edge(cfg.entry, current);
    let mut frames: Vec<Frame> = Vec::new();

    for index in start + 1..end.saturating_sub(1) {
        let instr = &code[index];
        match instr.op() {
            Op::If => {
                cfg.node_mut(current).indices.push(index);
                let join = cfg.add_node();
                let then = cfg.add_node();
                cfg.add_edge(current, then);
                frames.push(Frame::If { origin: current, join, has_else: false });
                current = then;
            }
            Op::Elif => {
                let Some(Frame::If { origin, join, .. }) = frames.last() else {
                    return Err(TransformError::UnmatchedEnd(Op::Elif));
                };
                let (origin, join) = (*origin, *join);
                cfg.add_edge(current, join);
                // Every arm branches from the node that holds the If.
                cfg.node_mut(origin).indices.push(index);
                let arm = cfg.add_node();
                cfg.add_edge(origin, arm);
                current = arm;
            }
            Op::Else => {
                let Some(Frame::If { origin, join, has_else }) = frames.last_mut() else {
                    return Err(TransformError::UnmatchedEnd(Op::Else));
                };
                let (origin, join) = (*origin, *join);
                *has_else = true;
                cfg.add_edge(current, join);
                let arm = cfg.add_node();
                cfg.node_mut(arm).indices.push(index);
                cfg.add_edge(origin, arm);
                current = arm;
            }
            Op::EndIf => {
                let Some(Frame::If { origin, join, has_else }) = frames.pop() else {
                    return Err(TransformError::UnmatchedEnd(Op::EndIf));
                };
                cfg.add_edge(current, join);
                if !has_else {
                    cfg.add_edge(origin, join);
                }
                cfg.node_mut(join).indices.push(index);
                current = join;
            }
            Op::Match | Op::ExhaustiveMatch => {
                cfg.node_mut(current).indices.push(index);
                let join = cfg.add_node();
                frames.push(Frame::Match {
                    decision: current,
                    join,
                    exhaustive: instr.op() == Op::ExhaustiveMatch,
                    has_default: false,
                });
                current = join; // replaced by the first arm
            }
            Op::Case | Op::DefaultCase => {
                let Some(Frame::Match { decision, has_default, .. }) = frames.last_mut()
                else {
                    return Err(TransformError::UnmatchedEnd(instr.op()));
                };
                if instr.op() == Op::DefaultCase {
                    *has_default = true;
                }
                let decision = *decision;
                let arm = cfg.add_node();
                cfg.node_mut(arm).indices.push(index);
                cfg.add_edge(decision, arm);
                current = arm;
            }
            Op::EndCase => {
                let Some(Frame::Match { decision, join, .. }) = frames.last() else {
                    return Err(TransformError::UnmatchedEnd(Op::EndCase));
                };
                cfg.node_mut(current).indices.push(index);
                cfg.add_edge(current, *join);
                current = *decision;
            }
            Op::EndMatch => {
                let Some(Frame::Match { decision, join, exhaustive, has_default }) =
                    frames.pop()
                else {
                    return Err(TransformError::UnmatchedEnd(Op::EndMatch));
                };
                if !exhaustive && !has_default {
                    cfg.add_edge(decision, join);
                }
                cfg.node_mut(join).indices.push(index);
                current = join;
            }
            Op::LoopInfinite | Op::LoopCondition => {
                let header = cfg.add_node();
                cfg.node_mut(header).indices.push(index);
                cfg.add_edge(current, header);
                let after = cfg.add_node();
                if instr.op() == Op::LoopCondition {
                    cfg.add_edge(header, after);
                }
                let body = cfg.add_node();
                cfg.add_edge(header, body);
                frames.push(Frame::Loop { header, after });
                current = body;
            }
            Op::EndLoop => {
                let Some(Frame::Loop { header, after }) = frames.pop() else {
                    return Err(TransformError::UnmatchedEnd(Op::EndLoop));
                };
                cfg.node_mut(current).indices.push(index);
                cfg.add_edge(current, header);
                current = after;
            }
            Op::Break => {
                let Some(after) = innermost_loop(&frames).map(|(_, after)| after) else {
                    return Err(TransformError::UnmatchedEnd(Op::Break));
                };
                cfg.node_mut(current).indices.push(index);
                cfg.add_edge(current, after);
                current = cfg.add_node(); // unreachable continuation
            }
            Op::Continue => {
                // Continue re-enters the condition check: the edge runs
                // from the loop header to its exit, not from this block.
                let Some((header, after)) = innermost_loop(&frames) else {
                    return Err(TransformError::UnmatchedEnd(Op::Continue));
                };
                cfg.node_mut(current).indices.push(index);
                cfg.add_edge(header, after);
                current = cfg.add_node();
            }
            Op::Ret | Op::RetPropertySetterOk | Op::ExplicitError => {
                cfg.node_mut(current).indices.push(index);
                cfg.add_edge(current, cfg.exit);
                current = cfg.add_node();
            }
            _ => {
                let node = cfg.node_mut(current);
                node.indices.push(index);
                node.sum_bits += static_bits(instr);
            }
        }
    }
    if !frames.is_empty() {
        return Err(TransformError::UnterminatedScope(region_op));
    }
    cfg.add_edge(current, cfg.exit);
    Ok(cfg)
}

fn innermost_loop(frames: &[Frame]) -> Option<(CfgNodeId, CfgNodeId)> {
    frames.iter().rev().find_map(|frame| match frame {
        Frame::Loop { header, after } => Some((*header, *after)),
        _ => None,
    })
}

/// Bits a wire op is statically known to move.
fn static_bits(instr: &Code) -> u64 {
    match instr {
        Code::EncodeInt { bit_size, .. } | Code::DecodeInt { bit_size, .. } => *bit_size,
        Code::EncodeIntVectorFixed { count, bit_size, .. }
        | Code::DecodeIntVectorFixed { count, bit_size, .. } => count * bit_size,
        _ => 0,
    }
}
