//! Scope flattening.
//!
//! Rewrites the stream so no definition scope contains another. A nested
//! scope is replaced in place by its DECLARE placeholder, and the full
//! definition is hoisted behind the parent's END tag, depth first, in
//! declaration order. Fallback regions are already self-contained and are
//! copied verbatim.
//!
//! After this pass every DEFINE..END region holds only leaf instructions,
//! control flow and placeholders, which is the shape the conditional-field
//! merger and the format sorter expect.

use wirec_ir::code::{Code, Op};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;

use super::{TransformError, skip_scope};

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let code = module.code().to_vec();
    let mut out = Vec::with_capacity(code.len());
    let mut pos = 0;
    while pos < code.len() {
        flatten_scope(&code, &mut pos, &mut out)?;
    }
    module.replace_code(out);
    Ok(())
}

/// Emit the scope starting at `pos` flat, followed by its hoisted
/// children. A non-scope instruction passes through unchanged.
fn flatten_scope(
    code: &[Code],
    pos: &mut usize,
    out: &mut Vec<Code>,
) -> Result<(), TransformError> {
    let open = &code[*pos];
    let op = open.op();
    let Some(end) = op.end_counterpart() else {
        if op.is_end() {
            return Err(TransformError::UnmatchedEnd(op));
        }
        out.push(open.clone());
        *pos += 1;
        return Ok(());
    };
    if op == Op::DefineFallback {
        let start = *pos;
        skip_scope(code, pos)?;
        out.extend(code[start..*pos].iter().cloned());
        return Ok(());
    }

    out.push(open.clone());
    *pos += 1;
    let mut children: Vec<usize> = Vec::new();
    loop {
        let instr = code
            .get(*pos)
            .ok_or(TransformError::UnterminatedScope(op))?;
        let inner = instr.op();
        if inner == end {
            out.push(instr.clone());
            *pos += 1;
            break;
        }
        if inner.end_counterpart().is_some() {
            let ident = instr.defined_ident().unwrap_or(ObjectId::NULL);
            let placeholder = declare_code(inner, ident)
                .ok_or(TransformError::NoDeclareCounterpart(inner))?;
            out.push(placeholder);
            children.push(*pos);
            skip_scope(code, pos)?;
            continue;
        }
        if inner.is_end() {
            return Err(TransformError::UnmatchedEnd(inner));
        }
        out.push(instr.clone());
        *pos += 1;
    }
    for start in children {
        let mut child_pos = start;
        flatten_scope(code, &mut child_pos, out)?;
    }
    Ok(())
}

/// DECLARE placeholder instruction for the scope `op` opens.
fn declare_code(op: Op, ident: ObjectId) -> Option<Code> {
    Some(match op {
        Op::DefineProgram => Code::DeclareProgram { ident },
        Op::DefineFormat => Code::DeclareFormat { ident },
        Op::DefineFunction => Code::DeclareFunction { ident },
        Op::DefineEnum => Code::DeclareEnum { ident },
        Op::DefineState => Code::DeclareState { ident },
        Op::DefineUnion => Code::DeclareUnion { ident },
        Op::DefineUnionMember => Code::DeclareUnionMember { ident },
        Op::DefineBitField => Code::DeclareBitField { ident },
        Op::DefineProperty => Code::DeclareProperty { ident },
        _ => return None,
    })
}
