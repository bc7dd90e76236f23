//! Tests for scope flattening.

use indoc::indoc;

use wirec_ir::code::{Code, Op};
use wirec_ir::module::Module;

use crate::ast;
use crate::convert::convert;
use crate::transform::{TransformError, flatten};

fn flattened(text: &str) -> Module {
    let ast = ast::load(text).unwrap();
    let mut module = convert(&ast).unwrap();
    flatten::run(&mut module).unwrap();
    module
}

const NESTED: &str = indoc! {r#"
    {"programs": [{"name": "p", "elements": [
        {"kind": "format", "name": "Frame", "members": [
            {"kind": "field", "name": "tag", "ty": {"kind": "uint", "bits": 8}},
            {"kind": "union", "name": "body", "variants": [
                {"name": "ping", "fields": [{"name": "nonce", "ty": {"kind": "uint", "bits": 8}}]},
                {"name": "data", "fields": [{"name": "len", "ty": {"kind": "uint", "bits": 8}}]}
            ]},
            {"kind": "property", "name": "opts", "members": [
                {"kind": "conditional",
                 "cond": {"kind": "ident", "name": "tag"},
                 "field": {"name": "extra", "ty": {"kind": "uint", "bits": 8}}}
            ]}
        ]}
    ]}]}
"#};

#[test]
fn no_scope_contains_another() {
    let module = flattened(NESTED);
    let mut depth = 0usize;
    for instr in module.code() {
        let op = instr.op();
        if op.end_counterpart().is_some() {
            assert_eq!(depth, 0, "{op:?} opened inside another scope");
            depth += 1;
        } else if op.is_end() {
            depth -= 1;
        }
    }
    assert_eq!(depth, 0);
}

#[test]
fn nested_scopes_leave_placeholders() {
    let module = flattened(NESTED);
    let code = module.code();

    // The program region declares its format, the format region declares
    // its union, property and coders.
    let program_end = code.iter().position(|c| matches!(c, Code::EndProgram {})).unwrap();
    assert!(code[..program_end]
        .iter()
        .any(|c| matches!(c, Code::DeclareFormat { .. })));

    let format_start = code.iter().position(|c| matches!(c, Code::DefineFormat { .. })).unwrap();
    let format_end = code[format_start..]
        .iter()
        .position(|c| matches!(c, Code::EndFormat {}))
        .map(|offset| format_start + offset)
        .unwrap();
    let format_region = &code[format_start..format_end];
    assert!(format_region.iter().any(|c| matches!(c, Code::DeclareUnion { .. })));
    assert!(format_region.iter().any(|c| matches!(c, Code::DeclareProperty { .. })));
    assert!(format_region.iter().any(|c| matches!(c, Code::DeclareFunction { .. })));
    // Leaf fields stay in place.
    assert!(format_region.iter().any(|c| matches!(c, Code::DefineField { .. })));
}

#[test]
fn placeholders_precede_their_hoisted_definitions() {
    let module = flattened(NESTED);
    let code = module.code();
    for (index, instr) in code.iter().enumerate() {
        let ident = match instr {
            Code::DeclareFormat { ident }
            | Code::DeclareFunction { ident }
            | Code::DeclareUnion { ident }
            | Code::DeclareProperty { ident }
            | Code::DeclareUnionMember { ident } => *ident,
            _ => continue,
        };
        let definition = module.ident_index(ident).unwrap();
        assert!(definition > index, "definition of {ident} before its placeholder");
    }
}

#[test]
fn union_members_are_hoisted_behind_the_union() {
    let module = flattened(NESTED);
    let ops: Vec<Op> = module.code().iter().map(Code::op).collect();
    let union_end = ops.iter().position(|&op| op == Op::EndUnion).unwrap();
    let member = ops.iter().position(|&op| op == Op::DefineUnionMember).unwrap();
    assert!(member > union_end);
}

#[test]
fn unmatched_end_is_rejected() {
    let mut module = Module::new();
    let ident = module.intern_ident("F");
    module.push(Code::DefineFormat { ident });
    module.push(Code::EndEnum {});

    assert!(matches!(
        flatten::run(&mut module),
        Err(TransformError::UnmatchedEnd(Op::EndEnum))
    ));
}

#[test]
fn unterminated_scope_is_rejected() {
    let mut module = Module::new();
    let ident = module.intern_ident("F");
    module.push(Code::DefineFormat { ident });

    assert!(matches!(
        flatten::run(&mut module),
        Err(TransformError::UnterminatedScope(Op::DefineFormat))
    ));
}
