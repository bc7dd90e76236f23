//! Tests for AST conversion.

use indoc::indoc;

use wirec_ir::code::{Code, Endian, FunctionKind, Op};
use wirec_ir::module::Module;

use crate::ast;
use crate::convert::{ConvertError, convert};

fn convert_text(text: &str) -> Module {
    let ast = ast::load(text).unwrap();
    convert(&ast).unwrap()
}

fn ops(module: &Module) -> Vec<Op> {
    module.code().iter().map(Code::op).collect()
}

#[test]
fn plain_format_gets_synthesized_coders() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Frame", "members": [
                {"kind": "field", "name": "tag", "ty": {"kind": "uint", "bits": 8}},
                {"kind": "field", "name": "len", "ty": {"kind": "uint", "bits": 16}}
            ]}
        ]}]}
    "#});

    assert_eq!(
        ops(&module),
        vec![
            Op::DefineProgram,
            Op::DefineFormat,
            Op::DefineField,
            Op::DefineField,
            Op::DefineFunction,
            Op::EncodeInt,
            Op::EncodeInt,
            Op::EndFunction,
            Op::DefineFunction,
            Op::DecodeInt,
            Op::DecodeInt,
            Op::EndFunction,
            Op::EndFormat,
            Op::EndProgram,
        ]
    );

    // Synthesized coders carry the role and the format as owner.
    let format = match &module.code()[1] {
        Code::DefineFormat { ident } => *ident,
        other => panic!("expected DefineFormat, got {other:?}"),
    };
    match &module.code()[4] {
        Code::DefineFunction { belong, kind, .. } => {
            assert_eq!(*belong, format);
            assert_eq!(*kind, FunctionKind::Encode);
        }
        other => panic!("expected DefineFunction, got {other:?}"),
    }
}

#[test]
fn forward_reference_resolves_to_definition_id() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Outer", "members": [
                {"kind": "field", "name": "inner", "ty": {"kind": "named", "name": "Inner"}}
            ]},
            {"kind": "format", "name": "Inner", "members": [
                {"kind": "field", "name": "x", "ty": {"kind": "uint", "bits": 8}}
            ]}
        ]}]}
    "#});

    let inner_def = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::DefineFormat { ident } if module.ident_text(*ident) == Some("Inner") => {
                Some(*ident)
            }
            _ => None,
        })
        .unwrap();
    let call_target = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::CallEncode { target, .. } => Some(*target),
            _ => None,
        })
        .unwrap();
    assert_eq!(call_target, inner_def);
}

#[test]
fn explicit_coder_suppresses_synthesis_and_converts_control_flow() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Packet", "members": [
                {"kind": "field", "name": "version", "ty": {"kind": "uint", "bits": 8}},
                {"kind": "function", "name": "Packet.encode", "role": "encode", "body": [
                    {"kind": "encode", "field": "version"},
                    {"kind": "if",
                     "cond": {"kind": "binary", "op": ">",
                              "left": {"kind": "ident", "name": "version"},
                              "right": {"kind": "int", "value": 1}},
                     "then": [{"kind": "error", "message": "unsupported version"}]}
                ]}
            ]}
        ]}]}
    "#});

    let op_list = ops(&module);
    // Exactly one encoder, plus the synthesized decoder.
    let encoders = module
        .code()
        .iter()
        .filter(|code| {
            matches!(code, Code::DefineFunction { kind: FunctionKind::Encode, .. })
        })
        .count();
    assert_eq!(encoders, 1);
    assert!(op_list.contains(&Op::If));
    assert!(op_list.contains(&Op::ExplicitError));
    assert!(op_list.contains(&Op::EndIf));

    // The error message is interned in the string table.
    let message = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::ExplicitError { message } => Some(*message),
            _ => None,
        })
        .unwrap();
    assert_eq!(module.string_text(message), Some("unsupported version"));
}

#[test]
fn property_members_emit_conditional_fields() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Msg", "members": [
                {"kind": "field", "name": "flags", "ty": {"kind": "uint", "bits": 8}},
                {"kind": "property", "name": "opts", "members": [
                    {"kind": "conditional",
                     "cond": {"kind": "binary", "op": "==",
                              "left": {"kind": "ident", "name": "flags"},
                              "right": {"kind": "int", "value": 1}},
                     "field": {"name": "extra", "ty": {"kind": "uint", "bits": 16}}}
                ]}
            ]}
        ]}]}
    "#});

    let property = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::DefineProperty { ident, .. } => Some(*ident),
            _ => None,
        })
        .unwrap();
    let conditional = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::ConditionalField { belong, field, .. } => Some((*belong, *field)),
            _ => None,
        })
        .unwrap();
    assert_eq!(conditional.0, property);
    assert_eq!(module.ident_text(conditional.1), Some("extra"));
}

#[test]
fn dynamic_endian_site_is_shared_within_a_function() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "W",
             "endian": {"kind": "dynamic", "selector": {"kind": "ident", "name": "order"}},
             "members": [
                {"kind": "field", "name": "order", "ty": {"kind": "uint", "bits": 8},
                 "endian": {"kind": "big"}},
                {"kind": "field", "name": "a", "ty": {"kind": "uint", "bits": 16}},
                {"kind": "field", "name": "b", "ty": {"kind": "uint", "bits": 32}}
            ]}
        ]}]}
    "#});

    let sites: Vec<_> = module
        .code()
        .iter()
        .filter(|code| matches!(code, Code::DynamicEndian { .. }))
        .collect();
    // One site per synthesized coder body, not one per field.
    assert_eq!(sites.len(), 2);

    let dynamic_refs: Vec<_> = module
        .code()
        .iter()
        .filter_map(|code| match code {
            Code::EncodeInt { endian, .. } if endian.endian == Endian::Dynamic => {
                Some(endian.dynamic_ref)
            }
            _ => None,
        })
        .collect();
    assert_eq!(dynamic_refs.len(), 2);
    assert_eq!(dynamic_refs[0], dynamic_refs[1]);
}

#[test]
fn fixed_array_of_ints_uses_vector_fixed() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Blob", "members": [
                {"kind": "field", "name": "words",
                 "ty": {"kind": "array", "len": 4, "elem": {"kind": "uint", "bits": 32}}}
            ]}
        ]}]}
    "#});

    let fixed = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::EncodeIntVectorFixed { count, bit_size, .. } => Some((*count, *bit_size)),
            _ => None,
        })
        .unwrap();
    assert_eq!(fixed, (4, 32));
}

#[test]
fn unknown_operator_is_an_error() {
    let ast = ast::load(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "F", "members": [
                {"kind": "function", "name": "f", "role": "helper", "body": [
                    {"kind": "assert",
                     "cond": {"kind": "binary", "op": "<=>",
                              "left": {"kind": "int", "value": 1},
                              "right": {"kind": "int", "value": 2}}}
                ]}
            ]}
        ]}]}
    "#})
    .unwrap();
    assert!(matches!(
        convert(&ast),
        Err(ConvertError::UnknownBinaryOp(op)) if op == "<=>"
    ));
}

#[test]
fn every_define_is_indexed() {
    let module = convert_text(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "enum", "name": "Kind", "base": {"kind": "uint", "bits": 8},
             "members": [{"name": "data", "value": 0}, {"name": "ack", "value": 1}]},
            {"kind": "format", "name": "F", "members": [
                {"kind": "field", "name": "kind", "ty": {"kind": "named", "name": "Kind"}}
            ]}
        ]}]}
    "#});

    for (index, code) in module.code().iter().enumerate() {
        if let Some(ident) = code.defined_ident() {
            assert_eq!(module.ident_index(ident).unwrap(), index);
        }
    }
}
