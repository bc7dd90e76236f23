//! Tests for bit-field packing and accessor derivation.

use indoc::indoc;

use wirec_ir::code::{BinOp, Code, FunctionKind, Op};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;
use wirec_ir::storage::{Storage, StorageKind, Storages};

use crate::ast;
use crate::convert::convert;
use crate::transform::{TransformError, bit_field};

fn derived(text: &str) -> Module {
    let ast = ast::load(text).unwrap();
    let mut module = convert(&ast).unwrap();
    bit_field::run(&mut module).unwrap();
    module
}

const PACKED: &str = indoc! {r#"
    {"programs": [{"name": "p", "elements": [
        {"kind": "format", "name": "Header", "members": [
            {"kind": "bit_field", "name": "flags", "fields": [
                {"name": "version", "ty": {"kind": "uint", "bits": 3}},
                {"name": "channel", "ty": {"kind": "uint", "bits": 5}},
                {"name": "opcode", "ty": {"kind": "uint", "bits": 8}}
            ]}
        ]}
    ]}]}
"#};

/// Region of the function whose display name is `name`.
fn function_body<'a>(module: &'a Module, name: &str) -> &'a [Code] {
    let code = module.code();
    for (index, instr) in code.iter().enumerate() {
        if let Code::DefineFunction { ident, .. } = instr {
            if module.ident_text(*ident) == Some(name) {
                let end = code[index..]
                    .iter()
                    .position(|c| matches!(c, Code::EndFunction {}))
                    .map(|offset| index + offset)
                    .unwrap();
                return &code[index..=end];
            }
        }
    }
    panic!("no function named {name}");
}

#[test]
fn owner_is_packed_to_total_width() {
    let module = derived(PACKED);
    let storage = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::DefineBitField { storage, .. } => Some(*storage),
            _ => None,
        })
        .unwrap();
    // 3 + 5 + 8 bits.
    assert_eq!(module.get_storage(storage).unwrap(), &Storages::uint(16));
}

#[test]
fn getter_shifts_and_masks_msb_first() {
    let module = derived(PACKED);
    // Middle member: bits 12..8 of the packed value.
    let body = function_body(&module, "channel.get");
    assert!(matches!(
        body[0],
        Code::DefineFunction { kind: FunctionKind::BitGetter, .. }
    ));
    assert!(matches!(body[1], Code::ImmediateInt { value: 8, .. }));
    assert!(matches!(body[2], Code::Binary { op: BinOp::Shr, .. }));
    assert!(matches!(body[3], Code::ImmediateInt { value: 0x1f, .. }));
    assert!(matches!(body[4], Code::Binary { op: BinOp::BitAnd, .. }));
    assert!(matches!(body[5], Code::Cast { .. }));
    assert!(matches!(body[6], Code::Ret { .. }));
}

#[test]
fn setter_checks_range_and_reassembles() {
    let module = derived(PACKED);
    let body = function_body(&module, "channel.set");
    assert!(matches!(
        body[0],
        Code::DefineFunction { kind: FunctionKind::BitSetter, .. }
    ));
    assert!(matches!(body[1], Code::PropertyInputParameter { .. }));
    assert!(matches!(body[3], Code::Binary { op: BinOp::Le, .. }));
    assert!(matches!(body[4], Code::Assert { .. }));
    // The input widens to the packed container and is masked to its
    // width before moving into position.
    assert!(matches!(body[5], Code::Cast { .. }));
    assert!(matches!(body[6], Code::Binary { op: BinOp::BitAnd, .. }));
    assert!(matches!(body[8], Code::Binary { op: BinOp::Shl, .. }));
    // Cleared hole: the member's mask at its position.
    assert!(body.iter().any(|c| matches!(c, Code::ImmediateInt { value, .. } if *value == 0x1f << 8)));
    assert!(body.iter().any(|c| matches!(c, Code::Assign { .. })));
    assert!(matches!(body[body.len() - 2], Code::RetPropertySetterOk {}));
}

#[test]
fn setter_cast_widens_to_the_packed_container() {
    let module = derived(PACKED);
    let packed = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::DefineBitField { storage, .. } => Some(*storage),
            _ => None,
        })
        .unwrap();
    let body = function_body(&module, "channel.set");
    let cast = body
        .iter()
        .find_map(|code| match code {
            Code::Cast { storage, .. } => Some(*storage),
            _ => None,
        })
        .unwrap();
    assert_eq!(cast, packed);
}

#[test]
fn every_member_gets_both_accessors() {
    let module = derived(PACKED);
    let getters = module
        .code()
        .iter()
        .filter(|c| matches!(c, Code::DefineFunction { kind: FunctionKind::BitGetter, .. }))
        .count();
    let setters = module
        .code()
        .iter()
        .filter(|c| matches!(c, Code::DefineFunction { kind: FunctionKind::BitSetter, .. }))
        .count();
    assert_eq!((getters, setters), (3, 3));
}

#[test]
fn fields_are_followed_by_accessor_declarations() {
    let module = derived(PACKED);
    let code = module.code();
    let open = code
        .iter()
        .position(|c| matches!(c, Code::DefineBitField { .. }))
        .unwrap();
    let close = code
        .iter()
        .position(|c| matches!(c, Code::EndBitField {}))
        .unwrap();
    for index in open..close {
        if matches!(code[index], Code::DefineField { .. }) {
            assert!(matches!(code[index + 1], Code::DeclareFunction { .. }));
            assert!(matches!(code[index + 2], Code::DeclareFunction { .. }));
        }
    }
    // One getter and one setter declaration per member, each resolving
    // to a hoisted definition.
    let declared: Vec<_> = code
        .iter()
        .filter_map(|c| match c {
            Code::DeclareFunction { ident } => Some(*ident),
            _ => None,
        })
        .collect();
    assert_eq!(declared.len(), 6);
    for ident in declared {
        let definition = module.ident_index(ident).unwrap();
        assert!(matches!(code[definition], Code::DefineFunction { .. }));
    }
}

#[test]
fn variant_member_branches_must_reference_structs() {
    let mut module = Module::new();
    let owner = module.intern_ident("bits");
    let field = module.intern_ident("choice");
    let shape = module.get_storage_ref(Storages(vec![
        Storage::sized(StorageKind::Variant, 1),
        Storage::sized(StorageKind::Uint, 8),
    ]));
    module.push(Code::DefineBitField { ident: owner, belong: ObjectId::NULL, storage: shape });
    module.push(Code::DefineField { ident: field, belong: owner, storage: shape });
    module.push(Code::EndBitField {});

    assert!(matches!(
        bit_field::run(&mut module),
        Err(TransformError::UnexpectedStorage(id)) if id == field
    ));
}

#[test]
fn enum_member_width_follows_its_base() {
    let module = derived(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "enum", "name": "Mode", "base": {"kind": "uint", "bits": 3},
             "members": [{"name": "idle", "value": 0}, {"name": "busy", "value": 1}]},
            {"kind": "format", "name": "F", "members": [
                {"kind": "bit_field", "name": "ctl", "fields": [
                    {"name": "mode", "ty": {"kind": "named", "name": "Mode"}},
                    {"name": "rest", "ty": {"kind": "uint", "bits": 5}}
                ]}
            ]}
        ]}]}
    "#});
    let storage = module
        .code()
        .iter()
        .find_map(|code| match code {
            Code::DefineBitField { storage, .. } => Some(*storage),
            _ => None,
        })
        .unwrap();
    assert_eq!(module.get_storage(storage).unwrap(), &Storages::uint(8));
}

#[test]
fn reference_cycle_keeps_shape_and_skips_accessors() {
    let module = derived(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "A", "members": [
                {"kind": "bit_field", "name": "bits", "fields": [
                    {"name": "other", "ty": {"kind": "named", "name": "B"}}
                ]}
            ]},
            {"kind": "format", "name": "B", "members": [
                {"kind": "field", "name": "back", "ty": {"kind": "named", "name": "A"}}
            ]}
        ]}]}
    "#});
    assert!(!module.code().iter().any(|c| matches!(
        c,
        Code::DefineFunction { kind: FunctionKind::BitGetter | FunctionKind::BitSetter, .. }
    )));
}

#[test]
fn stream_outside_bit_fields_is_untouched() {
    let before = {
        let ast = ast::load(PACKED).unwrap();
        convert(&ast).unwrap()
    };
    let after = derived(PACKED);
    // Same scope skeleton, with accessors added after the bit field.
    let scopes = |module: &Module| {
        module
            .code()
            .iter()
            .map(Code::op)
            .filter(|op| matches!(op, Op::DefineFormat | Op::DefineProgram))
            .count()
    };
    assert_eq!(scopes(&before), scopes(&after));
}
