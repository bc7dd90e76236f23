//! Tests for module interning and side tables.

use super::code::Code;
use super::ids::{ObjectId, StorageRef};
use super::module::{Module, ModuleError};
use super::storage::{Storage, StorageKind, Storages};

#[test]
fn ident_interning_is_idempotent() {
    let mut module = Module::new();
    let a = module.intern_ident("header");
    let b = module.intern_ident("header");
    let c = module.intern_ident("body");

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(module.ident_text(a), Some("header"));
    assert_eq!(module.ident_text(c), Some("body"));
}

#[test]
fn object_ids_are_monotonic_and_never_null() {
    let mut module = Module::new();
    let mut previous = ObjectId::NULL;
    for _ in 0..100 {
        let id = module.new_object_id();
        assert!(!id.is_null());
        assert!(id > previous);
        previous = id;
    }
}

#[test]
fn storage_interning_shares_equal_shapes() {
    let mut module = Module::new();
    let a = module.get_storage_ref(Storages::uint(8));
    let b = module.get_storage_ref(Storages::uint(8));
    assert_eq!(a, b);

    let c = module.get_storage_ref(Storages::uint(16));
    assert_ne!(a, c);

    // Differing reference anywhere in the sequence means a distinct shape.
    let s1 = Storages::single(Storage::struct_ref(ObjectId(7)));
    let s2 = Storages::single(Storage::struct_ref(ObjectId(8)));
    assert_ne!(module.get_storage_ref(s1), module.get_storage_ref(s2));

    // Differing kind with same size too.
    let u = Storages::single(Storage::sized(StorageKind::Uint, 8));
    let i = Storages::single(Storage::sized(StorageKind::Int, 8));
    assert_ne!(module.get_storage_ref(u), module.get_storage_ref(i));
}

#[test]
fn storage_lookup_inverts_interning() {
    let mut module = Module::new();
    let shape = Storages(vec![
        Storage::bare(StorageKind::Vector),
        Storage::sized(StorageKind::Uint, 32),
    ]);
    let reference = module.get_storage_ref(shape.clone());
    assert_eq!(module.get_storage(reference).unwrap(), &shape);
}

#[test]
fn unknown_storage_ref_is_an_error() {
    let module = Module::new();
    assert_eq!(
        module.get_storage(StorageRef(42)),
        Err(ModuleError::InvalidReference(StorageRef(42)))
    );
}

#[test]
fn push_registers_defining_index() {
    let mut module = Module::new();
    let format = module.intern_ident("Packet");
    let field = module.intern_ident("len");
    let storage = module.get_storage_ref(Storages::uint(16));

    module.push(Code::DefineFormat { ident: format });
    module.push(Code::DefineField { ident: field, belong: format, storage });
    module.push(Code::EndFormat {});

    assert_eq!(module.ident_index(format).unwrap(), 0);
    assert_eq!(module.ident_index(field).unwrap(), 1);
    assert_eq!(
        module.ident_index(ObjectId(999)),
        Err(ModuleError::MissingIndex(ObjectId(999)))
    );
}

#[test]
fn replace_code_rebuilds_index() {
    let mut module = Module::new();
    let a = module.intern_ident("A");
    let b = module.intern_ident("B");
    module.push(Code::DefineFormat { ident: a });
    module.push(Code::EndFormat {});
    module.push(Code::DefineFormat { ident: b });
    module.push(Code::EndFormat {});

    // Swap the order of the two definitions.
    let mut rebuilt: Vec<Code> = Vec::new();
    rebuilt.push(Code::DefineFormat { ident: b });
    rebuilt.push(Code::EndFormat {});
    rebuilt.push(Code::DefineFormat { ident: a });
    rebuilt.push(Code::EndFormat {});
    module.replace_code(rebuilt);

    assert_eq!(module.ident_index(b).unwrap(), 0);
    assert_eq!(module.ident_index(a).unwrap(), 2);
}
