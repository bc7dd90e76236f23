//! Tests for the binary container.

use super::code::{Code, Endian, EndianExpr, FunctionKind};
use super::container::{ContainerError, MAGIC, load, save};
use super::module::Module;
use super::storage::{Storage, StorageKind, Storages};

fn sample_module() -> Module {
    let mut module = Module::new();
    let format = module.intern_ident("Frame");
    let field = module.intern_ident("kind");
    let func = module.intern_ident("Frame.encode");
    let u8_shape = module.get_storage_ref(Storages::uint(8));
    module.intern_string("frame too short");
    module.intern_metadata("config.word.size");

    module.push(Code::DefineFormat { ident: format });
    module.push(Code::DefineField { ident: field, belong: format, storage: u8_shape });
    module.push(Code::DefineFunction {
        ident: func,
        belong: format,
        kind: FunctionKind::Encode,
    });
    module.push(Code::EncodeInt {
        target: field,
        bit_size: 8,
        endian: EndianExpr::fixed(Endian::Big),
        fallback: super::ids::ObjectId::NULL,
    });
    module.push(Code::EndFunction {});
    module.push(Code::EndFormat {});
    module
}

#[test]
fn save_load_round_trip() {
    let module = sample_module();
    let bytes = save(&module).unwrap();
    assert_eq!(&bytes[..4], &MAGIC);

    let loaded = load(&bytes).unwrap();
    assert_eq!(loaded.code(), module.code());

    // Interned tables survive with identical ids.
    for (text, id) in module.idents() {
        let index = module.ident_index(id);
        assert_eq!(loaded.ident_text(id), Some(text));
        assert_eq!(loaded.ident_index(id).ok(), index.ok());
    }
    for (reference, storages) in module.storage_entries() {
        assert_eq!(loaded.get_storage(reference).unwrap(), storages);
    }
}

#[test]
fn ids_sharing_a_text_hint_all_survive() {
    let mut module = Module::new();
    let format = module.intern_ident("F");
    let first = module.new_object_id();
    module.register_ident(first, "tmp");
    let second = module.new_object_id();
    module.register_ident(second, "tmp");
    module.push(Code::DefineFormat { ident: format });
    module.push(Code::ImmediateInt { ident: first, value: 1 });
    module.push(Code::ImmediateInt { ident: second, value: 2 });
    module.push(Code::EndFormat {});

    let loaded = load(&save(&module).unwrap()).unwrap();
    assert_eq!(loaded.ident_text(first), Some("tmp"));
    assert_eq!(loaded.ident_text(second), Some("tmp"));
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = save(&sample_module()).unwrap();
    bytes[0] = b'X';
    assert!(matches!(load(&bytes), Err(ContainerError::InvalidMagic)));
}

#[test]
fn bad_version_is_rejected() {
    let mut bytes = save(&sample_module()).unwrap();
    bytes[4] = 0xee;
    assert!(matches!(
        load(&bytes),
        Err(ContainerError::UnsupportedVersion(0xee))
    ));
}

#[test]
fn truncated_container_is_eof() {
    let bytes = save(&sample_module()).unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    assert!(load(truncated).is_err());
}

#[test]
fn storage_table_survives_multi_element_shapes() {
    let mut module = Module::new();
    let ident = module.intern_ident("v");
    let shape = Storages(vec![
        Storage::bare(StorageKind::Vector),
        Storage::sized(StorageKind::Uint, 24),
    ]);
    let reference = module.get_storage_ref(shape.clone());
    module.push(Code::NewObject { ident, storage: reference });

    let loaded = load(&save(&module).unwrap()).unwrap();
    assert_eq!(loaded.get_storage(reference).unwrap(), &shape);
}
