//! Binary container for a finished module.
//!
//! Layout: magic, version byte, then count-prefixed sections in a fixed
//! order — strings, metadata, identifiers, storage shapes, ident→index
//! table, instruction array. Every numeric reference is a varint, so an id
//! above the varint range is a fatal serialization error.

use thiserror::Error;

use crate::code::{Code, CodecError};
use crate::ids::{ObjectId, StorageRef};
use crate::module::Module;
use crate::storage::Storages;
use crate::varint::{VarintError, read_varint, write_varint};

/// Magic bytes opening a serialized module.
pub const MAGIC: [u8; 4] = *b"WRBM";
/// Container format version.
pub const VERSION: u8 = 1;

/// Error from container encode/decode.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContainerError {
    #[error("invalid magic: expected WRBM")]
    InvalidMagic,
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),
    #[error("unexpected end of container")]
    UnexpectedEof,
    #[error("malformed UTF-8 in interned text")]
    InvalidText,
    #[error(transparent)]
    Varint(#[from] VarintError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Serialize a module to its binary container form.
pub fn save(module: &Module) -> Result<Vec<u8>, ContainerError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);

    write_text_table(&mut out, module.strings().map(|(text, id)| (id, text)))?;
    write_text_table(&mut out, module.metadata_entries().map(|(text, id)| (id, text)))?;
    // Identifier ids can share a text hint, so the id-keyed table is the
    // authoritative one.
    write_text_table(&mut out, module.ident_text_entries())?;

    let storage_entries: Vec<(StorageRef, &Storages)> = module.storage_entries().collect();
    write_varint(storage_entries.len() as u64, &mut out)?;
    for (reference, storages) in storage_entries {
        write_varint(reference.0, &mut out)?;
        storages.encode(&mut out)?;
    }

    let index_entries: Vec<(ObjectId, usize)> = module.ident_index_entries().collect();
    write_varint(index_entries.len() as u64, &mut out)?;
    for (id, index) in index_entries {
        write_varint(id.0, &mut out)?;
        write_varint(index as u64, &mut out)?;
    }

    write_varint(module.code().len() as u64, &mut out)?;
    for code in module.code() {
        code.encode(&mut out)?;
    }
    Ok(out)
}

/// Load a module back from its binary container form.
pub fn load(bytes: &[u8]) -> Result<Module, ContainerError> {
    let mut input = bytes;
    let magic = take(&mut input, 4)?;
    if magic != MAGIC {
        return Err(ContainerError::InvalidMagic);
    }
    let version = take(&mut input, 1)?[0];
    if version != VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }

    let mut module = Module::new();

    for (id, text) in read_text_table(&mut input)? {
        module.restore_string(id, text);
    }
    for (id, text) in read_text_table(&mut input)? {
        module.restore_metadata(id, text);
    }
    for (id, text) in read_text_table(&mut input)? {
        module.restore_ident(id, text);
    }

    let storage_count = read_varint(&mut input)?;
    for _ in 0..storage_count {
        let reference = StorageRef(read_varint(&mut input)?);
        let storages = Storages::decode(&mut input)?;
        module.restore_storage(reference, storages);
    }

    let index_count = read_varint(&mut input)?;
    for _ in 0..index_count {
        let id = ObjectId(read_varint(&mut input)?);
        let index = read_varint(&mut input)? as usize;
        module.restore_ident_index(id, index);
    }

    let code_count = read_varint(&mut input)?;
    let mut code = Vec::with_capacity(code_count.min(65536) as usize);
    for _ in 0..code_count {
        code.push(Code::decode(&mut input)?);
    }
    // push() re-registers each defining instruction at the same index the
    // persisted table recorded.
    for instruction in code {
        module.push(instruction);
    }
    Ok(module)
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8], ContainerError> {
    if input.len() < len {
        return Err(ContainerError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

fn write_text_table<'a>(
    out: &mut Vec<u8>,
    entries: impl Iterator<Item = (ObjectId, &'a str)>,
) -> Result<(), ContainerError> {
    let entries: Vec<(ObjectId, &str)> = entries.collect();
    write_varint(entries.len() as u64, out)?;
    for (id, text) in entries {
        write_varint(id.0, out)?;
        write_varint(text.len() as u64, out)?;
        out.extend_from_slice(text.as_bytes());
    }
    Ok(())
}

fn read_text_table(input: &mut &[u8]) -> Result<Vec<(ObjectId, String)>, ContainerError> {
    let count = read_varint(input)?;
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let id = ObjectId(read_varint(input)?);
        let len = read_varint(input)? as usize;
        let bytes = take(input, len)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ContainerError::InvalidText)?
            .to_string();
        entries.push((id, text));
    }
    Ok(entries)
}
