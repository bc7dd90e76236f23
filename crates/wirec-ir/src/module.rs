//! The in-memory compilation unit.
//!
//! A module owns the ordered instruction stream, the interning tables for
//! identifiers, strings, metadata and type shapes, and the side tables
//! passes rely on. The structural invariant maintained here: for every
//! ObjectId that denotes a DEFINE_* operation, `ident_index(id)` points at
//! exactly that instruction.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use thiserror::Error;

use crate::cfg::Cfg;
use crate::code::Code;
use crate::ids::{ObjectId, StorageRef};
use crate::storage::Storages;

/// Error from module table lookups.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// Storage ref was never registered.
    #[error("invalid storage reference {0}")]
    InvalidReference(StorageRef),
    /// Identifier has no definition index recorded.
    #[error("no definition index for {0}")]
    MissingIndex(ObjectId),
}

/// The compilation unit: instruction stream plus all interning tables.
#[derive(Clone, Debug, Default)]
pub struct Module {
    code: Vec<Code>,
    /// Identifier text → id, insertion-ordered for stable serialization.
    idents: IndexMap<String, ObjectId>,
    ident_texts: BTreeMap<ObjectId, String>,
    strings: IndexMap<String, ObjectId>,
    string_texts: BTreeMap<ObjectId, String>,
    metadata: IndexMap<String, ObjectId>,
    metadata_texts: BTreeMap<ObjectId, String>,
    /// Defining instruction index per ObjectId.
    ident_index: BTreeMap<ObjectId, usize>,
    /// Shape → canonical ref (hash-consing) and its inverse.
    storage_keys: IndexMap<Storages, StorageRef>,
    storages: BTreeMap<StorageRef, Storages>,
    /// Constructed control-flow graphs, one per coder function.
    pub cfgs: Vec<Cfg>,
    /// `[start, end)` program ranges recorded by the format sorter.
    pub programs: Vec<(usize, usize)>,
    next_object_id: u64,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    /// Allocate a fresh, never-reused id. Zero stays reserved.
    pub fn new_object_id(&mut self) -> ObjectId {
        self.next_object_id += 1;
        ObjectId(self.next_object_id)
    }

    // --- identifier interning -------------------------------------------

    /// Id for identifier text, allocating on first sight.
    pub fn intern_ident(&mut self, text: &str) -> ObjectId {
        if let Some(&id) = self.idents.get(text) {
            return id;
        }
        let id = self.new_object_id();
        self.idents.insert(text.to_string(), id);
        self.ident_texts.insert(id, text.to_string());
        id
    }

    /// Register an externally allocated id under identifier text.
    pub fn register_ident(&mut self, id: ObjectId, text: &str) {
        self.idents.insert(text.to_string(), id);
        self.ident_texts.insert(id, text.to_string());
    }

    pub fn ident_text(&self, id: ObjectId) -> Option<&str> {
        self.ident_texts.get(&id).map(String::as_str)
    }

    pub fn idents(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.idents.iter().map(|(text, &id)| (text.as_str(), id))
    }

    /// Every identifier id with its text. Distinct ids may share a text
    /// hint, so this iterates the id-keyed table, not the text-keyed one.
    pub fn ident_text_entries(&self) -> impl Iterator<Item = (ObjectId, &str)> {
        self.ident_texts.iter().map(|(&id, text)| (id, text.as_str()))
    }

    pub fn intern_string(&mut self, text: &str) -> ObjectId {
        if let Some(&id) = self.strings.get(text) {
            return id;
        }
        let id = self.new_object_id();
        self.strings.insert(text.to_string(), id);
        self.string_texts.insert(id, text.to_string());
        id
    }

    pub fn string_text(&self, id: ObjectId) -> Option<&str> {
        self.string_texts.get(&id).map(String::as_str)
    }

    pub fn strings(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.strings.iter().map(|(text, &id)| (text.as_str(), id))
    }

    pub fn intern_metadata(&mut self, text: &str) -> ObjectId {
        if let Some(&id) = self.metadata.get(text) {
            return id;
        }
        let id = self.new_object_id();
        self.metadata.insert(text.to_string(), id);
        self.metadata_texts.insert(id, text.to_string());
        id
    }

    pub fn metadata_text(&self, id: ObjectId) -> Option<&str> {
        self.metadata_texts.get(&id).map(String::as_str)
    }

    pub fn metadata_entries(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.metadata.iter().map(|(text, &id)| (text.as_str(), id))
    }

    // --- storage interning ----------------------------------------------

    /// Canonical ref for a shape, registering it on first sight.
    pub fn get_storage_ref(&mut self, storages: Storages) -> StorageRef {
        if let Some(&existing) = self.storage_keys.get(&storages) {
            return existing;
        }
        self.next_object_id += 1;
        let reference = StorageRef(self.next_object_id);
        self.storage_keys.insert(storages.clone(), reference);
        self.storages.insert(reference, storages);
        reference
    }

    /// Shape for a previously registered ref.
    pub fn get_storage(&self, reference: StorageRef) -> Result<&Storages, ModuleError> {
        self.storages
            .get(&reference)
            .ok_or(ModuleError::InvalidReference(reference))
    }

    pub fn storage_entries(&self) -> impl Iterator<Item = (StorageRef, &Storages)> {
        self.storages.iter().map(|(&r, s)| (r, s))
    }

    /// Restore an interned shape while loading a serialized module.
    pub fn restore_storage(&mut self, reference: StorageRef, storages: Storages) {
        self.storage_keys.insert(storages.clone(), reference);
        self.storages.insert(reference, storages);
        self.next_object_id = self.next_object_id.max(reference.0);
    }

    /// Restore an interned identifier while loading a serialized module.
    pub fn restore_ident(&mut self, id: ObjectId, text: String) {
        self.idents.insert(text.clone(), id);
        self.ident_texts.insert(id, text);
        self.next_object_id = self.next_object_id.max(id.0);
    }

    /// Restore an interned string while loading a serialized module.
    pub fn restore_string(&mut self, id: ObjectId, text: String) {
        self.strings.insert(text.clone(), id);
        self.string_texts.insert(id, text);
        self.next_object_id = self.next_object_id.max(id.0);
    }

    /// Restore an interned metadata entry while loading a serialized module.
    pub fn restore_metadata(&mut self, id: ObjectId, text: String) {
        self.metadata.insert(text.clone(), id);
        self.metadata_texts.insert(id, text);
        self.next_object_id = self.next_object_id.max(id.0);
    }

    // --- instruction stream ---------------------------------------------

    pub fn code(&self) -> &[Code] {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut [Code] {
        &mut self.code
    }

    /// Append one instruction, registering its defined identifier.
    pub fn push(&mut self, code: Code) {
        if let Some(ident) = code.defined_ident() {
            self.ident_index.insert(ident, self.code.len());
        }
        self.code.push(code);
    }

    /// Defining stream index for an identifier.
    pub fn ident_index(&self, id: ObjectId) -> Result<usize, ModuleError> {
        self.ident_index
            .get(&id)
            .copied()
            .ok_or(ModuleError::MissingIndex(id))
    }

    pub fn ident_index_entries(&self) -> impl Iterator<Item = (ObjectId, usize)> {
        self.ident_index.iter().map(|(&id, &idx)| (id, idx))
    }

    /// Restore one ident→index entry while loading a serialized module.
    pub fn restore_ident_index(&mut self, id: ObjectId, index: usize) {
        self.ident_index.insert(id, index);
    }

    /// Install a rebuilt stream and refresh the ident→index table.
    ///
    /// Passes build their replacement stream in a local buffer and call
    /// this exactly once on success, which keeps every pass all-or-nothing.
    pub fn replace_code(&mut self, code: Vec<Code>) {
        self.code = code;
        self.rebuild_ident_index();
    }

    /// Rescan the stream and rebuild the defining-index table.
    pub fn rebuild_ident_index(&mut self) {
        self.ident_index.clear();
        for (index, code) in self.code.iter().enumerate() {
            if let Some(ident) = code.defined_ident() {
                self.ident_index.insert(ident, index);
            }
        }
    }
}
