//! Instruction module and binary container for wirec.
//!
//! This crate contains:
//! - The tagged instruction model (`Op`, `Code`) and its wire codec
//! - Identifier/string/metadata and type-shape interning (`Module`)
//! - The control-flow graph arena (`Cfg`)
//! - Binary container encode/decode, debug dump and dot rendering

pub mod cfg;
pub mod code;
pub mod container;
pub mod dot;
pub mod dump;
pub mod ids;
pub mod module;
pub mod storage;
pub mod varint;

#[cfg(test)]
mod container_tests;
#[cfg(test)]
mod module_tests;
#[cfg(test)]
mod varint_tests;

pub use cfg::{Cfg, CfgNode, CfgNodeId};
pub use code::{BinOp, Code, CodecError, Endian, EndianExpr, FunctionKind, MergeMode, Op, UnOp};
pub use container::{ContainerError, load, save};
pub use dump::dump;
pub use ids::{ObjectId, StorageRef};
pub use module::{Module, ModuleError};
pub use storage::{Storage, StorageKind, Storages};
pub use varint::{VarintError, read_varint, write_varint};
