//! Stream-rewriting passes over a converted module.
//!
//! Each pass reads the current instruction stream, builds a complete
//! replacement, and installs it with `replace_code`, so the ident→index
//! table is always consistent between passes. Pass order matters:
//!
//! 1. `bind` associates formats with their coder functions and retargets
//!    abstract calls,
//! 2. `bit_field` packs bit-field shapes and derives accessor functions,
//! 3. `fallback` lowers multi-byte integer transfers to byte-granular
//!    regions,
//! 4. `flatten` hoists nested definition scopes behind placeholders,
//! 5. `merge_cond` folds conditional fields into shared slots (it consumes
//!    the property placeholders flattening produced),
//! 6. `sort_format` orders formats by dependency,
//! 7. `cfg` builds control-flow graphs over the final stream.

use thiserror::Error;

use wirec_ir::code::{Code, Op};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::{Module, ModuleError};

pub mod bind;
pub mod bit_field;
pub mod cfg;
pub mod fallback;
pub mod flatten;
pub mod merge_cond;
pub mod sort_format;

#[cfg(test)]
mod bit_field_tests;
#[cfg(test)]
mod cfg_tests;
#[cfg(test)]
mod flatten_tests;

/// Error from a transformation pass.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{0:?} closes no open scope")]
    UnmatchedEnd(Op),
    #[error("scope opened by {0:?} is never closed")]
    UnterminatedScope(Op),
    #[error("no placeholder form for nested {0:?}")]
    NoDeclareCounterpart(Op),
    #[error("format {0} has no bound coder")]
    MissingCoder(ObjectId),
    #[error("bit field member {0} has a non-integer shape")]
    UnexpectedStorage(ObjectId),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Run the full pipeline in order.
pub fn run(module: &mut Module) -> Result<(), TransformError> {
    bind::run(module)?;
    bit_field::run(module)?;
    fallback::run(module)?;
    flatten::run(module)?;
    merge_cond::run(module)?;
    sort_format::run(module)?;
    cfg::run(module)?;
    Ok(())
}

/// Allocate a fresh id carrying a display hint.
pub(crate) fn fresh(module: &mut Module, hint: &str) -> ObjectId {
    let id = module.new_object_id();
    module.register_ident(id, hint);
    id
}

/// Advance `pos` past the scope opened at `pos`, handling nesting.
///
/// On return `pos` is one past the matching END tag.
pub(crate) fn skip_scope(code: &[Code], pos: &mut usize) -> Result<(), TransformError> {
    let open = code[*pos].op();
    debug_assert!(open.end_counterpart().is_some());
    let mut depth = 0usize;
    while *pos < code.len() {
        let op = code[*pos].op();
        if op.end_counterpart().is_some() {
            depth += 1;
        } else if op.is_end() {
            depth -= 1;
            if depth == 0 {
                *pos += 1;
                return Ok(());
            }
        }
        *pos += 1;
    }
    Err(TransformError::UnterminatedScope(open))
}

/// One top-level segment of the stream: either a scope region (opener
/// through its matching END) or a single leaf instruction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Segment {
    pub start: usize,
    /// One past the last instruction.
    pub end: usize,
    pub op: Op,
}

/// Split the stream into top-level segments.
pub(crate) fn segments(code: &[Code]) -> Result<Vec<Segment>, TransformError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        let start = pos;
        let op = code[pos].op();
        if op.end_counterpart().is_some() {
            skip_scope(code, &mut pos)?;
        } else if op.is_end() {
            return Err(TransformError::UnmatchedEnd(op));
        } else {
            pos += 1;
        }
        out.push(Segment { start, end: pos, op });
    }
    Ok(out)
}
