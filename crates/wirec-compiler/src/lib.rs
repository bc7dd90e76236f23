//! Middle end of the wire-format compiler.
//!
//! Takes the parsed format-description tree as JSON, converts it into a
//! flat tagged-instruction module, and runs the transformation pipeline
//! over it. See [`transform`] for the pass order.

pub mod ast;
pub mod convert;
pub mod transform;

use thiserror::Error;

use wirec_ir::module::Module;

pub use ast::AstError;
pub use convert::ConvertError;
pub use transform::TransformError;

/// Error from any compilation stage.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Ast(#[from] AstError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Compile a JSON AST into a fully transformed instruction module.
pub fn compile(text: &str) -> Result<Module, CompileError> {
    let ast = ast::load(text)?;
    let mut module = convert::convert(&ast)?;
    transform::run(&mut module)?;
    Ok(module)
}
