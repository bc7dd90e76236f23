//! Human-readable module dump for debugging.
//!
//! One line per instruction: tag, identifier text when known, and the type
//! shape for storage-bearing tags. Indentation follows matching
//! DEFINE_*/END_* pairs. A diagnostic aid, not a stable format.

use std::fmt::Write as _;

use crate::code::Code;
use crate::ids::ObjectId;
use crate::module::Module;

/// Render the whole instruction stream.
pub fn dump(module: &Module) -> String {
    let mut out = String::new();
    let mut depth = 0usize;

    for code in module.code() {
        let op = code.op();
        if op.is_end() {
            depth = depth.saturating_sub(1);
        }
        let indent = "  ".repeat(depth);
        writeln!(out, "{indent}{}", render_code(module, code)).unwrap();
        if op.end_counterpart().is_some() {
            depth += 1;
        }
    }
    out
}

/// Render one instruction: tag, ident, shape.
pub fn render_code(module: &Module, code: &Code) -> String {
    let mut line = code.op().name().to_string();

    if let Some(ident) = code.defined_ident() {
        line.push(' ');
        line.push_str(&render_ident(module, ident));
    }

    match code {
        Code::ImmediateInt { value, .. } => {
            let _ = write!(line, " = {value}");
        }
        Code::Binary { op, left, right, .. } => {
            let _ = write!(
                line,
                " = {} {} {}",
                render_ident(module, *left),
                op.symbol(),
                render_ident(module, *right)
            );
        }
        Code::Unary { op, operand, .. } => {
            let _ = write!(line, " = {}{}", op.symbol(), render_ident(module, *operand));
        }
        Code::Assign { left, right } => {
            let _ = write!(
                line,
                " {} = {}",
                render_ident(module, *left),
                render_ident(module, *right)
            );
        }
        Code::Cast { operand, .. } => {
            let _ = write!(line, " from {}", render_ident(module, *operand));
        }
        Code::EncodeInt { target, bit_size, endian, .. }
        | Code::DecodeInt { target, bit_size, endian, .. } => {
            let _ = write!(
                line,
                " {} :{bit_size} {}",
                render_ident(module, *target),
                endian.endian.name()
            );
        }
        Code::CallEncode { target, obj, .. } | Code::CallDecode { target, obj, .. } => {
            let _ = write!(
                line,
                " {}({})",
                render_ident(module, *target),
                render_ident(module, *obj)
            );
        }
        Code::Ret { value } if !value.is_null() => {
            let _ = write!(line, " {}", render_ident(module, *value));
        }
        _ => {}
    }

    if let Some(reference) = code.storage()
        && !reference.is_null()
        && let Ok(storages) = module.get_storage(reference)
    {
        let _ = write!(line, " :: {}", storages.render());
    }
    line
}

fn render_ident(module: &Module, id: ObjectId) -> String {
    match module.ident_text(id) {
        Some(text) => format!("{text}{id}"),
        None => id.to_string(),
    }
}
