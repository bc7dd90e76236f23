//! Encoder/decoder binding.
//!
//! Associates each format with its coder functions via DefineEncoder and
//! DefineDecoder records, gives every coder its stream parameter and one
//! state-variable parameter per state field of the enclosing format, and
//! retargets abstract CallEncode/CallDecode from the format to the bound
//! function. A call to a format with no matching coder is an error.

use std::collections::HashMap;

use wirec_ir::code::{Code, FunctionKind};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;

use super::TransformError;

pub fn run(module: &mut Module) -> Result<(), TransformError> {
    let code = module.code().to_vec();

    // Collect coders and state fields per format.
    let mut encoders: HashMap<ObjectId, ObjectId> = HashMap::new();
    let mut decoders: HashMap<ObjectId, ObjectId> = HashMap::new();
    let mut state_fields: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    let mut format_stack: Vec<ObjectId> = Vec::new();
    let mut in_state = false;
    for instr in &code {
        match instr {
            Code::DefineFormat { ident } => format_stack.push(*ident),
            Code::EndFormat {} => {
                format_stack.pop();
            }
            Code::DefineState { .. } if !format_stack.is_empty() => in_state = true,
            Code::EndState {} => in_state = false,
            Code::DefineField { ident, .. } if in_state => {
                if let Some(&format) = format_stack.last() {
                    state_fields.entry(format).or_default().push(*ident);
                }
            }
            Code::DefineFunction { ident, belong, kind } => match kind {
                FunctionKind::Encode => {
                    encoders.insert(*belong, *ident);
                }
                FunctionKind::Decode => {
                    decoders.insert(*belong, *ident);
                }
                _ => {}
            },
            _ => {}
        }
    }

    let mut out = Vec::with_capacity(code.len());
    format_stack.clear();
    for instr in code {
        match instr {
            Code::DefineFormat { ident } => {
                format_stack.push(ident);
                out.push(instr);
                if let Some(&func) = encoders.get(&ident) {
                    out.push(Code::DefineEncoder { belong: ident, func });
                }
                if let Some(&func) = decoders.get(&ident) {
                    out.push(Code::DefineDecoder { belong: ident, func });
                }
            }
            Code::EndFormat {} => {
                format_stack.pop();
                out.push(instr);
            }
            Code::DefineFunction { ident, kind, .. } => {
                out.push(instr.clone());
                let stream_param = match kind {
                    FunctionKind::Encode => {
                        let writer = module.new_object_id();
                        module.register_ident(writer, "writer");
                        Some(Code::EncoderParameter { ident: writer, belong: ident })
                    }
                    FunctionKind::Decode => {
                        let reader = module.new_object_id();
                        module.register_ident(reader, "reader");
                        Some(Code::DecoderParameter { ident: reader, belong: ident })
                    }
                    _ => None,
                };
                if let Some(param) = stream_param {
                    out.push(param);
                    // Coders see the format's persistent state by value slot.
                    let vars = format_stack
                        .last()
                        .and_then(|format| state_fields.get(format))
                        .cloned()
                        .unwrap_or_default();
                    for state_var in vars {
                        let param = module.new_object_id();
                        module.register_ident(param, "state");
                        out.push(Code::StateVariableParameter { ident: param, state_var });
                    }
                }
            }
            Code::CallEncode { target, obj, size_surplus } => {
                let func = *encoders
                    .get(&target)
                    .ok_or(TransformError::MissingCoder(target))?;
                out.push(Code::CallEncode { target: func, obj, size_surplus });
            }
            Code::CallDecode { target, obj, size_surplus } => {
                let func = *decoders
                    .get(&target)
                    .ok_or(TransformError::MissingCoder(target))?;
                out.push(Code::CallDecode { target: func, obj, size_surplus });
            }
            other => out.push(other),
        }
    }
    module.replace_code(out);
    Ok(())
}
