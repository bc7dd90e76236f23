//! Dot-language rendering of constructed control-flow graphs.
//!
//! One cluster per function; node labels carry the block's aggregate bit
//! size and each instruction's rendered form. Control-flow edges are
//! solid, call relationships between functions are dotted.

use std::fmt::Write as _;

use crate::code::Code;
use crate::dump::render_code;
use crate::ids::ObjectId;
use crate::module::Module;

/// Render every CFG in the module as one digraph.
pub fn render(module: &Module) -> String {
    let mut out = String::new();
    writeln!(out, "digraph wirec {{").unwrap();
    writeln!(out, "  node [shape=box fontname=\"monospace\"];").unwrap();

    for (cfg_index, cfg) in module.cfgs.iter().enumerate() {
        let name = module.ident_text(cfg.ident).unwrap_or("fn");
        writeln!(out, "  subgraph cluster_{cfg_index} {{").unwrap();
        writeln!(out, "    label=\"{name}\";").unwrap();

        for (node_id, node) in cfg.iter() {
            let mut label = format!("bits: {}", node.sum_bits);
            for &index in &node.indices {
                label.push_str("\\l");
                label.push_str(&escape(&render_code(module, &module.code()[index])));
            }
            label.push_str("\\l");
            writeln!(
                out,
                "    n{cfg_index}_{} [label=\"{label}\"];",
                node_id.0
            )
            .unwrap();
        }

        for (node_id, node) in cfg.iter() {
            for &next in &node.next {
                writeln!(out, "    n{cfg_index}_{} -> n{cfg_index}_{};", node_id.0, next.0)
                    .unwrap();
            }
        }
        writeln!(out, "  }}").unwrap();
    }

    render_call_edges(module, &mut out);
    writeln!(out, "}}").unwrap();
    out
}

/// Dotted edges from each call site's block to the callee's entry.
fn render_call_edges(module: &Module, out: &mut String) {
    for (caller_index, cfg) in module.cfgs.iter().enumerate() {
        for (node_id, node) in cfg.iter() {
            for &index in &node.indices {
                let target = match &module.code()[index] {
                    Code::CallEncode { target, .. } | Code::CallDecode { target, .. } => *target,
                    _ => continue,
                };
                if let Some((callee_index, callee)) = find_cfg(module, target) {
                    writeln!(
                        out,
                        "  n{caller_index}_{} -> n{callee_index}_{} [style=dotted];",
                        node_id.0, callee.entry.0
                    )
                    .unwrap();
                }
            }
        }
    }
}

fn find_cfg(module: &Module, ident: ObjectId) -> Option<(usize, &crate::cfg::Cfg)> {
    module
        .cfgs
        .iter()
        .enumerate()
        .find(|(_, cfg)| cfg.ident == ident)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
