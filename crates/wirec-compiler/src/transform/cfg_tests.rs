//! Tests for control-flow graph construction.

use std::collections::HashSet;

use indoc::indoc;

use wirec_ir::cfg::Cfg;
use wirec_ir::code::{Code, FunctionKind, Op};
use wirec_ir::module::Module;

use crate::ast;
use crate::convert::convert;
use crate::transform::{self, TransformError, cfg};

fn compiled(text: &str) -> Module {
    let ast = ast::load(text).unwrap();
    let mut module = convert(&ast).unwrap();
    transform::run(&mut module).unwrap();
    module
}

fn cfg_of<'a>(module: &'a Module, name: &str) -> &'a Cfg {
    module
        .cfgs
        .iter()
        .find(|cfg| module.ident_text(cfg.ident) == Some(name))
        .unwrap_or_else(|| panic!("no graph for {name}"))
}

/// Walk successor edges from the entry.
fn reachable(cfg: &Cfg) -> HashSet<u32> {
    let mut seen = HashSet::new();
    let mut stack = vec![cfg.entry];
    while let Some(node) = stack.pop() {
        if seen.insert(node.0) {
            stack.extend(cfg.node(node).next.iter().copied());
        }
    }
    seen
}

const SIMPLE: &str = indoc! {r#"
    {"programs": [{"name": "p", "elements": [
        {"kind": "format", "name": "Frame", "members": [
            {"kind": "field", "name": "tag", "ty": {"kind": "uint", "bits": 8}},
            {"kind": "field", "name": "len", "ty": {"kind": "uint", "bits": 16}}
        ]}
    ]}]}
"#};

#[test]
fn every_function_gets_a_graph() {
    let module = compiled(SIMPLE);
    let functions = module
        .code()
        .iter()
        .filter(|c| matches!(c, Code::DefineFunction { .. } | Code::DefineFallback { .. }))
        .count();
    assert_eq!(module.cfgs.len(), functions);
    for cfg in &module.cfgs {
        let seen = reachable(cfg);
        assert!(seen.contains(&cfg.exit.0), "exit unreachable in {}", cfg.ident);
    }
}

#[test]
fn straight_line_coder_sums_its_bits() {
    let module = compiled(SIMPLE);
    let encode = cfg_of(&module, "Frame.encode");
    assert_eq!(encode.total_bits(), 24);
}

#[test]
fn branches_fork_and_join() {
    let module = compiled(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Packet", "members": [
                {"kind": "field", "name": "version", "ty": {"kind": "uint", "bits": 8}},
                {"kind": "function", "name": "enc", "role": "encode", "body": [
                    {"kind": "encode", "field": "version"},
                    {"kind": "if",
                     "cond": {"kind": "ident", "name": "version"},
                     "then": [{"kind": "error", "message": "bad"}],
                     "else": [{"kind": "assert", "cond": {"kind": "bool", "value": true}}]}
                ]}
            ]}
        ]}]}
    "#});

    let graph = cfg_of(&module, "enc");
    // The decision block has two arms.
    assert!(graph.iter().any(|(_, node)| node.next.len() >= 2));
    // The error arm reaches the exit directly.
    assert!(graph.node(graph.exit).prev.len() >= 2);
}

#[test]
fn elif_arms_branch_from_the_decision_block() {
    let module = compiled(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Packet", "members": [
                {"kind": "field", "name": "version", "ty": {"kind": "uint", "bits": 8}},
                {"kind": "function", "name": "enc", "role": "encode", "body": [
                    {"kind": "encode", "field": "version"},
                    {"kind": "if",
                     "cond": {"kind": "ident", "name": "version"},
                     "then": [{"kind": "assert", "cond": {"kind": "bool", "value": true}}],
                     "elifs": [{"cond": {"kind": "ident", "name": "version"},
                                "body": [{"kind": "assert", "cond": {"kind": "bool", "value": true}}]}],
                     "else": [{"kind": "assert", "cond": {"kind": "bool", "value": false}}]}
                ]}
            ]}
        ]}]}
    "#});

    let graph = cfg_of(&module, "enc");
    // The block holding the If fans out to all three arms directly, no
    // chained decision blocks.
    assert!(graph.iter().any(|(_, node)| node.next.len() == 3));
    // All arms meet at the join.
    assert!(graph.iter().any(|(_, node)| node.prev.len() >= 3));
}

#[test]
fn loops_get_back_edges_and_break_edges() {
    let module = compiled(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Stream", "members": [
                {"kind": "field", "name": "more", "ty": {"kind": "uint", "bits": 8}},
                {"kind": "function", "name": "dec", "role": "decode", "body": [
                    {"kind": "loop", "cond": {"kind": "ident", "name": "more"}, "body": [
                        {"kind": "decode", "field": "more"},
                        {"kind": "if",
                         "cond": {"kind": "ident", "name": "more"},
                         "then": [{"kind": "break"}]},
                        {"kind": "continue"}
                    ]}
                ]}
            ]}
        ]}]}
    "#});

    let graph = cfg_of(&module, "dec");
    // Back edge: some block jumps to an earlier one.
    assert!(graph
        .iter()
        .any(|(id, node)| node.next.iter().any(|next| next.0 < id.0)));
    // Break joins the loop's fall-through: the after block has at least
    // the header and the breaking block as predecessors.
    assert!(graph.iter().any(|(_, node)| node.prev.len() >= 2));
}

#[test]
fn calls_carry_the_callee_size() {
    let module = compiled(indoc! {r#"
        {"programs": [{"name": "p", "elements": [
            {"kind": "format", "name": "Outer", "members": [
                {"kind": "field", "name": "inner", "ty": {"kind": "named", "name": "Inner"}}
            ]},
            {"kind": "format", "name": "Inner", "members": [
                {"kind": "field", "name": "x", "ty": {"kind": "uint", "bits": 8}}
            ]}
        ]}]}
    "#});

    let surplus: Vec<u64> = module
        .code()
        .iter()
        .filter_map(|code| match code {
            Code::CallEncode { size_surplus, .. } | Code::CallDecode { size_surplus, .. } => {
                Some(*size_surplus)
            }
            _ => None,
        })
        .collect();
    assert_eq!(surplus, vec![8, 8]);

    let outer = cfg_of(&module, "Outer.encode");
    assert_eq!(outer.total_bits(), 8);
}

#[test]
fn graphs_cover_fallback_regions() {
    let module = compiled(SIMPLE);
    // The 16-bit transfers were lowered; their regions get graphs with a
    // loop in them.
    let fallback_graphs: Vec<_> = module
        .cfgs
        .iter()
        .filter(|cfg| {
            module
                .ident_index(cfg.ident)
                .ok()
                .is_some_and(|index| matches!(module.code()[index], Code::DefineFallback { .. }))
        })
        .collect();
    assert!(!fallback_graphs.is_empty());
    for graph in fallback_graphs {
        assert!(graph
            .iter()
            .any(|(id, node)| node.next.iter().any(|next| next.0 < id.0)));
    }
}

#[test]
fn unmatched_control_flow_is_rejected() {
    let mut module = Module::new();
    let func = module.intern_ident("broken");
    let owner = module.intern_ident("F");
    module.push(Code::DefineFunction {
        ident: func,
        belong: owner,
        kind: FunctionKind::Free,
    });
    module.push(Code::EndIf {});
    module.push(Code::EndFunction {});

    assert!(matches!(
        cfg::run(&mut module),
        Err(TransformError::UnmatchedEnd(Op::EndIf))
    ));
}
