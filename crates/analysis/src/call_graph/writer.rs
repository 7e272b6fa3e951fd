//! Textual dumps of a [`CallGraph`].

use std::io;

use dot2::{label::Text, GraphWalk, Id, Labeller};
use lattix_ir::{FuncRef, Module};

use super::CallGraph;

/// Writes one `caller -> callee` line per edge. When call sites are collected,
/// each edge is followed by its call sites.
pub fn write_text(
    call_graph: &CallGraph,
    module: &Module,
    mut w: impl io::Write,
) -> io::Result<()> {
    for (caller, callee) in call_graph.edges() {
        writeln!(
            w,
            "{} -> {}",
            func_name(module, caller),
            func_name(module, callee)
        )?;
        if call_graph.collects_callsites() {
            writeln!(w, "  (callsites: {})", format_callsites(call_graph, caller, callee))?;
        }
    }

    Ok(())
}

pub fn write_dot(
    call_graph: &CallGraph,
    module: &Module,
    output: &mut impl io::Write,
) -> io::Result<()> {
    let graph = DotCallGraph { call_graph, module };
    dot2::render(&graph, output).map_err(|err| match err {
        dot2::Error::Io(err) => err,
        err => io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}")),
    })
}

pub fn write_xml(call_graph: &CallGraph, module: &Module, mut w: impl io::Write) -> io::Result<()> {
    writeln!(w, "<call_graph>")?;
    for (caller, callee) in call_graph.edges() {
        writeln!(
            w,
            "  <call_graph_edge caller=\"{}\" callee=\"{}\"/>",
            escape_attribute(func_name(module, caller)),
            escape_attribute(func_name(module, callee)),
        )?;
    }
    writeln!(w, "</call_graph>")
}

pub fn dump_string(
    call_graph: &CallGraph,
    module: &Module,
    write: impl FnOnce(&CallGraph, &Module, &mut Vec<u8>) -> io::Result<()>,
) -> io::Result<String> {
    let mut s = Vec::new();
    write(call_graph, module, &mut s)?;
    String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn func_name(module: &Module, func_ref: FuncRef) -> String {
    match module.get_func(func_ref) {
        Some(func) => func.name().to_string(),
        None => func_ref.to_string(),
    }
}

fn format_callsites(call_graph: &CallGraph, caller: FuncRef, callee: FuncRef) -> String {
    let sites: Vec<_> = call_graph
        .callsites(caller, callee)
        .into_iter()
        .flatten()
        .map(|inst| inst.as_u32().to_string())
        .collect();
    format!("{{{}}}", sites.join(", "))
}

fn escape_attribute(s: String) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

struct DotCallGraph<'a> {
    call_graph: &'a CallGraph,
    module: &'a Module,
}

impl<'a> Labeller<'a> for DotCallGraph<'a> {
    type Node = FuncRef;
    type Edge = (FuncRef, FuncRef);
    type Subgraph = ();

    fn graph_id(&self) -> dot2::Result<Id<'a>> {
        Id::new("call_graph")
    }

    fn node_id(&self, n: &Self::Node) -> dot2::Result<Id<'a>> {
        Id::new(format!("{n}"))
    }

    fn node_label(&'a self, n: &Self::Node) -> dot2::Result<Text<'a>> {
        Ok(Text::LabelStr(func_name(self.module, *n).into()))
    }

    fn edge_label(&self, e: &Self::Edge) -> Text<'a> {
        let (caller, callee) = *e;
        if self.call_graph.collects_callsites() {
            Text::LabelStr(format_callsites(self.call_graph, caller, callee).into())
        } else {
            Text::LabelStr("".into())
        }
    }
}

impl<'a> GraphWalk<'a> for DotCallGraph<'a> {
    type Node = FuncRef;
    type Edge = (FuncRef, FuncRef);
    type Subgraph = ();

    fn nodes(&self) -> dot2::Nodes<'a, Self::Node> {
        self.call_graph.funcs().collect::<Vec<_>>().into()
    }

    fn edges(&'a self) -> dot2::Edges<'a, Self::Edge> {
        self.call_graph.edges().collect::<Vec<_>>().into()
    }

    fn source(&self, edge: &Self::Edge) -> Self::Node {
        edge.0
    }

    fn target(&self, edge: &Self::Edge) -> Self::Node {
        edge.1
    }
}
