//! Diagnostics
//!
//! Introspection of a running system: graphs of the compiled network,
//! counters, and a way to throw everything away.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::system::SystemInner;
use crate::error::{ExecError, Result};
use crate::vdf::Node;

/// Counters describing the compiled network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub nodes: usize,
    pub connections: usize,
    pub speculation_nodes: usize,
    pub compiled_keys: usize,
    pub requests: usize,
    pub inputs_requiring_recompilation: usize,
}

/// Handle for inspecting a [`System`](super::System).
pub struct Diagnostics<'a> {
    inner: &'a SystemInner,
}

fn escape_record(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '{' | '}' | '|' | '<' | '>' | '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn record_ports(prefix: &str, names: impl Iterator<Item = String>) -> String {
    let parts: Vec<String> = names
        .enumerate()
        .map(|(i, name)| format!("<{prefix}{i}> {}", escape_record(&name)))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{ {} }}", parts.join(" | "))
    }
}

impl<'a> Diagnostics<'a> {
    pub(crate) fn new(inner: &'a SystemInner) -> Self {
        Self { inner }
    }

    /// Uncompile everything and clear every cached value. Requests
    /// recompile on their next computation, and requests with a value
    /// invalidation callback are notified.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub fn network_stats(&self) -> NetworkStats {
        let program = &self.inner.program;
        let network = program.network();
        NetworkStats {
            nodes: network.node_count(),
            connections: network.connection_count(),
            speculation_nodes: network.nodes().filter(|n| n.is_speculation()).count(),
            compiled_keys: program.compiled_count(),
            requests: self.inner.live_requests().len(),
            inputs_requiring_recompilation: program.inputs_requiring_recompilation(),
        }
    }

    fn node_label(&self, node: &Node) -> String {
        let program = &self.inner.program;
        let title = match program.key_of(node.id()) {
            Some(key) => format!("{} {}\n{}", node.id(), program.role_name(node.id()), key),
            None => format!("{} {}\n{}", node.id(), program.role_name(node.id()), node.name()),
        };
        let center = escape_record(&title);
        let inputs = record_ports("in", node.inputs().iter().map(|i| i.spec().name.to_string()));
        let outputs = record_ports("out", node.outputs().iter().map(|o| o.spec().name.to_string()));
        match (inputs.is_empty(), outputs.is_empty()) {
            (true, true) => center,
            (true, false) => format!("{{ {center} | {outputs} }}"),
            (false, true) => format!("{{ {inputs} | {center} }}"),
            (false, false) => format!("{{ {inputs} | {center} | {outputs} }}"),
        }
    }

    /// Render the compiled network as Graphviz DOT.
    pub fn to_dot(&self) -> String {
        let network = self.inner.program.network();
        let mut dot = String::from(
            "digraph ExecNetwork {\n\
             \trankdir=LR;\n\
             \tnode [shape=record, fontname=\"monospace\", fontsize=10];\n\
             \tedge [fontname=\"monospace\", fontsize=9, arrowsize=0.7];\n",
        );
        for node in network.nodes() {
            let style = if node.is_speculation() { ", style=dashed" } else { "" };
            let _ = writeln!(
                dot,
                "\tn{} [label=\"{}\"{style}];",
                node.id().raw(),
                self.node_label(node)
            );
        }
        for connection in network.connections() {
            let _ = writeln!(
                dot,
                "\tn{}:out{} -> n{}:in{} [label=\"{}\"];",
                connection.source.node.raw(),
                connection.source.index,
                connection.target.node.raw(),
                connection.target.index,
                connection.mask.count()
            );
        }
        dot.push_str("}\n");
        dot
    }

    pub fn write_dot(&self, writer: &mut impl Write) -> Result<()> {
        writer
            .write_all(self.to_dot().as_bytes())
            .map_err(|e| ExecError::Io(e.to_string()))
    }

    /// Write the compiled network as DOT to the file at `path`.
    pub fn graph_network(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = std::fs::File::create(path).map_err(|e| ExecError::Io(e.to_string()))?;
        self.write_dot(&mut file)?;
        info!(path = %path.display(), "wrote network graph");
        Ok(())
    }

    /// Counters as a JSON document.
    pub fn stats_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.network_stats()).map_err(|e| ExecError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_text_is_escaped() {
        assert_eq!(escape_record("a|b"), "a\\|b");
        assert_eq!(escape_record("{x}\n"), "\\{x\\}\\n");
    }

    #[test]
    fn ports_are_numbered() {
        let ports = record_ports("in", ["a".to_string(), "b".to_string()].into_iter());
        assert_eq!(ports, "{ <in0> a | <in1> b }");
        assert!(record_ports("out", std::iter::empty()).is_empty());
    }
}
