//! Download formats for a built graph

use crate::graph::VisualizationGraph;
use std::fmt::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Dot,
    Text,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "dot" | "gv" => Some(ExportFormat::Dot),
            "txt" | "text" => Some(ExportFormat::Text),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Dot => "text/vnd.graphviz",
            ExportFormat::Text => "text/plain",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Dot => "dot",
            ExportFormat::Text => "txt",
        }
    }
}

pub fn render(graph: &VisualizationGraph, format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(graph).unwrap_or_else(|_| "{}".to_string()),
        ExportFormat::Dot => to_dot(graph),
        ExportFormat::Text => to_text(graph),
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz rendering with one cluster per stage
pub fn to_dot(graph: &VisualizationGraph) -> String {
    let mut out = String::from("digraph compilation {\n  rankdir=TB;\n  node [shape=box, fontname=\"monospace\"];\n");
    for (index, stage) in graph.stages.iter().enumerate() {
        let _ = writeln!(out, "  subgraph cluster_{} {{", index);
        let _ = writeln!(out, "    label=\"{}\";", escape(stage));
        for node in graph.nodes.iter().filter(|n| &n.stage == stage) {
            let shape = if node.kind == "stage" { ", shape=ellipse" } else { "" };
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\\n({})\"{}];",
                node.id,
                escape(&node.label),
                escape(&node.kind),
                shape
            );
        }
        out.push_str("  }\n");
    }
    for edge in &graph.edges {
        let style = match edge.kind.as_str() {
            "pipeline" => ", style=bold",
            "contains" => ", style=dotted",
            "branch" => ", color=blue",
            "call" => ", color=red",
            _ => "",
        };
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"{}];",
            edge.from, edge.to, edge.kind, style
        );
    }
    out.push_str("}\n");
    out
}

/// Indented outline: stages, their nodes, and each node's outgoing edges
pub fn to_text(graph: &VisualizationGraph) -> String {
    let mut out = String::new();
    for stage in &graph.stages {
        let _ = writeln!(out, "== {} ==", stage);
        if graph.truncated_stages.contains(stage) {
            out.push_str("  (truncated)\n");
        }
        for node in graph.nodes.iter().filter(|n| &n.stage == stage && n.kind != "stage") {
            let location = match (node.line, node.column) {
                (Some(line), Some(col)) => format!(" [{}:{}]", line, col),
                (Some(line), None) => format!(" [{}]", line),
                _ => String::new(),
            };
            let _ = writeln!(out, "  {} {}{}", node.kind, node.label, location);
            for edge in graph.edges.iter().filter(|e| e.from == node.id && e.kind != "contains") {
                if let Some(target) = graph.node(&edge.to) {
                    let _ = writeln!(out, "    -{}-> {}", edge.kind, target.label);
                }
            }
        }
    }
    out
}
