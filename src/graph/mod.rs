//! Language-neutral visualization graph
//!
//! A [`VisualizationGraph`] is a coarse projection of a job's stage records:
//! one `stage` node per stage that ran, unit nodes for whatever structure the
//! stage surfaced, and typed edges between them. Raw per-stage output stays on
//! the stage records for clients that want language-specific detail.

pub mod builder;
pub mod export;

pub use builder::GraphBuilder;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub stage: String,
    pub label: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Names of the stages that ran, in execution order
    pub stages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncated_stages: Vec<String>,
}

impl VisualizationGraph {
    /// Subgraph holding one stage's nodes and the edges between them
    pub fn view(&self, stage: &str) -> Option<VisualizationGraph> {
        if !self.stages.iter().any(|s| s == stage) {
            return None;
        }
        let nodes: Vec<GraphNode> = self
            .nodes
            .iter()
            .filter(|node| node.stage == stage)
            .cloned()
            .collect();
        let ids: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
        let edges = self
            .edges
            .iter()
            .filter(|edge| ids.contains(edge.from.as_str()) && ids.contains(edge.to.as_str()))
            .cloned()
            .collect();
        Some(VisualizationGraph {
            nodes,
            edges,
            stages: vec![stage.to_string()],
            truncated_stages: self
                .truncated_stages
                .iter()
                .filter(|s| s.as_str() == stage)
                .cloned()
                .collect(),
        })
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn stage_node_count(&self, stage: &str) -> usize {
        self.nodes.iter().filter(|node| node.stage == stage).count()
    }

    /// (stage, label, kind) tuples; equal sets mean equal graph content
    /// regardless of how ids were assigned
    pub fn content_set(&self) -> BTreeSet<(String, String, String)> {
        self.nodes
            .iter()
            .map(|node| (node.stage.clone(), node.label.clone(), node.kind.clone()))
            .collect()
    }

    /// Edges as (kind, from label, to label) so content comparison does not
    /// depend on ids either
    pub fn edge_content(&self) -> BTreeSet<(String, String, String)> {
        self.edges
            .iter()
            .filter_map(|edge| {
                let from = self.node(&edge.from)?;
                let to = self.node(&edge.to)?;
                Some((edge.kind.clone(), from.label.clone(), to.label.clone()))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
