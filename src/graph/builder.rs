use crate::config::settings::GraphSettings;
use crate::core::types::{CodeListing, ExecutionTrace, StageOutput, StageRecord, SyntaxTree, Token};
use crate::frontend::clip_label;
use crate::graph::{GraphEdge, GraphNode, VisualizationGraph};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const TOKEN_LABEL_MAX: usize = 48;

/// Content-addressed node id: the same (stage, kind, label, ordinal) always
/// maps to the same id
pub fn node_id(stage: &str, kind: &str, label: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_bytes());
    hasher.update([0]);
    hasher.update(kind.as_bytes());
    hasher.update([0]);
    hasher.update(label.as_bytes());
    hasher.update([0]);
    hasher.update(ordinal.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Turns stage records into a [`VisualizationGraph`]
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    max_nodes_per_stage: usize,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(&GraphSettings::default())
    }
}

impl GraphBuilder {
    pub fn new(settings: &GraphSettings) -> Self {
        Self {
            max_nodes_per_stage: settings.max_nodes_per_stage.max(1),
        }
    }

    pub fn build(&self, records: &[StageRecord]) -> VisualizationGraph {
        let mut graph = VisualizationGraph::default();
        let mut previous_stage: Option<String> = None;

        for record in records.iter().filter(|r| r.outcome.ran()) {
            let mut stage = StageGraph::new(&record.stage_name, self.max_nodes_per_stage);
            let root = stage.root();
            if let Some(previous) = previous_stage.take() {
                graph.edges.push(GraphEdge {
                    from: previous,
                    to: root.clone(),
                    kind: "pipeline".to_string(),
                });
            }

            match &record.output {
                StageOutput::None => {}
                StageOutput::Tokens(tokens) => stage.add_tokens(tokens),
                StageOutput::Tree(tree) => stage.add_tree(tree),
                StageOutput::Code(listing) => stage.add_listing(listing),
                StageOutput::Trace(trace) => stage.add_trace(trace),
            }

            if stage.truncated {
                log::debug!(
                    "stage {} exceeded {} graph nodes; remainder dropped",
                    record.stage_name,
                    self.max_nodes_per_stage
                );
                graph.truncated_stages.push(record.stage_name.clone());
            }
            graph.stages.push(record.stage_name.clone());
            graph.nodes.extend(stage.nodes);
            graph.edges.extend(stage.edges);
            previous_stage = Some(root);
        }
        graph
    }
}

/// Nodes and edges contributed by one stage
struct StageGraph<'a> {
    stage: &'a str,
    limit: usize,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    ordinals: HashMap<(String, String), usize>,
    truncated: bool,
}

impl<'a> StageGraph<'a> {
    fn new(stage: &'a str, limit: usize) -> Self {
        let mut graph = Self {
            stage,
            limit,
            nodes: Vec::new(),
            edges: Vec::new(),
            ordinals: HashMap::new(),
            truncated: false,
        };
        graph.insert("stage", stage, None, None);
        graph
    }

    fn root(&self) -> String {
        self.nodes[0].id.clone()
    }

    /// The stage node itself does not count against the cap
    fn unit_count(&self) -> usize {
        self.nodes.len() - 1
    }

    fn insert(&mut self, kind: &str, label: &str, line: Option<u32>, column: Option<u32>) -> String {
        let ordinal = self
            .ordinals
            .entry((kind.to_string(), label.to_string()))
            .or_insert(0);
        let id = node_id(self.stage, kind, label, *ordinal);
        *ordinal += 1;
        self.nodes.push(GraphNode {
            id: id.clone(),
            stage: self.stage.to_string(),
            label: label.to_string(),
            kind: kind.to_string(),
            line,
            column,
        });
        id
    }

    fn add_unit(&mut self, kind: &str, label: &str, line: Option<u32>, column: Option<u32>) -> Option<String> {
        if self.unit_count() >= self.limit {
            self.truncated = true;
            return None;
        }
        Some(self.insert(kind, label, line, column))
    }

    fn connect(&mut self, from: Option<&String>, to: Option<&String>, kind: &str) {
        if let (Some(from), Some(to)) = (from, to) {
            self.edges.push(GraphEdge {
                from: from.clone(),
                to: to.clone(),
                kind: kind.to_string(),
            });
        }
    }

    fn add_tokens(&mut self, tokens: &[Token]) {
        let root = self.root();
        let mut previous: Option<String> = None;
        for token in tokens {
            let label = clip_label(&token.text, TOKEN_LABEL_MAX);
            let Some(id) = self.add_unit("token", &label, token.line, token.column) else {
                break;
            };
            self.connect(Some(&root), Some(&id), "contains");
            self.connect(previous.as_ref(), Some(&id), "flow");
            previous = Some(id);
        }
    }

    fn add_tree(&mut self, tree: &SyntaxTree) {
        let root = self.root();
        let mut ids: Vec<Option<String>> = Vec::with_capacity(tree.len());
        for node in &tree.nodes {
            let id = self.add_unit(&node.kind, &node.label, node.line, node.column);
            match node.parent {
                Some(parent) => {
                    let parent_id = ids.get(parent).and_then(Option::as_ref).cloned();
                    self.connect(parent_id.as_ref(), id.as_ref(), "child");
                }
                None => self.connect(Some(&root), id.as_ref(), "contains"),
            }
            ids.push(id);
        }
    }

    fn add_listing(&mut self, listing: &CodeListing) {
        let root = self.root();
        let mut ids: Vec<Option<String>> = Vec::with_capacity(listing.units.len());
        for unit in &listing.units {
            let id = self.add_unit(unit.kind.as_str(), &unit.label, unit.line, None);
            match unit.parent {
                Some(parent) => {
                    let parent_id = ids.get(parent).and_then(Option::as_ref).cloned();
                    self.connect(parent_id.as_ref(), id.as_ref(), "contains");
                }
                None => self.connect(Some(&root), id.as_ref(), "contains"),
            }
            ids.push(id);
        }
        for edge in &listing.edges {
            let from = ids.get(edge.from).and_then(Option::as_ref).cloned();
            let to = ids.get(edge.to).and_then(Option::as_ref).cloned();
            self.connect(from.as_ref(), to.as_ref(), edge.kind.as_str());
        }
    }

    fn add_trace(&mut self, trace: &ExecutionTrace) {
        let root = self.root();
        let mut previous: Option<String> = None;
        for step in &trace.steps {
            let label = format!("{}: {} @{}={}", step.step, step.instruction, step.pointer, step.cell);
            let Some(id) = self.add_unit("step", &label, None, None) else {
                break;
            };
            self.connect(Some(&root), Some(&id), "contains");
            self.connect(previous.as_ref(), Some(&id), "flow");
            previous = Some(id);
        }
    }
}
