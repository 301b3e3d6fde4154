//! Index-addressed dependency graph of a single flow.
//!
//! Node `i` of the petgraph `DiGraph` is the `i`-th declared node of the flow.
//! An edge `a -> b` means `b` depends on `a`.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind};
use crate::parse::types::FlowGraph;

pub struct DependencyGraph {
    pub graph: DiGraph<String, ()>,
    pub indices: HashMap<String, NodeIndex>,
    /// Resolved dependencies of every declared node, self-dependencies
    /// removed and condition gates added.
    pub depends_on: Vec<BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn build(ctx: &Context, flow: &FlowGraph) -> Result<Self, CompilerError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in flow.nodes() {
            let idx = graph.add_node(node.id.clone());
            indices.insert(node.id.clone(), idx);
        }

        let mut depends_on: Vec<BTreeSet<String>> = flow
            .nodes()
            .iter()
            .map(|node| node.depends_on.clone())
            .collect();

        // Every child of a condition waits for the condition.
        for node in flow.nodes() {
            let Some(condition) = node.condition_spec() else {
                continue;
            };
            for child in &condition.children {
                let Some(&idx) = indices.get(child) else {
                    return Err(unknown(ctx, flow, &node.id, child));
                };
                depends_on[idx.index()].insert(node.id.clone());
            }
        }

        for (position, node) in flow.nodes().iter().enumerate() {
            // A node may read its own response, e.g. from its rollback.
            if depends_on[position].remove(&node.id) {
                tracing::debug!(node = %node.id, "dropped self-dependency");
            }

            for dependency in &depends_on[position] {
                let Some(&from) = indices.get(dependency) else {
                    return Err(unknown(ctx, flow, &node.id, dependency));
                };
                graph.add_edge(from, NodeIndex::new(position), ());
            }
        }

        Ok(DependencyGraph {
            graph,
            indices,
            depends_on,
        })
    }

    pub fn id(&self, idx: NodeIndex) -> &str {
        &self.graph[idx]
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Declaration positions of the nodes `position` depends on.
    pub fn dependency_positions(&self, position: usize) -> Vec<usize> {
        self.depends_on[position]
            .iter()
            .filter_map(|id| self.indices.get(id))
            .map(|idx| idx.index())
            .collect()
    }
}

fn unknown(ctx: &Context, flow: &FlowGraph, node: &str, dependency: &str) -> CompilerError {
    let ctx = ctx.with_node(node);
    ctx.wrap(
        ctx.error(ErrorKind::UnknownDependency {
            flow: flow.name().to_string(),
            node: node.to_string(),
            dependency: dependency.to_string(),
        }),
        ErrorKind::UnresolvedNode {
            node: node.to_string(),
        },
    )
}
