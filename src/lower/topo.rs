//! Deterministic topological ordering of a dependency graph.
//!
//! Kahn's algorithm; among ready nodes the earliest declared goes first. When
//! nodes remain, the cycle is reported through Tarjan's SCC.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind};

use super::graph::DependencyGraph;

/// Returns declaration positions in execution order.
pub fn topo_order(ctx: &Context, graph: &DependencyGraph) -> Result<Vec<usize>, CompilerError> {
    let dag = &graph.graph;
    let mut in_degree: Vec<usize> = dag
        .node_indices()
        .map(|idx| dag.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(position, _)| Reverse(position))
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(Reverse(position)) = ready.pop() {
        order.push(position);
        for next in dag.neighbors_directed(NodeIndex::new(position), Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }

    if order.len() == graph.len() {
        return Ok(order);
    }

    Err(cycle_error(ctx, graph))
}

/// Report the earliest-declared strongly connected component.
fn cycle_error(ctx: &Context, graph: &DependencyGraph) -> CompilerError {
    let dag = &graph.graph;
    let component = tarjan_scc(dag)
        .into_iter()
        .filter(|component| component.len() > 1)
        .min_by_key(|component| component.iter().map(|idx| idx.index()).min());

    let Some(component) = component else {
        return ctx.error(ErrorKind::InvalidGraph {
            flow: ctx.flow_name().to_string(),
            message: "unordered nodes without a dependency cycle".to_string(),
        });
    };

    let node = component
        .iter()
        .copied()
        .min_by_key(|idx| idx.index())
        .unwrap_or(component[0]);
    let dependency = dag
        .neighbors_directed(node, Direction::Incoming)
        .filter(|idx| component.contains(idx))
        .min_by_key(|idx| idx.index())
        .unwrap_or(node);

    tracing::debug!(
        members = ?component.iter().map(|idx| graph.id(*idx)).collect::<Vec<_>>(),
        "dependency cycle"
    );

    ctx.with_node(graph.id(node)).error(ErrorKind::CircularDependency {
        flow: ctx.flow_name().to_string(),
        node: graph.id(node).to_string(),
        dependency: graph.id(dependency).to_string(),
    })
}
