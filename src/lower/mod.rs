//! Stage 4: merge explicit and inferred dependencies into a validated DAG per
//! flow and derive its execution order.

pub mod graph;
pub mod topo;

use crate::context::Context;
use crate::error::{CompilerError, Phase};
use crate::parse::types::FlowGraph;

pub use graph::DependencyGraph;

/// Execution order of one flow, by declaration position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub flow: String,
    /// Positions of the flow's nodes in execution order.
    pub order: Vec<usize>,
    /// For every declared node, the positions it depends on.
    pub dependencies: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Node IDs in execution order.
    pub fn ordered_ids<'a>(&self, flow: &'a FlowGraph) -> Vec<&'a str> {
        self.order
            .iter()
            .map(|&position| flow.nodes()[position].id.as_str())
            .collect()
    }
}

/// Plan every flow in declaration order. Stops at the first error.
pub fn plan_flows(flows: &mut [FlowGraph]) -> Result<Vec<ExecutionPlan>, CompilerError> {
    let ctx = Context::new(Phase::Dependencies);
    let _span = ctx.span().entered();
    tracing::info!(flows = flows.len(), "resolving dependencies");

    flows
        .iter_mut()
        .map(|flow| {
            let ctx = ctx.with_flow(flow.name());
            plan_flow(&ctx, flow).inspect_err(|err| {
                tracing::error!(error = %err, "dependency resolution failed");
            })
        })
        .collect()
}

/// Validate the flow's dependencies and order its nodes.
///
/// The resolved dependency sets are written back to the nodes.
pub fn plan_flow(ctx: &Context, flow: &mut FlowGraph) -> Result<ExecutionPlan, CompilerError> {
    let graph = DependencyGraph::build(ctx, flow)?;
    let order = topo::topo_order(ctx, &graph)?;
    let dependencies = (0..graph.len())
        .map(|position| graph.dependency_positions(position))
        .collect();

    for (node, depends_on) in flow.nodes_mut().iter_mut().zip(graph.depends_on) {
        node.depends_on = depends_on;
    }

    let plan = ExecutionPlan {
        flow: flow.name().to_string(),
        order,
        dependencies,
    };
    tracing::debug!(order = ?plan.ordered_ids(flow), "planned flow");

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::types::{Node, ParameterMap};

    #[test]
    fn plan_writes_back_gated_dependencies() {
        let mut flows = vec![
            FlowGraph::flow("f")
                .with_node(Node::intermediate("guarded", ParameterMap::new()))
                .with_node(Node::condition("gate", "true", ["guarded"])),
        ];

        let plans = plan_flows(&mut flows).unwrap();
        assert_eq!(plans[0].ordered_ids(&flows[0]), vec!["gate", "guarded"]);
        assert!(flows[0].nodes()[0].depends_on.contains("gate"));
        assert_eq!(plans[0].dependencies, vec![vec![1], vec![]]);
    }

    #[test]
    fn proxies_have_empty_plans() {
        let mut flows = vec![FlowGraph::proxy(
            "p",
            crate::parse::types::CallSpec::new("upstream", ""),
        )];
        let plans = plan_flows(&mut flows).unwrap();
        assert!(plans[0].order.is_empty());
    }
}
