//! Structural rules over the whole flow list.
//!
//! Every rule returns the first violation it finds.

use std::collections::HashSet;

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind};
use crate::parse::reference::RESERVED_KEYWORDS;
use crate::parse::types::FlowGraph;

/// Run all structural rules in order. Stops at the first error.
pub fn validate_structural(ctx: &Context, flows: &[FlowGraph]) -> Result<(), CompilerError> {
    unique_flow_names(ctx, flows)?;

    for flow in flows {
        let ctx = ctx.with_flow(flow.name());
        unique_node_ids(&ctx, flow)?;
        no_reserved_keywords(&ctx, flow)?;
    }

    Ok(())
}

/// Flows and proxies share a single namespace.
fn unique_flow_names(ctx: &Context, flows: &[FlowGraph]) -> Result<(), CompilerError> {
    let mut seen = HashSet::new();

    for flow in flows {
        if !seen.insert(flow.name()) {
            return Err(ctx.with_flow(flow.name()).error(ErrorKind::FlowDuplicate {
                flow: flow.name().to_string(),
            }));
        }
    }

    Ok(())
}

fn unique_node_ids(ctx: &Context, flow: &FlowGraph) -> Result<(), CompilerError> {
    let mut seen = HashSet::new();

    for node in flow.nodes() {
        if !seen.insert(node.id.as_str()) {
            return Err(ctx.with_node(&node.id).error(ErrorKind::ResourceDuplicate {
                flow: flow.name().to_string(),
                resource: node.id.clone(),
            }));
        }
    }

    Ok(())
}

fn no_reserved_keywords(ctx: &Context, flow: &FlowGraph) -> Result<(), CompilerError> {
    for node in flow.nodes() {
        if RESERVED_KEYWORDS.contains(&node.id.as_str()) {
            return Err(ctx.with_node(&node.id).error(ErrorKind::ReservedKeyword {
                flow: flow.name().to_string(),
                keyword: node.id.clone(),
            }));
        }
    }

    Ok(())
}
