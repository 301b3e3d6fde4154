//! Stage 1: structural validation of the flow list.

pub mod structural;

use crate::context::Context;
use crate::error::{CompilerError, Phase};
use crate::parse::types::FlowGraph;

/// Reject structurally invalid flow lists: name or ID collisions and
/// reserved identifiers.
pub fn validate_flows(flows: &[FlowGraph]) -> Result<(), CompilerError> {
    let ctx = Context::new(Phase::Validate);
    let _span = ctx.span().entered();
    tracing::info!(flows = flows.len(), "validating flows");

    structural::validate_structural(&ctx, flows).inspect_err(|err| {
        tracing::error!(error = %err, "structural validation failed");
    })
}
