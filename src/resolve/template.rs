//! Turn textual `{{ ... }}` values into references.
//!
//! Runs over the whole flow before any lookup so the snapshot used for
//! resolution only holds validated, absolute references. Function calls are
//! registered on the flow's stack and replaced by a `stack.<key>` reference.

use std::collections::BTreeSet;

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind};
use crate::parse::function::{Argument, FunctionCall, parse_function};
use crate::parse::property::{Property, Template};
use crate::parse::reference::{
    Reference, STACK_RESOURCE, join_path, parse_reference, resolve_self_reference, template_body,
};
use crate::parse::types::{CallSpec, FlowGraph, NodeKind, OnError, ParameterMap, Params, StackEntry};

pub fn expand_flow(ctx: &Context, flow: &mut FlowGraph) -> Result<(), CompilerError> {
    let mut stack = Vec::new();

    for node in flow.nodes_mut() {
        let ctx = ctx.with_node(&node.id);
        let mut expander = Expander {
            owner: Some(node.id.as_str()),
            stack: &mut stack,
        };

        match &mut node.kind {
            NodeKind::Call { call, rollback } => {
                expander.call(&ctx, call)?;
                if let Some(rollback) = rollback {
                    expander.call(&ctx, rollback)?;
                }
            }
            NodeKind::Intermediate { intermediate } => expander.map(&ctx, intermediate)?,
            NodeKind::Condition { condition } => {
                if let Some(params) = &mut condition.params {
                    expander.map(&ctx, params)?;
                }
            }
        }

        if let Some(on_error) = &mut node.on_error {
            expander.on_error(&ctx, on_error)?;
        }
    }

    let mut expander = Expander {
        owner: None,
        stack: &mut stack,
    };
    match flow {
        FlowGraph::Flow(flow) => {
            if let Some(output) = &mut flow.output {
                expander.map(ctx, output)?;
            }
            if let Some(on_error) = &mut flow.on_error {
                expander.on_error(ctx, on_error)?;
            }
        }
        FlowGraph::Proxy(proxy) => {
            expander.call(ctx, &mut proxy.forward)?;
            if let Some(on_error) = &mut proxy.on_error {
                expander.on_error(ctx, on_error)?;
            }
        }
    }

    tracing::debug!(functions = stack.len(), "expanded templates");
    *flow.stack_mut() = stack;
    Ok(())
}

/// Replace template strings and re-validate authored references in a
/// property outside of any parameter map. Function calls are rejected.
pub fn expand_property(
    ctx: &Context,
    owner: Option<&str>,
    property: &mut Property,
) -> Result<(), CompilerError> {
    let mut stack = Vec::new();
    let mut expander = Expander {
        owner,
        stack: &mut stack,
    };
    expander.property(ctx, &Params::new(), property)?;

    match stack.first() {
        Some(entry) => Err(ctx.error(ErrorKind::InvalidFunction {
            raw: entry.function.clone(),
            reason: "function calls are only allowed inside parameter maps".to_string(),
        })),
        None => Ok(()),
    }
}

struct Expander<'s> {
    owner: Option<&'s str>,
    stack: &'s mut Vec<StackEntry>,
}

impl Expander<'_> {
    fn call(&mut self, ctx: &Context, call: &mut CallSpec) -> Result<(), CompilerError> {
        for map in [&mut call.request, &mut call.response].into_iter().flatten() {
            self.map(ctx, map)?;
        }
        Ok(())
    }

    fn map(&mut self, ctx: &Context, map: &mut ParameterMap) -> Result<(), CompilerError> {
        let local = map.params.clone();
        let properties = map
            .property
            .iter_mut()
            .chain(map.header.values_mut())
            .chain(map.params.values_mut());

        for property in properties {
            self.property(ctx, &local, property)?;
        }
        Ok(())
    }

    fn on_error(&mut self, ctx: &Context, on_error: &mut OnError) -> Result<(), CompilerError> {
        if let Some(response) = &mut on_error.response {
            self.map(ctx, response)?;
        }

        let local = on_error.params.clone();
        let properties = on_error
            .status
            .iter_mut()
            .chain(on_error.message.iter_mut())
            .chain(on_error.params.values_mut());

        for property in properties {
            self.property(ctx, &local, property)?;
        }
        Ok(())
    }

    fn property(
        &mut self,
        ctx: &Context,
        local: &Params,
        property: &mut Property,
    ) -> Result<(), CompilerError> {
        property
            .walk_mut(&mut |p: &mut Property| -> Result<(), ErrorKind> {
                let reference = match &p.template {
                    Template::Scalar(scalar) => {
                        let Some(body) = scalar
                            .default
                            .as_ref()
                            .and_then(|v| v.as_str())
                            .and_then(template_body)
                        else {
                            return Ok(());
                        };
                        match parse_function(body)? {
                            Some(call) => {
                                p.template = Template::Reference(self.register(call, local));
                                return Ok(());
                            }
                            None => parse_reference(body)?,
                        }
                    }
                    Template::Reference(reference) if !reference.is_resolved() => {
                        parse_reference(&reference.to_string())?
                    }
                    _ => return Ok(()),
                };

                p.template = Template::Reference(self.absolute(reference));
                Ok(())
            })
            .map_err(|kind| ctx.error(kind))
    }

    fn absolute(&self, mut reference: Reference) -> Reference {
        if let Some(owner) = self.owner {
            reference.resource = resolve_self_reference(&reference.resource, owner);
        }
        reference
    }

    /// Register `call` and its nested calls; returns the reference to the
    /// call's result.
    fn register(&mut self, call: FunctionCall, local: &Params) -> Reference {
        let FunctionCall { name, arguments } = call;
        let arguments = arguments
            .into_iter()
            .enumerate()
            .map(|(position, argument)| {
                let property = match argument {
                    Argument::Literal(property) => property,
                    Argument::Reference(reference) => Property::reference(self.absolute(reference)),
                    Argument::Call(inner) => Property::reference(self.register(inner, local)),
                };
                property.named(position.to_string())
            })
            .collect();

        let key = format!("{}_{}", name, self.stack.len());
        tracing::debug!(function = %name, key = %key, "registered function call");
        self.stack.push(StackEntry {
            key: key.clone(),
            function: name,
            arguments,
            owner: self.owner.map(str::to_string),
            params: local.clone(),
            returns: None,
            depends_on: BTreeSet::new(),
        });

        Reference::new(join_path(&[STACK_RESOURCE, &key]), "")
    }
}
