//! Stage 3: resolve references, forward alias chains and derive dependencies.
//!
//! Each flow is resolved in four passes: condition expressions are compiled
//! into params, textual templates are expanded into references, function
//! calls are prepared on the stack, then every reference is looked up against
//! a snapshot of the expanded flow. The node IDs each parameter map reads from
//! end up in its `depends_on`.

pub mod condition;
pub mod forward;
pub mod function;
pub mod lookup;
pub mod template;

use std::collections::BTreeSet;

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind, Phase};
use crate::parse::property::Property;
use crate::parse::reference::Reference;
use crate::parse::types::{
    CallSpec, FlowGraph, Node, NodeKind, OnError, ParameterMap, Params, StackEntry,
};

use forward::Unresolved;
use function::Functions;
use lookup::{Miss, Owner, Resources, Scope};

/// Resolve every flow in declaration order. Stops at the first error.
pub fn resolve_flows(flows: &mut [FlowGraph], functions: &Functions) -> Result<(), CompilerError> {
    let ctx = Context::new(Phase::Resolve);
    let _span = ctx.span().entered();
    tracing::info!(flows = flows.len(), "resolving references");

    for flow in flows.iter_mut() {
        let ctx = ctx.with_flow(flow.name());
        resolve_flow(&ctx, flow, functions)
            .map_err(|err| {
                ctx.wrap(
                    err,
                    ErrorKind::UnresolvedFlow {
                        flow: ctx.flow_name().to_string(),
                    },
                )
            })
            .inspect_err(|err| {
                tracing::error!(error = %err, "reference resolution failed");
            })?;
    }

    Ok(())
}

pub fn resolve_flow(
    ctx: &Context,
    flow: &mut FlowGraph,
    functions: &Functions,
) -> Result<(), CompilerError> {
    let _span = ctx.span().entered();

    for node in flow.nodes_mut() {
        if let NodeKind::Condition { condition } = &mut node.kind {
            let node_ctx = ctx.with_node(&node.id);
            condition::compile_condition(&node_ctx, condition)
                .map_err(|err| node_ctx.wrap(err, unresolved_node(&node.id)))?;
        }
    }

    template::expand_flow(ctx, flow)?;
    function::prepare_stack(ctx, flow, functions)?;

    let snapshot = flow.clone();
    let resolver = Resolver::new(&snapshot);

    for node in flow.nodes_mut() {
        resolver.resolve_node(ctx, node)?;
    }

    match flow {
        FlowGraph::Flow(flow) => {
            if let Some(output) = &mut flow.output {
                let deps = resolver.resolve_parameter_map(ctx, Owner::Flow, "output", output)?;
                tracing::debug!(depends_on = ?deps, "resolved output");
            }
            if let Some(on_error) = &mut flow.on_error {
                resolver.resolve_on_error(ctx, Owner::Flow, on_error)?;
            }
        }
        FlowGraph::Proxy(proxy) => {
            resolver.resolve_call(ctx, Owner::Flow, &mut proxy.forward)?;
            if let Some(on_error) = &mut proxy.on_error {
                resolver.resolve_on_error(ctx, Owner::Flow, on_error)?;
            }
        }
    }

    Ok(())
}

fn unresolved_node(id: &str) -> ErrorKind {
    ErrorKind::UnresolvedNode {
        node: id.to_string(),
    }
}

/// Resolves references against a snapshot of one flow.
pub struct Resolver<'a> {
    resources: Resources<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(snapshot: &'a FlowGraph) -> Self {
        Resolver {
            resources: Resources::new(snapshot),
        }
    }

    /// Resolver that only sees the given stack entries.
    pub fn with_stack(snapshot: &'a FlowGraph, stack: &'a [StackEntry]) -> Self {
        Resolver {
            resources: Resources::with_stack(snapshot, stack),
        }
    }

    /// Resolve every map of the node and merge their dependencies into the
    /// node's own `depends_on`.
    pub fn resolve_node(&self, ctx: &Context, node: &mut Node) -> Result<(), CompilerError> {
        let Node {
            id,
            depends_on,
            kind,
            on_error,
            ..
        } = node;
        let id = id.as_str();
        let ctx = ctx.with_node(id);
        let owner = Owner::Node(id);

        let mut deps = BTreeSet::new();
        let result = self
            .resolve_node_kind(&ctx, owner, kind, &mut deps)
            .and_then(|()| match on_error {
                Some(on_error) => self
                    .resolve_on_error(&ctx, owner, on_error)
                    .map(|found| deps.extend(found)),
                None => Ok(()),
            });

        result.map_err(|err| ctx.wrap(err, unresolved_node(id)))?;

        tracing::debug!(node = %id, depends_on = ?deps, "resolved node");
        depends_on.extend(deps);
        Ok(())
    }

    fn resolve_node_kind(
        &self,
        ctx: &Context,
        owner: Owner<'_>,
        kind: &mut NodeKind,
        deps: &mut BTreeSet<String>,
    ) -> Result<(), CompilerError> {
        match kind {
            NodeKind::Call { call, rollback } => {
                deps.extend(self.resolve_call(ctx, owner, call)?);
                if let Some(rollback) = rollback {
                    deps.extend(self.resolve_call(ctx, owner, rollback)?);
                }
            }
            NodeKind::Intermediate { intermediate } => {
                deps.extend(self.resolve_parameter_map(ctx, owner, "intermediate", intermediate)?);
            }
            NodeKind::Condition { condition } => {
                if let Some(params) = &mut condition.params {
                    deps.extend(self.resolve_parameter_map(ctx, owner, "condition", params)?);
                }
            }
        }
        Ok(())
    }

    pub fn resolve_call(
        &self,
        ctx: &Context,
        owner: Owner<'_>,
        call: &mut CallSpec,
    ) -> Result<BTreeSet<String>, CompilerError> {
        let CallSpec {
            service,
            method,
            request,
            response,
            ..
        } = call;

        let mut deps = BTreeSet::new();
        for (name, map) in [("request", request), ("response", response)] {
            let Some(map) = map else {
                continue;
            };
            let found = self
                .resolve_parameter_map(ctx, owner, name, map)
                .map_err(|err| {
                    ctx.wrap(
                        err,
                        ErrorKind::UnresolvedCall {
                            service: service.clone(),
                            method: method.clone(),
                        },
                    )
                })?;
            deps.extend(found);
        }

        Ok(deps)
    }

    /// Resolve the map's property tree, headers and params; returns the nodes
    /// it depends on, which are also stored in the map.
    pub fn resolve_parameter_map(
        &self,
        ctx: &Context,
        owner: Owner<'_>,
        name: &str,
        map: &mut ParameterMap,
    ) -> Result<BTreeSet<String>, CompilerError> {
        let local = map.params.clone();
        let properties = map
            .property
            .iter_mut()
            .chain(map.header.values_mut())
            .chain(map.params.values_mut());

        let mut deps = BTreeSet::new();
        self.resolve_properties(ctx, owner, name, &local, properties, &mut deps)
            .map_err(|err| {
                ctx.wrap(
                    err,
                    ErrorKind::UnresolvedParameterMap {
                        name: name.to_string(),
                    },
                )
            })?;

        map.depends_on.extend(deps.iter().cloned());
        Ok(deps)
    }

    pub fn resolve_on_error(
        &self,
        ctx: &Context,
        owner: Owner<'_>,
        on_error: &mut OnError,
    ) -> Result<BTreeSet<String>, CompilerError> {
        let wrap = |err| ctx.wrap(err, ErrorKind::UnresolvedOnError);
        let mut deps = BTreeSet::new();

        if let Some(response) = &mut on_error.response {
            deps.extend(
                self.resolve_parameter_map(ctx, owner, "error", response)
                    .map_err(wrap)?,
            );
        }

        let local = on_error.params.clone();
        let fields = on_error.status.iter_mut().chain(on_error.message.iter_mut());
        self.resolve_properties(ctx, owner, "error", &local, fields, &mut deps)
            .map_err(wrap)?;

        self.resolve_properties(
            ctx,
            owner,
            "error",
            &local,
            on_error.params.values_mut(),
            &mut deps,
        )
        .map_err(|err| {
            wrap(ctx.wrap(
                err,
                ErrorKind::UnresolvedParams {
                    keys: local.keys().cloned().collect(),
                },
            ))
        })?;

        Ok(deps)
    }

    /// Resolve loose properties owned by `owner`, such as references a
    /// service declares for a method. Returns the nodes they depend on.
    pub fn resolve_properties<'p>(
        &self,
        ctx: &Context,
        owner: Owner<'_>,
        breakpoint: &str,
        local: &Params,
        properties: impl Iterator<Item = &'p mut Property>,
        deps: &mut BTreeSet<String>,
    ) -> Result<(), CompilerError> {
        for property in properties {
            property.walk_mut(&mut |p: &mut Property| {
                let path = display_path(p);
                match p.as_reference_mut() {
                    Some(reference) => self
                        .resolve_reference(ctx, owner, breakpoint, local, reference, deps)
                        .map_err(|err| ctx.wrap(err, ErrorKind::UnresolvedProperty { path })),
                    None => Ok(()),
                }
            })?;
        }
        Ok(())
    }

    fn resolve_reference(
        &self,
        ctx: &Context,
        owner: Owner<'_>,
        breakpoint: &str,
        local: &Params,
        reference: &mut Reference,
        deps: &mut BTreeSet<String>,
    ) -> Result<(), CompilerError> {
        let scope = Scope::new(owner, local);
        let forwarded = forward::follow(&self.resources, scope, reference).map_err(
            |Unresolved {
                 miss,
                 reference,
                 scope,
             }| {
                let kind = match miss {
                    Miss::Resource => ErrorKind::UndefinedResource {
                        reference: reference.to_string(),
                        breakpoint: breakpoint.to_string(),
                        known: self.resources.known(scope.local),
                    },
                    Miss::Path => ErrorKind::UndefinedReference {
                        reference: reference.to_string(),
                        breakpoint: breakpoint.to_string(),
                        path: reference.path.clone(),
                    },
                };
                ctx.error(kind)
            },
        )?;

        deps.extend(forwarded.nodes.iter().cloned());

        tracing::debug!(
            reference = %reference,
            resolved = %forwarded.reference,
            kind = forwarded.target.type_name(),
            "resolved reference"
        );

        reference.resource = forwarded.reference.resource;
        reference.path = forwarded.reference.path;
        reference.target = Some(Box::new(forwarded.target));
        Ok(())
    }
}

fn display_path(property: &Property) -> String {
    if property.path.is_empty() {
        return property.name.clone();
    }
    property.path.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::property::ScalarType;
    use crate::parse::types::ConditionSpec;
    use serde_json::json;

    fn ctx() -> Context {
        Context::new(Phase::Resolve).with_flow("greet")
    }

    fn reply() -> Property {
        Property::message([("reply", Property::scalar(ScalarType::String))])
    }

    fn greet(output: Property) -> FlowGraph {
        FlowGraph::flow("greet")
            .with_input(ParameterMap::new().with_property(Property::message([(
                "name",
                Property::scalar(ScalarType::String),
            )])))
            .with_node(Node::call(
                "call_greeter",
                CallSpec::new("greeter", "Say")
                    .with_request(ParameterMap::new().with_property(Property::message([(
                        "name",
                        Property::reference(Reference::new("input", "name")),
                    )])))
                    .with_response(ParameterMap::new().with_property(reply())),
            ))
            .with_output(ParameterMap::new().with_property(output))
    }

    #[test]
    fn output_depends_on_referenced_node() {
        let mut flow = greet(Property::message([(
            "reply",
            Property::reference(Reference::new("call_greeter", "reply")),
        )]));

        resolve_flow(&ctx(), &mut flow, &Functions::new()).unwrap();

        let output = flow.output().unwrap();
        assert_eq!(
            output.depends_on,
            BTreeSet::from(["call_greeter".to_string()])
        );
        let reply = output.property.as_ref().unwrap().lookup("reply").unwrap();
        assert!(reply.as_reference().unwrap().is_resolved());
        // input is internal and not a dependency
        assert!(flow.nodes()[0].depends_on.is_empty());
    }

    #[test]
    fn undefined_resource_is_wrapped_in_node_chain() {
        let mut flow = greet(Property::scalar(ScalarType::String)).with_node(Node::intermediate(
            "shape",
            ParameterMap::new().with_property(Property::message([(
                "value",
                Property::reference(Reference::new("ghost", "name")),
            )])),
        ));

        let err = resolve_flow(&ctx(), &mut flow, &Functions::new()).unwrap_err();
        let codes: Vec<&str> = err.chain().map(|e| e.code()).collect();
        assert_eq!(
            codes,
            vec![
                "UnresolvedNode",
                "UnresolvedParameterMap",
                "UnresolvedProperty",
                "UndefinedResource"
            ]
        );
        let ErrorKind::UndefinedResource { reference, .. } = &err.root_cause().kind else {
            panic!("expected undefined resource");
        };
        assert_eq!(reference, "ghost:name");
    }

    #[test]
    fn condition_params_depend_on_nodes() {
        let mut flow = greet(Property::scalar(ScalarType::String)).with_node(Node::condition(
            "gate",
            "{{ call_greeter:reply }} != 'nope'",
            Vec::<&str>::new(),
        ));

        resolve_flow(&ctx(), &mut flow, &Functions::new()).unwrap();

        let gate = flow.node("gate").unwrap();
        assert!(gate.depends_on.contains("call_greeter"));
        let Some(ConditionSpec {
            compiled: Some(_), ..
        }) = gate.condition_spec()
        else {
            panic!("expected compiled condition");
        };
    }

    #[test]
    fn templates_in_defaults_are_resolved() {
        let mut flow = greet(Property::message([(
            "reply",
            Property::scalar(ScalarType::String).with_default(json!("{{ call_greeter:reply }}")),
        )]));

        resolve_flow(&ctx(), &mut flow, &Functions::new()).unwrap();
        assert!(flow.output().unwrap().depends_on.contains("call_greeter"));
    }

    #[test]
    fn alias_params_forward_to_chain_end() {
        let mut flow = FlowGraph::flow("alias").with_node(Node::intermediate(
            "shape",
            ParameterMap::new()
                .with_param("a", Property::reference(Reference::new("b", "")))
                .with_param("b", Property::reference(Reference::new("c", "")))
                .with_param(
                    "c",
                    Property::scalar(ScalarType::String).with_default(json!("x")),
                )
                .with_param("loop", Property::reference(Reference::new("loop", "")))
                .with_property(Property::message([(
                    "value",
                    Property::reference(Reference::new("a", "")),
                )])),
        ));

        resolve_flow(&ctx(), &mut flow, &Functions::new()).unwrap();

        let Some(NodeKind::Intermediate { intermediate }) =
            flow.nodes().first().map(|node| &node.kind)
        else {
            panic!("expected intermediate");
        };
        let value = intermediate.property.as_ref().unwrap().lookup("value").unwrap();
        let reference = value.as_reference().unwrap();
        assert_eq!((reference.resource.as_str(), reference.path.as_str()), ("c", ""));
        assert_eq!(
            reference.target.as_ref().unwrap().default_value(),
            Some(&json!("x"))
        );
        assert!(intermediate.params["loop"].as_reference().is_some());
    }
}
