//! Stage 5: bind nodes to concrete transports, codecs and error handlers.
//!
//! This is the only stage performing I/O: every call and rollback dials its
//! service once, bounded by the configured timeout. Dial failures are fatal
//! and never retried.

pub mod call;
pub mod capability;
pub mod registry;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::CompilerOptions;
use crate::context::Context;
use crate::error::{CompilerError, ErrorKind, Phase};
use crate::ir::types::{
    Action, CompiledFlow, ErrorHandler, ExecutableCall, ExecutableCondition, ExecutableNode,
};
use crate::ir::validate::validate_compiled;
use crate::lower::{self, ExecutionPlan};
use crate::parse::catalog::ServiceCatalog;
use crate::parse::types::{FlowGraph, NodeKind, OnError, Params};
use crate::resolve::Resolver;
use crate::resolve::lookup::Owner;
use crate::resolve::template::expand_property;

use capability::CodecConstructor;
use registry::Capabilities;

pub struct Constructor<'a> {
    pub services: &'a ServiceCatalog,
    pub capabilities: &'a Capabilities,
    pub options: &'a CompilerOptions,
}

/// Per declared node, everything built before the final ordering.
struct Built {
    action: Action,
    rollback: Option<ExecutableCall>,
    on_error: Option<ErrorHandler>,
}

impl<'a> Constructor<'a> {
    pub fn new(
        services: &'a ServiceCatalog,
        capabilities: &'a Capabilities,
        options: &'a CompilerOptions,
    ) -> Self {
        Constructor {
            services,
            capabilities,
            options,
        }
    }

    /// Construct every flow in declaration order. Stops at the first error.
    pub async fn construct_flows(
        &self,
        flows: Vec<FlowGraph>,
        plans: Vec<ExecutionPlan>,
    ) -> Result<Vec<CompiledFlow>, CompilerError> {
        let ctx = Context::new(Phase::Construct);
        tracing::info!(flows = flows.len(), "constructing flows");

        let mut compiled = Vec::with_capacity(flows.len());
        for (flow, plan) in flows.into_iter().zip(plans) {
            let ctx = ctx.with_flow(flow.name());
            let span = ctx.span();
            let flow = self
                .construct_flow(&ctx, flow, plan)
                .instrument(span)
                .await
                .inspect_err(|err| {
                    tracing::error!(error = %err, "construction failed");
                })?;
            compiled.push(flow);
        }

        Ok(compiled)
    }

    pub async fn construct_flow(
        &self,
        ctx: &Context,
        mut flow: FlowGraph,
        mut plan: ExecutionPlan,
    ) -> Result<CompiledFlow, CompilerError> {
        let snapshot = flow.clone();
        let resolver = Resolver::new(&snapshot);
        let flow_on_error = flow.on_error().cloned();

        let mut built = Vec::with_capacity(flow.nodes().len());
        let mut late_dependencies = false;

        for node in flow.nodes_mut() {
            let ctx = ctx.with_node(&node.id);
            let on_error = node.on_error.as_ref().or(flow_on_error.as_ref());

            let (action, rollback, handler) = match &node.kind {
                NodeKind::Call { call, rollback } => {
                    let mut executable = self.construct_call(&ctx, &node.id, call).await?;
                    let mut found =
                        self.resolve_method_references(&ctx, &resolver, Owner::Node(&node.id), &mut executable)?;

                    let rollback = match rollback {
                        Some(spec) => {
                            let mut executable = self.construct_call(&ctx, &node.id, spec).await?;
                            found.extend(self.resolve_method_references(
                                &ctx,
                                &resolver,
                                Owner::Node(&node.id),
                                &mut executable,
                            )?);
                            Some(executable)
                        }
                        None => None,
                    };

                    let codec = self.response_codec(&call.service);
                    let handler = self.handler(&ctx, &node.id, on_error, codec)?;

                    found.remove(&node.id);
                    if !found.is_subset(&node.depends_on) {
                        tracing::debug!(depends_on = ?found, "method declares additional dependencies");
                        node.depends_on.extend(found);
                        late_dependencies = true;
                    }

                    if node.expected_status.is_empty() {
                        node.expected_status
                            .extend(self.options.default_expected_status.iter().copied());
                    }

                    (Action::Call(executable), rollback, handler)
                }
                NodeKind::Intermediate { intermediate } => {
                    let handler = self.handler(&ctx, &node.id, on_error, None)?;
                    (Action::Intermediate(intermediate.clone()), None, handler)
                }
                NodeKind::Condition { condition } => {
                    let expression = condition.compiled.clone().ok_or_else(|| {
                        ctx.error(ErrorKind::NilInput {
                            what: "compiled condition expression".to_string(),
                        })
                    })?;
                    let handler = self.handler(&ctx, &node.id, on_error, None)?;
                    let condition = ExecutableCondition {
                        expression,
                        params: condition.params.clone().unwrap_or_default(),
                        children: condition.children.clone(),
                    };
                    (Action::Condition(condition), None, handler)
                }
            };

            tracing::debug!(node = %node.id, kind = node.kind_name(), "constructed node");
            built.push(Built {
                action,
                rollback,
                on_error: handler,
            });
        }

        if late_dependencies {
            let ctx = Context::new(Phase::Dependencies).with_flow(flow.name());
            plan = lower::plan_flow(&ctx, &mut flow)?;
        }

        let forward = match &flow {
            FlowGraph::Proxy(proxy) => {
                let mut executable = self.construct_call(ctx, &proxy.name, &proxy.forward).await?;
                self.resolve_method_references(ctx, &resolver, Owner::Flow, &mut executable)?;
                Some(executable)
            }
            FlowGraph::Flow(_) => None,
        };

        let on_error = match (&flow_on_error, &flow) {
            (Some(on_error), FlowGraph::Proxy(proxy)) => {
                let codec = self.response_codec(&proxy.forward.service);
                let codec = codec.as_ref().map(|(name, c)| (name.as_str(), c.as_ref()));
                Some(self.error_handler(ctx, &proxy.name, on_error, codec)?)
            }
            (Some(on_error), FlowGraph::Flow(inner)) => {
                Some(self.error_handler(ctx, &inner.name, on_error, None)?)
            }
            (None, _) => None,
        };

        let nodes = assemble(&flow, &plan, built).map_err(|message| {
            Context::new(Phase::Dependencies)
                .with_flow(flow.name())
                .error(ErrorKind::InvalidGraph {
                    flow: flow.name().to_string(),
                    message,
                })
        })?;
        let compiled = CompiledFlow {
            name: flow.name().to_string(),
            input: flow.input().cloned(),
            output: flow.output().cloned(),
            nodes,
            on_error,
            forward,
            stack: std::mem::take(flow.stack_mut()),
        };

        if let Some(violation) = validate_compiled(&compiled).into_iter().next() {
            let ctx = Context::new(Phase::Dependencies).with_flow(&compiled.name);
            let ctx = match &violation.node {
                Some(node) => ctx.with_node(node),
                None => ctx,
            };
            return Err(ctx.error(ErrorKind::InvalidGraph {
                flow: compiled.name.clone(),
                message: violation.to_string(),
            }));
        }

        tracing::info!(nodes = compiled.nodes.len(), order = ?compiled.order(), "compiled flow");
        Ok(compiled)
    }

    /// Resolve the references a dialed client declares for the call's method.
    fn resolve_method_references(
        &self,
        ctx: &Context,
        resolver: &Resolver<'_>,
        owner: Owner<'_>,
        call: &mut ExecutableCall,
    ) -> Result<BTreeSet<String>, CompilerError> {
        let mut found = BTreeSet::new();
        if call.references.is_empty() {
            return Ok(found);
        }

        let (service, method) = (call.service.clone(), call.method.clone());
        let wrap = |err| {
            ctx.wrap(
                err,
                ErrorKind::UnresolvedCall {
                    service: service.clone(),
                    method: method.clone(),
                },
            )
        };

        let mut references = std::mem::take(&mut call.references);
        for property in references.iter_mut() {
            expand_property(ctx, owner.id(), property).map_err(wrap)?;
        }
        resolver
            .resolve_properties(
                ctx,
                owner,
                "method",
                &Params::new(),
                references.iter_mut(),
                &mut found,
            )
            .map_err(wrap)?;

        call.references = references;
        Ok(found)
    }

    fn handler(
        &self,
        ctx: &Context,
        node: &str,
        on_error: Option<&OnError>,
        codec: Option<(String, Arc<dyn CodecConstructor>)>,
    ) -> Result<Option<ErrorHandler>, CompilerError> {
        let Some(on_error) = on_error else {
            return Ok(None);
        };
        let codec = codec.as_ref().map(|(name, c)| (name.as_str(), c.as_ref()));
        self.error_handler(ctx, node, on_error, codec).map(Some)
    }

    fn response_codec(&self, service: &str) -> Option<(String, Arc<dyn CodecConstructor>)> {
        let service = self.services.get(service)?;
        let codec = self.capabilities.codecs.get(&service.response_codec)?;
        Some((service.response_codec.clone(), codec))
    }
}

/// Lay the built nodes out in execution order. Fails unless the plan places
/// every built node exactly once.
fn assemble(
    flow: &FlowGraph,
    plan: &ExecutionPlan,
    built: Vec<Built>,
) -> Result<Vec<ExecutableNode>, String> {
    let declared = flow.nodes();
    if built.len() != declared.len() || plan.order.len() != declared.len() {
        return Err(format!(
            "plan orders {} nodes, {} were built from {} declared",
            plan.order.len(),
            built.len(),
            declared.len()
        ));
    }

    let mut placed = vec![None; declared.len()];
    for (position, &index) in plan.order.iter().enumerate() {
        let slot = placed
            .get_mut(index)
            .filter(|slot: &&mut Option<usize>| slot.is_none())
            .ok_or_else(|| format!("plan places node #{} twice or out of range", index))?;
        *slot = Some(position);
    }
    let placed: Vec<usize> = placed.into_iter().flatten().collect();

    let mut nodes = Vec::with_capacity(built.len());
    for (index, (node, built)) in declared.iter().zip(built).enumerate() {
        let mut dependencies = Vec::new();
        for &dependency in plan.dependencies.get(index).into_iter().flatten() {
            let position = placed
                .get(dependency)
                .copied()
                .ok_or_else(|| format!("node '{}' depends on unplaced node #{}", node.id, dependency))?;
            dependencies.push(position);
        }
        dependencies.sort_unstable();

        let Built {
            action,
            rollback,
            on_error,
        } = built;
        nodes.push((
            placed[index],
            ExecutableNode {
                id: node.id.clone(),
                depends_on: node.depends_on.clone(),
                dependencies,
                expected_status: node.expected_status.clone(),
                action,
                rollback,
                on_error,
            },
        ));
    }

    nodes.sort_by_key(|(position, _)| *position);
    Ok(nodes.into_iter().map(|(_, node)| node).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::capability::{
        AddressResolver, BoxError, Client, CodecManager, MethodDescriptor, Transport,
    };
    use crate::parse::catalog::{Method, Service};
    use crate::parse::property::{Property, ScalarType};
    use crate::parse::reference::Reference;
    use crate::parse::types::{CallSpec, Node, Options, ParameterMap};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo {
        references: Vec<Property>,
    }

    impl Client for Echo {
        fn service(&self) -> &str {
            "svc"
        }

        fn method(&self, name: &str) -> Option<MethodDescriptor> {
            (name == "Echo").then(|| MethodDescriptor {
                name: name.to_string(),
                references: self.references.clone(),
            })
        }
    }

    struct Loopback {
        references: Vec<Property>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for Loopback {
        async fn dial(
            &self,
            _service: &Service,
            _options: &Options,
            _resolver: Arc<dyn AddressResolver>,
        ) -> Result<Arc<dyn Client>, BoxError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Arc::new(Echo {
                references: self.references.clone(),
            }))
        }
    }

    struct Manager(String);

    impl CodecManager for Manager {
        fn name(&self) -> &str {
            "json"
        }

        fn resource(&self) -> &str {
            &self.0
        }
    }

    struct Json;

    impl CodecConstructor for Json {
        fn new_manager(
            &self,
            resource: &str,
            _params: &ParameterMap,
        ) -> Result<Arc<dyn CodecManager>, BoxError> {
            Ok(Arc::new(Manager(resource.to_string())))
        }
    }

    fn services() -> ServiceCatalog {
        ServiceCatalog::new([Service {
            fully_qualified_name: "svc".into(),
            transport: "loop".into(),
            request_codec: "json".into(),
            response_codec: "json".into(),
            host: "svc:80".into(),
            resolver: None,
            methods: vec![Method {
                name: "Echo".into(),
                input: "In".into(),
                output: "Out".into(),
                options: Default::default(),
            }],
            options: Default::default(),
        }])
    }

    fn capabilities(transport: Loopback) -> Capabilities {
        Capabilities::new()
            .with_transport("loop", Arc::new(transport))
            .with_codec("json", Arc::new(Json))
    }

    /// `call` is declared before `shape` but the dialed method reads from it.
    fn flow() -> FlowGraph {
        FlowGraph::flow("echo")
            .with_node(Node::call("call", CallSpec::new("svc", "Echo")))
            .with_node(Node::intermediate(
                "shape",
                ParameterMap::new().with_property(Property::message([(
                    "value",
                    Property::scalar(ScalarType::String),
                )])),
            ))
    }

    async fn construct(
        capabilities: &Capabilities,
        options: &CompilerOptions,
        mut flow: FlowGraph,
    ) -> Result<CompiledFlow, CompilerError> {
        let services = services();
        let ctx = Context::new(Phase::Dependencies).with_flow(flow.name());
        let plan = lower::plan_flow(&ctx, &mut flow)?;
        let constructor = Constructor::new(&services, capabilities, options);
        let ctx = Context::new(Phase::Construct).with_flow(flow.name());
        constructor.construct_flow(&ctx, flow, plan).await
    }

    #[tokio::test]
    async fn binds_calls_in_declaration_order() {
        let capabilities = capabilities(Loopback {
            references: Vec::new(),
            delay: None,
        });
        let compiled = construct(&capabilities, &CompilerOptions::default(), flow())
            .await
            .unwrap();

        assert_eq!(compiled.order(), vec!["call", "shape"]);
        let call = compiled.nodes[0].action.as_call().unwrap();
        assert_eq!(call.binding.transport, "loop");
        assert_eq!(call.binding.resolver.host(), "svc:80");
        assert_eq!(call.binding.request_codec.resource(), "call.request");
        assert_eq!(call.binding.response_codec.resource(), "call.response");
        assert_eq!(compiled.nodes[0].expected_status, BTreeSet::from([200]));
    }

    #[tokio::test]
    async fn method_references_reorder_the_flow() {
        let capabilities = capabilities(Loopback {
            references: vec![Property::reference(Reference::new("shape", "value"))],
            delay: None,
        });
        let compiled = construct(&capabilities, &CompilerOptions::default(), flow())
            .await
            .unwrap();

        assert_eq!(compiled.order(), vec!["shape", "call"]);
        let call = compiled.node("call").unwrap();
        assert_eq!(call.depends_on, BTreeSet::from(["shape".to_string()]));
        assert_eq!(call.dependencies, vec![0]);
        let reference = call.action.as_call().unwrap().references[0]
            .as_reference()
            .unwrap();
        assert!(reference.is_resolved());
    }

    #[tokio::test]
    async fn missing_transport() {
        let capabilities = Capabilities::new().with_codec("json", Arc::new(Json));
        let err = construct(&capabilities, &CompilerOptions::default(), flow())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NoTransport");
        assert_eq!(err.node.as_deref(), Some("call"));
    }

    #[tokio::test]
    async fn slow_dial_times_out() {
        let capabilities = capabilities(Loopback {
            references: Vec::new(),
            delay: Some(Duration::from_secs(5)),
        });
        let options = CompilerOptions {
            dial_timeout_ms: 10,
            ..CompilerOptions::default()
        };
        let err = construct(&capabilities, &options, flow()).await.unwrap_err();

        assert!(matches!(
            err.kind,
            ErrorKind::DialTimeout { timeout_ms: 10, .. }
        ));
    }

    fn built() -> Built {
        Built {
            action: Action::Intermediate(ParameterMap::new()),
            rollback: None,
            on_error: None,
        }
    }

    fn two_nodes() -> FlowGraph {
        FlowGraph::flow("f")
            .with_node(Node::intermediate("a", ParameterMap::new()))
            .with_node(Node::intermediate("b", ParameterMap::new()).depends_on(["a"]))
    }

    #[test]
    fn assemble_follows_the_plan() {
        let plan = ExecutionPlan {
            flow: "f".into(),
            order: vec![0, 1],
            dependencies: vec![vec![], vec![0]],
        };
        let nodes = assemble(&two_nodes(), &plan, vec![built(), built()]).unwrap();
        let ids: Vec<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(nodes[1].dependencies, vec![0]);
    }

    #[test]
    fn assemble_rejects_a_plan_that_skips_a_node() {
        let skipping = ExecutionPlan {
            flow: "f".into(),
            order: vec![1],
            dependencies: vec![vec![], vec![0]],
        };
        let err = assemble(&two_nodes(), &skipping, vec![built(), built()]).unwrap_err();
        assert!(err.contains("plan orders 1 nodes"), "{}", err);

        let repeating = ExecutionPlan {
            order: vec![1, 1],
            ..skipping
        };
        let err = assemble(&two_nodes(), &repeating, vec![built(), built()]).unwrap_err();
        assert!(err.contains("twice"), "{}", err);
    }
}
