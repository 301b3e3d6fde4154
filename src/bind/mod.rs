//! Stage 2: bind schema and method names to concrete property trees.
//!
//! Every binding point receives its own clone of the catalog schema, so no two
//! call sites share a mutable subtree.

use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind, Phase};
use crate::parse::catalog::{SchemaCatalog, ServiceCatalog};
use crate::parse::property::Property;
use crate::parse::types::{CallSpec, Descriptor, FlowGraph, NodeKind, OnError, ParameterMap};

/// Catalog lookups shared by every flow of a compilation.
pub struct Binder<'a> {
    pub services: &'a ServiceCatalog,
    pub schemas: &'a SchemaCatalog,
}

impl<'a> Binder<'a> {
    pub fn new(services: &'a ServiceCatalog, schemas: &'a SchemaCatalog) -> Self {
        Binder { services, schemas }
    }

    /// Bind every flow in declaration order. Stops at the first error.
    pub fn bind_flows(&self, flows: &mut [FlowGraph]) -> Result<(), CompilerError> {
        let ctx = Context::new(Phase::Bind);
        let _span = ctx.span().entered();
        tracing::info!(flows = flows.len(), "binding schemas");

        for flow in flows.iter_mut() {
            let ctx = ctx.with_flow(flow.name());
            self.bind_flow(&ctx, flow).inspect_err(|err| {
                tracing::error!(error = %err, "schema binding failed");
            })?;
        }

        Ok(())
    }

    pub fn bind_flow(&self, ctx: &Context, flow: &mut FlowGraph) -> Result<(), CompilerError> {
        if let Some(input) = flow.input_mut() {
            self.bind_parameter_map(ctx, input)?;
        }

        for node in flow.nodes_mut() {
            let ctx = ctx.with_node(&node.id);
            tracing::debug!(node = %node.id, kind = node.kind_name(), "binding node");

            match &mut node.kind {
                NodeKind::Call { call, rollback } => {
                    self.bind_call(&ctx, call)?;
                    if let Some(rollback) = rollback {
                        self.bind_call(&ctx, rollback)?;
                    }
                }
                NodeKind::Intermediate { intermediate } => {
                    self.bind_parameter_map(&ctx, intermediate)?;
                }
                NodeKind::Condition { condition } => {
                    if let Some(params) = &mut condition.params {
                        self.bind_parameter_map(&ctx, params)?;
                    }
                }
            }

            if let Some(on_error) = &mut node.on_error {
                self.bind_on_error(&ctx, on_error)?;
            }
        }

        match flow {
            FlowGraph::Flow(flow) => {
                if let Some(on_error) = &mut flow.on_error {
                    self.bind_on_error(ctx, on_error)?;
                }
                if let Some(output) = &mut flow.output {
                    self.bind_parameter_map(ctx, output)?;
                }
            }
            FlowGraph::Proxy(proxy) => {
                if let Some(on_error) = &mut proxy.on_error {
                    self.bind_on_error(ctx, on_error)?;
                }
                if self.services.get(&proxy.forward.service).is_none() {
                    return Err(ctx.error(ErrorKind::UndefinedService {
                        flow: ctx.flow_name().to_string(),
                        service: proxy.forward.service.clone(),
                    }));
                }
                self.bind_call(ctx, &mut proxy.forward)?;
            }
        }

        Ok(())
    }

    /// Bind a call to its service method.
    ///
    /// Calls without a method only have their own parameter maps bound.
    pub fn bind_call(&self, ctx: &Context, call: &mut CallSpec) -> Result<(), CompilerError> {
        if call.method.is_empty() {
            if let Some(request) = &mut call.request {
                self.bind_parameter_map(ctx, request)?;
            }
            if let Some(response) = &mut call.response {
                self.bind_parameter_map(ctx, response)?;
            }
            return Ok(());
        }

        let flow = ctx.flow_name().to_string();
        let service = self
            .services
            .get(&call.service)
            .ok_or_else(|| {
                ctx.error(ErrorKind::UndefinedService {
                    flow: flow.clone(),
                    service: call.service.clone(),
                })
            })?;

        let method = service.method(&call.method).ok_or_else(|| {
            ctx.error(ErrorKind::UndefinedMethod {
                flow: flow.clone(),
                service: call.service.clone(),
                method: call.method.clone(),
            })
        })?;

        if !self.schemas.contains(&method.output) {
            return Err(ctx.error(ErrorKind::UndefinedOutput {
                flow,
                method: method.name.clone(),
                output: method.output.clone(),
            }));
        }

        let request = call.request.get_or_insert_with(ParameterMap::new);
        request.schema = Some(method.input.clone());
        self.bind_parameter_map(ctx, request)?;

        let response = call.response.get_or_insert_with(ParameterMap::new);
        response.schema = Some(method.output.clone());
        self.bind_parameter_map(ctx, response)?;

        call.descriptor = Some(Descriptor {
            input: method.input.clone(),
            output: method.output.clone(),
        });

        tracing::debug!(
            service = %call.service,
            method = %call.method,
            input = %method.input,
            output = %method.output,
            "bound call"
        );

        Ok(())
    }

    /// Clone (or merge) the map's schema into its property tree.
    pub fn bind_parameter_map(
        &self,
        ctx: &Context,
        params: &mut ParameterMap,
    ) -> Result<(), CompilerError> {
        params.header = std::mem::take(&mut params.header)
            .into_iter()
            .map(|(key, property)| (key.to_lowercase(), property.named(key.to_lowercase())))
            .collect();
        normalize_all(&mut params.header);
        normalize_all(&mut params.params);

        let Some(name) = params.schema.clone() else {
            if let Some(property) = &mut params.property {
                property.normalize();
            }
            return Ok(());
        };

        let schema = self.schemas.get(&name).ok_or_else(|| {
            ctx.error(ErrorKind::UndefinedObject {
                flow: ctx.flow_name().to_string(),
                schema: name.clone(),
            })
        })?;

        match &mut params.property {
            Some(property) => {
                property.normalize();
                property.define(schema).map_err(|path| {
                    ctx.error(ErrorKind::UndefinedProperty {
                        schema: name.clone(),
                        path,
                    })
                })?;
            }
            None => {
                let mut property = schema.clone();
                property.normalize();
                params.property = Some(property);
            }
        }

        Ok(())
    }

    pub fn bind_on_error(&self, ctx: &Context, on_error: &mut OnError) -> Result<(), CompilerError> {
        if let Some(response) = &mut on_error.response {
            self.bind_parameter_map(ctx, response)?;
        }
        for property in [&mut on_error.status, &mut on_error.message]
            .into_iter()
            .flatten()
        {
            property.normalize();
        }
        normalize_all(&mut on_error.params);

        Ok(())
    }
}

/// Keyed flat properties use their key as name and path.
fn normalize_all(properties: &mut BTreeMap<String, Property>) {
    for (key, property) in properties.iter_mut() {
        property.normalize();
        if property.name.is_empty() {
            property.name = key.clone();
        }
    }
}
