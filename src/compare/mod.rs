//! Type comparison between resolved references and the schemas they are
//! bound into.
//!
//! Runs after reference resolution. A resolved reference is compared against
//! the schema field it fills; literal scalars must fit their declared type and
//! headers only carry strings. Fields either side leaves untyped pass.

use crate::context::Context;
use crate::error::{CompilerError, ErrorKind, Phase};
use crate::parse::catalog::SchemaCatalog;
use crate::parse::property::{Property, ScalarType, Template};
use crate::parse::types::{CallSpec, FlowGraph, Header, NodeKind, OnError, ParameterMap};

/// Compare every flow in declaration order. Stops at the first mismatch.
pub fn compare_flows(flows: &[FlowGraph], schemas: &SchemaCatalog) -> Result<(), CompilerError> {
    let ctx = Context::new(Phase::Compare);
    let _span = ctx.span().entered();
    tracing::info!(flows = flows.len(), "comparing types");

    for flow in flows {
        let ctx = ctx.with_flow(flow.name());
        compare_flow(&ctx, flow, schemas).inspect_err(|err| {
            tracing::error!(error = %err, "type comparison failed");
        })?;
    }

    Ok(())
}

pub fn compare_flow(
    ctx: &Context,
    flow: &FlowGraph,
    schemas: &SchemaCatalog,
) -> Result<(), CompilerError> {
    let types = Types { schemas };

    if let Some(input) = flow.input() {
        types.parameter_map(ctx, "input", input)?;
    }

    for node in flow.nodes() {
        let ctx = ctx.with_node(&node.id);
        match &node.kind {
            NodeKind::Call { call, rollback } => {
                types.call(&ctx, "", call)?;
                if let Some(rollback) = rollback {
                    types.call(&ctx, "rollback.", rollback)?;
                }
            }
            NodeKind::Intermediate { intermediate } => {
                types.parameter_map(&ctx, "intermediate", intermediate)?;
            }
            NodeKind::Condition { condition } => {
                if let Some(params) = &condition.params {
                    types.parameter_map(&ctx, "condition", params)?;
                }
            }
        }
        if let Some(on_error) = &node.on_error {
            types.on_error(&ctx, on_error)?;
        }
    }

    if let Some(output) = flow.output() {
        types.parameter_map(ctx, "output", output)?;
    }
    if let Some(forward) = flow.forward() {
        types.call(ctx, "forward.", forward)?;
    }
    if let Some(on_error) = flow.on_error() {
        types.on_error(ctx, on_error)?;
    }

    Ok(())
}

struct Types<'a> {
    schemas: &'a SchemaCatalog,
}

impl Types<'_> {
    fn call(&self, ctx: &Context, prefix: &str, call: &CallSpec) -> Result<(), CompilerError> {
        if let Some(request) = &call.request {
            self.parameter_map(ctx, &format!("{}request", prefix), request)?;
        }
        if let Some(response) = &call.response {
            self.parameter_map(ctx, &format!("{}response", prefix), response)?;
        }
        Ok(())
    }

    fn on_error(&self, ctx: &Context, on_error: &OnError) -> Result<(), CompilerError> {
        let mismatched = |kind| {
            ctx.wrap(
                ctx.error(kind),
                ErrorKind::MismatchedParameterMap {
                    name: "error".to_string(),
                },
            )
        };

        if let Some(status) = &on_error.status {
            let expected = Property::scalar(ScalarType::Int64);
            compare_field(status, &expected, "status").map_err(mismatched)?;
        }
        if let Some(message) = &on_error.message {
            let expected = Property::scalar(ScalarType::String);
            compare_field(message, &expected, "message").map_err(mismatched)?;
        }
        if let Some(response) = &on_error.response {
            self.parameter_map(ctx, "error.response", response)?;
        }
        Ok(())
    }

    fn parameter_map(
        &self,
        ctx: &Context,
        name: &str,
        map: &ParameterMap,
    ) -> Result<(), CompilerError> {
        let schema = map.schema.as_deref().and_then(|schema| self.schemas.get(schema));

        let result = compare_header(&map.header).and_then(|()| {
            match (&map.property, schema) {
                (Some(property), Some(schema)) => compare_tree(property, schema),
                _ => Ok(()),
            }
        });

        result.map_err(|kind| {
            tracing::debug!(parameter = %name, error = %kind, "type mismatch");
            ctx.wrap(
                ctx.error(kind),
                ErrorKind::MismatchedParameterMap {
                    name: name.to_string(),
                },
            )
        })
    }
}

fn compare_header(header: &Header) -> Result<(), ErrorKind> {
    let expected = Property::scalar(ScalarType::String);
    for (key, value) in header {
        compare_field(value, &expected, &format!("header.{}", key))?;
    }
    Ok(())
}

/// Walk an authored tree alongside the schema it was bound to.
fn compare_tree(given: &Property, expected: &Property) -> Result<(), ErrorKind> {
    match (&given.template, &expected.template) {
        (Template::Reference(_), _) | (Template::Scalar(_), _) => {
            compare_field(given, expected, &given.path)
        }
        (Template::Message(fields), Template::Message(defined))
        | (Template::OneOf(fields), Template::OneOf(defined)) => {
            for (key, field) in fields {
                if let Some(definition) = defined.get(key) {
                    compare_tree(field, definition)?;
                }
            }
            Ok(())
        }
        (Template::Repeated(items), Template::Repeated(defined)) => {
            let Some(element) = defined.first() else {
                return Ok(());
            };
            items.iter().try_for_each(|item| compare_tree(item, element))
        }
        _ => Ok(()),
    }
}

/// A single value: a resolved reference is compared by its target, a literal
/// scalar by its declared type and default.
fn compare_field(given: &Property, expected: &Property, path: &str) -> Result<(), ErrorKind> {
    match &given.template {
        Template::Reference(reference) => match reference.target.as_deref() {
            Some(target) => compare_types(target, expected, path),
            None => Ok(()),
        },
        Template::Scalar(scalar) => {
            compare_types(given, expected, path)?;
            let kind = match (&expected.template, scalar.kind) {
                (Template::Scalar(defined), ScalarType::Unknown) => defined.kind,
                _ => scalar.kind,
            };
            match &scalar.default {
                Some(value) if !kind.accepts(value) => Err(ErrorKind::TypeMismatch {
                    path: path.to_string(),
                    given: json_type(value).to_string(),
                    expected: kind.as_str().to_string(),
                }),
                _ => Ok(()),
            }
        }
        _ => compare_types(given, expected, path),
    }
}

fn compare_types(given: &Property, expected: &Property, path: &str) -> Result<(), ErrorKind> {
    let mismatch = |given: &str, expected: &str| ErrorKind::TypeMismatch {
        path: path.to_string(),
        given: given.to_string(),
        expected: expected.to_string(),
    };

    if untyped(given) || untyped(expected) {
        return Ok(());
    }

    match (&given.template, &expected.template) {
        (Template::Scalar(given), Template::Scalar(defined)) => {
            if given.kind == defined.kind {
                Ok(())
            } else {
                Err(mismatch(given.kind.as_str(), defined.kind.as_str()))
            }
        }
        (Template::Enum(given), Template::Enum(defined)) => {
            if given.name.is_empty() || defined.name.is_empty() || given.name == defined.name {
                Ok(())
            } else {
                Err(mismatch(&given.name, &defined.name))
            }
        }
        (given, defined) if given.type_name() != defined.type_name() => {
            Err(mismatch(given.type_name(), defined.type_name()))
        }
        _ => Ok(()),
    }
}

/// Unresolved references and `unknown` scalars.
fn untyped(property: &Property) -> bool {
    match &property.template {
        Template::Reference(_) => true,
        Template::Scalar(scalar) => scalar.kind == ScalarType::Unknown,
        _ => false,
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(number) if number.is_f64() => "double",
        serde_json::Value::Number(_) => "int64",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "repeated",
        serde_json::Value::Object(_) => "message",
    }
}
