//! Template functions.
//!
//! Calls found in templates are registered on the flow's stack during
//! expansion. Preparing the stack resolves each call's arguments and asks the
//! registered function which property the call produces; references read
//! that property as `stack.<key>`.

use std::collections::BTreeSet;

use crate::construct::capability::BoxError;
use crate::construct::registry::Registry;
use crate::context::Context;
use crate::error::{CompilerError, ErrorKind};
use crate::parse::property::{Property, ScalarType, Template};
use crate::parse::types::{FlowGraph, StackEntry};

use super::Resolver;
use super::lookup::Owner;

/// Compile-time half of a template function.
pub trait Function: Send + Sync {
    /// Check the resolved arguments and describe the value the call produces.
    fn prepare(&self, arguments: &[Property]) -> Result<Property, BoxError>;
}

pub type Functions = Registry<dyn Function>;

/// The property an argument stands for: the target of a resolved reference,
/// else the argument itself.
pub fn argument_value(argument: &Property) -> &Property {
    argument
        .as_reference()
        .and_then(|reference| reference.target.as_deref())
        .unwrap_or(argument)
}

fn scalar_kind(argument: &Property) -> Option<ScalarType> {
    match &argument_value(argument).template {
        Template::Scalar(scalar) => Some(scalar.kind),
        _ => None,
    }
}

/// Concatenates string arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrConcat;

impl Function for StrConcat {
    fn prepare(&self, arguments: &[Property]) -> Result<Property, BoxError> {
        for (position, argument) in arguments.iter().enumerate() {
            if scalar_kind(argument) != Some(ScalarType::String) {
                return Err(format!("argument {} is not a string", position).into());
            }
        }
        Ok(Property::scalar(ScalarType::String).named("concat"))
    }
}

/// Formats its arguments with a literal format string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sprintf;

impl Function for Sprintf {
    fn prepare(&self, arguments: &[Property]) -> Result<Property, BoxError> {
        let Some((format, values)) = arguments.split_first() else {
            return Err("missing format argument".into());
        };

        let Some(format) = format.default_value().and_then(|v| v.as_str()) else {
            return Err("format must be a string literal".into());
        };

        let verbs = count_verbs(format);
        if verbs != values.len() {
            return Err(format!(
                "format has {} verbs but {} values were given",
                verbs,
                values.len()
            )
            .into());
        }
        Ok(Property::scalar(ScalarType::String).named("sprintf"))
    }
}

/// `%` verbs in a format string; `%%` is a literal percent sign.
fn count_verbs(format: &str) -> usize {
    let mut verbs = 0;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c == '%' && chars.next().is_some_and(|next| next != '%') {
            verbs += 1;
        }
    }
    verbs
}

/// `strconcat` and `sprintf`.
pub fn builtin_functions() -> Functions {
    Functions::new()
        .with("strconcat", std::sync::Arc::new(StrConcat))
        .with("sprintf", std::sync::Arc::new(Sprintf))
}

/// Resolve the arguments of every registered call and record what each call
/// returns. Calls are prepared in registration order, so nested calls are
/// ready before the calls consuming them.
pub fn prepare_stack(
    ctx: &Context,
    flow: &mut FlowGraph,
    functions: &Functions,
) -> Result<(), CompilerError> {
    let pending = std::mem::take(flow.stack_mut());
    if pending.is_empty() {
        return Ok(());
    }

    let snapshot = flow.clone();
    let mut prepared: Vec<StackEntry> = Vec::with_capacity(pending.len());

    for mut entry in pending {
        let ctx = match &entry.owner {
            Some(id) => ctx.with_node(id),
            None => ctx.clone(),
        };
        let unresolved = ErrorKind::UnresolvedFunction {
            function: entry.function.clone(),
            key: entry.key.clone(),
        };

        let Some(function) = functions.get(&entry.function) else {
            let err = ctx.error(ErrorKind::UndefinedFunction {
                function: entry.function.clone(),
                known: functions.names().into_iter().map(str::to_string).collect(),
            });
            return Err(ctx.wrap(err, unresolved));
        };

        let mut deps = BTreeSet::new();
        let resolver = Resolver::with_stack(&snapshot, &prepared);
        let owner = entry.owner.as_deref().map_or(Owner::Flow, Owner::Node);
        resolver
            .resolve_properties(
                &ctx,
                owner,
                "function",
                &entry.params,
                entry.arguments.iter_mut(),
                &mut deps,
            )
            .map_err(|err| ctx.wrap(err, unresolved.clone()))?;

        let returns = function.prepare(&entry.arguments).map_err(|reason| {
            let err = ctx.error(ErrorKind::FunctionArguments {
                function: entry.function.clone(),
                reason: reason.to_string(),
            });
            ctx.wrap(err, unresolved.clone())
        })?;

        tracing::debug!(
            function = %entry.function,
            key = %entry.key,
            returns = returns.type_name(),
            "prepared function"
        );
        entry.returns = Some(returns);
        entry.depends_on = deps;
        prepared.push(entry);
    }

    *flow.stack_mut() = prepared;
    Ok(())
}
