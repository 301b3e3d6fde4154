//! Compile condition expressions and derive their params.

use crate::context::Context;
use crate::error::CompilerError;
use crate::parse::expression::parse_expression;
use crate::parse::property::Property;
use crate::parse::reference::parse_reference;
use crate::parse::types::{ConditionSpec, ParameterMap};

/// Parse the expression and declare one param per distinct placeholder.
///
/// Params are keyed by the placeholder text (`input:id` for
/// `{{ input:id }}`); explicitly declared params with the same key win.
pub fn compile_condition(ctx: &Context, condition: &mut ConditionSpec) -> Result<(), CompilerError> {
    let expression = parse_expression(&condition.expression).map_err(|kind| ctx.error(kind))?;
    let params = condition.params.get_or_insert_with(ParameterMap::new);

    for name in expression.params() {
        let reference = parse_reference(&name).map_err(|kind| ctx.error(kind))?;
        params
            .params
            .entry(name.clone())
            .or_insert_with(|| Property::reference(reference).named(name));
    }

    tracing::debug!(
        expression = %condition.expression,
        params = params.params.len(),
        "compiled condition"
    );
    condition.compiled = Some(expression);

    Ok(())
}
