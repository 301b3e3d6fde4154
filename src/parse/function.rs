//! Function calls inside templates: `{{ name(arg, ...) }}`.
//!
//! An argument is a quoted string, a number, `true`/`false`, a reference or
//! another call.

use serde_json::json;

use crate::error::ErrorKind;

use super::property::{Property, ScalarType};
use super::reference::{Reference, parse_reference};

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(Property),
    Reference(Reference),
    Call(FunctionCall),
}

/// Parse a template body as a function call. Returns `Ok(None)` when the body
/// is not shaped like a call.
pub fn parse_function(body: &str) -> Result<Option<FunctionCall>, ErrorKind> {
    let body = body.trim();
    let Some(open) = body.find('(') else {
        return Ok(None);
    };

    let name = body[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(None);
    }

    let invalid = |reason: &str| ErrorKind::InvalidFunction {
        raw: body.to_string(),
        reason: reason.to_string(),
    };

    let Some(inner) = body[open + 1..].strip_suffix(')') else {
        return Err(invalid("missing closing parenthesis"));
    };

    let arguments = split_arguments(inner)
        .ok_or_else(|| invalid("unbalanced quotes or parentheses"))?
        .into_iter()
        .map(|raw| parse_argument(raw).map_err(|reason| invalid(&reason)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(FunctionCall {
        name: name.to_string(),
        arguments,
    }))
}

/// Split on top-level commas. `None` if quotes or parentheses do not balance.
fn split_arguments(inner: &str) -> Option<Vec<&str>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (at, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.checked_sub(1)?,
            (None, ',') if depth == 0 => {
                parts.push(inner[start..at].trim());
                start = at + 1;
            }
            _ => {}
        }
    }

    if quote.is_some() || depth != 0 {
        return None;
    }

    parts.push(inner[start..].trim());
    Some(parts)
}

fn parse_argument(raw: &str) -> Result<Argument, String> {
    if raw.is_empty() {
        return Err("empty argument".to_string());
    }

    if let Some(text) = unquote(raw) {
        return Ok(Argument::Literal(
            Property::scalar(ScalarType::String).with_default(json!(text)),
        ));
    }

    match raw {
        "true" | "false" => {
            return Ok(Argument::Literal(
                Property::scalar(ScalarType::Bool).with_default(json!(raw == "true")),
            ));
        }
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Argument::Literal(
            Property::scalar(ScalarType::Int64).with_default(json!(int)),
        ));
    }

    let numeric = raw.starts_with(|c: char| c.is_ascii_digit() || c == '-');
    if let Some(float) = raw.parse::<f64>().ok().filter(|_| numeric) {
        return Ok(Argument::Literal(
            Property::scalar(ScalarType::Double).with_default(json!(float)),
        ));
    }

    if let Some(call) = parse_function(raw).map_err(|err| err.to_string())? {
        return Ok(Argument::Call(call));
    }

    parse_reference(raw)
        .map(Argument::Reference)
        .map_err(|err| err.to_string())
}

fn unquote(raw: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|q| {
        raw.strip_prefix(q).and_then(|rest| rest.strip_suffix(q))
    })
}
