//! Parse `{{ resource:path }}` strings into `Reference`s.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

use super::property::Property;

pub const TEMPLATE_OPEN: &str = "{{";
pub const TEMPLATE_CLOSE: &str = "}}";

/// Separates the resource from the path inside a reference.
pub const REFERENCE_DELIMITER: char = ':';
/// Separates segments of a resource or path.
pub const PATH_DELIMITER: char = '.';
/// References the owning resource, or the entire property when used as path.
pub const SELF_REF: &str = ".";

pub const INPUT_RESOURCE: &str = "input";
pub const STACK_RESOURCE: &str = "stack";
pub const ERROR_RESOURCE: &str = "error";

pub const PARAMS_RESOURCE: &str = "params";
pub const REQUEST_RESOURCE: &str = "request";
pub const HEADER_RESOURCE: &str = "header";
pub const RESPONSE_RESOURCE: &str = "response";

/// Identifiers no node may use since they name internal resources.
pub const RESERVED_KEYWORDS: [&str; 3] = [INPUT_RESOURCE, ERROR_RESOURCE, STACK_RESOURCE];

/// A pointer from one property to a property of another resource.
///
/// `resource` is `root[.prop]`, where `root` is `input`, `error`, `stack`, a
/// declared param or a node ID. `target` is empty until the reference has been
/// resolved; afterwards it holds an owned copy of the property it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Box<Property>>,
}

impl Reference {
    pub fn new(resource: impl Into<String>, path: impl Into<String>) -> Self {
        Reference {
            resource: resource.into(),
            path: path.into(),
            target: None,
        }
    }

    /// The first segment of the resource: the thing being referenced.
    pub fn root(&self) -> &str {
        split_resource(&self.resource).0
    }

    /// The property of the root being referenced (`request`, `response`...).
    pub fn prop(&self) -> String {
        let (root, prop) = split_resource(&self.resource);
        match prop {
            Some(prop) => prop.to_string(),
            None => default_prop(root).to_string(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.path)
    }
}

/// Default property selected when a reference names only the root.
pub fn default_prop(root: &str) -> &'static str {
    if root == INPUT_RESOURCE {
        return REQUEST_RESOURCE;
    }

    RESPONSE_RESOURCE
}

/// Returns true if the entire value is a `{{ ... }}` template.
pub fn is_template(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with(TEMPLATE_OPEN) && trimmed.ends_with(TEMPLATE_CLOSE)
}

/// Trimmed text between the template delimiters, `None` for literals.
pub fn template_body(value: &str) -> Option<&str> {
    if !is_template(value) {
        return None;
    }

    let trimmed = value.trim();
    Some(trimmed[TEMPLATE_OPEN.len()..trimmed.len() - TEMPLATE_CLOSE.len()].trim())
}

/// Parse a `{{ resource:path }}` template. Returns `Ok(None)` for literals.
pub fn parse_template(value: &str) -> Result<Option<Reference>, ErrorKind> {
    template_body(value).map(parse_reference).transpose()
}

/// Parse `resource:path` into a reference.
pub fn parse_reference(raw: &str) -> Result<Reference, ErrorKind> {
    let invalid = |reason: &str| ErrorKind::InvalidReference {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid("empty reference"));
    }

    let (resource, path) = match raw.split_once(REFERENCE_DELIMITER) {
        Some((resource, path)) => (resource, path),
        None => (raw, ""),
    };

    if path.contains(REFERENCE_DELIMITER) {
        return Err(invalid("more than one resource delimiter"));
    }

    if resource.is_empty() {
        return Err(invalid("missing resource"));
    }

    if !resource.chars().all(is_resource_char) {
        return Err(invalid("resource contains unsupported characters"));
    }

    if !path.chars().all(is_path_char) {
        return Err(invalid("path contains unsupported characters"));
    }

    // A leading '.' marks a resource relative to the owning node.
    let resource_segments = resource.strip_prefix(SELF_REF).unwrap_or(resource);
    if !resource_segments.is_empty() && has_empty_segment(resource_segments) {
        return Err(invalid("resource contains an empty segment"));
    }

    if !path.is_empty() && path != SELF_REF && has_empty_segment(path) {
        return Err(invalid("path contains an empty segment"));
    }

    let (_, prop) = split_resource(resource);
    let path = if prop == Some(HEADER_RESOURCE) {
        path.to_lowercase()
    } else {
        path.to_string()
    };

    Ok(Reference::new(resource, path))
}

/// Resolve a `.`-prefixed resource against the owning resource.
pub fn resolve_self_reference(resource: &str, owner: &str) -> String {
    match resource.strip_prefix(SELF_REF) {
        Some(rest) if rest.is_empty() => owner.to_string(),
        Some(rest) => join_path(&[owner, rest]),
        None => resource.to_string(),
    }
}

pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

fn split_resource(resource: &str) -> (&str, Option<&str>) {
    match resource.find(PATH_DELIMITER) {
        Some(pos) => (&resource[..pos], Some(&resource[pos + 1..])),
        None => (resource, None),
    }
}

fn has_empty_segment(value: &str) -> bool {
    value.split(PATH_DELIMITER).any(str::is_empty)
}

fn is_resource_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '^' | '&' | '%' | '$' | '@')
}
