//! Resource lookup table for a single flow.
//!
//! Lookups run against an immutable snapshot of the flow taken before any
//! reference is resolved, so results never depend on resolution order.

use crate::parse::property::{Property, ScalarType};
use crate::parse::reference::{
    ERROR_RESOURCE, HEADER_RESOURCE, INPUT_RESOURCE, PARAMS_RESOURCE, PATH_DELIMITER,
    REQUEST_RESOURCE, RESPONSE_RESOURCE, Reference, STACK_RESOURCE, join_path,
};
use crate::parse::types::{
    FlowGraph, Header, Node, NodeKind, OnError, ParameterMap, Params, StackEntry,
};

static NO_PARAMS: Params = Params::new();

/// Why a lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// The root of the resource is not a known resource.
    Resource,
    /// The resource exists but has no property at the path.
    Path,
}

/// The resource owning a parameter map: a node, or the flow itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner<'a> {
    Flow,
    Node(&'a str),
}

impl Owner<'_> {
    pub fn id(&self) -> Option<&str> {
        match self {
            Owner::Flow => None,
            Owner::Node(id) => Some(id),
        }
    }
}

/// Where a property was declared: the owner whose on-error policy applies
/// and the named params visible next to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scope<'s> {
    pub owner: Owner<'s>,
    pub local: &'s Params,
}

impl<'s> Scope<'s> {
    pub fn new(owner: Owner<'s>, local: &'s Params) -> Self {
        Scope { owner, local }
    }

    fn of(owner: Owner<'s>, map: Option<&'s ParameterMap>) -> Self {
        Scope::new(owner, map.map_or(&NO_PARAMS, |map| &map.params))
    }
}

/// A looked-up property and the scope its own references resolve in.
#[derive(Debug, Clone, PartialEq)]
pub struct Found<'s> {
    pub property: Property,
    pub scope: Scope<'s>,
}

pub struct Resources<'a> {
    flow: &'a FlowGraph,
    stack: &'a [StackEntry],
}

impl<'a> Resources<'a> {
    pub fn new(flow: &'a FlowGraph) -> Self {
        Resources {
            flow,
            stack: flow.stack(),
        }
    }

    /// Resources of `flow` with only the given stack entries registered.
    pub fn with_stack(flow: &'a FlowGraph, stack: &'a [StackEntry]) -> Self {
        Resources { flow, stack }
    }

    /// Returns true if references to `root` are recorded as dependencies.
    pub fn is_node(&self, root: &str) -> bool {
        self.flow.node(root).is_some()
    }

    /// Nodes the arguments of a registered function read from.
    pub fn stack_dependencies(&self, key: &str) -> impl Iterator<Item = &'a String> + use<'a> {
        self.stack_entry(key)
            .into_iter()
            .flat_map(|entry| entry.depends_on.iter())
    }

    /// Every resource name a reference owned by `owner` may point at.
    pub fn known(&self, local: &Params) -> Vec<String> {
        let mut known: Vec<String> = [INPUT_RESOURCE, ERROR_RESOURCE, STACK_RESOURCE]
            .iter()
            .map(|s| s.to_string())
            .collect();
        known.extend(local.keys().cloned());
        known.extend(self.flow.nodes().iter().map(|node| node.id.clone()));
        known
    }

    /// Look up the property a reference declared in `scope` points at.
    pub fn lookup<'s>(&self, scope: Scope<'s>, reference: &Reference) -> Result<Found<'s>, Miss>
    where
        'a: 's,
    {
        let root = reference.root();
        let prop = reference.prop();
        let path = reference.path.as_str();

        match root {
            INPUT_RESOURCE => {
                let input = self.flow.input();
                let scope = Scope::of(Owner::Flow, input);
                let property = match prop.as_str() {
                    HEADER_RESOURCE => header(input.map(|i| &i.header), path),
                    PARAMS_RESOURCE => params(input.map(|i| &i.params), path)?,
                    REQUEST_RESOURCE => tree(input.and_then(|i| i.property.as_ref()), path)?,
                    _ => return Err(Miss::Resource),
                };
                Ok(Found { property, scope })
            }
            ERROR_RESOURCE => self.error(scope.owner, &prop, path),
            STACK_RESOURCE => {
                let entry = self.stack_entry(&prop).ok_or(Miss::Resource)?;
                let returns = entry.returns.as_ref().ok_or(Miss::Resource)?;
                let owner = entry.owner.as_deref().map_or(Owner::Flow, Owner::Node);
                Ok(Found {
                    property: tree(Some(returns), path)?,
                    scope: Scope::new(owner, &entry.params),
                })
            }
            _ if scope.local.contains_key(root) => Ok(Found {
                property: tree(scope.local.get(root), path)?,
                scope,
            }),
            _ => match self.flow.node(root) {
                Some(node) => node_resource(node, &prop, path),
                None => Err(Miss::Resource),
            },
        }
    }

    fn stack_entry(&self, key: &str) -> Option<&'a StackEntry> {
        self.stack.iter().find(|entry| entry.key == key)
    }

    /// Error resource of the active on-error policy: the owner's own, else the
    /// flow's.
    fn error(&self, owner: Owner<'_>, prop: &str, path: &str) -> Result<Found<'a>, Miss> {
        let own = owner
            .id()
            .and_then(|id| self.flow.node(id))
            .and_then(|node| node.on_error.as_ref().map(|on_error| (node, on_error)));

        let (owner, on_error) = match own {
            Some((node, on_error)) => (Owner::Node(node.id.as_str()), Some(on_error)),
            None => (Owner::Flow, self.flow.on_error()),
        };
        let policy = Scope::new(owner, on_error.map_or(&NO_PARAMS, |e| &e.params));

        let property = match (prop, path) {
            (PARAMS_RESOURCE, _) => params(on_error.map(|e| &e.params), path)?,
            (_, "message") => Property::scalar(ScalarType::String).named("message"),
            (_, "status") => Property::scalar(ScalarType::Int64).named("status"),
            (RESPONSE_RESOURCE, _) => return on_error_response(owner, on_error, path),
            _ => return Err(Miss::Resource),
        };
        Ok(Found {
            property,
            scope: policy,
        })
    }
}

fn node_resource<'a>(node: &'a Node, prop: &str, path: &str) -> Result<Found<'a>, Miss> {
    let owner = Owner::Node(node.id.as_str());

    if prop == HEADER_RESOURCE {
        return Ok(Found {
            property: header(None, path),
            scope: Scope::of(owner, None),
        });
    }

    if prop == ERROR_RESOURCE {
        return on_error_response(owner, node.on_error.as_ref(), path);
    }

    let (map, property) = match (&node.kind, prop) {
        (NodeKind::Call { call, .. }, REQUEST_RESOURCE) => {
            let map = call.request.as_ref();
            (map, tree(map.and_then(|r| r.property.as_ref()), path)?)
        }
        (NodeKind::Call { call, .. }, RESPONSE_RESOURCE) => {
            let map = call.response.as_ref();
            (map, tree(map.and_then(|r| r.property.as_ref()), path)?)
        }
        (NodeKind::Call { call, .. }, PARAMS_RESOURCE) => {
            let map = call.request.as_ref();
            (map, params(map.map(|r| &r.params), path)?)
        }
        (NodeKind::Intermediate { intermediate }, REQUEST_RESOURCE | RESPONSE_RESOURCE) => {
            (Some(intermediate), tree(intermediate.property.as_ref(), path)?)
        }
        (NodeKind::Intermediate { intermediate }, PARAMS_RESOURCE) => {
            (Some(intermediate), params(Some(&intermediate.params), path)?)
        }
        (NodeKind::Condition { condition }, PARAMS_RESOURCE) => {
            let map = condition.params.as_ref();
            (map, params(map.map(|p| &p.params), path)?)
        }
        (NodeKind::Condition { .. }, REQUEST_RESOURCE | RESPONSE_RESOURCE) => {
            return Err(Miss::Path);
        }
        _ => return Err(Miss::Resource),
    };

    Ok(Found {
        property,
        scope: Scope::of(owner, map),
    })
}

fn on_error_response<'a>(
    owner: Owner<'a>,
    on_error: Option<&'a OnError>,
    path: &str,
) -> Result<Found<'a>, Miss> {
    let response = on_error.and_then(|e| e.response.as_ref());
    Ok(Found {
        property: tree(response.and_then(|r| r.property.as_ref()), path)?,
        scope: Scope::of(owner, response),
    })
}

/// Any header name resolves to a string, declared or not.
fn header(declared: Option<&Header>, path: &str) -> Property {
    let key = path.to_lowercase();
    declared
        .and_then(|header| header.get(&key))
        .cloned()
        .unwrap_or_else(|| Property::scalar(ScalarType::String).named(key))
}

/// `key[.rest]` selects the param `key`, then `rest` inside it.
fn params(declared: Option<&Params>, path: &str) -> Result<Property, Miss> {
    let (key, rest) = match path.split_once(PATH_DELIMITER) {
        Some((key, rest)) => (key, rest),
        None => (path, ""),
    };

    tree(declared.and_then(|params| params.get(key)), rest)
}

/// Look up `path` in a property tree. A path running through a reference
/// continues at the referenced resource, from the deepest such prefix.
fn tree(property: Option<&Property>, path: &str) -> Result<Property, Miss> {
    let property = property.ok_or(Miss::Path)?;

    if let Some(found) = property.lookup(path) {
        return Ok(found.clone());
    }

    let segments: Vec<&str> = path.split(PATH_DELIMITER).collect();
    (0..segments.len())
        .rev()
        .find_map(|at| {
            let alias = property.lookup(&segments[..at].join("."))?.as_reference()?;
            let rest = segments[at..].join(".");
            Some(Property::reference(Reference::new(
                alias.resource.clone(),
                join_path(&[&alias.path, &rest]),
            )))
        })
        .ok_or(Miss::Path)
}
