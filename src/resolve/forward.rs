//! Alias forwarding.
//!
//! A reference whose target is itself a reference is rewritten to point at
//! the end of the chain. Chains that revisit a reference stop at the first
//! repeat instead of looping.

use std::collections::HashSet;

use crate::parse::property::Property;
use crate::parse::reference::{Reference, STACK_RESOURCE};

use super::lookup::{Found, Miss, Resources, Scope};

/// Result of following a reference to the end of its alias chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Forwarded {
    /// Last reference of the chain.
    pub reference: Reference,
    /// Property the last reference points at.
    pub target: Property,
    /// Nodes read along the chain, in order of first read.
    pub nodes: Vec<String>,
}

/// A failed hop, the reference that could not be looked up and the scope it
/// was looked up in.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved<'s> {
    pub miss: Miss,
    pub reference: Reference,
    pub scope: Scope<'s>,
}

/// Follow `reference`, declared in `scope`, to the end of its alias chain.
///
/// Each hop is looked up in the scope of the property the previous hop
/// landed on, so a chain through another node sees that node's params and
/// on-error policy.
pub fn follow<'s>(
    resources: &Resources<'s>,
    scope: Scope<'s>,
    reference: &Reference,
) -> Result<Forwarded, Unresolved<'s>> {
    let mut current = Reference::new(reference.resource.clone(), reference.path.clone());
    let mut visited = HashSet::from([(current.resource.clone(), current.path.clone())]);
    let mut scope = scope;
    let mut nodes: Vec<String> = Vec::new();

    loop {
        let root = current.root();
        if !scope.local.contains_key(root) && resources.is_node(root) {
            push_unique(&mut nodes, root);
        }
        if root == STACK_RESOURCE {
            for node in resources.stack_dependencies(&current.prop()) {
                push_unique(&mut nodes, node);
            }
        }

        let Found { property, scope: next_scope } =
            resources
                .lookup(scope, &current)
                .map_err(|miss| Unresolved {
                    miss,
                    reference: current.clone(),
                    scope,
                })?;

        let Some(next) = property.as_reference() else {
            return Ok(Forwarded {
                reference: current,
                target: property,
                nodes,
            });
        };

        if !visited.insert((next.resource.clone(), next.path.clone())) {
            tracing::debug!(reference = %reference, at = %current, "alias chain loops; stopping");
            return Ok(Forwarded {
                reference: current,
                target: property,
                nodes,
            });
        }

        tracing::debug!(from = %current, to = %next, "forwarding reference");
        current = Reference::new(next.resource.clone(), next.path.clone());
        scope = next_scope;
    }
}

fn push_unique(nodes: &mut Vec<String>, node: &str) {
    if !nodes.iter().any(|known| known == node) {
        nodes.push(node.to_string());
    }
}
