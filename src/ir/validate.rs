//! Compiled-graph invariant validation.
//!
//! Runs on every flow before it leaves the compiler.

use std::collections::{HashMap, HashSet};

use crate::ir::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub code: &'static str,
    pub message: String,
    /// The node where the violation was found, if applicable.
    pub node: Option<String>,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Some(id) => write!(f, "[{}] {} (at node '{}')", self.code, self.message, id),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Validate a compiled flow against all invariants. Returns all violations.
pub fn validate_compiled(flow: &CompiledFlow) -> Vec<Violation> {
    let mut violations = Vec::new();

    unique_node_ids(flow, &mut violations);
    dependencies_precede_dependents(flow, &mut violations);
    dependency_positions_match(flow, &mut violations);
    output_depends_on_compiled_nodes(flow, &mut violations);
    proxies_have_no_nodes(flow, &mut violations);

    violations
}

fn unique_node_ids(flow: &CompiledFlow, violations: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    for node in &flow.nodes {
        if !seen.insert(node.id.as_str()) {
            violations.push(Violation {
                code: "G001",
                message: format!("duplicate node id '{}'", node.id),
                node: Some(node.id.clone()),
            });
        }
    }
}

fn dependencies_precede_dependents(flow: &CompiledFlow, violations: &mut Vec<Violation>) {
    let positions: HashMap<&str, usize> = flow
        .nodes
        .iter()
        .enumerate()
        .map(|(position, node)| (node.id.as_str(), position))
        .collect();

    for (position, node) in flow.nodes.iter().enumerate() {
        for dependency in &node.depends_on {
            match positions.get(dependency.as_str()) {
                Some(&at) if at < position => {}
                Some(_) => violations.push(Violation {
                    code: "G002",
                    message: format!("node runs before its dependency '{}'", dependency),
                    node: Some(node.id.clone()),
                }),
                None => violations.push(Violation {
                    code: "G003",
                    message: format!("dependency '{}' is not a compiled node", dependency),
                    node: Some(node.id.clone()),
                }),
            }
        }
    }
}

fn dependency_positions_match(flow: &CompiledFlow, violations: &mut Vec<Violation>) {
    for node in &flow.nodes {
        let ids: HashSet<&str> = node
            .dependencies
            .iter()
            .filter_map(|&position| flow.nodes.get(position))
            .map(|dependency| dependency.id.as_str())
            .collect();
        let expected: HashSet<&str> = node.depends_on.iter().map(String::as_str).collect();

        if ids != expected || ids.len() != node.dependencies.len() {
            violations.push(Violation {
                code: "G004",
                message: "dependency positions disagree with dependency names".to_string(),
                node: Some(node.id.clone()),
            });
        }
    }
}

fn output_depends_on_compiled_nodes(flow: &CompiledFlow, violations: &mut Vec<Violation>) {
    let Some(output) = &flow.output else {
        return;
    };

    for dependency in &output.depends_on {
        if flow.node(dependency).is_none() {
            violations.push(Violation {
                code: "G005",
                message: format!("output depends on unknown node '{}'", dependency),
                node: None,
            });
        }
    }
}

fn proxies_have_no_nodes(flow: &CompiledFlow, violations: &mut Vec<Violation>) {
    if flow.is_proxy() && !flow.nodes.is_empty() {
        violations.push(Violation {
            code: "G006",
            message: "proxy carries nodes".to_string(),
            node: None,
        });
    }
}
