//! Compiled flow graph handed to the run-time engine.
//!
//! Values in here are produced once and never mutated afterwards. Every
//! capability handle is an `Arc` to a `Send + Sync` trait object, so a
//! compiled flow can be shared across any number of concurrent executions.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::construct::capability::{AddressResolver, Client, CodecManager};
use crate::parse::expression::Expression;
use crate::parse::property::Property;
use crate::parse::types::{Descriptor, ParameterMap, Params, StackEntry};

// =============================================================================
// FLOWS
// =============================================================================

#[derive(Debug, Clone)]
pub struct CompiledFlow {
    pub name: String,
    pub input: Option<ParameterMap>,
    pub output: Option<ParameterMap>,
    /// Nodes in execution order.
    pub nodes: Vec<ExecutableNode>,
    pub on_error: Option<ErrorHandler>,
    /// Passthrough call of a proxy; proxies have no nodes.
    pub forward: Option<ExecutableCall>,
    /// Prepared function calls, read through `stack.<key>` references.
    pub stack: Vec<StackEntry>,
}

impl CompiledFlow {
    pub fn node(&self, id: &str) -> Option<&ExecutableNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn is_proxy(&self) -> bool {
        self.forward.is_some()
    }

    /// Node IDs in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.id.as_str()).collect()
    }
}

// =============================================================================
// NODES
// =============================================================================

#[derive(Debug, Clone)]
pub struct ExecutableNode {
    pub id: String,
    pub depends_on: BTreeSet<String>,
    /// Positions in `CompiledFlow::nodes` of the nodes in `depends_on`.
    pub dependencies: Vec<usize>,
    pub expected_status: BTreeSet<i64>,
    pub action: Action,
    pub rollback: Option<ExecutableCall>,
    /// The node's own policy, or the flow's when it declares none.
    pub on_error: Option<ErrorHandler>,
}

#[derive(Debug, Clone)]
pub enum Action {
    Call(ExecutableCall),
    Intermediate(ParameterMap),
    Condition(ExecutableCondition),
}

impl Action {
    pub fn as_call(&self) -> Option<&ExecutableCall> {
        match self {
            Action::Call(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableCondition {
    pub expression: Expression,
    /// One param per placeholder of the expression, keyed by its text.
    pub params: ParameterMap,
    /// Nodes gated by the condition.
    pub children: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutableCall {
    pub service: String,
    pub method: String,
    pub request: Option<ParameterMap>,
    pub response: Option<ParameterMap>,
    pub descriptor: Option<Descriptor>,
    pub binding: TransportBinding,
    /// Server-declared references of the method, resolved.
    pub references: Vec<Property>,
}

/// A call target resolved to a dialed client, discovery resolver and codec
/// pair.
#[derive(Clone)]
pub struct TransportBinding {
    pub transport: String,
    pub client: Arc<dyn Client>,
    pub resolver: Arc<dyn AddressResolver>,
    pub request_codec: Arc<dyn CodecManager>,
    pub response_codec: Arc<dyn CodecManager>,
}

impl fmt::Debug for TransportBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBinding")
            .field("transport", &self.transport)
            .field("service", &self.client.service())
            .field("host", &self.resolver.host())
            .field("request_codec", &self.request_codec.name())
            .field("response_codec", &self.response_codec.name())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ErrorHandler {
    pub response: Option<ParameterMap>,
    pub status: Option<Property>,
    pub message: Option<Property>,
    pub params: Params,
    /// Encoder for the error response, when bound to a service codec.
    pub codec: Option<Arc<dyn CodecManager>>,
}
