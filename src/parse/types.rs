//! Intermediate flow description: the serde target produced by front ends.
//!
//! Nothing in here is tied to a textual configuration syntax. Front ends build
//! these values directly or hand over their JSON form.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::expression::Expression;
use super::property::Property;

pub type Header = BTreeMap<String, Property>;
pub type Params = BTreeMap<String, Property>;
pub type Options = BTreeMap<String, String>;

// =============================================================================
// PARAMETER MAPS
// =============================================================================

/// A schema-bindable container for a property tree, headers and named params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: Header,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: Options,
    /// Resources read by this map; computed during reference resolution.
    #[serde(default, skip_deserializing, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

impl ParameterMap {
    pub fn new() -> Self {
        ParameterMap::default()
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.property = Some(property);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, property: Property) -> Self {
        self.header.insert(key.into(), property);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, property: Property) -> Self {
        self.params.insert(key.into(), property);
        self
    }
}

// =============================================================================
// CALLS
// =============================================================================

/// Method input/output schema names, set once the method has been bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ParameterMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ParameterMap>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

impl CallSpec {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        CallSpec {
            service: service.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_request(mut self, request: ParameterMap) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: ParameterMap) -> Self {
        self.response = Some(response);
        self
    }
}

/// Error-response shaping applied when a call (or the whole flow) fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ParameterMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Property>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
}

// =============================================================================
// NODES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// Raw boolean expression, e.g. `{{ input:id }} == 'admin'`.
    pub expression: String,
    /// Nodes gated by this condition.
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParameterMap>,
    #[serde(skip)]
    pub compiled: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Call {
        call: CallSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rollback: Option<CallSpec>,
    },
    Intermediate {
        intermediate: ParameterMap,
    },
    Condition {
        condition: ConditionSpec,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub expected_status: BTreeSet<i64>,
}

impl Node {
    fn with_kind(id: impl Into<String>, kind: NodeKind) -> Self {
        Node {
            id: id.into(),
            depends_on: BTreeSet::new(),
            kind,
            on_error: None,
            expected_status: BTreeSet::new(),
        }
    }

    pub fn call(id: impl Into<String>, call: CallSpec) -> Self {
        Node::with_kind(id, NodeKind::Call { call, rollback: None })
    }

    pub fn intermediate(id: impl Into<String>, params: ParameterMap) -> Self {
        Node::with_kind(id, NodeKind::Intermediate { intermediate: params })
    }

    pub fn condition<'a>(
        id: impl Into<String>,
        expression: impl Into<String>,
        children: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Node::with_kind(
            id,
            NodeKind::Condition {
                condition: ConditionSpec {
                    expression: expression.into(),
                    children: children.into_iter().map(str::to_string).collect(),
                    params: None,
                    compiled: None,
                },
            },
        )
    }

    pub fn depends_on<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.depends_on.extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn with_rollback(mut self, spec: CallSpec) -> Self {
        if let NodeKind::Call { rollback, .. } = &mut self.kind {
            *rollback = Some(spec);
        }
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn with_expected_status(mut self, status: impl IntoIterator<Item = i64>) -> Self {
        self.expected_status.extend(status);
        self
    }

    pub fn call_spec(&self) -> Option<&CallSpec> {
        match &self.kind {
            NodeKind::Call { call, .. } => Some(call),
            _ => None,
        }
    }

    pub fn rollback_spec(&self) -> Option<&CallSpec> {
        match &self.kind {
            NodeKind::Call { rollback, .. } => rollback.as_ref(),
            _ => None,
        }
    }

    pub fn condition_spec(&self) -> Option<&ConditionSpec> {
        match &self.kind {
            NodeKind::Condition { condition } => Some(condition),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Call { .. } => "call",
            NodeKind::Intermediate { .. } => "intermediate",
            NodeKind::Condition { .. } => "condition",
        }
    }
}

// =============================================================================
// FUNCTIONS
// =============================================================================

/// A template function call, registered under the `stack` resource of its
/// flow and read back as `stack.<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    pub key: String,
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Property>,
    /// Node whose map holds the call; `None` for the flow's own maps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Named params visible to the arguments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
    /// Value produced by the call, once the function accepted its arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Property>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

// =============================================================================
// FLOWS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ParameterMap>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ParameterMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    /// Function calls found in templates; filled during resolution.
    #[serde(default, skip_deserializing, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackEntry>,
}

/// A flow without a node graph that passes requests to a single service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ParameterMap>,
    pub forward: CallSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowGraph {
    Flow(Flow),
    Proxy(Proxy),
}

impl FlowGraph {
    pub fn flow(name: impl Into<String>) -> Self {
        FlowGraph::Flow(Flow {
            name: name.into(),
            input: None,
            nodes: Vec::new(),
            output: None,
            on_error: None,
            stack: Vec::new(),
        })
    }

    pub fn proxy(name: impl Into<String>, forward: CallSpec) -> Self {
        FlowGraph::Proxy(Proxy {
            name: name.into(),
            input: None,
            forward,
            on_error: None,
            stack: Vec::new(),
        })
    }

    pub fn with_input(mut self, params: ParameterMap) -> Self {
        *self.input_mut() = Some(params);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        if let FlowGraph::Flow(flow) = &mut self {
            flow.nodes.push(node);
        }
        self
    }

    pub fn with_output(mut self, params: ParameterMap) -> Self {
        if let FlowGraph::Flow(flow) = &mut self {
            flow.output = Some(params);
        }
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        *self.on_error_mut() = Some(on_error);
        self
    }

    pub fn name(&self) -> &str {
        match self {
            FlowGraph::Flow(flow) => &flow.name,
            FlowGraph::Proxy(proxy) => &proxy.name,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, FlowGraph::Proxy(_))
    }

    pub fn input(&self) -> Option<&ParameterMap> {
        match self {
            FlowGraph::Flow(flow) => flow.input.as_ref(),
            FlowGraph::Proxy(proxy) => proxy.input.as_ref(),
        }
    }

    pub fn input_mut(&mut self) -> &mut Option<ParameterMap> {
        match self {
            FlowGraph::Flow(flow) => &mut flow.input,
            FlowGraph::Proxy(proxy) => &mut proxy.input,
        }
    }

    /// Declared nodes; always empty for a proxy.
    pub fn nodes(&self) -> &[Node] {
        match self {
            FlowGraph::Flow(flow) => &flow.nodes,
            FlowGraph::Proxy(_) => &[],
        }
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        match self {
            FlowGraph::Flow(flow) => &mut flow.nodes,
            FlowGraph::Proxy(_) => Default::default(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes().iter().find(|node| node.id == id)
    }

    pub fn output(&self) -> Option<&ParameterMap> {
        match self {
            FlowGraph::Flow(flow) => flow.output.as_ref(),
            FlowGraph::Proxy(_) => None,
        }
    }

    pub fn on_error(&self) -> Option<&OnError> {
        match self {
            FlowGraph::Flow(flow) => flow.on_error.as_ref(),
            FlowGraph::Proxy(proxy) => proxy.on_error.as_ref(),
        }
    }

    pub fn on_error_mut(&mut self) -> &mut Option<OnError> {
        match self {
            FlowGraph::Flow(flow) => &mut flow.on_error,
            FlowGraph::Proxy(proxy) => &mut proxy.on_error,
        }
    }

    pub fn stack(&self) -> &[StackEntry] {
        match self {
            FlowGraph::Flow(flow) => &flow.stack,
            FlowGraph::Proxy(proxy) => &proxy.stack,
        }
    }

    pub fn stack_mut(&mut self) -> &mut Vec<StackEntry> {
        match self {
            FlowGraph::Flow(flow) => &mut flow.stack,
            FlowGraph::Proxy(proxy) => &mut proxy.stack,
        }
    }

    pub fn forward(&self) -> Option<&CallSpec> {
        match self {
            FlowGraph::Flow(_) => None,
            FlowGraph::Proxy(proxy) => Some(&proxy.forward),
        }
    }
}
