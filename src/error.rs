//! Unified compiler error type used across all phases.
//!
//! Errors are structured values: a `Phase`, an `ErrorKind` carrying the
//! machine-checkable fields, the flow/node context the error was raised in and
//! an optional inner error. `report()` renders the whole chain.

use std::fmt::Write as _;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Parse,
    Validate,
    Bind,
    Resolve,
    Compare,
    Dependencies,
    Construct,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Parse => write!(f, "Parse"),
            Phase::Validate => write!(f, "Validate"),
            Phase::Bind => write!(f, "Bind"),
            Phase::Resolve => write!(f, "Resolve"),
            Phase::Compare => write!(f, "Compare"),
            Phase::Dependencies => write!(f, "Dependencies"),
            Phase::Construct => write!(f, "Construct"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // =========================================================================
    // Structural
    // =========================================================================
    #[error("duplicate flow '{flow}'")]
    FlowDuplicate { flow: String },

    #[error("duplicate resource '{resource}' in flow '{flow}'")]
    ResourceDuplicate { flow: String, resource: String },

    #[error("reserved keyword '{keyword}' used as resource in flow '{flow}'")]
    ReservedKeyword { flow: String, keyword: String },

    // =========================================================================
    // Binding
    // =========================================================================
    #[error("undefined object '{schema}' in flow '{flow}'")]
    UndefinedObject { flow: String, schema: String },

    #[error("undefined service '{service}' in flow '{flow}'")]
    UndefinedService { flow: String, service: String },

    #[error("undefined method '{method}' on service '{service}' in flow '{flow}'")]
    UndefinedMethod {
        flow: String,
        service: String,
        method: String,
    },

    #[error("undefined output '{output}' of method '{method}' in flow '{flow}'")]
    UndefinedOutput {
        flow: String,
        method: String,
        output: String,
    },

    #[error("undefined property '{path}' in schema '{schema}'")]
    UndefinedProperty { schema: String, path: String },

    // =========================================================================
    // Reference
    // =========================================================================
    #[error("invalid reference '{raw}': {reason}")]
    InvalidReference { raw: String, reason: String },

    #[error("invalid condition '{expression}': {reason}")]
    InvalidCondition { expression: String, reason: String },

    #[error("invalid function '{raw}': {reason}")]
    InvalidFunction { raw: String, reason: String },

    #[error("undefined function '{function}'")]
    UndefinedFunction { function: String, known: Vec<String> },

    #[error("function '{function}' rejected its arguments: {reason}")]
    FunctionArguments { function: String, reason: String },

    #[error("undefined reference '{reference}' in '{breakpoint}.{path}'")]
    UndefinedReference {
        reference: String,
        breakpoint: String,
        path: String,
    },

    #[error("undefined resource '{reference}' in '{breakpoint}'")]
    UndefinedResource {
        reference: String,
        breakpoint: String,
        known: Vec<String>,
    },

    #[error("failed to resolve flow '{flow}'")]
    UnresolvedFlow { flow: String },

    #[error("failed to resolve node '{node}'")]
    UnresolvedNode { node: String },

    #[error("failed to resolve call '{service}.{method}'")]
    UnresolvedCall { service: String, method: String },

    #[error("failed to resolve parameter map '{name}'")]
    UnresolvedParameterMap { name: String },

    #[error("failed to resolve params")]
    UnresolvedParams { keys: Vec<String> },

    #[error("failed to resolve property '{path}'")]
    UnresolvedProperty { path: String },

    #[error("failed to resolve on error")]
    UnresolvedOnError,

    #[error("failed to prepare function '{function}' as 'stack.{key}'")]
    UnresolvedFunction { function: String, key: String },

    // =========================================================================
    // Types
    // =========================================================================
    #[error("cannot use type ({given}) for '{path}', expected ({expected})")]
    TypeMismatch {
        path: String,
        given: String,
        expected: String,
    },

    #[error("type check failed for '{name}'")]
    MismatchedParameterMap { name: String },

    // =========================================================================
    // Dependencies
    // =========================================================================

    #[error("node '{node}' depends on unknown node '{dependency}' in flow '{flow}'")]
    UnknownDependency {
        flow: String,
        node: String,
        dependency: String,
    },

    #[error("circular dependency detected: {flow}.{node} <-> {flow}.{dependency}")]
    CircularDependency {
        flow: String,
        node: String,
        dependency: String,
    },

    #[error("compiled flow '{flow}' violates an invariant: {message}")]
    InvalidGraph { flow: String, message: String },

    // =========================================================================
    // Wiring
    // =========================================================================
    #[error("no service name configured in '{node}'")]
    NoServiceName { node: String },

    #[error("the service '{service}' for '{node}' was not found")]
    NoService { service: String, node: String },

    #[error("transport '{transport}' not found for service '{service}'")]
    NoTransport { transport: String, service: String },

    #[error("service discovery resolver '{resolver}' not found for service '{service}'")]
    NoResolver { resolver: String, service: String },

    #[error("request codec '{codec}' not found for service '{service}'")]
    NoRequestCodec { codec: String, service: String },

    #[error("response codec '{codec}' not found for service '{service}'")]
    NoResponseCodec { codec: String, service: String },

    #[error("failed to dial service '{service}': {reason}")]
    Dial { service: String, reason: String },

    #[error("dialing service '{service}' timed out after {timeout_ms}ms")]
    DialTimeout { service: String, timeout_ms: u64 },

    #[error("codec '{codec}' rejected '{resource}': {reason}")]
    Codec {
        codec: String,
        resource: String,
        reason: String,
    },

    // =========================================================================
    // Generic
    // =========================================================================
    #[error("nil input: {what}")]
    NilInput { what: String },

    #[error("failed to parse manifest: {reason}")]
    Manifest { reason: String },
}

impl ErrorKind {
    /// Stable identifier of the error kind. Messages may change, codes do not.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::FlowDuplicate { .. } => "FlowDuplicate",
            ErrorKind::ResourceDuplicate { .. } => "ResourceDuplicate",
            ErrorKind::ReservedKeyword { .. } => "ReservedKeyword",
            ErrorKind::UndefinedObject { .. } => "UndefinedObject",
            ErrorKind::UndefinedService { .. } => "UndefinedService",
            ErrorKind::UndefinedMethod { .. } => "UndefinedMethod",
            ErrorKind::UndefinedOutput { .. } => "UndefinedOutput",
            ErrorKind::UndefinedProperty { .. } => "UndefinedProperty",
            ErrorKind::InvalidReference { .. } => "InvalidReference",
            ErrorKind::InvalidCondition { .. } => "InvalidCondition",
            ErrorKind::InvalidFunction { .. } => "InvalidFunction",
            ErrorKind::UndefinedFunction { .. } => "UndefinedFunction",
            ErrorKind::FunctionArguments { .. } => "FunctionArguments",
            ErrorKind::UndefinedReference { .. } => "UndefinedReference",
            ErrorKind::UndefinedResource { .. } => "UndefinedResource",
            ErrorKind::UnresolvedFlow { .. } => "UnresolvedFlow",
            ErrorKind::UnresolvedNode { .. } => "UnresolvedNode",
            ErrorKind::UnresolvedCall { .. } => "UnresolvedCall",
            ErrorKind::UnresolvedParameterMap { .. } => "UnresolvedParameterMap",
            ErrorKind::UnresolvedParams { .. } => "UnresolvedParams",
            ErrorKind::UnresolvedProperty { .. } => "UnresolvedProperty",
            ErrorKind::UnresolvedOnError => "UnresolvedOnError",
            ErrorKind::UnresolvedFunction { .. } => "UnresolvedFunction",
            ErrorKind::TypeMismatch { .. } => "TypeMismatch",
            ErrorKind::MismatchedParameterMap { .. } => "MismatchedParameterMap",
            ErrorKind::UnknownDependency { .. } => "UnknownDependency",
            ErrorKind::CircularDependency { .. } => "CircularDependency",
            ErrorKind::InvalidGraph { .. } => "InvalidGraph",
            ErrorKind::NoServiceName { .. } => "NoServiceName",
            ErrorKind::NoService { .. } => "NoService",
            ErrorKind::NoTransport { .. } => "NoTransport",
            ErrorKind::NoResolver { .. } => "NoResolver",
            ErrorKind::NoRequestCodec { .. } => "NoRequestCodec",
            ErrorKind::NoResponseCodec { .. } => "NoResponseCodec",
            ErrorKind::Dial { .. } => "Dial",
            ErrorKind::DialTimeout { .. } => "DialTimeout",
            ErrorKind::Codec { .. } => "Codec",
            ErrorKind::NilInput { .. } => "NilInput",
            ErrorKind::Manifest { .. } => "Manifest",
        }
    }

    /// Structured fields of the kind, in display order.
    pub fn details(&self) -> Vec<(&'static str, String)> {
        match self {
            ErrorKind::FlowDuplicate { flow } => vec![("Flow", flow.clone())],
            ErrorKind::ResourceDuplicate { flow, resource } => {
                vec![("Flow", flow.clone()), ("Resource", resource.clone())]
            }
            ErrorKind::ReservedKeyword { flow, keyword } => {
                vec![("Flow", flow.clone()), ("Keyword", keyword.clone())]
            }
            ErrorKind::UndefinedObject { flow, schema } => {
                vec![("Flow", flow.clone()), ("Schema", schema.clone())]
            }
            ErrorKind::UndefinedService { flow, service } => {
                vec![("Flow", flow.clone()), ("Service", service.clone())]
            }
            ErrorKind::UndefinedMethod {
                flow,
                service,
                method,
            } => vec![
                ("Flow", flow.clone()),
                ("Service", service.clone()),
                ("Method", method.clone()),
            ],
            ErrorKind::UndefinedOutput {
                flow,
                method,
                output,
            } => vec![
                ("Flow", flow.clone()),
                ("Method", method.clone()),
                ("Output", output.clone()),
            ],
            ErrorKind::UndefinedProperty { schema, path } => {
                vec![("Schema", schema.clone()), ("Path", path.clone())]
            }
            ErrorKind::InvalidReference { raw, reason } => {
                vec![("Reference", raw.clone()), ("Reason", reason.clone())]
            }
            ErrorKind::InvalidCondition { expression, reason } => vec![
                ("Expression", expression.clone()),
                ("Reason", reason.clone()),
            ],
            ErrorKind::InvalidFunction { raw, reason } => {
                vec![("Function", raw.clone()), ("Reason", reason.clone())]
            }
            ErrorKind::UndefinedFunction { function, known } => vec![
                ("Function", function.clone()),
                ("KnownFunctions", known.join(", ")),
            ],
            ErrorKind::FunctionArguments { function, reason } => {
                vec![("Function", function.clone()), ("Reason", reason.clone())]
            }
            ErrorKind::UndefinedReference {
                reference,
                breakpoint,
                path,
            } => vec![
                ("Reference", reference.clone()),
                ("Breakpoint", breakpoint.clone()),
                ("Path", path.clone()),
            ],
            ErrorKind::UndefinedResource {
                reference,
                breakpoint,
                known,
            } => vec![
                ("Reference", reference.clone()),
                ("Breakpoint", breakpoint.clone()),
                ("KnownReferences", known.join(", ")),
            ],
            ErrorKind::UnresolvedFlow { flow } => vec![("Name", flow.clone())],
            ErrorKind::UnresolvedNode { node } => vec![("Node", node.clone())],
            ErrorKind::UnresolvedCall { service, method } => {
                vec![("Service", service.clone()), ("Method", method.clone())]
            }
            ErrorKind::UnresolvedParameterMap { name } => vec![("Parameter", name.clone())],
            ErrorKind::UnresolvedParams { keys } => vec![("Params", keys.join(", "))],
            ErrorKind::UnresolvedProperty { path } => vec![("Property", path.clone())],
            ErrorKind::UnresolvedOnError => vec![],
            ErrorKind::UnresolvedFunction { function, key } => {
                vec![("Function", function.clone()), ("Stack", key.clone())]
            }
            ErrorKind::TypeMismatch {
                path,
                given,
                expected,
            } => vec![
                ("Path", path.clone()),
                ("Type", given.clone()),
                ("Expected", expected.clone()),
            ],
            ErrorKind::MismatchedParameterMap { name } => vec![("Parameter", name.clone())],
            ErrorKind::UnknownDependency {
                flow,
                node,
                dependency,
            }
            | ErrorKind::CircularDependency {
                flow,
                node,
                dependency,
            } => vec![
                ("Flow", flow.clone()),
                ("Node", node.clone()),
                ("Dependency", dependency.clone()),
            ],
            ErrorKind::InvalidGraph { flow, message } => {
                vec![("Flow", flow.clone()), ("Violation", message.clone())]
            }
            ErrorKind::NoServiceName { node } => vec![("Node", node.clone())],
            ErrorKind::NoService { service, node } => {
                vec![("Service", service.clone()), ("Node", node.clone())]
            }
            ErrorKind::NoTransport { transport, service } => {
                vec![("Transport", transport.clone()), ("Service", service.clone())]
            }
            ErrorKind::NoResolver { resolver, service } => {
                vec![("Resolver", resolver.clone()), ("Service", service.clone())]
            }
            ErrorKind::NoRequestCodec { codec, service }
            | ErrorKind::NoResponseCodec { codec, service } => {
                vec![("Codec", codec.clone()), ("Service", service.clone())]
            }
            ErrorKind::Dial { service, reason } => {
                vec![("Service", service.clone()), ("Reason", reason.clone())]
            }
            ErrorKind::DialTimeout {
                service,
                timeout_ms,
            } => vec![
                ("Service", service.clone()),
                ("TimeoutMs", timeout_ms.to_string()),
            ],
            ErrorKind::Codec {
                codec,
                resource,
                reason,
            } => vec![
                ("Codec", codec.clone()),
                ("Resource", resource.clone()),
                ("Reason", reason.clone()),
            ],
            ErrorKind::NilInput { what } => vec![("Input", what.clone())],
            ErrorKind::Manifest { reason } => vec![("Reason", reason.clone())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerError {
    pub phase: Phase,
    pub kind: ErrorKind,
    /// Flow the error was raised in, if any.
    pub flow: Option<String>,
    /// Node the error was raised in, if any.
    pub node: Option<String>,
    pub source: Option<Box<CompilerError>>,
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Some(id) => write!(
                f,
                "[{}:{}] {} (node '{}')",
                self.phase,
                self.kind.code(),
                self.kind,
                id
            ),
            None => write!(f, "[{}:{}] {}", self.phase, self.kind.code(), self.kind),
        }
    }
}

impl std::error::Error for CompilerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|inner| inner as &(dyn std::error::Error + 'static))
    }
}

impl CompilerError {
    pub fn new(phase: Phase, kind: ErrorKind) -> Self {
        CompilerError {
            phase,
            kind,
            flow: None,
            node: None,
            source: None,
        }
    }

    pub fn with_flow(mut self, flow: impl Into<String>) -> Self {
        self.flow = Some(flow.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Wraps `self` as the inner error of a new error of the given kind.
    /// The outer error keeps the phase and context of the inner one.
    pub fn wrap(self, kind: ErrorKind) -> Self {
        CompilerError {
            phase: self.phase,
            kind,
            flow: self.flow.clone(),
            node: self.node.clone(),
            source: Some(Box::new(self)),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Iterates the error and all of its inner errors, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &CompilerError> {
        std::iter::successors(Some(self), |err| err.source.as_deref())
    }

    /// The innermost error of the chain; usually the actual cause.
    pub fn root_cause(&self) -> &CompilerError {
        self.chain().last().unwrap_or(self)
    }

    /// Returns true if any error in the chain has the given code.
    pub fn contains(&self, code: &str) -> bool {
        self.chain().any(|err| err.code() == code)
    }

    /// Render the error chain as a multi-line, human-readable report.
    pub fn report(&self) -> String {
        let mut out = String::new();

        for err in self.chain() {
            let _ = writeln!(out, "[{}:{}] {}", err.phase, err.code(), err.kind);
            if let Some(flow) = &err.flow {
                let _ = writeln!(out, "\tFlow: {}", flow);
            }
            if let Some(node) = &err.node {
                let _ = writeln!(out, "\tNode: {}", node);
            }
            for (key, value) in err.kind.details() {
                let printed = match key {
                    "Flow" => err.flow.as_deref() == Some(value.as_str()),
                    "Node" => err.node.as_deref() == Some(value.as_str()),
                    _ => false,
                };
                if printed {
                    continue;
                }
                let _ = writeln!(out, "\t{}: {}", key, value);
            }
        }

        out
    }
}
