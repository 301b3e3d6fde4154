//! Explicit diagnostic context threaded through every compiler call.
//!
//! Carries only request-scoped identifiers: the current phase, flow and node.
//! Errors built from a context inherit those identifiers.

use tracing::Span;

use crate::error::{CompilerError, ErrorKind, Phase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub phase: Phase,
    pub flow: Option<String>,
    pub node: Option<String>,
}

impl Context {
    pub fn new(phase: Phase) -> Self {
        Context {
            phase,
            flow: None,
            node: None,
        }
    }

    pub fn with_flow(&self, flow: impl Into<String>) -> Self {
        Context {
            phase: self.phase,
            flow: Some(flow.into()),
            node: None,
        }
    }

    pub fn with_node(&self, node: impl Into<String>) -> Self {
        Context {
            phase: self.phase,
            flow: self.flow.clone(),
            node: Some(node.into()),
        }
    }

    pub fn flow_name(&self) -> &str {
        self.flow.as_deref().unwrap_or_default()
    }

    /// Tracing span carrying the context fields.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "compile",
            phase = %self.phase,
            flow = self.flow.as_deref().unwrap_or(""),
            node = self.node.as_deref().unwrap_or(""),
        )
    }

    /// Build an error tagged with this context.
    pub fn error(&self, kind: ErrorKind) -> CompilerError {
        CompilerError {
            phase: self.phase,
            kind,
            flow: self.flow.clone(),
            node: self.node.clone(),
            source: None,
        }
    }

    /// Build an error tagged with this context that wraps `inner`.
    pub fn wrap(&self, inner: CompilerError, kind: ErrorKind) -> CompilerError {
        let mut err = self.error(kind);
        err.source = Some(Box::new(inner));
        err
    }
}
