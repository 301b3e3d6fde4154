//! Pluggable capabilities consumed during construction.
//!
//! Transports, codecs and discovery resolvers are supplied by the embedding
//! daemon. The compiler only looks them up by name and wires them together.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::parse::catalog::Service;
use crate::parse::property::Property;
use crate::parse::types::{Options, ParameterMap};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Dials services over one wire protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a client for the service. May block on network I/O.
    async fn dial(
        &self,
        service: &Service,
        options: &Options,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Arc<dyn Client>, BoxError>;
}

/// A dialed, callable service handle.
pub trait Client: Send + Sync {
    fn service(&self) -> &str;

    /// Server-declared description of a method, if the client knows it.
    fn method(&self, name: &str) -> Option<MethodDescriptor>;
}

/// Method description returned by a dialed client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    /// Additional references the server declares for the method, e.g.
    /// headers it reads from the inbound request.
    pub references: Vec<Property>,
}

/// Builds codec managers for a named wire format.
pub trait CodecConstructor: Send + Sync {
    fn new_manager(
        &self,
        resource: &str,
        params: &ParameterMap,
    ) -> Result<Arc<dyn CodecManager>, BoxError>;
}

/// Encodes or decodes one resource.
pub trait CodecManager: Send + Sync {
    /// Codec name, e.g. `json`.
    fn name(&self) -> &str;
    /// Resource the manager was created for, e.g. `call.request`.
    fn resource(&self) -> &str;
}

/// Creates address resolvers for a discovery mechanism.
pub trait Discovery: Send + Sync {
    fn resolver(&self, host: &str) -> Result<Arc<dyn AddressResolver>, BoxError>;
}

pub trait AddressResolver: Send + Sync {
    fn host(&self) -> &str;
    /// Current addresses of the host.
    fn addresses(&self) -> Vec<String>;
}

/// Resolves a host to itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResolver {
    host: String,
}

impl StaticResolver {
    pub fn new(host: impl Into<String>) -> Self {
        StaticResolver { host: host.into() }
    }
}

impl AddressResolver for StaticResolver {
    fn host(&self) -> &str {
        &self.host
    }

    fn addresses(&self) -> Vec<String> {
        vec![self.host.clone()]
    }
}

impl fmt::Debug for dyn Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("service", &self.service()).finish()
    }
}

impl fmt::Debug for dyn CodecManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecManager")
            .field("name", &self.name())
            .field("resource", &self.resource())
            .finish()
    }
}

impl fmt::Debug for dyn AddressResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressResolver")
            .field("host", &self.host())
            .finish()
    }
}
