//! Full pipeline: validate → bind → resolve → compare → plan → construct.

use std::sync::Arc;

use crate::bind::Binder;
use crate::compare;
use crate::config::CompilerOptions;
use crate::construct::Constructor;
use crate::construct::registry::Capabilities;
use crate::error::CompilerError;
use crate::ir::types::CompiledFlow;
use crate::lower::{self, ExecutionPlan};
use crate::parse::catalog::{SchemaCatalog, ServiceCatalog};
use crate::parse::types::FlowGraph;
use crate::parse::{self, Manifest};
use crate::resolve;
use crate::validate;

/// Flows that passed every stage before construction, with their execution plans.
#[derive(Debug, Clone)]
pub struct Checked {
    pub flows: Vec<FlowGraph>,
    pub plans: Vec<ExecutionPlan>,
}

/// Compiles flow lists against fixed catalogs and capabilities.
///
/// Catalogs and capabilities are read-only while compiling; a single
/// compiler may be shared between tasks.
#[derive(Debug, Clone)]
pub struct Compiler {
    services: Arc<ServiceCatalog>,
    schemas: Arc<SchemaCatalog>,
    capabilities: Arc<Capabilities>,
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(services: ServiceCatalog, mut schemas: SchemaCatalog) -> Self {
        schemas.normalize();
        Compiler {
            services: Arc::new(services),
            schemas: Arc::new(schemas),
            capabilities: Arc::new(Capabilities::default()),
            options: CompilerOptions::default(),
        }
    }

    /// Build a compiler from a manifest's catalogs; returns its flows too.
    pub fn from_manifest(json: &str) -> Result<(Self, Vec<FlowGraph>), CompilerError> {
        let Manifest {
            flows,
            services,
            schemas,
        } = parse::parse_manifest(json)?;
        Ok((Compiler::new(services, schemas), flows))
    }

    pub fn with_capabilities(mut self, capabilities: impl Into<Arc<Capabilities>>) -> Self {
        self.capabilities = capabilities.into();
        self
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn services(&self) -> &ServiceCatalog {
        &self.services
    }

    pub fn schemas(&self) -> &SchemaCatalog {
        &self.schemas
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Run every stage before construction without dialing anything.
    pub fn check(&self, mut flows: Vec<FlowGraph>) -> Result<Checked, CompilerError> {
        validate::validate_flows(&flows)?;
        Binder::new(&self.services, &self.schemas).bind_flows(&mut flows)?;
        resolve::resolve_flows(&mut flows, &self.capabilities.functions)?;
        compare::compare_flows(&flows, &self.schemas)?;
        let plans = lower::plan_flows(&mut flows)?;

        Ok(Checked { flows, plans })
    }

    /// Compile the flow list into executable graphs, in declaration order.
    pub async fn compile(&self, flows: Vec<FlowGraph>) -> Result<Vec<CompiledFlow>, CompilerError> {
        let Checked { flows, plans } = self.check(flows)?;
        Constructor::new(&self.services, &self.capabilities, &self.options)
            .construct_flows(flows, plans)
            .await
    }
}
