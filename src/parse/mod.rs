//! Parse phase: the intermediate flow description and its JSON form.

pub mod catalog;
pub mod expression;
pub mod function;
pub mod property;
pub mod reference;
pub mod types;

pub use catalog::{Method, SchemaCatalog, Service, ServiceCatalog};
pub use property::{Label, Property, ScalarType, Template};
pub use reference::Reference;
pub use types::*;

use serde::{Deserialize, Serialize};

use crate::error::{CompilerError, ErrorKind, Phase};

/// Everything a front end hands to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub flows: Vec<FlowGraph>,
    #[serde(default)]
    pub services: ServiceCatalog,
    #[serde(default)]
    pub schemas: SchemaCatalog,
}

/// Deserialize a manifest JSON string.
pub fn parse_manifest(json: &str) -> Result<Manifest, CompilerError> {
    let mut manifest = serde_json::from_str::<Manifest>(json).map_err(|e| {
        CompilerError::new(
            Phase::Parse,
            ErrorKind::Manifest {
                reason: e.to_string(),
            },
        )
    })?;

    manifest.schemas.normalize();
    tracing::debug!(
        flows = manifest.flows.len(),
        services = manifest.services.len(),
        schemas = manifest.schemas.len(),
        "parsed manifest"
    );

    Ok(manifest)
}
