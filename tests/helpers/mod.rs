use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;

use flow_compiler::parse::{
    CallSpec, FlowGraph, Method, Node, ParameterMap, Property, Reference, ScalarType,
    SchemaCatalog, Service, ServiceCatalog,
};
use flow_compiler::parse::types::Options;
use flow_compiler::{
    AddressResolver, BoxError, Capabilities, Client, CodecConstructor, CodecManager, Compiler,
    Discovery, MethodDescriptor, StaticResolver, Transport,
};

// =============================================================================
// Tracing
// =============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// Fake capabilities
// =============================================================================

/// In-memory transport. Dials succeed unless configured otherwise.
#[derive(Default)]
pub struct FakeTransport {
    pub delay: Option<Duration>,
    pub failure: Option<String>,
    /// Server-declared references per method name.
    pub references: BTreeMap<String, Vec<Property>>,
}

impl FakeTransport {
    pub fn slow(delay: Duration) -> Self {
        FakeTransport {
            delay: Some(delay),
            ..FakeTransport::default()
        }
    }

    pub fn failing(reason: &str) -> Self {
        FakeTransport {
            failure: Some(reason.to_string()),
            ..FakeTransport::default()
        }
    }

    pub fn with_references(mut self, method: &str, references: Vec<Property>) -> Self {
        self.references.insert(method.to_string(), references);
        self
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn dial(
        &self,
        service: &Service,
        _options: &Options,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Arc<dyn Client>, BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(reason.clone().into());
        }

        let methods = service
            .methods
            .iter()
            .map(|method| {
                let references = self.references.get(&method.name).cloned().unwrap_or_default();
                (method.name.clone(), references)
            })
            .collect();

        Ok(Arc::new(FakeClient {
            service: service.fully_qualified_name.clone(),
            host: resolver.host().to_string(),
            methods,
        }))
    }
}

pub struct FakeClient {
    pub service: String,
    pub host: String,
    methods: BTreeMap<String, Vec<Property>>,
}

impl Client for FakeClient {
    fn service(&self) -> &str {
        &self.service
    }

    fn method(&self, name: &str) -> Option<MethodDescriptor> {
        self.methods.get(name).map(|references| MethodDescriptor {
            name: name.to_string(),
            references: references.clone(),
        })
    }
}

pub struct FakeCodec {
    pub name: &'static str,
}

impl CodecConstructor for FakeCodec {
    fn new_manager(
        &self,
        resource: &str,
        _params: &ParameterMap,
    ) -> Result<Arc<dyn CodecManager>, BoxError> {
        Ok(Arc::new(FakeManager {
            name: self.name,
            resource: resource.to_string(),
        }))
    }
}

pub struct FakeManager {
    name: &'static str,
    resource: String,
}

impl CodecManager for FakeManager {
    fn name(&self) -> &str {
        self.name
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Discovery that prefixes every host with its own name.
pub struct FakeDiscovery {
    pub prefix: &'static str,
}

impl Discovery for FakeDiscovery {
    fn resolver(&self, host: &str) -> Result<Arc<dyn AddressResolver>, BoxError> {
        Ok(Arc::new(StaticResolver::new(format!("{}://{}", self.prefix, host))))
    }
}

pub fn capabilities_with(transport: FakeTransport) -> Capabilities {
    Capabilities::new()
        .with_transport("http", Arc::new(transport))
        .with_codec("json", Arc::new(FakeCodec { name: "json" }))
        .with_discovery("dns", Arc::new(FakeDiscovery { prefix: "dns" }))
}

pub fn capabilities() -> Capabilities {
    capabilities_with(FakeTransport::default())
}

// =============================================================================
// Catalogs
// =============================================================================

pub fn service(name: &str, methods: &[(&str, &str, &str)]) -> Service {
    Service {
        fully_qualified_name: name.into(),
        transport: "http".into(),
        request_codec: "json".into(),
        response_codec: "json".into(),
        host: format!("{}:8080", name),
        resolver: None,
        methods: methods
            .iter()
            .map(|(name, input, output)| Method {
                name: name.to_string(),
                input: input.to_string(),
                output: output.to_string(),
                options: Default::default(),
            })
            .collect(),
        options: Default::default(),
    }
}

pub fn string_message(fields: &[&str]) -> Property {
    Property::message(
        fields
            .iter()
            .map(|field| (*field, Property::scalar(ScalarType::String))),
    )
}

pub fn greeter_services() -> ServiceCatalog {
    ServiceCatalog::new([service(
        "greeter",
        &[("Say", "greeter.Request", "greeter.Reply")],
    )])
}

pub fn greeter_schemas() -> SchemaCatalog {
    SchemaCatalog::new([
        ("greeter.Request".to_string(), string_message(&["name"])),
        ("greeter.Reply".to_string(), string_message(&["reply"])),
    ])
}

pub fn greeter_compiler() -> Compiler {
    Compiler::new(greeter_services(), greeter_schemas()).with_capabilities(capabilities())
}

// =============================================================================
// Flow builders
// =============================================================================

pub fn reference(resource: &str, path: &str) -> Property {
    Property::reference(Reference::new(resource, path))
}

/// Call to `greeter.Say` forwarding the flow input's name.
pub fn say(id: &str) -> Node {
    Node::call(
        id,
        CallSpec::new("greeter", "Say").with_request(
            ParameterMap::new().with_property(Property::message([("name", reference("input", "name"))])),
        ),
    )
}

/// The canonical single-call greeting flow.
pub fn greet_flow() -> FlowGraph {
    FlowGraph::flow("greet")
        .with_input(ParameterMap::new().with_schema("greeter.Request"))
        .with_node(say("call_greeter"))
        .with_output(
            ParameterMap::new()
                .with_property(Property::message([("reply", reference("call_greeter", "reply"))])),
        )
}
