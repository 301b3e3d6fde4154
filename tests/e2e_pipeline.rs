//! End-to-end pipeline tests: manifest → check → construct.

#[allow(dead_code)]
mod helpers;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use flow_compiler::parse::{
    FlowGraph, Node, OnError, ParameterMap, Property, ScalarType, ServiceCatalog,
};
use flow_compiler::{Capabilities, Compiler, CompilerOptions, ErrorKind, Phase};
use helpers::*;
use serde_json::json;

#[tokio::test]
async fn greet_manifest_compiles() {
    init_tracing();
    let (compiler, flows) = Compiler::from_manifest(include_str!("fixtures/greet.json")).unwrap();
    let compiled = compiler
        .with_capabilities(capabilities())
        .compile(flows)
        .await
        .unwrap();

    assert_eq!(compiled.len(), 2);

    let greet = &compiled[0];
    assert_eq!(greet.name, "greet");
    assert_eq!(greet.nodes.len(), 1);

    let node = &greet.nodes[0];
    assert_eq!(node.id, "call_greeter");
    assert_eq!(node.expected_status, BTreeSet::from([200]));

    let call = node.action.as_call().unwrap();
    assert_eq!(call.binding.transport, "http");
    assert_eq!(call.binding.client.service(), "greeter");
    assert_eq!(call.binding.resolver.host(), "greeter:8080");
    assert_eq!(call.binding.request_codec.name(), "json");
    assert_eq!(call.binding.response_codec.resource(), "call_greeter.response");

    let output = greet.output.as_ref().unwrap();
    assert_eq!(output.depends_on, BTreeSet::from(["call_greeter".to_string()]));
}

#[tokio::test]
async fn proxy_forward_is_dialed() {
    let (compiler, flows) = Compiler::from_manifest(include_str!("fixtures/greet.json")).unwrap();
    let compiled = compiler
        .with_capabilities(capabilities())
        .compile(flows)
        .await
        .unwrap();

    let proxy = &compiled[1];
    assert!(proxy.is_proxy());
    assert!(proxy.nodes.is_empty());

    let forward = proxy.forward.as_ref().unwrap();
    assert_eq!(forward.binding.request_codec.resource(), "passthrough.request");
    let request = forward.request.as_ref().unwrap();
    let authorization = request.header["authorization"].as_reference().unwrap();
    assert_eq!(authorization.path, "authorization");
    assert!(authorization.is_resolved());
}

#[tokio::test]
async fn greet_flow_builds_same_graph_as_manifest() {
    let compiled = greeter_compiler().compile(vec![greet_flow()]).await.unwrap();
    assert_eq!(compiled[0].order(), vec!["call_greeter"]);
    assert_eq!(
        compiled[0].output.as_ref().unwrap().depends_on,
        BTreeSet::from(["call_greeter".to_string()])
    );
}

#[tokio::test]
async fn method_references_add_late_dependencies() {
    let transport = FakeTransport::default()
        .with_references("Say", vec![reference("shape", "trace")]);
    let compiler = Compiler::new(greeter_services(), greeter_schemas())
        .with_capabilities(capabilities_with(transport));

    let flow = greet_flow().with_node(Node::intermediate(
        "shape",
        ParameterMap::new().with_property(string_message(&["trace"])),
    ));
    let compiled = compiler.compile(vec![flow]).await.unwrap();

    assert_eq!(compiled[0].order(), vec!["shape", "call_greeter"]);
    let call = compiled[0].node("call_greeter").unwrap();
    assert!(call.depends_on.contains("shape"));
    assert_eq!(call.dependencies, vec![0]);
}

#[tokio::test]
async fn unresolvable_method_reference_fails_construction() {
    let transport = FakeTransport::default()
        .with_references("Say", vec![reference("ghost", "trace")]);
    let compiler = Compiler::new(greeter_services(), greeter_schemas())
        .with_capabilities(capabilities_with(transport));

    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(err.phase, Phase::Construct);
    assert_eq!(err.code(), "UnresolvedCall");
    assert_eq!(err.root_cause().code(), "UndefinedResource");
}

#[tokio::test]
async fn error_handlers_inherit_the_flow_policy() {
    let flow_policy = OnError {
        message: Some(reference("error", "message")),
        ..OnError::default()
    };
    let node_policy = OnError {
        status: Some(Property::scalar(ScalarType::Int64).with_default(json!(502))),
        ..OnError::default()
    };
    let flow = greet_flow()
        .with_on_error(flow_policy)
        .with_node(say("second").with_on_error(node_policy));

    let compiled = greeter_compiler().compile(vec![flow]).await.unwrap();
    let first = compiled[0].node("call_greeter").unwrap();
    let second = compiled[0].node("second").unwrap();

    let inherited = first.on_error.as_ref().unwrap();
    assert!(inherited.message.is_some());
    assert_eq!(
        inherited.codec.as_ref().unwrap().resource(),
        "call_greeter.error"
    );

    let own = second.on_error.as_ref().unwrap();
    assert!(own.message.is_none());
    assert_eq!(own.status.as_ref().unwrap().default_value(), Some(&json!(502)));

    assert!(compiled[0].on_error.as_ref().unwrap().codec.is_none());
}

#[tokio::test]
async fn default_resolver_is_used_for_services_without_one() {
    let compiler = greeter_compiler().with_options(CompilerOptions {
        default_resolver: Some("dns".into()),
        ..CompilerOptions::default()
    });

    let compiled = compiler.compile(vec![greet_flow()]).await.unwrap();
    let call = compiled[0].nodes[0].action.as_call().unwrap();
    assert_eq!(call.binding.resolver.host(), "dns://greeter:8080");
}

#[tokio::test]
async fn unknown_resolver_is_fatal() {
    let mut greeter = service("greeter", &[("Say", "greeter.Request", "greeter.Reply")]);
    greeter.resolver = Some("consul".into());
    let compiler = Compiler::new(ServiceCatalog::new([greeter]), greeter_schemas())
        .with_capabilities(capabilities());

    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::NoResolver {
            resolver: "consul".into(),
            service: "greeter".into()
        }
    );
}

#[tokio::test]
async fn missing_transport_is_fatal() {
    let compiler = Compiler::new(greeter_services(), greeter_schemas())
        .with_capabilities(Capabilities::new().with_codec("json", Arc::new(FakeCodec { name: "json" })));

    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(err.phase, Phase::Construct);
    assert_eq!(err.code(), "NoTransport");
    assert_eq!(err.node.as_deref(), Some("call_greeter"));
}

#[tokio::test]
async fn missing_codecs_are_fatal() {
    let compiler = Compiler::new(greeter_services(), greeter_schemas()).with_capabilities(
        Capabilities::new().with_transport("http", Arc::new(FakeTransport::default())),
    );
    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(err.code(), "NoRequestCodec");

    let mut greeter = service("greeter", &[("Say", "greeter.Request", "greeter.Reply")]);
    greeter.response_codec = "proto".into();
    let compiler = Compiler::new(ServiceCatalog::new([greeter]), greeter_schemas())
        .with_capabilities(capabilities());
    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::NoResponseCodec {
            codec: "proto".into(),
            service: "greeter".into()
        }
    );
}

#[tokio::test]
async fn dial_failures_are_not_retried() {
    let compiler = Compiler::new(greeter_services(), greeter_schemas())
        .with_capabilities(capabilities_with(FakeTransport::failing("connection refused")));

    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::Dial {
            service: "greeter".into(),
            reason: "connection refused".into()
        }
    );
}

#[tokio::test]
async fn slow_dials_time_out() {
    let compiler = Compiler::new(greeter_services(), greeter_schemas())
        .with_capabilities(capabilities_with(FakeTransport::slow(Duration::from_secs(5))))
        .with_options(CompilerOptions {
            dial_timeout_ms: 20,
            ..CompilerOptions::default()
        });

    let err = compiler.compile(vec![greet_flow()]).await.unwrap_err();
    assert_eq!(err.code(), "DialTimeout");
    assert!(err.to_string().contains("20ms"));
}

#[tokio::test]
async fn check_never_dials() {
    let compiler = Compiler::new(greeter_services(), greeter_schemas())
        .with_capabilities(capabilities_with(FakeTransport::failing("unreachable")));

    let checked = compiler
        .check(vec![greet_flow(), FlowGraph::flow("empty")])
        .unwrap();
    assert_eq!(checked.plans.len(), 2);
}
