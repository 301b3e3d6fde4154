//! Integration tests for reference resolution and alias forwarding.

#[allow(dead_code)]
mod helpers;

use flow_compiler::parse::{
    CallSpec, FlowGraph, Node, NodeKind, OnError, ParameterMap, Property, ScalarType,
};
use flow_compiler::{ErrorKind, Phase};
use helpers::*;
use serde_json::json;

#[test]
fn undefined_resource_is_reported_with_its_path() {
    let flow = greet_flow().with_node(Node::intermediate(
        "shape",
        ParameterMap::new().with_property(Property::message([("value", reference("ghost", "name"))])),
    ));

    let err = greeter_compiler().check(vec![flow]).unwrap_err();
    assert_eq!(err.phase, Phase::Resolve);
    assert_eq!(err.code(), "UnresolvedFlow");
    assert!(err.contains("UnresolvedNode"));

    let ErrorKind::UndefinedResource {
        reference,
        breakpoint,
        known,
    } = &err.root_cause().kind
    else {
        panic!("expected undefined resource, got {}", err.report());
    };
    assert_eq!(reference, "ghost:name");
    assert_eq!(breakpoint, "intermediate");
    assert!(known.contains(&"call_greeter".to_string()));
}

#[test]
fn undefined_path_on_known_node() {
    let flow = greet_flow().with_node(Node::intermediate(
        "shape",
        ParameterMap::new().with_property(Property::message([(
            "value",
            reference("call_greeter", "ghost"),
        )])),
    ));

    let err = greeter_compiler().check(vec![flow]).unwrap_err();
    assert!(matches!(
        &err.root_cause().kind,
        ErrorKind::UndefinedReference { path, .. } if path == "ghost"
    ));
}

#[test]
fn alias_chains_forward_to_their_end() {
    let flow = greet_flow().with_node(Node::intermediate(
        "shape",
        ParameterMap::new()
            .with_param("a", reference("b", ""))
            .with_param("b", reference("c", ""))
            .with_param("c", reference("call_greeter", "reply"))
            .with_param("self", reference("self", ""))
            .with_property(Property::message([("value", reference("a", ""))])),
    ));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    let shape = checked.flows[0].node("shape").unwrap();
    let NodeKind::Intermediate { intermediate } = &shape.kind else {
        panic!("expected intermediate");
    };

    let value = intermediate.property.as_ref().unwrap().lookup("value").unwrap();
    let resolved = value.as_reference().unwrap();
    assert_eq!(resolved.resource, "call_greeter");
    assert_eq!(resolved.path, "reply");
    assert!(shape.depends_on.contains("call_greeter"));
}

#[test]
fn input_headers_are_case_insensitive() {
    let flow = FlowGraph::flow("headers")
        .with_input(ParameterMap::new().with_header(
            "X-Request-Id",
            Property::scalar(ScalarType::String).with_default(json!("fallback")),
        ))
        .with_output(ParameterMap::new().with_property(Property::message([(
            "id",
            Property::scalar(ScalarType::String).with_default(json!("{{ input.header:x-request-ID }}")),
        )])));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    let output = checked.flows[0].output().unwrap();
    let id = output.property.as_ref().unwrap().lookup("id").unwrap();
    let reference = id.as_reference().unwrap();

    assert_eq!(reference.path, "x-request-id");
    assert_eq!(
        reference.target.as_ref().unwrap().default_value(),
        Some(&json!("fallback"))
    );
    assert!(output.depends_on.is_empty());
}

#[test]
fn on_error_reads_error_resource() {
    let on_error = OnError {
        status: Some(Property::scalar(ScalarType::Int64).with_default(json!(500))),
        message: Some(reference("error", "message")),
        ..OnError::default()
    };
    let flow = greet_flow().with_on_error(on_error);

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    let message = checked.flows[0].on_error().unwrap().message.as_ref().unwrap();
    assert!(message.as_reference().unwrap().is_resolved());
}

#[test]
fn aliases_read_the_params_of_the_node_they_pass_through() {
    let flow = greet_flow()
        .with_node(Node::intermediate(
            "b",
            ParameterMap::new()
                .with_param("p", reference("input", "name"))
                .with_property(Property::message([("value", reference("p", ""))])),
        ))
        .with_node(Node::intermediate(
            "a",
            ParameterMap::new().with_property(Property::message([("copy", reference("b", "value"))])),
        ));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    let a = checked.flows[0].node("a").unwrap();
    let NodeKind::Intermediate { intermediate } = &a.kind else {
        panic!("expected intermediate");
    };

    let copy = intermediate.property.as_ref().unwrap().lookup("copy").unwrap();
    let resolved = copy.as_reference().unwrap();
    assert_eq!((resolved.resource.as_str(), resolved.path.as_str()), ("input", "name"));
    assert!(a.depends_on.contains("b"));
}

#[test]
fn function_results_are_read_from_the_stack() {
    let flow = FlowGraph::flow("greet")
        .with_input(ParameterMap::new().with_schema("greeter.Request"))
        .with_node(Node::call(
            "call_greeter",
            CallSpec::new("greeter", "Say").with_request(ParameterMap::new().with_property(
                Property::message([(
                    "name",
                    Property::scalar(ScalarType::String)
                        .with_default(json!("{{ sprintf('%s!', strconcat(input:name, '?')) }}")),
                )]),
            )),
        ));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    let flow = &checked.flows[0];
    let keys: Vec<&str> = flow.stack().iter().map(|entry| entry.key.as_str()).collect();
    assert_eq!(keys, vec!["strconcat_0", "sprintf_1"]);

    let call = flow.node("call_greeter").unwrap().call_spec().unwrap();
    let name = call.request.as_ref().unwrap().property.as_ref().unwrap().lookup("name").unwrap();
    let resolved = name.as_reference().unwrap();
    assert_eq!(resolved.resource, "stack.sprintf_1");
    assert!(resolved.is_resolved());
}

#[test]
fn unregistered_stack_entries_are_undefined() {
    let flow = greet_flow().with_node(Node::intermediate(
        "shape",
        ParameterMap::new().with_property(Property::message([(
            "value",
            reference("stack.strconcat_0", ""),
        )])),
    ));

    let err = greeter_compiler().check(vec![flow]).unwrap_err();
    assert_eq!(err.phase, Phase::Resolve);
    assert!(err.contains("UndefinedResource"));
}
