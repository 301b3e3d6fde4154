//! Integration tests for dependency graph construction and ordering.

#[allow(dead_code)]
mod helpers;

use flow_compiler::parse::{FlowGraph, Node, ParameterMap, Property};
use flow_compiler::{ErrorKind, Phase};
use helpers::*;

fn intermediate(id: &str) -> Node {
    Node::intermediate(id, ParameterMap::new())
}

#[test]
fn synthetic_cycle_is_rejected() {
    let flow = FlowGraph::flow("loop")
        .with_node(intermediate("a").depends_on(["b"]))
        .with_node(intermediate("b").depends_on(["a"]));

    let err = greeter_compiler().check(vec![flow]).unwrap_err();
    assert_eq!(err.phase, Phase::Dependencies);
    assert_eq!(
        err.kind,
        ErrorKind::CircularDependency {
            flow: "loop".into(),
            node: "a".into(),
            dependency: "b".into()
        }
    );
}

#[test]
fn inferred_and_explicit_dependencies_order_nodes() {
    let flow = FlowGraph::flow("greet")
        .with_input(ParameterMap::new().with_schema("greeter.Request"))
        .with_node(intermediate("summary").depends_on(["audit"]))
        .with_node(Node::intermediate(
            "audit",
            ParameterMap::new().with_property(Property::message([(
                "reply",
                reference("call_greeter", "reply"),
            )])),
        ))
        .with_node(say("call_greeter"));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    let order = checked.plans[0].ordered_ids(&checked.flows[0]);
    assert_eq!(order, vec!["call_greeter", "audit", "summary"]);

    // every node runs after all of its dependencies
    for (position, id) in order.iter().enumerate() {
        let node = checked.flows[0].node(id).unwrap();
        for dependency in &node.depends_on {
            let at = order.iter().position(|other| other == dependency).unwrap();
            assert!(at < position, "{} runs before {}", id, dependency);
        }
    }
}

#[test]
fn independent_nodes_keep_declaration_order() {
    let flow = FlowGraph::flow("f")
        .with_node(intermediate("c"))
        .with_node(intermediate("a"))
        .with_node(intermediate("b"));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    assert_eq!(
        checked.plans[0].ordered_ids(&checked.flows[0]),
        vec!["c", "a", "b"]
    );
}

#[test]
fn condition_children_wait_for_the_condition() {
    let flow = greet_flow()
        .with_node(intermediate("greeted"))
        .with_node(Node::condition(
            "gate",
            "{{ call_greeter:reply }} != 'nope' && !false",
            ["greeted"],
        ));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    assert_eq!(
        checked.plans[0].ordered_ids(&checked.flows[0]),
        vec!["call_greeter", "gate", "greeted"]
    );
    assert!(checked.flows[0].node("greeted").unwrap().depends_on.contains("gate"));
}

#[test]
fn unknown_explicit_dependency() {
    let flow = FlowGraph::flow("f").with_node(intermediate("a").depends_on(["nope"]));

    let err = greeter_compiler().check(vec![flow]).unwrap_err();
    assert_eq!(err.code(), "UnresolvedNode");
    assert!(err.contains("UnknownDependency"));
}

#[test]
fn self_dependency_is_dropped() {
    let flow = FlowGraph::flow("f").with_node(intermediate("a").depends_on(["a"]));

    let checked = greeter_compiler().check(vec![flow]).unwrap();
    assert!(checked.flows[0].nodes()[0].depends_on.is_empty());
}
