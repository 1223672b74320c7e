//! Property-based tests over randomly generated graph shapes.
//!
//! `span::members` is supposed to hold two invariants for every graph a caller can legally
//! build: every reachable node is visited exactly once, and the returned order is a valid
//! topological order (a node never precedes something it depends on). Rather than pick a
//! handful of hand-built chains, `arb_chain_len` drives random chain lengths through the same
//! assertions many times over.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use flow_core::error::{FlowError, TopologyError};
use flow_core::node::Node;
use flow_core::port::Port;
use flow_core::span::{self, Segment};
use flow_store::{Actor, Builder, Value};

#[derive(Debug)]
struct Identity;
impl Actor for Identity {
    fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
        Ok(args[0].clone())
    }
}
#[derive(Debug)]
struct IdentityBuilder;
impl Builder for IdentityBuilder {
    fn build(&self) -> Box<dyn Actor> {
        Box::new(Identity)
    }
    fn is_stateful(&self) -> bool {
        false
    }
}

fn builder() -> Arc<dyn Builder> {
    Arc::new(IdentityBuilder)
}

/// Build a straight chain of `len` freshly-created 1-in/1-out nodes, each publishing to the
/// next, and return them in construction order (so `nodes[0]` is the head, `nodes[len - 1]` the
/// tail).
fn build_chain(len: usize) -> Vec<Node> {
    let nodes: Vec<Node> = (0..len)
        .map(|_| Node::new_worker(1, 1, builder()).unwrap())
        .collect();
    for pair in nodes.windows(2) {
        pair[0].port(0).publish(pair[1].clone(), Port::Apply(0)).unwrap();
    }
    nodes
}

proptest! {
    /// For a random chain length, `span::members` visits every node exactly once and returns a
    /// valid topological order: each node's position in the output must come after every node
    /// that publishes into it.
    #[test]
    fn prop_chain_members_are_complete_and_topologically_ordered(len in 1usize..30) {
        let chain = build_chain(len);
        let visited = span::members(&chain[0]).unwrap();

        prop_assert_eq!(visited.len(), len, "every constructed node must be visited exactly once");

        let position: HashMap<_, _> = visited
            .iter()
            .enumerate()
            .map(|(i, n)| (n.uid(), i))
            .collect();
        for pair in chain.windows(2) {
            let upstream_pos = position[&pair[0].uid()];
            let downstream_pos = position[&pair[1].uid()];
            prop_assert!(
                upstream_pos < downstream_pos,
                "upstream node must precede its subscriber in topological order"
            );
        }
    }

    /// A node can never subscribe to itself, regardless of shape.
    #[test]
    fn prop_self_subscription_always_rejected(szout in 1usize..5) {
        let node = Node::new_worker(1, szout, builder()).unwrap();
        let err = node.port(0).publish(node.clone(), Port::Apply(0)).unwrap_err();
        prop_assert!(matches!(err, FlowError::Topology(TopologyError::SelfSubscription(_))));
    }

    /// `Segment::copy` always produces a structurally identical, but node-identity-disjoint,
    /// chain: same member count, same topological order, no uid overlap with the original.
    #[test]
    fn prop_segment_copy_preserves_shape(len in 1usize..20) {
        let chain = build_chain(len);
        let seg = Segment::from_head(chain[0].clone()).unwrap();
        let copied = seg.copy().unwrap();

        let original_members = seg.members().unwrap();
        let copied_members = copied.members().unwrap();
        prop_assert_eq!(original_members.len(), copied_members.len());

        let original_uids: std::collections::HashSet<_> =
            original_members.iter().map(|n| n.uid()).collect();
        for m in &copied_members {
            prop_assert!(!original_uids.contains(&m.uid()), "copy must not reuse node identities");
        }
    }
}
