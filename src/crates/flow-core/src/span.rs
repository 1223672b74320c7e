//! Segment traversal: turning a wired head node into an ordered, acyclic member list, and
//! combining segments end to end.
//!
//! A [`Segment`] is the structural unit a [`crate::composition::Composable`] produces: a `head`
//! node to subscribe new upstream publishers into, and a `tail` node new downstream subscribers
//! attach to. Everything in between is discovered by walking `Apply` subscriptions outward from
//! `head` — nobody has to hand the traversal a member list up front.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{topology_err, Result, TopologyError};
use crate::node::Node;

/// Depth-first walk over `Apply` subscriptions starting at `head`, returning every reachable node
/// in post-order (so `head` is last). Detects cycles via an explicit on-stack set rather than
/// relying on the visited set alone, since a visited-only check cannot distinguish "already fully
/// explored" from "currently being explored" (the latter is a cycle).
pub fn members(head: &Node) -> Result<Vec<Node>> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    visit(head, &mut order, &mut visited, &mut on_stack)?;
    Ok(order)
}

fn visit(
    node: &Node,
    order: &mut Vec<Node>,
    visited: &mut HashSet<Uuid>,
    on_stack: &mut HashSet<Uuid>,
) -> Result<()> {
    if on_stack.contains(&node.uid()) {
        return Err(topology_err(TopologyError::CyclicFlow(node.uid())));
    }
    if visited.contains(&node.uid()) {
        return Ok(());
    }
    on_stack.insert(node.uid());
    for subs in node.outputs() {
        for sub in subs {
            if sub.port.is_apply() {
                visit(&sub.subscriber, order, visited, on_stack)?;
            }
        }
    }
    on_stack.remove(&node.uid());
    visited.insert(node.uid());
    order.push(node.clone());
    Ok(())
}

/// Nodes among `members` that publish no further `Apply` subscriptions — candidates for a
/// segment's tail.
pub fn mappers(members: &[Node]) -> Vec<Node> {
    members
        .iter()
        .filter(|n| {
            n.outputs()
                .iter()
                .all(|subs| subs.iter().all(|s| !s.port.is_apply()))
        })
        .cloned()
        .collect()
}

/// The single leaf apply node reachable from `head`, or an error if there is not exactly one.
pub fn tail(head: &Node) -> Result<Node> {
    let all = members(head)?;
    let mut leaves = mappers(&all);
    match leaves.len() {
        1 => Ok(leaves.remove(0)),
        0 => Err(topology_err(TopologyError::AmbiguousTail("no leaf apply node reachable from head".into()))),
        n => Err(topology_err(TopologyError::AmbiguousTail(format!("{n} candidate tail nodes reachable from head")))),
    }
}

/// A head must expose at most one inbound lane: a segment is wired into a pipeline through a
/// single upstream connection point, never fanned in from the outside.
fn check_head(node: &Node) -> Result<()> {
    if node.szin() > 1 {
        return Err(topology_err(TopologyError::InvalidShape(format!(
            "segment head {} has szin={}, want at most 1",
            node.uid(),
            node.szin()
        ))));
    }
    Ok(())
}

/// A tail must expose at most one outbound lane: the single downstream connection point the next
/// segment extends onto.
fn check_tail(node: &Node) -> Result<()> {
    if node.szout() > 1 {
        return Err(topology_err(TopologyError::InvalidShape(format!(
            "segment tail {} has szout={}, want at most 1",
            node.uid(),
            node.szout()
        ))));
    }
    Ok(())
}

/// A wired, acyclic chain of apply nodes: attach new upstream publishers to `head`'s input ports,
/// attach new downstream subscribers to `tail`'s output ports.
#[derive(Clone)]
pub struct Segment {
    pub head: Node,
    pub tail: Node,
}

impl Segment {
    /// A segment consisting of exactly one node.
    pub fn singleton(node: Node) -> Result<Self> {
        check_head(&node)?;
        check_tail(&node)?;
        Ok(Segment {
            head: node.clone(),
            tail: node,
        })
    }

    /// Build a segment by discovering its tail from `head`.
    pub fn from_head(head: Node) -> Result<Self> {
        check_head(&head)?;
        let t = tail(&head)?;
        check_tail(&t)?;
        Ok(Segment { head, tail: t })
    }

    /// All nodes reachable from this segment's head, in post-order.
    pub fn members(&self) -> Result<Vec<Node>> {
        members(&self.head)
    }

    /// Wire `next`'s head to this segment's tail (subscribing each of `next.head`'s input ports
    /// to the matching output port of `self.tail`), producing a combined segment.
    pub fn extend(self, next: Segment) -> Result<Segment> {
        for i in 0..next.head.szin() {
            next.head.port(i).subscribe(&self.tail.port(i))?;
        }
        Ok(Segment {
            head: self.head,
            tail: next.tail,
        })
    }

    /// The shared head of a set of segments that all originate from the same node.
    ///
    /// This is a deliberate narrowing of the general "lowest common ancestor" search: it accepts
    /// only the common case needed by the composition algebra (several segments built directly
    /// off one shared head) and rejects anything else as [`TopologyError::UnrelatedPaths`] rather
    /// than searching upward through arbitrary fork structures.
    pub fn root(segments: &[Segment]) -> Result<Node> {
        let first = segments
            .first()
            .ok_or_else(|| topology_err(TopologyError::UnrelatedPaths))?;
        if segments.iter().all(|s| s.head.uid() == first.head.uid()) {
            Ok(first.head.clone())
        } else {
            Err(topology_err(TopologyError::UnrelatedPaths))
        }
    }

    /// Duplicate every member of this segment (as a fresh [`Node::fork`]) and re-wire the copies
    /// with the same subscription shape, leaving the original segment untouched.
    pub fn copy(&self) -> Result<Segment> {
        let original = self.members()?;
        let mut mapping: HashMap<Uuid, Node> = HashMap::new();
        for m in &original {
            mapping.insert(m.uid(), m.fork());
        }
        for m in &original {
            let new_src = mapping.get(&m.uid()).expect("just inserted").clone();
            for (idx, subs) in m.outputs().into_iter().enumerate() {
                for sub in subs {
                    if let Some(new_dst) = mapping.get(&sub.subscriber.uid()).cloned() {
                        new_src.port(idx).publish(new_dst, sub.port)?;
                    }
                }
            }
        }
        Ok(Segment {
            head: mapping[&self.head.uid()].clone(),
            tail: mapping[&self.tail.uid()].clone(),
        })
    }
}
