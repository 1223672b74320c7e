//! Port identifiers and subscriptions — the typed endpoints nodes connect through.
//!
//! A [`Port`] names *what* a node consumes (the i-th apply lane, or the singleton train/label
//! lanes); a [`Subscription`] names *who* consumes it. Both are plain values — the structural
//! invariants that constrain which combinations are legal live on [`crate::node::NodeData`],
//! which records, per node, the set of ports currently subscribed on it (see
//! `NodeData::subscribed_ports`, the scoped stand-in for the process-wide registry described in
//! the design notes).

use std::fmt;

use crate::node::Node;

/// A tagged endpoint on a node.
///
/// `Train` and `Label` are singletons: every `Port::Train` compares equal to every other, exactly
/// as the data model requires ("two `Train` values compare equal and hash equal") — a unit-like
/// enum variant gives this for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// The `i`-th data (apply) lane, input or output.
    Apply(usize),
    /// The singleton training-features input.
    Train,
    /// The singleton training-labels input.
    Label,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Apply(i) => write!(f, "apply[{i}]"),
            Port::Train => write!(f, "train"),
            Port::Label => write!(f, "label"),
        }
    }
}

impl Port {
    /// Whether this port belongs to the apply family (as opposed to train/label).
    pub fn is_apply(&self) -> bool {
        matches!(self, Port::Apply(_))
    }
}

/// A single edge: `subscriber` consumes `port` from whatever publishes to it.
///
/// Equality and hashing are defined over `(subscriber node identity, port)` rather than deriving
/// structurally, since [`Node`]'s own `PartialEq` has shape-comparison semantics that would be
/// wrong here — two distinct subscriptions to the same shape of node must not collapse into one.
#[derive(Clone)]
pub struct Subscription {
    /// The node that consumes this port.
    pub subscriber: Node,
    /// Which port on the subscriber this subscription fills.
    pub port: Port,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber", &self.subscriber.uid())
            .field("port", &self.port)
            .finish()
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.subscriber.uid() == other.subscriber.uid() && self.port == other.port
    }
}
impl Eq for Subscription {}

impl std::hash::Hash for Subscription {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.subscriber.uid().hash(state);
        self.port.hash(state);
    }
}
