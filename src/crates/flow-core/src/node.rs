//! Graph node entities: [`Worker`](NodeKind::Worker) and [`Future`](NodeKind::Future).
//!
//! Output ports: apply (multi-port). Input ports: apply (multi-port), train, label.
//!
//! Each input port can have at most one publisher. Apply and train/label input subscriptions are
//! mutually exclusive on a given subscriber. A trained node can never publish.
//!
//! A [`Node`] is a cheap, `Clone`-able handle (`Rc<RefCell<NodeData>>`) around shared, mutable
//! graph state — the graph is built incrementally on a single thread (see the crate's
//! concurrency notes), so interior mutability through `RefCell` is the natural fit, matching how
//! the upstream model treats nodes as mutable, identity-bearing objects rather than immutable
//! values.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use uuid::Uuid;

use flow_store::{Builder, Gid};

use crate::error::{topology_err, FlowError, Result, TopologyError};
use crate::port::{Port, Subscription};

/// Shared, reference-counted state for all forks of one [`Builder`].
///
/// Every `Worker` created from the same builder (directly, or via [`Node::fork`]) shares one
/// `Group`; the group outlives any single fork as long as at least one fork is still reachable.
pub struct Group {
    /// Stable identity shared by every fork in this group.
    pub gid: Gid,
    /// The factory every fork in this group was built from.
    pub builder: Arc<dyn Builder>,
    forks: RefCell<Vec<Weak<RefCell<NodeData>>>>,
}

impl Group {
    fn new(builder: Arc<dyn Builder>) -> Rc<Group> {
        Rc::new(Group {
            gid: Gid::new(),
            builder,
            forks: RefCell::new(Vec::new()),
        })
    }

    fn register(&self, node: &Rc<RefCell<NodeData>>) {
        self.forks.borrow_mut().push(Rc::downgrade(node));
    }

    /// All forks of this group that are still reachable.
    pub fn members(&self) -> Vec<Node> {
        self.forks
            .borrow()
            .iter()
            .filter_map(|w| w.upgrade().map(Node))
            .collect()
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group[gid={}]", self.gid)
    }
}

/// Worker-specific node state: a reference to the shared [`Group`].
pub struct WorkerData {
    pub group: Rc<Group>,
}

/// Future-specific node state: at most one registered real upstream publisher per input lane.
///
/// Once a lane has both a registered publisher and a pending subscriber, the pair collapses
/// immediately (see [`Node::future_collapse`]) — subscriptions are transferred directly onto the
/// real publisher and the future retains no trace of them. This is a deliberate simplification of
/// the proxy-table design: rather than leaving stale entries on the future for later traversals
/// to skip, collapse removes them from the live graph entirely, so ordinary output-scanning
/// traversal (used for both node kinds) never has to special-case a collapsed future.
pub struct FutureData {
    publishers: Vec<Option<(Weak<RefCell<NodeData>>, usize)>>,
}

/// The node kind: a stateful [`Worker`](WorkerData) or a transparent [`Future`](FutureData)
/// placeholder.
pub enum NodeKind {
    Worker(WorkerData),
    Future(FutureData),
}

/// Shared mutable state behind every [`Node`] handle.
pub struct NodeData {
    pub uid: Uuid,
    pub szin: usize,
    /// One ordered subscription list per output port.
    pub outputs: Vec<Vec<Subscription>>,
    /// The ports currently subscribed on this node's *input* side — the scoped stand-in for the
    /// "process-wide subscription registry" described in the design notes: rather than a
    /// separate global map keyed by node identity, the set lives directly on the node it
    /// describes, which is just as synchronous and invariant-enforcing without extra global
    /// state (see DESIGN.md).
    pub subscribed_ports: HashSet<Port>,
    pub kind: NodeKind,
}

/// A primitive task-graph vertex: either a [`Worker`](NodeKind::Worker) bound to an actor builder,
/// or a transparent [`Future`](NodeKind::Future) placeholder.
#[derive(Clone)]
pub struct Node(pub(crate) Rc<RefCell<NodeData>>);

fn validate_shape(szin: usize, szout: usize) -> Result<()> {
    if szin == 0 && szout == 0 {
        return Err(topology_err(TopologyError::InvalidShape(
            "szin and szout must not both be zero".into(),
        )));
    }
    Ok(())
}

fn validate_port_addition(existing: &HashSet<Port>, candidate: Port, node_uid: Uuid) -> Result<()> {
    if existing.contains(&candidate) {
        return Err(topology_err(TopologyError::DoubleSubscription {
            node: node_uid,
            port: candidate.to_string(),
        }));
    }
    let stays_apply_only = candidate.is_apply() && existing.iter().all(Port::is_apply);
    let stays_train_label_only = !candidate.is_apply() && existing.iter().all(|p| !p.is_apply());
    if !(stays_apply_only || stays_train_label_only) {
        return Err(topology_err(TopologyError::PortCollision(node_uid)));
    }
    Ok(())
}

impl Node {
    /// Create a fresh `Worker`, allocating a new [`Group`] for it.
    pub fn new_worker(szin: usize, szout: usize, builder: Arc<dyn Builder>) -> Result<Node> {
        validate_shape(szin, szout)?;
        let group = Group::new(builder);
        let node = Node(Rc::new(RefCell::new(NodeData {
            uid: Uuid::new_v4(),
            szin,
            outputs: vec![Vec::new(); szout],
            subscribed_ports: HashSet::new(),
            kind: NodeKind::Worker(WorkerData {
                group: group.clone(),
            }),
        })));
        group.register(&node.0);
        Ok(node)
    }

    /// Create a new `Worker` fork within an existing group: same builder, same `gid`, fresh
    /// `uid` and no subscriptions.
    pub fn fork_in_group(group: &Rc<Group>, szin: usize, szout: usize) -> Result<Node> {
        validate_shape(szin, szout)?;
        let node = Node(Rc::new(RefCell::new(NodeData {
            uid: Uuid::new_v4(),
            szin,
            outputs: vec![Vec::new(); szout],
            subscribed_ports: HashSet::new(),
            kind: NodeKind::Worker(WorkerData {
                group: group.clone(),
            }),
        })));
        group.register(&node.0);
        Ok(node)
    }

    /// Create a new transparent `Future` placeholder of the given shape.
    pub fn new_future(szin: usize, szout: usize) -> Result<Node> {
        validate_shape(szin, szout)?;
        Ok(Node(Rc::new(RefCell::new(NodeData {
            uid: Uuid::new_v4(),
            szin,
            outputs: vec![Vec::new(); szout],
            subscribed_ports: HashSet::new(),
            kind: NodeKind::Future(FutureData {
                publishers: vec![None; szin],
            }),
        }))))
    }

    /// The default 1-in/1-out `Future`, used wherever a [`crate::composition::Trunk`] segment is
    /// left unspecified.
    pub fn default_future() -> Node {
        Self::new_future(1, 1).expect("1-in/1-out is always a valid shape")
    }

    /// A lazy sequence producing an initial `Worker` followed by indefinitely many forks of it.
    pub fn fork_generator(
        szin: usize,
        szout: usize,
        builder: Arc<dyn Builder>,
    ) -> impl Iterator<Item = Node> {
        let mut group: Option<Rc<Group>> = None;
        std::iter::from_fn(move || {
            let node = match &group {
                None => Node::new_worker(szin, szout, builder.clone())
                    .expect("fgen shape validated by caller on first use"),
                Some(g) => Node::fork_in_group(g, szin, szout)
                    .expect("fork shares shape with its first-generation ancestor"),
            };
            group = node.group();
            Some(node)
        })
    }

    /// Stable node identity.
    pub fn uid(&self) -> Uuid {
        self.0.borrow().uid
    }

    /// Input arity.
    pub fn szin(&self) -> usize {
        self.0.borrow().szin
    }

    /// Output apply-port width.
    pub fn szout(&self) -> usize {
        self.0.borrow().outputs.len()
    }

    /// Whether this node is a `Future` placeholder.
    pub fn is_future(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Future(_))
    }

    /// A handle to output/input lane `index`, giving access to the `Publishable`/`Subscriptable`
    /// capabilities described in the port design.
    pub fn port(&self, index: usize) -> PortHandle {
        PortHandle {
            node: self.clone(),
            index,
        }
    }

    /// The set of ports currently subscribed on this node's input side.
    pub fn input_ports(&self) -> HashSet<Port> {
        self.0.borrow().subscribed_ports.clone()
    }

    /// Whether any input port is `Train` or `Label`.
    pub fn trained(&self) -> bool {
        self.0
            .borrow()
            .subscribed_ports
            .iter()
            .any(|p| !p.is_apply())
    }

    /// Whether this node's builder declares stateful actors. Always `false` for a `Future`.
    pub fn stateful(&self) -> bool {
        match &self.0.borrow().kind {
            NodeKind::Worker(w) => w.group.builder.is_stateful(),
            NodeKind::Future(_) => false,
        }
    }

    /// This node's group identity, if it is a `Worker`.
    pub fn gid(&self) -> Option<Gid> {
        match &self.0.borrow().kind {
            NodeKind::Worker(w) => Some(w.group.gid),
            NodeKind::Future(_) => None,
        }
    }

    /// This node's group, if it is a `Worker`.
    pub fn group(&self) -> Option<Rc<Group>> {
        match &self.0.borrow().kind {
            NodeKind::Worker(w) => Some(w.group.clone()),
            NodeKind::Future(_) => None,
        }
    }

    /// Stateful, not itself trained, but a sibling fork in the same group is — i.e. this fork
    /// reads state produced elsewhere in its group at run time.
    pub fn derived(&self) -> bool {
        if !self.stateful() || self.trained() {
            return false;
        }
        match self.group() {
            Some(g) => g
                .members()
                .iter()
                .any(|n| n.uid() != self.uid() && n.trained()),
            None => false,
        }
    }

    /// Create a new node with the same shape and (for a `Worker`) the same group, but no
    /// subscriptions.
    pub fn fork(&self) -> Node {
        let (szin, szout, kind_is_worker, group) = {
            let data = self.0.borrow();
            let group = match &data.kind {
                NodeKind::Worker(w) => Some(w.group.clone()),
                NodeKind::Future(_) => None,
            };
            (data.szin, data.outputs.len(), matches!(data.kind, NodeKind::Worker(_)), group)
        };
        if kind_is_worker {
            Node::fork_in_group(&group.expect("worker always has a group"), szin, szout)
                .expect("forked shape matches original, which was already validated")
        } else {
            Node::new_future(szin, szout).expect("forked shape matches original")
        }
    }

    /// Subscribe this node's `Train` and `Label` ports to `train_pub`/`label_pub`.
    ///
    /// Fails if this node is stateless, if any fork in its group is already trained, or if
    /// either publisher is itself a trained (and therefore publish-forbidden) node.
    pub fn train(&self, train_pub: &PortHandle, label_pub: &PortHandle) -> Result<()> {
        if !self.stateful() {
            return Err(topology_err(TopologyError::TrainingStateless(self.uid())));
        }
        if let Some(g) = self.group() {
            if g.members().iter().any(|f| f.trained()) {
                return Err(topology_err(TopologyError::ForkTrainCollision(g.gid.0)));
            }
        }
        train_pub.publish(self.clone(), Port::Train)?;
        label_pub.publish(self.clone(), Port::Label)?;
        Ok(())
    }

    /// Whether `self` appears anywhere as a subscriber in `publisher`'s output subscription
    /// lists. Collapsed futures leave no trace to special-case here (see [`FutureData`]).
    pub fn subscribed_to(&self, publisher: &Node) -> bool {
        publisher
            .0
            .borrow()
            .outputs
            .iter()
            .any(|subs| subs.iter().any(|s| s.subscriber.uid() == self.uid()))
    }

    /// Snapshot of this node's output subscription lists, one `Vec` per output port.
    pub fn outputs(&self) -> Vec<Vec<Subscription>> {
        self.0.borrow().outputs.clone()
    }

    /// Low-level: append `subscription` to output lane `index`, enforcing the structural
    /// invariants, and (for a `Future`) attempt to collapse it immediately.
    fn publish_raw(&self, index: usize, subscription: Subscription) -> Result<()> {
        if self.uid() == subscription.subscriber.uid() {
            return Err(topology_err(TopologyError::SelfSubscription(self.uid())));
        }
        if !self.is_future() && self.trained() {
            return Err(topology_err(TopologyError::TrainedPublishing(self.uid())));
        }
        if !subscription.port.is_apply() {
            let already_publishes = subscription
                .subscriber
                .0
                .borrow()
                .outputs
                .iter()
                .any(|o| !o.is_empty());
            if already_publishes {
                return Err(topology_err(TopologyError::TrainingAPublisher(subscription.subscriber.uid())));
            }
        }
        {
            let mut sub_data = subscription.subscriber.0.borrow_mut();
            validate_port_addition(&sub_data.subscribed_ports, subscription.port, subscription.subscriber.uid())?;
            sub_data.subscribed_ports.insert(subscription.port);
        }
        let is_future = self.is_future();
        {
            let mut data = self.0.borrow_mut();
            data.outputs[index].push(subscription);
        }
        if is_future {
            self.future_collapse(index)?;
        }
        Ok(())
    }

    /// Register `publisher`'s output lane `pub_idx` as the real upstream source for this
    /// future's lane `index`, then collapse any subscribers already waiting there.
    fn future_register_publisher(&self, index: usize, publisher: &Node, pub_idx: usize) -> Result<()> {
        {
            let mut data = self.0.borrow_mut();
            match &mut data.kind {
                NodeKind::Future(f) => {
                    if f.publishers[index].is_some() {
                        return Err(topology_err(TopologyError::PublisherCollision(self.uid())));
                    }
                    f.publishers[index] = Some((Rc::downgrade(&publisher.0), pub_idx));
                }
                NodeKind::Worker(_) => unreachable!("future_register_publisher called on a Worker"),
            }
        }
        self.future_collapse(index)
    }

    /// If lane `index` now has both a registered publisher and pending subscribers, transfer the
    /// subscriptions directly onto the real publisher, removing this future from the live graph
    /// for that lane.
    fn future_collapse(&self, index: usize) -> Result<()> {
        let registered = {
            let data = self.0.borrow();
            match &data.kind {
                NodeKind::Future(f) => f.publishers[index].clone(),
                NodeKind::Worker(_) => None,
            }
        };
        let Some((weak_pub, pub_idx)) = registered else {
            return Ok(());
        };
        let Some(pub_rc) = weak_pub.upgrade() else {
            return Ok(());
        };
        let pending: Vec<Subscription> = {
            let mut data = self.0.borrow_mut();
            std::mem::take(&mut data.outputs[index])
        };
        let pub_node = Node(pub_rc);
        for sub in pending {
            pub_node.publish_raw(pub_idx, sub)?;
        }
        Ok(())
    }
}

impl PartialEq for Node {
    /// If the two nodes are of different kinds, equality falls back to comparing their output
    /// subscription shape (so a `Future` can stand in as a placeholder for the eventual
    /// `Worker` it gets replaced by); otherwise equality is identity.
    fn eq(&self, other: &Self) -> bool {
        let a = self.0.borrow();
        let b = other.0.borrow();
        let same_class = matches!(
            (&a.kind, &b.kind),
            (NodeKind::Worker(_), NodeKind::Worker(_)) | (NodeKind::Future(_), NodeKind::Future(_))
        );
        if same_class {
            drop(a);
            drop(b);
            Rc::ptr_eq(&self.0, &other.0)
        } else {
            a.outputs.len() == b.outputs.len()
                && a.outputs.iter().any(|o| !o.is_empty())
                && a.outputs.iter().zip(b.outputs.iter()).all(|(x, y)| x == y)
        }
    }
}
impl Eq for Node {}

impl std::hash::Hash for Node {
    /// Hashes purely by shape `(szin, szout)` so a `Future` hashes identically to a `Worker` of
    /// matching shape — required for the cross-variant equality above to be consistent with
    /// `Hash`.
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let n = self.0.borrow();
        n.szin.hash(state);
        n.outputs.len().hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.borrow();
        match &n.kind {
            NodeKind::Worker(w) => write!(f, "Worker[uid={}, gid={}]", n.uid, w.group.gid),
            NodeKind::Future(_) => write!(f, "Future[uid={}]", n.uid),
        }
    }
}

/// A `(node, index)` handle exposing the `Publishable`/`Subscriptable`/`PubSub` capabilities of a
/// single port lane.
#[derive(Clone)]
pub struct PortHandle {
    pub node: Node,
    pub index: usize,
}

impl PortHandle {
    pub fn new(node: Node, index: usize) -> Self {
        Self { node, index }
    }

    /// *Publishable* view: publish this lane as the source for `subscriber`'s `port`.
    pub fn publish(&self, subscriber: Node, port: Port) -> Result<()> {
        self.node.publish_raw(self.index, Subscription { subscriber, port })
    }

    /// *Subscriptable* view: register `publisher` as the upstream source for this lane.
    ///
    /// When `self.node` is a `Future`, this is the proxy registration described in
    /// [`FutureData`]; otherwise it is equivalent to `publisher` publishing `Apply(self.index)`
    /// directly to `self.node`.
    pub fn subscribe(&self, publisher: &PortHandle) -> Result<()> {
        if self.node.is_future() {
            self.node
                .future_register_publisher(self.index, &publisher.node, publisher.index)
        } else {
            publisher.publish(self.node.clone(), Port::Apply(self.index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::Actor;

    #[derive(Debug)]
    struct StubBuilder {
        stateful: bool,
    }
    impl Builder for StubBuilder {
        fn build(&self) -> Box<dyn Actor> {
            unimplemented!("not exercised by these structural tests")
        }
        fn is_stateful(&self) -> bool {
            self.stateful
        }
    }

    fn stateful_builder() -> Arc<dyn Builder> {
        Arc::new(StubBuilder { stateful: true })
    }
    fn stateless_builder() -> Arc<dyn Builder> {
        Arc::new(StubBuilder { stateful: false })
    }

    #[test]
    fn self_subscription_rejected() {
        let w = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let err = w.port(0).publish(w.clone(), Port::Apply(0)).unwrap_err();
        assert!(matches!(err, FlowError::Topology(TopologyError::SelfSubscription(_))));
    }

    #[test]
    fn double_subscription_rejected() {
        let a = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let b = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let c = Node::new_worker(1, 1, stateless_builder()).unwrap();
        a.port(0).publish(b.clone(), Port::Apply(0)).unwrap();
        let err = c.port(0).publish(b, Port::Apply(0)).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Topology(TopologyError::DoubleSubscription { .. })
        ));
    }

    #[test]
    fn mixing_apply_and_train_rejected() {
        let upstream = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let trainer = Node::new_worker(1, 1, stateful_builder()).unwrap();
        upstream.port(0).publish(trainer.clone(), Port::Apply(0)).unwrap();
        let labels = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let err = labels.port(0).publish(trainer, Port::Train).unwrap_err();
        assert!(matches!(err, FlowError::Topology(TopologyError::PortCollision(_))));
    }

    #[test]
    fn trained_node_cannot_publish() {
        let features = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let labels = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let trainee = Node::new_worker(1, 1, stateful_builder()).unwrap();
        trainee.train(&features.port(0), &labels.port(0)).unwrap();
        let downstream = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let err = trainee.port(0).publish(downstream, Port::Apply(0)).unwrap_err();
        assert!(matches!(err, FlowError::Topology(TopologyError::TrainedPublishing(_))));
    }

    #[test]
    fn train_on_stateless_node_rejected() {
        let a = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let b = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let target = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let err = target.train(&a.port(0), &b.port(0)).unwrap_err();
        assert!(matches!(err, FlowError::Topology(TopologyError::TrainingStateless(_))));
    }

    #[test]
    fn second_fork_trained_rejected() {
        let features = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let labels = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let w1 = Node::new_worker(1, 1, stateful_builder()).unwrap();
        let w2 = w1.fork();
        w1.train(&features.port(0), &labels.port(0)).unwrap();
        let err = w2.train(&features.port(0), &labels.port(0)).unwrap_err();
        assert!(matches!(err, FlowError::Topology(TopologyError::ForkTrainCollision(_))));
    }

    #[test]
    fn derived_fork_reflects_sibling_training() {
        let features = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let labels = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let w1 = Node::new_worker(1, 1, stateful_builder()).unwrap();
        let w2 = w1.fork();
        assert!(!w2.derived());
        w1.train(&features.port(0), &labels.port(0)).unwrap();
        assert!(w2.derived());
        assert!(!w1.derived(), "the trained fork itself is not derived");
    }

    #[test]
    fn future_collapses_on_connection() {
        let upstream = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let downstream = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let future = Node::default_future();
        // downstream subscribes through the future first (future as publisher, pending).
        future.port(0).publish(downstream.clone(), Port::Apply(0)).unwrap();
        // then the real upstream publisher is registered on the future's input lane.
        future.port(0).subscribe(&upstream.port(0)).unwrap();
        assert!(downstream.subscribed_to(&upstream));
        assert!(future.outputs()[0].is_empty(), "future retains no trace after collapse");
    }

    #[test]
    fn node_eq_cross_variant_by_shape() {
        let worker = Node::new_worker(1, 1, stateless_builder()).unwrap();
        let future = Node::new_future(1, 1).unwrap();
        let sink = Node::new_worker(1, 1, stateless_builder()).unwrap();
        worker.port(0).publish(sink.clone(), Port::Apply(0)).unwrap();
        future.port(0).publish(sink, Port::Apply(0)).unwrap();
        assert_eq!(worker, future);
    }
}
