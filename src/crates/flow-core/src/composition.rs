//! The composition algebra: building a pipeline out of composable terms and lowering the result
//! into a validated, terminal [`Composition`].
//!
//! Every composable term consumes a [`Trunk`] — the apply/train/label triple of [`Segment`]s
//! threaded through the pipeline so far — and returns the trunk with its own contribution wired
//! in. Linearity (a term may appear in at most one composition) falls out of ordinary Rust
//! ownership: [`Composable::compose`] takes `self` by value, so a term already consumed cannot be
//! reused without the borrow checker rejecting the program outright. This replaces the
//! upstream design's runtime weak-reference registry with a compile-time guarantee; the one gap
//! is a composable reached through `dyn Composable` behind an `Rc` (deliberately shared,
//! e.g. a cached sub-pipeline), where reuse is still possible and is only caught by the topology
//! checks inside `compose` itself (self-subscription, double-subscription, etc.) rather than by
//! a dedicated "already used" error.

use std::collections::HashSet;
use std::sync::Arc;

use flow_store::{Builder, Gid};

use crate::error::{topology_err, FlowError, Result, TopologyError};
use crate::node::{Node, PortHandle};
use crate::span::Segment;

/// The apply/train/label triple carried between composition steps.
#[derive(Clone)]
pub struct Trunk {
    pub apply: Segment,
    pub train: Segment,
    pub label: Segment,
}

impl Trunk {
    /// A fresh trunk: all three branches are unconnected `Future` placeholders.
    pub fn origin() -> Self {
        Trunk {
            apply: Segment::singleton(Node::default_future())
                .expect("default future is always a valid 1-in/1-out segment shape"),
            train: Segment::singleton(Node::default_future())
                .expect("default future is always a valid 1-in/1-out segment shape"),
            label: Segment::singleton(Node::default_future())
                .expect("default future is always a valid 1-in/1-out segment shape"),
        }
    }

    /// This trunk's current training-features source.
    pub fn train_output(&self) -> PortHandle {
        self.train.tail.port(0)
    }

    /// This trunk's current training-labels source.
    pub fn label_output(&self) -> PortHandle {
        self.label.tail.port(0)
    }
}

/// A term in the composition algebra: something that can be wired into a [`Trunk`].
///
/// Implementors are consumed by [`compose`](Composable::compose) — this is what gives the
/// algebra its linearity (see the module documentation).
pub trait Composable: Sized {
    fn compose(self, trunk: Trunk) -> Result<Trunk>;

    /// Sequence `self` before `next`, producing a single composable standing in for both.
    fn then<B: Composable>(self, next: B) -> Compound<Self, B> {
        Compound {
            first: self,
            second: next,
        }
    }
}

/// The start of a pipeline: composing it simply hands back a fresh [`Trunk`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Origin;

impl Composable for Origin {
    fn compose(self, _trunk: Trunk) -> Result<Trunk> {
        Ok(Trunk::origin())
    }
}

/// A single worker transformation: builds one [`Node::new_worker`] of the given shape, appends it
/// to the trunk's apply branch, and — if `trainer` is set and the builder is stateful — subscribes
/// its `Train`/`Label` ports to the trunk's current train/label sources.
pub struct Operator {
    pub builder: Arc<dyn Builder>,
    pub szin: usize,
    pub szout: usize,
    pub trainer: bool,
}

impl Operator {
    /// A stateless or untrained-stateful mapper: extends only the apply branch.
    pub fn mapper(builder: Arc<dyn Builder>, szin: usize, szout: usize) -> Self {
        Operator {
            builder,
            szin,
            szout,
            trainer: false,
        }
    }

    /// A trained estimator: extends the apply branch and wires `Train`/`Label` from the trunk.
    pub fn estimator(builder: Arc<dyn Builder>, szin: usize, szout: usize) -> Self {
        Operator {
            builder,
            szin,
            szout,
            trainer: true,
        }
    }
}

impl Composable for Operator {
    fn compose(self, trunk: Trunk) -> Result<Trunk> {
        let worker = Node::new_worker(self.szin, self.szout, self.builder)?;
        if self.trainer && worker.stateful() {
            // Train a dedicated fork rather than `worker` itself: a trained node may never
            // publish (`TrainedPublishing`), but `worker` still has to extend the apply branch.
            let trainee = worker.fork();
            trainee.train(&trunk.train_output(), &trunk.label_output())?;
        }
        let apply = trunk.apply.extend(Segment::singleton(worker)?)?;
        Ok(Trunk {
            apply,
            train: trunk.train,
            label: trunk.label,
        })
    }
}

/// Two composable terms sequenced together, produced by [`Composable::then`].
pub struct Compound<A, B> {
    first: A,
    second: B,
}

impl<A: Composable, B: Composable> Composable for Compound<A, B> {
    fn compose(self, trunk: Trunk) -> Result<Trunk> {
        let mid = self.first.compose(trunk)?;
        self.second.compose(mid)
    }
}

/// Asserts that no stateful node appears in the wrapped composable's result — rejects the
/// pipeline at compose time rather than allowing state into a segment declared stateless.
pub struct Stateless<C>(pub C);

impl<C: Composable> Composable for Stateless<C> {
    fn compose(self, trunk: Trunk) -> Result<Trunk> {
        let result = self.0.compose(trunk)?;
        for node in result.apply.members()? {
            if node.stateful() {
                return Err(FlowError::illegal_stateful(node.uid()));
            }
        }
        Ok(result)
    }
}

/// A fully wired, terminal pipeline, ready for the compiler.
///
/// Only the `train` segment is checked for leftover `Future` placeholders — label and apply are
/// left unvalidated here, matching the upstream validator's scope exactly rather than "fixing"
/// what reads like an inconsistency; see the design notes.
pub struct Composition {
    pub apply: Segment,
    pub train: Segment,
    pub label: Segment,
}

impl Composition {
    /// Finalize `trunk` into a terminal composition, rejecting unresolved `Future`s on the train
    /// branch. The label branch is retained (the compiler needs its node chain to resolve a
    /// trainee's `Label` input) but, matching the upstream validator's scope exactly, is not
    /// itself checked for leftover `Future`s here.
    pub fn new(trunk: Trunk) -> Result<Composition> {
        for node in trunk.train.members()? {
            if node.is_future() {
                return Err(topology_err(TopologyError::UnresolvedFuture(node.uid())));
            }
        }
        Ok(Composition {
            apply: trunk.apply,
            train: trunk.train,
            label: trunk.label,
        })
    }

    /// Group identities of every stateful worker reachable on the apply branch — the set the
    /// compiler must wire a `Loader`/`Dumper`/`Committer` for.
    pub fn persistent(&self) -> Result<HashSet<Gid>> {
        Ok(self
            .apply
            .members()?
            .iter()
            .filter(|n| n.stateful())
            .filter_map(Node::gid)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::{Actor, Value};

    #[derive(Debug)]
    struct Stub {
        stateful: bool,
    }
    impl Actor for Stub {
        fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
            Ok(args[0].clone())
        }
        fn is_stateful(&self) -> bool {
            self.stateful
        }
    }
    #[derive(Debug)]
    struct StubBuilder {
        stateful: bool,
    }
    impl Builder for StubBuilder {
        fn build(&self) -> Box<dyn Actor> {
            Box::new(Stub {
                stateful: self.stateful,
            })
        }
        fn is_stateful(&self) -> bool {
            self.stateful
        }
    }
    fn mapper_builder() -> Arc<dyn Builder> {
        Arc::new(StubBuilder { stateful: false })
    }
    fn estimator_builder() -> Arc<dyn Builder> {
        Arc::new(StubBuilder { stateful: true })
    }

    #[test]
    fn origin_then_mapper_extends_apply() {
        let trunk = Origin.then(Operator::mapper(mapper_builder(), 1, 1)).compose(Trunk::origin()).unwrap();
        assert_eq!(trunk.apply.members().unwrap().len(), 1);
    }

    #[test]
    fn estimator_wires_train_and_label() {
        let pipeline = Origin
            .then(Operator::estimator(estimator_builder(), 1, 1));
        let trunk = pipeline.compose(Trunk::origin()).unwrap();
        let estimator = trunk.apply.tail.clone();
        // The apply-branch fork itself stays untrained — a trained node may never publish — but
        // a sibling fork in the same group carries the Train/Label subscriptions.
        assert!(!estimator.trained());
        assert!(estimator.group().unwrap().members().iter().any(Node::trained));
    }

    #[test]
    fn composition_rejects_unresolved_future_on_train_branch() {
        let trunk = Origin.compose(Trunk::origin()).unwrap();
        let err = Composition::new(trunk).unwrap_err();
        assert!(matches!(err, FlowError::Topology(TopologyError::UnresolvedFuture(_))));
    }

    #[test]
    fn stateless_wrapper_rejects_stateful_node() {
        let pipeline = Stateless(Origin.then(Operator::estimator(estimator_builder(), 1, 1)));
        let err = pipeline.compose(Trunk::origin()).unwrap_err();
        assert!(matches!(err, FlowError::IllegalStateful(_)));
    }

    #[test]
    fn persistent_collects_stateful_gids() {
        let trunk = Origin
            .then(Operator::estimator(estimator_builder(), 1, 1))
            .compose(Trunk::origin())
            .unwrap();
        // Resolve the still-open train/label futures directly so the composition validates.
        let features = Node::new_worker(1, 1, mapper_builder()).unwrap();
        let labels = Node::new_worker(1, 1, mapper_builder()).unwrap();
        let trunk = Trunk {
            apply: trunk.apply,
            train: Segment::from_head(features).unwrap(),
            label: Segment::from_head(labels).unwrap(),
        };
        let composed = Composition::new(trunk).unwrap();
        assert_eq!(composed.persistent().unwrap().len(), 1);
    }
}
