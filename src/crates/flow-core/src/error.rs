//! Error taxonomy for the flow engine.
//!
//! Three families are kept distinct, mirroring the fact that they mean different things to a
//! caller: a [`TopologyError`] means "the graph you tried to build is not shaped the way the
//! engine requires"; an [`AssemblyError`] means "the compiler's own bookkeeping is broken" (a
//! bug, not user error); and [`FlowError::IllegalStateful`] means "this segment was declared
//! stateless but isn't".

use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout `flow-core`.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Structural errors raised synchronously while mutating the subscription graph.
///
/// These are all user-visible: each one means the caller tried to build a graph shape the engine
/// does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A node attempted to subscribe to its own output.
    #[error("self subscription on node {0}")]
    SelfSubscription(Uuid),

    /// A head segment has `szin > 1`, or a discovered tail has `szout > 1`.
    #[error("invalid segment shape: {0}")]
    InvalidShape(String),

    /// A subscriber tried to mix `Apply` ports with `Train`/`Label` ports.
    #[error("node {0} mixed apply and train/label port subscriptions")]
    PortCollision(Uuid),

    /// The same `(node, port)` pair was subscribed twice.
    #[error("double subscription of {port} on node {node}")]
    DoubleSubscription {
        /// The node whose port was subscribed twice.
        node: Uuid,
        /// Textual form of the offending port.
        port: String,
    },

    /// An already-trained node attempted to publish.
    #[error("node {0} is trained and may not publish")]
    TrainedPublishing(Uuid),

    /// A `Train`/`Label` subscription was attempted on a node that already has outgoing
    /// subscriptions.
    #[error("node {0} already publishes and cannot be trained")]
    TrainingAPublisher(Uuid),

    /// `train()` was called on a node whose builder is not stateful.
    #[error("node {0} is stateless and cannot be trained")]
    TrainingStateless(Uuid),

    /// More than one fork in a group was subscribed as trained.
    #[error("group {0} already has a trained fork")]
    ForkTrainCollision(Uuid),

    /// A traversal revisited a node it had already counted as a member.
    #[error("cyclic flow detected at node {0}")]
    CyclicFlow(Uuid),

    /// `tail()` could not resolve a unique leaf.
    #[error("ambiguous tail: {0}")]
    AmbiguousTail(String),

    /// A `Future` placeholder survived into a segment that requires full resolution.
    #[error("unresolved future node {0} left in validated segment")]
    UnresolvedFuture(Uuid),

    /// A composable term was reused in more than one `Compound`.
    #[error("composable term reused in more than one composition")]
    NonLinearComposition,

    /// `Segment::root` was given segments that do not share a common ancestor.
    #[error("unrelated segments supplied to root()")]
    UnrelatedPaths,

    /// A `Future`'s proxy table already has a registration for this publisher.
    #[error("publisher collision on future node {0}")]
    PublisherCollision(Uuid),
}

/// Programming faults surfaced while emitting the compiled symbol table.
///
/// Unlike [`TopologyError`], these indicate a bug in the compiler or in an operator's wiring, not
/// a user mistake — the compiler fails fast rather than emitting a partially-wired table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// A positional argument slot was never filled.
    #[error("missing argument at position {index} for key {key}")]
    MissingArgument {
        /// The instruction key whose argument list is incomplete.
        key: String,
        /// The unfilled position.
        index: usize,
    },

    /// A key was registered in the index more than once.
    #[error("key {0} already registered")]
    KeyCollision(String),

    /// Merging two alias keys' linkage found two non-null values at the same position.
    #[error("merge collision at position {0}")]
    MergeCollision(usize),

    /// A `Symbol` was built with a null/unresolved argument reference.
    #[error("all arguments are required to build a symbol")]
    NullArgument,
}

/// Top-level error type for `flow-core`.
#[derive(Error, Debug)]
pub enum FlowError {
    /// A structural (topology) violation, see [`TopologyError`].
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A compiler programming fault, see [`AssemblyError`].
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// A stateful node was reached on a segment declared stateless via [`crate::Stateless`].
    #[error("illegal use of stateful node {0} on a segment declared stateless")]
    IllegalStateful(Uuid),

    /// A `StateStore` operation failed while executing a compiled instruction.
    #[error("state store error: {0}")]
    Store(#[from] flow_store::StoreError),
}

impl FlowError {
    /// Build a [`FlowError::IllegalStateful`] for the given node id.
    pub fn illegal_stateful(node: Uuid) -> Self {
        Self::IllegalStateful(node)
    }
}

/// Turn a structural violation into a [`FlowError`], logging it at `warn!` first. Composition-time
/// topology errors are always raised through this path rather than a bare `.into()`, so every one
/// of them is observable without instrumenting each call site separately.
pub fn topology_err(err: TopologyError) -> FlowError {
    tracing::warn!(error = %err, "topology error");
    FlowError::Topology(err)
}
