//! Boundary traits between the flow engine and the outside world.
//!
//! `flow-core` treats actors, builders and the state registry as opaque collaborators — it
//! never inspects what an actor computes, only whether it is stateful and what it returns. This
//! module is the concrete Rust shape of that boundary:
//!
//! - [`Actor`] is the capability set a user model must expose (train/apply/params/state).
//! - [`Builder`] is the factory that produces an [`Actor`] and answers `is_stateful` without
//!   constructing one.
//! - [`StateStore`] is the opaque, addressable blob registry the compiler wires `Loader`,
//!   `Dumper` and `Committer` instructions against.
//!
//! # Quick Start
//!
//! ```rust
//! use flow_store::{Actor, Builder, Params, Value};
//! use std::collections::HashMap;
//!
//! #[derive(Debug, Clone, Default)]
//! struct MeanImputer { mean: f64 }
//!
//! impl Actor for MeanImputer {
//!     fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
//!         Ok(args[0].clone())
//!     }
//!
//!     fn is_stateful(&self) -> bool { true }
//! }
//!
//! #[derive(Debug, Clone)]
//! struct MeanImputerBuilder;
//!
//! impl Builder for MeanImputerBuilder {
//!     fn build(&self) -> Box<dyn Actor> {
//!         Box::new(MeanImputer::default())
//!     }
//!
//!     fn is_stateful(&self) -> bool { true }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Opaque data flowing along apply/train/label edges (features, labels, predictions).
///
/// The flow engine never inspects the contents of a `Value`; `serde_json::Value` is used purely
/// as a convenient, serializable, dynamically-typed carrier, matching how the graph's own state
/// channels are represented in the surrounding workspace.
pub type Value = serde_json::Value;

/// A named bag of actor hyperparameters, as read/written by `get_params`/`set_params`.
pub type Params = HashMap<String, Value>;

/// Serialized actor state, as produced by `get_state` and consumed by `set_state`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    /// An empty blob, used as the "no state" sentinel.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Whether this blob carries no bytes (the "no prior state" case).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Identity of a dumped-but-not-yet-committed state blob, as returned by [`StateStore::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(pub Uuid);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a worker group, shared by every fork of the same builder.
///
/// Defined here (rather than in `flow-core`) because [`StateStore`] addresses persisted state by
/// group identity, and the store boundary must not depend on the graph crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gid(pub Uuid);

impl Gid {
    /// Mint a fresh, random group identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Gid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A trained or trainable unit of user code.
///
/// Only [`Actor::apply`] is required; the rest default to "stateless, no-op" behavior so that a
/// pure mapper needs to implement exactly one method.
pub trait Actor: Send + Sync + fmt::Debug {
    /// Transform `args` into a result. Called by the `Apply` functor at run time.
    fn apply(&self, args: &[Value]) -> Result<Value>;

    /// Consume training features and labels, updating internal state. Only ever invoked on a
    /// stateful actor's trained fork; the default is an error since a stateless actor has no
    /// legal way to be wired to `Train`/`Label` ports in the first place (enforced earlier, at
    /// composition time, by invariant 7).
    fn train(&mut self, _features: &Value, _labels: &Value) -> Result<()> {
        Ok(())
    }

    /// Current hyperparameters. Used by the state-preset wrapper to preserve hyperparameters
    /// across a `set_state` call.
    fn get_params(&self) -> Params {
        Params::new()
    }

    /// Overwrite hyperparameters.
    fn set_params(&mut self, _params: Params) {}

    /// Serialize this actor's trained state.
    fn get_state(&self) -> Blob {
        Blob::empty()
    }

    /// Restore this actor's trained state from a previously dumped blob.
    fn set_state(&mut self, _state: &Blob) {}

    /// Whether this actor instance carries trainable state. Builders answer the same question
    /// without instantiating an actor; the two must agree.
    fn is_stateful(&self) -> bool {
        false
    }
}

/// An opaque factory that produces [`Actor`] instances bound to fixed construction arguments.
///
/// A `Builder` is shared by every fork in a [`Gid`] group: all forks produce actors from the same
/// builder and therefore share actor behavior (and, once trained, actor state) at run time.
pub trait Builder: Send + Sync + fmt::Debug {
    /// Construct a fresh actor instance.
    fn build(&self) -> Box<dyn Actor>;

    /// Whether actors produced by this builder are stateful, without constructing one.
    fn is_stateful(&self) -> bool;
}

/// The opaque, persistent state registry the compiler wires `Loader`/`Dumper`/`Committer`
/// instructions against.
///
/// Operations are `async` because real backends (a database, object storage) are I/O-bound; the
/// graph-construction and compilation phases of `flow-core` never call into a `StateStore`
/// themselves — only the emitted instructions do, at run time, under the external runner.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether a state blob is currently registered for `key`.
    async fn contains(&self, key: Gid) -> bool;

    /// Load the blob registered for `key`.
    ///
    /// Implementations should return [`crate::StoreError::Missing`] rather than panicking when
    /// no blob is registered — the `Loader` instruction treats that as "first run, no state".
    async fn load(&self, key: Gid) -> Result<Blob>;

    /// Persist a blob, returning an identifier that can later be passed to [`Self::commit`].
    async fn dump(&self, blob: Blob) -> Result<StateId>;

    /// The position `gid` occupies in this store's canonical persistent-group ordering. Used to
    /// place a `Dumper`'s output at the matching positional argument of the segment's
    /// `Committer`.
    fn offset(&self, gid: Gid) -> Result<usize>;

    /// Atomically record a new generation built from `state_ids`, one per persisted group, in
    /// the order implied by [`Self::offset`].
    async fn commit(&self, state_ids: &[StateId]) -> Result<()>;
}
