//! A task-graph composition algebra and compiler for machine-learning pipelines.
//!
//! Pipelines are built by composing [`composition::Operator`]s and other
//! [`composition::Composable`] terms against a [`composition::Trunk`] — the apply/train/label
//! triple of [`span::Segment`]s threaded through the pipeline. Finishing a pipeline produces a
//! [`composition::Composition`], which [`compiler::compile`] lowers into a [`compiler::Table`]: an
//! ordered sequence of [`instruction::Symbol`]s addressing a [`flow_store::StateStore`].
//!
//! ```text
//! Operator >> Operator >> Operator   (composition.rs, building on node.rs / port.rs / span.rs)
//!         │
//!         ▼
//!   Composition(apply, train, label)  (composition.rs)
//!         │
//!         ▼
//!      compiler::compile             (compiler.rs, instruction.rs)
//!         │
//!         ▼
//!   Table { symbols: Vec<Symbol> }    — addresses a flow_store::StateStore at run time
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use flow_core::composition::{Composable, Operator, Origin, Trunk};
//! use flow_core::compiler;
//! use flow_core::span::Segment;
//! use flow_core::node::Node;
//! use flow_store::{Actor, Builder, MemoryStore, StateStore, Value};
//!
//! #[derive(Debug)]
//! struct Double;
//! impl Actor for Double {
//!     fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
//!         Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
//!     }
//! }
//! #[derive(Debug)]
//! struct DoubleBuilder;
//! impl Builder for DoubleBuilder {
//!     fn build(&self) -> Box<dyn Actor> { Box::new(Double) }
//!     fn is_stateful(&self) -> bool { false }
//! }
//!
//! # async fn run() -> flow_core::error::Result<()> {
//! let trunk = Origin
//!     .then(Operator::mapper(Arc::new(DoubleBuilder), 1, 1))
//!     .compose(Trunk::origin())?;
//! let features = Node::new_worker(1, 1, Arc::new(DoubleBuilder))?;
//! let labels = Node::new_worker(1, 1, Arc::new(DoubleBuilder))?;
//! let trunk = Trunk {
//!     apply: trunk.apply,
//!     train: Segment::from_head(features)?,
//!     label: Segment::from_head(labels)?,
//! };
//! let composition = flow_core::composition::Composition::new(trunk)?;
//! let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
//! let table = compiler::compile(&composition, store)?;
//! assert_eq!(table.len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`port`] — `Port`, `Subscription`: the typed endpoints nodes connect through.
//! - [`node`] — `Node`, `Group`, `PortHandle`: the mutable graph primitives and the structural
//!   invariants enforced at mutation time.
//! - [`span`] — `Segment`: traversal, tail resolution, extension, copying.
//! - [`composition`] — `Composable`, `Origin`, `Operator`, `Compound`, `Trunk`, `Stateless`,
//!   `Composition`: the algebra pipelines are built from.
//! - [`compiler`] — `Table`, `compile`: lowering a `Composition` into an ordered symbol table.
//! - [`instruction`] — `Instruction`, `Symbol`, and the concrete instruction set.
//! - [`error`] — `FlowError`, `TopologyError`, `AssemblyError`.

pub mod compiler;
pub mod composition;
pub mod error;
pub mod instruction;
pub mod node;
pub mod port;
pub mod span;

pub use compiler::{compile, Table};
pub use composition::{Compound, Composable, Composition, Operator, Origin, Stateless, Trunk};
pub use error::{FlowError, Result};
pub use instruction::{ArgRef, Instruction, Symbol};
pub use node::{Group, Node, PortHandle};
pub use port::{Port, Subscription};
pub use span::Segment;
