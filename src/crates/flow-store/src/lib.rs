//! Boundary traits and a reference implementation for the flow engine's persistent state layer.
//!
//! `flow-core` treats actors, their builders, and the state registry as external collaborators —
//! it is parameterized over the traits defined here rather than depending on any concrete model
//! library or storage backend. This crate is that boundary:
//!
//! ```text
//! ┌──────────────────────────────┐        ┌───────────────────────────────┐
//! │            flow-core         │        │           flow-store          │
//! │  Port / Node / Segment /     │ uses   │  Actor, Builder (consumed)     │
//! │  Trunk / Composition /       │ ─────▶ │  StateStore (consumed)         │
//! │  Compiler (Index, Linkage)   │        │  MemoryStore (reference impl)  │
//! └──────────────────────────────┘        └───────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use flow_store::{MemoryStore, StateStore, Blob, Gid};
//!
//! # async fn run() -> flow_store::Result<()> {
//! let store = MemoryStore::new();
//! let gid = Gid::new();
//! store.register_group(gid).await;
//!
//! let id = store.dump(Blob(vec![0, 1, 2])).await?;
//! store.commit(&[id]).await?;
//! assert!(store.contains(gid).await);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`traits`] — `Actor`, `Builder`, `StateStore`, and the `Value`/`Params`/`Blob`/`Gid`/
//!   `StateId` types that flow across the boundary.
//! - [`memory`] — `MemoryStore`, an in-memory reference `StateStore`, and its `MemoryStoreConfig`.
//! - [`error`] — `StoreError` and the crate's `Result` alias.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use traits::{Actor, Blob, Builder, Gid, Params, StateId, StateStore, Value};
