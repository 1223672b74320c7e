//! The instruction set a compiled [`crate::compiler::Table`] is built from.
//!
//! An [`Instruction`] is opaque to the compiler: it only cares about arity (how many positional
//! arguments an instruction consumes) and that `execute` resolves to a single [`Value`]. Actor
//! construction is lazy and cached per node: [`SharedActor`] defers calling
//! [`Builder::build`][flow_store::Builder::build] until the first instruction that needs it runs,
//! then holds onto the built actor for every later instruction referencing the same node (the
//! functor's `Train`/`StatePreset`/`ApplyFunctor` trio all share one `SharedActor`, which is how a
//! preset's `set_state` call becomes visible to the apply call that follows it in the same
//! compiled table).

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;

use flow_store::{Actor, Blob, Builder, Params, StateId, StateStore, Value};

use crate::error::{FlowError, Result};

/// Where a [`Symbol`]'s argument comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRef {
    /// The `i`-th raw argument supplied to the compiled pipeline at run time.
    Input(usize),
    /// The single resolved output of an earlier symbol in the same table.
    Symbol(usize),
}

/// One instruction plus the argument references it is invoked with.
pub struct Symbol {
    pub instruction: Arc<dyn Instruction>,
    pub args: Vec<ArgRef>,
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("instruction", &self.instruction.label())
            .field("args", &self.args)
            .finish()
    }
}

/// An executable step in a compiled pipeline.
#[async_trait]
pub trait Instruction: Send + Sync {
    /// Number of positional arguments this instruction expects.
    fn arity(&self) -> usize;

    /// A short, human-readable label for diagnostics — never used for equality.
    fn label(&self) -> &'static str;

    /// Run the instruction against its resolved arguments.
    async fn execute(&self, args: Vec<Value>) -> Result<Value>;

    /// Run [`Instruction::execute`], logging invocation, completion with elapsed time, and
    /// truncated argument context on failure — the uniform wrapper every instruction runs
    /// through, rather than each `execute` impl instrumenting itself.
    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        tracing::debug!(instruction = self.label(), args = args.len(), "instruction invoked");
        let start = std::time::Instant::now();
        match self.execute(args.clone()).await {
            Ok(value) => {
                tracing::debug!(
                    instruction = self.label(),
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "instruction completed"
                );
                Ok(value)
            }
            Err(err) => {
                let context: Vec<String> = args
                    .iter()
                    .map(|v| v.to_string().chars().take(1024).collect())
                    .collect();
                tracing::warn!(instruction = self.label(), error = %err, args = ?context, "instruction failed");
                Err(err)
            }
        }
    }
}

/// Lazily-built, shared actor instance backing every instruction generated for one node.
///
/// Construction is deferred to first use and cached thereafter — the lazy-and-cache behavior the
/// design notes call for explicitly, rather than the fresh-construct-per-call default.
pub struct SharedActor {
    builder: Arc<dyn Builder>,
    cell: OnceLock<Mutex<Box<dyn Actor>>>,
}

impl SharedActor {
    pub fn new(builder: Arc<dyn Builder>) -> Arc<Self> {
        Arc::new(Self {
            builder,
            cell: OnceLock::new(),
        })
    }

    fn actor(&self) -> &Mutex<Box<dyn Actor>> {
        self.cell.get_or_init(|| Mutex::new(self.builder.build()))
    }
}

/// Loads a group's previously committed state, or `Value::Null` when none exists yet — the soft
/// "first run" condition, not an error.
pub struct Loader {
    pub store: Arc<dyn StateStore>,
    pub gid: flow_store::Gid,
}

#[async_trait]
impl Instruction for Loader {
    fn arity(&self) -> usize {
        0
    }
    fn label(&self) -> &'static str {
        "Loader"
    }
    async fn execute(&self, _args: Vec<Value>) -> Result<Value> {
        match self.store.load(self.gid).await {
            Ok(blob) => Ok(serde_json::to_value(blob.0).unwrap_or(Value::Null)),
            Err(flow_store::StoreError::Missing(_)) => Ok(Value::Null),
            Err(e) => Err(FlowError::Store(e)),
        }
    }
}

/// Dumps a single state blob, returning its [`StateId`] (as a string) for a later [`Committer`].
pub struct Dumper {
    pub store: Arc<dyn StateStore>,
}

#[async_trait]
impl Instruction for Dumper {
    fn arity(&self) -> usize {
        1
    }
    fn label(&self) -> &'static str {
        "Dumper"
    }
    async fn execute(&self, mut args: Vec<Value>) -> Result<Value> {
        let bytes = value_to_bytes(args.remove(0));
        let id = self.store.dump(Blob(bytes)).await?;
        Ok(Value::String(id.0.to_string()))
    }
}

/// Projects the `index`-th element out of a multi-output worker's result array.
pub struct Getter {
    pub index: usize,
}

#[async_trait]
impl Instruction for Getter {
    fn arity(&self) -> usize {
        1
    }
    fn label(&self) -> &'static str {
        "Getter"
    }
    async fn execute(&self, mut args: Vec<Value>) -> Result<Value> {
        let value = args.remove(0);
        match value {
            Value::Array(mut items) if self.index < items.len() => Ok(items.swap_remove(self.index)),
            other => Ok(other),
        }
    }
}

/// Atomically records one new commit generation from the dumped state ids supplied, in the
/// store's canonical persistent-group order.
pub struct Committer {
    pub store: Arc<dyn StateStore>,
    pub arity: usize,
}

#[async_trait]
impl Instruction for Committer {
    fn arity(&self) -> usize {
        self.arity
    }
    fn label(&self) -> &'static str {
        "Committer"
    }
    async fn execute(&self, args: Vec<Value>) -> Result<Value> {
        let ids: Vec<StateId> = args
            .into_iter()
            .map(|v| {
                let raw = v.as_str().unwrap_or_default();
                StateId(uuid::Uuid::parse_str(raw).unwrap_or_default())
            })
            .collect();
        self.store.commit(&ids).await?;
        Ok(Value::Null)
    }
}

/// Calls a node's actor's `apply`, with `args` resolved positionally onto its input ports.
pub struct ApplyFunctor {
    pub actor: Arc<SharedActor>,
    pub arity: usize,
}

#[async_trait]
impl Instruction for ApplyFunctor {
    fn arity(&self) -> usize {
        self.arity
    }
    fn label(&self) -> &'static str {
        "Apply"
    }
    async fn execute(&self, args: Vec<Value>) -> Result<Value> {
        let actor = self.actor.actor().lock().expect("actor mutex poisoned");
        actor.apply(&args)
    }
}

/// Calls a node's actor's `train` with `(features, labels)`, then returns the actor's resulting
/// state — the value a [`Dumper`] downstream persists.
pub struct TrainFunctor {
    pub actor: Arc<SharedActor>,
}

#[async_trait]
impl Instruction for TrainFunctor {
    fn arity(&self) -> usize {
        2
    }
    fn label(&self) -> &'static str {
        "Train"
    }
    async fn execute(&self, args: Vec<Value>) -> Result<Value> {
        let mut actor = self.actor.actor().lock().expect("actor mutex poisoned");
        actor.train(&args[0], &args[1])?;
        Ok(serde_json::to_value(actor.get_state().0).unwrap_or(Value::Null))
    }
}

/// Restores a node's actor state from a loaded blob before any `Apply`/`Train` symbol targeting
/// the same [`SharedActor`] runs.
pub struct StatePreset {
    pub actor: Arc<SharedActor>,
}

#[async_trait]
impl Instruction for StatePreset {
    fn arity(&self) -> usize {
        1
    }
    fn label(&self) -> &'static str {
        "StatePreset"
    }
    async fn execute(&self, mut args: Vec<Value>) -> Result<Value> {
        let value = args.remove(0);
        if !value.is_null() {
            let bytes = value_to_bytes(value);
            self.actor.actor().lock().expect("actor mutex poisoned").set_state(&Blob(bytes));
        }
        Ok(Value::Null)
    }
}

/// Overwrites a node's actor hyperparameters before any `Apply`/`Train` symbol targeting the same
/// [`SharedActor`] runs.
pub struct ParamsPreset {
    pub actor: Arc<SharedActor>,
    pub params: Params,
}

#[async_trait]
impl Instruction for ParamsPreset {
    fn arity(&self) -> usize {
        0
    }
    fn label(&self) -> &'static str {
        "ParamsPreset"
    }
    async fn execute(&self, _args: Vec<Value>) -> Result<Value> {
        self.actor
            .actor()
            .lock()
            .expect("actor mutex poisoned")
            .set_params(self.params.clone());
        Ok(Value::Null)
    }
}

fn value_to_bytes(value: Value) -> Vec<u8> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_u64().map(|n| n as u8))
            .collect(),
        other => serde_json::to_vec(&other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::MemoryStore;

    #[derive(Debug)]
    struct Doubler;
    impl Actor for Doubler {
        fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
            Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
        }
    }
    #[derive(Debug)]
    struct DoublerBuilder;
    impl Builder for DoublerBuilder {
        fn build(&self) -> Box<dyn Actor> {
            Box::new(Doubler)
        }
        fn is_stateful(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn apply_functor_caches_actor_across_calls() {
        let shared = SharedActor::new(Arc::new(DoublerBuilder));
        let functor = ApplyFunctor {
            actor: shared,
            arity: 1,
        };
        let out = functor.execute(vec![Value::from(21)]).await.unwrap();
        assert_eq!(out, Value::from(42));
    }

    #[tokio::test]
    async fn loader_returns_null_when_no_state_registered() {
        let memory = MemoryStore::new();
        let gid = flow_store::Gid::new();
        memory.register_group(gid).await;
        let store: Arc<dyn StateStore> = Arc::new(memory);
        let loader = Loader { store, gid };
        let out = loader.execute(vec![]).await.unwrap();
        assert_eq!(out, Value::Null);
    }

    #[tokio::test]
    async fn getter_projects_array_element() {
        let getter = Getter { index: 1 };
        let out = getter
            .execute(vec![Value::Array(vec![Value::from(1), Value::from(2)])])
            .await
            .unwrap();
        assert_eq!(out, Value::from(2));
    }

    #[derive(Debug, Default)]
    struct Accumulator {
        total: std::sync::atomic::AtomicI64,
    }
    impl Actor for Accumulator {
        fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
            Ok(args[0].clone())
        }
        fn train(&mut self, features: &Value, labels: &Value) -> flow_store::Result<()> {
            let delta = features.as_i64().unwrap_or(0) + labels.as_i64().unwrap_or(0);
            *self.total.get_mut() += delta;
            Ok(())
        }
        fn get_state(&self) -> flow_store::Blob {
            flow_store::Blob(
                self.total
                    .load(std::sync::atomic::Ordering::SeqCst)
                    .to_le_bytes()
                    .to_vec(),
            )
        }
        fn is_stateful(&self) -> bool {
            true
        }
    }
    #[derive(Debug)]
    struct AccumulatorBuilder;
    impl Builder for AccumulatorBuilder {
        fn build(&self) -> Box<dyn Actor> {
            Box::new(Accumulator::default())
        }
        fn is_stateful(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn train_functor_returns_state_not_features() {
        let shared = SharedActor::new(Arc::new(AccumulatorBuilder));
        let functor = TrainFunctor { actor: shared };
        let out = functor
            .execute(vec![Value::from(3), Value::from(4)])
            .await
            .unwrap();
        assert_ne!(out, Value::from(3), "must not pass features through unchanged");
        let state: Vec<u8> = serde_json::from_value(out).unwrap();
        assert_eq!(i64::from_le_bytes(state.try_into().unwrap()), 7);
    }

    #[tokio::test]
    async fn call_wrapper_logs_and_preserves_result() {
        let getter = Getter { index: 0 };
        let out = getter.call(vec![Value::from(9)]).await.unwrap();
        assert_eq!(out, Value::from(9));
    }
}
