//! Lowers a validated [`Composition`] into an ordered [`Table`] of [`Symbol`]s addressing a
//! [`StateStore`].
//!
//! The compiler walks the composition's apply segment in topological order (head first), emitting
//! one [`ApplyFunctor`] or [`TrainFunctor`] symbol per worker node, wiring each node's input ports
//! to either an earlier symbol's output or a raw pipeline input. Persistent (stateful) nodes get a
//! [`Loader`]/[`StatePreset`] pair ahead of their functor and contribute a [`Dumper`] linked
//! directly to that group's `TrainFunctor` symbol (its state is the functor's own return value),
//! one per persistent group, collected into a final [`Committer`] placed at the end of the table
//! so every group's new generation commits atomically once the whole graph has run.
//!
//! Each node gets exactly one [`SharedActor`], shared by every instruction generated for it (its
//! preset and its functor) — this is what makes "preset this node's state, then apply/train it" a
//! *sequencing* concern rather than a data-flow one.
//!
//! A trained fork is wired off the apply branch's untrained fork by [`crate::composition::Operator`]
//! (see its module notes) and so is not reachable by ordinary `Apply`-port traversal from any
//! segment's head. `compile_apply` discovers such forks as it builds the `incoming` map and
//! compiles them after the three main branches, in addition to the topological walk.

use std::collections::HashMap;
use std::sync::Arc;

use flow_store::{Gid, StateStore};
use uuid::Uuid;

use crate::composition::Composition;
use crate::error::{AssemblyError, Result};
use crate::instruction::{
    ApplyFunctor, ArgRef, Committer, Dumper, Getter, Instruction, Loader, SharedActor, StatePreset,
    Symbol, TrainFunctor,
};
use crate::node::Node;
use crate::port::Port;

/// An ordered, linear program a [`StateStore`]-aware runner can execute front to back.
pub struct Table {
    pub symbols: Vec<Symbol>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Compile `composition` against `store`, producing the symbol table a runner executes.
pub fn compile(composition: &Composition, store: Arc<dyn StateStore>) -> Result<Table> {
    let mut index = Index::new(store);
    index.compile_apply(composition)?;
    index.compile_committer(composition)?;
    Ok(Table {
        symbols: index.symbols,
    })
}

/// Incremental compiler state: the symbol table under construction plus the lookup tables needed
/// to resolve each new symbol's arguments against symbols already emitted.
struct Index {
    store: Arc<dyn StateStore>,
    symbols: Vec<Symbol>,
    /// Node uid -> index of the symbol producing that node's apply output (pre-`Getter`).
    node_symbol: HashMap<Uuid, usize>,
    /// `(node uid, output index)` -> index of a `Getter` symbol already built for that lane.
    getters: HashMap<(Uuid, usize), usize>,
    /// Gid -> index of the `Loader` symbol already built for that group.
    loaders: HashMap<Gid, usize>,
    /// Gid -> index of the `TrainFunctor` symbol compiled for that group's trained fork.
    trained_symbol: HashMap<Gid, usize>,
    /// Node uid -> the `SharedActor` already built for that node.
    actors: HashMap<Uuid, Arc<SharedActor>>,
    /// `(publisher uid, port)` -> `(publisher uid, output index)`, precomputed once per compile.
    incoming: HashMap<(Uuid, Port), (Uuid, usize)>,
}

impl Index {
    fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            symbols: Vec::new(),
            node_symbol: HashMap::new(),
            getters: HashMap::new(),
            loaders: HashMap::new(),
            trained_symbol: HashMap::new(),
            actors: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    fn push(&mut self, instruction: Arc<dyn Instruction>, args: Vec<ArgRef>) -> usize {
        self.symbols.push(Symbol { instruction, args });
        self.symbols.len() - 1
    }

    fn shared_actor(&mut self, node: &Node) -> Arc<SharedActor> {
        self.actors
            .entry(node.uid())
            .or_insert_with(|| {
                let group = node.group().expect("stateful lookup only called on Worker nodes");
                SharedActor::new(group.builder.clone())
            })
            .clone()
    }

    /// Resolve the `ArgRef` feeding `subscriber`'s `port`, wrapping in a `Getter` if the
    /// publisher is a multi-output node and this is not its sole output.
    fn resolve_input(&mut self, subscriber_uid: Uuid, port: Port) -> ArgRef {
        match self.incoming.get(&(subscriber_uid, port)).copied() {
            None => {
                // No publisher within this segment: this is the composition's own raw input,
                // at the position given by the port itself.
                let pos = match port {
                    Port::Apply(i) => i,
                    _ => 0,
                };
                ArgRef::Input(pos)
            }
            Some((pub_uid, out_idx)) => {
                let base = *self
                    .node_symbol
                    .get(&pub_uid)
                    .expect("publisher visited before its subscribers in topological order");
                if out_idx == 0 {
                    ArgRef::Symbol(base)
                } else if let Some(existing) = self.getters.get(&(pub_uid, out_idx)) {
                    ArgRef::Symbol(*existing)
                } else {
                    let getter_idx = self.push(
                        Arc::new(Getter { index: out_idx }),
                        vec![ArgRef::Symbol(base)],
                    );
                    self.getters.insert((pub_uid, out_idx), getter_idx);
                    ArgRef::Symbol(getter_idx)
                }
            }
        }
    }

    /// Compile all three branches of the composition, train and label first (so a trainee's
    /// `Train`/`Label` arguments are already resolvable by the time the apply branch reaches it).
    ///
    /// This ordering assumes the train/label branches are self-contained (they don't themselves
    /// depend on a node that only the apply branch produces) — true of the common case of
    /// dedicated feature/label source nodes; see the design notes for the general case this
    /// simplifies away.
    fn compile_apply(&mut self, composition: &Composition) -> Result<()> {
        // `members()` is post-order (tail-first); its reverse is a valid topological order
        // (head/no-predecessor nodes first) for an acyclic graph.
        let train_topo: Vec<Node> = composition.train.members()?.into_iter().rev().collect();
        let label_topo: Vec<Node> = composition.label.members()?.into_iter().rev().collect();
        let apply_topo: Vec<Node> = composition.apply.members()?.into_iter().rev().collect();

        // A trained fork is subscribed off its group's untrained applier by `Operator::compose`
        // rather than appearing in any of the three branches above, so it is never discovered by
        // `Apply`-port traversal. Collect it here, alongside the `incoming` edges this loop
        // already builds for every port kind, and compile it once the main branches are done.
        let mut trained_extra: Vec<Node> = Vec::new();
        for node in train_topo.iter().chain(label_topo.iter()).chain(apply_topo.iter()) {
            for (out_idx, subs) in node.outputs().into_iter().enumerate() {
                for sub in subs {
                    self.incoming
                        .insert((sub.subscriber.uid(), sub.port), (node.uid(), out_idx));
                    if !sub.port.is_apply() {
                        trained_extra.push(sub.subscriber.clone());
                    }
                }
            }
        }

        for node in train_topo.iter().chain(label_topo.iter()).chain(apply_topo.iter()) {
            self.compile_node(node)?;
        }
        // Each trained-extra node's own inputs (its branch's train/label tails) were already
        // compiled above, and a trained node never publishes further, so it is always a sink
        // with respect to this additional discovery — order among these does not matter.
        for node in trained_extra {
            self.compile_node(&node)?;
        }
        Ok(())
    }

    fn compile_node(&mut self, node: &Node) -> Result<()> {
        if node.is_future() || self.node_symbol.contains_key(&node.uid()) {
            return Ok(());
        }

        if node.stateful() {
            let gid = node.gid().expect("stateful worker always has a gid");
            let loader_idx = *self.loaders.entry(gid).or_insert_with(|| {
                let sym = Symbol {
                    instruction: Arc::new(Loader {
                        store: self.store.clone(),
                        gid,
                    }),
                    args: Vec::new(),
                };
                self.symbols.push(sym);
                self.symbols.len() - 1
            });
            let shared = self.shared_actor(node);
            self.push(
                Arc::new(StatePreset { actor: shared }),
                vec![ArgRef::Symbol(loader_idx)],
            );
        }

        let uid = node.uid();
        let symbol_idx = if node.trained() {
            let train_arg = self.resolve_input(uid, Port::Train);
            let label_arg = self.resolve_input(uid, Port::Label);
            let shared = self.shared_actor(node);
            let idx = self.push(Arc::new(TrainFunctor { actor: shared }), vec![train_arg, label_arg]);
            if let Some(gid) = node.gid() {
                self.trained_symbol.insert(gid, idx);
            }
            idx
        } else {
            let args: Vec<ArgRef> = (0..node.szin())
                .map(|i| self.resolve_input(uid, Port::Apply(i)))
                .collect();
            if args.len() != node.szin() {
                return Err(AssemblyError::MissingArgument {
                    key: uid.to_string(),
                    index: args.len(),
                }
                .into());
            }
            let shared = self.shared_actor(node);
            self.push(
                Arc::new(ApplyFunctor {
                    actor: shared,
                    arity: node.szin(),
                }),
                args,
            )
        };
        self.node_symbol.insert(uid, symbol_idx);
        Ok(())
    }

    fn compile_committer(&mut self, composition: &Composition) -> Result<()> {
        let gids = composition.persistent()?;
        if gids.is_empty() {
            return Ok(());
        }

        let mut by_offset: Vec<(usize, Gid)> = Vec::new();
        for gid in gids {
            let offset = self.store.offset(gid)?;
            by_offset.push((offset, gid));
        }
        by_offset.sort_by_key(|(offset, _)| *offset);

        let mut dumper_args = Vec::with_capacity(by_offset.len());
        for (_, gid) in &by_offset {
            let train_symbol = *self.trained_symbol.get(gid).expect(
                "compile_apply compiles every persistent group's trained fork before compile_committer runs",
            );
            let dumper_idx = self.push(
                Arc::new(Dumper {
                    store: self.store.clone(),
                }),
                vec![ArgRef::Symbol(train_symbol)],
            );
            dumper_args.push(ArgRef::Symbol(dumper_idx));
        }

        self.push(
            Arc::new(Committer {
                store: self.store.clone(),
                arity: dumper_args.len(),
            }),
            dumper_args,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{Composable, Operator, Origin, Trunk};
    use crate::span::Segment;
    use flow_store::{Actor, MemoryStore, Value};

    #[derive(Debug)]
    struct Doubler;
    impl Actor for Doubler {
        fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
            Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
        }
    }
    #[derive(Debug)]
    struct DoublerBuilder;
    impl flow_store::Builder for DoublerBuilder {
        fn build(&self) -> Box<dyn Actor> {
            Box::new(Doubler)
        }
        fn is_stateful(&self) -> bool {
            false
        }
    }

    #[derive(Debug, Default)]
    struct Counter {
        state: std::sync::atomic::AtomicI64,
    }
    impl Actor for Counter {
        fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
            Ok(args[0].clone())
        }
        fn train(&mut self, features: &Value, _labels: &Value) -> flow_store::Result<()> {
            *self.state.get_mut() += features.as_i64().unwrap_or(0);
            Ok(())
        }
        fn get_state(&self) -> flow_store::Blob {
            flow_store::Blob(self.state.load(std::sync::atomic::Ordering::SeqCst).to_le_bytes().to_vec())
        }
        fn is_stateful(&self) -> bool {
            true
        }
    }
    #[derive(Debug)]
    struct CounterBuilder;
    impl flow_store::Builder for CounterBuilder {
        fn build(&self) -> Box<dyn Actor> {
            Box::new(Counter::default())
        }
        fn is_stateful(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn stateless_pipeline_compiles_without_committer() {
        let trunk = Origin
            .then(Operator::mapper(Arc::new(DoublerBuilder), 1, 1))
            .compose(Trunk::origin())
            .unwrap();
        let features = Node::new_worker(1, 1, Arc::new(DoublerBuilder)).unwrap();
        let labels = Node::new_worker(1, 1, Arc::new(DoublerBuilder)).unwrap();
        let trunk = Trunk {
            apply: trunk.apply,
            train: Segment::from_head(features).unwrap(),
            label: Segment::from_head(labels).unwrap(),
        };
        let composition = Composition::new(trunk).unwrap();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let table = compile(&composition, store).unwrap();
        // One Apply symbol each for the standalone features/labels nodes plus the mapper itself;
        // nothing stateful, so no Loader/Committer.
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn trained_pipeline_emits_loader_and_committer() {
        let memory = MemoryStore::new();
        let trunk = Origin
            .then(Operator::estimator(Arc::new(CounterBuilder), 1, 1))
            .compose(Trunk::origin())
            .unwrap();
        let features = Node::new_worker(1, 1, Arc::new(DoublerBuilder)).unwrap();
        let labels = Node::new_worker(1, 1, Arc::new(DoublerBuilder)).unwrap();
        // `Operator::estimator` already wired the trainee's Train/Label ports to the trunk's
        // (still-unresolved) train/label futures; here we register the real upstream sources.
        trunk.train.tail.port(0).subscribe(&features.port(0)).unwrap();
        trunk.label.tail.port(0).subscribe(&labels.port(0)).unwrap();
        let trunk = Trunk {
            apply: trunk.apply,
            train: Segment::from_head(features).unwrap(),
            label: Segment::from_head(labels).unwrap(),
        };
        let composition = Composition::new(trunk).unwrap();
        memory.register_group(composition.persistent().unwrap().into_iter().next().unwrap()).await;
        let store: Arc<dyn StateStore> = Arc::new(memory);
        let table = compile(&composition, store).unwrap();
        assert!(table.len() >= 4, "Loader, StatePreset, Train, Dumper, Committer");
    }
}
