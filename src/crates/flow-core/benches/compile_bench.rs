use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use flow_core::composition::{Composable, Composition, Operator, Origin, Trunk};
use flow_core::compiler;
use flow_core::node::Node;
use flow_core::span::Segment;
use flow_store::{Actor, Builder, MemoryStore, StateStore, Value};

#[derive(Debug)]
struct Identity;
impl Actor for Identity {
    fn apply(&self, args: &[Value]) -> flow_store::Result<Value> {
        Ok(args[0].clone())
    }
}
#[derive(Debug)]
struct IdentityBuilder;
impl Builder for IdentityBuilder {
    fn build(&self) -> Box<dyn Actor> {
        Box::new(Identity)
    }
    fn is_stateful(&self) -> bool {
        false
    }
}

fn chain(len: usize) -> Composition {
    let mut trunk = Origin.compose(Trunk::origin()).unwrap();
    for _ in 0..len {
        trunk = Operator::mapper(Arc::new(IdentityBuilder), 1, 1)
            .compose(trunk)
            .unwrap();
    }
    let features = Node::new_worker(1, 1, Arc::new(IdentityBuilder)).unwrap();
    let labels = Node::new_worker(1, 1, Arc::new(IdentityBuilder)).unwrap();
    let trunk = Trunk {
        apply: trunk.apply,
        train: Segment::from_head(features).unwrap(),
        label: Segment::from_head(labels).unwrap(),
    };
    Composition::new(trunk).unwrap()
}

fn compile_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("compile 50-node chain", |b| {
        b.iter_batched(
            || chain(50),
            |composition| {
                let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
                runtime.block_on(async {
                    compiler::compile(black_box(&composition), store).unwrap();
                });
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, compile_benchmark);
criterion_main!(benches);
