use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fibre_store::{define_store, BoxError, Store};
use tokio::runtime::Runtime;

// --- Fixtures ---

struct Config {
  depth: usize,
}

struct Service {
  config: std::sync::Arc<Config>,
}

fn build_store() -> Store {
  define_store()
    .add("config", |_| Config { depth: 3 })
    .unwrap()
    .add("service", |store: &Store| Service {
      config: store.get::<Config>("config").unwrap(),
    })
    .unwrap()
    .add_transient("scratch", |_| vec![0_u8; 64])
    .unwrap()
    .add_async("remote", |_: Store| async { Ok::<_, BoxError>(42_u64) })
    .unwrap()
    .finalize()
}

/// A chain of `depth` empty child stores below the one that owns the bindings.
fn nested(depth: usize) -> Store {
  (0..depth).fold(build_store(), |store, _| store.create_child().finalize())
}

// --- Benchmark Functions ---

fn bench_sync(c: &mut Criterion) {
  let store = build_store();
  store.get::<Service>("service").unwrap();

  let mut group = c.benchmark_group("Sync");
  group.bench_function("SingletonHit", |b| {
    b.iter(|| black_box(store.get::<Service>(black_box("service")).unwrap()))
  });
  group.bench_function("Transient", |b| {
    b.iter(|| black_box(store.get::<Vec<u8>>(black_box("scratch")).unwrap()))
  });
  group.bench_function("ColdStore", |b| {
    b.iter(|| {
      let store = build_store();
      black_box(store.get::<Service>("service").unwrap().config.depth)
    })
  });
  group.finish();
}

fn bench_scopes(c: &mut Criterion) {
  let mut group = c.benchmark_group("ParentChain");
  for depth in [1_usize, 4, 16] {
    let store = nested(depth);
    store.get::<Service>("service").unwrap();
    group.bench_with_input(BenchmarkId::from_parameter(depth), &store, |b, store| {
      b.iter(|| black_box(store.get::<Service>("service").unwrap()))
    });
  }
  group.finish();
}

fn bench_async(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let store = build_store();
  rt.block_on(store.get_async::<u64>("remote")).unwrap();

  let mut group = c.benchmark_group("Async");
  group.bench_function("SettledHit", |b| {
    b.iter(|| black_box(rt.block_on(store.get_async::<u64>("remote")).unwrap()))
  });
  group.finish();
}

criterion_group!(benches, bench_sync, bench_scopes, bench_async);
criterion_main!(benches);
