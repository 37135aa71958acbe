#![allow(dead_code)]

use paladin::{BackendKind, Config, Runtime};

pub const BACKENDS: [BackendKind; 3] = [
    BackendKind::Sequential,
    BackendKind::ExplicitSynch,
    BackendKind::Dataflow,
];

pub fn runtime(backend: BackendKind) -> Runtime {
    init_tracing();
    let config = Config::builder()
        .backend(backend)
        .num_threads(4)
        .check_conflicts(true)
        .build()
        .unwrap();
    Runtime::new(config).unwrap()
}

pub fn runtimes() -> Vec<Runtime> {
    BACKENDS.into_iter().map(runtime).collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
