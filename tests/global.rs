#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use paladin::{
    Access, BackendKind, Config, CuttingStrategy, Error, Splitter, StrategyParameter,
};
use std::sync::atomic::{AtomicUsize, Ordering};

// One test: the process-wide runtime can only be installed once per process.
#[test]
fn process_wide_runtime_is_installed_once() {
    let config = Config::builder()
        .backend(BackendKind::Dataflow)
        .num_threads(3)
        .build()
        .unwrap();
    let runtime = paladin::init(config.clone()).unwrap();
    assert_eq!(runtime.backend(), BackendKind::Dataflow);
    assert_eq!(paladin::active_backend().unwrap(), BackendKind::Dataflow);
    assert!(std::ptr::eq(paladin::global().unwrap(), runtime));

    let err = paladin::init(config).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err}");

    let splitter = Splitter::new(3, CuttingStrategy::Row, StrategyParameter::Threads).unwrap();
    let total = AtomicUsize::new(0);
    paladin::parallel_for(&splitter, 30, |range| {
        total.fetch_add(range.len(), Ordering::Relaxed);
    })
    .unwrap();
    paladin::task_region(|region| {
        region.spawn(Access::new(), || {
            total.fetch_add(1, Ordering::Relaxed);
        })
    })
    .unwrap()
    .unwrap();
    assert_eq!(total.into_inner(), 31);
}
