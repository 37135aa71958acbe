#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use common::{BACKENDS, runtime, runtimes};
use paladin::{
    Access, AccessMode, BackendKind, BufferId, CuttingStrategy, Error, Splitter,
    StrategyParameter, assert_declared,
};
use pretty_assertions::assert_eq;
use std::{
    sync::{
        Barrier, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

#[test]
fn group_end_is_a_barrier() {
    for runtime in runtimes() {
        let slots: Vec<_> = (0..100).map(|_| AtomicUsize::new(0)).collect();
        runtime
            .task_region(|region| {
                let group = region.begin_sync_group();
                for slot in &slots {
                    let access = Access::new().write(BufferId::of(slot));
                    group.spawn(access, move || {
                        slot.fetch_add(1, Ordering::Relaxed);
                    })?;
                }
                group.end()?;
                assert!(
                    slots.iter().all(|s| s.load(Ordering::Relaxed) == 1),
                    "{}",
                    region.backend()
                );
                Ok::<(), paladin::Error>(())
            })
            .unwrap()
            .unwrap();
    }
}

#[test]
fn region_exit_joins_ungrouped_tasks() {
    for runtime in runtimes() {
        let done = AtomicUsize::new(0);
        let handles = runtime
            .task_region(|region| {
                let done = &done;
                (0..32)
                    .map(|_| {
                        region.spawn(Access::new(), move || {
                            thread::sleep(Duration::from_micros(200));
                            done.fetch_add(1, Ordering::Relaxed);
                        })
                    })
                    .collect::<paladin::Result<Vec<_>>>()
            })
            .unwrap()
            .unwrap();
        assert_eq!(done.load(Ordering::Relaxed), 32);
        assert!(handles.iter().all(|h| h.is_finished() && !h.has_failed()));
    }
}

#[test]
fn sequential_spawn_runs_inline() {
    let runtime = runtime(BackendKind::Sequential);
    let order = Mutex::new(Vec::new());
    runtime
        .task_region(|region| {
            for i in 0..5 {
                let order = &order;
                let handle = region.spawn(Access::new(), move || order.lock().unwrap().push(i))?;
                assert!(handle.is_finished());
            }
            Ok::<(), paladin::Error>(())
        })
        .unwrap()
        .unwrap();
    assert_eq!(order.into_inner().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn dataflow_serialises_writers_of_one_buffer_in_spawn_order() {
    for backend in [BackendKind::Sequential, BackendKind::Dataflow] {
        let runtime = runtime(backend);
        let log = Mutex::new(Vec::new());
        let id = BufferId::of(&log);
        runtime
            .task_region(|region| {
                for i in 0..50 {
                    let log = &log;
                    region.spawn(Access::new().write(id), move || {
                        log.lock().unwrap().push(i);
                    })?;
                }
                Ok::<(), paladin::Error>(())
            })
            .unwrap()
            .unwrap();
        assert_eq!(log.into_inner().unwrap(), (0..50).collect::<Vec<_>>());
        assert_eq!(runtime.observed_conflicts(), Some(0));
    }
}

#[test]
fn dataflow_readers_see_the_preceding_write() {
    let runtime = runtime(BackendKind::Dataflow);
    let value = AtomicUsize::new(0);
    let seen = Mutex::new(Vec::new());
    let id = BufferId::of(&value);
    runtime
        .task_region(|region| {
            let (value, seen) = (&value, &seen);
            for round in 1..=5 {
                region.spawn(Access::new().write(id), move || {
                    thread::sleep(Duration::from_micros(300));
                    value.store(round, Ordering::Relaxed);
                })?;
                for _ in 0..4 {
                    region.spawn(Access::new().read(id), move || {
                        seen.lock().unwrap().push((round, value.load(Ordering::Relaxed)));
                    })?;
                }
            }
            Ok::<(), paladin::Error>(())
        })
        .unwrap()
        .unwrap();
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 20);
    assert!(seen.iter().all(|(round, value)| round == value), "{seen:?}");
}

#[test]
fn dataflow_never_overlaps_conflicting_tasks() {
    let runtime = runtime(BackendKind::Dataflow);
    let buffers = [0u8; 3];
    let ids: Vec<_> = buffers.iter().map(BufferId::of).collect();
    let spans = Mutex::new(Vec::new());
    runtime
        .task_region(|region| {
            for i in 0..60usize {
                let target = ids[i % 3];
                let access = if i % 4 == 0 {
                    Access::new().write(target)
                } else {
                    Access::new().read(target).read(ids[(i + 1) % 3])
                };
                let spans = &spans;
                region.spawn(access.clone(), move || {
                    let start = Instant::now();
                    thread::sleep(Duration::from_micros(100));
                    spans.lock().unwrap().push((access, start, Instant::now()));
                })?;
            }
            Ok::<(), paladin::Error>(())
        })
        .unwrap()
        .unwrap();
    let spans = spans.into_inner().unwrap();
    assert_eq!(spans.len(), 60);
    for (i, (a, a_start, a_end)) in spans.iter().enumerate() {
        for (b, b_start, b_end) in &spans[i + 1..] {
            if a.conflict_with(b).is_some() {
                assert!(a_end <= b_start || b_end <= a_start, "{a:?} overlaps {b:?}");
            }
        }
    }
    assert_eq!(runtime.observed_conflicts(), Some(0));
}

#[test]
fn explicit_synch_ignores_declarations_and_the_checker_notices() {
    let runtime = runtime(BackendKind::ExplicitSynch);
    let shared = 0u64;
    let id = BufferId::of(&shared);
    let meet = Barrier::new(2);
    runtime
        .task_region(|region| {
            for _ in 0..2 {
                let meet = &meet;
                // Both writers must be running at once to pass the barrier.
                region.spawn(Access::new().write(id), move || {
                    meet.wait();
                })?;
            }
            Ok::<(), paladin::Error>(())
        })
        .unwrap()
        .unwrap();
    assert_eq!(runtime.observed_conflicts(), Some(1));
}

#[test]
fn dataflow_runs_tasks_on_disjoint_buffers_together() {
    let runtime = runtime(BackendKind::Dataflow);
    let (x, y) = (BufferId::from_key(1), BufferId::from_key(2));
    let meet = Barrier::new(2);
    runtime
        .task_region(|region| {
            for id in [x, y] {
                let meet = &meet;
                // Deadlocks unless both writers run at once.
                region.spawn(Access::new().write(id), move || {
                    meet.wait();
                })?;
            }
            Ok::<(), paladin::Error>(())
        })
        .unwrap()
        .unwrap();
    assert_eq!(runtime.observed_conflicts(), Some(0));
}

#[test]
fn nested_groups_join_innermost_first() {
    for runtime in runtimes() {
        let log = Mutex::new(Vec::new());
        runtime
            .task_region(|region| {
                let log = &log;
                region.sync_group(|region| {
                    region.spawn(Access::new(), move || log.lock().unwrap().push("outer"))?;
                    region.sync_group(|region| {
                        region.spawn(Access::new(), move || {
                            thread::sleep(Duration::from_millis(2));
                            log.lock().unwrap().push("inner");
                        })
                    })??;
                    assert!(log.lock().unwrap().contains(&"inner"));
                    assert_eq!(region.depth(), 1);
                    Ok::<(), paladin::Error>(())
                })?
            })
            .unwrap()
            .unwrap();
        assert_eq!(log.into_inner().unwrap().len(), 2);
    }
}

#[test]
fn ending_an_outer_group_joins_the_groups_nested_in_it() {
    for runtime in runtimes() {
        let done = AtomicUsize::new(0);
        runtime
            .task_region(|region| {
                let done = &done;
                let outer = region.begin_sync_group();
                let inner = region.begin_sync_group();
                inner.spawn(Access::new(), move || {
                    thread::sleep(Duration::from_millis(50));
                    done.fetch_add(1, Ordering::Relaxed);
                })?;
                inner.spawn(Access::new(), || -> Result<(), &str> { Err("inner") })?;
                let err = outer.end().unwrap_err();
                assert_eq!(err.to_string(), "body failed: inner");
                assert_eq!(done.load(Ordering::Relaxed), 1, "{}", region.backend());
                assert_eq!(region.depth(), 0);
                drop(inner);
                Ok::<(), paladin::Error>(())
            })
            .unwrap()
            .unwrap();
    }
}

#[test]
fn dropping_an_outer_group_joins_the_groups_nested_in_it() {
    for runtime in runtimes() {
        let done = AtomicUsize::new(0);
        runtime
            .task_region(|region| {
                let done = &done;
                let outer = region.begin_sync_group();
                let inner = region.begin_sync_group();
                inner.spawn(Access::new(), move || {
                    thread::sleep(Duration::from_millis(50));
                    done.fetch_add(1, Ordering::Relaxed);
                })?;
                drop(outer);
                assert_eq!(done.load(Ordering::Relaxed), 1, "{}", region.backend());
                assert!(inner.end().is_err());
                Ok::<(), paladin::Error>(())
            })
            .unwrap()
            .unwrap();
    }
}

#[test]
fn misuse_of_groups_is_an_invalid_state() {
    for runtime in runtimes() {
        runtime
            .task_region(|region| {
                let err = region.end_sync_group().unwrap_err();
                assert!(matches!(err, Error::InvalidState(_)), "{err}");

                let outer = region.begin_sync_group();
                let inner = region.begin_sync_group();
                outer.end().unwrap();
                let err = inner.end().unwrap_err();
                assert!(matches!(err, Error::InvalidState(_)), "{err}");

                let group = region.begin_sync_group();
                region.end_sync_group().unwrap();
                let err = group.spawn(Access::new(), || ()).unwrap_err();
                assert!(matches!(err, Error::InvalidState(_)), "{err}");
                let err = group.end().unwrap_err();
                assert!(matches!(err, Error::InvalidState(_)), "{err}");
                assert_eq!(region.depth(), 0);
            })
            .unwrap();
    }
}

#[test]
fn group_failures_surface_at_the_join_without_cancelling_siblings() {
    for runtime in runtimes() {
        let ran = AtomicUsize::new(0);
        runtime
            .task_region(|region| {
                let ran = &ran;
                let group = region.begin_sync_group();
                let mut handles = Vec::new();
                for i in 0..6 {
                    handles.push(group.spawn(Access::new(), move || -> Result<(), String> {
                        ran.fetch_add(1, Ordering::Relaxed);
                        if i % 2 == 1 { Err(format!("task {i}")) } else { Ok(()) }
                    })?);
                }
                let err = group.end().unwrap_err();
                assert_eq!(err.to_string(), "body failed: task 1 (2 more suppressed)");
                let failed: Vec<_> = handles.iter().map(|h| h.has_failed()).collect();
                assert_eq!(failed, vec![false, true, false, true, false, true]);
                Ok::<(), paladin::Error>(())
            })
            .unwrap()
            .unwrap();
        assert_eq!(ran.into_inner(), 6);
    }
}

#[test]
fn failures_of_a_dropped_group_reach_the_region() {
    for runtime in runtimes() {
        let err = runtime
            .task_region(|region| {
                let group = region.begin_sync_group();
                group.spawn(Access::new(), || -> () { panic!("lost") })?;
                drop(group);
                assert_eq!(region.depth(), 0);
                Ok::<(), paladin::Error>(())
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "body panicked: lost");
    }
}

#[test]
fn spawn_blocks_covers_the_space() {
    let splitter = Splitter::new(4, CuttingStrategy::Block, StrategyParameter::Grain(10)).unwrap();
    for runtime in runtimes() {
        let hits: Vec<_> = (0..95).map(|_| AtomicUsize::new(0)).collect();
        let handles = runtime
            .task_region(|region| {
                region.spawn_blocks(&splitter, hits.len(), &Access::new(), |range| {
                    for i in range {
                        hits[i].fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .unwrap()
            .unwrap();
        assert_eq!(handles.len(), 10);
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }
}

#[test]
fn tasks_may_run_nested_loops_and_regions() {
    let splitter = Splitter::new(4, CuttingStrategy::Block, StrategyParameter::Threads).unwrap();
    for runtime in runtimes() {
        let total = AtomicUsize::new(0);
        runtime
            .task_region(|region| {
                for _ in 0..8 {
                    let (runtime, total) = (&runtime, &total);
                    region.spawn(Access::new(), move || {
                        runtime.parallel_for_each(&splitter, 10, |_| {
                            total.fetch_add(1, Ordering::Relaxed);
                        })?;
                        runtime.task_region(|inner| {
                            inner.spawn(Access::new(), || {
                                total.fetch_add(1, Ordering::Relaxed);
                            })
                        })??;
                        Ok::<(), paladin::Error>(())
                    })?;
                }
                Ok::<(), paladin::Error>(())
            })
            .unwrap()
            .unwrap();
        assert_eq!(total.into_inner(), 8 * 11);
    }
}

#[test]
fn undeclared_accesses_are_caught_in_debug_builds() {
    if !cfg!(debug_assertions) {
        return;
    }
    for backend in BACKENDS {
        let runtime = runtime(backend);
        let (x, y) = (BufferId::from_key(1), BufferId::from_key(2));
        let err = runtime
            .task_region(|region| {
                region.spawn(Access::new().read(x), move || {
                    assert_declared(x, AccessMode::Read);
                    assert_declared(y, AccessMode::Write);
                })
            })
            .unwrap_err();
        assert!(err.to_string().contains("without declaring it"), "{err}");
    }
}
