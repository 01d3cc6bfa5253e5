//! End-to-end scenarios over the full arrow scheduler + factory graph,
//! driven through `arrowflow-demos`'s pipeline builder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arrowflow_core::config::EngineConfig;
use arrowflow_core::databundle::FactoryRegistry;
use arrowflow_core::errors::EngineError;
use arrowflow_demos::{build_broadcast_pipeline, build_pipeline, build_unfold_pipeline, CallGraphInspectingSink,
                       ChainFactory, CollectingSink, FactoryCounters, FailingFactory, IntSource, RepeatUnfolder,
                       RequestTagStage, SummingSink};

fn base_config() -> EngineConfig {
    EngineConfig { n_workers: 4, max_inflight_events: 16, ..Default::default() }
}

/// S1: linear pipeline. Source emits 20 events each carrying x=7; a stage
/// derives z = (x*2)-1 = 13 through two chained factories; the sink sums z.
#[test]
fn s1_linear_pipeline_sums_to_expected_total() {
    let config = base_config();
    let counters = FactoryCounters::new();
    let registry =
        FactoryRegistry::builder().register::<i64>("double",
                                                     "y",
                                                     "test",
                                                     ChainFactory { upstream_tag: "x".to_string(),
                                                                    transform: |v| v * 2,
                                                                    counters: counters.clone() })
                                   .register::<i64>("subtract_one",
                                                     "z",
                                                     "test",
                                                     ChainFactory { upstream_tag: "y".to_string(),
                                                                    transform: |v| v - 1,
                                                                    counters: counters.clone() })
                                   .build();

    let sum = Arc::new(Mutex::new(0i64));
    let count = Arc::new(AtomicU64::new(0));
    let source = Box::new(IntSource::new(20, 7));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "z".to_string() });
    let sink = Box::new(SummingSink { tag: "z".to_string(), sum: sum.clone(), count: count.clone() });

    let app = build_pipeline(config, registry, source, "derive", stage, "sum", sink, 8);
    let snapshot = app.run().expect("run should succeed");

    assert_eq!(count.load(Ordering::Relaxed), 20);
    assert_eq!(*sum.lock().unwrap(), 20 * 13);
    assert_eq!(snapshot.total_events_completed, 20);
    assert_eq!(counters.process_calls(), 40, "each of the two factories runs once per event");
}

/// S2: `nskip` drops the first N events before they ever reach downstream.
#[test]
fn s2_nskip_drops_leading_events() {
    let mut config = base_config();
    config.nskip = 5;
    let counters = FactoryCounters::new();
    let registry =
        FactoryRegistry::builder().register::<i64>("double",
                                                     "y",
                                                     "test",
                                                     ChainFactory { upstream_tag: "x".to_string(),
                                                                    transform: |v| v * 2,
                                                                    counters: counters.clone() })
                                   .register::<i64>("subtract_one",
                                                     "z",
                                                     "test",
                                                     ChainFactory { upstream_tag: "y".to_string(),
                                                                    transform: |v| v - 1,
                                                                    counters: counters.clone() })
                                   .build();

    let sum = Arc::new(Mutex::new(0i64));
    let count = Arc::new(AtomicU64::new(0));
    let source = Box::new(IntSource::new(20, 7));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "z".to_string() });
    let sink = Box::new(SummingSink { tag: "z".to_string(), sum: sum.clone(), count: count.clone() });

    let app = build_pipeline(config, registry, source, "derive", stage, "sum", sink, 8);
    app.run().expect("run should succeed");

    assert_eq!(count.load(Ordering::Relaxed), 15, "events 6..=20 should reach the sink");
    assert_eq!(*sum.lock().unwrap(), 15 * 13);
}

/// S3: `nevents` caps how many events the source ever pushes downstream.
#[test]
fn s3_nevents_caps_total_processed() {
    let mut config = base_config();
    config.nevents = Some(3);
    let counters = FactoryCounters::new();
    let registry =
        FactoryRegistry::builder().register::<i64>("double",
                                                     "y",
                                                     "test",
                                                     ChainFactory { upstream_tag: "x".to_string(),
                                                                    transform: |v| v * 2,
                                                                    counters: counters.clone() })
                                   .register::<i64>("subtract_one",
                                                     "z",
                                                     "test",
                                                     ChainFactory { upstream_tag: "y".to_string(),
                                                                    transform: |v| v - 1,
                                                                    counters: counters.clone() })
                                   .build();

    let sum = Arc::new(Mutex::new(0i64));
    let count = Arc::new(AtomicU64::new(0));
    let source = Box::new(IntSource::new(20, 7));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "z".to_string() });
    let sink = Box::new(SummingSink { tag: "z".to_string(), sum: sum.clone(), count: count.clone() });

    let app = build_pipeline(config, registry, source, "derive", stage, "sum", sink, 8);
    app.run().expect("run should succeed");

    assert_eq!(count.load(Ordering::Relaxed), 3);
    assert_eq!(*sum.lock().unwrap(), 3 * 13);
}

/// S4: a four-deep recursive factory chain (a -> b -> c -> d), triggered by
/// one stage requesting only the deepest tag. Every event should resolve the
/// whole chain and record exactly one call-graph edge per (caller, callee)
/// pair.
#[test]
fn s4_recursive_factory_chain_resolves_and_records_callgraph() {
    let config = base_config();
    let counters = FactoryCounters::new();
    let registry =
        FactoryRegistry::builder().register::<i64>("a_factory",
                                                     "a",
                                                     "test",
                                                     ChainFactory { upstream_tag: "x".to_string(),
                                                                    transform: |v| v + 1,
                                                                    counters: counters.clone() })
                                   .register::<i64>("b_factory",
                                                     "b",
                                                     "test",
                                                     ChainFactory { upstream_tag: "a".to_string(),
                                                                    transform: |v| v + 1,
                                                                    counters: counters.clone() })
                                   .register::<i64>("c_factory",
                                                     "c",
                                                     "test",
                                                     ChainFactory { upstream_tag: "b".to_string(),
                                                                    transform: |v| v + 1,
                                                                    counters: counters.clone() })
                                   .register::<i64>("d_factory",
                                                     "d",
                                                     "test",
                                                     ChainFactory { upstream_tag: "c".to_string(),
                                                                    transform: |v| v + 1,
                                                                    counters: counters.clone() })
                                   .build();

    let edge_counts = Arc::new(Mutex::new(Vec::new()));
    let source = Box::new(IntSource::new(10, 1));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "d".to_string() });
    let sink = Box::new(CallGraphInspectingSink { edge_counts: edge_counts.clone() });

    let app = build_pipeline(config, registry, source, "derive", stage, "sink", sink, 8);
    let snapshot = app.run().expect("run should succeed");

    assert_eq!(snapshot.total_events_completed, 10);
    assert_eq!(counters.process_calls(), 40, "each of the four factories runs exactly once per event");

    let counts = edge_counts.lock().unwrap();
    assert_eq!(counts.len(), 10);
    assert!(counts.iter().all(|&c| c == 3), "d->c, c->b, b->a: exactly 3 edges per event, got {counts:?}");
}

/// S5: a run-number transition partway through the stream. `change_run`
/// should fire exactly twice per factory: once for the initial run, once at
/// the boundary. A single worker keeps event ordering (and therefore run
/// transitions) strictly monotonic.
#[test]
fn s5_run_transition_invokes_change_run_exactly_twice() {
    let mut config = base_config();
    config.n_workers = 1;
    let counters = FactoryCounters::new();
    let registry =
        FactoryRegistry::builder().register::<i64>("double",
                                                     "y",
                                                     "test",
                                                     ChainFactory { upstream_tag: "x".to_string(),
                                                                    transform: |v| v * 2,
                                                                    counters: counters.clone() })
                                   .build();

    let sum = Arc::new(Mutex::new(0i64));
    let count = Arc::new(AtomicU64::new(0));
    let source = Box::new(IntSource::new(10, 7).with_run_boundary(5, 22, 49));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "y".to_string() });
    let sink = Box::new(SummingSink { tag: "y".to_string(), sum: sum.clone(), count: count.clone() });

    let app = build_pipeline(config, registry, source, "derive", stage, "sum", sink, 4);
    app.run().expect("run should succeed");

    assert_eq!(count.load(Ordering::Relaxed), 10);
    assert_eq!(counters.change_run_calls(), 2, "one transition into run 22, one into run 49");
    assert_eq!(counters.init_calls(), 1, "Init runs exactly once regardless of run transitions");
}

/// S6: a mailbox capacity far smaller than the event count forces
/// backpressure. No event may be lost or delivered twice.
#[test]
fn s6_backpressure_preserves_every_event_exactly_once() {
    let mut config = base_config();
    config.max_inflight_events = 8;
    let total = 50u64;
    let registry = FactoryRegistry::builder().build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let source = Box::new(IntSource::new(total, 7));
    let stage = Box::new(RequestTagStage { label: "noop".to_string(), tag: "x".to_string() });
    let sink = Box::new(CollectingSink { seen: seen.clone() });

    let app = build_pipeline(config, registry, source, "noop", stage, "collect", sink, 2);
    let snapshot = app.run().expect("run should succeed");

    let mut got = seen.lock().unwrap().clone();
    got.sort_unstable();
    assert_eq!(got, (1..=total).collect::<Vec<u64>>(), "no event lost or duplicated under backpressure");
    assert_eq!(snapshot.total_events_completed, total);

    let total_retry_micros: u64 = snapshot.per_worker.iter().map(|w| w.retry_micros).sum();
    assert!(total_retry_micros > 0, "a 2-slot mailbox against 4 workers should force at least one ComeBackLater");
}

/// S7: a factory that throws on one specific event. The error surfacing at
/// `Application::run` must carry the factory's name, tag, plugin, the
/// catching worker's id, and the exact event number.
#[test]
fn s7_factory_exception_is_enriched_to_the_top() {
    let config = base_config();
    let registry = FactoryRegistry::builder().register::<i64>("broken",
                                                                "d",
                                                                "test",
                                                                FailingFactory { upstream_tag: "x".to_string(),
                                                                                 fail_on_event: 3 })
                                              .build();

    let source = Box::new(IntSource::new(10, 7));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "d".to_string() });
    let sink = Box::new(CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) });

    let app = build_pipeline(config, registry, source, "derive", stage, "sink", sink, 4);
    let err = app.run().expect_err("event 3 should trip the failing factory");

    match err {
        EngineError::RuntimeFactoryFailure { factory_name, tag, plugin_name, event_number, worker_id, .. } => {
            assert_eq!(factory_name, "broken");
            assert_eq!(tag, "d");
            assert_eq!(plugin_name, "test");
            assert_eq!(event_number, 3);
            assert!(worker_id.is_some(), "the catching worker should stamp its id");
        }
        other => panic!("expected RuntimeFactoryFailure, got {other:?}"),
    }
}

/// S8: a source unbounded by `nevents` paired with a factory that fails on
/// one specific event. Before the supervisor wired `drain_topology` into its
/// excepted-worker check, the other workers would keep spinning on the
/// never-finishing source forever; this asserts `run()` actually returns
/// instead of hanging.
#[test]
fn s8_long_running_source_drains_on_excepted_worker() {
    let config = base_config();
    let registry = FactoryRegistry::builder().register::<i64>("broken",
                                                                "d",
                                                                "test",
                                                                FailingFactory { upstream_tag: "x".to_string(),
                                                                                 fail_on_event: 5 })
                                              .build();

    let source = Box::new(IntSource::unbounded(7));
    let stage = Box::new(RequestTagStage { label: "derive".to_string(), tag: "d".to_string() });
    let sink = Box::new(CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) });

    let app = build_pipeline(config, registry, source, "derive", stage, "sink", sink, 4);

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(app.run());
    });

    let result = rx.recv_timeout(std::time::Duration::from_secs(10))
                   .expect("run() should complete once the supervisor drains the topology, not hang forever");
    match result.expect_err("the failing factory should still surface its error") {
        EngineError::RuntimeFactoryFailure { event_number, .. } => assert_eq!(event_number, 5),
        other => panic!("expected RuntimeFactoryFailure, got {other:?}"),
    }
}

/// S9: a Broadcast arrow fanning one source out to two sinks. Every event
/// should reach both, since the pool has ample headroom for the fan-out
/// copy.
#[test]
fn s9_broadcast_fans_out_to_every_sink() {
    let config = base_config();
    let registry = FactoryRegistry::builder().build();

    let seen1 = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::new(Mutex::new(Vec::new()));
    let source = Box::new(IntSource::new(10, 7));
    let broadcast = Box::new(RequestTagStage { label: "broadcast".to_string(), tag: "x".to_string() });
    let sinks: Vec<(String, Box<dyn arrowflow_core::interfaces::EventProcessor>)> =
        vec![("sink1".to_string(), Box::new(CollectingSink { seen: seen1.clone() })),
             ("sink2".to_string(), Box::new(CollectingSink { seen: seen2.clone() }))];

    let app = build_broadcast_pipeline(config, registry, source, "broadcast", broadcast, sinks, 8);
    let snapshot = app.run().expect("run should succeed");

    let mut got1 = seen1.lock().unwrap().clone();
    let mut got2 = seen2.lock().unwrap().clone();
    got1.sort_unstable();
    got2.sort_unstable();
    assert_eq!(got1, (1..=10).collect::<Vec<u64>>(), "sink1 (output 0) always gets the original token");
    assert_eq!(got2, (1..=10).collect::<Vec<u64>>(), "sink2 gets a fresh pool copy of every event");
    assert_eq!(snapshot.total_events_completed, 20, "both sinks count toward completion");
}

/// S10: the same Broadcast topology, but with only one pool-resident event
/// at a time — exactly enough for the original token, never enough for a
/// fan-out copy. Exercises the pool-exhaustion fallback (drop the copy
/// rather than block) at every single event, deterministically.
#[test]
fn s10_broadcast_drops_fanout_copy_under_pool_exhaustion() {
    let mut config = base_config();
    config.max_inflight_events = 1;
    let registry = FactoryRegistry::builder().build();

    let seen1 = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::new(Mutex::new(Vec::new()));
    let source = Box::new(IntSource::new(5, 7));
    let broadcast = Box::new(RequestTagStage { label: "broadcast".to_string(), tag: "x".to_string() });
    let sinks: Vec<(String, Box<dyn arrowflow_core::interfaces::EventProcessor>)> =
        vec![("sink1".to_string(), Box::new(CollectingSink { seen: seen1.clone() })),
             ("sink2".to_string(), Box::new(CollectingSink { seen: seen2.clone() }))];

    let app = build_broadcast_pipeline(config, registry, source, "broadcast", broadcast, sinks, 2);
    app.run().expect("run should succeed even when every fan-out copy is dropped");

    let mut got1 = seen1.lock().unwrap().clone();
    got1.sort_unstable();
    assert_eq!(got1, (1..=5).collect::<Vec<u64>>(), "output 0 never needs a spare pool event");
    assert!(seen2.lock().unwrap().is_empty(), "a pool of size 1 can never spare a copy for output 1");
}

/// S11: an Unfold arrow splitting each parent event into several children,
/// each carrying its own unfolded payload.
#[test]
fn s11_unfold_produces_children_per_parent() {
    let config = base_config();
    let registry = FactoryRegistry::builder().build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let source = Box::new(IntSource::new(5, 7));
    let unfolder = Box::new(RepeatUnfolder { label: "repeat".to_string(), upstream_tag: "x".to_string(), times: 3 });
    let sink = Box::new(CollectingSink { seen: seen.clone() });

    let app = build_unfold_pipeline(config, registry, source, "repeat", unfolder, "sink", sink, 8);
    let snapshot = app.run().expect("run should succeed");

    assert_eq!(seen.lock().unwrap().len(), 15, "5 parents x 3 children each");
    assert_eq!(snapshot.total_events_completed, 15);
}
