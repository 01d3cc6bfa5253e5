//! Wires a source, one stage, and a sink into a runnable `Application`.
//!
//! Every scenario in this crate's tests is a three-arrow pipeline; what
//! varies is the factory registry behind the stage and the source/sink
//! plugged in. Keeping one builder means the interesting behavior (the
//! recursive factory chain, the run transition, the failure) lives entirely
//! in the pieces passed in, not in graph-wiring boilerplate.

use std::sync::Arc;
use std::time::Duration;

use arrowflow_core::application::Application;
use arrowflow_core::config::EngineConfig;
use arrowflow_core::context::EngineContext;
use arrowflow_core::databundle::FactoryRegistry;
use arrowflow_core::event::{Event, Pool};
use arrowflow_core::interfaces::{EventProcessor, EventSource};
use arrowflow_core::mailbox::Mailbox;
use arrowflow_core::interfaces::Unfolder;
use arrowflow_core::topology::{Arrow, BackoffConfig, BroadcastArrow, SinkArrow, SourceArrow, StageArrow, StageLogic,
                                Topology, UnfoldArrow};

pub fn build_pipeline(config: EngineConfig,
                       registry: FactoryRegistry,
                       source: Box<dyn EventSource>,
                       stage_name: impl Into<String>,
                       stage: Box<dyn StageLogic>,
                       sink_name: impl Into<String>,
                       sink: Box<dyn EventProcessor>,
                       mailbox_capacity: usize)
                       -> Application {
    let ctx = EngineContext::new(config.clone());
    let registry = Arc::new(registry);
    let pool = Arc::new(Pool::new(config.max_inflight_events, 1, registry, ctx.clone(), true));

    let source_to_stage: Arc<Mailbox<Event>> = Arc::new(Mailbox::new(mailbox_capacity));
    let stage_to_sink: Arc<Mailbox<Event>> = Arc::new(Mailbox::new(mailbox_capacity));

    let backoff = BackoffConfig { strategy: config.backoff_strategy,
                                  initial: Duration::from_micros(config.initial_backoff_micros),
                                  tries: config.backoff_tries };
    let checkin = Duration::from_millis(config.checkin_time_millis);

    let source_arrow = SourceArrow::new("source",
                                        0,
                                        source,
                                        pool.clone(),
                                        source_to_stage.clone(),
                                        vec![1],
                                        config.chunk_size,
                                        backoff,
                                        checkin,
                                        config.nskip,
                                        config.nevents);

    let stage_arrow = StageArrow::new(stage_name,
                                      stage,
                                      vec![source_to_stage],
                                      Some(stage_to_sink.clone()),
                                      pool.clone(),
                                      vec![2],
                                      true,
                                      config.chunk_size,
                                      backoff,
                                      checkin);

    let sink_arrow = SinkArrow::new(sink_name, sink, stage_to_sink, pool.clone(), config.chunk_size, backoff, checkin);

    let arrows: Vec<Box<dyn Arrow>> = vec![Box::new(source_arrow), Box::new(stage_arrow), Box::new(sink_arrow)];
    let topology = Topology::new(arrows, pool);

    Application::new(config, topology)
}

/// Wires a source into a `BroadcastArrow` fanning out to one sink per entry
/// in `sinks` — the only builder in this crate that exercises fan-out rather
/// than a straight line.
pub fn build_broadcast_pipeline(config: EngineConfig,
                                 registry: FactoryRegistry,
                                 source: Box<dyn EventSource>,
                                 broadcast_name: impl Into<String>,
                                 broadcast: Box<dyn StageLogic>,
                                 sinks: Vec<(String, Box<dyn EventProcessor>)>,
                                 mailbox_capacity: usize)
                                 -> Application {
    let ctx = EngineContext::new(config.clone());
    let registry = Arc::new(registry);
    let pool = Arc::new(Pool::new(config.max_inflight_events, 1, registry, ctx.clone(), true));

    let source_to_broadcast: Arc<Mailbox<Event>> = Arc::new(Mailbox::new(mailbox_capacity));
    let broadcast_to_sinks: Vec<Arc<Mailbox<Event>>> =
        sinks.iter().map(|_| Arc::new(Mailbox::new(mailbox_capacity))).collect();

    let backoff = BackoffConfig { strategy: config.backoff_strategy,
                                  initial: Duration::from_micros(config.initial_backoff_micros),
                                  tries: config.backoff_tries };
    let checkin = Duration::from_millis(config.checkin_time_millis);

    let sink_base_idx = 2;
    let downstream: Vec<usize> = (0..sinks.len()).map(|i| sink_base_idx + i).collect();

    let source_arrow = SourceArrow::new("source",
                                        0,
                                        source,
                                        pool.clone(),
                                        source_to_broadcast.clone(),
                                        vec![1],
                                        config.chunk_size,
                                        backoff,
                                        checkin,
                                        config.nskip,
                                        config.nevents);

    let broadcast_arrow = BroadcastArrow::new(broadcast_name,
                                              broadcast,
                                              vec![source_to_broadcast],
                                              broadcast_to_sinks.clone(),
                                              pool.clone(),
                                              downstream,
                                              true,
                                              config.chunk_size,
                                              backoff,
                                              checkin);

    let mut arrows: Vec<Box<dyn Arrow>> = vec![Box::new(source_arrow), Box::new(broadcast_arrow)];
    for ((sink_name, sink), mailbox) in sinks.into_iter().zip(broadcast_to_sinks.into_iter()) {
        arrows.push(Box::new(SinkArrow::new(sink_name, sink, mailbox, pool.clone(), config.chunk_size, backoff, checkin)));
    }

    let topology = Topology::new(arrows, pool);
    Application::new(config, topology)
}

/// Wires a source into an `UnfoldArrow` that produces 0..N children per
/// parent event, feeding a single sink.
pub fn build_unfold_pipeline(config: EngineConfig,
                              registry: FactoryRegistry,
                              source: Box<dyn EventSource>,
                              unfold_name: impl Into<String>,
                              unfolder: Box<dyn Unfolder>,
                              sink_name: impl Into<String>,
                              sink: Box<dyn EventProcessor>,
                              mailbox_capacity: usize)
                              -> Application {
    let ctx = EngineContext::new(config.clone());
    let registry = Arc::new(registry);
    let pool = Arc::new(Pool::new(config.max_inflight_events, 1, registry, ctx.clone(), true));

    let source_to_unfold: Arc<Mailbox<Event>> = Arc::new(Mailbox::new(mailbox_capacity));
    let unfold_to_sink: Arc<Mailbox<Event>> = Arc::new(Mailbox::new(mailbox_capacity));

    let backoff = BackoffConfig { strategy: config.backoff_strategy,
                                  initial: Duration::from_micros(config.initial_backoff_micros),
                                  tries: config.backoff_tries };
    let checkin = Duration::from_millis(config.checkin_time_millis);

    let source_arrow = SourceArrow::new("source",
                                        0,
                                        source,
                                        pool.clone(),
                                        source_to_unfold.clone(),
                                        vec![1],
                                        config.chunk_size,
                                        backoff,
                                        checkin,
                                        config.nskip,
                                        config.nevents);

    let unfold_arrow = UnfoldArrow::new(unfold_name,
                                        unfolder,
                                        source_to_unfold,
                                        unfold_to_sink.clone(),
                                        pool.clone(),
                                        vec![2],
                                        config.chunk_size,
                                        backoff,
                                        checkin);

    let sink_arrow = SinkArrow::new(sink_name, sink, unfold_to_sink, pool.clone(), config.chunk_size, backoff, checkin);

    let arrows: Vec<Box<dyn Arrow>> = vec![Box::new(source_arrow), Box::new(unfold_arrow), Box::new(sink_arrow)];
    let topology = Topology::new(arrows, pool);

    Application::new(config, topology)
}
