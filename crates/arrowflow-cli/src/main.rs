//! arrowflow: command-line runner wiring configuration to a demo topology
//! and printing the final performance report (spec §7).

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use arrowflow_core::config::EngineConfig;
use arrowflow_core::databundle::FactoryRegistry;
use arrowflow_demos::{build_pipeline, ChainFactory, FactoryCounters, IntSource, RequestTagStage, SummingSink};

fn main() {
    env_logger::init();

    let config = match EngineConfig::load(None) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let counters = FactoryCounters::new();
    let registry = FactoryRegistry::builder().register::<i64>("double",
                                                               "y",
                                                               "arrowflow-demos",
                                                               ChainFactory { upstream_tag: "x".to_string(),
                                                                              transform: |v| v * 2,
                                                                              counters: counters.clone() })
                                              .register::<i64>("subtract_one",
                                                               "z",
                                                               "arrowflow-demos",
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

    match app.run() {
        Ok(snapshot) => {
            println!("events processed: {}", snapshot.total_events_completed);
            println!("average throughput: {:.2} events/sec", snapshot.average_throughput);

            let bottleneck =
                snapshot.per_arrow
                        .iter()
                        .max_by_key(|a| a.avg_latency_micros.saturating_mul(a.queue_visit_count.max(1)));
            if let Some(b) = bottleneck {
                let busy_millis = (b.avg_latency_micros as f64 * b.queue_visit_count as f64) / 1000.0;
                let efficiency = if snapshot.uptime_millis > 0 { busy_millis / snapshot.uptime_millis as f64 } else { 0.0 };
                println!("bottleneck arrow: {} ({} visits, {:.1}% of uptime busy)",
                         b.name,
                         b.queue_visit_count,
                         efficiency * 100.0);
            }

            println!("per-arrow breakdown:");
            for a in &snapshot.per_arrow {
                println!("  {:<8} messages={:<6} avg_latency_us={:<8} queue_visits={:<6} queue_overhead={:.1}%",
                         a.name,
                         a.messages_completed,
                         a.avg_latency_micros,
                         a.queue_visit_count,
                         a.queue_overhead_fraction * 100.0);
            }
            println!("sum(z) = {}", *sum.lock().unwrap());
        }
        Err(e) => {
            eprintln!("run failed: {e}");
            app.set_exit_code(1);
        }
    }

    std::process::exit(app.exit_code());
}
