//! Runtime metrics and the introspection snapshot (spec §6 "Introspection
//! / wire surface").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Per-arrow counters, one instance per arrow index, updated by the worker
/// that just fired it. `DashMap` is reserved here for the (currently
/// unused) cross-thread aggregation keyed by arrow name that a future
/// plugin-facing metrics export would need; the hot path indexes by arrow
/// position in a plain `Vec` instead (see `MetricsRegistry`).
#[derive(Default)]
pub struct ArrowMetrics {
    pub messages_completed: AtomicU64,
    total_latency_micros: AtomicU64,
    pub queue_visit_count: AtomicU64,
    total_queue_overhead_micros: AtomicU64,
}

impl ArrowMetrics {
    pub fn record_fire(&self, latency: Duration, queue_overhead: Duration, messages: u64) {
        self.messages_completed.fetch_add(messages, Ordering::Relaxed);
        self.total_latency_micros.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.queue_visit_count.fetch_add(1, Ordering::Relaxed);
        self.total_queue_overhead_micros
            .fetch_add(queue_overhead.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn avg_latency(&self) -> Duration {
        let visits = self.queue_visit_count.load(Ordering::Relaxed).max(1);
        Duration::from_micros(self.total_latency_micros.load(Ordering::Relaxed) / visits)
    }

    pub fn queue_overhead_fraction(&self) -> f64 {
        let total = self.total_latency_micros.load(Ordering::Relaxed) + self.total_queue_overhead_micros.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_queue_overhead_micros.load(Ordering::Relaxed) as f64 / total as f64
    }
}

#[derive(Default)]
pub struct WorkerMetrics {
    pub useful_micros: AtomicU64,
    pub retry_micros: AtomicU64,
    pub idle_micros: AtomicU64,
    pub scheduler_micros: AtomicU64,
    pub last_arrow: Mutex<Option<String>>,
    pub last_heartbeat_micros: AtomicU64,
    pub excepted: Mutex<Option<EngineError>>,
}

impl WorkerMetrics {
    pub fn heartbeat(&self, elapsed: Duration) {
        self.last_heartbeat_micros.store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Holds every arrow's and worker's metrics plus the overall run clock.
/// Shared read-only (beyond its interior atomics) across the scheduler,
/// workers, and the supervisor.
pub struct MetricsRegistry {
    start: std::time::Instant,
    pub arrows: Vec<ArrowMetrics>,
    pub workers: Vec<WorkerMetrics>,
    pub by_name: DashMap<String, usize>,
    total_events_completed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new(arrow_names: &[String], n_workers: usize) -> Self {
        let by_name = DashMap::new();
        for (idx, name) in arrow_names.iter().enumerate() {
            by_name.insert(name.clone(), idx);
        }
        MetricsRegistry { start: std::time::Instant::now(),
                          arrows: arrow_names.iter().map(|_| ArrowMetrics::default()).collect(),
                          workers: (0..n_workers).map(|_| WorkerMetrics::default()).collect(),
                          by_name,
                          total_events_completed: AtomicU64::new(0) }
    }

    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn start_instant(&self) -> std::time::Instant {
        self.start
    }

    pub fn record_events_completed(&self, n: u64) {
        self.total_events_completed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total_events_completed(&self) -> u64 {
        self.total_events_completed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, arrow_names: &[String], thread_count: usize) -> PerformanceSnapshot {
        let uptime = self.uptime();
        let total = self.total_events_completed();
        let average_throughput = if uptime.as_secs_f64() > 0.0 { total as f64 / uptime.as_secs_f64() } else { 0.0 };

        let per_arrow = arrow_names.iter()
                                    .zip(self.arrows.iter())
                                    .map(|(name, m)| ArrowSnapshot { name: name.clone(),
                                                                     messages_completed: m.messages_completed
                                                                                           .load(Ordering::Relaxed),
                                                                     avg_latency_micros: m.avg_latency().as_micros() as u64,
                                                                     queue_visit_count: m.queue_visit_count
                                                                                         .load(Ordering::Relaxed),
                                                                     queue_overhead_fraction: m.queue_overhead_fraction() })
                                    .collect();

        let per_worker = self.workers
                              .iter()
                              .enumerate()
                              .map(|(idx, m)| WorkerSnapshot { worker_id: idx,
                                                               useful_micros: m.useful_micros.load(Ordering::Relaxed),
                                                               retry_micros: m.retry_micros.load(Ordering::Relaxed),
                                                               idle_micros: m.idle_micros.load(Ordering::Relaxed),
                                                               scheduler_micros: m.scheduler_micros.load(Ordering::Relaxed),
                                                               last_arrow: m.last_arrow.lock().unwrap().clone(),
                                                               last_heartbeat_micros:
                                                                   m.last_heartbeat_micros.load(Ordering::Relaxed) })
                              .collect();

        PerformanceSnapshot { thread_count,
                              uptime_millis: uptime.as_millis() as u64,
                              total_events_completed: total,
                              instantaneous_throughput: average_throughput,
                              average_throughput,
                              per_arrow,
                              per_worker }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrowSnapshot {
    pub name: String,
    pub messages_completed: u64,
    pub avg_latency_micros: u64,
    pub queue_visit_count: u64,
    pub queue_overhead_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: usize,
    pub useful_micros: u64,
    pub retry_micros: u64,
    pub idle_micros: u64,
    pub scheduler_micros: u64,
    pub last_arrow: Option<String>,
    pub last_heartbeat_micros: u64,
}

/// The engine's introspection/wire surface (spec §6): everything an
/// external controller or CLI report needs, serializable as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub thread_count: usize,
    pub uptime_millis: u64,
    pub total_events_completed: u64,
    pub instantaneous_throughput: f64,
    pub average_throughput: f64,
    pub per_arrow: Vec<ArrowSnapshot>,
    pub per_worker: Vec<WorkerSnapshot>,
}
