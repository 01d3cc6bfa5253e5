//! Timeout supervision (spec §4.4 "Timeout supervision", §7
//! `WorkerTimeout`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::warn;

use crate::errors::EngineError;
use crate::metrics::MetricsRegistry;
use crate::scheduler::Scheduler;
use crate::topology::TopologyStatus;

/// Periodically samples worker heartbeats and flags any worker exceeding
/// its threshold. A timed-out worker is *not* joined — its thread is simply
/// left to run or hang; the caller drops its `JoinHandle` so the process
/// can still exit (spec: "detaches its underlying thread"). Also watches
/// for any worker that recorded an exception and, if so, drains the
/// topology so the other workers stop spinning on a source that would
/// otherwise run forever (spec §7 "Propagation policy").
pub struct Supervisor {
    warmup_timeout: Duration,
    steady_timeout: Duration,
    max_inflight_events: usize,
    n_workers: usize,
    timed_out: Mutex<Vec<usize>>,
    stop: AtomicBool,
}

impl Supervisor {
    pub fn new(warmup_timeout: Duration, steady_timeout: Duration, max_inflight_events: usize, n_workers: usize) -> Self {
        Supervisor { warmup_timeout,
                     steady_timeout,
                     max_inflight_events,
                     n_workers: n_workers.max(1),
                     timed_out: Mutex::new(Vec::new()),
                     stop: AtomicBool::new(false) }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn timed_out_workers(&self) -> Vec<usize> {
        self.timed_out.lock().unwrap().clone()
    }

    /// The threshold in effect at `uptime`: warmup while the graph is still
    /// cold (spec: "uptime < warmup_timeout × max_inflight / n_workers"),
    /// steady afterwards.
    fn threshold_at(&self, uptime: Duration) -> Duration {
        let warmup_window = self.warmup_timeout.mul_f64(self.max_inflight_events as f64 / self.n_workers as f64);
        if uptime < warmup_window {
            self.warmup_timeout
        } else {
            self.steady_timeout
        }
    }

    /// Blocking poll loop; run on its own thread. Exits when `request_stop`
    /// is called.
    pub fn run(&self, metrics: &MetricsRegistry, scheduler: &Scheduler, poll_interval: Duration) {
        while !self.stop.load(Ordering::Acquire) {
            std::thread::sleep(poll_interval);
            let uptime = metrics.uptime();
            let threshold = self.threshold_at(uptime);

            for (idx, w) in metrics.workers.iter().enumerate() {
                let last_heartbeat = Duration::from_micros(w.last_heartbeat_micros.load(Ordering::Relaxed));
                if uptime <= last_heartbeat {
                    continue;
                }
                let since = uptime - last_heartbeat;
                if since > threshold {
                    let mut timed_out = self.timed_out.lock().unwrap();
                    if !timed_out.contains(&idx) {
                        warn!("worker {idx} timed out: no heartbeat for {since:?} (threshold {threshold:?})");
                        timed_out.push(idx);
                        let mut excepted = w.excepted.lock().unwrap();
                        if excepted.is_none() {
                            let arrow_name = w.last_arrow.lock().unwrap().clone().unwrap_or_default();
                            *excepted = Some(EngineError::WorkerTimeout { worker_id: idx,
                                                                          arrow_name,
                                                                          elapsed_ms: since.as_millis() as u64 });
                        }
                    }
                }
            }

            let any_excepted = metrics.workers.iter().any(|w| w.excepted.lock().unwrap().is_some());
            if any_excepted && scheduler.topology_status() == TopologyStatus::Running {
                warn!("excepted worker detected, draining topology");
                scheduler.drain_topology();
            }
        }
    }
}
