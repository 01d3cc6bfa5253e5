//! Top-level lifecycle: `Uninitialized -> Initialized -> Running ->
//! {Paused, Draining} -> Finished -> Finalized` (spec §2, §4.4).

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::context::EngineContext;
use crate::errors::{EngineError, EngineResult};
use crate::event::Event;
use crate::metrics::{MetricsRegistry, PerformanceSnapshot};
use crate::scheduler::Scheduler;
use crate::supervisor::Supervisor;
use crate::topology::{FireResult, Topology, TopologyStatus};
use crate::{config::EngineConfig, locality::CpuTopology};

/// Extract a human-readable message from a `std::thread::JoinHandle::join`
/// panic payload, which is typed `Box<dyn Any + Send>` and conventionally
/// holds either a `&str` or a `String` (whatever `panic!` was given).
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker thread panicked with a non-string payload".to_string()
    }
}

/// Owns the topology, scheduler, metrics, and the worker/supervisor threads
/// for one run. `Application::run` is the `Run()` entry point spec §2
/// describes; `debug_step`/`list_objects` back the debug-mode surface of
/// spec §6.
pub struct Application {
    config: EngineConfig,
    ctx: EngineContext,
    scheduler: Arc<Scheduler>,
    metrics: Arc<MetricsRegistry>,
    cpu_topology: CpuTopology,
    exit_code: AtomicI32,
}

impl Application {
    pub fn new(config: EngineConfig, topology: Topology) -> Self {
        let ctx = EngineContext::new(config.clone());
        let arrow_names: Vec<String> = topology.arrows().iter().map(|a| a.name().to_string()).collect();
        let n_workers = config.n_workers.max(1);
        let metrics = Arc::new(MetricsRegistry::new(&arrow_names, n_workers));
        let scheduler = Arc::new(Scheduler::new(Arc::new(topology), ctx.clone()));
        Application { config, ctx, scheduler, metrics, cpu_topology: CpuTopology::discover(), exit_code: AtomicI32::new(0) }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let names: Vec<String> = self.scheduler.topology().arrows().iter().map(|a| a.name().to_string()).collect();
        self.metrics.snapshot(&names, self.config.n_workers.max(1))
    }

    /// Run the topology to completion: open every arrow, spawn
    /// `n_workers` worker threads plus a supervisor, wait for the topology
    /// to reach `Finalized`, and surface any worker exceptions (spec §7
    /// "Propagation policy").
    pub fn run(&self) -> EngineResult<PerformanceSnapshot> {
        self.scheduler.open_topology()?;
        self.scheduler.run_topology()?;

        let n_workers = self.config.n_workers.max(1);
        let supervisor = Arc::new(Supervisor::new(Duration::from_millis(self.config.warmup_timeout_millis),
                                                   Duration::from_millis(self.config.steady_timeout_millis),
                                                   self.config.max_inflight_events,
                                                   n_workers));

        let supervisor_handle = {
            let supervisor = supervisor.clone();
            let metrics = self.metrics.clone();
            let scheduler = self.scheduler.clone();
            std::thread::spawn(move || supervisor.run(&metrics, &scheduler, Duration::from_millis(50)))
        };

        let mut worker_handles = Vec::with_capacity(n_workers);
        for worker_id in 0..n_workers {
            let location_id = self.cpu_topology.location_id_for(self.config.locality, worker_id);
            let scheduler = self.scheduler.clone();
            let metrics = self.metrics.clone();
            worker_handles.push((worker_id,
                                  std::thread::spawn(move || crate::worker::run(&scheduler, &metrics, worker_id, location_id))));
        }

        for (worker_id, h) in worker_handles {
            if let Err(payload) = h.join() {
                let message = panic_message(&payload);
                error!("worker {worker_id} panicked: {message}");
                let mut excepted = self.metrics.workers[worker_id].excepted.lock().unwrap();
                if excepted.is_none() {
                    let arrow_name =
                        self.metrics.workers[worker_id].last_arrow.lock().unwrap().clone().unwrap_or_default();
                    *excepted = Some(EngineError::UnknownException { arrow_name,
                                                                     worker_id,
                                                                     event_number: None,
                                                                     message });
                }
            }
        }

        supervisor.request_stop();
        let _ = supervisor_handle.join();

        self.scheduler.finalize_topology();
        if let Err(e) = self.scheduler.topology().pool().registry().finalize_all() {
            log::warn!("factory finalize failed: {e}");
        }

        let timed_out = supervisor.timed_out_workers();
        for worker_id in &timed_out {
            let arrow_name = self.metrics.workers[*worker_id].last_arrow
                                  .lock()
                                  .unwrap()
                                  .clone()
                                  .unwrap_or_default();
            let elapsed = self.metrics.uptime().as_millis() as u64
                          - self.metrics.workers[*worker_id].last_heartbeat_micros.load(Ordering::Relaxed) / 1000;
            log::warn!("worker {worker_id} ({arrow_name}) detached after timeout ({elapsed}ms since heartbeat)");
        }

        let exceptions: Vec<EngineError> =
            self.metrics.workers.iter().filter_map(|w| w.excepted.lock().unwrap().clone()).collect();

        if !exceptions.is_empty() {
            self.set_exit_code(1);
            return Err(exceptions.into_iter().next().unwrap());
        }

        if !timed_out.is_empty() {
            self.set_exit_code(1);
        }

        info!("run complete: {} events processed", self.metrics.total_events_completed());
        Ok(self.snapshot())
    }

    pub fn request_pause(&self) {
        self.scheduler.request_topology_pause();
    }

    pub fn drain(&self) {
        self.scheduler.drain_topology();
    }

    pub fn topology_status(&self) -> TopologyStatus {
        self.scheduler.topology_status()
    }

    /// Fire every ready arrow exactly once, single-threaded, and report
    /// what happened — the debug-mode "step event-by-event" surface of
    /// spec §6, exposed as a plain method rather than a network endpoint.
    pub fn debug_step(&self) -> EngineResult<Vec<(String, FireResult)>> {
        let mut results = Vec::new();
        for arrow in self.scheduler.topology().arrows() {
            if !arrow.ready_to_fire() {
                continue;
            }
            let handle = crate::topology::WorkerHandle { worker_id: 0, location_id: 0 };
            let outcome = arrow.fire(handle)?;
            results.push((arrow.name().to_string(), outcome));
        }
        Ok(results)
    }

    /// List every databundle known to `event`'s FactorySet along with its
    /// status — the debug-mode "object listing" surface of spec §6.
    pub fn list_objects(&self, event: &Event) -> Vec<(String, &'static str, crate::databundle::FactoryCreationStatus)> {
        event.factory_set()
             .iter_bundles()
             .map(|b| (b.unique_name.clone(), b.type_name, b.creation_status()))
             .collect()
    }
}
