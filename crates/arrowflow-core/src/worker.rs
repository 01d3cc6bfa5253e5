//! Worker thread loop (spec §4.5).

use std::sync::atomic::Ordering;
use std::time::Instant;

use log::error;

use crate::metrics::MetricsRegistry;
use crate::scheduler::{BackoffState, Scheduler};
use crate::topology::{FireResult, TopologyStatus, WorkerHandle};

/// Runs on its own OS thread until the scheduler stops handing out
/// assignments (topology paused or finalized) or the arrow it's running
/// throws. Exceptions are captured on the worker's own metrics slot rather
/// than unwinding the thread uncaught, so the application can collect every
/// excepted worker's error at shutdown (spec §4.5, §7).
pub fn run(scheduler: &Scheduler, metrics: &MetricsRegistry, worker_id: usize, location_id: usize) {
    let worker_metrics = &metrics.workers[worker_id];
    let start = metrics.start_instant();
    let mut cursor = 0usize;
    let mut prev: Option<(usize, FireResult)> = None;

    loop {
        worker_metrics.heartbeat(start.elapsed());

        let sched_t0 = Instant::now();
        let (assignment, next_cursor) = scheduler.next_assignment(cursor, prev.take());
        worker_metrics.scheduler_micros.fetch_add(sched_t0.elapsed().as_micros() as u64, Ordering::Relaxed);
        cursor = next_cursor;

        let Some(idx) = assignment else {
            let status = scheduler.topology_status();
            if status == TopologyStatus::Paused || status == TopologyStatus::Finalized {
                return;
            }
            std::thread::sleep(std::time::Duration::from_micros(1));
            worker_metrics.idle_micros.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        let arrow = scheduler.topology().arrow(idx);
        *worker_metrics.last_arrow.lock().unwrap() = Some(arrow.name().to_string());

        let handle = WorkerHandle { worker_id, location_id };
        let mut backoff = BackoffState::new(arrow.backoff());
        let checkin = arrow.checkin_time();
        let attempt_start = Instant::now();
        let mut last_status = FireResult::ComeBackLater;

        loop {
            if attempt_start.elapsed() >= checkin || backoff.exhausted() {
                break;
            }

            let fire_t0 = Instant::now();
            let result = arrow.fire(handle);
            let elapsed = fire_t0.elapsed();

            match result {
                Ok(FireResult::KeepGoing) => {
                    worker_metrics.useful_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                    metrics.arrows[idx].record_fire(elapsed, std::time::Duration::ZERO, 1);
                    if arrow.is_sink() {
                        metrics.record_events_completed(1);
                    }
                    backoff.reset();
                    last_status = FireResult::KeepGoing;
                }
                Ok(FireResult::ComeBackLater) => {
                    worker_metrics.retry_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                    last_status = FireResult::ComeBackLater;
                    std::thread::sleep(backoff.next_delay());
                }
                Ok(FireResult::Finished) => {
                    last_status = FireResult::Finished;
                    break;
                }
                Err(e) => {
                    let enriched = e.with_worker_id(worker_id);
                    error!("worker {worker_id} arrow \"{}\" excepted: {enriched}", arrow.name());
                    *worker_metrics.excepted.lock().unwrap() = Some(enriched);
                    return;
                }
            }
        }

        prev = Some((idx, last_status));
    }
}
