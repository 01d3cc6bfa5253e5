//! Error taxonomy for the engine (see spec §7).
//!
//! `Backpressure` and `SourceFinished` are deliberately *not* represented
//! here: spec.md §7 frames both as non-error control signals, carried by
//! `FireResult` / `EmitResult` instead of the exception channel.

use thiserror::Error;

/// Top-level engine error, enriched with whatever context was available at
/// the point of failure.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// A factory/source/sink `init` hook threw. Surfaced at startup; the
    /// topology never transitions to `Running`.
    #[error("initialization failed for {component} \"{name}\": {message}")]
    InitializationFailure {
        component: &'static str,
        name: String,
        message: String,
    },

    /// A factory's `process`/`change_run` hook threw mid-run. `worker_id`
    /// is `None` until a worker thread catches it and stamps its own id
    /// (spec §7 "enriched with ... worker id").
    #[error(
        "factory \"{factory_name}\" (tag=\"{tag}\", plugin={plugin_name}) failed on event {event_number} (worker {worker_id:?}): {message}"
    )]
    RuntimeFactoryFailure {
        factory_name: String,
        tag: String,
        plugin_name: String,
        event_number: u64,
        worker_id: Option<usize>,
        message: String,
    },

    /// A recursive `create_and_get` referenced a factory that does not
    /// exist and dummy creation was disallowed.
    #[error("no factory registered for type \"{type_name}\" tag=\"{tag}\"")]
    MissingFactory { type_name: String, tag: String },

    /// Observed by the supervisor; the worker's underlying thread is
    /// detached, not joined.
    #[error("worker {worker_id} timed out on arrow \"{arrow_name}\" (last heartbeat {elapsed_ms}ms ago)")]
    WorkerTimeout {
        worker_id: usize,
        arrow_name: String,
        elapsed_ms: u64,
    },

    /// A worker thread panicked outright (as opposed to an arrow returning
    /// `Err`). `event_number` is `None` when the catching thread couldn't
    /// tell which event was in flight at panic time.
    #[error("unknown exception in arrow \"{arrow_name}\" worker {worker_id} event {event_number:?}: {message}")]
    UnknownException {
        arrow_name: String,
        worker_id: usize,
        event_number: Option<u64>,
        message: String,
    },

    /// The topology was asked to do something invalid for its current
    /// lifecycle state (e.g. `run` while not `Paused`).
    #[error("invalid topology transition: {0}")]
    InvalidTransition(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn runtime_factory(factory_name: impl Into<String>,
                            tag: impl Into<String>,
                            plugin_name: impl Into<String>,
                            event_number: u64,
                            message: impl Into<String>)
                            -> Self {
        EngineError::RuntimeFactoryFailure { factory_name: factory_name.into(),
                                             tag: tag.into(),
                                             plugin_name: plugin_name.into(),
                                             event_number,
                                             worker_id: None,
                                             message: message.into() }
    }

    /// Stamp the worker id that observed this error, if it's the variant
    /// that carries one (spec §7, §8-S7).
    pub fn with_worker_id(mut self, id: usize) -> Self {
        if let EngineError::RuntimeFactoryFailure { worker_id, .. } = &mut self {
            *worker_id = Some(id);
        }
        self
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
