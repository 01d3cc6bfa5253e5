//! Configuration options recognized by the engine (spec §6's key table).
//!
//! Loaded by layering, lowest to highest priority: built-in defaults, an
//! optional JSON file, then `ARROWFLOW_*` environment variables (read via
//! `dotenvy` so a `.env` file in the working directory is picked up too).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    None,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffinityStrategy {
    None,
    ComputeBound,
    MemoryBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalityStrategy {
    Global,
    Socket,
    Numa,
    Core,
    Cpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `n_workers` / `"Ncores"`.
    pub n_workers: usize,
    /// `max_inflight_events`.
    pub max_inflight_events: usize,
    /// Default per-arrow `chunk_size`; individual arrows may override.
    pub chunk_size: usize,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_tries: u32,
    pub initial_backoff_micros: u64,
    pub checkin_time_millis: u64,
    pub affinity: AffinityStrategy,
    pub locality: LocalityStrategy,
    pub steady_timeout_millis: u64,
    pub warmup_timeout_millis: u64,
    /// `nevents`: per-source cap, `None` for unbounded.
    pub nevents: Option<u64>,
    /// `nskip`: events to skip before the first one reaches downstream.
    pub nskip: u64,
    /// `autoactivate`: (type_name, tag) pairs force-created every event.
    pub autoactivate: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { n_workers: 4,
                       max_inflight_events: 64,
                       chunk_size: 1,
                       backoff_strategy: BackoffStrategy::Linear,
                       backoff_tries: 4,
                       initial_backoff_micros: 50,
                       checkin_time_millis: 50,
                       affinity: AffinityStrategy::None,
                       locality: LocalityStrategy::Global,
                       steady_timeout_millis: 30_000,
                       warmup_timeout_millis: 60_000,
                       nevents: None,
                       nskip: 0,
                       autoactivate: Vec::new() }
    }
}

impl EngineConfig {
    /// Load defaults, then overlay a JSON file (if `path` exists), then
    /// overlay `ARROWFLOW_*` environment variables.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p).map_err(|e| EngineError::Config(e.to_string()))?;
                serde_json::from_str(&raw).map_err(|e| EngineError::Config(e.to_string()))?
            }
            _ => EngineConfig::default(),
        };

        cfg.overlay_env()?;
        Ok(cfg)
    }

    fn overlay_env(&mut self) -> EngineResult<()> {
        if let Ok(v) = std::env::var("ARROWFLOW_N_WORKERS").or_else(|_| std::env::var("Ncores")) {
            self.n_workers = v.parse().map_err(|_| EngineError::Config(format!("bad n_workers: {v}")))?;
        }
        if let Ok(v) = std::env::var("ARROWFLOW_MAX_INFLIGHT_EVENTS") {
            self.max_inflight_events =
                v.parse().map_err(|_| EngineError::Config(format!("bad max_inflight_events: {v}")))?;
        }
        if let Ok(v) = std::env::var("ARROWFLOW_CHUNK_SIZE") {
            self.chunk_size = v.parse().map_err(|_| EngineError::Config(format!("bad chunk_size: {v}")))?;
        }
        if let Ok(v) = std::env::var("ARROWFLOW_NEVENTS") {
            self.nevents = Some(v.parse().map_err(|_| EngineError::Config(format!("bad nevents: {v}")))?);
        }
        if let Ok(v) = std::env::var("ARROWFLOW_NSKIP") {
            self.nskip = v.parse().map_err(|_| EngineError::Config(format!("bad nskip: {v}")))?;
        }
        Ok(())
    }
}
