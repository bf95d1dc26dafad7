//! Alert detection.
//!
//! Three independent detectors run per tick: high-of-day, running-up, and the
//! top-gainer screen. Each is side-effect-free except for the persistence row
//! it emits on a positive detection; the engine dispatches those rows to the
//! persistence worker.

mod high_of_day;
pub mod rsi;
mod running_up;
mod top_gainer;

use crate::config::EngineConfig;

/// Runs the detectors against store state, producing rows to persist.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    pub(crate) config: EngineConfig,
}

impl AlertEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}
