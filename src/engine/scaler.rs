// src/engine/scaler.rs

use std::time::Instant;

use tracing::debug;

use crate::config::ScalerConfig;

/// Load observed at one scale tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSample {
    pub queue_len: usize,
    pub idle: usize,
    pub busy: usize,
    /// Live non-retiring workers plus pending spawns.
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Hold,
    /// Spawn this many workers.
    Up(usize),
    /// Retire this many workers.
    Down(usize),
}

/// Window-based scaler.
///
/// A condition (queue over threshold, idle workers over threshold) must hold
/// at every sample for a full `window` before the scaler acts. After acting
/// the window starts over, so the pool moves at most `step` workers per
/// window.
#[derive(Debug)]
pub struct DynamicScaler {
    config: ScalerConfig,
    min_workers: usize,
    max_workers: usize,
    overloaded_since: Option<Instant>,
    underloaded_since: Option<Instant>,
}

impl DynamicScaler {
    pub fn new(config: ScalerConfig, min_workers: usize, max_workers: usize) -> Self {
        Self {
            config,
            min_workers,
            max_workers,
            overloaded_since: None,
            underloaded_since: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Forget any observation in progress.
    pub fn reset(&mut self) {
        self.overloaded_since = None;
        self.underloaded_since = None;
    }

    pub fn evaluate(&mut self, sample: LoadSample, now: Instant) -> ScaleDecision {
        if sample.queue_len > self.config.queue_threshold {
            self.overloaded_since.get_or_insert(now);
        } else {
            self.overloaded_since = None;
        }

        if sample.idle > self.config.idle_threshold {
            self.underloaded_since.get_or_insert(now);
        } else {
            self.underloaded_since = None;
        }

        if let Some(since) = self.overloaded_since {
            if now.saturating_duration_since(since) >= self.config.window
                && sample.workers < self.max_workers
            {
                self.overloaded_since = None;
                let n = self.config.step.min(self.max_workers - sample.workers);
                debug!(?sample, n, "sustained backlog; scaling up");
                return ScaleDecision::Up(n);
            }
        }

        if let Some(since) = self.underloaded_since {
            if now.saturating_duration_since(since) >= self.config.window
                && sample.workers > self.min_workers
            {
                self.underloaded_since = None;
                let n = self.config.step.min(sample.workers - self.min_workers);
                debug!(?sample, n, "sustained idleness; scaling down");
                return ScaleDecision::Down(n);
            }
        }

        ScaleDecision::Hold
    }
}
