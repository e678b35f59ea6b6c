//! Tuner - chunked loops and the chunk-size auto-tuner.
//!
//! A [`TunableLoop`] does its work in chunks. [`LoopTuner`] keeps calling
//! [`TunableLoop::step`] until the loop reports it is done or the abort time
//! passes, and picks each chunk size with [`ChunkTuner`] so that one chunk
//! takes roughly `goal` seconds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::GarboError;
use crate::ports::Clock;

pub const DEFAULT_GOAL: Duration = Duration::from_secs(2);

/// Elapsed times below this are treated as this.
const EPSILON: Duration = Duration::from_millis(1);

/// Unit of repeated, chunked work.
#[async_trait]
pub trait TunableLoop: Send {
    /// `false` until the loop has nothing left to do.
    fn is_done(&self) -> bool;

    /// Do one chunk of work. `chunk_size` may be fractional; loops that
    /// process rows use [`ChunkTuner::batch_size`].
    async fn step(&mut self, chunk_size: f64) -> Result<(), GarboError>;

    /// Release whatever the loop holds. Called once when the loop stops,
    /// whether it finished, ran out of time or failed.
    async fn clean_up(&mut self) -> Result<(), GarboError> {
        Ok(())
    }

    fn chunk_bounds(&self) -> ChunkBounds {
        ChunkBounds::default()
    }
}

/// Minimum and maximum chunk size of a loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkBounds {
    minimum: f64,
    maximum: f64,
}

impl ChunkBounds {
    pub const DEFAULT_MINIMUM: f64 = 1.0;
    pub const DEFAULT_MAXIMUM: f64 = 1_000_000_000.0;

    pub fn new(minimum: f64, maximum: f64) -> Result<Self, GarboError> {
        if !minimum.is_finite() || !maximum.is_finite() {
            return Err(GarboError::Config(format!(
                "chunk bounds must be finite, got {minimum}..{maximum}"
            )));
        }
        if minimum < 1.0 || minimum > maximum {
            return Err(GarboError::Config(format!(
                "invalid chunk bounds {minimum}..{maximum}"
            )));
        }
        Ok(Self { minimum, maximum })
    }

    /// Bounds with a default minimum of 1.
    pub fn up_to(maximum: f64) -> Result<Self, GarboError> {
        Self::new(Self::DEFAULT_MINIMUM, maximum)
    }

    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    /// Replace the maximum, never going below the minimum.
    pub fn with_maximum(self, maximum: f64) -> Self {
        Self {
            minimum: self.minimum,
            maximum: maximum.max(self.minimum),
        }
    }

    pub fn clamp(&self, chunk: f64) -> f64 {
        if chunk.is_finite() {
            chunk.clamp(self.minimum, self.maximum)
        } else {
            self.maximum
        }
    }
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self {
            minimum: Self::DEFAULT_MINIMUM,
            maximum: Self::DEFAULT_MAXIMUM,
        }
    }
}

/// Scales chunk sizes towards a target duration per chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTuner {
    goal: Duration,
    bounds: ChunkBounds,
}

impl ChunkTuner {
    pub fn new(goal: Duration, bounds: ChunkBounds) -> Self {
        Self { goal, bounds }
    }

    /// Nothing to extrapolate from yet.
    pub fn first_chunk(&self) -> f64 {
        self.bounds.minimum
    }

    pub fn next_chunk(&self, previous: f64, elapsed: Duration) -> f64 {
        let elapsed = elapsed.max(EPSILON).as_secs_f64();
        self.bounds.clamp(previous * self.goal.as_secs_f64() / elapsed)
    }

    /// Row count for a chunk: truncated, at least 1.
    pub fn batch_size(chunk: f64) -> usize {
        // `as` saturates and maps NaN to 0
        (chunk as usize).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: u64,
    pub elapsed: Duration,
    /// `true` if the loop reported done, `false` if it was cut short.
    pub finished: bool,
}

/// Drives a [`TunableLoop`] until it is done or its abort time passes.
pub struct LoopTuner {
    goal: Duration,
    cooldown: Option<Duration>,
    maximum_chunk_size: Option<f64>,
    clock: Arc<dyn Clock>,
}

impl LoopTuner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            goal: DEFAULT_GOAL,
            cooldown: None,
            maximum_chunk_size: None,
            clock,
        }
    }

    pub fn with_goal(mut self, goal: Duration) -> Self {
        self.goal = goal;
        self
    }

    /// Pause between chunks to let other writers through.
    pub fn with_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Override the maximum chunk size of every loop this tuner runs.
    pub fn with_maximum_chunk_size(mut self, maximum: Option<f64>) -> Self {
        self.maximum_chunk_size = maximum;
        self
    }

    fn tuner_for(&self, task: &dyn TunableLoop) -> ChunkTuner {
        let bounds = match self.maximum_chunk_size {
            Some(maximum) => task.chunk_bounds().with_maximum(maximum),
            None => task.chunk_bounds(),
        };
        ChunkTuner::new(self.goal, bounds)
    }

    /// Run `task` until it is done or `abort_at` passes, then clean it up.
    ///
    /// `clean_up` runs on every path. If both a step and `clean_up` fail,
    /// the step error is returned.
    pub async fn run(
        &self,
        task: &mut dyn TunableLoop,
        abort_at: Instant,
    ) -> Result<LoopSummary, GarboError> {
        let result = self.drive(task, abort_at).await;
        let cleaned = task.clean_up().await;
        match (result, cleaned) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                tracing::warn!(error = %cleanup_err, "clean up failed after error");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        task: &mut dyn TunableLoop,
        abort_at: Instant,
    ) -> Result<LoopSummary, GarboError> {
        let tuner = self.tuner_for(task);
        let started = self.clock.now();
        let mut chunk = tuner.first_chunk();
        let mut iterations = 0u64;

        let finished = loop {
            if task.is_done() {
                break true;
            }
            let now = self.clock.now();
            if now >= abort_at {
                tracing::info!(iterations, "task aborted after deadline");
                break false;
            }

            task.step(chunk).await?;
            let elapsed = self.clock.now().saturating_duration_since(now);
            iterations += 1;

            let next = tuner.next_chunk(chunk, elapsed);
            tracing::debug!(
                iteration = iterations,
                chunk_size = chunk,
                elapsed_ms = elapsed.as_millis() as u64,
                next_chunk_size = next,
                "chunk done"
            );
            chunk = next;

            if let Some(cooldown) = self.cooldown {
                let left = abort_at.saturating_duration_since(self.clock.now());
                tokio::time::sleep(cooldown.min(left)).await;
            }
        };

        let elapsed = self.clock.now().saturating_duration_since(started);
        if finished {
            tracing::debug!(iterations, elapsed_ms = elapsed.as_millis() as u64, "loop done");
        }
        Ok(LoopSummary {
            iterations,
            elapsed,
            finished,
        })
    }
}
