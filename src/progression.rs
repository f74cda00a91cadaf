//! Law-of-large-numbers sample-size progression
//!
//! The plan has three stages:
//! 1. `warmup` single draws
//! 2. `alternating` pairs of draws, `n = 1` then `n = 2`
//! 3. a ramp from `ramp_start` (inclusive) to `ramp_end` (exclusive) in steps
//!    of `ramp_step`, each size repeated `repetitions` times
//!
//! After the last ramp entry the plan either wraps back to the first warm-up
//! draw or saturates on the final size, per [`EndPolicy`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ProgressionError {
    #[error("Ramp step must be at least 1")]
    ZeroStep,

    #[error("Progression contains no draws")]
    Empty,
}

/// What happens once the ramp runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EndPolicy {
    /// Start over from the first warm-up draw
    #[default]
    Wrap,
    /// Keep drawing at the largest size
    Saturate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub warmup: usize,
    pub alternating: usize,
    pub ramp_start: usize,
    pub ramp_end: usize,
    pub ramp_step: usize,
    pub repetitions: usize,
    pub end_policy: EndPolicy,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            warmup: 75,
            alternating: 75,
            ramp_start: 2,
            ramp_end: 1000,
            ramp_step: 5,
            repetitions: 5,
            end_policy: EndPolicy::Wrap,
        }
    }
}

/// Cursor over the flattened plan of sample sizes
#[derive(Debug, Clone)]
pub struct SamplingProgression {
    plan: Vec<usize>,
    /// Index of the first ramp draw
    ramp_begin: usize,
    position: usize,
    cycles: usize,
    end_policy: EndPolicy,
}

impl SamplingProgression {
    pub fn new(config: &ProgressionConfig) -> Result<Self, ProgressionError> {
        if config.ramp_step == 0 {
            return Err(ProgressionError::ZeroStep);
        }

        let mut plan = Vec::new();
        plan.extend(std::iter::repeat(1).take(config.warmup));
        for _ in 0..config.alternating {
            plan.push(1);
            plan.push(2);
        }
        let ramp_begin = plan.len();
        for size in (config.ramp_start.max(1)..config.ramp_end).step_by(config.ramp_step) {
            plan.extend(std::iter::repeat(size).take(config.repetitions));
        }

        if plan.is_empty() {
            return Err(ProgressionError::Empty);
        }

        Ok(Self {
            plan,
            ramp_begin,
            position: 0,
            cycles: 0,
            end_policy: config.end_policy,
        })
    }

    /// Sample size for the next draw
    pub fn current(&self) -> usize {
        self.plan[self.position]
    }

    /// Move past the current draw. Returns `true` when this enters a ramp
    /// stage (the first one included) or wraps, which is worth announcing.
    pub fn advance(&mut self) -> bool {
        let previous = self.current();
        if self.position + 1 < self.plan.len() {
            self.position += 1;
        } else {
            match self.end_policy {
                EndPolicy::Wrap => {
                    self.position = 0;
                    self.cycles += 1;
                    return true;
                }
                EndPolicy::Saturate => return false,
            }
        }
        self.position == self.ramp_begin
            || (self.position > self.ramp_begin && self.current() != previous)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of completed passes through the plan
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn len(&self) -> usize {
        self.plan.len()
    }
}
