//! Sampling consumer thread
//!
//! Each step reads the gate once. With a person present it emits the sensor
//! height (rate-limited) and leaves the progression alone; otherwise it draws
//! the next batch, emits it, advances the progression and pauses for the
//! drawn standard error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dataset::{DatasetError, Draw, Sampler};
use crate::osc::{self, Emitter};
use crate::progression::SamplingProgression;

use super::gate::{Gate, GateState};
use super::{ControllerConfig, ControllerError};

/// Enforces a minimum spacing between emissions
#[derive(Debug)]
pub(crate) struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Claim the slot at `now` if the interval has passed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time left until the next slot opens
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self.interval.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// What one consumer step did
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// Person present; `emitted` is false when rate-limited
    Locked { height_cm: f64, emitted: bool },
    /// Dataset draw emitted
    Sampled(Draw),
    /// Sampling is broken but the sensor may still lock
    Idle,
    Stopped,
    /// Sampling is broken and no sensor is left
    Failed,
}

/// Summary returned when the consumer exits cleanly
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerReport {
    pub draws: usize,
    pub locked_messages: usize,
    pub progression_position: usize,
    pub progression_cycles: usize,
}

pub(crate) struct Consumer {
    gate: Arc<Gate>,
    emitter: Emitter,
    config: Arc<ControllerConfig>,
    sampler: Sampler,
    progression: SamplingProgression,
    limiter: RateLimiter,
    sampling_error: Option<DatasetError>,
    draws: usize,
    locked_messages: usize,
}

impl Consumer {
    pub fn new(
        gate: Arc<Gate>,
        emitter: Emitter,
        config: Arc<ControllerConfig>,
        sampler: Sampler,
        progression: SamplingProgression,
    ) -> Self {
        let limiter = RateLimiter::new(config.locked_interval);
        Self {
            gate,
            emitter,
            config,
            sampler,
            progression,
            limiter,
            sampling_error: None,
            draws: 0,
            locked_messages: 0,
        }
    }

    /// One pass over the gate. The presence check and whatever it leads to
    /// (a locked height or a dataset draw) happen under the gate lock, so no
    /// emission can land on the wrong side of an enter or exit event.
    pub fn step(&mut self) -> Step {
        let gate = Arc::clone(&self.gate);
        let outcome = gate.with_state(|state: &GateState| -> Result<Step, DatasetError> {
            if state.stopping {
                return Ok(Step::Stopped);
            }
            if let Some(height_cm) = state.sensor.height_cm() {
                return Ok(self.emit_locked(height_cm));
            }
            if self.sampling_error.is_some() {
                return Ok(if state.sensor_online {
                    Step::Idle
                } else {
                    Step::Failed
                });
            }
            let draw = self.sampler.draw(self.progression.current())?;
            let freq = self.config.frequency.frequency(draw.mean_height_cm);
            self.emitter.emit(osc::height(draw.mean_height_cm, freq));
            Ok(Step::Sampled(draw))
        });

        match outcome {
            Ok(Step::Sampled(draw)) => {
                self.draws += 1;
                log::info!(
                    "Sample {} (n={}): Height = {:.1} cm -> Frequency = {:.1} Hz",
                    self.draws,
                    draw.sample_size,
                    draw.mean_height_cm,
                    self.config.frequency.frequency(draw.mean_height_cm)
                );
                if self.progression.advance() {
                    log::info!("Sample size: {}", self.progression.current());
                }
                Step::Sampled(draw)
            }
            Ok(step) => step,
            Err(e) => {
                log::error!("Sampling disabled: {}", e);
                self.sampling_error = Some(e);
                if self.gate.snapshot().sensor_online {
                    Step::Idle
                } else {
                    Step::Failed
                }
            }
        }
    }

    /// Called with the gate lock held
    fn emit_locked(&mut self, height_cm: f64) -> Step {
        let emitted = self.limiter.ready(Instant::now());
        if emitted {
            let freq = self.config.frequency.frequency(height_cm);
            self.emitter.emit(osc::height(height_cm, freq));
            self.locked_messages += 1;
        }
        Step::Locked { height_cm, emitted }
    }

    fn report(&self) -> ConsumerReport {
        ConsumerReport {
            draws: self.draws,
            locked_messages: self.locked_messages,
            progression_position: self.progression.position(),
            progression_cycles: self.progression.cycles(),
        }
    }

    /// Thread body
    pub fn run(mut self) -> Result<ConsumerReport, ControllerError> {
        log::info!("Starting sonification with LLN progression");
        loop {
            match self.step() {
                Step::Locked { .. } => {
                    let wait = self
                        .limiter
                        .remaining(Instant::now())
                        .max(Duration::from_millis(1));
                    self.gate
                        .wait_until(Some(wait), |s| s.stopping || !s.sensor.detected());
                }
                Step::Sampled(draw) => {
                    self.gate.wait_until(Some(pause_for(&draw)), |s| {
                        s.stopping || s.sensor.detected()
                    });
                }
                Step::Idle => {
                    self.gate.wait_until(None, |s| {
                        s.stopping || s.sensor.detected() || !s.sensor_online
                    });
                }
                Step::Stopped => {
                    log::info!("Sonification stopped");
                    return Ok(self.report());
                }
                Step::Failed => {
                    let err = self.sampling_error.take().unwrap_or(DatasetError::Empty);
                    return Err(ControllerError::Sampling(err));
                }
            }
        }
    }
}

/// Longest pause between draws, whatever the dataset says
const MAX_PAUSE: Duration = Duration::from_secs(60);

/// The drawn standard error, read as seconds and capped at [`MAX_PAUSE`]
fn pause_for(draw: &Draw) -> Duration {
    let se = draw.mean_height_se;
    if se.is_nan() || se <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(se).map_or(MAX_PAUSE, |pause| pause.min(MAX_PAUSE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, DatasetRecord};
    use crate::osc::RecordingTransport;
    use crate::progression::ProgressionConfig;
    use crate::sensor::SensorState;

    fn consumer_with(
        records: Vec<DatasetRecord>,
        locked_interval: Duration,
    ) -> (Consumer, Arc<Gate>, Arc<RecordingTransport>) {
        let gate = Arc::new(Gate::new(true));
        let transport = Arc::new(RecordingTransport::default());
        let config = ControllerConfig {
            locked_interval,
            ..ControllerConfig::default()
        };
        let progression = SamplingProgression::new(&ProgressionConfig::default()).unwrap();
        let consumer = Consumer::new(
            Arc::clone(&gate),
            Emitter::new(transport.clone()),
            Arc::new(config),
            Sampler::new(Arc::new(Dataset::from_records(records)), Some(5)),
            progression,
        );
        (consumer, gate, transport)
    }

    fn row(height: f64) -> DatasetRecord {
        DatasetRecord {
            mean_height_cm: height,
            mean_height_se: 0.5,
        }
    }

    #[test]
    fn test_rate_limiter() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert_eq!(limiter.remaining(t0), Duration::ZERO);
        assert!(limiter.ready(t0));
        assert!(!limiter.ready(t0 + Duration::from_millis(50)));
        assert_eq!(
            limiter.remaining(t0 + Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert!(limiter.ready(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_locked_mode_gates_sampling_and_resumes() {
        let (mut consumer, gate, transport) =
            consumer_with(vec![row(120.0)], Duration::from_secs(60));

        for _ in 0..3 {
            assert!(matches!(consumer.step(), Step::Sampled(_)));
        }
        assert_eq!(consumer.progression.position(), 3);

        gate.update(SensorState::present(180.0), |_, _| ());
        assert_eq!(
            consumer.step(),
            Step::Locked {
                height_cm: 180.0,
                emitted: true
            }
        );
        for _ in 0..10 {
            assert_eq!(
                consumer.step(),
                Step::Locked {
                    height_cm: 180.0,
                    emitted: false
                }
            );
        }
        assert_eq!(consumer.progression.position(), 3);

        gate.update(SensorState::absent(), |_, _| ());
        assert!(matches!(consumer.step(), Step::Sampled(_)));
        assert_eq!(consumer.progression.position(), 4);

        let heights: Vec<f32> = transport
            .messages()
            .iter()
            .map(|m| m.args[0].clone().float().unwrap())
            .collect();
        assert_eq!(heights, vec![120.0, 120.0, 120.0, 180.0, 120.0]);
    }

    #[test]
    fn test_progression_sizes_follow_plan() {
        let (mut consumer, _gate, _transport) =
            consumer_with(vec![row(120.0), row(160.0)], Duration::from_millis(10));
        let sizes: Vec<usize> = (0..80)
            .map(|_| match consumer.step() {
                Step::Sampled(draw) => draw.sample_size,
                other => panic!("unexpected step {:?}", other),
            })
            .collect();
        assert!(sizes[..75].iter().all(|&n| n == 1));
        assert_eq!(&sizes[75..80], &[1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_empty_dataset_keeps_locked_mode() {
        let (mut consumer, gate, transport) = consumer_with(Vec::new(), Duration::from_millis(10));

        assert_eq!(consumer.step(), Step::Idle);
        assert!(matches!(consumer.sampling_error, Some(DatasetError::Empty)));
        assert_eq!(consumer.step(), Step::Idle);

        gate.update(SensorState::present(150.0), |_, _| ());
        assert!(matches!(
            consumer.step(),
            Step::Locked { emitted: true, .. }
        ));
        assert_eq!(transport.addresses(), vec!["/height"]);

        gate.update(SensorState::absent(), |_, _| ());
        gate.set_sensor_offline();
        assert_eq!(consumer.step(), Step::Failed);
        assert!(matches!(
            consumer.run(),
            Err(ControllerError::Sampling(DatasetError::Empty))
        ));
    }

    #[test]
    fn test_stop_ends_run() {
        let (mut consumer, gate, transport) = consumer_with(vec![row(120.0)], Duration::from_millis(10));
        gate.stop();
        assert_eq!(consumer.step(), Step::Stopped);
        let report = consumer.run().unwrap();
        assert_eq!(report.draws, 0);
        assert!(transport.messages().is_empty());
    }

    #[test]
    fn test_pause_for_standard_error() {
        let draw = Draw {
            sample_size: 1,
            mean_height_cm: 150.0,
            mean_height_se: 0.25,
        };
        assert_eq!(pause_for(&draw), Duration::from_millis(250));
        let broken = Draw {
            mean_height_se: f64::NAN,
            ..draw
        };
        assert_eq!(pause_for(&broken), Duration::ZERO);

        let huge = Draw {
            mean_height_se: 1e20,
            ..draw
        };
        assert_eq!(pause_for(&huge), MAX_PAUSE);
        let infinite = Draw {
            mean_height_se: f64::INFINITY,
            ..draw
        };
        assert_eq!(pause_for(&infinite), MAX_PAUSE);
        let long = Draw {
            mean_height_se: 90.0,
            ..draw
        };
        assert_eq!(pause_for(&long), MAX_PAUSE);
    }

    #[test]
    fn test_no_sensor_height_after_exit() {
        let (mut consumer, gate, transport) =
            consumer_with(vec![row(120.0)], Duration::ZERO);

        gate.update(SensorState::present(180.0), |_, _| ());
        assert!(matches!(consumer.step(), Step::Locked { emitted: true, .. }));

        // The exit is emitted inside the gate update, as the producer does
        let exit_transport = Arc::clone(&transport);
        gate.update(SensorState::absent(), |_, _| {
            Emitter::new(exit_transport).emit(osc::person_exit())
        });
        assert!(matches!(consumer.step(), Step::Sampled(_)));

        let messages = transport.messages();
        assert_eq!(transport.addresses(), vec!["/height", "/person/exit", "/height"]);
        assert_eq!(messages[2].args[0].clone().float().unwrap(), 120.0);
    }
}
