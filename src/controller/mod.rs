//! Sensor-gated sampling controller
//!
//! Two threads share one [`Gate`]:
//! - the producer polls a landmark source, writes the sensor state and emits
//!   the one-shot enter/exit events on presence edges
//! - the consumer emits rate-limited sensor heights while a person is present
//!   and otherwise walks the law-of-large-numbers progression over the
//!   reference dataset
//!
//! Without a landmark source only the consumer runs, which is plain dataset
//! sonification.

mod consumer;
mod gate;
mod producer;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{DatasetError, Sampler};
use crate::mapping::{FrequencyMap, HeightEstimator, SampleSelector};
use crate::osc::Emitter;
use crate::progression::{ProgressionConfig, ProgressionError, SamplingProgression};
use crate::sensor::{LandmarkSource, SensorState};

pub use consumer::ConsumerReport;
use consumer::Consumer;
use gate::Gate;
use producer::Producer;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Controller is already running")]
    AlreadyRunning,

    #[error("Controller was never started")]
    NotStarted,

    #[error("Sampling failed: {0}")]
    Sampling(#[from] DatasetError),

    #[error("Invalid progression: {0}")]
    Progression(#[from] ProgressionError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker thread panicked")]
    WorkerPanicked,
}

/// Which event vocabulary the controller speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerVariant {
    /// `/person/enter` and `/person/exit`, plus `/sample/select` while present
    #[default]
    LockOnDetect,
    /// `/sample/start [height, freq]` and `/sample/stop`
    SampleTrigger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub variant: ControllerVariant,
    pub estimator: HeightEstimator,
    pub frequency: FrequencyMap,
    pub selector: SampleSelector,
    /// Detections below this confidence count as "no person"
    pub min_detection_confidence: f64,
    /// Minimum spacing of locked-mode `/height` messages
    pub locked_interval: Duration,
    pub progression: ProgressionConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            variant: ControllerVariant::default(),
            estimator: HeightEstimator::default(),
            frequency: FrequencyMap::default(),
            selector: SampleSelector::default(),
            min_detection_confidence: 0.5,
            locked_interval: Duration::from_millis(200),
            progression: ProgressionConfig::default(),
        }
    }
}

/// Cloneable handle that asks both threads to stop
#[derive(Clone)]
pub struct StopHandle {
    gate: Arc<Gate>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.gate.stop();
    }
}

/// Everything the threads take ownership of on `start`
struct Parts {
    source: Option<Box<dyn LandmarkSource>>,
    sampler: Sampler,
    progression: SamplingProgression,
}

pub struct Controller {
    config: Arc<ControllerConfig>,
    emitter: Emitter,
    gate: Arc<Gate>,
    parts: Option<Parts>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<Result<ConsumerReport, ControllerError>>>,
}

impl Controller {
    /// `source = None` runs the dataset progression alone.
    pub fn new(
        config: ControllerConfig,
        emitter: Emitter,
        source: Option<Box<dyn LandmarkSource>>,
        sampler: Sampler,
    ) -> Result<Self, ControllerError> {
        let progression = SamplingProgression::new(&config.progression)?;
        let gate = Arc::new(Gate::new(source.is_some()));
        Ok(Self {
            config: Arc::new(config),
            emitter,
            gate,
            parts: Some(Parts {
                source,
                sampler,
                progression,
            }),
            producer: None,
            consumer: None,
        })
    }

    /// Spawn the producer (if there is a source) and the consumer, then
    /// return. A second call fails with [`ControllerError::AlreadyRunning`]
    /// and leaves the running threads untouched.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        let parts = self.parts.take().ok_or(ControllerError::AlreadyRunning)?;

        let consumer = Consumer::new(
            Arc::clone(&self.gate),
            self.emitter.clone(),
            Arc::clone(&self.config),
            parts.sampler,
            parts.progression,
        );

        if let Some(source) = parts.source {
            log::info!("Starting sensor producer on {}", source.name());
            let producer = Producer::new(
                source,
                Arc::clone(&self.gate),
                self.emitter.clone(),
                Arc::clone(&self.config),
            );
            match thread::Builder::new()
                .name("sensor-producer".to_string())
                .spawn(move || producer.run())
            {
                Ok(handle) => self.producer = Some(handle),
                Err(e) => {
                    log::error!("Failed to start sensor producer: {}", e);
                    self.gate.set_sensor_offline();
                }
            }
        }

        let handle = thread::Builder::new()
            .name("sampling-consumer".to_string())
            .spawn(move || consumer.run())?;
        self.consumer = Some(handle);

        log::info!("Controller started ({:?})", self.config.variant);
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            gate: Arc::clone(&self.gate),
        }
    }

    pub fn stop(&self) {
        self.gate.stop();
    }

    pub fn sensor_state(&self) -> SensorState {
        self.gate.snapshot().sensor
    }

    pub fn sensor_online(&self) -> bool {
        self.gate.snapshot().sensor_online
    }

    /// Wait for the consumer to finish. The producer is detached: it may be
    /// blocked inside its source and exits on its own at the next tick.
    pub fn join(mut self) -> Result<ConsumerReport, ControllerError> {
        let consumer = self.consumer.take().ok_or(ControllerError::NotStarted)?;
        let result = consumer.join().map_err(|_| ControllerError::WorkerPanicked)?;
        self.producer.take();
        result
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.gate.stop();
    }
}
