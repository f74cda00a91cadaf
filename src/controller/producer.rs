//! Sensor producer thread
//!
//! Polls the landmark source as fast as it answers and publishes the result
//! into the gate. Enter/exit events are emitted from inside the gate update,
//! so they fire exactly once per presence edge.

use std::sync::Arc;

use crate::osc::{self, Emitter};
use crate::sensor::{LandmarkSource, SensorError, SensorState};

use super::gate::{Gate, Transition};
use super::{ControllerConfig, ControllerVariant};

pub(crate) struct Producer {
    source: Box<dyn LandmarkSource>,
    gate: Arc<Gate>,
    emitter: Emitter,
    config: Arc<ControllerConfig>,
    /// Last `/sample/select` index sent during the current presence
    current_sample: Option<usize>,
}

impl Producer {
    pub fn new(
        source: Box<dyn LandmarkSource>,
        gate: Arc<Gate>,
        emitter: Emitter,
        config: Arc<ControllerConfig>,
    ) -> Self {
        Self {
            source,
            gate,
            emitter,
            config,
            current_sample: None,
        }
    }

    /// Poll once and publish. Returns the presence edge, if any.
    pub fn tick(&mut self) -> Result<Option<Transition>, SensorError> {
        let reading = self.source.poll()?;
        let next = match reading {
            Some(sample) if sample.confidence >= self.config.min_detection_confidence => {
                SensorState::present(self.config.estimator.estimate(sample.position))
            }
            _ => SensorState::absent(),
        };
        Ok(self.publish(next))
    }

    fn publish(&mut self, next: SensorState) -> Option<Transition> {
        let config = &self.config;
        let emitter = &self.emitter;
        let current_sample = &mut self.current_sample;

        self.gate.update(next, |previous, next| {
            let transition = Transition::between(previous, next);
            match (transition, config.variant) {
                (Some(Transition::Enter), ControllerVariant::LockOnDetect) => {
                    log::info!("Person detected");
                    emitter.emit(osc::person_enter());
                }
                (Some(Transition::Exit), ControllerVariant::LockOnDetect) => {
                    log::info!("Person left");
                    emitter.emit(osc::person_exit());
                    *current_sample = None;
                }
                (Some(Transition::Enter), ControllerVariant::SampleTrigger) => {
                    let height = next.height_cm().unwrap_or_default();
                    let freq = config.frequency.frequency(height);
                    log::info!("Person detected: {:.1} cm -> {:.1} Hz", height, freq);
                    emitter.emit(osc::sample_start(height, freq));
                }
                (Some(Transition::Exit), ControllerVariant::SampleTrigger) => {
                    log::info!("Person left");
                    emitter.emit(osc::sample_stop());
                }
                (None, _) => {}
            }

            if config.variant == ControllerVariant::LockOnDetect {
                if let Some(height) = next.height_cm() {
                    let index = config.selector.index(height);
                    if *current_sample != Some(index) {
                        log::info!("Height: {:.1} cm -> sample {}", height, index);
                        emitter.emit(osc::sample_select(index));
                        *current_sample = Some(index);
                    }
                }
            }

            transition
        })
    }

    /// Thread body. A failing source takes the sensor offline for good; the
    /// consumer then keeps sampling on its own.
    pub fn run(mut self) {
        if let Err(e) = self.source.init() {
            log::error!("Sensor init failed, continuing without it: {}", e);
            self.gate.set_sensor_offline();
            return;
        }
        log::info!("Sensor initialized: {}", self.source.name());

        while !self.gate.is_stopping() {
            if let Err(e) = self.tick() {
                log::error!("Sensor failed, continuing without it: {}", e);
                self.publish(SensorState::absent());
                self.gate.set_sensor_offline();
                return;
            }
        }
        log::debug!("Sensor producer stopped");
    }
}
