//! Shared sensor gate between the producer and consumer threads
//!
//! One mutex guards the whole record; the condition variable is notified on
//! every presence transition, when the sensor goes offline and on stop.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::sensor::SensorState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateState {
    pub sensor: SensorState,
    /// False once the producer has given up (or was never started)
    pub sensor_online: bool,
    pub stopping: bool,
}

/// Presence edge between two consecutive sensor readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    pub fn between(previous: &SensorState, next: &SensorState) -> Option<Transition> {
        match (previous.detected(), next.detected()) {
            (false, true) => Some(Transition::Enter),
            (true, false) => Some(Transition::Exit),
            _ => None,
        }
    }
}

pub struct Gate {
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl Gate {
    pub fn new(sensor_online: bool) -> Self {
        Self {
            state: Mutex::new(GateState {
                sensor: SensorState::absent(),
                sensor_online,
                stopping: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> GateState {
        *self.lock()
    }

    /// Run `f` with the lock held. Used by the consumer so that a draw and
    /// its emission cannot interleave with a presence transition.
    pub fn with_state<T>(&self, f: impl FnOnce(&GateState) -> T) -> T {
        let guard = self.lock();
        f(&guard)
    }

    /// Replace the sensor reading. `on_update(previous, next)` runs while the
    /// lock is held so that any event it emits is ordered with the write.
    pub fn update<T>(
        &self,
        next: SensorState,
        on_update: impl FnOnce(&SensorState, &SensorState) -> T,
    ) -> T {
        let mut guard = self.lock();
        let previous = guard.sensor;
        let result = on_update(&previous, &next);
        guard.sensor = next;
        if previous.detected() != next.detected() {
            self.condvar.notify_all();
        }
        result
    }

    /// The producer is gone for good; sampling takes over permanently.
    pub fn set_sensor_offline(&self) {
        let mut guard = self.lock();
        guard.sensor_online = false;
        self.condvar.notify_all();
    }

    pub fn stop(&self) {
        let mut guard = self.lock();
        guard.stopping = true;
        self.condvar.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Block until `ready` holds or `timeout` elapses (`None` waits forever).
    /// Returns the state seen on wake-up.
    pub fn wait_until(
        &self,
        timeout: Option<Duration>,
        mut ready: impl FnMut(&GateState) -> bool,
    ) -> GateState {
        let guard = self.lock();
        let guard = match timeout {
            Some(timeout) => {
                self.condvar
                    .wait_timeout_while(guard, timeout, |state| !ready(&*state))
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
            None => self
                .condvar
                .wait_while(guard, |state| !ready(&*state))
                .unwrap_or_else(|e| e.into_inner()),
        };
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_transition_between() {
        let absent = SensorState::absent();
        let present = SensorState::present(160.0);
        assert_eq!(Transition::between(&absent, &present), Some(Transition::Enter));
        assert_eq!(Transition::between(&present, &absent), Some(Transition::Exit));
        assert_eq!(Transition::between(&present, &SensorState::present(180.0)), None);
        assert_eq!(Transition::between(&absent, &absent), None);
    }

    #[test]
    fn test_update_reports_previous() {
        let gate = Gate::new(true);
        let previous = gate.update(SensorState::present(150.0), |prev, _| *prev);
        assert_eq!(previous, SensorState::absent());
        assert_eq!(gate.snapshot().sensor, SensorState::present(150.0));
    }

    #[test]
    fn test_wait_wakes_on_transition() {
        let gate = Arc::new(Gate::new(true));
        let remote = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.update(SensorState::present(170.0), |_, _| ());
        });

        let start = Instant::now();
        let state = gate.wait_until(Some(Duration::from_secs(10)), |s| s.sensor.detected());
        assert!(state.sensor.detected());
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let gate = Gate::new(true);
        let state = gate.wait_until(Some(Duration::from_millis(10)), |s| s.stopping);
        assert!(!state.stopping);
    }

    #[test]
    fn test_stop_and_offline() {
        let gate = Gate::new(true);
        gate.set_sensor_offline();
        gate.stop();
        let state = gate.wait_until(None, |s| s.stopping);
        assert!(state.stopping);
        assert!(!state.sensor_online);
        assert!(gate.is_stopping());
    }
}
