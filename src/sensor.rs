//! Landmark sources and the shared sensor state
//!
//! A landmark source is polled once per producer tick and reports either the
//! normalized vertical head position of a detected person or nothing. Real
//! pose extraction lives outside this crate; what we ship are a scripted
//! replay source and a MIDI controller source (see `midi.rs`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Sensor read failed: {0}")]
    Read(String),
}

/// A detected person in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonSample {
    /// Head position, 0 = top of frame, 1 = bottom
    pub position: f64,
    /// Detector confidence in [0, 1]
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

impl PersonSample {
    pub fn new(position: f64) -> Self {
        Self {
            position,
            confidence: 1.0,
        }
    }
}

/// Pull-based person detector
pub trait LandmarkSource: Send {
    /// Acquire the device. Runs on the producer thread before the first poll.
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    /// Block for at most one frame and report what was seen.
    fn poll(&mut self) -> Result<Option<PersonSample>, SensorError>;

    fn name(&self) -> String;
}

/// Latest sensor reading. A height is present exactly when a person is
/// detected.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorState {
    height_cm: Option<f64>,
}

impl SensorState {
    pub fn absent() -> Self {
        Self { height_cm: None }
    }

    pub fn present(height_cm: f64) -> Self {
        Self {
            height_cm: Some(height_cm),
        }
    }

    pub fn detected(&self) -> bool {
        self.height_cm.is_some()
    }

    pub fn height_cm(&self) -> Option<f64> {
        self.height_cm
    }
}

/// Replays a fixed list of frames, one per `frame_interval`.
pub struct ScriptedSource {
    frames: Vec<Option<PersonSample>>,
    cursor: usize,
    looping: bool,
    frame_interval: Duration,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Option<PersonSample>>, frame_interval: Duration) -> Self {
        Self {
            frames,
            cursor: 0,
            looping: false,
            frame_interval,
        }
    }

    /// Restart from the first frame after the last one instead of reporting
    /// "no person" forever.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Load frames from a JSON array of `null` or
    /// `{"position": 0.4, "confidence": 0.9}` entries.
    pub fn from_file(path: impl AsRef<Path>, frame_interval: Duration) -> Result<Self, SensorError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SensorError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let frames: Vec<Option<PersonSample>> = serde_json::from_str(&contents)
            .map_err(|e| SensorError::Unavailable(format!("{}: {}", path.display(), e)))?;
        log::info!("Loaded {} scripted frames from {}", frames.len(), path.display());
        Ok(Self::new(frames, frame_interval))
    }
}

impl LandmarkSource for ScriptedSource {
    fn poll(&mut self) -> Result<Option<PersonSample>, SensorError> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        if self.cursor >= self.frames.len() {
            if self.looping && !self.frames.is_empty() {
                self.cursor = 0;
            } else {
                return Ok(None);
            }
        }
        let frame = self.frames[self.cursor];
        self.cursor += 1;
        Ok(frame)
    }

    fn name(&self) -> String {
        format!("script ({} frames)", self.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sensor_state_invariant() {
        let absent = SensorState::absent();
        assert!(!absent.detected());
        assert_eq!(absent.height_cm(), None);
        assert_eq!(SensorState::default(), absent);

        let present = SensorState::present(172.5);
        assert!(present.detected());
        assert_eq!(present.height_cm(), Some(172.5));
    }

    #[test]
    fn test_scripted_source_replays_then_goes_quiet() {
        let mut source = ScriptedSource::new(
            vec![Some(PersonSample::new(0.4)), None],
            Duration::ZERO,
        );
        assert_eq!(source.poll().unwrap(), Some(PersonSample::new(0.4)));
        assert_eq!(source.poll().unwrap(), None);
        assert_eq!(source.poll().unwrap(), None);
        assert_eq!(source.poll().unwrap(), None);
    }

    #[test]
    fn test_scripted_source_loops() {
        let mut source =
            ScriptedSource::new(vec![Some(PersonSample::new(0.2)), None], Duration::ZERO)
                .looping(true);
        let polled: Vec<bool> = (0..5).map(|_| source.poll().unwrap().is_some()).collect();
        assert_eq!(polled, vec![true, false, true, false, true]);
    }

    #[test]
    fn test_scripted_source_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[null, {{"position": 0.3}}, {{"position": 0.6, "confidence": 0.2}}]"#
        )
        .unwrap();

        let mut source = ScriptedSource::from_file(file.path(), Duration::ZERO).unwrap();
        assert_eq!(source.poll().unwrap(), None);
        assert_eq!(source.poll().unwrap(), Some(PersonSample::new(0.3)));
        let weak = source.poll().unwrap().unwrap();
        assert_eq!(weak.confidence, 0.2);
    }

    #[test]
    fn test_scripted_source_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ScriptedSource::from_file(file.path(), Duration::ZERO),
            Err(SensorError::Unavailable(_))
        ));
    }
}
