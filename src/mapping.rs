//! Value-to-audio mappings
//!
//! Pure functions that turn heights and probabilities into synthesis
//! parameters. None of them can fail: inputs outside the documented ranges
//! are clipped to the nearest boundary.

use serde::{Deserialize, Serialize};

/// Estimates a standing height from the normalized vertical position of the
/// head in the frame (0 = top edge, 1 = bottom edge).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightEstimator {
    /// Height reported when the head sits at the vertical centre (cm)
    pub base_cm: f64,
    /// Centimetres per full frame height
    pub scale_cm: f64,
}

impl Default for HeightEstimator {
    fn default() -> Self {
        Self {
            base_cm: 170.0,
            scale_cm: 200.0,
        }
    }
}

impl HeightEstimator {
    /// Out-of-range positions extrapolate linearly.
    pub fn estimate(&self, normalized_vertical_position: f64) -> f64 {
        self.base_cm + (0.5 - normalized_vertical_position) * self.scale_cm
    }
}

/// `estimate_height` with the default calibration (170 cm, 200 cm/frame).
pub fn estimate_height(normalized_vertical_position: f64) -> f64 {
    HeightEstimator::default().estimate(normalized_vertical_position)
}

/// Exponential height-to-pitch mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyMap {
    pub min_height: f64,
    pub max_height: f64,
    /// Frequency at `min_height` (Hz)
    pub base_freq: f64,
    /// Octaves spanned between `min_height` and `max_height`
    pub octave_span: f64,
}

impl Default for FrequencyMap {
    fn default() -> Self {
        Self {
            min_height: 100.0,
            max_height: 200.0,
            base_freq: 200.0,
            octave_span: 4.0,
        }
    }
}

impl FrequencyMap {
    /// Map a height (cm) to a frequency in
    /// `[base_freq, base_freq * 2^octave_span]`, taller = higher.
    pub fn frequency(&self, height_cm: f64) -> f64 {
        let normalized = normalize(height_cm, self.min_height, self.max_height);
        self.base_freq * 2f64.powf(normalized * self.octave_span)
    }

    /// The highest frequency this map can produce
    pub fn max_freq(&self) -> f64 {
        self.base_freq * 2f64.powf(self.octave_span)
    }
}

/// `height_to_frequency` with the default 200 Hz base and four-octave span.
pub fn height_to_frequency(height_cm: f64, min_height: f64, max_height: f64) -> f64 {
    FrequencyMap {
        min_height,
        max_height,
        ..FrequencyMap::default()
    }
    .frequency(height_cm)
}

/// Maps a height onto one of `num_samples` equally wide slots used by
/// `/sample/select`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSelector {
    pub min_height: f64,
    pub max_height: f64,
    pub num_samples: usize,
}

impl Default for SampleSelector {
    fn default() -> Self {
        Self {
            min_height: 115.0,
            max_height: 250.0,
            num_samples: 46,
        }
    }
}

impl SampleSelector {
    pub fn index(&self, height_cm: f64) -> usize {
        if self.num_samples == 0 {
            return 0;
        }
        let normalized = normalize(height_cm, self.min_height, self.max_height);
        let index = (normalized * self.num_samples as f64) as usize;
        index.min(self.num_samples - 1)
    }
}

/// Clip `value` into `[min, max]` and rescale to `[0, 1]`.
/// A degenerate range maps everything to 0.
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= 0.0 || !span.is_finite() {
        return 0.0;
    }
    ((value - min) / span).clamp(0.0, 1.0)
}

/// Synthesis parameters for a single tone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub freq_hz: f64,
    pub amplitude: f64,
    pub duration_s: f64,
}

/// Probability (clipped to [0, 1]) to tone: 200–1400 Hz, amplitude 0.3–0.8,
/// 0.2–0.8 s.
pub fn probability_to_tone(prob: f64) -> Tone {
    let p = clip_probability(prob);
    Tone {
        freq_hz: 200.0 + p * 1200.0,
        amplitude: 0.3 + p * 0.5,
        duration_s: 0.2 + p * 0.6,
    }
}

/// Certainty-aware mapping. Below a certainty of 0.7 the pitch is pushed
/// sharp by up to 20%. Without a certainty the probability stands in for it.
pub fn advanced_tone(prob: f64, certainty: Option<f64>) -> Tone {
    let p = clip_probability(prob);
    let base_freq = 200.0 + p * 800.0;
    let (freq_hz, certainty) = match certainty.map(clip_probability) {
        Some(c) if c > 0.7 => (base_freq, c),
        Some(c) => (base_freq * (1.0 + (1.0 - c) * 0.2), c),
        None => (base_freq, p),
    };
    Tone {
        freq_hz,
        amplitude: 0.2 + p * 0.6,
        duration_s: 0.3 + certainty * 0.5,
    }
}

fn clip_probability(prob: f64) -> f64 {
    if prob.is_nan() {
        return 0.0;
    }
    prob.clamp(0.0, 1.0)
}
