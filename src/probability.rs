//! Probability sonification against a synth server
//!
//! Each probability becomes one short tone with an explicit synth lifecycle:
//! `/s_new` to start it, hold for the tone's duration, `/n_free` to release.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use rand_distr::{Beta, Distribution, Normal};

use crate::mapping::{self, Tone};
use crate::osc::{self, Emitter};
use crate::stop::StopSignal;

/// Gap after freeing a synth before the next one starts
const RELEASE_GAP: Duration = Duration::from_millis(100);

const SYNTH_ID_FIRST: i32 = 1000;
const SYNTH_ID_LIMIT: i32 = 10_000;

/// Hands out synth node ids in `[1000, 10000)`, wrapping.
pub struct SynthIds {
    next: AtomicI32,
}

impl Default for SynthIds {
    fn default() -> Self {
        Self {
            next: AtomicI32::new(SYNTH_ID_FIRST),
        }
    }
}

impl SynthIds {
    pub fn next(&self) -> i32 {
        let span = SYNTH_ID_LIMIT - SYNTH_ID_FIRST;
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        SYNTH_ID_FIRST + (raw - SYNTH_ID_FIRST).rem_euclid(span)
    }
}

/// A tone with the synth id that carries it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioEvent {
    pub frequency_hz: f64,
    pub amplitude: f64,
    pub duration_s: f64,
    pub correlation_id: i32,
}

impl AudioEvent {
    pub fn new(tone: Tone, correlation_id: i32) -> Self {
        Self {
            frequency_hz: tone.freq_hz,
            amplitude: tone.amplitude,
            duration_s: tone.duration_s,
            correlation_id,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_s.max(0.0))
    }
}

pub struct ProbabilitySonifier {
    emitter: Emitter,
    ids: SynthIds,
    stop: StopSignal,
}

impl ProbabilitySonifier {
    pub fn new(emitter: Emitter, stop: StopSignal) -> Self {
        Self {
            emitter,
            ids: SynthIds::default(),
            stop,
        }
    }

    /// Play one tone for `prob` and release it. The synth is freed even when
    /// a stop interrupts the hold.
    pub fn sonify(&self, prob: f64) -> AudioEvent {
        self.play(prob, mapping::probability_to_tone(prob))
    }

    /// Same lifecycle, using the certainty-aware mapping
    pub fn sonify_with_certainty(&self, prob: f64, certainty: Option<f64>) -> AudioEvent {
        self.play(prob, mapping::advanced_tone(prob, certainty))
    }

    fn play(&self, prob: f64, tone: Tone) -> AudioEvent {
        let event = AudioEvent::new(tone, self.ids.next());
        log::info!(
            "Prob: {:.3} -> Freq: {:.0} Hz, Amp: {:.2}, Dur: {:.1} s",
            prob,
            event.frequency_hz,
            event.amplitude,
            event.duration_s
        );

        self.emitter.emit(osc::probability(prob.clamp(0.0, 1.0)));
        self.emitter.emit(osc::synth_new(
            event.correlation_id,
            event.frequency_hz,
            event.amplitude,
        ));
        self.stop.sleep(event.duration());
        self.emitter.emit(osc::node_free(event.correlation_id));
        self.stop.sleep(RELEASE_GAP);
        event
    }

    /// A fixed sweep over 0.1 .. 0.9
    pub fn test_range(&self) -> Vec<AudioEvent> {
        let mut events = Vec::new();
        for prob in [0.1, 0.25, 0.5, 0.75, 0.9] {
            if self.stop.is_stopped() {
                break;
            }
            events.push(self.sonify(prob));
            self.stop.sleep(Duration::from_millis(300));
        }
        events
    }

    /// `n_samples` draws: three from Beta(2, 8), four from Beta(6, 3), then
    /// uniform.
    pub fn stream<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n_samples: usize,
        delay: Duration,
    ) -> Vec<AudioEvent> {
        let low = Beta::new(2.0, 8.0).ok();
        let high = Beta::new(6.0, 3.0).ok();

        let mut events = Vec::new();
        for i in 0..n_samples {
            if self.stop.is_stopped() {
                break;
            }
            let prob = match i {
                0..=2 => low.as_ref().map(|d| d.sample(&mut *rng)),
                3..=6 => high.as_ref().map(|d| d.sample(&mut *rng)),
                _ => None,
            }
            .unwrap_or_else(|| rng.gen::<f64>());

            log::info!("Sample {:2}", i + 1);
            events.push(self.sonify(prob));
            self.stop.sleep(delay);
        }
        events
    }

    /// Sonify a slowly oscillating, noisy probability for `duration`.
    pub fn monitor<R: Rng + ?Sized>(&self, rng: &mut R, duration: Duration) -> usize {
        let noise = Normal::new(0.0, 0.1).ok();
        let start = Instant::now();
        let mut count = 0;

        while start.elapsed() < duration && !self.stop.is_stopped() {
            let t = start.elapsed().as_secs_f64();
            let jitter = noise.as_ref().map(|n| n.sample(&mut *rng)).unwrap_or(0.0);
            let prob = monitor_probability(t, jitter);

            count += 1;
            log::info!("T+{:5.1}s", t);
            let tone = Tone {
                duration_s: 0.3,
                ..mapping::probability_to_tone(prob)
            };
            self.play(prob, tone);
            self.stop.sleep(Duration::from_millis(500));
        }

        log::info!("Monitor stopped. Processed {} samples.", count);
        count
    }
}

/// `0.5 + 0.3 sin(0.5 t)` plus noise, clipped to [0, 1]
fn monitor_probability(t_secs: f64, noise: f64) -> f64 {
    (0.5 + 0.3 * (t_secs * 0.5).sin() + noise).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::RecordingTransport;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rosc::OscType;
    use std::sync::Arc;

    fn stopped_sonifier() -> (ProbabilitySonifier, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let stop = StopSignal::new();
        // Stopped signal makes every hold return immediately
        stop.stop();
        (
            ProbabilitySonifier::new(Emitter::new(transport.clone()), stop),
            transport,
        )
    }

    #[test]
    fn test_synth_ids_wrap() {
        let ids = SynthIds {
            next: AtomicI32::new(9_999),
        };
        assert_eq!(ids.next(), 9_999);
        assert_eq!(ids.next(), 1_000);
        assert_eq!(ids.next(), 1_001);
    }

    #[test]
    fn test_sonify_lifecycle() {
        let (sonifier, transport) = stopped_sonifier();
        let event = sonifier.sonify(0.5);

        assert_eq!(event.frequency_hz, 800.0);
        assert_eq!(event.correlation_id, 1000);

        let messages = transport.messages();
        assert_eq!(
            transport.addresses(),
            vec!["/probability", "/s_new", "/n_free"]
        );
        assert_eq!(messages[1].args[1], OscType::Int(1000));
        assert_eq!(messages[2].args, vec![OscType::Int(1000)]);
    }

    #[test]
    fn test_each_tone_gets_its_own_synth() {
        let (sonifier, _transport) = stopped_sonifier();
        let a = sonifier.sonify(0.2);
        let b = sonifier.sonify_with_certainty(0.2, Some(0.4));
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_hold_lasts_tone_duration() {
        let transport = Arc::new(RecordingTransport::default());
        let sonifier = ProbabilitySonifier::new(Emitter::new(transport), StopSignal::new());
        let start = Instant::now();
        let event = sonifier.sonify(0.0);
        assert!(start.elapsed() >= event.duration());
        assert_eq!(event.duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_stream_plays_low_beta_first() {
        let transport = Arc::new(RecordingTransport::default());
        let sonifier = ProbabilitySonifier::new(
            Emitter::new(transport.clone()),
            StopSignal::new(),
        );
        let mut rng = StdRng::seed_from_u64(42);

        let events = sonifier.stream(&mut rng, 2, Duration::ZERO);

        assert_eq!(events.len(), 2);
        for event in &events {
            assert!(event.frequency_hz >= 200.0 && event.frequency_hz <= 1400.0);
        }
        assert_eq!(transport.messages().len(), 6);
    }

    #[test]
    fn test_stopped_stream_is_silent() {
        let (sonifier, transport) = stopped_sonifier();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sonifier.stream(&mut rng, 10, Duration::ZERO).is_empty());
        assert_eq!(sonifier.monitor(&mut rng, Duration::from_secs(30)), 0);
        assert!(transport.messages().is_empty());
    }

    #[test]
    fn test_monitor_probability_is_clipped() {
        assert_eq!(monitor_probability(0.0, 0.0), 0.5);
        assert_eq!(monitor_probability(0.0, 0.9), 1.0);
        assert_eq!(monitor_probability(0.0, -0.9), 0.0);
        assert!((monitor_probability(std::f64::consts::PI, 0.0) - 0.8).abs() < 1e-12);
    }
}
