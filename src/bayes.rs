//! Bayesian coin-bias estimation
//!
//! A Beta-Binomial conjugate model: the posterior over the probability of
//! heads is `Beta(alpha, beta)` where the parameters are pseudo-counts of
//! heads and tails. Each observed flip adds one to exactly one count.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::osc::{self, Emitter};
use crate::stop::StopSignal;

/// Errors constructing a posterior
#[derive(Error, Debug, PartialEq)]
pub enum BayesError {
    #[error("Prior pseudo-counts must be positive and finite (got heads={heads}, tails={tails})")]
    InvalidPrior { heads: f64, tails: f64 },

    #[error("Confidence normalization must be positive (got {0})")]
    InvalidNormalization(f64),
}

/// Outcome of a single coin flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Heads,
    Tails,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Heads => "H",
            Self::Tails => "T",
        }
    }
}

/// Number of observations at which confidence saturates
pub const DEFAULT_CONFIDENCE_NORMALIZATION: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BetaPosterior {
    alpha: f64,
    beta: f64,
    normalization: f64,
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self::uniform()
    }
}

impl BetaPosterior {
    /// Uniform prior, `Beta(1, 1)`
    pub fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            normalization: DEFAULT_CONFIDENCE_NORMALIZATION,
        }
    }

    pub fn new(prior_heads: f64, prior_tails: f64) -> Result<Self, BayesError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(prior_heads) || !valid(prior_tails) {
            return Err(BayesError::InvalidPrior {
                heads: prior_heads,
                tails: prior_tails,
            });
        }
        Ok(Self {
            alpha: prior_heads,
            beta: prior_tails,
            normalization: DEFAULT_CONFIDENCE_NORMALIZATION,
        })
    }

    /// Set the total pseudo-count at which `confidence()` reaches 1.0
    pub fn with_normalization(mut self, normalization: f64) -> Result<Self, BayesError> {
        if !(normalization.is_finite() && normalization > 0.0) {
            return Err(BayesError::InvalidNormalization(normalization));
        }
        self.normalization = normalization;
        Ok(self)
    }

    pub fn update(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Heads => self.alpha += 1.0,
            Outcome::Tails => self.beta += 1.0,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Posterior mean probability of heads
    pub fn belief(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Total pseudo-count over the normalization, saturating at 1.0
    pub fn confidence(&self) -> f64 {
        ((self.alpha + self.beta) / self.normalization).min(1.0)
    }

    /// Standard deviation of the Beta posterior (closed form)
    pub fn uncertainty(&self) -> f64 {
        let (a, b) = (self.alpha, self.beta);
        let total = a + b;
        ((a * b) / (total * total * (total + 1.0))).sqrt()
    }
}

/// One simulated coin with a known bias
#[derive(Debug, Clone, PartialEq)]
pub struct CoinScenario {
    pub name: String,
    pub true_bias: f64,
    pub n_flips: usize,
    pub interval: Duration,
}

impl CoinScenario {
    /// The three scenarios played by default: fair, heavily biased, subtly biased
    pub fn defaults() -> Vec<CoinScenario> {
        vec![
            CoinScenario {
                name: "Fair Coin".to_string(),
                true_bias: 0.5,
                n_flips: 50,
                interval: Duration::from_millis(150),
            },
            CoinScenario {
                name: "Heavily Biased Coin".to_string(),
                true_bias: 0.8,
                n_flips: 50,
                interval: Duration::from_millis(150),
            },
            CoinScenario {
                name: "Subtly Biased Coin".to_string(),
                true_bias: 0.6,
                n_flips: 100,
                interval: Duration::from_millis(100),
            },
        ]
    }
}

/// Flip a coin that lands heads with probability `true_bias`
pub fn flip<R: Rng + ?Sized>(rng: &mut R, true_bias: f64) -> Outcome {
    if rng.gen::<f64>() < true_bias {
        Outcome::Heads
    } else {
        Outcome::Tails
    }
}

/// Run a scenario: flip, update, emit `/bayesian`, wait. Returns early with
/// the posterior so far if `stop` fires.
pub fn simulate_coin_flips<R: Rng + ?Sized>(
    scenario: &CoinScenario,
    mut posterior: BetaPosterior,
    rng: &mut R,
    emitter: &Emitter,
    stop: &StopSignal,
) -> BetaPosterior {
    log::info!(
        "Simulating {} with true bias = {}",
        scenario.name,
        scenario.true_bias
    );

    for i in 0..scenario.n_flips {
        if stop.is_stopped() {
            break;
        }

        let outcome = flip(rng, scenario.true_bias);
        posterior.update(outcome);

        let belief = posterior.belief();
        let confidence = posterior.confidence();
        let uncertainty = posterior.uncertainty();
        emitter.emit(osc::bayesian(belief, confidence, uncertainty));

        log::info!(
            "Flip {}: {} | Belief: {:.3} | Confidence: {:.3} | Uncertainty: {:.3}",
            i + 1,
            outcome.symbol(),
            belief,
            confidence,
            uncertainty
        );

        stop.sleep(scenario.interval);
    }

    log::info!(
        "Final estimate: {:.3} (true: {})",
        posterior.belief(),
        scenario.true_bias
    );
    posterior
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::RecordingTransport;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    #[test]
    fn test_uniform_prior_statistics() {
        let posterior = BetaPosterior::uniform();
        assert_eq!(posterior.belief(), 0.5);
        assert_eq!(posterior.confidence(), 0.02);
        assert_eq!(posterior.uncertainty(), (1.0f64 / 12.0).sqrt());
        assert!((posterior.uncertainty() - 0.2887).abs() < 1e-4);
    }

    #[test]
    fn test_nine_heads_one_tail() {
        let mut posterior = BetaPosterior::uniform();
        for _ in 0..9 {
            posterior.update(Outcome::Heads);
        }
        posterior.update(Outcome::Tails);

        assert_eq!(posterior.alpha(), 10.0);
        assert_eq!(posterior.beta(), 2.0);
        assert_eq!(posterior.belief(), 10.0 / 12.0);
    }

    #[test]
    fn test_belief_matches_closed_form() {
        for (a, b) in [(0.5f64, 0.5f64), (1.0, 3.0), (7.0, 2.0), (120.0, 80.0)] {
            let posterior = BetaPosterior::new(a, b).unwrap();
            assert_eq!(posterior.belief(), a / (a + b));
            assert!(posterior.belief() > 0.0 && posterior.belief() < 1.0);
            let expected = ((a * b) / ((a + b).powi(2) * (a + b + 1.0))).sqrt();
            assert!((posterior.uncertainty() - expected).abs() < 1e-15);
        }
    }

    #[test]
    fn test_confidence_saturates_at_normalization() {
        let mut posterior = BetaPosterior::uniform();
        let mut last = posterior.confidence();
        for i in 0..150 {
            posterior.update(if i % 3 == 0 { Outcome::Tails } else { Outcome::Heads });
            let confidence = posterior.confidence();
            assert!(confidence >= last);
            if posterior.alpha() + posterior.beta() >= 100.0 {
                assert_eq!(confidence, 1.0);
            }
            last = confidence;
        }
    }

    #[test]
    fn test_custom_normalization() {
        let mut posterior = BetaPosterior::uniform().with_normalization(10.0).unwrap();
        for _ in 0..8 {
            posterior.update(Outcome::Heads);
        }
        assert_eq!(posterior.confidence(), 1.0);
        assert!(BetaPosterior::uniform().with_normalization(0.0).is_err());
    }

    #[test]
    fn test_invalid_prior_rejected() {
        assert!(BetaPosterior::new(0.0, 1.0).is_err());
        assert!(BetaPosterior::new(1.0, -2.0).is_err());
        assert!(BetaPosterior::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_counts_never_decrease() {
        let mut posterior = BetaPosterior::new(2.0, 3.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let (a, b) = (posterior.alpha(), posterior.beta());
            posterior.update(flip(&mut rng, 0.3));
            assert!(posterior.alpha() >= a && posterior.beta() >= b);
            assert_eq!(posterior.alpha() + posterior.beta(), a + b + 1.0);
        }
        assert!(posterior.alpha() >= 2.0 && posterior.beta() >= 3.0);
    }

    #[test]
    fn test_certain_coin_drives_belief_up() {
        let transport = Arc::new(RecordingTransport::default());
        let emitter = Emitter::new(transport.clone());
        let scenario = CoinScenario {
            name: "Always heads".to_string(),
            true_bias: 1.0,
            n_flips: 20,
            interval: Duration::ZERO,
        };
        let mut rng = StdRng::seed_from_u64(42);

        let posterior = simulate_coin_flips(
            &scenario,
            BetaPosterior::uniform(),
            &mut rng,
            &emitter,
            &StopSignal::new(),
        );

        assert_eq!(posterior.beta(), 1.0);
        assert_eq!(posterior.alpha(), 21.0);

        let beliefs: Vec<f32> = transport
            .messages()
            .iter()
            .map(|m| {
                assert_eq!(m.addr, "/bayesian");
                m.args[0].clone().float().unwrap()
            })
            .collect();
        assert_eq!(beliefs.len(), 20);
        assert!(beliefs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_stopped_simulation_emits_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let emitter = Emitter::new(transport.clone());
        let stop = StopSignal::new();
        stop.stop();
        let mut rng = StdRng::seed_from_u64(1);

        let posterior = simulate_coin_flips(
            &CoinScenario::defaults()[0],
            BetaPosterior::uniform(),
            &mut rng,
            &emitter,
            &stop,
        );

        assert_eq!(posterior, BetaPosterior::uniform());
        assert!(transport.messages().is_empty());
    }
}
