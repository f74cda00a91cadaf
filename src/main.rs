#![allow(dead_code)]

//! height-sonify - Sensor-gated height sonification
//!
//! Streams human heights to an OSC synthesis engine. With nobody in front of
//! the sensor it walks a law-of-large-numbers progression over a reference
//! dataset; once a person is detected their own estimated height takes over
//! until they leave.
//!
//! Also ships the two companion sonifications: a Bayesian coin-bias estimator
//! and a probability-to-tone player driving a synth server directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

mod bayes;
mod controller;
mod dataset;
mod mapping;
mod midi;
mod osc;
mod probability;
mod progression;
mod sensor;
mod settings;
mod stop;

use bayes::{BetaPosterior, CoinScenario};
use controller::{Controller, ControllerVariant};
use dataset::{Dataset, Sampler};
use midi::MidiSource;
use osc::{Emitter, LogTransport, Transport, UdpTransport};
use probability::ProbabilitySonifier;
use progression::EndPolicy;
use sensor::{LandmarkSource, ScriptedSource};
use settings::AppSettings;
use stop::StopSignal;

/// Pause between consecutive coin scenarios
const SCENARIO_GAP: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "height-sonify", version, about = "Sensor-gated height sonification over OSC")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log OSC messages instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Override the OSC target (host:port)
    #[arg(long, global = true)]
    target: Option<String>,

    /// Seed for every random draw
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dataset progression only, no sensor
    Height(DatasetArgs),

    /// Sensor-gated sonification: a person locks out the dataset stream
    Run {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Replay sensor frames from a JSON file
        #[arg(long, conflicts_with = "midi")]
        script: Option<PathBuf>,

        /// Restart the script after its last frame
        #[arg(long = "loop", requires = "script")]
        looping: bool,

        /// Use a MIDI controller CC as the sensor
        #[arg(long)]
        midi: bool,

        /// MIDI input port index
        #[arg(long)]
        midi_port: Option<usize>,

        /// MIDI CC number carrying the head position
        #[arg(long)]
        midi_cc: Option<u8>,

        #[arg(long, value_enum)]
        variant: Option<ControllerVariant>,

        /// Minimum spacing of locked-mode height messages
        #[arg(long)]
        locked_interval_ms: Option<u64>,
    },

    /// Bayesian coin-bias estimation
    Coin {
        /// Bias of a single custom coin (plays the default scenarios when omitted)
        #[arg(long)]
        bias: Option<f64>,

        #[arg(long, default_value_t = 50)]
        flips: usize,

        #[arg(long, default_value_t = 150)]
        interval_ms: u64,
    },

    /// Probability-to-tone sonification against the synth server
    Probability {
        #[command(subcommand)]
        mode: ProbabilityMode,
    },

    /// Print the available MIDI input ports
    ListMidiPorts,

    /// Write the effective settings to the settings file
    SaveSettings,
}

#[derive(clap::Args, Debug)]
struct DatasetArgs {
    /// CSV file with the height and standard error columns
    #[arg(long)]
    dataset: Option<PathBuf>,

    #[arg(long, value_enum)]
    end_policy: Option<EndPolicy>,
}

#[derive(Subcommand, Debug)]
enum ProbabilityMode {
    /// A fixed sweep from 0.1 to 0.9
    Range,

    /// Beta-distributed probabilities, then uniform
    Stream {
        #[arg(long, default_value_t = 15)]
        samples: usize,

        #[arg(long, default_value_t = 800)]
        delay_ms: u64,
    },

    /// A slowly drifting noisy probability
    Monitor {
        #[arg(long, default_value_t = 30)]
        duration_s: u64,
    },

    /// One tone, optionally shaped by a certainty
    Single {
        value: f64,

        #[arg(long)]
        certainty: Option<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    log::info!("Starting height-sonify");

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(settings::settings_path);
    let mut settings = AppSettings::load_from(&settings_path);
    if let Some(seed) = cli.seed {
        settings.seed = Some(seed);
    }

    match cli.command {
        Command::Height(args) => {
            args.apply(&mut settings);
            let emitter = make_emitter(cli.dry_run, cli.target.as_deref(), &settings.osc_target)?;
            run_controller(&settings, emitter, None)
        }
        Command::Run {
            dataset,
            script,
            looping,
            midi,
            midi_port,
            midi_cc,
            variant,
            locked_interval_ms,
        } => {
            dataset.apply(&mut settings);
            if let Some(port) = midi_port {
                settings.midi_port = port;
            }
            if let Some(cc) = midi_cc {
                settings.midi_cc = cc;
            }
            if let Some(variant) = variant {
                settings.variant = variant;
            }
            if let Some(ms) = locked_interval_ms {
                settings.locked_interval_ms = ms;
            }

            let source: Option<Box<dyn LandmarkSource>> = if let Some(path) = script {
                let source = ScriptedSource::from_file(&path, settings.frame_interval())
                    .with_context(|| format!("Failed to load sensor script {}", path.display()))?;
                Some(Box::new(source.looping(looping)))
            } else if midi {
                Some(Box::new(MidiSource::new(
                    settings.midi_port,
                    settings.midi_cc,
                    settings.frame_interval(),
                )))
            } else {
                log::warn!("No sensor selected (--script or --midi), sampling dataset only");
                None
            };

            let emitter = make_emitter(cli.dry_run, cli.target.as_deref(), &settings.osc_target)?;
            run_controller(&settings, emitter, source)
        }
        Command::Coin {
            bias,
            flips,
            interval_ms,
        } => {
            let emitter = make_emitter(cli.dry_run, cli.target.as_deref(), &settings.osc_target)?;
            let scenarios = match bias {
                Some(true_bias) => vec![CoinScenario {
                    name: "Custom Coin".to_string(),
                    true_bias,
                    n_flips: flips,
                    interval: Duration::from_millis(interval_ms),
                }],
                None => CoinScenario::defaults(),
            };
            run_coin(&settings, emitter, &scenarios)
        }
        Command::Probability { mode } => {
            let emitter =
                make_emitter(cli.dry_run, cli.target.as_deref(), &settings.synth_target)?;
            run_probability(&settings, emitter, mode)
        }
        Command::ListMidiPorts => {
            let ports = midi::list_ports()?;
            if ports.is_empty() {
                println!("No MIDI input ports found");
            }
            for (index, name) in ports.iter().enumerate() {
                println!("{}: {}", index, name);
            }
            Ok(())
        }
        Command::SaveSettings => {
            settings
                .save_to(&settings_path)
                .with_context(|| format!("Failed to save settings to {}", settings_path.display()))?;
            println!("{}", settings_path.display());
            Ok(())
        }
    }
}

impl DatasetArgs {
    fn apply(&self, settings: &mut AppSettings) {
        if let Some(path) = &self.dataset {
            settings.dataset_path = path.clone();
        }
        if let Some(policy) = self.end_policy {
            settings.progression.end_policy = policy;
        }
    }
}

fn make_emitter(dry_run: bool, target_override: Option<&str>, default_target: &str) -> Result<Emitter> {
    let transport: Arc<dyn Transport> = if dry_run {
        log::info!("Dry run: OSC messages are only logged");
        Arc::new(LogTransport)
    } else {
        let target = target_override.unwrap_or(default_target);
        Arc::new(
            UdpTransport::connect(target)
                .with_context(|| format!("Failed to open OSC transport to {}", target))?,
        )
    };
    Ok(Emitter::new(transport))
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn run_controller(
    settings: &AppSettings,
    emitter: Emitter,
    source: Option<Box<dyn LandmarkSource>>,
) -> Result<()> {
    let dataset = Dataset::load(
        &settings.dataset_path,
        &settings.height_column,
        &settings.se_column,
    )
    .with_context(|| format!("Failed to load dataset {}", settings.dataset_path.display()))?;
    let sampler = Sampler::new(Arc::new(dataset), settings.seed);

    let mut controller = Controller::new(settings.controller_config(), emitter, source, sampler)?;
    let stop_handle = controller.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, stopping");
        stop_handle.stop();
    })
    .context("Failed to install Ctrl-C handler")?;

    controller.start()?;
    let report = controller.join()?;
    log::info!(
        "Finished after {} draws and {} locked messages (position {}, {} full cycles)",
        report.draws,
        report.locked_messages,
        report.progression_position,
        report.progression_cycles
    );
    Ok(())
}

fn install_stop_handler() -> Result<StopSignal> {
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, stopping");
        handler_stop.stop();
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(stop)
}

fn run_coin(settings: &AppSettings, emitter: Emitter, scenarios: &[CoinScenario]) -> Result<()> {
    let prior = BetaPosterior::new(settings.prior_heads, settings.prior_tails)?
        .with_normalization(settings.confidence_normalization)?;
    let stop = install_stop_handler()?;
    let mut rng = make_rng(settings.seed);

    log::info!("Starting Bayesian sonification");
    for (i, scenario) in scenarios.iter().enumerate() {
        if i > 0 && stop.sleep(SCENARIO_GAP) {
            break;
        }
        if stop.is_stopped() {
            break;
        }
        bayes::simulate_coin_flips(scenario, prior.clone(), &mut rng, &emitter, &stop);
    }
    Ok(())
}

fn run_probability(settings: &AppSettings, emitter: Emitter, mode: ProbabilityMode) -> Result<()> {
    let stop = install_stop_handler()?;
    let sonifier = ProbabilitySonifier::new(emitter, stop);
    let mut rng = make_rng(settings.seed);

    match mode {
        ProbabilityMode::Range => {
            log::info!("Testing probability range");
            sonifier.test_range();
        }
        ProbabilityMode::Stream { samples, delay_ms } => {
            log::info!("Streaming {} probabilities", samples);
            sonifier.stream(&mut rng, samples, Duration::from_millis(delay_ms));
        }
        ProbabilityMode::Monitor { duration_s } => {
            log::info!("Monitoring for {} s", duration_s);
            sonifier.monitor(&mut rng, Duration::from_secs(duration_s));
        }
        ProbabilityMode::Single { value, certainty } => {
            sonifier.sonify_with_certainty(value, certainty);
        }
    }
    Ok(())
}
