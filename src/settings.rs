use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::{ControllerConfig, ControllerVariant};
use crate::dataset::{DEFAULT_HEIGHT_COLUMN, DEFAULT_SE_COLUMN};
use crate::mapping::{FrequencyMap, HeightEstimator, SampleSelector};
use crate::progression::ProgressionConfig;

/// Returns the path to the settings file: `~/.config/height-sonify/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("height-sonify");
    path.push("settings.json");
    path
}

/// Persisted application settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Transport
    pub osc_target: String,
    pub synth_target: String,

    // Dataset
    pub dataset_path: PathBuf,
    pub height_column: String,
    pub se_column: String,
    pub seed: Option<u64>,

    // Sensor
    pub min_detection_confidence: f64,
    pub midi_port: usize,
    pub midi_cc: u8,
    pub frame_interval_ms: u64,

    // Mapping
    pub estimator: HeightEstimator,
    pub frequency: FrequencyMap,
    pub selector: SampleSelector,

    // Controller
    pub variant: ControllerVariant,
    pub locked_interval_ms: u64,
    pub progression: ProgressionConfig,

    // Bayesian coin
    pub prior_heads: f64,
    pub prior_tails: f64,
    pub confidence_normalization: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            osc_target: "127.0.0.1:57120".to_string(),
            synth_target: "127.0.0.1:57110".to_string(),

            dataset_path: PathBuf::from("NCD_RisC_Lancet_2020_height_child_adolescent_global.csv"),
            height_column: DEFAULT_HEIGHT_COLUMN.to_string(),
            se_column: DEFAULT_SE_COLUMN.to_string(),
            seed: None,

            min_detection_confidence: 0.5,
            midi_port: 0,
            midi_cc: 1,
            frame_interval_ms: 33,

            estimator: HeightEstimator::default(),
            frequency: FrequencyMap::default(),
            selector: SampleSelector::default(),

            variant: ControllerVariant::default(),
            locked_interval_ms: 200,
            progression: ProgressionConfig::default(),

            prior_heads: 1.0,
            prior_tails: 1.0,
            confidence_normalization: 100.0,
        }
    }
}

impl AppSettings {
    /// Load settings from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to `path` as pretty JSON.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::info!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Controller configuration derived from these settings
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            variant: self.variant,
            estimator: self.estimator,
            frequency: self.frequency,
            selector: self.selector,
            min_detection_confidence: self.min_detection_confidence,
            locked_interval: Duration::from_millis(self.locked_interval_ms),
            progression: self.progression.clone(),
        }
    }
}
