//! Reference height dataset and batch sampling
//!
//! The table is loaded once and shared read-only. A [`Sampler`] owns its own
//! RNG and draws rows uniformly with replacement, reducing each batch to a
//! mean height and a mean standard error.

use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Column holding the mean height (cm)
pub const DEFAULT_HEIGHT_COLUMN: &str = "Mean height";
/// Column holding the standard error of the mean height
pub const DEFAULT_SE_COLUMN: &str = "Mean height standard error";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Reference dataset is empty")]
    Empty,

    #[error("Sample size must be at least 1 (got {0})")]
    InvalidSampleSize(usize),

    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Row {row}: could not parse {column} value {value:?}")]
    BadValue {
        row: usize,
        column: String,
        value: String,
    },
}

/// One row of the reference table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetRecord {
    pub mean_height_cm: f64,
    pub mean_height_se: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<DatasetRecord>,
}

impl Dataset {
    pub fn from_records(records: Vec<DatasetRecord>) -> Self {
        Self { records }
    }

    /// Load the two named numeric columns from a CSV file with a header row.
    pub fn load(
        path: impl AsRef<Path>,
        height_column: &str,
        se_column: &str,
    ) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let reader = csv::Reader::from_path(path)?;
        let dataset = Self::from_reader(reader, height_column, se_column)?;
        log::info!(
            "Dataset loaded: {} records from {}",
            dataset.len(),
            path.display()
        );
        Ok(dataset)
    }

    fn from_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
        height_column: &str,
        se_column: &str,
    ) -> Result<Self, DatasetError> {
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
        };
        let height_idx = column(height_column)?;
        let se_idx = column(se_column)?;

        let mut records = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let record = result?;
            let parse = |idx: usize, name: &str| -> Result<f64, DatasetError> {
                let raw = record.get(idx).unwrap_or("").trim();
                raw.parse::<f64>().map_err(|_| DatasetError::BadValue {
                    row: row + 1,
                    column: name.to_string(),
                    value: raw.to_string(),
                })
            };
            records.push(DatasetRecord {
                mean_height_cm: parse(height_idx, height_column)?,
                mean_height_se: parse(se_idx, se_column)?,
            });
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DatasetRecord] {
        &self.records
    }
}

/// Mean of a batch of draws
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Draw {
    pub sample_size: usize,
    pub mean_height_cm: f64,
    pub mean_height_se: f64,
}

/// Draws batches from a shared dataset
pub struct Sampler {
    dataset: Arc<Dataset>,
    rng: StdRng,
}

impl Sampler {
    /// Seeded when `seed` is given, otherwise from OS entropy
    pub fn new(dataset: Arc<Dataset>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { dataset, rng }
    }

    /// Draw `n` rows with replacement and average both columns.
    pub fn draw(&mut self, n: usize) -> Result<Draw, DatasetError> {
        if n < 1 {
            return Err(DatasetError::InvalidSampleSize(n));
        }
        if self.dataset.is_empty() {
            return Err(DatasetError::Empty);
        }
        let records = self.dataset.records();

        let mut height_sum = 0.0;
        let mut se_sum = 0.0;
        for _ in 0..n {
            let record = &records[self.rng.gen_range(0..records.len())];
            height_sum += record.mean_height_cm;
            se_sum += record.mean_height_se;
        }

        Ok(Draw {
            sample_size: n,
            mean_height_cm: height_sum / n as f64,
            mean_height_se: se_sum / n as f64,
        })
    }
}
