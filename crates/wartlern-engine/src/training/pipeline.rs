//! Data preparation for classifier training: synthesis, cleaning, scaling and
//! a stratified split. Everything is seeded, so a session is reproducible.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::TrainingError;

/// Number of features per synthesized sample.
pub const FEATURES: usize = 10;
/// Number of label classes (LOW, MEDIUM, HIGH).
pub const CLASSES: usize = 3;

const MISSING_VALUE_RATE: f64 = 0.02;
const TEST_SHARE: f64 = 0.2;
const VALIDATION_SHARE: f64 = 0.25;

/// One labelled row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f64>,
    pub label: usize,
}

/// Balanced, class-shifted rows with gaussian noise. Roughly 2% of rows get
/// one feature replaced by NaN so the cleaning stage has work to do.
#[must_use]
pub fn synthesize(count: usize, seed: u64) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let label = i % CLASSES;
            #[allow(clippy::cast_precision_loss)]
            let centre = label as f64 - 1.0;
            let mut features: Vec<f64> = (0..FEATURES)
                .map(|j| {
                    #[allow(clippy::cast_precision_loss)]
                    let spread = 0.5 + 0.1 * j as f64;
                    centre * spread + gaussian(&mut rng)
                })
                .collect();
            if rng.gen_bool(MISSING_VALUE_RATE) {
                let j = rng.gen_range(0..FEATURES);
                features[j] = f64::NAN;
            }
            Sample { features, label }
        })
        .collect()
}

/// Standard normal draw (Box-Muller).
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Drops rows with any non-finite feature. Returns the kept rows and the
/// number dropped.
#[must_use]
pub fn clean(samples: Vec<Sample>) -> (Vec<Sample>, usize) {
    let before = samples.len();
    let kept: Vec<Sample> = samples
        .into_iter()
        .filter(|s| s.features.iter().all(|v| v.is_finite()))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Per-feature standardization to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f64>,
    pub std_dev: Vec<f64>,
}

impl Standardizer {
    pub fn fit(samples: &[Sample]) -> Result<Self, TrainingError> {
        let Some(first) = samples.first() else {
            return Err(TrainingError::InsufficientData("no rows left to scale".to_string()));
        };
        let width = first.features.len();
        #[allow(clippy::cast_precision_loss)]
        let n = samples.len() as f64;

        let mut mean = vec![0.0; width];
        for s in samples {
            for (m, v) in mean.iter_mut().zip(&s.features) {
                *m += v / n;
            }
        }
        let mut var = vec![0.0; width];
        for s in samples {
            for ((acc, v), m) in var.iter_mut().zip(&s.features).zip(&mean) {
                *acc += (v - m).powi(2) / n;
            }
        }
        let std_dev = var
            .into_iter()
            .map(|v| if v > 0.0 { v.sqrt() } else { 1.0 })
            .collect();
        Ok(Self { mean, std_dev })
    }

    #[must_use]
    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.mean.iter().zip(&self.std_dev))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform_all(&self, samples: &mut [Sample]) {
        for s in samples {
            s.features = self.transform(&s.features);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
    pub test: Vec<Sample>,
}

/// Per class: 20% test, then 25% of the remainder validation, rest training.
pub fn stratified_split(samples: Vec<Sample>, seed: u64) -> Result<Split, TrainingError> {
    let mut by_class: Vec<Vec<Sample>> = vec![Vec::new(); CLASSES];
    for s in samples {
        if s.label >= CLASSES {
            return Err(TrainingError::InsufficientData(format!("unknown label {}", s.label)));
        }
        by_class[s.label].push(s);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split::default();
    for (label, mut rows) in by_class.into_iter().enumerate() {
        if rows.len() < 3 {
            return Err(TrainingError::InsufficientData(format!(
                "class {label} has {} rows, need at least 3",
                rows.len()
            )));
        }
        rows.shuffle(&mut rng);
        let test = share(rows.len(), TEST_SHARE);
        let validation = share(rows.len() - test, VALIDATION_SHARE);
        let mut rest = rows.split_off(test);
        split.test.append(&mut rows);
        let mut train = rest.split_off(validation);
        split.validation.append(&mut rest);
        split.train.append(&mut train);
    }
    Ok(split)
}

/// `ratio` of `n`, at least one row and never all of them.
fn share(n: usize, ratio: f64) -> usize {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let raw = (n as f64 * ratio).round() as usize;
    raw.clamp(1, n.saturating_sub(1).max(1))
}
