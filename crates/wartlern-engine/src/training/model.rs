//! Multinomial logistic regression trained by stochastic gradient descent.

use serde::{Deserialize, Serialize};
use wartlern_core::Priority;

use super::pipeline::{Sample, Standardizer};
use super::TrainingError;

/// Linear softmax classifier. `weights[class]` holds one weight per feature
/// followed by the bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    features: usize,
    weights: Vec<Vec<f64>>,
}

impl SoftmaxRegression {
    #[must_use]
    pub fn new(features: usize, classes: usize) -> Self {
        Self {
            features,
            weights: vec![vec![0.0; features + 1]; classes],
        }
    }

    #[must_use]
    pub fn features(&self) -> usize {
        self.features
    }

    /// Class probabilities for one row.
    #[must_use]
    pub fn probabilities(&self, x: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .map(|w| {
                let bias = w[self.features];
                w[..self.features].iter().zip(x).map(|(a, b)| a * b).sum::<f64>() + bias
            })
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / sum).collect()
    }

    /// Most probable class; the lowest index wins ties.
    #[must_use]
    pub fn predict(&self, x: &[f64]) -> usize {
        let probs = self.probabilities(x);
        let mut best = 0;
        for (i, p) in probs.iter().enumerate().skip(1) {
            if *p > probs[best] {
                best = i;
            }
        }
        best
    }

    /// One SGD pass over `samples`. Returns the mean cross-entropy loss.
    pub fn fit_epoch(&mut self, samples: &[Sample], learning_rate: f64) -> Result<f64, TrainingError> {
        if samples.is_empty() {
            return Err(TrainingError::InsufficientData("empty training set".to_string()));
        }
        let mut loss = 0.0;
        for s in samples {
            if s.features.len() != self.features {
                return Err(TrainingError::DimensionMismatch {
                    expected: self.features,
                    got: s.features.len(),
                });
            }
            let probs = self.probabilities(&s.features);
            if !probs.iter().all(|p| p.is_finite()) {
                return Err(TrainingError::Diverged);
            }
            loss -= probs[s.label].max(f64::MIN_POSITIVE).ln();
            for (class, w) in self.weights.iter_mut().enumerate() {
                let target = if class == s.label { 1.0 } else { 0.0 };
                let grad = probs[class] - target;
                for (wi, xi) in w.iter_mut().zip(&s.features) {
                    *wi -= learning_rate * grad * xi;
                }
                w[self.features] -= learning_rate * grad;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = loss / samples.len() as f64;
        if !mean.is_finite() || !self.is_finite() {
            return Err(TrainingError::Diverged);
        }
        Ok(mean)
    }

    /// True while every weight and bias is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.weights.iter().flatten().all(|w| w.is_finite())
    }

    /// Share of correctly predicted rows; 0.0 for an empty set.
    #[must_use]
    pub fn accuracy(&self, samples: &[Sample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let correct = samples
            .iter()
            .filter(|s| self.predict(&s.features) == s.label)
            .count();
        #[allow(clippy::cast_precision_loss)]
        {
            correct as f64 / samples.len() as f64
        }
    }
}

/// The result of a completed training session: the scaler fitted on the
/// cleaned data and the classifier trained on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub scaler: Standardizer,
    pub classifier: SoftmaxRegression,
    pub test_accuracy: f64,
}

impl TrainedModel {
    /// Predicts the priority for raw (unscaled) features.
    pub fn predict(&self, features: &[f64]) -> Result<Priority, TrainingError> {
        let expected = self.classifier.features();
        if features.len() != expected {
            return Err(TrainingError::DimensionMismatch {
                expected,
                got: features.len(),
            });
        }
        let class = self.classifier.predict(&self.scaler.transform(features));
        Ok(Priority::ALL[class.min(Priority::ALL.len() - 1)])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn separable() -> Vec<Sample> {
        (0..60)
            .map(|i| {
                let label = i % 3;
                #[allow(clippy::cast_precision_loss)]
                let x = label as f64 * 2.0 - 2.0;
                Sample {
                    features: vec![x, -x],
                    label,
                }
            })
            .collect()
    }

    #[test]
    fn untrained_model_is_uniform() {
        let m = SoftmaxRegression::new(2, 3);
        let p = m.probabilities(&[1.0, 2.0]);
        assert!(p.iter().all(|v| (v - 1.0 / 3.0).abs() < 1e-12));
        assert_eq!(m.predict(&[1.0, 2.0]), 0);
    }

    #[test]
    fn training_reduces_loss_and_fits_separable_data() {
        let data = separable();
        let mut m = SoftmaxRegression::new(2, 3);
        let first = m.fit_epoch(&data, 0.1).unwrap();
        let mut last = first;
        for _ in 0..100 {
            last = m.fit_epoch(&data, 0.1).unwrap();
        }
        assert!(last < first);
        assert!(m.accuracy(&data) > 0.95);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut m = SoftmaxRegression::new(3, 3);
        let err = m.fit_epoch(&separable(), 0.1).unwrap_err();
        assert!(matches!(err, TrainingError::DimensionMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn non_finite_weights_are_reported_as_divergence() {
        let mut m = SoftmaxRegression::new(2, 3);
        m.weights[1][0] = f64::NAN;
        assert!(!m.is_finite());
        assert_eq!(m.fit_epoch(&separable(), 0.1), Err(TrainingError::Diverged));
    }

    #[test]
    fn overflowing_updates_are_reported_as_divergence() {
        let mut m = SoftmaxRegression::new(2, 3);
        let err = m.fit_epoch(&separable(), f64::INFINITY).unwrap_err();
        assert_eq!(err, TrainingError::Diverged);
    }

    #[test]
    fn trained_model_maps_classes_to_priorities() {
        let data = separable();
        let scaler = Standardizer::fit(&data).unwrap();
        let mut scaled = data.clone();
        scaler.transform_all(&mut scaled);
        let mut classifier = SoftmaxRegression::new(2, 3);
        for _ in 0..100 {
            classifier.fit_epoch(&scaled, 0.1).unwrap();
        }
        let model = TrainedModel {
            scaler,
            classifier,
            test_accuracy: 1.0,
        };
        assert_eq!(model.predict(&[2.0, -2.0]).unwrap(), Priority::High);
        assert_eq!(model.predict(&[-2.0, 2.0]).unwrap(), Priority::Low);
        assert!(model.predict(&[1.0]).is_err());
    }
}
