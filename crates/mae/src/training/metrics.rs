//! Per-step metric breakdown and multi-label ranking metrics.
//!
//! The training step returns a [`StepMetrics`] breakdown instead of logging
//! from inside the loss code; the training loop decides what to record.

use burn::prelude::*;

/// Structured breakdown of one training step.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct StepMetrics {
    /// Self-supervised contrastive loss between the two online views.
    pub ssl_loss: f64,
    /// BYOL-style supervised-contrastive loss against the momentum targets.
    pub byol_loss: f64,
    /// Masked reconstruction loss.
    pub recon_loss: f64,
    /// Weighted sum of the three self-supervised terms.
    pub mae_loss: f64,
    /// Multi-label classification loss (two-view average).
    pub cls_loss: f64,
    /// Full optimization objective: `mae_loss + cls_loss`.
    pub total_loss: f64,
    /// Macro-averaged area under the precision-recall curve (view 1).
    pub auprc: f64,
    /// Top-k multi-label accuracy under the Hamming criterion (view 1).
    pub topk_accuracy: f64,
}

impl StepMetrics {
    /// Returns human-readable warnings for non-finite loss terms.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, value) in [
            ("ssl_loss", self.ssl_loss),
            ("byol_loss", self.byol_loss),
            ("recon_loss", self.recon_loss),
            ("cls_loss", self.cls_loss),
            ("total_loss", self.total_loss),
        ] {
            if !value.is_finite() {
                warnings.push(format!("{name} is not finite: {value}"));
            }
        }
        warnings
    }
}

/// Metric history across logging intervals.
#[derive(Debug, Default)]
pub struct MetricsHistory {
    entries: Vec<(usize, StepMetrics)>,
}

impl MetricsHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record metrics for a step.
    pub fn push(&mut self, step: usize, metrics: StepMetrics) {
        self.entries.push((step, metrics));
    }

    /// Recorded `(step, metrics)` pairs in insertion order.
    pub fn entries(&self) -> &[(usize, StepMetrics)] {
        &self.entries
    }
}

/// Macro-averaged area under the precision-recall curve.
///
/// Computed per label over `(score, target)` columns with step-wise
/// interpolation (average precision); labels without any positive example
/// are skipped. `scores` and `targets` are `(n_samples, n_labels)`,
/// row-major. Returns 0 when no label has a positive.
pub fn multilabel_auprc(scores: &[f32], targets: &[i64], n_samples: usize, n_labels: usize) -> f64 {
    assert_eq!(scores.len(), n_samples * n_labels, "score shape mismatch");
    assert_eq!(targets.len(), n_samples * n_labels, "target shape mismatch");

    let mut sum = 0.0;
    let mut counted = 0usize;
    for label in 0..n_labels {
        let mut column: Vec<(f32, i64)> = (0..n_samples)
            .map(|row| (scores[row * n_labels + label], targets[row * n_labels + label]))
            .collect();
        let n_pos = column.iter().filter(|(_, t)| *t != 0).count();
        if n_pos == 0 {
            continue;
        }
        column.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut hits = 0usize;
        let mut ap = 0.0;
        for (rank, (_, target)) in column.iter().enumerate() {
            if *target != 0 {
                hits += 1;
                ap += hits as f64 / (rank + 1) as f64;
            }
        }
        sum += ap / n_pos as f64;
        counted += 1;
    }
    if counted == 0 {
        0.0
    } else {
        sum / counted as f64
    }
}

/// Top-k multi-label accuracy under the Hamming criterion.
///
/// Per sample, the prediction marks the k highest-scoring labels; the score
/// is the fraction of label positions where prediction and target agree,
/// averaged over samples.
pub fn topk_multilabel_accuracy(
    scores: &[f32],
    targets: &[i64],
    n_samples: usize,
    n_labels: usize,
    k: usize,
) -> f64 {
    assert_eq!(scores.len(), n_samples * n_labels, "score shape mismatch");
    assert_eq!(targets.len(), n_samples * n_labels, "target shape mismatch");
    if n_samples == 0 {
        return 0.0;
    }
    let k = k.min(n_labels);

    let mut total = 0.0;
    for row in 0..n_samples {
        let row_scores = &scores[row * n_labels..(row + 1) * n_labels];
        let mut order: Vec<usize> = (0..n_labels).collect();
        order.sort_by(|&a, &b| {
            row_scores[b]
                .partial_cmp(&row_scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut predicted = vec![0_i64; n_labels];
        for &idx in order.iter().take(k) {
            predicted[idx] = 1;
        }

        let matches = (0..n_labels)
            .filter(|&l| {
                let truth = i64::from(targets[row * n_labels + l] != 0);
                predicted[l] == truth
            })
            .count();
        total += matches as f64 / n_labels as f64;
    }
    total / n_samples as f64
}

/// Tensor wrapper: extract `(scores, targets)` host data and compute both
/// ranking metrics. `probs` are sigmoid scores `(n, c)`; `targets` are cast
/// to binary integers.
pub fn ranking_metrics<B: Backend>(
    probs: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
    k: usize,
) -> (f64, f64) {
    let [n_samples, n_labels] = probs.dims();
    let scores: Vec<f32> = probs
        .into_data()
        .convert::<f32>()
        .to_vec()
        .expect("probability tensor should convert to f32");
    let labels: Vec<i64> = targets
        .into_data()
        .convert::<i64>()
        .to_vec()
        .expect("target tensor should convert to i64");
    (
        multilabel_auprc(&scores, &labels, n_samples, n_labels),
        topk_multilabel_accuracy(&scores, &labels, n_samples, n_labels, k),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auprc_perfect_ranking() {
        // Two labels, positives always ranked first.
        let scores = vec![0.9_f32, 0.8, 0.1, 0.2];
        let targets = vec![1_i64, 1, 0, 0];
        let val = multilabel_auprc(&scores, &targets, 2, 2);
        assert!((val - 1.0).abs() < 1e-9, "expected 1.0, got {val}");
    }

    #[test]
    fn test_auprc_worst_ranking() {
        // Single label, 1 positive of 2 samples, ranked last: AP = 1/2.
        let scores = vec![0.9_f32, 0.1];
        let targets = vec![0_i64, 1];
        let val = multilabel_auprc(&scores, &targets, 2, 1);
        assert!((val - 0.5).abs() < 1e-9, "expected 0.5, got {val}");
    }

    #[test]
    fn test_auprc_skips_labels_without_positives() {
        let scores = vec![0.9_f32, 0.2, 0.8, 0.3];
        let targets = vec![1_i64, 0, 0, 0];
        // Label 1 has no positives; macro average covers label 0 only.
        let val = multilabel_auprc(&scores, &targets, 2, 2);
        assert!((val - 1.0).abs() < 1e-9, "expected 1.0, got {val}");
    }

    #[test]
    fn test_auprc_no_positives_is_zero() {
        let scores = vec![0.9_f32, 0.1];
        let targets = vec![0_i64, 0];
        assert_eq!(multilabel_auprc(&scores, &targets, 2, 1), 0.0);
    }

    #[test]
    fn test_topk_hamming_exact_match() {
        // 4 labels, k = 2, both positives in the top 2.
        let scores = vec![0.9_f32, 0.8, 0.1, 0.2];
        let targets = vec![1_i64, 1, 0, 0];
        let val = topk_multilabel_accuracy(&scores, &targets, 1, 4, 2);
        assert!((val - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_topk_hamming_partial_match() {
        // Prediction marks labels {0, 1}; truth is {0, 2}: agreement on
        // positions 0 and 3 only.
        let scores = vec![0.9_f32, 0.8, 0.1, 0.2];
        let targets = vec![1_i64, 0, 1, 0];
        let val = topk_multilabel_accuracy(&scores, &targets, 1, 4, 2);
        assert!((val - 0.5).abs() < 1e-9, "expected 0.5, got {val}");
    }

    #[test]
    fn test_topk_caps_k_at_label_count() {
        let scores = vec![0.9_f32, 0.8];
        let targets = vec![1_i64, 1];
        let val = topk_multilabel_accuracy(&scores, &targets, 1, 2, 5);
        assert!((val - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_health_check_flags_nan() {
        let metrics = StepMetrics {
            ssl_loss: 0.1,
            byol_loss: f64::NAN,
            recon_loss: 0.2,
            mae_loss: 0.3,
            cls_loss: 0.4,
            total_loss: f64::INFINITY,
            auprc: 0.5,
            topk_accuracy: 0.5,
        };
        let warnings = metrics.health_check();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("byol_loss"));
    }
}
