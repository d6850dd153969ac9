//! Classification metrics
//!
//! Accuracy, top-k accuracy, per-class precision/recall/F1 with macro and
//! weighted averages, and the confusion matrix. Pure functions of the
//! prediction and ground-truth sequences.

use serde::{Deserialize, Serialize};

/// Confusion matrix for multi-class classification.
/// Rows are true labels, columns are predictions, row-major storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,
    /// Flat row-major counts
    pub counts: Vec<usize>,
}

impl ConfusionMatrix {
    /// An empty matrix for the given class count
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    /// Tally predictions against ground truth
    pub fn from_predictions(predictions: &[usize], truth: &[usize], num_classes: usize) -> Self {
        let mut matrix = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(truth.iter()) {
            matrix.add(actual, pred);
        }
        matrix
    }

    /// Record one prediction
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.counts[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual * self.num_classes + predicted]
    }

    /// Total number of tallied samples
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Row sums: true-label support per class
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Rows normalized by their sum, for reporting
    pub fn normalized_rows(&self) -> Vec<Vec<f64>> {
        let sums = self.row_sums();
        (0..self.num_classes)
            .map(|row| {
                let sum = sums[row] as f64;
                (0..self.num_classes)
                    .map(|col| {
                        if sum > 0.0 {
                            self.get(row, col) as f64 / sum
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Write the raw counts as CSV (first column is the true label)
    pub fn save_csv(&self, path: &std::path::Path) -> std::io::Result<()> {
        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            content.push_str(&format!(",{col}"));
        }
        content.push('\n');
        for row in 0..self.num_classes {
            content.push_str(&format!("{row}"));
            for col in 0..self.num_classes {
                content.push_str(&format!(",{}", self.get(row, col)));
            }
            content.push('\n');
        }
        std::fs::write(path, content)
    }
}

/// Per-class precision/recall/F1 and support
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassReport {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassReport {
    fn from_matrix(matrix: &ConfusionMatrix, class_idx: usize) -> Self {
        let tp = matrix.get(class_idx, class_idx) as f64;
        let fp: f64 = (0..matrix.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| matrix.get(i, class_idx) as f64)
            .sum();
        let fn_: f64 = (0..matrix.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| matrix.get(class_idx, i) as f64)
            .sum();

        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            precision,
            recall,
            f1,
            support: (tp + fn_) as usize,
        }
    }
}

/// Full evaluation result over one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub total_samples: usize,
    pub accuracy: f64,
    /// Fraction of samples whose true label is among the k highest scores
    pub top_k_accuracy: f64,
    /// The k used for `top_k_accuracy`
    pub top_k: usize,
    /// Mean negative log-likelihood of the true class
    pub loss: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1: f64,
    pub per_class: Vec<ClassReport>,
    pub confusion_matrix: ConfusionMatrix,
}

impl EvalReport {
    /// Build a report from per-sample probability rows and true labels.
    ///
    /// Predictions are the argmax of each probability row.
    pub fn from_probabilities(
        probabilities: &[Vec<f32>],
        truth: &[usize],
        num_classes: usize,
        top_k: usize,
    ) -> Self {
        assert_eq!(
            probabilities.len(),
            truth.len(),
            "probabilities and truth must have the same length"
        );

        let predictions: Vec<usize> = probabilities.iter().map(|row| argmax(row)).collect();
        let matrix = ConfusionMatrix::from_predictions(&predictions, truth, num_classes);

        let total_samples = truth.len();
        let accuracy = if total_samples > 0 {
            matrix.correct() as f64 / total_samples as f64
        } else {
            0.0
        };

        let top_k_hits = probabilities
            .iter()
            .zip(truth.iter())
            .filter(|(row, &label)| in_top_k(row, label, top_k))
            .count();
        let top_k_accuracy = if total_samples > 0 {
            top_k_hits as f64 / total_samples as f64
        } else {
            0.0
        };

        let loss = if total_samples > 0 {
            probabilities
                .iter()
                .zip(truth.iter())
                .map(|(row, &label)| -((row.get(label).copied().unwrap_or(0.0) as f64) + 1e-12).ln())
                .sum::<f64>()
                / total_samples as f64
        } else {
            0.0
        };

        let per_class: Vec<ClassReport> = (0..num_classes)
            .map(|c| ClassReport::from_matrix(&matrix, c))
            .collect();

        let populated: Vec<&ClassReport> = per_class.iter().filter(|c| c.support > 0).collect();
        let n = populated.len() as f64;
        let (macro_precision, macro_recall, macro_f1) = if n > 0.0 {
            (
                populated.iter().map(|c| c.precision).sum::<f64>() / n,
                populated.iter().map(|c| c.recall).sum::<f64>() / n,
                populated.iter().map(|c| c.f1).sum::<f64>() / n,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        let total_support: usize = per_class.iter().map(|c| c.support).sum();
        let weighted = |f: fn(&ClassReport) -> f64| {
            if total_support > 0 {
                per_class
                    .iter()
                    .map(|c| f(c) * c.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            } else {
                0.0
            }
        };

        Self {
            total_samples,
            accuracy,
            top_k_accuracy,
            top_k,
            loss,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_precision: weighted(|c| c.precision),
            weighted_recall: weighted(|c| c.recall),
            weighted_f1: weighted(|c| c.f1),
            per_class,
            confusion_matrix: matrix,
        }
    }

    /// Attach class names from the persisted mapping
    pub fn with_class_names(mut self, names: &[String]) -> Self {
        for report in &mut self.per_class {
            report.class_name = names.get(report.class_idx).cloned();
        }
        self
    }

    /// Best-performing class by F1, among classes with support
    pub fn best_class(&self) -> Option<&ClassReport> {
        self.per_class
            .iter()
            .filter(|c| c.support > 0)
            .max_by(|a, b| a.f1.partial_cmp(&b.f1).unwrap())
    }

    /// Worst-performing class by F1, among classes with support
    pub fn worst_class(&self) -> Option<&ClassReport> {
        self.per_class
            .iter()
            .filter(|c| c.support > 0)
            .min_by(|a, b| a.f1.partial_cmp(&b.f1).unwrap())
    }

    /// Persist the report as pretty JSON
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Samples:        {}\n", self.total_samples));
        out.push_str(&format!("Accuracy:       {:.2}%\n", self.accuracy * 100.0));
        out.push_str(&format!(
            "Top-{} accuracy: {:.2}%\n",
            self.top_k,
            self.top_k_accuracy * 100.0
        ));
        out.push_str(&format!("Loss:           {:.4}\n", self.loss));
        out.push_str(&format!("Weighted F1:    {:.4}\n", self.weighted_f1));
        if let (Some(best), Some(worst)) = (self.best_class(), self.worst_class()) {
            let name = |c: &ClassReport| {
                c.class_name
                    .clone()
                    .unwrap_or_else(|| c.class_idx.to_string())
            };
            out.push_str(&format!("Best class:     {} (F1 {:.4})\n", name(best), best.f1));
            out.push_str(&format!("Worst class:    {} (F1 {:.4})\n", name(worst), worst.f1));
        }
        out
    }
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn in_top_k(row: &[f32], label: usize, k: usize) -> bool {
    let own = match row.get(label) {
        Some(&p) => p,
        None => return false,
    };
    let higher = row.iter().filter(|&&p| p > own).count();
    higher < k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(idx: usize, n: usize) -> Vec<f32> {
        let mut row = vec![0.01f32; n];
        row[idx] = 0.9;
        row
    }

    #[test]
    fn test_confusion_matrix_tally() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let matrix = ConfusionMatrix::from_predictions(&predictions, &truth, 3);
        assert_eq!(matrix.get(0, 0), 3);
        assert_eq!(matrix.get(1, 1), 1);
        assert_eq!(matrix.get(2, 2), 3);
        assert_eq!(matrix.total(), 10);
        assert_eq!(matrix.correct(), 7);
    }

    #[test]
    fn test_normalized_rows_sum_to_one() {
        let predictions = vec![0, 0, 1, 1, 1];
        let truth = vec![0, 1, 1, 1, 0];
        let matrix = ConfusionMatrix::from_predictions(&predictions, &truth, 2);

        for row in matrix.normalized_rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_report_accuracy_and_per_class() {
        let probs = vec![
            one_hot(0, 2),
            one_hot(0, 2),
            one_hot(0, 2), // wrong: truth is 1
            one_hot(1, 2),
            one_hot(1, 2), // wrong: truth is 0
        ];
        let truth = vec![0, 0, 1, 1, 0];

        let report = EvalReport::from_probabilities(&probs, &truth, 2, 1);
        assert_eq!(report.total_samples, 5);
        assert!((report.accuracy - 0.6).abs() < 1e-9);

        // Class 0: TP=2, FP=1, FN=1
        let class0 = &report.per_class[0];
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(class0.support, 3);
    }

    #[test]
    fn test_top_k_accuracy() {
        // True class always ranked second
        let probs = vec![vec![0.5, 0.3, 0.2], vec![0.1, 0.6, 0.3], vec![0.2, 0.5, 0.3]];
        let truth = vec![1, 2, 2];

        let top1 = EvalReport::from_probabilities(&probs, &truth, 3, 1);
        assert!((top1.top_k_accuracy - 0.0).abs() < 1e-9);

        let top2 = EvalReport::from_probabilities(&probs, &truth, 3, 2);
        assert!((top2.top_k_accuracy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_and_worst_class_by_f1() {
        // Class 0 perfectly predicted, class 1 never recalled
        let probs = vec![one_hot(0, 3), one_hot(0, 3), one_hot(0, 3), one_hot(2, 3)];
        let truth = vec![0, 0, 1, 2];

        let report = EvalReport::from_probabilities(&probs, &truth, 3, 1);
        assert_eq!(report.best_class().unwrap().class_idx, 2);
        assert_eq!(report.worst_class().unwrap().class_idx, 1);
    }

    #[test]
    fn test_perfect_predictions() {
        let probs: Vec<Vec<f32>> = (0..6).map(|i| one_hot(i % 3, 3)).collect();
        let truth: Vec<usize> = (0..6).map(|i| i % 3).collect();

        let report = EvalReport::from_probabilities(&probs, &truth, 3, 1);
        assert!((report.accuracy - 1.0).abs() < 1e-9);
        assert!((report.macro_f1 - 1.0).abs() < 1e-9);
        assert!((report.weighted_f1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_loss_is_nll_of_true_class() {
        let probs = vec![vec![0.9f32, 0.1]];
        let truth = vec![0];
        let report = EvalReport::from_probabilities(&probs, &truth, 2, 1);
        assert!((report.loss - (-(0.9f64.ln()))).abs() < 1e-6);
    }

    #[test]
    fn test_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confusion.csv");

        let matrix = ConfusionMatrix::from_predictions(&[0, 1], &[0, 1], 2);
        matrix.save_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.lines().count() == 3);
        assert!(content.contains("actual\\predicted"));
    }
}
