//! Class-Imbalance Weighter
//!
//! Derives a per-class scalar weight from the training label distribution
//! so that the expected per-class contribution to the loss is equalized:
//! `weight[c] = total_samples / (num_classes * count[c])`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Per-class loss weights computed from the training label sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassWeightTable {
    weights: Vec<f32>,
    counts: Vec<usize>,
}

impl ClassWeightTable {
    /// Compute balanced weights from the full training label sequence.
    ///
    /// Pure function of the label distribution; recompute whenever the
    /// training split changes. Rejects distributions where any class has
    /// zero samples.
    pub fn balanced(labels: &[usize], num_classes: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::Dataset("cannot weight zero classes".into()));
        }

        let mut counts = vec![0usize; num_classes];
        for &label in labels {
            if label >= num_classes {
                return Err(Error::Dataset(format!(
                    "label {} out of range for {} classes",
                    label, num_classes
                )));
            }
            counts[label] += 1;
        }

        if let Some(empty) = counts.iter().position(|&c| c == 0) {
            return Err(Error::Dataset(format!(
                "class {} has zero training samples; weights undefined",
                empty
            )));
        }

        let total = labels.len() as f64;
        let weights: Vec<f32> = counts
            .iter()
            .map(|&count| (total / (num_classes as f64 * count as f64)) as f32)
            .collect();

        info!(
            "Class weights over {} samples: min={:.3} max={:.3}",
            labels.len(),
            weights.iter().cloned().fold(f32::INFINITY, f32::min),
            weights.iter().cloned().fold(0.0, f32::max),
        );

        Ok(Self { weights, counts })
    }

    /// Weight for a class index
    pub fn weight(&self, class: usize) -> f32 {
        self.weights[class]
    }

    /// Training sample count for a class index
    pub fn count(&self, class: usize) -> usize {
        self.counts[class]
    }

    /// The full weight vector, ordered by class index
    pub fn as_vec(&self) -> Vec<f32> {
        self.weights.clone()
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_for(counts: &[usize]) -> Vec<usize> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(class, &n)| std::iter::repeat(class).take(n))
            .collect()
    }

    #[test]
    fn test_balanced_semantics() {
        // counts {100, 100, 300}: weights {500/300, 500/300, 500/900}
        let labels = labels_for(&[100, 100, 300]);
        let table = ClassWeightTable::balanced(&labels, 3).unwrap();

        assert!((table.weight(0) - 1.6667).abs() < 1e-3);
        assert!((table.weight(1) - 1.6667).abs() < 1e-3);
        assert!((table.weight(2) - 0.5556).abs() < 1e-3);
    }

    #[test]
    fn test_uniform_distribution_gives_unit_weights() {
        let labels = labels_for(&[50, 50, 50, 50]);
        let table = ClassWeightTable::balanced(&labels, 4).unwrap();
        for class in 0..4 {
            assert!((table.weight(class) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_count_class_rejected() {
        let labels = labels_for(&[10, 0, 10]);
        assert!(matches!(
            ClassWeightTable::balanced(&labels, 3),
            Err(Error::Dataset(_))
        ));
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        let labels = vec![0, 1, 5];
        assert!(ClassWeightTable::balanced(&labels, 3).is_err());
    }

    #[test]
    fn test_rarer_class_weighs_more() {
        let labels = labels_for(&[10, 90]);
        let table = ClassWeightTable::balanced(&labels, 2).unwrap();
        assert!(table.weight(0) > table.weight(1));
        assert_eq!(table.count(0), 10);
        assert_eq!(table.count(1), 90);
    }
}
