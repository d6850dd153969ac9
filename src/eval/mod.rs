//! Evaluation over a held-out split
//!
//! Runs a trained model over an unseen split through the deterministic
//! preprocessing path and produces the full metric report. Read-only with
//! respect to the model; no checkpoint is touched.

pub mod metrics;

use std::sync::Arc;

use burn::tensor::backend::Backend;
use tracing::info;

use crate::dataset::batcher::TensorBatcher;
use crate::dataset::pipeline::{epoch_plan, BatchStream, SampleLoader};
use crate::model::LeafClassifier;

pub use metrics::{ClassReport, ConfusionMatrix, EvalReport};

/// Evaluate a model over the loader's split.
///
/// The stream is single-worker and unshuffled so the sample order is the
/// record order.
pub fn evaluate_split<B: Backend>(
    model: &LeafClassifier<B>,
    loader: Arc<SampleLoader>,
    batcher: &TensorBatcher<B>,
    batch_size: usize,
    top_k: usize,
) -> EvalReport {
    let num_classes = model.num_classes();
    let plan = epoch_plan(loader.len(), batch_size, None);
    let stream = BatchStream::spawn(loader, plan, 1, 2, 0);

    let mut probabilities: Vec<Vec<f32>> = Vec::new();
    let mut truth: Vec<usize> = Vec::new();

    for host_batch in stream {
        let batch = batcher.batch(&host_batch);
        let probs = model.forward_softmax(batch.images);
        let flat: Vec<f32> = probs.into_data().to_vec().unwrap();

        for row in flat.chunks(num_classes) {
            probabilities.push(row.to_vec());
        }
        truth.extend(host_batch.labels.iter().map(|&l| l as usize));
    }

    let report = EvalReport::from_probabilities(&probabilities, &truth, num_classes, top_k);
    info!(
        "Evaluation: {} samples, accuracy {:.2}%, loss {:.4}",
        report.total_samples,
        report.accuracy * 100.0,
        report.loss
    );
    report
}
