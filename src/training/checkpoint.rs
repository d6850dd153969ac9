//! Model checkpointing
//!
//! Persists parameter snapshots at the best-seen monitored metric together
//! with a JSON sidecar describing the architecture, so a checkpoint can be
//! reloaded without the original run. Persistence failures are fatal to
//! the run.

use std::path::PathBuf;

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::model::LeafClassifier;

/// Sidecar metadata stored next to every parameter snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Stage that produced the snapshot
    pub stage: String,
    /// Zero-indexed epoch within the stage
    pub epoch: usize,
    /// Monitored validation accuracy at save time
    pub val_accuracy: f64,
    /// Validation loss at save time
    pub val_loss: f64,
    /// Architecture needed to rebuild the module before loading
    pub model: ModelConfig,
    /// Number of output classes
    pub num_classes: usize,
    /// RFC 3339 save timestamp
    pub timestamp: String,
}

/// Directory-backed store for named checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the parameter snapshot for a name (extension added by the
    /// recorder)
    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.meta.json"))
    }

    /// Whether a snapshot with this name has been written
    pub fn exists(&self, name: &str) -> bool {
        self.meta_path(name).exists()
    }

    /// Persist the model parameters and sidecar metadata.
    ///
    /// This is a blocking, exclusive operation: the caller does not train
    /// while the write is in flight.
    pub fn save<B: Backend>(
        &self,
        name: &str,
        model: &LeafClassifier<B>,
        meta: &CheckpointMeta,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::CheckpointIo(format!("create {:?}: {e}", self.dir)))?;

        let recorder = CompactRecorder::new();
        model
            .clone()
            .save_file(self.snapshot_path(name), &recorder)
            .map_err(|e| Error::CheckpointIo(format!("save '{name}': {e:?}")))?;

        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| Error::CheckpointIo(format!("serialize '{name}' metadata: {e}")))?;
        std::fs::write(self.meta_path(name), json)
            .map_err(|e| Error::CheckpointIo(format!("write '{name}' metadata: {e}")))?;

        info!(
            "Checkpoint '{}' saved (epoch {}, val acc {:.2}%)",
            name,
            meta.epoch + 1,
            meta.val_accuracy * 100.0
        );
        Ok(())
    }

    /// Read the sidecar metadata for a named checkpoint
    pub fn meta(&self, name: &str) -> Result<CheckpointMeta> {
        let json = std::fs::read_to_string(self.meta_path(name))
            .map_err(|e| Error::CheckpointIo(format!("read '{name}' metadata: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::CheckpointIo(format!("parse '{name}' metadata: {e}")))
    }

    /// Rebuild the module from the sidecar metadata and load the snapshot
    pub fn load<B: Backend>(&self, name: &str, device: &B::Device) -> Result<LeafClassifier<B>> {
        let meta = self.meta(name)?;
        let model = LeafClassifier::<B>::new(&meta.model, meta.num_classes, device);

        let recorder = CompactRecorder::new();
        model
            .load_file(self.snapshot_path(name), &recorder, device)
            .map_err(|e| Error::CheckpointIo(format!("load '{name}': {e:?}")))
    }
}

impl CheckpointMeta {
    /// Build metadata stamped with the current time
    pub fn new(
        stage: &str,
        epoch: usize,
        val_accuracy: f64,
        val_loss: f64,
        model: ModelConfig,
        num_classes: usize,
    ) -> Self {
        Self {
            stage: stage.to_string(),
            epoch,
            val_accuracy,
            val_loss,
            model,
            num_classes,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray;

    fn tiny_model_config() -> ModelConfig {
        ModelConfig {
            base_filters: 4,
            num_blocks: 2,
            head_units: vec![8],
            dropout: 0.0,
        }
    }

    #[test]
    fn test_save_load_roundtrip_preserves_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let device = Default::default();

        let config = tiny_model_config();
        let model = LeafClassifier::<TestBackend>::new(&config, 3, &device);
        let meta = CheckpointMeta::new("warm", 4, 0.9, 0.3, config, 3);

        store.save("warm_best", &model, &meta).unwrap();
        assert!(store.exists("warm_best"));

        let reloaded = store.load::<TestBackend>("warm_best", &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let original: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let restored: Vec<f32> = reloaded.forward(input).into_data().to_vec().unwrap();

        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let device: <TestBackend as Backend>::Device = Default::default();

        let config = tiny_model_config();
        let model = LeafClassifier::<TestBackend>::new(&config, 5, &device);
        let meta = CheckpointMeta::new("fine_tune", 2, 0.75, 0.6, config, 5);
        store.save("best", &model, &meta).unwrap();

        let loaded = store.meta("best").unwrap();
        assert_eq!(loaded.stage, "fine_tune");
        assert_eq!(loaded.epoch, 2);
        assert_eq!(loaded.num_classes, 5);
        assert!((loaded.val_accuracy - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_missing_checkpoint_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let device: <TestBackend as Backend>::Device = Default::default();

        let result = store.load::<TestBackend>("nope", &device);
        assert!(matches!(result, Err(Error::CheckpointIo(_))));
    }
}
