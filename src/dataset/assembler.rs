//! Dataset Assembler
//!
//! Enumerates a directory-per-class image tree, builds the deterministic
//! class mapping, and partitions the shuffled sample list into disjoint
//! train/validation/test splits.
//!
//! The directory is expected to look like:
//! ```text
//! root/
//! ├── Apple___Apple_scab/
//! │   ├── image1.jpg
//! │   └── image2.jpg
//! ├── Apple___Black_rot/
//! │   └── ...
//! └── ...
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Image file extensions recognized during enumeration
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// One image with its assigned label. Immutable once split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
}

/// Deterministic bijection between class names and indices.
///
/// Lexicographic sort of the directory names is the only source of order,
/// so the same directory contents always produce the same mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMapping {
    /// Sorted class names; position is the class index
    pub class_names: Vec<String>,
    /// Number of classes
    pub num_classes: usize,
    /// Name to index
    pub class_to_idx: HashMap<String, usize>,
    /// Index to name
    pub idx_to_class: HashMap<usize, String>,
}

impl ClassMapping {
    /// Build a mapping from an unsorted list of class names
    pub fn from_names(mut names: Vec<String>) -> Self {
        names.sort();
        let class_to_idx: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        let idx_to_class: HashMap<usize, String> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (idx, name.clone()))
            .collect();

        Self {
            num_classes: names.len(),
            class_names: names,
            class_to_idx,
            idx_to_class,
        }
    }

    /// Look up the index of a class name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.class_to_idx.get(name).copied()
    }

    /// Look up the name of a class index
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.class_names.get(index).map(|s| s.as_str())
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.num_classes
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.num_classes == 0
    }

    /// Persist the mapping as JSON for the inference path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Class mapping saved to {:?}", path);
        Ok(())
    }

    /// Load a previously persisted mapping
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mapping: Self = serde_json::from_str(&json)?;
        Ok(mapping)
    }
}

/// The three disjoint sample sequences produced by splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub train: Vec<SampleRecord>,
    pub validation: Vec<SampleRecord>,
    pub test: Vec<SampleRecord>,
}

impl DatasetSplit {
    /// Total number of samples across all three splits
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }
}

/// Size summary of an assembled dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: Vec<usize>,
    pub train_size: usize,
    pub validation_size: usize,
    pub test_size: usize,
}

impl DatasetSummary {
    /// Render the per-class distribution for terminal output
    pub fn display(&self, mapping: &ClassMapping) -> String {
        let mut out = String::new();
        out.push_str(&format!("Total samples: {}\n", self.total_samples));
        out.push_str(&format!("Classes:       {}\n", self.num_classes));
        out.push_str(&format!(
            "Split:         train={} val={} test={}\n\n",
            self.train_size, self.validation_size, self.test_size
        ));
        for (idx, count) in self.class_counts.iter().enumerate() {
            let name = mapping.name_of(idx).unwrap_or("?");
            let bar_len = if self.total_samples > 0 {
                (*count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            out.push_str(&format!(
                "  {:3}. {:40} {:5} {}\n",
                idx,
                name,
                count,
                "█".repeat(bar_len)
            ));
        }
        out
    }
}

/// Assembles the class mapping and splits from a dataset root.
pub struct DatasetAssembler {
    root: PathBuf,
    validation_fraction: f64,
    test_fraction: f64,
    seed: u64,
}

/// Everything the training pipeline needs from assembly
pub struct AssembledDataset {
    pub mapping: ClassMapping,
    pub split: DatasetSplit,
    pub summary: DatasetSummary,
}

impl DatasetAssembler {
    /// Create an assembler for the given root and split parameters
    pub fn new(
        root: impl AsRef<Path>,
        validation_fraction: f64,
        test_fraction: f64,
        seed: u64,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            validation_fraction,
            test_fraction,
            seed,
        }
    }

    /// Enumerate, shuffle, and split the dataset.
    ///
    /// The same seed and directory contents always yield the same mapping
    /// and the same (train, validation, test) index sets.
    pub fn assemble(&self) -> Result<AssembledDataset> {
        if !self.root.exists() {
            return Err(Error::Dataset(format!(
                "dataset root does not exist: {:?}",
                self.root
            )));
        }

        let mut class_dirs: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_dirs.push(name.to_string());
                }
            }
        }

        if class_dirs.is_empty() {
            return Err(Error::Dataset(format!(
                "dataset root contains no class directories: {:?}",
                self.root
            )));
        }

        let mapping = ClassMapping::from_names(class_dirs);
        info!("Found {} classes under {:?}", mapping.len(), self.root);

        let mut samples = Vec::new();
        let mut class_counts = vec![0usize; mapping.len()];

        for class_name in &mapping.class_names {
            let class_dir = self.root.join(class_name);
            let label = mapping.index_of(class_name).expect("name from mapping");
            let before = samples.len();

            // Lexicographic file order keeps enumeration independent of
            // the filesystem's readdir order
            for entry in WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path().to_path_buf();
                if is_image_file(&path) {
                    samples.push(SampleRecord { path, label });
                    class_counts[label] += 1;
                }
            }

            let count = samples.len() - before;
            if count == 0 {
                return Err(Error::Dataset(format!(
                    "class '{}' contains no images",
                    class_name
                )));
            }
            debug!("Class '{}' (label {}): {} samples", class_name, label, count);
        }

        let split = self.partition(samples)?;
        let summary = DatasetSummary {
            total_samples: split.total(),
            num_classes: mapping.len(),
            class_counts,
            train_size: split.train.len(),
            validation_size: split.validation.len(),
            test_size: split.test.len(),
        };

        info!(
            "Assembled {} samples: train={} val={} test={}",
            summary.total_samples, summary.train_size, summary.validation_size, summary.test_size
        );

        Ok(AssembledDataset {
            mapping,
            split,
            summary,
        })
    }

    /// Shuffle deterministically and slice into train/validation/test.
    ///
    /// Validation and test sizes round down; the remainder stays in train.
    fn partition(&self, mut samples: Vec<SampleRecord>) -> Result<DatasetSplit> {
        let total = samples.len();
        if total == 0 {
            return Err(Error::Dataset("no samples to split".into()));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        samples.shuffle(&mut rng);

        let val_size = (total as f64 * self.validation_fraction).floor() as usize;
        let test_size = (total as f64 * self.test_fraction).floor() as usize;
        let train_size = total - val_size - test_size;

        let test = samples.split_off(train_size + val_size);
        let validation = samples.split_off(train_size);
        let train = samples;

        Ok(DatasetSplit {
            train,
            validation,
            test,
        })
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
