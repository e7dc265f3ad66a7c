use crate::error::{TrainingError, TrainingResult};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// One labeled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// A class-per-directory image dataset: each subdirectory of the split
/// directory is one class label, produced by the external data
/// preparation pipeline.
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageFolderDataset {
    /// Scan a split directory. Class labels are assigned by sorted
    /// directory name so every worker derives the identical mapping.
    pub fn open(dir: &Path) -> TrainingResult<Self> {
        if !dir.is_dir() {
            return Err(TrainingError::Dataset(format!("split directory not found: {}", dir.display())));
        }
        let mut class_dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        class_dirs.sort();
        if class_dirs.is_empty() {
            return Err(TrainingError::Dataset(format!("no class directories in {}", dir.display())));
        }

        let mut classes = Vec::with_capacity(class_dirs.len());
        let mut samples = Vec::new();
        for (label, class_dir) in class_dirs.iter().enumerate() {
            let name = class_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            classes.push(name);
            let mut files: Vec<PathBuf> = std::fs::read_dir(class_dir)?
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| is_image(p))
                .collect();
            files.sort();
            samples.extend(files.into_iter().map(|path| Sample { path, label }));
        }
        if samples.is_empty() {
            return Err(TrainingError::Dataset(format!("no images under {}", dir.display())));
        }
        Ok(Self { classes, samples })
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn sample(&self, id: usize) -> Option<&Sample> {
        self.samples.get(id)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// One mini-batch of sample ids plus their labels. Pixel loading and
/// augmentation are the backbone's concern, keyed by sample id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub sample_ids: Vec<usize>,
    pub labels: Vec<usize>,
}

/// This worker's view of the dataset: a rank-strided assignment over a
/// per-epoch seeded shuffle, padded by wrapping so every rank sees the
/// same number of samples (and therefore the same number of steps).
#[derive(Debug, Clone)]
pub struct DatasetShard {
    dataset: ImageFolderDataset,
    rank: usize,
    world_size: usize,
    batch_size: usize,
}

impl DatasetShard {
    pub fn new(
        dataset: ImageFolderDataset,
        rank: usize,
        world_size: usize,
        batch_size: usize,
    ) -> TrainingResult<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(TrainingError::Dataset(format!("rank {rank} out of range for world size {world_size}")));
        }
        if batch_size == 0 {
            return Err(TrainingError::Dataset("batch size must be >= 1".to_string()));
        }
        Ok(Self { dataset, rank, world_size, batch_size })
    }

    /// Samples assigned to each rank per epoch, after padding.
    #[must_use]
    pub fn samples_per_rank(&self) -> usize {
        self.dataset.len().div_ceil(self.world_size)
    }

    /// Mini-batch steps in one epoch, identical across ranks.
    #[must_use]
    pub fn steps_per_epoch(&self) -> u64 {
        self.samples_per_rank().div_ceil(self.batch_size) as u64
    }

    #[must_use]
    pub fn dataset(&self) -> &ImageFolderDataset {
        &self.dataset
    }

    /// The batches for one epoch. The shuffle is seeded with the absolute
    /// epoch so all ranks compute the same permutation and partition it
    /// without communicating.
    #[must_use]
    pub fn epoch_batches(&self, absolute_epoch: u64) -> Vec<Batch> {
        let len = self.dataset.len();
        let mut indices: Vec<usize> = (0..len).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(absolute_epoch);
        indices.shuffle(&mut rng);

        // Pad by wrapping from the front so the total divides evenly.
        let total = self.samples_per_rank() * self.world_size;
        for i in 0..total - len {
            indices.push(indices[i]);
        }

        let assigned: Vec<usize> = indices.iter().skip(self.rank).step_by(self.world_size).copied().collect();
        assigned
            .chunks(self.batch_size)
            .map(|chunk| Batch {
                sample_ids: chunk.to_vec(),
                labels: chunk
                    .iter()
                    .map(|&id| self.dataset.sample(id).map_or(0, |s| s.label))
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write_split(classes: &[(&str, usize)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (name, count) in classes {
            let dir = temp.path().join(name);
            std::fs::create_dir(&dir).unwrap();
            for i in 0..*count {
                std::fs::write(dir.join(format!("img{i}.jpg")), b"\xff\xd8").unwrap();
            }
        }
        temp
    }

    #[test]
    fn test_open_assigns_labels_by_sorted_class_name() {
        let temp = write_split(&[("wren", 2), ("finch", 3)]);
        let dataset = ImageFolderDataset::open(temp.path()).unwrap();
        assert_eq!(dataset.classes(), ["finch", "wren"]);
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.sample(0).unwrap().label, 0);
    }

    #[test]
    fn test_open_rejects_empty_split() {
        let temp = TempDir::new().unwrap();
        assert!(ImageFolderDataset::open(temp.path()).is_err());
    }

    #[test]
    fn test_non_image_files_are_ignored() {
        let temp = write_split(&[("finch", 1)]);
        std::fs::write(temp.path().join("finch").join("notes.txt"), b"x").unwrap();
        let dataset = ImageFolderDataset::open(temp.path()).unwrap();
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn test_ranks_partition_the_epoch_with_padding() {
        let temp = write_split(&[("a", 3), ("b", 4)]); // 7 samples, world 2 -> 8 padded
        let world_size = 2;
        let mut seen = Vec::new();
        let mut steps = HashSet::new();
        for rank in 0..world_size {
            let dataset = ImageFolderDataset::open(temp.path()).unwrap();
            let shard = DatasetShard::new(dataset, rank, world_size, 2).unwrap();
            steps.insert(shard.steps_per_epoch());
            for batch in shard.epoch_batches(0) {
                seen.extend(batch.sample_ids);
            }
        }
        // All ranks run the same step count; every sample appears.
        assert_eq!(steps.len(), 1);
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), 7);
    }

    #[test]
    fn test_shuffle_changes_across_epochs_but_not_ranks() {
        let temp = write_split(&[("a", 6)]);
        let make = |rank| {
            let dataset = ImageFolderDataset::open(temp.path()).unwrap();
            DatasetShard::new(dataset, rank, 2, 3).unwrap()
        };
        assert_eq!(make(0).epoch_batches(1), make(0).epoch_batches(1));
        assert_ne!(make(0).epoch_batches(1), make(0).epoch_batches(2));
        // Ranks see disjoint halves of the same permutation.
        let r0: HashSet<usize> = make(0).epoch_batches(1).iter().flat_map(|b| b.sample_ids.clone()).collect();
        let r1: HashSet<usize> = make(1).epoch_batches(1).iter().flat_map(|b| b.sample_ids.clone()).collect();
        assert!(r0.is_disjoint(&r1));
    }
}
