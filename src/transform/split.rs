//! Deterministic train/validation partitioning.

use std::fmt;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

/// One side of the train/validation partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Val];

    /// Directory name used for this split under `images/` and `labels/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Images assigned to each split.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
}

impl SplitAssignment {
    pub fn get(&self, split: Split) -> &[PathBuf] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
        }
    }
}

/// Index where the shuffled list is cut: `floor(count * ratio)`, clamped to `count`.
pub fn train_split_index(count: usize, train_ratio: f64) -> usize {
    let raw = (count as f64 * train_ratio).floor();
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(count)
    }
}

/// Partitions images into train and validation sets.
///
/// Images are first sorted by file name (full path as tie-breaker) so the
/// result does not depend on the order they were discovered in, then shuffled
/// with a generator seeded from `seed`, then cut at
/// [`train_split_index`]. The same input set, seed and ratio always produce
/// the same partition.
pub fn split_images(images: &[PathBuf], seed: u64, train_ratio: f64) -> SplitAssignment {
    let mut ordered: Vec<PathBuf> = images.to_vec();
    ordered.sort_by(|a, b| {
        let name_a = a.file_name().map(|n| n.to_string_lossy());
        let name_b = b.file_name().map(|n| n.to_string_lossy());
        name_a.cmp(&name_b).then_with(|| a.cmp(b))
    });

    let mut rng = StdRng::seed_from_u64(seed);
    ordered.shuffle(&mut rng);

    let split_idx = train_split_index(ordered.len(), train_ratio);
    let val = ordered.split_off(split_idx);

    SplitAssignment {
        train: ordered,
        val,
    }
}
