//! Transformation report types and terminal formatting.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::Split;

/// Counts for one split.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    /// Images assigned to the split by the shuffle.
    pub assigned: usize,
    /// Images copied (each with a label file).
    pub images: usize,
    /// Label lines written.
    pub labels: usize,
}

/// The result of transforming one job's dataset.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TransformReport {
    pub job_id: String,
    pub train: SplitCounts,
    pub val: SplitCounts,
    /// Images with no paired `.xml` file.
    pub skipped_missing_annotation: usize,
    /// Images whose stem matched an earlier image's.
    pub skipped_duplicate_stem: usize,
    /// Images whose annotation had no valid box.
    pub skipped_no_valid_boxes: usize,
    /// Images whose boxes all carried labels outside the class map.
    pub skipped_no_known_labels: usize,
    /// Boxes dropped because their label is outside the class map.
    pub dropped_unknown_labels: usize,
    pub manifest_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Blob key the metadata record was uploaded under.
    pub metadata_key: String,
}

impl TransformReport {
    pub fn split(&self, split: Split) -> &SplitCounts {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
        }
    }

    pub(crate) fn split_mut(&mut self, split: Split) -> &mut SplitCounts {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
        }
    }

    /// Images written across both splits.
    pub fn images_written(&self) -> usize {
        self.train.images + self.val.images
    }

    pub fn skipped(&self) -> usize {
        self.skipped_missing_annotation
            + self.skipped_duplicate_stem
            + self.skipped_no_valid_boxes
            + self.skipped_no_known_labels
    }
}

impl fmt::Display for TransformReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset transformed for job {}", self.job_id)?;
        for split in Split::ALL {
            let counts = self.split(split);
            writeln!(
                f,
                "  {split}: {} of {} images written, {} labels",
                counts.images, counts.assigned, counts.labels
            )?;
        }

        if self.skipped() > 0 {
            writeln!(f, "  skipped {} images:", self.skipped())?;
            if self.skipped_missing_annotation > 0 {
                writeln!(f, "    {} without annotation", self.skipped_missing_annotation)?;
            }
            if self.skipped_duplicate_stem > 0 {
                writeln!(f, "    {} sharing a file stem", self.skipped_duplicate_stem)?;
            }
            if self.skipped_no_valid_boxes > 0 {
                writeln!(f, "    {} without valid boxes", self.skipped_no_valid_boxes)?;
            }
            if self.skipped_no_known_labels > 0 {
                writeln!(f, "    {} without known labels", self.skipped_no_known_labels)?;
            }
        }
        if self.dropped_unknown_labels > 0 {
            writeln!(
                f,
                "  dropped {} boxes with unknown labels",
                self.dropped_unknown_labels
            )?;
        }

        writeln!(f, "  manifest: {}", self.manifest_path.display())?;
        write!(f, "  metadata: {}", self.metadata_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_empty_skip_sections() {
        let report = TransformReport {
            job_id: "job_1".into(),
            train: SplitCounts {
                assigned: 4,
                images: 4,
                labels: 9,
            },
            val: SplitCounts {
                assigned: 1,
                images: 1,
                labels: 2,
            },
            manifest_path: PathBuf::from("p/data.yaml"),
            metadata_path: PathBuf::from("p/dataset_metadata.json"),
            ..Default::default()
        };

        let text = report.to_string();
        assert!(text.contains("train: 4 of 4 images written, 9 labels"));
        assert!(text.contains("val: 1 of 1 images written, 2 labels"));
        assert!(!text.contains("skipped"));
        assert!(!text.contains("dropped"));
    }

    #[test]
    fn display_lists_skip_reasons() {
        let report = TransformReport {
            skipped_missing_annotation: 2,
            skipped_duplicate_stem: 1,
            skipped_no_known_labels: 1,
            dropped_unknown_labels: 3,
            ..Default::default()
        };

        let text = report.to_string();
        assert!(text.contains("skipped 4 images"));
        assert!(text.contains("1 sharing a file stem"));
        assert!(text.contains("2 without annotation"));
        assert!(text.contains("1 without known labels"));
        assert!(!text.contains("without valid boxes"));
        assert!(text.contains("dropped 3 boxes"));
    }
}
