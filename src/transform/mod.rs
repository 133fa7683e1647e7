//! Pascal VOC → YOLO dataset transformation.
//!
//! Reads the images directly under a job's `extracted/` directory, splits them
//! into train and validation sets and writes the YOLO layout:
//!
//! ```text
//! processed/
//!   images/{train,val}/<image>
//!   labels/{train,val}/<stem>.txt
//!   data.yaml
//! ```
//!
//! Every label file has a matching image and vice versa. Images without a
//! paired annotation, or without a box that survives parsing and class
//! mapping, are left out of both trees. So are images sharing a file stem
//! with an earlier image (`a.png` after `a.jpg`), since both would pair with
//! `a.xml` and write `a.txt`.

pub mod manifest;
mod report;
mod split;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotation::voc::{paired_annotation_path, parse_voc_file};
use crate::annotation::ClassMap;
use crate::config::{RANDOM_SEED, TRAIN_SPLIT_RATIO};
use crate::error::PipelineError;
use crate::job::{JobLayout, DATASET_METADATA_FILE};
use crate::metadata::generate_dataset_metadata;
use crate::storage::{blob_key, BlobStore, DATASET_CATEGORY};
use crate::validation::has_image_extension;

pub use report::{SplitCounts, TransformReport};
pub use split::{split_images, train_split_index, Split, SplitAssignment};

/// Options for [`transform_dataset`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransformOptions {
    /// Seed for the train/validation shuffle.
    pub seed: u64,
    /// Fraction of images assigned to the training split.
    pub train_ratio: f64,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            seed: RANDOM_SEED,
            train_ratio: TRAIN_SPLIT_RATIO,
        }
    }
}

/// What happened to a single image.
enum ImageOutcome {
    Written { labels: usize, dropped: usize },
    MissingAnnotation,
    DuplicateStem,
    NoValidBoxes,
    NoKnownLabels { dropped: usize },
}

/// Converts a job's extracted VOC dataset into the YOLO layout, writes the
/// manifest and the dataset metadata record, and uploads the record to `store`.
///
/// Any previous `processed/` tree is replaced.
///
/// # Errors
/// - [`PipelineError::EmptyDataset`] if no image sits directly under `extracted/`.
/// - [`PipelineError::MalformedAnnotation`] if any paired annotation fails to
///   parse; the transformation stops at the first such file.
pub fn transform_dataset(
    layout: &JobLayout,
    class_map: &ClassMap,
    opts: &TransformOptions,
    store: &dyn BlobStore,
) -> Result<TransformReport, PipelineError> {
    let extracted_dir = layout.extracted_dir();
    let images = list_top_level_images(&extracted_dir)?;
    if images.is_empty() {
        return Err(PipelineError::EmptyDataset {
            path: extracted_dir,
        });
    }

    prepare_output_dirs(layout)?;

    let duplicates = duplicate_stems(&images);
    let assignment = split_images(&images, opts.seed, opts.train_ratio);
    let mut report = TransformReport {
        job_id: layout.job_id().to_string(),
        ..Default::default()
    };

    for split in Split::ALL {
        let assigned = assignment.get(split);
        report.split_mut(split).assigned = assigned.len();

        for image in assigned {
            let outcome = if duplicates.contains(image) {
                ImageOutcome::DuplicateStem
            } else {
                transform_image(layout, class_map, split, image)?
            };
            match outcome {
                ImageOutcome::Written { labels, dropped } => {
                    let counts = report.split_mut(split);
                    counts.images += 1;
                    counts.labels += labels;
                    report.dropped_unknown_labels += dropped;
                }
                ImageOutcome::MissingAnnotation => {
                    tracing::debug!(image = %image.display(), "no paired annotation, skipping");
                    report.skipped_missing_annotation += 1;
                }
                ImageOutcome::DuplicateStem => {
                    tracing::warn!(image = %image.display(), "another image has the same file stem, skipping");
                    report.skipped_duplicate_stem += 1;
                }
                ImageOutcome::NoValidBoxes => {
                    tracing::debug!(image = %image.display(), "no valid boxes, skipping");
                    report.skipped_no_valid_boxes += 1;
                }
                ImageOutcome::NoKnownLabels { dropped } => {
                    tracing::debug!(image = %image.display(), "no labels in class map, skipping");
                    report.skipped_no_known_labels += 1;
                    report.dropped_unknown_labels += dropped;
                }
            }
        }
    }

    report.manifest_path = manifest::write_manifest(&layout.processed_dir(), class_map)?;

    report.metadata_path = generate_dataset_metadata(layout.root(), &extracted_dir)?;
    report.metadata_key = blob_key(layout.job_id(), DATASET_CATEGORY, DATASET_METADATA_FILE);
    store.put(&report.metadata_path, &report.metadata_key)?;

    if report.skipped() > 0 {
        tracing::warn!(
            job_id = layout.job_id(),
            skipped = report.skipped(),
            "some images were left out of the training set"
        );
    }
    tracing::info!(
        job_id = layout.job_id(),
        train = report.train.images,
        val = report.val.images,
        manifest = %report.manifest_path.display(),
        "dataset transformed"
    );

    Ok(report)
}

/// File names of the images directly under `dir`, sorted.
fn list_top_level_images(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).map_err(PipelineError::Io)? {
        let entry = entry.map_err(PipelineError::Io)?;
        let path = entry.path();
        if path.is_file() && has_image_extension(&path) {
            images.push(PathBuf::from(entry.file_name()));
        }
    }
    images.sort();
    Ok(images)
}

/// Images whose stem was already taken by an earlier name in `images`.
fn duplicate_stems(images: &[PathBuf]) -> HashSet<PathBuf> {
    let mut seen = HashSet::new();
    images
        .iter()
        .filter(|name| !seen.insert(name.with_extension("")))
        .cloned()
        .collect()
}

fn prepare_output_dirs(layout: &JobLayout) -> Result<(), PipelineError> {
    let processed = layout.processed_dir();
    if processed.exists() {
        fs::remove_dir_all(&processed).map_err(PipelineError::Io)?;
    }
    for split in Split::ALL {
        fs::create_dir_all(layout.images_dir(split)).map_err(PipelineError::Io)?;
        fs::create_dir_all(layout.labels_dir(split)).map_err(PipelineError::Io)?;
    }
    Ok(())
}

fn transform_image(
    layout: &JobLayout,
    class_map: &ClassMap,
    split: Split,
    image: &Path,
) -> Result<ImageOutcome, PipelineError> {
    let source = layout.extracted_dir().join(image);
    let annotation_path = paired_annotation_path(&source);
    if !annotation_path.is_file() {
        return Ok(ImageOutcome::MissingAnnotation);
    }

    let annotation = parse_voc_file(&annotation_path)?;
    if annotation.objects.is_empty() {
        return Ok(ImageOutcome::NoValidBoxes);
    }

    let mut lines = Vec::with_capacity(annotation.objects.len());
    let mut dropped = 0;
    for object in &annotation.objects {
        match class_map.get(&object.label) {
            Some(class_id) => lines.push(
                object
                    .bbox
                    .to_yolo(annotation.width, annotation.height)
                    .label_line(class_id),
            ),
            None => dropped += 1,
        }
    }
    if lines.is_empty() {
        return Ok(ImageOutcome::NoKnownLabels { dropped });
    }

    let label_path = layout.labels_dir(split).join(image).with_extension("txt");
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(label_path, contents).map_err(PipelineError::Io)?;
    fs::copy(&source, layout.images_dir(split).join(image)).map_err(PipelineError::Io)?;

    Ok(ImageOutcome::Written {
        labels: lines.len(),
        dropped,
    })
}
