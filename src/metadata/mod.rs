//! Dataset metadata record and content fingerprint.
//!
//! The record is built from an independent top-level scan of the extracted
//! upload, not from the transformer's output. Class counts and resolutions are
//! pulled out of the annotation text with plain string matching rather than an
//! XML parse, so a file the VOC parser would reject can still contribute here.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::annotation::voc::has_annotation_extension;
use crate::error::PipelineError;
use crate::job::DATASET_METADATA_FILE;
use crate::json_io::{read_json, write_json_atomic};
use crate::validation::has_image_extension;

/// Smallest and largest `(width, height)` seen across annotation files.
///
/// Ordering is lexicographic: width first, height as tie-breaker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub min: Option<(u32, u32)>,
    pub max: Option<(u32, u32)>,
}

impl ResolutionSummary {
    pub fn from_resolutions<I>(resolutions: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        resolutions
            .into_iter()
            .fold(Self::default(), |summary, resolution| Self {
                min: Some(summary.min.map_or(resolution, |m| m.min(resolution))),
                max: Some(summary.max.map_or(resolution, |m| m.max(resolution))),
            })
    }
}

/// Contents of `dataset_metadata.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub job_id: String,
    pub created_at_utc: DateTime<Utc>,
    pub num_images: usize,
    /// Number of `<name>` lines across all annotation files.
    pub num_annotations: usize,
    /// Label → occurrence count, including labels outside any class map.
    pub classes: BTreeMap<String, usize>,
    pub image_resolution_summary: ResolutionSummary,
    pub data_fingerprint: String,
}

/// Hex SHA-256 over each image's file name and decimal size, in file-name order.
///
/// Reflects file names and sizes only. Renaming or resizing any image changes
/// it; editing pixel content without changing the byte length does not.
pub fn compute_data_fingerprint(images: &[PathBuf]) -> Result<String, PipelineError> {
    let mut entries = Vec::with_capacity(images.len());
    for image in images {
        let size = fs::metadata(image).map_err(PipelineError::Io)?.len();
        let name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        entries.push((name, size));
    }
    Ok(fingerprint_entries(&entries))
}

/// The hashing half of [`compute_data_fingerprint`], over `(file name, size)` pairs.
pub fn fingerprint_entries(entries: &[(String, u64)]) -> String {
    let mut sorted: Vec<&(String, u64)> = entries.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for (name, size) in sorted {
        hasher.update(name.as_bytes());
        hasher.update(size.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Adds every `<name>` line of `text` to `counts`; returns how many were found.
///
/// Works line by line: a line containing `<name>` contributes its text with the
/// `<name>`/`</name>` tags removed and surrounding whitespace trimmed.
pub fn count_class_names(text: &str, counts: &mut BTreeMap<String, usize>) -> usize {
    let mut found = 0;
    for line in text.lines().filter(|line| line.contains("<name>")) {
        let label = line.replace("<name>", "").replace("</name>", "");
        *counts.entry(label.trim().to_string()).or_default() += 1;
        found += 1;
    }
    found
}

/// First `<width>` and `<height>` values of an annotation's text, if both parse.
pub fn extract_resolution(text: &str) -> Option<(u32, u32)> {
    let width = first_tag_value(text, "width")?;
    let height = first_tag_value(text, "height")?;
    Some((width, height))
}

fn first_tag_value(text: &str, tag: &str) -> Option<u32> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let value = match rest.find(&close) {
        Some(end) => &rest[..end],
        None => rest,
    };
    value.trim().parse().ok()
}

/// Builds the metadata record for the files directly under `extracted_dir`.
///
/// Unreadable annotation files are skipped; an unreadable image (no size
/// available) is an error since the fingerprint would be wrong without it.
pub fn build_dataset_metadata(
    job_id: &str,
    extracted_dir: &Path,
    now: DateTime<Utc>,
) -> Result<DatasetMetadata, PipelineError> {
    let mut images = Vec::new();
    let mut annotations = Vec::new();
    for entry in fs::read_dir(extracted_dir).map_err(PipelineError::Io)? {
        let path = entry.map_err(PipelineError::Io)?.path();
        if !path.is_file() {
            continue;
        }
        if has_image_extension(&path) {
            images.push(path);
        } else if has_annotation_extension(&path) {
            annotations.push(path);
        }
    }
    annotations.sort();

    let mut classes = BTreeMap::new();
    let mut num_annotations = 0;
    let mut resolutions = Vec::new();
    for path in &annotations {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable annotation");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        num_annotations += count_class_names(&text, &mut classes);
        if let Some(resolution) = extract_resolution(&text) {
            resolutions.push(resolution);
        }
    }

    Ok(DatasetMetadata {
        job_id: job_id.to_string(),
        created_at_utc: now,
        num_images: images.len(),
        num_annotations,
        classes,
        image_resolution_summary: ResolutionSummary::from_resolutions(resolutions),
        data_fingerprint: compute_data_fingerprint(&images)?,
    })
}

/// Builds the metadata record and writes it as `dataset_metadata.json` in
/// `job_dir`. The job id is the name of `job_dir`.
pub fn generate_dataset_metadata(
    job_dir: &Path,
    extracted_dir: &Path,
) -> Result<PathBuf, PipelineError> {
    let job_id = job_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let metadata = build_dataset_metadata(&job_id, extracted_dir, Utc::now())?;

    let path = job_dir.join(DATASET_METADATA_FILE);
    write_json_atomic(&path, &metadata)?;
    tracing::info!(
        job_id = %metadata.job_id,
        num_images = metadata.num_images,
        num_annotations = metadata.num_annotations,
        fingerprint = %metadata.data_fingerprint,
        "dataset metadata written"
    );
    Ok(path)
}

/// Reads a job's metadata record.
pub fn read_dataset_metadata(job_dir: &Path) -> Result<DatasetMetadata, PipelineError> {
    let path = job_dir.join(DATASET_METADATA_FILE);
    if !path.is_file() {
        return Err(PipelineError::ArtifactNotFound { path });
    }
    read_json(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entries(items: &[(&str, u64)]) -> Vec<(String, u64)> {
        items.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn fingerprint_ignores_input_order() {
        let a = fingerprint_entries(&entries(&[("a.jpg", 10), ("b.jpg", 20), ("c.png", 5)]));
        let b = fingerprint_entries(&entries(&[("c.png", 5), ("a.jpg", 10), ("b.jpg", 20)]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_name_or_size() {
        let base = fingerprint_entries(&entries(&[("a.jpg", 10), ("b.jpg", 20)]));
        let renamed = fingerprint_entries(&entries(&[("a.jpg", 10), ("c.jpg", 20)]));
        let resized = fingerprint_entries(&entries(&[("a.jpg", 10), ("b.jpg", 21)]));
        assert_ne!(base, renamed);
        assert_ne!(base, resized);
    }

    #[test]
    fn fingerprint_of_nothing_is_empty_digest() {
        assert_eq!(
            fingerprint_entries(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fingerprint_hashes_name_then_decimal_size() {
        let mut hasher = Sha256::new();
        hasher.update(b"img.jpg");
        hasher.update(b"1234");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(fingerprint_entries(&entries(&[("img.jpg", 1234)])), expected);
    }

    #[test]
    fn class_scan_is_line_based() {
        let text = "<object>\n  <name> dog </name>\n</object>\n<object><name>cat</name></object>\n<name>dog</name>";
        let mut counts = BTreeMap::new();
        assert_eq!(count_class_names(text, &mut counts), 3);
        assert_eq!(counts.get("dog"), Some(&2));
        assert_eq!(counts.get("cat"), Some(&1));
    }

    #[test]
    fn resolution_uses_first_values_and_skips_garbage() {
        let text = "<size><width> 640 </width><height>480</height></size><width>1</width>";
        assert_eq!(extract_resolution(text), Some((640, 480)));
        assert_eq!(extract_resolution("<width>wide</width><height>2</height>"), None);
        assert_eq!(extract_resolution("<width>3</width>"), None);
    }

    #[test]
    fn resolution_summary_orders_lexicographically() {
        let summary = ResolutionSummary::from_resolutions([(640, 480), (640, 200), (1024, 10)]);
        assert_eq!(summary.min, Some((640, 200)));
        assert_eq!(summary.max, Some((1024, 10)));
        assert_eq!(
            ResolutionSummary::from_resolutions(std::iter::empty()),
            ResolutionSummary::default()
        );
    }

    #[test]
    fn build_scans_top_level_only() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let dir = temp.path();
        fs::write(dir.join("a.jpg"), b"12345").unwrap();
        fs::write(dir.join("b.PNG"), b"12").unwrap();
        fs::write(
            dir.join("a.xml"),
            "<annotation>\n<size><width>100</width><height>50</height></size>\n<object>\n<name>dog</name>\n</object>\n</annotation>",
        )
        .unwrap();
        fs::create_dir(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/c.jpg"), b"x").unwrap();
        fs::write(dir.join("nested/c.xml"), "<name>cat</name>").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let metadata = build_dataset_metadata("job_x", dir, now).expect("build metadata");

        assert_eq!(metadata.num_images, 2);
        assert_eq!(metadata.num_annotations, 1);
        assert_eq!(metadata.classes.get("dog"), Some(&1));
        assert!(!metadata.classes.contains_key("cat"));
        assert_eq!(metadata.image_resolution_summary.min, Some((100, 50)));
        assert_eq!(
            metadata.data_fingerprint,
            fingerprint_entries(&entries(&[("a.jpg", 5), ("b.PNG", 2)]))
        );
    }

    #[test]
    fn generate_writes_record_named_after_job_dir() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let job_dir = temp.path().join("job_abc");
        let extracted = job_dir.join("extracted");
        fs::create_dir_all(&extracted).unwrap();
        fs::write(extracted.join("a.jpg"), b"img").unwrap();

        let path = generate_dataset_metadata(&job_dir, &extracted).expect("generate");
        assert_eq!(path, job_dir.join(DATASET_METADATA_FILE));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["job_id"], "job_abc");
        assert_eq!(raw["num_images"], 1);
        assert!(raw["image_resolution_summary"]["min"].is_null());

        let record = read_dataset_metadata(&job_dir).expect("read back");
        assert_eq!(record.job_id, "job_abc");
    }
}
