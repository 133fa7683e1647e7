//! Precondition checks on an extracted upload.
//!
//! The validator is a read-only, recursive scan. It must pass before any
//! transformation is attempted: too few images or no annotation files at all
//! reject the dataset up front.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::annotation::voc::has_annotation_extension;
use crate::config::MIN_IMAGES_REQUIRED;
use crate::error::PipelineError;

/// Image file extensions the pipeline accepts (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Options for validation behavior.
#[derive(Clone, Debug)]
pub struct ValidateOptions {
    /// Minimum number of images required anywhere under the root.
    pub min_images: usize,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            min_images: MIN_IMAGES_REQUIRED,
        }
    }
}

/// Files found by [`validate_extracted_dataset`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveredFiles {
    /// Image files, sorted by path.
    pub images: Vec<PathBuf>,
    /// Annotation files, sorted by path.
    pub annotations: Vec<PathBuf>,
}

/// Recursively scans `root` for images and annotation files and enforces the
/// dataset preconditions.
///
/// # Errors
/// - [`PipelineError::InsufficientData`] if fewer than `opts.min_images` images exist.
/// - [`PipelineError::MissingAnnotations`] if no annotation file exists.
pub fn validate_extracted_dataset(
    root: &Path,
    opts: &ValidateOptions,
) -> Result<DiscoveredFiles, PipelineError> {
    let mut found = DiscoveredFiles::default();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|source| PipelineError::Io(source.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if has_image_extension(path) {
            found.images.push(path.to_path_buf());
        } else if has_annotation_extension(path) {
            found.annotations.push(path.to_path_buf());
        }
    }

    found.images.sort();
    found.annotations.sort();

    tracing::debug!(
        root = %root.display(),
        images = found.images.len(),
        annotations = found.annotations.len(),
        "scanned extracted dataset"
    );

    if found.images.len() < opts.min_images {
        return Err(PipelineError::InsufficientData {
            path: root.to_path_buf(),
            found: found.images.len(),
            required: opts.min_images,
        });
    }

    if found.annotations.is_empty() {
        return Err(PipelineError::MissingAnnotations {
            path: root.to_path_buf(),
        });
    }

    Ok(found)
}

/// Returns true if the path has one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, b"x").expect("write file");
    }

    #[test]
    fn rejects_too_few_images() {
        let temp = tempfile::tempdir().expect("create temp dir");
        for name in ["a.jpg", "b.jpg", "c.jpg", "a.xml"] {
            touch(&temp.path().join(name));
        }

        let err = validate_extracted_dataset(temp.path(), &ValidateOptions { min_images: 5 })
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientData {
                found: 3,
                required: 5,
                ..
            }
        ));
    }

    #[test]
    fn rejects_missing_annotations() {
        let temp = tempfile::tempdir().expect("create temp dir");
        for idx in 0..6 {
            touch(&temp.path().join(format!("img_{idx}.png")));
        }

        let err = validate_extracted_dataset(temp.path(), &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingAnnotations { .. }));
    }

    #[test]
    fn scans_nested_directories_and_mixed_case() {
        let temp = tempfile::tempdir().expect("create temp dir");
        touch(&temp.path().join("a.JPG"));
        touch(&temp.path().join("nested/b.jpeg"));
        touch(&temp.path().join("nested/deeper/c.png"));
        touch(&temp.path().join("nested/d.png"));
        touch(&temp.path().join("e.jpg"));
        touch(&temp.path().join("nested/deeper/c.XML"));
        touch(&temp.path().join("readme.txt"));

        let found = validate_extracted_dataset(temp.path(), &ValidateOptions::default())
            .expect("valid dataset");
        assert_eq!(found.images.len(), 5);
        assert_eq!(found.annotations.len(), 1);
        assert!(found.images.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn image_extension_matching() {
        assert!(has_image_extension(Path::new("x.jpg")));
        assert!(has_image_extension(Path::new("x.JPEG")));
        assert!(has_image_extension(Path::new("x.Png")));
        assert!(!has_image_extension(Path::new("x.bmp")));
        assert!(!has_image_extension(Path::new("jpg")));
    }
}
