//! Pascal VOC XML annotation parser.
//!
//! Only the parts of the schema the training pipeline needs are read: the
//! `<size>` element and each `<object>`'s `<name>` and `<bndbox>`. Boxes with
//! no positive extent are dropped here so downstream stages never see them.

use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::Node;

use super::bbox::PixelBox;
use crate::error::PipelineError;

/// File extension of annotation files, without the dot.
pub const ANNOTATION_EXTENSION: &str = "xml";

/// One labeled box from an annotation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub label: String,
    pub bbox: PixelBox,
}

/// The parsed contents of one VOC annotation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VocAnnotation {
    pub width: u32,
    pub height: u32,
    /// Valid boxes only, in document order.
    pub objects: Vec<AnnotationRecord>,
}

/// Parse a VOC annotation file from disk.
pub fn parse_voc_file(path: &Path) -> Result<VocAnnotation, PipelineError> {
    let bytes = fs::read(path).map_err(PipelineError::Io)?;
    parse_voc_slice(&bytes, path)
}

/// Parse VOC XML from bytes. The input must be valid UTF-8.
pub fn parse_voc_slice(bytes: &[u8], path: &Path) -> Result<VocAnnotation, PipelineError> {
    let xml = std::str::from_utf8(bytes).map_err(|source| PipelineError::MalformedAnnotation {
        path: path.to_path_buf(),
        message: format!("input is not valid UTF-8: {source}"),
    })?;
    parse_voc_str(xml, path)
}

/// Parse VOC XML from a string. `path` is only used in error messages.
pub fn parse_voc_str(xml: &str, path: &Path) -> Result<VocAnnotation, PipelineError> {
    let document =
        roxmltree::Document::parse(xml).map_err(|source| PipelineError::MalformedAnnotation {
            path: path.to_path_buf(),
            message: source.to_string(),
        })?;

    let root = document.root_element();

    let size = required_child_element(root, "size", path, "<annotation>")?;
    let width = parse_required_u32(size, "width", path, "<size>")?;
    let height = parse_required_u32(size, "height", path, "<size>")?;

    let mut objects = Vec::new();
    for object in root
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "object")
    {
        let label = required_child_text(object, "name", path, "<object>")?;
        let bndbox = required_child_element(object, "bndbox", path, "<object>")?;

        let bbox = PixelBox::new(
            parse_required_coord(bndbox, "xmin", path)?,
            parse_required_coord(bndbox, "ymin", path)?,
            parse_required_coord(bndbox, "xmax", path)?,
            parse_required_coord(bndbox, "ymax", path)?,
        );

        if !bbox.is_valid() {
            tracing::debug!(
                path = %path.display(),
                label = %label,
                ?bbox,
                "dropping degenerate box"
            );
            continue;
        }

        objects.push(AnnotationRecord { label, bbox });
    }

    Ok(VocAnnotation {
        width,
        height,
        objects,
    })
}

/// Returns the annotation path paired with an image: same directory, same
/// stem, `.xml` extension.
pub fn paired_annotation_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(ANNOTATION_EXTENSION)
}

/// Returns true if the path has the annotation extension (case-insensitive).
pub fn has_annotation_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ANNOTATION_EXTENSION))
        .unwrap_or(false)
}

fn required_child_element<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<Node<'a, 'input>, PipelineError> {
    child_element(node, tag).ok_or_else(|| PipelineError::MalformedAnnotation {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn required_child_text(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<String, PipelineError> {
    optional_child_text(node, tag).ok_or_else(|| PipelineError::MalformedAnnotation {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn parse_required_u32(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<u32, PipelineError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<u32>()
        .map_err(|_| PipelineError::MalformedAnnotation {
            path: path.to_path_buf(),
            message: format!("invalid <{tag}> value '{raw}' in {context}; expected u32"),
        })
}

/// Box coordinates are integers in VOC, but some tools write `"12.0"`.
/// Finite decimals are truncated toward zero.
fn parse_required_coord(node: Node<'_, '_>, tag: &str, path: &Path) -> Result<i64, PipelineError> {
    let raw = required_child_text(node, tag, path, "<bndbox>")?;
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value.trunc() as i64),
        _ => Err(PipelineError::MalformedAnnotation {
            path: path.to_path_buf(),
            message: format!("invalid <{tag}> value '{raw}' in <bndbox>; expected integer"),
        }),
    }
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == tag)
}

fn optional_child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child_element(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voc(objects: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<annotation>
  <filename>img1.jpg</filename>
  <size>
    <width>640</width>
    <height>480</height>
    <depth>3</depth>
  </size>
{objects}
</annotation>"#
        )
    }

    fn object(name: &str, xmin: &str, ymin: &str, xmax: &str, ymax: &str) -> String {
        format!(
            "  <object>\n    <name>{name}</name>\n    <bndbox>\n      <xmin>{xmin}</xmin>\n      <ymin>{ymin}</ymin>\n      <xmax>{xmax}</xmax>\n      <ymax>{ymax}</ymax>\n    </bndbox>\n  </object>"
        )
    }

    #[test]
    fn parse_extracts_size_and_boxes() {
        let xml = voc(&format!(
            "{}\n{}",
            object("cat", "10", "20", "30", "40"),
            object(" dog ", "1", "2", "3", "4")
        ));

        let parsed = parse_voc_str(&xml, Path::new("sample.xml")).expect("parse xml");
        assert_eq!(parsed.width, 640);
        assert_eq!(parsed.height, 480);
        assert_eq!(
            parsed.objects,
            vec![
                AnnotationRecord {
                    label: "cat".to_string(),
                    bbox: PixelBox::new(10, 20, 30, 40),
                },
                AnnotationRecord {
                    label: "dog".to_string(),
                    bbox: PixelBox::new(1, 2, 3, 4),
                },
            ]
        );
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        let xml = voc(&format!(
            "{}\n{}\n{}",
            object("flat", "10", "20", "10", "40"),
            object("short", "10", "20", "30", "20"),
            object("inverted", "30", "40", "10", "20")
        ));

        let parsed = parse_voc_str(&xml, Path::new("sample.xml")).expect("parse xml");
        assert!(parsed.objects.is_empty());
    }

    #[test]
    fn missing_size_is_malformed() {
        let xml = "<annotation><filename>a.jpg</filename></annotation>";
        let err = parse_voc_str(xml, Path::new("a.xml")).unwrap_err();
        assert!(
            matches!(err, PipelineError::MalformedAnnotation { ref message, .. } if message.contains("<size>"))
        );
    }

    #[test]
    fn invalid_xml_is_malformed() {
        let err = parse_voc_str("<annotation><size>", Path::new("a.xml")).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedAnnotation { .. }));
    }

    #[test]
    fn decimal_coordinates_are_truncated() {
        let xml = voc(&object("cat", "10.7", "20.0", "30.2", "40.9"));
        let parsed = parse_voc_str(&xml, Path::new("a.xml")).expect("parse xml");
        assert_eq!(parsed.objects[0].bbox, PixelBox::new(10, 20, 30, 40));
    }

    #[test]
    fn non_numeric_coordinate_is_malformed() {
        let xml = voc(&object("cat", "ten", "20", "30", "40"));
        let err = parse_voc_str(&xml, Path::new("a.xml")).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedAnnotation { .. }));
    }

    #[test]
    fn annotation_without_objects_is_empty() {
        let parsed = parse_voc_str(&voc(""), Path::new("a.xml")).expect("parse xml");
        assert!(parsed.objects.is_empty());
    }

    #[test]
    fn paired_annotation_replaces_extension() {
        assert_eq!(
            paired_annotation_path(Path::new("/data/extracted/img_01.JPG")),
            PathBuf::from("/data/extracted/img_01.xml")
        );
        assert!(has_annotation_extension(Path::new("a.XML")));
        assert!(!has_annotation_extension(Path::new("a.txt")));
    }
}
