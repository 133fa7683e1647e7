//! Annotation parsing and coordinate conversion.
//!
//! - [`voc`]: Pascal VOC XML parser (size + labeled boxes, degenerate boxes dropped)
//! - [`bbox`]: pixel boxes and the conversion to normalized YOLO boxes
//! - [`class_map`]: the externally supplied label → class id mapping
//!
//! # Example
//!
//! ```
//! use vistrain::annotation::PixelBox;
//!
//! let yolo = PixelBox::new(0, 0, 50, 100).to_yolo(100, 200);
//! assert_eq!(yolo.label_line(0), "0 0.25 0.25 0.5 0.5");
//! ```

mod bbox;
pub mod class_map;
pub mod voc;

pub use bbox::{PixelBox, YoloBox};
pub use class_map::ClassMap;
pub use voc::{AnnotationRecord, VocAnnotation};
