//! Bounding box types and the VOC → YOLO coordinate conversion.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An axis-aligned box in absolute pixel coordinates, as stored in Pascal VOC
/// (`xmin`, `ymin`, `xmax`, `ymax`).
///
/// Construction does not enforce `min < max`; use [`PixelBox::is_valid`] to
/// filter degenerate boxes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

impl PixelBox {
    #[inline]
    pub fn new(xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Width in pixels. Zero or negative for degenerate boxes.
    #[inline]
    pub fn width(&self) -> i64 {
        self.xmax - self.xmin
    }

    /// Height in pixels. Zero or negative for degenerate boxes.
    #[inline]
    pub fn height(&self) -> i64 {
        self.ymax - self.ymin
    }

    /// Returns true if the box has positive extent on both axes.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.xmax > self.xmin && self.ymax > self.ymin
    }

    /// Converts to YOLO center-relative coordinates normalized by the image size.
    ///
    /// Callers must pass `image_width > 0` and `image_height > 0`. No bounds
    /// checks happen here; degenerate boxes are expected to be filtered by the
    /// parser before conversion.
    pub fn to_yolo(&self, image_width: u32, image_height: u32) -> YoloBox {
        let w = f64::from(image_width);
        let h = f64::from(image_height);
        let (xmin, ymin, xmax, ymax) = (
            self.xmin as f64,
            self.ymin as f64,
            self.xmax as f64,
            self.ymax as f64,
        );

        YoloBox {
            x_center: ((xmin + xmax) / 2.0) / w,
            y_center: ((ymin + ymax) / 2.0) / h,
            width: (xmax - xmin) / w,
            height: (ymax - ymin) / h,
        }
    }
}

/// A YOLO box: center x/y and width/height, all as fractions of the image size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct YoloBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl YoloBox {
    /// Converts back to absolute corner coordinates (unrounded).
    ///
    /// Returns `(xmin, ymin, xmax, ymax)` in pixels.
    pub fn to_pixel(&self, image_width: u32, image_height: u32) -> (f64, f64, f64, f64) {
        let w = f64::from(image_width);
        let h = f64::from(image_height);
        let half_w = self.width * w / 2.0;
        let half_h = self.height * h / 2.0;
        let cx = self.x_center * w;
        let cy = self.y_center * h;
        (cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    /// Formats one label line: `<class_id> <x> <y> <w> <h>`.
    pub fn label_line(&self, class_id: u32) -> String {
        format!("{} {}", class_id, self)
    }
}

impl fmt::Display for YoloBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.x_center, self.y_center, self.width, self.height
        )
    }
}
