#![allow(dead_code)]

use std::path::PathBuf;

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

use vistrain::annotation::PixelBox;

pub fn eps_pixel(image_w: u32, image_h: u32) -> f64 {
    image_w.max(image_h) as f64 * 1e-9
}

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

pub fn arb_image_dims() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=8192, 1u32..=8192)
}

/// A valid box inside a `width` x `height` image.
pub fn arb_box_within(width: u32, height: u32) -> BoxedStrategy<PixelBox> {
    let (w, h) = (i64::from(width), i64::from(height));
    (0..w, 0..h)
        .prop_flat_map(move |(xmin, ymin)| {
            (
                Just(xmin),
                Just(ymin),
                (xmin + 1)..=w.max(xmin + 1),
                (ymin + 1)..=h.max(ymin + 1),
            )
        })
        .prop_map(|(xmin, ymin, xmax, ymax)| PixelBox::new(xmin, ymin, xmax, ymax))
        .boxed()
}

/// An image with a valid box inside it.
pub fn arb_image_with_box() -> impl Strategy<Value = (u32, u32, PixelBox)> {
    arb_image_dims().prop_flat_map(|(w, h)| (Just(w), Just(h), arb_box_within(w, h)))
}

/// Distinct image file names, as they would sit in one directory.
pub fn arb_image_names(max: usize) -> impl Strategy<Value = Vec<PathBuf>> {
    proptest::collection::btree_set("[a-z0-9_]{1,12}\\.(jpg|png)", 0..=max).prop_map(|names| {
        names
            .into_iter()
            .map(|name| PathBuf::from("/extracted").join(name))
            .collect()
    })
}

/// `(file name, size)` pairs with unique names.
pub fn arb_fingerprint_entries(max: usize) -> impl Strategy<Value = Vec<(String, u64)>> {
    proptest::collection::btree_map("[a-z0-9_]{1,12}\\.jpg", any::<u64>(), 1..=max)
        .prop_map(|entries| entries.into_iter().collect())
}
