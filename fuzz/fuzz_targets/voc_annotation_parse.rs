//! Fuzz target for the VOC annotation parser.
//!
//! Feeds arbitrary bytes to the parser and, for inputs that parse, checks
//! that every returned box has a positive extent.

#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use vistrain::annotation::voc::parse_voc_slice;

fuzz_target!(|data: &[u8]| {
    // Cap input size to avoid excessive memory usage.
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(annotation) = parse_voc_slice(data, Path::new("<fuzz>")) {
        for object in &annotation.objects {
            assert!(object.bbox.is_valid());
        }
    }
});
