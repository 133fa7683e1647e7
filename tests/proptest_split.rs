use std::collections::BTreeSet;
use std::path::PathBuf;

use proptest::prelude::*;
use vistrain::metadata::fingerprint_entries;
use vistrain::transform::{split_images, train_split_index};

mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn split_does_not_depend_on_discovery_order(
        images in proptest_helpers::arb_image_names(40),
        seed in any::<u64>(),
        rotate in any::<usize>(),
    ) {
        let mut reordered = images.clone();
        reordered.reverse();
        if !reordered.is_empty() {
            let by = rotate % reordered.len();
            reordered.rotate_left(by);
        }

        prop_assert_eq!(
            split_images(&images, seed, 0.8),
            split_images(&reordered, seed, 0.8)
        );
    }

    #[test]
    fn split_is_a_partition_at_the_floor_boundary(
        images in proptest_helpers::arb_image_names(40),
        seed in any::<u64>(),
        ratio in 0.01f64..=1.0,
    ) {
        let assignment = split_images(&images, seed, ratio);
        prop_assert_eq!(assignment.train.len(), train_split_index(images.len(), ratio));
        prop_assert_eq!(assignment.len(), images.len());

        let train: BTreeSet<&PathBuf> = assignment.train.iter().collect();
        let val: BTreeSet<&PathBuf> = assignment.val.iter().collect();
        prop_assert!(train.is_disjoint(&val));

        let all: BTreeSet<&PathBuf> = train.union(&val).copied().collect();
        let input: BTreeSet<&PathBuf> = images.iter().collect();
        prop_assert_eq!(all, input);
    }

    #[test]
    fn fingerprint_is_order_invariant(
        entries in proptest_helpers::arb_fingerprint_entries(20),
        rotate in any::<usize>(),
    ) {
        let mut shuffled = entries.clone();
        let by = rotate % shuffled.len();
        shuffled.rotate_left(by);
        shuffled.reverse();
        prop_assert_eq!(fingerprint_entries(&entries), fingerprint_entries(&shuffled));
    }

    #[test]
    fn fingerprint_tracks_file_sizes(
        entries in proptest_helpers::arb_fingerprint_entries(20),
        pick in any::<usize>(),
    ) {
        let mut changed = entries.clone();
        let idx = pick % changed.len();
        changed[idx].1 = changed[idx].1.wrapping_add(1);
        prop_assert_ne!(fingerprint_entries(&entries), fingerprint_entries(&changed));
    }
}
