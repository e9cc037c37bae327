//! Kernel-map geometry properties over generated stride schedules.

use fsa_attn::{generate, FsaError, KernelMapCache, StrideSchedule, Tap};
use proptest::prelude::*;

/// Segment tap counts and strides -> (kernel_size, schedule).
fn arb_schedule() -> impl Strategy<Value = (usize, StrideSchedule)> {
    prop::collection::vec((1usize..5, 1usize..6), 1..5).prop_map(|segments| {
        let mut location = 1;
        let mut locations = Vec::new();
        let mut strides = Vec::new();
        for (count, stride) in segments {
            location += count;
            locations.push(location);
            strides.push(stride);
        }
        let kernel_size = 2 * (location - 1) + 1;
        (kernel_size, StrideSchedule::new(locations, strides).unwrap())
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn prop_length_symmetry_monotonic((kernel_size, schedule) in arb_schedule()) {
        let (map, patch_size) = generate(kernel_size, &schedule).unwrap();
        let taps = map.taps();

        prop_assert_eq!(taps.len(), kernel_size);
        prop_assert_eq!(taps[kernel_size / 2], Tap::CENTER);

        for i in 0..kernel_size {
            prop_assert_eq!(taps[i].offset, -taps[kernel_size - 1 - i].offset);
            prop_assert_eq!(taps[i].stride, taps[kernel_size - 1 - i].stride);
        }
        for pair in taps.windows(2) {
            prop_assert!(pair[0].offset < pair[1].offset);
        }

        let last = taps[kernel_size - 1];
        prop_assert_eq!(patch_size, (2 * (last.offset + last.stride) - 1) as usize);
    }

    #[test]
    fn prop_segment_strides_are_gaps((kernel_size, schedule) in arb_schedule()) {
        // On the positive side, each tap sits one previous stride past its
        // predecessor at a segment start, then one segment stride apart.
        let (map, _) = generate(kernel_size, &schedule).unwrap();
        let side = &map.taps()[kernel_size / 2..];
        for pair in side.windows(2) {
            let gap = pair[1].offset - pair[0].offset;
            prop_assert!(gap == pair[0].stride || gap == pair[1].stride);
        }
    }

    #[test]
    fn prop_cells_tile_patch((kernel_size, schedule) in arb_schedule()) {
        let (map, patch_size) = generate(kernel_size, &schedule).unwrap();
        let cells: Vec<(i32, i32)> = map.taps().iter().map(Tap::cell).collect();
        let half = (patch_size / 2) as i32;

        prop_assert_eq!(cells[0].0, -half);
        prop_assert_eq!(cells[kernel_size - 1].1, half);
        for pair in cells.windows(2) {
            prop_assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn prop_wrong_kernel_size_rejected((kernel_size, schedule) in arb_schedule()) {
        let err = generate(kernel_size + 2, &schedule).unwrap_err();
        let is_span_error = matches!(err, FsaError::LocationSpan { .. });
        prop_assert!(is_span_error);
    }
}

#[test]
fn test_reference_schedules() {
    let (map, patch) = generate(13, &StrideSchedule::new(vec![4, 6, 7], vec![1, 2, 4]).unwrap()).unwrap();
    assert_eq!(map.offsets(), vec![-8, -6, -4, -3, -2, -1, 0, 1, 2, 3, 4, 6, 8]);
    assert_eq!(patch, 23);

    let (map, patch) = generate(9, &StrideSchedule::new(vec![3, 4, 5], vec![1, 2, 4]).unwrap()).unwrap();
    assert_eq!(map.offsets(), vec![-5, -3, -2, -1, 0, 1, 2, 3, 5]);
    assert_eq!(patch, 17);
}

#[test]
fn test_invalid_schedules_report_invariant() {
    let cases: Vec<(usize, Vec<usize>, Vec<usize>, &str)> = vec![
        (11, vec![3, 4, 5], vec![1, 2, 4], "kernel_size / 2 + 1"),
        (13, vec![4, 4, 7], vec![1, 2, 4], "strictly increasing"),
        (13, vec![4, 6, 7], vec![1, 0, 4], "stride[1]"),
        (12, vec![4, 6, 7], vec![1, 2, 4], "odd"),
    ];

    for (kernel_size, locations, strides, needle) in cases {
        let schedule = StrideSchedule::new(locations, strides).unwrap();
        let err = generate(kernel_size, &schedule).unwrap_err();
        assert!(err.to_string().contains(needle), "{} should mention '{}'", err, needle);
    }
}

#[test]
fn test_cache_shares_across_blocks() {
    let mut cache = KernelMapCache::new();
    let schedule = StrideSchedule::new(vec![4, 6, 7], vec![1, 2, 4]).unwrap();
    let maps: Vec<_> = (0..8).map(|_| cache.get_or_generate(13, &schedule).unwrap()).collect();

    assert!(maps.windows(2).all(|w| std::sync::Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(cache.stats(), (7, 1));
}
