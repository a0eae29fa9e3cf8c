use glam::Vec3;
use rand::Rng;

use super::Axis;
use crate::utils::BoundingBox;
use crate::Error;

/// How a node's primitive range gets split into its two children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitMethod {
    /// Splits at the spatial middle of the key bounds; falls back to an
    /// exact median whenever one side would end up (nearly) empty.
    #[default]
    Middle,

    /// Exact median: child counts differ by at most one.
    Median,

    /// Approximate median from randomly sampled pivots; cheaper than
    /// [`Self::Median`] on large ranges, usually close to balanced.
    MedianApprox,

    /// Not implemented; building fails fast.
    SurfaceAreaHeuristic,

    /// Not implemented; building fails fast.
    HierarchicalLinear,
}

impl SplitMethod {
    pub(crate) fn ensure_supported(self) -> Result<(), Error> {
        match self {
            Self::SurfaceAreaHeuristic | Self::HierarchicalLinear => {
                Err(Error::UnsupportedSplitMethod(self))
            }

            _ => Ok(()),
        }
    }
}

/// Primitive range the splitting algorithms reorder in place.
///
/// Implemented over the triangle-index storage (keys are centroid proxies)
/// and over instance-leaf slices (keys are world centroids).
pub(crate) trait SplitSet {
    fn key(&self, slot: u32) -> Vec3;
    fn swap(&mut self, a: u32, b: u32);
}

/// Picks the split axis and the pivot slot for `[start, end)`.
///
/// Requires `end - start >= 2`; the returned pivot always lies strictly
/// inside the range, so recursion terminates.
pub(crate) fn split(
    set: &mut impl SplitSet,
    start: u32,
    end: u32,
    method: SplitMethod,
) -> (Axis, u32) {
    debug_assert!(end - start >= 2);

    let key_bounds: BoundingBox =
        (start..end).map(|slot| set.key(slot)).collect();

    let axis = Axis::widest(key_bounds.extent());
    let lo = key_bounds.min()[axis];
    let hi = key_bounds.max()[axis];

    // Every key coincides on the widest axis (e.g. a perfectly aligned
    // grid); no pivot value can separate them, so cut the range in half
    // as it stands.
    if lo >= hi {
        return (axis, start + (end - start) / 2);
    }

    let mid = match method {
        SplitMethod::Middle => {
            let mid = partition_below(set, start, end, axis, 0.5 * (lo + hi));

            if mid == start || mid >= end - 1 {
                // (Almost) everything landed on one side; an exact median
                // keeps the tree from degenerating into a list.
                median(set, start, end, axis)
            } else {
                mid
            }
        }

        SplitMethod::Median => median(set, start, end, axis),
        SplitMethod::MedianApprox => median_approx(set, start, end, axis),

        // Rejected by `ensure_supported` before any recursion starts
        SplitMethod::SurfaceAreaHeuristic | SplitMethod::HierarchicalLinear => {
            unreachable!()
        }
    };

    (axis, mid)
}

/// Single-pass in-place partition; returns the first slot whose key is not
/// below `pivot`.
fn partition_below(
    set: &mut impl SplitSet,
    start: u32,
    end: u32,
    axis: Axis,
    pivot: f32,
) -> u32 {
    let mut mid = start;

    for slot in start..end {
        if set.key(slot)[axis] < pivot {
            set.swap(slot, mid);
            mid += 1;
        }
    }

    mid
}

/// Moves the median element into the middle slot, smaller keys before it
/// and larger ones after; a three-way quickselect over the set.
fn median(set: &mut impl SplitSet, start: u32, end: u32, axis: Axis) -> u32 {
    let target = start + (end - start) / 2;
    let mut lo = start;
    let mut hi = end;

    while hi - lo > 1 {
        let pivot = set.key(lo + (hi - lo) / 2)[axis];
        let (below, above) = partition_around(set, lo, hi, axis, pivot);

        if target < below {
            hi = below;
        } else if target >= above {
            lo = above;
        } else {
            // The target slot sits inside the equal run
            break;
        }
    }

    target
}

/// Three-way partition of `[lo, hi)`: keys below `pivot`, equal to it,
/// above it. Returns the bounds of the equal run, which is non-empty
/// whenever `pivot` is one of the keys.
fn partition_around(
    set: &mut impl SplitSet,
    lo: u32,
    hi: u32,
    axis: Axis,
    pivot: f32,
) -> (u32, u32) {
    let mut below = lo;
    let mut slot = lo;
    let mut above = hi;

    while slot < above {
        let key = set.key(slot)[axis];

        if key < pivot {
            set.swap(slot, below);
            below += 1;
            slot += 1;
        } else if key > pivot {
            above -= 1;
            set.swap(slot, above);
        } else {
            slot += 1;
        }
    }

    (below, above)
}

/// Approximate median: averages a handful of randomly sampled keys into a
/// pivot and keeps the partition when it lands reasonably close to the
/// middle; once the retry budget runs out, the middle slot wins outright.
fn median_approx(
    set: &mut impl SplitSet,
    start: u32,
    end: u32,
    axis: Axis,
) -> u32 {
    const PIVOT_SAMPLES: u32 = 5;

    let len = end - start;
    let rounds = len.ilog2().div_ceil(2);
    let mut rng = rand::thread_rng();

    for _ in 0..rounds {
        let pivot = (0..PIVOT_SAMPLES)
            .map(|_| set.key(rng.gen_range(start..end))[axis])
            .sum::<f32>()
            / (PIVOT_SAMPLES as f32);

        let (below, above) = partition_around(set, start, end, axis, pivot);

        for mid in [below, above] {
            let balanced = mid - start >= len / 4 && end - mid >= len / 4;

            if balanced && mid > start && mid < end {
                return mid;
            }
        }
    }

    start + len / 2
}

#[cfg(test)]
mod tests {
    use glam::vec3;

    use super::*;

    struct Keys(Vec<f32>);

    impl SplitSet for Keys {
        fn key(&self, slot: u32) -> Vec3 {
            vec3(self.0[slot as usize], 0.0, 0.0)
        }

        fn swap(&mut self, a: u32, b: u32) {
            self.0.swap(a as usize, b as usize);
        }
    }

    #[test]
    fn median_balances() {
        for len in [2, 3, 7, 16, 33, 100] {
            let mut target =
                Keys((0..len).rev().map(|key| key as f32).collect());

            let mid = median(&mut target, 0, len, Axis::X);
            let median_key = target.key(mid)[Axis::X];

            assert!((mid as i64 - (len - mid) as i64).abs() <= 1);

            for slot in 0..mid {
                assert!(target.key(slot)[Axis::X] <= median_key);
            }

            for slot in mid..len {
                assert!(target.key(slot)[Axis::X] >= median_key);
            }
        }
    }

    #[test]
    fn median_survives_duplicates() {
        let mut target = Keys(vec![5.0, 5.0, 1.0, 5.0, 5.0, 5.0, 2.0, 5.0]);
        let mid = median(&mut target, 0, 8, Axis::X);

        assert_eq!(4, mid);

        for slot in 0..mid {
            assert!(target.key(slot)[Axis::X] <= target.key(mid)[Axis::X]);
        }
    }

    #[test]
    fn middle_partitions_in_place() {
        let mut target = Keys(vec![9.0, 1.0, 8.0, 2.0, 7.0, 3.0]);
        let mid = partition_below(&mut target, 0, 6, Axis::X, 5.0);

        assert_eq!(3, mid);

        for slot in 0..mid {
            assert!(target.key(slot)[Axis::X] < 5.0);
        }

        for slot in mid..6 {
            assert!(target.key(slot)[Axis::X] >= 5.0);
        }
    }

    #[test]
    fn median_approx_stays_inside() {
        for len in [2, 5, 64, 257] {
            let mut target =
                Keys((0..len).map(|key| ((key * 31) % len) as f32).collect());

            let mid = median_approx(&mut target, 0, len, Axis::X);

            assert!(mid > 0 && mid < len);
        }
    }

    #[test]
    fn split_handles_degenerate_keys() {
        let mut target = Keys(vec![4.0; 10]);
        let (_, mid) = split(&mut target, 0, 10, SplitMethod::Middle);

        assert_eq!(5, mid);
    }
}
