// Deterministic stride downsampling for historical series
use super::sample::{compare_timestamps, Sample};

/// Reduce `samples` to roughly `target_size` representative points.
///
/// The input is stable-sorted by timestamp (missing timestamps last). Series
/// that already fit are returned sorted and otherwise untouched. Larger series
/// are sampled at `floor(i * len / target_size)` and the newest point is always
/// kept, so the output may hold `target_size + 1` entries.
///
/// A `target_size` of zero yields an empty series.
pub fn reduce(samples: &[Sample], target_size: usize) -> Vec<Sample> {
    if target_size == 0 {
        return Vec::new();
    }

    let mut sorted = samples.to_vec();
    // sort_by is stable: equal timestamps keep their arrival order
    sorted.sort_by(|a, b| compare_timestamps(&a.timestamp, &b.timestamp));

    if sorted.len() <= target_size {
        return sorted;
    }

    let indices = stride_indices(sorted.len(), target_size);
    let mut reduced: Vec<Sample> = indices.iter().map(|&i| sorted[i].clone()).collect();

    let last_index = sorted.len() - 1;
    if indices.last() != Some(&last_index) {
        reduced.push(sorted[last_index].clone());
    }

    reduced
}

/// Positions picked from a series of `len` items when reducing to `target_size`.
fn stride_indices(len: usize, target_size: usize) -> Vec<usize> {
    let step = len as f64 / target_size as f64;
    (0..target_size)
        .map(|i| (i as f64 * step).floor() as usize)
        .filter(|&index| index < len)
        .collect()
}
