//! Robust leave-one-out outlier scores.
//!
//! Each value is scored against its peers with itself excluded:
//!
//! ```text
//! score(x_k) = |x_k - median(x without k)| / scale_k
//! scale_k    = max(MAD_SCALE * MAD(x without k), min_relative * |median|, floor)
//! ```
//!
//! Excluding the value keeps an extreme outlier from dragging the reference
//! median and MAD toward itself, which matters most in small groups.
//!
//! Removing one element from a sorted sample moves its median to one of at
//! most three values, so each distinct median needs one sorted deviation
//! array and the whole pass stays `O(n log n)`.

/// Makes the MAD a consistent estimator of the standard deviation for normal data.
pub const MAD_SCALE: f64 = 1.4826;

/// Median of `sorted` with the element at position `skip` removed.
///
/// `sorted.len()` must be at least 2.
fn median_without(sorted: &[f64], skip: usize) -> f64 {
    let m = sorted.len() - 1;
    let at = |rank: usize| sorted[if rank < skip { rank } else { rank + 1 }];
    if m % 2 == 1 {
        at(m / 2)
    } else {
        (at(m / 2 - 1) + at(m / 2)) / 2.0
    }
}

/// Sort ascending and return `(sorted values, position of each input index)`.
fn sort_with_positions(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
    let mut positions = vec![0; values.len()];
    for (pos, &idx) in order.iter().enumerate() {
        positions[idx] = pos;
    }
    (order.iter().map(|&i| values[i]).collect(), positions)
}

/// Leave-one-out robust score for every value, in input order.
///
/// Samples with fewer than two values have no peers and score zero.
pub fn leave_one_out_scores(values: &[f64], min_relative_spread: f64, floor: f64) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let (sorted, positions) = sort_with_positions(values);

    // Keyed by the bit pattern of the peer median; at most three entries.
    let mut deviations: Vec<(u64, Vec<f64>, Vec<usize>)> = Vec::with_capacity(3);
    let mut scores = Vec::with_capacity(n);
    for (k, &x) in values.iter().enumerate() {
        let median = median_without(&sorted, positions[k]);
        let key = median.to_bits();
        let slot = match deviations.iter().position(|(bits, _, _)| *bits == key) {
            Some(slot) => slot,
            None => {
                let devs: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
                let (sorted_devs, dev_positions) = sort_with_positions(&devs);
                deviations.push((key, sorted_devs, dev_positions));
                deviations.len() - 1
            }
        };
        let (_, sorted_devs, dev_positions) = &deviations[slot];
        let mad = median_without(sorted_devs, dev_positions[k]);
        let scale = (mad * MAD_SCALE)
            .max(min_relative_spread * median.abs())
            .max(floor);
        scores.push((x - median).abs() / scale);
    }
    scores
}

/// Round to four decimals so reported severities are stable text.
pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
