//! Numeric helpers shared across the codec: transform-depth policy,
//! partition counts, and reconstruction statistics.

/// How many transform levels a signal of the given length supports.
///
/// Eight is the minimal length for one level, and no more than six levels
/// are ever performed regardless of the input size.
pub(crate) fn num_of_xforms(len: usize) -> usize {
    debug_assert!(len > 0);

    let f = (len as f64 / 8.0).log2();
    let num = if f < 0.0 { 0 } else { f as usize + 1 };

    num.min(6)
}

/// How many partition operations a length supports.
///
/// Length 0 and 1 allow 0 partitions; 2 allows 1; 3 and 4 allow 2, etc.
pub(crate) fn num_of_partitions(mut len: usize) -> usize {
    let mut num = 0;
    while len > 1 {
        num += 1;
        len -= len / 2;
    }

    num
}

/// Approximation and detail lengths after `lev` transform levels.
///
/// Each level splits the running length `n` into an approximation half of
/// `⌈n/2⌉` and a detail half of `⌊n/2⌋`.
pub(crate) fn approx_detail_len(orig_len: usize, lev: usize) -> (usize, usize) {
    let mut low = orig_len;
    let mut high = 0;
    for _ in 0..lev {
        high = low / 2;
        low -= high;
    }

    (low, high)
}

/// A suite of reconstruction statistics, with `orig` as the ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    /// Root-mean-square error.
    pub rmse: f64,
    /// Largest absolute point-wise error.
    pub linf: f64,
    /// Peak signal-to-noise ratio in dB, using the range of `orig` as peak.
    /// Infinite when the two arrays are identical.
    pub psnr: f64,
    /// Minimum of the ground-truth array.
    pub min: f64,
    /// Maximum of the ground-truth array.
    pub max: f64,
}

/// Calculate [`Stats`] between a ground-truth array and a reconstruction.
pub fn calc_stats(orig: &[f64], recon: &[f64]) -> Stats {
    assert_eq!(orig.len(), recon.len());
    assert!(!orig.is_empty());

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in orig {
        min = min.min(v);
        max = max.max(v);
    }

    let mut linf = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut comp = 0.0f64;
    for (&a, &b) in orig.iter().zip(recon) {
        let diff = (a - b).abs();
        linf = linf.max(diff);

        // Kahan summation keeps the squared-error sum accurate for the
        // volume sizes this codec targets.
        let y = diff * diff - comp;
        let t = sum_sq + y;
        comp = (t - sum_sq) - y;
        sum_sq = t;
    }

    let mse = sum_sq / orig.len() as f64;
    let psnr = if mse == 0.0 {
        f64::INFINITY
    } else {
        let range = max - min;
        10.0 * (range * range / mse).log10()
    };

    Stats {
        rmse: mse.sqrt(),
        linf,
        psnr,
        min,
        max,
    }
}

/// Compensated summation of an array.
pub(crate) fn kahan_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut comp = 0.0;
    for &v in values {
        let y = v - comp;
        let t = sum + y;
        comp = (t - sum) - y;
        sum = t;
    }

    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xform_counts() {
        assert_eq!(num_of_xforms(1), 0);
        assert_eq!(num_of_xforms(7), 0);
        assert_eq!(num_of_xforms(8), 1);
        assert_eq!(num_of_xforms(9), 1);
        assert_eq!(num_of_xforms(16), 2);
        assert_eq!(num_of_xforms(17), 2);
        assert_eq!(num_of_xforms(128), 5);
        assert_eq!(num_of_xforms(1024), 6);
        assert_eq!(num_of_xforms(1 << 20), 6);
    }

    #[test]
    fn partition_counts() {
        assert_eq!(num_of_partitions(0), 0);
        assert_eq!(num_of_partitions(1), 0);
        assert_eq!(num_of_partitions(2), 1);
        assert_eq!(num_of_partitions(3), 2);
        assert_eq!(num_of_partitions(4), 2);
        assert_eq!(num_of_partitions(5), 3);
    }

    #[test]
    fn approx_detail_lengths() {
        assert_eq!(approx_detail_len(17, 0), (17, 0));
        assert_eq!(approx_detail_len(17, 1), (9, 8));
        assert_eq!(approx_detail_len(17, 2), (5, 4));
        assert_eq!(approx_detail_len(16, 2), (4, 4));
    }

    #[test]
    fn stats_identical_arrays() {
        let a = [1.0, 2.0, 3.0];
        let stats = calc_stats(&a, &a);
        assert_eq!(stats.rmse, 0.0);
        assert_eq!(stats.linf, 0.0);
        assert!(stats.psnr.is_infinite());
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
    }

    #[test]
    fn stats_known_error() {
        let a = [0.0, 0.0, 0.0, 2.0];
        let b = [1.0, 0.0, 0.0, 2.0];
        let stats = calc_stats(&a, &b);
        assert_eq!(stats.linf, 1.0);
        assert!((stats.rmse - 0.5).abs() < 1e-12);
        // range = 2, mse = 0.25, psnr = 10 log10(16).
        assert!((stats.psnr - 10.0 * 16.0f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn kahan_handles_magnitude_spread() {
        let values = [1e16, 1.0, -1e16, 1.0];
        assert_eq!(kahan_sum(&values), 2.0);
    }
}
