//! The 1D CDF 9/7 lifting kernel.
//!
//! The forward transform runs four lift steps (predict/update twice) plus a
//! scale step in place on an interleaved line; even samples become scaling
//! coefficients and odd samples become wavelet coefficients. Boundaries use
//! symmetric whole-point extension. The inverse applies the same steps in
//! reverse order with negated lift coefficients and reciprocal scales, so
//! reconstruction is exact up to `f64` rounding.
//!
//! A second kernel implements the Lindstrom boundary scheme, which replaces
//! the final update/scale pair at the array ends with precomputed
//! end-of-array weights to reduce the magnitude of boundary wavelet
//! coefficients. It only applies to lines of nine or more samples and uses
//! a different per-level layout (`(n + 6) / 2` scaling coefficients).

const ALPHA: f64 = -1.586134342059923558;
const BETA: f64 = -0.05298011857296141462;
const GAMMA: f64 = 0.88291107553093329595;
const DELTA: f64 = 0.44350685204397115217;
/// Scale for odd (wavelet) samples.
const ZETA: f64 = 1.23017410491400072921;
/// Scale for even (scaling) samples, the reciprocal of `ZETA`.
const INV_ZETA: f64 = 0.81289306611596105003;

/// End-of-array weights for the Lindstrom scheme.
const B_SLIFT2: f64 = 1.0796367753748872;
const B_WSCALE: f64 = -0.9206964196560029;
const B_SSCALE: f64 = -17.37814947295878;
const B_WEIGHT_N3: f64 = -0.13081031898599063;
const B_WEIGHT_N2: f64 = 10.978432345068303;
const B_WSCALE_N1: f64 = -10.956291035467812;

/// Symmetric whole-point extension of an index into `[0, n)`.
#[inline]
fn mirror(i: isize, n: usize) -> usize {
    if i < 0 {
        (-i) as usize
    } else if i as usize >= n {
        2 * (n - 1) - i as usize
    } else {
        i as usize
    }
}

/// One lift step: samples of the given parity accumulate their two
/// neighbors, mirrored at the boundaries.
fn lift(line: &mut [f64], coef: f64, parity: usize) {
    let n = line.len();
    let mut i = parity;
    while i < n {
        let left = line[mirror(i as isize - 1, n)];
        let right = line[mirror(i as isize + 1, n)];
        line[i] += coef * (left + right);
        i += 2;
    }
}

/// Forward lifting in place; the result stays interleaved (even = scaling,
/// odd = wavelet).
pub(crate) fn forward_lift(line: &mut [f64]) {
    if line.len() < 2 {
        return;
    }

    lift(line, ALPHA, 1);
    lift(line, BETA, 0);
    lift(line, GAMMA, 1);
    lift(line, DELTA, 0);

    for (i, v) in line.iter_mut().enumerate() {
        *v *= if i % 2 == 0 { INV_ZETA } else { ZETA };
    }
}

/// Inverse of [`forward_lift`].
pub(crate) fn inverse_lift(line: &mut [f64]) {
    if line.len() < 2 {
        return;
    }

    for (i, v) in line.iter_mut().enumerate() {
        *v *= if i % 2 == 0 { ZETA } else { INV_ZETA };
    }

    lift(line, -DELTA, 0);
    lift(line, -GAMMA, 1);
    lift(line, -BETA, 0);
    lift(line, -ALPHA, 1);
}

/// Forward transform of one line into subband order: lifting followed by
/// de-interleaving into `[approximation | detail]`, with `⌈n/2⌉`
/// approximation samples.
pub(crate) fn forward_line(line: &mut [f64], scratch: &mut Vec<f64>) {
    let n = line.len();
    if n < 2 {
        return;
    }

    forward_lift(line);

    scratch.clear();
    scratch.extend(line.iter().step_by(2));
    scratch.extend(line.iter().skip(1).step_by(2));
    line.copy_from_slice(scratch);
}

/// Inverse of [`forward_line`]: re-interleave `[approximation | detail]`
/// and undo the lifting.
pub(crate) fn inverse_line(line: &mut [f64], scratch: &mut Vec<f64>) {
    let n = line.len();
    if n < 2 {
        return;
    }

    let low_len = n.div_ceil(2);
    scratch.clear();
    scratch.resize(n, 0.0);
    for (i, &v) in line[..low_len].iter().enumerate() {
        scratch[2 * i] = v;
    }
    for (i, &v) in line[low_len..].iter().enumerate() {
        scratch[2 * i + 1] = v;
    }
    line.copy_from_slice(scratch);

    inverse_lift(line);
}

/// Lift step for a run whose first sample sits at global parity `phase`.
/// Samples whose global parity matches `target` accumulate their mirrored
/// neighbors within the run.
fn lift_phased(run: &mut [f64], coef: f64, phase: usize, target: usize) {
    let n = run.len();
    let mut i = (target + 2 - phase % 2) % 2;
    while i < n {
        let left = run[mirror(i as isize - 1, n)];
        let right = run[mirror(i as isize + 1, n)];
        run[i] += coef * (left + right);
        i += 2;
    }
}

/// Forward lifting of an opaque run that starts at global parity `phase`.
/// Keeping the global parity means the lazy split of the mask places every
/// transformed sample in the correct subband half. Single-sample runs pass
/// through unchanged.
pub(crate) fn forward_lift_phased(run: &mut [f64], phase: usize) {
    if run.len() < 2 {
        return;
    }

    lift_phased(run, ALPHA, phase, 1);
    lift_phased(run, BETA, phase, 0);
    lift_phased(run, GAMMA, phase, 1);
    lift_phased(run, DELTA, phase, 0);

    for (i, v) in run.iter_mut().enumerate() {
        *v *= if (i + phase) % 2 == 0 { INV_ZETA } else { ZETA };
    }
}

/// Inverse of [`forward_lift_phased`].
pub(crate) fn inverse_lift_phased(run: &mut [f64], phase: usize) {
    if run.len() < 2 {
        return;
    }

    for (i, v) in run.iter_mut().enumerate() {
        *v *= if (i + phase) % 2 == 0 { ZETA } else { INV_ZETA };
    }

    lift_phased(run, -DELTA, phase, 0);
    lift_phased(run, -GAMMA, phase, 1);
    lift_phased(run, -BETA, phase, 0);
    lift_phased(run, -ALPHA, phase, 1);
}

/// Minimum line length for the Lindstrom scheme.
pub(crate) const LINDSTROM_MIN_LEN: usize = 9;

/// Number of scaling coefficients one Lindstrom level produces.
#[inline]
pub(crate) fn lindstrom_scaling_len(n: usize) -> usize {
    (n + 6) / 2
}

/// How many Lindstrom levels a line of the given length supports, with the
/// same six-level cap as the dyadic policy.
pub(crate) fn lindstrom_levels(mut n: usize) -> usize {
    let mut levels = 0;
    while n >= LINDSTROM_MIN_LEN && levels < 6 {
        levels += 1;
        n = lindstrom_scaling_len(n);
    }

    levels
}

/// One forward Lindstrom level. Returns the number of scaling coefficients,
/// or 0 when the line is too short and was left untouched.
///
/// Output layout: the scaling coefficients first, then the wavelet
/// coefficients (the interior odd samples).
pub(crate) fn forward_lindstrom(line: &mut [f64], scratch: &mut Vec<f64>) -> usize {
    let n = line.len();
    if n < LINDSTROM_MIN_LEN {
        return 0;
    }

    let even = n % 2 == 0;
    // Index of the last scaling coefficient.
    let m = if even { n - 2 } else { n - 1 };

    scratch.clear();
    scratch.extend_from_slice(line);
    let q = scratch.as_mut_slice();

    // First w-lift (predict).
    let mut i = 1;
    while i < n - 1 {
        q[i] += ALPHA * (q[i - 1] + q[i + 1]);
        i += 2;
    }
    if even {
        q[n - 1] += ALPHA * q[n - 2];
    }

    // First s-lift (update).
    let mut i = 1;
    while i < n - 1 {
        let w = BETA * q[i];
        q[i - 1] += w;
        q[i + 1] += w;
        i += 2;
    }

    // Second w-lift (predict).
    let mut i = 2;
    while i < n - 2 {
        let s = GAMMA * q[i];
        q[i - 1] += s;
        q[i + 1] += s;
        i += 2;
    }
    if even {
        q[n - 1] += GAMMA * q[n - 2];
    }

    // Second s-lift (update), with boundary weights at both ends.
    q[0] += B_SLIFT2 * q[1];
    let mut i = 3;
    while i < n - 3 {
        let w = DELTA * q[i];
        q[i - 1] += w;
        q[i + 1] += w;
        i += 2;
    }
    q[m] += B_SLIFT2 * q[m - 1];

    // Right-boundary special case for even n.
    if even {
        q[n - 1] += B_WEIGHT_N3 * q[n - 3];
        q[n - 1] += B_WEIGHT_N2 * q[n - 2];
    }

    // W-scale pass.
    q[1] *= B_WSCALE;
    let mut i = 3;
    while i < n - 3 {
        q[i] *= ZETA;
        i += 2;
    }
    q[m - 1] *= B_WSCALE;
    if even {
        q[n - 1] *= B_WSCALE_N1;
    }

    // S-scale pass.
    q[0] *= B_SSCALE;
    let mut i = 2;
    while i < n - 2 {
        q[i] *= INV_ZETA;
        i += 2;
    }
    q[m] *= B_SSCALE;

    // Scaling coefficients to the front of the destination.
    let mut out = 0;
    let mut push = |line: &mut [f64], v: f64, out: &mut usize| {
        line[*out] = v;
        *out += 1;
    };
    push(line, q[0], &mut out);
    push(line, q[1], &mut out);
    let mut i = 2;
    while i < n - 2 {
        push(line, q[i], &mut out);
        i += 2;
    }
    if even {
        push(line, q[n - 3], &mut out);
    }
    push(line, q[n - 2], &mut out);
    push(line, q[n - 1], &mut out);

    // Wavelet coefficients follow.
    let mut i = 3;
    while i < n - 3 {
        push(line, q[i], &mut out);
        i += 2;
    }
    debug_assert_eq!(out, n);

    lindstrom_scaling_len(n)
}

/// One inverse Lindstrom level over `n` reconstructed samples. Returns
/// false when the line is too short.
pub(crate) fn inverse_lindstrom(line: &mut [f64], scratch: &mut Vec<f64>) -> bool {
    let n = line.len();
    if n < LINDSTROM_MIN_LEN {
        return false;
    }

    let even = n % 2 == 0;
    let m = if even { n - 2 } else { n - 1 };

    scratch.clear();
    scratch.resize(n, 0.0);
    let q = scratch.as_mut_slice();

    // Scaling coefficients from the front of the source.
    let mut pos = 0;
    let mut pull = |line: &[f64], pos: &mut usize| {
        let v = line[*pos];
        *pos += 1;
        v
    };
    q[0] = pull(line, &mut pos);
    q[1] = pull(line, &mut pos);
    let mut i = 2;
    while i < n - 2 {
        q[i] = pull(line, &mut pos);
        i += 2;
    }
    if even {
        q[n - 3] = pull(line, &mut pos);
    }
    q[n - 2] = pull(line, &mut pos);
    q[n - 1] = pull(line, &mut pos);

    // Wavelet coefficients follow.
    let mut i = 3;
    while i < n - 3 {
        q[i] = pull(line, &mut pos);
        i += 2;
    }
    debug_assert_eq!(pos, n);

    // S-scale pass.
    q[0] /= B_SSCALE;
    let mut i = 2;
    while i < n - 2 {
        q[i] /= INV_ZETA;
        i += 2;
    }
    q[m] /= B_SSCALE;

    // W-scale pass.
    q[1] /= B_WSCALE;
    let mut i = 3;
    while i < n - 3 {
        q[i] /= ZETA;
        i += 2;
    }
    q[m - 1] /= B_WSCALE;
    if even {
        q[n - 1] /= B_WSCALE_N1;
    }

    // Right-boundary special case for even n.
    if even {
        q[n - 1] -= B_WEIGHT_N3 * q[n - 3];
        q[n - 1] -= B_WEIGHT_N2 * q[n - 2];
    }

    // Second s-lift (update).
    q[0] -= B_SLIFT2 * q[1];
    let mut i = 3;
    while i < n - 3 {
        let w = DELTA * q[i];
        q[i - 1] -= w;
        q[i + 1] -= w;
        i += 2;
    }
    q[m] -= B_SLIFT2 * q[m - 1];

    // Second w-lift (predict).
    let mut i = 2;
    while i < n - 2 {
        let s = GAMMA * q[i];
        q[i - 1] -= s;
        q[i + 1] -= s;
        i += 2;
    }
    if even {
        q[n - 1] -= GAMMA * q[n - 2];
    }

    // First s-lift (update).
    let mut i = 1;
    while i < n - 1 {
        let w = BETA * q[i];
        q[i - 1] -= w;
        q[i + 1] -= w;
        i += 2;
    }

    // First w-lift (predict).
    let mut i = 1;
    while i < n - 1 {
        q[i] -= ALPHA * (q[i - 1] + q[i + 1]);
        i += 2;
    }
    if even {
        q[n - 1] -= ALPHA * q[n - 2];
    }

    line.copy_from_slice(q);

    true
}
