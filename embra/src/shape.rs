//! The shape-adaptive wavelet transform.
//!
//! Samples marked transparent by the mask do not participate: every 1D pass
//! compacts the opaque runs of a line, runs the lifting on each run with
//! symmetric extension inside the run, and scatters the results back. The
//! lifting steps keep each sample's global even/odd phase so that the lazy
//! split of the mask tells both sides which subband half every opaque
//! sample lands in. Fully transparent lines are skipped, and transparent
//! coefficient positions are pinned to zero.

use crate::error::Result;
use crate::lifting::{forward_lift_phased, inverse_lift_phased};
use crate::mask::Mask;
use crate::math::approx_detail_len;
use crate::pyramid::{Pyramid, TransformType};
use crate::transform::{lazy_forward, lazy_inverse};

/// Scratch state for one shape-adaptive transform.
#[derive(Debug, Default)]
struct SaBufs {
    line: Vec<f64>,
    flags: Vec<bool>,
    run: Vec<f64>,
    scratch: Vec<f64>,
    flag_scratch: Vec<f64>,
}

impl SaBufs {
    /// Transform one gathered line in place, forward direction.
    fn forward_line(&mut self) {
        let n = self.line.len();

        // Lift every maximal opaque run with its global phase.
        let mut start = 0;
        while start < n {
            if !self.flags[start] {
                start += 1;
                continue;
            }

            let mut end = start;
            while end < n && self.flags[end] {
                end += 1;
            }

            self.run.clear();
            self.run.extend_from_slice(&self.line[start..end]);
            forward_lift_phased(&mut self.run, start % 2);
            self.line[start..end].copy_from_slice(&self.run);

            start = end;
        }

        // Transparent positions stay inert.
        for (v, &opaque) in self.line.iter_mut().zip(&self.flags) {
            if !opaque {
                *v = 0.0;
            }
        }

        // The lazy split moves samples into subband order; the mask is
        // split identically so the next level sees consistent opacity.
        lazy_forward(&mut self.line, &mut self.scratch);
        lazy_split_flags(&mut self.flags, &mut self.flag_scratch);
    }

    /// Inverse of [`SaBufs::forward_line`]. The flags passed in must be in
    /// the subband order this level produced.
    fn inverse_line(&mut self) {
        let n = self.line.len();

        lazy_inverse(&mut self.line, &mut self.scratch);
        lazy_merge_flags(&mut self.flags, &mut self.flag_scratch);

        let mut start = 0;
        while start < n {
            if !self.flags[start] {
                start += 1;
                continue;
            }

            let mut end = start;
            while end < n && self.flags[end] {
                end += 1;
            }

            self.run.clear();
            self.run.extend_from_slice(&self.line[start..end]);
            inverse_lift_phased(&mut self.run, start % 2);
            self.line[start..end].copy_from_slice(&self.run);

            start = end;
        }

        for (v, &opaque) in self.line.iter_mut().zip(&self.flags) {
            if !opaque {
                *v = 0.0;
            }
        }
    }
}

/// Lazy split of a boolean line: evens first, then odds.
fn lazy_split_flags(flags: &mut [bool], scratch: &mut Vec<f64>) {
    let n = flags.len();
    if n < 2 {
        return;
    }

    scratch.clear();
    scratch.extend(flags.iter().step_by(2).map(|&b| b as u8 as f64));
    scratch.extend(flags.iter().skip(1).step_by(2).map(|&b| b as u8 as f64));
    for (f, &v) in flags.iter_mut().zip(scratch.iter()) {
        *f = v != 0.0;
    }
}

/// Inverse of [`lazy_split_flags`].
fn lazy_merge_flags(flags: &mut [bool], scratch: &mut Vec<f64>) {
    let n = flags.len();
    if n < 2 {
        return;
    }

    let low_len = n.div_ceil(2);
    scratch.clear();
    scratch.resize(n, 0.0);
    for (i, &b) in flags[..low_len].iter().enumerate() {
        scratch[2 * i] = b as u8 as f64;
    }
    for (i, &b) in flags[low_len..].iter().enumerate() {
        scratch[2 * i + 1] = b as u8 as f64;
    }
    for (f, &v) in flags.iter_mut().zip(scratch.iter()) {
        *f = v != 0.0;
    }
}

/// Gather a strided line of values and mask flags.
fn gather(
    p: &Pyramid,
    mask: &Mask,
    bufs: &mut SaBufs,
    start: usize,
    stride: usize,
    len: usize,
) {
    bufs.line.clear();
    bufs.flags.clear();
    for i in 0..len {
        bufs.line.push(p.data()[start + i * stride]);
        bufs.flags.push(mask.opaque_at(start + i * stride));
    }
}

fn scatter(
    p: &mut Pyramid,
    mask: &mut Mask,
    bufs: &SaBufs,
    start: usize,
    stride: usize,
) {
    for (i, (&v, &f)) in bufs.line.iter().zip(&bufs.flags).enumerate() {
        p.data_mut()[start + i * stride] = v;
        mask.flags_mut()[start + i * stride] = f;
    }
}

fn line_starts(p: &Pyramid, axis: usize, la: usize, lb: usize) -> Vec<usize> {
    // `la`/`lb` are the extents of the two axes orthogonal to `axis`, in
    // (x, y, z) order skipping `axis` itself.
    let mut starts = Vec::with_capacity(la * lb);
    match axis {
        0 => {
            for b in 0..lb {
                for a in 0..la {
                    starts.push(p.linearize(0, a, b));
                }
            }
        }
        1 => {
            for b in 0..lb {
                for a in 0..la {
                    starts.push(p.linearize(a, 0, b));
                }
            }
        }
        _ => {
            for b in 0..lb {
                for a in 0..la {
                    starts.push(p.linearize(a, b, 0));
                }
            }
        }
    }
    starts
}

fn sa_pass(
    p: &mut Pyramid,
    mask: &mut Mask,
    bufs: &mut SaBufs,
    axis: usize,
    dims: (usize, usize, usize),
    forward: bool,
) {
    let (nx, ny, nz) = dims;
    let (full_x, full_y, _) = p.dims();

    let (stride, len, starts) = match axis {
        0 => (1, nx, line_starts(p, 0, ny, nz)),
        1 => (full_x, ny, line_starts(p, 1, nx, nz)),
        _ => (full_x * full_y, nz, line_starts(p, 2, nx, ny)),
    };

    if len < 2 {
        return;
    }

    for start in starts {
        gather(p, mask, bufs, start, stride, len);

        // A fully transparent line has nothing to transform or reorder.
        if bufs.flags.iter().all(|&f| !f) {
            continue;
        }

        if forward {
            bufs.forward_line();
        } else {
            bufs.inverse_line();
        }

        scatter(p, mask, bufs, start, stride);
    }
}

/// Forward shape-adaptive dyadic transform.
///
/// The mask is not mutated; both sides derive the subband-domain mask
/// deterministically from it.
pub fn shape_adaptive_dwt(p: &mut Pyramid, mask: &Mask, levels: usize) -> Result<()> {
    p.check_decimated()?;
    validate(p, mask, levels)?;

    // Transparent samples must not leak into the transform.
    for (v, &f) in p.data_mut().iter_mut().zip(mask.flags()) {
        if !f {
            *v = 0.0;
        }
    }

    let mut mask = mask.clone();
    let mut bufs = SaBufs::default();
    let (nx, ny, nz) = p.dims();

    for l in 0..levels {
        let dims = (
            approx_detail_len(nx, l).0,
            approx_detail_len(ny, l).0,
            if nz == 1 { 1 } else { approx_detail_len(nz, l).0 },
        );
        sa_pass(p, &mut mask, &mut bufs, 0, dims, true);
        sa_pass(p, &mut mask, &mut bufs, 1, dims, true);
        if dims.2 > 1 {
            sa_pass(p, &mut mask, &mut bufs, 2, dims, true);
        }
    }

    p.set_transform(TransformType::Dyadic, levels, levels);
    Ok(())
}

/// Inverse shape-adaptive dyadic transform. The decoder must pass the
/// identical mask the encoder used.
pub fn inverse_shape_adaptive_dwt(p: &mut Pyramid, mask: &Mask) -> Result<()> {
    p.check_decimated()?;
    let levels = p.spatial_levels();
    validate(p, mask, levels)?;

    // Rebuild the per-level masks by replaying the forward splits.
    let mut level_masks = vec![mask.clone()];
    {
        let mut m = mask.clone();
        let mut p_geom = SaBufs::default();
        let (nx, ny, nz) = p.dims();
        for l in 0..levels {
            let dims = (
                approx_detail_len(nx, l).0,
                approx_detail_len(ny, l).0,
                if nz == 1 { 1 } else { approx_detail_len(nz, l).0 },
            );
            split_mask_level(&mut m, &mut p_geom, p, dims);
            level_masks.push(m.clone());
        }
    }

    let mut bufs = SaBufs::default();
    let (nx, ny, nz) = p.dims();

    for l in (0..levels).rev() {
        let dims = (
            approx_detail_len(nx, l).0,
            approx_detail_len(ny, l).0,
            if nz == 1 { 1 } else { approx_detail_len(nz, l).0 },
        );

        // Undo the passes of level `l` in reverse order, starting from the
        // mask state *after* that level and unwinding per pass.
        let mut m = level_masks[l].clone();
        let mut fwd = SaBufs::default();
        // Re-run the X and Y splits to position the mask where the Z
        // inverse pass expects it.
        sa_mask_pass(&mut m, &mut fwd, p, 0, dims);
        let mask_after_x = m.clone();
        sa_mask_pass(&mut m, &mut fwd, p, 1, dims);
        let mask_after_y = m.clone();

        if dims.2 > 1 {
            let mut mz = mask_after_y.clone();
            sa_mask_pass(&mut mz, &mut fwd, p, 2, dims);
            let mut m_dec = mz;
            inverse_pass_with(p, &mut m_dec, &mut bufs, 2, dims);
        }
        let mut m_dec = mask_after_y;
        inverse_pass_with(p, &mut m_dec, &mut bufs, 1, dims);
        let mut m_dec = mask_after_x;
        inverse_pass_with(p, &mut m_dec, &mut bufs, 0, dims);
    }

    p.set_transform(TransformType::Dyadic, 0, 0);
    Ok(())
}

/// Apply one inverse pass; the mask passed in must be in the state *after*
/// the corresponding forward pass, and is unwound alongside the values.
fn inverse_pass_with(
    p: &mut Pyramid,
    mask: &mut Mask,
    bufs: &mut SaBufs,
    axis: usize,
    dims: (usize, usize, usize),
) {
    sa_pass(p, mask, bufs, axis, dims, false);
}

/// Advance only the mask through one full forward level (all three passes).
fn split_mask_level(mask: &mut Mask, bufs: &mut SaBufs, p: &Pyramid, dims: (usize, usize, usize)) {
    sa_mask_pass(mask, bufs, p, 0, dims);
    sa_mask_pass(mask, bufs, p, 1, dims);
    if dims.2 > 1 {
        sa_mask_pass(mask, bufs, p, 2, dims);
    }
}

/// Advance only the mask through one forward pass along `axis`.
fn sa_mask_pass(
    mask: &mut Mask,
    bufs: &mut SaBufs,
    p: &Pyramid,
    axis: usize,
    dims: (usize, usize, usize),
) {
    let (nx, ny, nz) = dims;
    let (full_x, full_y, _) = p.dims();

    let (stride, len, starts) = match axis {
        0 => (1, nx, line_starts(p, 0, ny, nz)),
        1 => (full_x, ny, line_starts(p, 1, nx, nz)),
        _ => (full_x * full_y, nz, line_starts(p, 2, nx, ny)),
    };

    if len < 2 {
        return;
    }

    for start in starts {
        bufs.flags.clear();
        for i in 0..len {
            bufs.flags.push(mask.opaque_at(start + i * stride));
        }

        if bufs.flags.iter().all(|&f| !f) {
            continue;
        }

        lazy_split_flags(&mut bufs.flags, &mut bufs.flag_scratch);

        for (i, &f) in bufs.flags.iter().enumerate() {
            mask.flags_mut()[start + i * stride] = f;
        }
    }
}

/// The mask in coefficient (subband) domain after `levels` of lazy splits,
/// as the coding engines need it. Encoder and decoder both derive it from
/// the sample-domain mask, so it is never transmitted.
pub(crate) fn subband_domain_mask(p: &Pyramid, mask: &Mask, levels: usize) -> Mask {
    let mut m = mask.clone();
    let mut bufs = SaBufs::default();
    let (nx, ny, nz) = p.dims();

    for l in 0..levels {
        let dims = (
            approx_detail_len(nx, l).0,
            approx_detail_len(ny, l).0,
            if nz == 1 { 1 } else { approx_detail_len(nz, l).0 },
        );
        split_mask_level(&mut m, &mut bufs, p, dims);
    }

    m
}

fn validate(p: &Pyramid, mask: &Mask, levels: usize) -> Result<()> {
    use crate::error::{CodecError, bail};

    if mask.dims() != p.dims() {
        bail!(CodecError::WrongDims);
    }
    if levels > p.max_levels() {
        bail!(CodecError::UnsupportedTransform);
    }
    Ok(())
}
