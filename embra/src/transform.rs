//! Separable N-D wavelet transform schedules over a [`Pyramid`].
//!
//! The dyadic schedule applies the 1D kernel along X, then Y, then Z on
//! each level and recurses into the approximation octant. The packet
//! schedule decouples the temporal (Z) level count from the spatial one:
//! every slice receives a 2D dyadic transform, then every Z column is
//! transformed on its own. The lazy kernel (a pure even/odd split) drives
//! the dyadic/packet reinterpretations without touching coefficient values.

use crate::error::{CodecError, Result, bail};
use crate::lifting;
use crate::math::{approx_detail_len, num_of_xforms};
use crate::pyramid::{Pyramid, TransformType};

/// The 1D kernel a schedule runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Cdf97,
    /// The trivial even/odd split; used to reinterpret layouts and to
    /// transform masks.
    Lazy,
}

/// Scratch buffers reused across all 1D passes of one transform.
#[derive(Debug, Default)]
struct LineBufs {
    line: Vec<f64>,
    scratch: Vec<f64>,
}

fn forward_1d(kernel: Kernel, line: &mut [f64], scratch: &mut Vec<f64>) {
    match kernel {
        Kernel::Cdf97 => lifting::forward_line(line, scratch),
        Kernel::Lazy => lazy_forward(line, scratch),
    }
}

fn inverse_1d(kernel: Kernel, line: &mut [f64], scratch: &mut Vec<f64>) {
    match kernel {
        Kernel::Cdf97 => lifting::inverse_line(line, scratch),
        Kernel::Lazy => lazy_inverse(line, scratch),
    }
}

/// De-interleave a line into `[even | odd]` without filtering.
pub(crate) fn lazy_forward(line: &mut [f64], scratch: &mut Vec<f64>) {
    if line.len() < 2 {
        return;
    }

    scratch.clear();
    scratch.extend(line.iter().step_by(2));
    scratch.extend(line.iter().skip(1).step_by(2));
    line.copy_from_slice(scratch);
}

/// Inverse of [`lazy_forward`].
pub(crate) fn lazy_inverse(line: &mut [f64], scratch: &mut Vec<f64>) {
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
}

/// Transform every X row of the `nx × ny × nz` prefix region.
fn pass_x(p: &mut Pyramid, kernel: Kernel, bufs: &mut LineBufs, nx: usize, ny: usize, nz: usize) {
    if nx < 2 {
        return;
    }

    for z in 0..nz {
        for y in 0..ny {
            let start = p.linearize(0, y, z);
            forward_1d(kernel, &mut p.data_mut()[start..start + nx], &mut bufs.scratch);
        }
    }
}

fn unpass_x(p: &mut Pyramid, kernel: Kernel, bufs: &mut LineBufs, nx: usize, ny: usize, nz: usize) {
    if nx < 2 {
        return;
    }

    for z in 0..nz {
        for y in 0..ny {
            let start = p.linearize(0, y, z);
            inverse_1d(kernel, &mut p.data_mut()[start..start + nx], &mut bufs.scratch);
        }
    }
}

/// Transform every strided line (Y columns or Z columns) of the prefix
/// region. `stride` is the element distance between consecutive samples.
fn pass_strided(
    p: &mut Pyramid,
    kernel: Kernel,
    bufs: &mut LineBufs,
    starts: impl Iterator<Item = usize>,
    stride: usize,
    len: usize,
    forward: bool,
) {
    if len < 2 {
        return;
    }

    for start in starts {
        bufs.line.clear();
        for i in 0..len {
            bufs.line.push(p.data()[start + i * stride]);
        }

        if forward {
            forward_1d(kernel, &mut bufs.line, &mut bufs.scratch);
        } else {
            inverse_1d(kernel, &mut bufs.line, &mut bufs.scratch);
        }

        for (i, &v) in bufs.line.iter().enumerate() {
            p.data_mut()[start + i * stride] = v;
        }
    }
}

fn y_starts(p: &Pyramid, nx: usize, nz: usize) -> Vec<usize> {
    let mut starts = Vec::with_capacity(nx * nz);
    for z in 0..nz {
        for x in 0..nx {
            starts.push(p.linearize(x, 0, z));
        }
    }
    starts
}

fn z_starts(p: &Pyramid, nx: usize, ny: usize) -> Vec<usize> {
    let mut starts = Vec::with_capacity(nx * ny);
    for y in 0..ny {
        for x in 0..nx {
            starts.push(p.linearize(x, y, 0));
        }
    }
    starts
}

/// One forward dyadic level on the `nx × ny × nz` prefix: X, then Y, then Z.
fn forward_level(p: &mut Pyramid, kernel: Kernel, bufs: &mut LineBufs, dims: (usize, usize, usize)) {
    let (nx, ny, nz) = dims;
    let (y_stride, z_stride) = {
        let (full_x, full_y, _) = p.dims();
        (full_x, full_x * full_y)
    };

    pass_x(p, kernel, bufs, nx, ny, nz);
    let starts = y_starts(p, nx, nz);
    pass_strided(p, kernel, bufs, starts.into_iter(), y_stride, ny, true);
    if nz > 1 {
        let starts = z_starts(p, nx, ny);
        pass_strided(p, kernel, bufs, starts.into_iter(), z_stride, nz, true);
    }
}

/// Inverse of [`forward_level`]: Z, then Y, then X.
fn inverse_level(p: &mut Pyramid, kernel: Kernel, bufs: &mut LineBufs, dims: (usize, usize, usize)) {
    let (nx, ny, nz) = dims;
    let (y_stride, z_stride) = {
        let (full_x, full_y, _) = p.dims();
        (full_x, full_x * full_y)
    };

    if nz > 1 {
        let starts = z_starts(p, nx, ny);
        pass_strided(p, kernel, bufs, starts.into_iter(), z_stride, nz, false);
    }
    let starts = y_starts(p, nx, nz);
    pass_strided(p, kernel, bufs, starts.into_iter(), y_stride, ny, false);
    unpass_x(p, kernel, bufs, nx, ny, nz);
}

/// Per-level prefix extents of a dyadic decomposition.
fn level_dims(p: &Pyramid, levels: usize) -> Vec<(usize, usize, usize)> {
    let (nx, ny, nz) = p.dims();
    (0..levels)
        .map(|l| {
            (
                approx_detail_len(nx, l).0,
                approx_detail_len(ny, l).0,
                if nz == 1 { 1 } else { approx_detail_len(nz, l).0 },
            )
        })
        .collect()
}

fn dwt_dyadic_kernel(p: &mut Pyramid, levels: usize, kernel: Kernel) -> Result<()> {
    p.check_decimated()?;
    let (nx, ny, nz) = p.dims();

    let max = if nz == 1 {
        num_of_xforms(nx.min(ny))
    } else {
        num_of_xforms(nx.min(ny).min(nz))
    };
    // The lazy kernel has no support constraint; it only reorders.
    if kernel == Kernel::Cdf97 && levels > max {
        bail!(CodecError::UnsupportedTransform);
    }

    let mut bufs = LineBufs::default();
    for dims in level_dims(p, levels) {
        forward_level(p, kernel, &mut bufs, dims);
    }

    p.set_transform(TransformType::Dyadic, levels, levels);
    Ok(())
}

fn idwt_dyadic_kernel(p: &mut Pyramid, kernel: Kernel) -> Result<()> {
    p.check_decimated()?;
    if p.transform_type() != TransformType::Dyadic {
        bail!(CodecError::UnsupportedTransform);
    }

    let levels = p.spatial_levels();
    let mut bufs = LineBufs::default();
    for dims in level_dims(p, levels).into_iter().rev() {
        inverse_level(p, kernel, &mut bufs, dims);
    }

    p.set_transform(TransformType::Dyadic, 0, 0);
    Ok(())
}

fn dwt_packet_kernel(
    p: &mut Pyramid,
    temporal_levels: usize,
    spatial_levels: usize,
    kernel: Kernel,
) -> Result<()> {
    p.check_decimated()?;
    let (nx, ny, nz) = p.dims();
    if nz == 1 {
        // A packet decomposition needs a real Z axis.
        bail!(CodecError::UnsupportedTransform);
    }
    if kernel == Kernel::Cdf97
        && (spatial_levels > num_of_xforms(nx.min(ny)) || temporal_levels > num_of_xforms(nz))
    {
        bail!(CodecError::UnsupportedTransform);
    }

    let mut bufs = LineBufs::default();

    // Spatial: a 2D dyadic transform of every slice.
    let y_stride = nx;
    for l in 0..spatial_levels {
        let lx = approx_detail_len(nx, l).0;
        let ly = approx_detail_len(ny, l).0;
        pass_x(p, kernel, &mut bufs, lx, ly, nz);
        let starts = y_starts(p, lx, nz);
        pass_strided(p, kernel, &mut bufs, starts.into_iter(), y_stride, ly, true);
    }

    // Temporal: a 1D dyadic transform of every Z column.
    let z_stride = nx * ny;
    for l in 0..temporal_levels {
        let lz = approx_detail_len(nz, l).0;
        let starts = z_starts(p, nx, ny);
        pass_strided(p, kernel, &mut bufs, starts.into_iter(), z_stride, lz, true);
    }

    p.set_transform(TransformType::Packet, temporal_levels, spatial_levels);
    Ok(())
}

fn idwt_packet_kernel(p: &mut Pyramid, kernel: Kernel) -> Result<()> {
    p.check_decimated()?;
    if p.transform_type() != TransformType::Packet {
        bail!(CodecError::UnsupportedTransform);
    }

    let (nx, ny, nz) = p.dims();
    let temporal_levels = p.temporal_levels();
    let spatial_levels = p.spatial_levels();
    let mut bufs = LineBufs::default();

    let z_stride = nx * ny;
    for l in (0..temporal_levels).rev() {
        let lz = approx_detail_len(nz, l).0;
        let starts = z_starts(p, nx, ny);
        pass_strided(p, kernel, &mut bufs, starts.into_iter(), z_stride, lz, false);
    }

    let y_stride = nx;
    for l in (0..spatial_levels).rev() {
        let lx = approx_detail_len(nx, l).0;
        let ly = approx_detail_len(ny, l).0;
        let starts = y_starts(p, lx, nz);
        pass_strided(p, kernel, &mut bufs, starts.into_iter(), y_stride, ly, false);
        pass_x(p, kernel, &mut bufs, lx, ly, nz);
    }

    p.set_transform(TransformType::Dyadic, 0, 0);
    Ok(())
}

impl Pyramid {
    /// Largest dyadic level count the extents support.
    pub fn max_levels(&self) -> usize {
        let (nx, ny, nz) = self.dims();
        if nz == 1 {
            num_of_xforms(nx.min(ny))
        } else {
            num_of_xforms(nx.min(ny).min(nz))
        }
    }

    /// Forward dyadic transform with the given level count.
    pub fn dwt(&mut self, levels: usize) -> Result<()> {
        dwt_dyadic_kernel(self, levels, Kernel::Cdf97)
    }

    /// Inverse dyadic transform, restoring the sample domain.
    pub fn idwt(&mut self) -> Result<()> {
        idwt_dyadic_kernel(self, Kernel::Cdf97)
    }

    /// Forward packet transform with independent temporal/spatial levels.
    pub fn dwt_packet(&mut self, temporal_levels: usize, spatial_levels: usize) -> Result<()> {
        dwt_packet_kernel(self, temporal_levels, spatial_levels, Kernel::Cdf97)
    }

    /// Inverse packet transform.
    pub fn idwt_packet(&mut self) -> Result<()> {
        idwt_packet_kernel(self, Kernel::Cdf97)
    }

    /// Reinterpret a dyadic decomposition as a packet one with the given
    /// level counts, using the lazy wavelet so that no coefficient values
    /// change.
    pub fn dyadic_to_packet(&mut self, temporal_levels: usize, spatial_levels: usize) -> Result<()> {
        if self.transform_type() != TransformType::Dyadic || self.spatial_levels() == 0 {
            bail!(CodecError::UnsupportedTransform);
        }

        idwt_dyadic_kernel(self, Kernel::Lazy)?;
        dwt_packet_kernel(self, temporal_levels, spatial_levels, Kernel::Lazy)
    }

    /// Reinterpret a packet decomposition as a dyadic one.
    pub fn packet_to_dyadic(&mut self, levels: usize) -> Result<()> {
        if self.transform_type() != TransformType::Packet {
            bail!(CodecError::UnsupportedTransform);
        }

        idwt_packet_kernel(self, Kernel::Lazy)?;
        dwt_dyadic_kernel(self, levels, Kernel::Lazy)
    }

    /// Forward dyadic transform with the Lindstrom boundary kernel. The
    /// level count follows from the extents; the per-level layout places
    /// `(n + 6) / 2` scaling coefficients first on each axis.
    pub fn dwt_lindstrom(&mut self) -> Result<()> {
        self.check_decimated()?;
        let (nx, ny, nz) = self.dims();
        let levels = if nz == 1 {
            lifting::lindstrom_levels(nx.min(ny))
        } else {
            lifting::lindstrom_levels(nx.min(ny).min(nz))
        };

        let mut scratch = vec![];
        let mut line = vec![];
        let (mut lx, mut ly, mut lz) = (nx, ny, if nz == 1 { 1 } else { nz });
        let y_stride = nx;
        let z_stride = nx * ny;

        for _ in 0..levels {
            for z in 0..lz {
                for y in 0..ly {
                    let start = self.linearize(0, y, z);
                    lifting::forward_lindstrom(&mut self.data_mut()[start..start + lx], &mut scratch);
                }
            }
            for start in y_starts(self, lx, lz) {
                gather(self.data(), start, y_stride, ly, &mut line);
                lifting::forward_lindstrom(&mut line, &mut scratch);
                scatter(self.data_mut(), start, y_stride, &line);
            }
            if lz > 1 {
                for start in z_starts(self, lx, ly) {
                    gather(self.data(), start, z_stride, lz, &mut line);
                    lifting::forward_lindstrom(&mut line, &mut scratch);
                    scatter(self.data_mut(), start, z_stride, &line);
                }
            }

            lx = lifting::lindstrom_scaling_len(lx);
            ly = lifting::lindstrom_scaling_len(ly);
            if lz > 1 {
                lz = lifting::lindstrom_scaling_len(lz);
            }
        }

        Ok(())
    }

    /// Inverse of [`Pyramid::dwt_lindstrom`].
    pub fn idwt_lindstrom(&mut self) -> Result<()> {
        self.check_decimated()?;
        let (nx, ny, nz) = self.dims();
        let levels = if nz == 1 {
            lifting::lindstrom_levels(nx.min(ny))
        } else {
            lifting::lindstrom_levels(nx.min(ny).min(nz))
        };

        // Per-level lengths along each axis, replayed backwards.
        let counts = |n: usize| {
            let mut v = vec![n];
            for i in 0..levels {
                v.push(lifting::lindstrom_scaling_len(v[i]));
            }
            v
        };
        let cx = counts(nx);
        let cy = counts(ny);
        let cz = counts(nz);

        let mut scratch = vec![];
        let mut line = vec![];
        let y_stride = nx;
        let z_stride = nx * ny;

        for l in (0..levels).rev() {
            let (lx, ly) = (cx[l], cy[l]);
            let lz = if nz == 1 { 1 } else { cz[l] };

            if lz > 1 {
                for start in z_starts(self, lx, ly) {
                    gather(self.data(), start, z_stride, lz, &mut line);
                    lifting::inverse_lindstrom(&mut line, &mut scratch);
                    scatter(self.data_mut(), start, z_stride, &line);
                }
            }
            for start in y_starts(self, lx, lz) {
                gather(self.data(), start, y_stride, ly, &mut line);
                lifting::inverse_lindstrom(&mut line, &mut scratch);
                scatter(self.data_mut(), start, y_stride, &line);
            }
            for z in 0..lz {
                for y in 0..ly {
                    let start = self.linearize(0, y, z);
                    lifting::inverse_lindstrom(&mut self.data_mut()[start..start + lx], &mut scratch);
                }
            }
        }

        Ok(())
    }
}

fn gather(data: &[f64], start: usize, stride: usize, len: usize, line: &mut Vec<f64>) {
    line.clear();
    for i in 0..len {
        line.push(data[start + i * stride]);
    }
}

fn scatter(data: &mut [f64], start: usize, stride: usize, line: &[f64]) {
    for (i, &v) in line.iter().enumerate() {
        data[start + i * stride] = v;
    }
}
