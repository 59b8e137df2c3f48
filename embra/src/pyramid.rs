//! The subband pyramid: a coefficient volume of the same extent as the
//! input plus the geometry queries that locate each subband inside it.
//!
//! The volume is stored as one flat vector in row-major, z-major order;
//! `linearize(x, y, z) = (z * ny + y) * nx + x`. Images are volumes with
//! `nz = 1` and use the 2D subband enumeration.

use crate::error::{CodecError, Result, bail};
use crate::math::approx_detail_len;

/// How the pyramid was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformType {
    /// Only the approximation subband is recursively decomposed; spatial
    /// and temporal level counts are equal.
    Dyadic,
    /// Independent temporal (Z) and spatial (XY) level counts.
    Packet,
}

/// Approximation (`high = false`) or detail (`high = true`) extent of one
/// axis after `level` transform levels.
pub(crate) fn subband_length(n: usize, level: usize, high: bool) -> usize {
    if level == 0 {
        debug_assert!(!high);
        return n;
    }

    let (low, high_len) = approx_detail_len(n, level);
    if high { high_len } else { low }
}

/// A coefficient volume plus its subband bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Pyramid {
    data: Vec<f64>,
    nx: usize,
    ny: usize,
    nz: usize,
    transform_type: TransformType,
    spatial_levels: usize,
    temporal_levels: usize,
    /// Phase origin of a redundant-transform variant; must stay zero on the
    /// decimated path.
    origin: [usize; 3],
    /// Subsampling phase of a redundant-transform variant; must stay zero
    /// on the decimated path.
    subsample_pattern: [usize; 3],
}

impl Pyramid {
    /// An untransformed pyramid of the given extents, filled with zeros.
    pub fn new(nx: usize, ny: usize, nz: usize) -> Result<Self> {
        if nx == 0 || ny == 0 || nz == 0 {
            bail!(CodecError::WrongDims);
        }

        Ok(Self {
            data: vec![0.0; nx * ny * nz],
            nx,
            ny,
            nz,
            transform_type: TransformType::Dyadic,
            spatial_levels: 0,
            temporal_levels: 0,
            origin: [0; 3],
            subsample_pattern: [0; 3],
        })
    }

    /// Wrap an existing sample volume.
    pub fn from_data(data: Vec<f64>, nx: usize, ny: usize, nz: usize) -> Result<Self> {
        if nx == 0 || ny == 0 || nz == 0 || data.len() != nx * ny * nz {
            bail!(CodecError::WrongDims);
        }

        Ok(Self {
            data,
            nx,
            ny,
            nz,
            transform_type: TransformType::Dyadic,
            spatial_levels: 0,
            temporal_levels: 0,
            origin: [0; 3],
            subsample_pattern: [0; 3],
        })
    }

    /// Volume extents `(nx, ny, nz)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    /// Whether this pyramid is a 2D slice.
    pub fn is_2d(&self) -> bool {
        self.nz == 1
    }

    /// The transform the coefficients currently represent.
    pub fn transform_type(&self) -> TransformType {
        self.transform_type
    }

    /// Spatial (XY) level count.
    pub fn spatial_levels(&self) -> usize {
        self.spatial_levels
    }

    /// Temporal (Z) level count. Equal to the spatial count in dyadic mode.
    pub fn temporal_levels(&self) -> usize {
        self.temporal_levels
    }

    pub(crate) fn set_transform(
        &mut self,
        transform_type: TransformType,
        temporal_levels: usize,
        spatial_levels: usize,
    ) {
        self.transform_type = transform_type;
        self.temporal_levels = temporal_levels;
        self.spatial_levels = spatial_levels;
    }

    /// Set the redundant-variant phase origin.
    pub fn set_origin(&mut self, origin: [usize; 3]) {
        self.origin = origin;
    }

    /// Set the redundant-variant subsampling phase.
    pub fn set_subsample_pattern(&mut self, pattern: [usize; 3]) {
        self.subsample_pattern = pattern;
    }

    /// The decimated coding path requires both phase triples to be zero.
    pub(crate) fn check_decimated(&self) -> Result<()> {
        if self.origin != [0; 3] || self.subsample_pattern != [0; 3] {
            bail!(CodecError::UnsupportedTransform);
        }
        Ok(())
    }

    /// The flat coefficient buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The flat coefficient buffer, mutably.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consume the pyramid, returning its coefficient buffer.
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    #[inline]
    pub(crate) fn linearize(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.ny + y) * self.nx + x
    }

    /// Number of subbands in the current decomposition.
    pub fn num_subbands(&self) -> usize {
        match self.transform_type {
            TransformType::Dyadic => {
                let per_level = if self.is_2d() { 3 } else { 7 };
                per_level * self.spatial_levels + 1
            }
            TransformType::Packet => {
                (3 * self.spatial_levels + 1) * (self.temporal_levels + 1)
            }
        }
    }

    /// Spatial subband count of the packet decomposition's XY pyramid.
    fn spatial_num_subbands(&self) -> usize {
        3 * self.spatial_levels + 1
    }

    /// The `(temporal, spatial)` level a subband belongs to.
    pub fn level_from_subband(&self, subband: usize) -> (usize, usize) {
        match self.transform_type {
            TransformType::Dyadic => {
                let per_level = if self.is_2d() { 3 } else { 7 };
                let level = if subband == 0 || self.spatial_levels == 0 {
                    self.spatial_levels
                } else {
                    self.spatial_levels - (subband - 1) / per_level
                };
                (level, level)
            }
            TransformType::Packet => {
                let spatial_count = self.spatial_num_subbands();
                let temporal = if subband < spatial_count {
                    self.temporal_levels
                } else {
                    self.temporal_levels - subband / spatial_count + 1
                };
                let spatial_sub = subband % spatial_count;
                let spatial = if spatial_sub == 0 || self.spatial_levels == 0 {
                    self.spatial_levels
                } else {
                    self.spatial_levels - (spatial_sub - 1) / 3
                };
                (temporal, spatial)
            }
        }
    }

    /// Which axes of a subband carry detail coefficients, as
    /// `(x_high, y_high, z_high)`.
    fn subband_flags(&self, subband: usize) -> (bool, bool, bool) {
        if subband == 0 {
            return (false, false, false);
        }

        match self.transform_type {
            TransformType::Dyadic => {
                if self.is_2d() {
                    match (subband - 1) % 3 {
                        0 => (false, true, false),
                        1 => (true, false, false),
                        _ => (true, true, false),
                    }
                } else {
                    match (subband - 1) % 7 {
                        0 => (false, true, false),
                        1 => (true, false, false),
                        2 => (false, false, true),
                        3 => (true, true, false),
                        4 => (false, true, true),
                        5 => (true, false, true),
                        _ => (true, true, true),
                    }
                }
            }
            TransformType::Packet => {
                let spatial_count = self.spatial_num_subbands();
                let z_high = subband >= spatial_count;
                let spatial_sub = subband % spatial_count;
                let (x_high, y_high) = if spatial_sub == 0 {
                    (false, false)
                } else {
                    match (spatial_sub - 1) % 3 {
                        0 => (false, true),
                        1 => (true, false),
                        _ => (true, true),
                    }
                };
                (x_high, y_high, z_high)
            }
        }
    }

    /// Extent of one subband as `(nx, ny, nz)`.
    ///
    /// A subband with any zero axis reports `(0, 0, 0)`.
    pub fn subband_size(&self, subband: usize) -> (usize, usize, usize) {
        let (t_level, s_level) = self.level_from_subband(subband);
        let (x_high, y_high, z_high) = self.subband_flags(subband);

        let nx = subband_length(self.nx, s_level, x_high);
        let ny = subband_length(self.ny, s_level, y_high);
        let nz = subband_length(self.nz, t_level, z_high);

        if nx == 0 || ny == 0 || nz == 0 {
            (0, 0, 0)
        } else {
            (nx, ny, nz)
        }
    }

    /// Origin of one subband as `(x, y, z)`.
    pub fn subband_origin(&self, subband: usize) -> (usize, usize, usize) {
        let (t_level, s_level) = self.level_from_subband(subband);
        let (x_high, y_high, z_high) = self.subband_flags(subband);

        let x = if x_high {
            subband_length(self.nx, s_level, false)
        } else {
            0
        };
        let y = if y_high {
            subband_length(self.ny, s_level, false)
        } else {
            0
        };
        let z = if z_high {
            subband_length(self.nz, t_level, false)
        } else {
            0
        };

        (x, y, z)
    }

    /// Clear one subband to zero. Used for progressive ablation.
    pub fn zero_subband(&mut self, subband: usize) {
        let (sx, sy, sz) = self.subband_size(subband);
        let (ox, oy, oz) = self.subband_origin(subband);

        for z in oz..oz + sz {
            for y in oy..oy + sy {
                let start = self.linearize(ox, y, z);
                self.data[start..start + sx].fill(0.0);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn pyramid_17_cubed() -> Pyramid {
        let mut p = Pyramid::new(17, 17, 17).unwrap();
        p.set_transform(TransformType::Dyadic, 2, 2);
        p
    }

    #[test]
    fn dyadic_subband_count() {
        let p = pyramid_17_cubed();
        assert_eq!(p.num_subbands(), 15);

        let mut p2 = Pyramid::new(32, 32, 1).unwrap();
        p2.set_transform(TransformType::Dyadic, 3, 3);
        assert_eq!(p2.num_subbands(), 10);
    }

    #[test]
    fn packet_subband_count() {
        let mut p = Pyramid::new(32, 32, 8).unwrap();
        p.set_transform(TransformType::Packet, 1, 2);
        assert_eq!(p.num_subbands(), 14);
    }

    #[test]
    fn approximation_subband_geometry() {
        let p = pyramid_17_cubed();
        assert_eq!(p.subband_size(0), (5, 5, 5));
        assert_eq!(p.subband_origin(0), (0, 0, 0));
    }

    #[test]
    fn detail_cube_geometry() {
        let p = pyramid_17_cubed();
        // Subband 7 is the all-detail cube of the coarsest level: detail
        // extent 17 -> 9 -> 4 on every axis, placed after the 5-sample
        // approximation run.
        assert_eq!(p.subband_size(7), (4, 4, 4));
        assert_eq!(p.subband_origin(7), (5, 5, 5));

        // Subband 14 is the all-detail cube of the finest level.
        assert_eq!(p.subband_size(14), (8, 8, 8));
        assert_eq!(p.subband_origin(14), (9, 9, 9));
    }

    #[test]
    fn subband_volumes_sum_to_extent() {
        for dims in [(17, 17, 17), (12, 13, 15), (16, 16, 16), (9, 33, 20)] {
            let mut p = Pyramid::new(dims.0, dims.1, dims.2).unwrap();
            p.set_transform(TransformType::Dyadic, 2, 2);

            let total: usize = (0..p.num_subbands())
                .map(|s| {
                    let (x, y, z) = p.subband_size(s);
                    x * y * z
                })
                .sum();
            assert_eq!(total, dims.0 * dims.1 * dims.2, "dims {dims:?}");
        }
    }

    #[test]
    fn packet_subband_volumes_sum_to_extent() {
        let mut p = Pyramid::new(24, 20, 10).unwrap();
        p.set_transform(TransformType::Packet, 1, 2);

        let total: usize = (0..p.num_subbands())
            .map(|s| {
                let (x, y, z) = p.subband_size(s);
                x * y * z
            })
            .sum();
        assert_eq!(total, 24 * 20 * 10);
    }

    #[test]
    fn two_dimensional_geometry() {
        let mut p = Pyramid::new(17, 17, 1).unwrap();
        p.set_transform(TransformType::Dyadic, 2, 2);

        assert_eq!(p.num_subbands(), 7);
        assert_eq!(p.subband_size(0), (5, 5, 1));
        // Subband 3 is the HH of the coarsest level.
        assert_eq!(p.subband_size(3), (4, 4, 1));
        assert_eq!(p.subband_origin(3), (5, 5, 0));

        let total: usize = (0..7)
            .map(|s| {
                let (x, y, z) = p.subband_size(s);
                x * y * z
            })
            .sum();
        assert_eq!(total, 17 * 17);
    }

    #[test]
    fn zero_subband_clears_exactly_its_region() {
        let mut p = pyramid_17_cubed();
        p.data_mut().fill(1.0);
        p.zero_subband(7);

        let zeroed = p.data().iter().filter(|&&v| v == 0.0).count();
        assert_eq!(zeroed, 4 * 4 * 4);
    }

    #[test]
    fn rejects_empty_dims() {
        assert!(Pyramid::new(0, 4, 4).is_err());
        assert!(Pyramid::from_data(vec![0.0; 10], 3, 3, 1).is_err());
    }
}
