//! Midtread uniform scalar quantization and integer width selection.
//!
//! `n = round_ties_even(c / q)`; the magnitudes feed the set-partitioning
//! coders and the signs travel in a separate bit-vector. The chosen
//! integer width is never transmitted: it is derivable from the number of
//! bit-planes announced in the stream header.

use crate::error::{CodecError, Result, bail};

/// Quantized coefficients: magnitudes plus a sign array (`true` = non-negative).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Quantized {
    pub magnitudes: Vec<u64>,
    pub signs: Vec<bool>,
    pub max_magnitude: u64,
}

/// Midtread quantization of a coefficient array.
///
/// Fails with `QzInvalid` when the step is not positive, any value is not
/// finite, or a quotient overflows the signed 64-bit range.
pub(crate) fn quantize(vals: &[f64], q: f64) -> Result<Quantized> {
    if !(q > 0.0) || !q.is_finite() {
        bail!(CodecError::QzInvalid);
    }

    let mut magnitudes = Vec::with_capacity(vals.len());
    let mut signs = Vec::with_capacity(vals.len());
    let mut max_magnitude = 0u64;

    for &v in vals {
        if !v.is_finite() {
            bail!(CodecError::QzInvalid);
        }

        let scaled = v / q;
        if scaled.abs() >= i64::MAX as f64 {
            bail!(CodecError::QzInvalid);
        }

        let n = scaled.round_ties_even() as i64;
        let mag = n.unsigned_abs();
        magnitudes.push(mag);
        signs.push(n >= 0);
        max_magnitude = max_magnitude.max(mag);
    }

    Ok(Quantized {
        magnitudes,
        signs,
        max_magnitude,
    })
}

/// Inverse quantization: `c = sign · n · q`, with zero magnitudes yielding
/// exact zeros.
pub(crate) fn dequantize(magnitudes: &[u64], signs: &[bool], q: f64) -> Vec<f64> {
    magnitudes
        .iter()
        .zip(signs)
        .map(|(&m, &s)| {
            let v = m as f64 * q;
            if s { v } else { -v }
        })
        .collect()
}

/// The exact mean squared error midtread quantization with step `q` would
/// introduce on this array: the mean of the squared round-to-nearest-even
/// remainders.
pub(crate) fn estimate_mse_midtread(vals: &[f64], q: f64) -> f64 {
    debug_assert!(q > 0.0);

    let mut sum = 0.0;
    let mut comp = 0.0;
    for &v in vals {
        let diff = v - (v / q).round_ties_even() * q;
        let y = diff * diff - comp;
        let t = sum + y;
        comp = (t - sum) - y;
        sum = t;
    }

    sum / vals.len() as f64
}

/// Storage type for coefficient magnitudes. The coding engines are generic
/// over this so that shallow streams keep their working set small; all
/// threshold arithmetic happens in `u64`.
pub(crate) trait MagInt: Copy + Default + PartialEq + core::fmt::Debug {
    fn from_u64(v: u64) -> Self;
    fn to_u64(self) -> u64;
}

macro_rules! mag_int {
    ($($t:ty),+) => {
        $(impl MagInt for $t {
            #[inline(always)]
            fn from_u64(v: u64) -> Self {
                debug_assert!(v <= <$t>::MAX as u64);
                v as $t
            }

            #[inline(always)]
            fn to_u64(self) -> u64 {
                self as u64
            }
        })+
    };
}

mag_int!(u8, u16, u32, u64);

/// Narrow a `u64` magnitude buffer into the given width.
pub(crate) fn narrow<T: MagInt>(mags: &[u64]) -> Vec<T> {
    mags.iter().map(|&m| T::from_u64(m)).collect()
}

/// The four storage widths the integer coder runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    /// Magnitudes fit in a byte.
    U8,
    /// Magnitudes fit in 16 bits.
    U16,
    /// Magnitudes fit in 32 bits.
    U32,
    /// Full 64-bit magnitudes.
    U64,
}

impl IntWidth {
    /// Smallest width holding the given maximum magnitude.
    pub(crate) fn for_max_magnitude(max: u64) -> Self {
        if max <= u8::MAX as u64 {
            Self::U8
        } else if max <= u16::MAX as u64 {
            Self::U16
        } else if max <= u32::MAX as u64 {
            Self::U32
        } else {
            Self::U64
        }
    }

    /// The width a decoder derives from the announced bit-plane count.
    pub fn for_bitplanes(num_bitplanes: u8) -> Self {
        if num_bitplanes <= 8 {
            Self::U8
        } else if num_bitplanes <= 16 {
            Self::U16
        } else if num_bitplanes <= 32 {
            Self::U32
        } else {
            Self::U64
        }
    }

    /// Storage size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_ties_to_even() {
        let q = quantize(&[0.5, 1.5, 2.5, -0.5, -1.5], 1.0).unwrap();
        assert_eq!(q.magnitudes, vec![0, 2, 2, 0, 2]);
        assert_eq!(q.signs, vec![true, true, true, true, false]);
    }

    #[test]
    fn round_trip_error_is_bounded_by_half_step() {
        let vals: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.77).sin() * 40.0).collect();
        let q = 0.125;

        let quantized = quantize(&vals, q).unwrap();
        let recon = dequantize(&quantized.magnitudes, &quantized.signs, q);

        for (a, b) in vals.iter().zip(&recon) {
            assert!((a - b).abs() <= q / 2.0 + 1e-12);
        }
    }

    #[test]
    fn estimate_matches_actual_mse() {
        let vals: Vec<f64> = (0..500).map(|i| (i as f64 * 1.3).cos() * 7.0).collect();
        let q = 0.25;

        let quantized = quantize(&vals, q).unwrap();
        let recon = dequantize(&quantized.magnitudes, &quantized.signs, q);
        let actual: f64 = vals
            .iter()
            .zip(&recon)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            / vals.len() as f64;

        let estimated = estimate_mse_midtread(&vals, q);
        assert!((actual - estimated).abs() < 1e-12);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(quantize(&[1.0], 0.0), Err(CodecError::QzInvalid));
        assert_eq!(quantize(&[1.0], -1.0), Err(CodecError::QzInvalid));
        assert_eq!(quantize(&[f64::NAN], 1.0), Err(CodecError::QzInvalid));
        assert_eq!(quantize(&[f64::INFINITY], 1.0), Err(CodecError::QzInvalid));
        // Quotient overflow.
        assert_eq!(quantize(&[1e300], 1e-300), Err(CodecError::QzInvalid));
    }

    #[test]
    fn zero_magnitudes_yield_exact_zero() {
        let recon = dequantize(&[0, 3], &[false, false], 0.1);
        assert_eq!(recon[0], 0.0);
        assert!(recon[0].is_sign_positive());
    }

    #[test]
    fn width_from_max_magnitude() {
        assert_eq!(IntWidth::for_max_magnitude(0), IntWidth::U8);
        assert_eq!(IntWidth::for_max_magnitude(255), IntWidth::U8);
        assert_eq!(IntWidth::for_max_magnitude(256), IntWidth::U16);
        assert_eq!(IntWidth::for_max_magnitude(65535), IntWidth::U16);
        assert_eq!(IntWidth::for_max_magnitude(65536), IntWidth::U32);
        assert_eq!(IntWidth::for_max_magnitude(u32::MAX as u64), IntWidth::U32);
        assert_eq!(IntWidth::for_max_magnitude(u32::MAX as u64 + 1), IntWidth::U64);
    }

    #[test]
    fn width_from_bitplanes_matches_header_rule() {
        assert_eq!(IntWidth::for_bitplanes(1), IntWidth::U8);
        assert_eq!(IntWidth::for_bitplanes(8), IntWidth::U8);
        assert_eq!(IntWidth::for_bitplanes(9), IntWidth::U16);
        assert_eq!(IntWidth::for_bitplanes(16), IntWidth::U16);
        assert_eq!(IntWidth::for_bitplanes(17), IntWidth::U32);
        assert_eq!(IntWidth::for_bitplanes(32), IntWidth::U32);
        assert_eq!(IntWidth::for_bitplanes(33), IntWidth::U64);
        assert_eq!(IntWidth::for_bitplanes(64), IntWidth::U64);
        assert_eq!(IntWidth::for_bitplanes(32).bytes(), 4);
    }
}
