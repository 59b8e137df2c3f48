//! The outlier coder: exact correction of samples whose reconstruction
//! error exceeds the point-wise tolerance.
//!
//! After a lossy round trip the encoder quantizes each offending residual
//! with a midtread step equal to the tolerance, which bounds the corrected
//! error by half the tolerance. The residual magnitudes travel as a 1D
//! SPECK stream (the octree partitioner degenerates to bisection on a
//! line); the positions follow bit-packed at the smallest width that can
//! address the volume. The whole section is self-delimited.

use embra_common::bit::{BitReader, BitWriter};

use crate::error::{CodecError, Result, bail};
use crate::speck::{SpeckDecoder, SpeckEncoder, SubbandSpec};

/// One sample needing correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Outlier {
    pub(crate) pos: u64,
    pub(crate) err: f64,
}

/// Fixed part of the section: outlier count and the byte length of the
/// residual stream.
const SECTION_HEADER_LEN: usize = 16;
/// Header of the embedded residual stream: bit-plane count and useful bits.
const STREAM_HEADER_LEN: usize = 9;

fn position_bits(total_len: u64) -> u32 {
    debug_assert!(total_len > 0);
    (64 - (total_len - 1).leading_zeros()).max(1)
}

fn line_subband(count: usize) -> Vec<SubbandSpec> {
    vec![SubbandSpec {
        origin: (0, 0, 0),
        size: (count, 1, 1),
        level: 0,
    }]
}

/// Encode the outlier section. `total_len` is the sample count of the
/// volume, which fixes the position width.
pub(crate) fn encode(outliers: &[Outlier], total_len: u64, tolerance: f64) -> Result<Vec<u8>> {
    debug_assert!(!outliers.is_empty());
    debug_assert!(tolerance > 0.0);

    let count = outliers.len();
    let mut mags = Vec::with_capacity(count);
    let mut signs = Vec::with_capacity(count);
    for o in outliers {
        let n = (o.err / tolerance).round_ties_even();
        if !n.is_finite() || n.abs() >= i64::MAX as f64 {
            bail!(CodecError::QzInvalid);
        }
        let n = n as i64;
        // Residuals below the tolerance are not outliers in the first
        // place, so each magnitude is at least one.
        debug_assert!(n != 0);
        mags.push(n.unsigned_abs());
        signs.push(n >= 0);
    }

    let dims = (count, 1, 1);
    let subbands = line_subband(count);
    let mut engine = SpeckEncoder::new(mags, signs, dims, &subbands, None, None);
    let num_bitplanes = engine.num_bitplanes();
    while engine.planes_remaining() > 0 {
        if engine.sorting_pass()?.is_some() || engine.refinement_pass()?.is_some() {
            bail!(CodecError::Internal);
        }
        engine.next_plane();
    }
    let (payload, useful_bits) = engine.finish();

    let stream_len = STREAM_HEADER_LEN + payload.len();

    let mut out = Vec::with_capacity(SECTION_HEADER_LEN + stream_len + count);
    out.extend_from_slice(&(count as u64).to_le_bytes());
    out.extend_from_slice(&(stream_len as u64).to_le_bytes());
    out.push(num_bitplanes);
    out.extend_from_slice(&useful_bits.to_le_bytes());
    out.extend_from_slice(&payload);

    let width = position_bits(total_len);
    let mut writer = BitWriter::new();
    for o in outliers {
        for i in (0..width).rev() {
            writer.put_bit((o.pos >> i) & 1 == 1);
        }
    }
    out.extend_from_slice(&writer.finish());

    Ok(out)
}

/// Total byte length of the section starting at `data`.
pub(crate) fn full_len(data: &[u8], total_len: u64) -> Result<usize> {
    if data.len() < SECTION_HEADER_LEN {
        bail!(CodecError::BitstreamTruncated);
    }

    let count = u64::from_le_bytes(data[..8].try_into().unwrap()) as usize;
    let stream_len = u64::from_le_bytes(data[8..16].try_into().unwrap()) as usize;
    let position_bytes = (count * position_bits(total_len) as usize).div_ceil(8);

    Ok(SECTION_HEADER_LEN + stream_len + position_bytes)
}

/// Decode the outlier section.
pub(crate) fn decode(data: &[u8], total_len: u64, tolerance: f64) -> Result<Vec<Outlier>> {
    if data.len() < SECTION_HEADER_LEN + STREAM_HEADER_LEN {
        bail!(CodecError::BitstreamTruncated);
    }

    let count = u64::from_le_bytes(data[..8].try_into().unwrap()) as usize;
    let stream_len = u64::from_le_bytes(data[8..16].try_into().unwrap()) as usize;
    if count == 0 || stream_len < STREAM_HEADER_LEN {
        bail!(CodecError::BitstreamCorrupt);
    }
    if data.len() < SECTION_HEADER_LEN + stream_len {
        bail!(CodecError::BitstreamTruncated);
    }

    let num_bitplanes = data[SECTION_HEADER_LEN];
    if num_bitplanes == 0 || num_bitplanes > 64 {
        bail!(CodecError::BitstreamCorrupt);
    }
    let useful_bits =
        u64::from_le_bytes(data[SECTION_HEADER_LEN + 1..SECTION_HEADER_LEN + 9].try_into().unwrap());
    let payload = &data[SECTION_HEADER_LEN + STREAM_HEADER_LEN..SECTION_HEADER_LEN + stream_len];

    let dims = (count, 1, 1);
    let subbands = line_subband(count);
    let mut engine: SpeckDecoder<'_, u64> =
        SpeckDecoder::new(payload, useful_bits, num_bitplanes, dims, &subbands, None);
    while engine.planes_remaining() > 0 {
        if engine.sorting_pass()?.is_some() || engine.refinement_pass()?.is_some() {
            // The residual stream is never truncated; running out of bits
            // here means the section is damaged.
            bail!(CodecError::BitstreamCorrupt);
        }
        engine.next_plane();
    }
    let (mags, signs) = engine.into_coeffs();

    let width = position_bits(total_len);
    let position_bytes = (count * width as usize).div_ceil(8);
    let position_data = &data[SECTION_HEADER_LEN + stream_len..];
    if position_data.len() < position_bytes {
        bail!(CodecError::BitstreamTruncated);
    }

    let mut reader = BitReader::new(position_data);
    let mut outliers = Vec::with_capacity(count);
    for i in 0..count {
        let mut pos = 0u64;
        for _ in 0..width {
            let bit = reader.get_bit().ok_or(CodecError::BitstreamTruncated)?;
            pos = (pos << 1) | bit as u64;
        }
        if pos >= total_len {
            bail!(CodecError::BitstreamCorrupt);
        }

        let err = mags[i] as f64 * tolerance;
        outliers.push(Outlier {
            pos,
            err: if signs[i] { err } else { -err },
        });
    }

    Ok(outliers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_round_trip() {
        let tolerance = 1e-4;
        let outliers = vec![
            Outlier { pos: 3, err: 3.4e-4 },
            Outlier { pos: 190, err: -2.1e-4 },
            Outlier { pos: 501, err: 9.9e-4 },
            Outlier { pos: 502, err: -1.2e-4 },
        ];
        let total_len = 1000;

        let section = encode(&outliers, total_len, tolerance).unwrap();
        assert_eq!(full_len(&section, total_len).unwrap(), section.len());

        let decoded = decode(&section, total_len, tolerance).unwrap();
        assert_eq!(decoded.len(), outliers.len());

        for (orig, dec) in outliers.iter().zip(&decoded) {
            assert_eq!(orig.pos, dec.pos);
            // Correction is exact to within half the tolerance.
            assert!((orig.err - dec.err).abs() <= tolerance / 2.0 + 1e-15);
            assert_eq!(orig.err.signum(), dec.err.signum());
        }
    }

    #[test]
    fn corrected_error_is_within_tolerance() {
        let tolerance = 2.9e-9;
        let outliers: Vec<Outlier> = (0..50)
            .map(|i| Outlier {
                pos: i * 13,
                err: (i as f64 + 1.0) * 3.3e-9 * if i % 2 == 0 { 1.0 } else { -1.0 },
            })
            .collect();
        let total_len = 4096;

        let section = encode(&outliers, total_len, tolerance).unwrap();
        let decoded = decode(&section, total_len, tolerance).unwrap();

        for (orig, dec) in outliers.iter().zip(&decoded) {
            let residual = orig.err - dec.err;
            assert!(residual.abs() <= tolerance, "residual {residual}");
        }
    }

    #[test]
    fn truncated_section_is_detected() {
        let outliers = vec![Outlier { pos: 1, err: 5e-3 }];
        let section = encode(&outliers, 64, 1e-3).unwrap();

        assert!(decode(&section[..section.len() - 1], 64, 1e-3).is_err());
        assert!(full_len(&section[..8], 64).is_err());
    }
}
