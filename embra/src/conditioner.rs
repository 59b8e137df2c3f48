//! The conditioner: subtracts the field mean before the transform, detects
//! constant fields, and carries the quantization parameters in a small
//! fixed-size header at the front of every bitstream.

use bitflags::bitflags;

use crate::error::{CodecError, Result, bail};
use crate::math::kahan_sum;

bitflags! {
    /// Flag byte of the conditioner header. The top two bits carry the
    /// stream version.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CondFlags: u8 {
        /// The field is constant; the header is the entire stream.
        const CONSTANT = 0b0000_0001;
        /// Point-wise-error mode; the extended header fields follow.
        const PWE = 0b0000_0010;
        /// An outlier section follows the coefficient payload.
        const HAS_OUTLIER = 0b0000_0100;
    }
}

/// Stream version carried in the upper bits of the flag byte.
const VERSION: u8 = 1;
const VERSION_SHIFT: u8 = 6;

/// Size of the basic conditioner header.
pub(crate) const HEADER_LEN: usize = 17;
/// Size of the extended (point-wise-error) header.
pub(crate) const HEADER_LEN_PWE: usize = 26;

/// Parsed conditioner header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CondiHeader {
    /// The whole field holds one value; no payload follows.
    Constant { value: f64, num_vals: u64 },
    /// Mean-conditioned stream with a quantization step.
    Standard { mean: f64, q: f64 },
    /// Point-wise-error mode with its tolerance and outlier marker.
    Pwe {
        mean: f64,
        q: f64,
        tolerance: f64,
        has_outlier: bool,
    },
}

impl CondiHeader {
    /// Serialized size of this header.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Pwe { .. } => HEADER_LEN_PWE,
            _ => HEADER_LEN,
        }
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        let version_bits = VERSION << VERSION_SHIFT;
        match *self {
            Self::Constant { value, num_vals } => {
                out.push(CondFlags::CONSTANT.bits() | version_bits);
                out.extend_from_slice(&value.to_le_bytes());
                out.extend_from_slice(&num_vals.to_le_bytes());
            }
            Self::Standard { mean, q } => {
                out.push(version_bits);
                out.extend_from_slice(&mean.to_le_bytes());
                out.extend_from_slice(&q.to_le_bytes());
            }
            Self::Pwe {
                mean,
                q,
                tolerance,
                has_outlier,
            } => {
                let mut flags = CondFlags::PWE;
                flags.set(CondFlags::HAS_OUTLIER, has_outlier);
                out.push(flags.bits() | version_bits);
                out.extend_from_slice(&mean.to_le_bytes());
                out.extend_from_slice(&q.to_le_bytes());
                out.extend_from_slice(&tolerance.to_le_bytes());
                out.push(has_outlier as u8);
            }
        }
    }

    /// Parse a header from the front of a stream; returns the header and
    /// the number of bytes it occupied.
    pub(crate) fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_LEN {
            bail!(CodecError::BitstreamTruncated);
        }

        let raw = data[0];
        if raw >> VERSION_SHIFT != VERSION {
            bail!(CodecError::VersionMismatch);
        }
        let Some(flags) = CondFlags::from_bits(raw & !(0b11 << VERSION_SHIFT)) else {
            bail!(CodecError::BitstreamCorrupt);
        };

        let f64_at = |off: usize| f64::from_le_bytes(data[off..off + 8].try_into().unwrap());

        if flags.contains(CondFlags::CONSTANT) {
            let value = f64_at(1);
            let num_vals = u64::from_le_bytes(data[9..17].try_into().unwrap());
            return Ok((Self::Constant { value, num_vals }, HEADER_LEN));
        }

        let mean = f64_at(1);
        let q = f64_at(9);
        if !(q > 0.0) || !q.is_finite() || !mean.is_finite() {
            bail!(CodecError::BitstreamCorrupt);
        }

        if flags.contains(CondFlags::PWE) {
            if data.len() < HEADER_LEN_PWE {
                bail!(CodecError::BitstreamTruncated);
            }
            let tolerance = f64_at(17);
            let has_outlier = data[25] != 0;
            if !(tolerance > 0.0) {
                bail!(CodecError::BitstreamCorrupt);
            }
            return Ok((
                Self::Pwe {
                    mean,
                    q,
                    tolerance,
                    has_outlier,
                },
                HEADER_LEN_PWE,
            ));
        }

        Ok((Self::Standard { mean, q }, HEADER_LEN))
    }
}

/// Detect a constant field.
pub(crate) fn test_constant(vals: &[f64]) -> Option<f64> {
    let first = *vals.first()?;
    vals.iter().all(|&v| v == first).then_some(first)
}

/// Subtract the mean in place; returns it for the header.
pub(crate) fn condition(vals: &mut [f64]) -> f64 {
    let mean = kahan_sum(vals) / vals.len() as f64;
    for v in vals.iter_mut() {
        *v -= mean;
    }
    mean
}

/// Restore the mean.
pub(crate) fn inverse_condition(vals: &mut [f64], mean: f64) {
    for v in vals.iter_mut() {
        *v += mean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_header_is_seventeen_bytes() {
        let header = CondiHeader::Constant {
            value: 4.332,
            num_vals: 12 * 13 * 15,
        };
        let mut out = vec![];
        header.write(&mut out);
        assert_eq!(out.len(), 17);

        let (parsed, consumed) = CondiHeader::parse(&out).unwrap();
        assert_eq!(consumed, 17);
        assert_eq!(parsed, header);
    }

    #[test]
    fn standard_and_pwe_headers_round_trip() {
        let standard = CondiHeader::Standard {
            mean: -3.25,
            q: 0.00125,
        };
        let mut out = vec![];
        standard.write(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(CondiHeader::parse(&out).unwrap().0, standard);

        let pwe = CondiHeader::Pwe {
            mean: 1.5,
            q: 1.5e-5,
            tolerance: 1e-5,
            has_outlier: true,
        };
        let mut out = vec![];
        pwe.write(&mut out);
        assert_eq!(out.len(), HEADER_LEN_PWE);
        assert_eq!(CondiHeader::parse(&out).unwrap().0, pwe);
    }

    #[test]
    fn version_is_checked() {
        let header = CondiHeader::Standard { mean: 0.0, q: 1.0 };
        let mut out = vec![];
        header.write(&mut out);
        out[0] = (out[0] & 0b0011_1111) | (2 << VERSION_SHIFT);

        assert_eq!(CondiHeader::parse(&out), Err(CodecError::VersionMismatch));
    }

    #[test]
    fn corrupt_step_is_rejected() {
        let header = CondiHeader::Standard { mean: 0.0, q: 1.0 };
        let mut out = vec![];
        header.write(&mut out);
        // Zero out the quantization step.
        for b in &mut out[9..17] {
            *b = 0;
        }

        assert_eq!(CondiHeader::parse(&out), Err(CodecError::BitstreamCorrupt));
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert_eq!(
            CondiHeader::parse(&[0u8; 5]),
            Err(CodecError::BitstreamTruncated)
        );
    }

    #[test]
    fn mean_conditioning_round_trip() {
        let mut vals: Vec<f64> = (0..100).map(|i| i as f64 * 0.3 + 7.0).collect();
        let orig = vals.clone();

        let mean = condition(&mut vals);
        assert!((vals.iter().sum::<f64>()).abs() < 1e-9);

        inverse_condition(&mut vals, mean);
        for (a, b) in orig.iter().zip(&vals) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn constant_detection() {
        assert_eq!(test_constant(&[4.332; 10]), Some(4.332));
        assert_eq!(test_constant(&[1.0, 1.0, 1.1]), None);
    }
}
