//! The floating-point driver: the top-level composition of conditioner,
//! wavelet transform, quantizer, coding engine, and outlier correction.
//!
//! Encode: condition → transform → quantize → code. Decode reverses every
//! arrow. Constant fields short-circuit into the 17-byte conditioner
//! envelope; point-wise-error mode performs a full lossy round trip on the
//! encoder side to find the samples that still violate the tolerance and
//! appends a correction section for them.

use log::debug;

use crate::conditioner::{self, CondiHeader};
use crate::controller::{
    CancelToken, DecodeEngine, EncodeEngine, EngineKind, RateTarget, estimate_q_for_psnr,
    q_for_pwe,
};
use crate::error::{CodecError, Result, bail};
use crate::mask::Mask;
use crate::outlier::{self, Outlier};
use crate::pyramid::Pyramid;
use crate::quant::{self, IntWidth, narrow};
use crate::shape::{self, subband_domain_mask};
use crate::speck::{MAX_BITPLANES, SubbandSpec};

/// Length of the coefficient-stream header: bit-plane count plus useful
/// bit count.
const STREAM_HEADER_LEN: usize = 9;

/// Relative precision of the quantizer in fixed-size mode; deep enough
/// that the bit budget, not the step, limits quality.
const FIXED_SIZE_Q_SHIFT: i32 = -31;

macro_rules! dispatch_width {
    ($width:expr, $T:ident => $body:expr) => {
        match $width {
            IntWidth::U8 => {
                type $T = u8;
                $body
            }
            IntWidth::U16 => {
                type $T = u16;
                $body
            }
            IntWidth::U32 => {
                type $T = u32;
                $body
            }
            IntWidth::U64 => {
                type $T = u64;
                $body
            }
        }
    };
}

/// Subband list and cross-scale stride for the coding engines.
fn coding_geometry(p: &Pyramid) -> (Vec<SubbandSpec>, usize) {
    let subbands = (0..p.num_subbands())
        .map(|s| SubbandSpec {
            origin: p.subband_origin(s),
            size: p.subband_size(s),
            level: p.level_from_subband(s).1,
        })
        .collect();

    let stride = if p.is_2d() { 3 } else { 7 };
    (subbands, stride)
}

/// Mean over the participating samples.
fn masked_mean(vals: &[f64], mask: Option<&Mask>) -> f64 {
    match mask {
        None => crate::math::kahan_sum(vals) / vals.len() as f64,
        Some(m) => {
            let mut sum = 0.0;
            let mut count = 0u64;
            for (i, &v) in vals.iter().enumerate() {
                if m.opaque_at(i) {
                    sum += v;
                    count += 1;
                }
            }
            if count == 0 { 0.0 } else { sum / count as f64 }
        }
    }
}

fn apply_mean(vals: &mut [f64], mean: f64, sign: f64, mask: Option<&Mask>) {
    for (i, v) in vals.iter_mut().enumerate() {
        if mask.is_none_or(|m| m.opaque_at(i)) {
            *v += sign * mean;
        } else {
            *v = 0.0;
        }
    }
}

fn forward_transform(p: &mut Pyramid, mask: Option<&Mask>) -> Result<()> {
    let levels = p.max_levels();
    match mask {
        None => p.dwt(levels),
        Some(m) => shape::shape_adaptive_dwt(p, m, levels),
    }
}

fn inverse_transform(p: &mut Pyramid, mask: Option<&Mask>) -> Result<()> {
    match mask {
        None => p.idwt(),
        Some(m) => shape::inverse_shape_adaptive_dwt(p, m),
    }
}

/// Compress a sample field into an embedded bitstream.
///
/// `dims` are `(nx, ny, nz)` with `nz = 1` for images. The engine choice
/// and the mask are not transmitted; the decoder must be called with the
/// same values.
pub fn compress(
    data: Vec<f64>,
    dims: (usize, usize, usize),
    target: RateTarget,
    engine: EngineKind,
    mask: Option<&Mask>,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let total = dims.0 * dims.1 * dims.2;
    if total == 0 || data.len() != total {
        bail!(CodecError::WrongDims);
    }
    if let Some(m) = mask {
        if m.dims() != dims {
            bail!(CodecError::WrongDims);
        }
    }
    match target {
        RateTarget::FixedPsnr { db } if !(db > 0.0) => bail!(CodecError::QzInvalid),
        RateTarget::FixedPwe { tolerance } if !(tolerance > 0.0) => bail!(CodecError::QzInvalid),
        _ => {}
    }

    // Constant fields collapse into the conditioner envelope.
    if let Some(value) = conditioner::test_constant(&data) {
        let mut out = Vec::new();
        CondiHeader::Constant {
            value,
            num_vals: total as u64,
        }
        .write(&mut out);
        debug!("constant field, {} byte stream", out.len());
        return Ok(out);
    }

    let mut vals = data;
    for &v in &vals {
        if !v.is_finite() {
            bail!(CodecError::QzInvalid);
        }
    }

    let data_range = {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for (i, &v) in vals.iter().enumerate() {
            if mask.is_none_or(|m| m.opaque_at(i)) {
                min = min.min(v);
                max = max.max(v);
            }
        }
        (max - min).max(f64::MIN_POSITIVE)
    };

    let mean = masked_mean(&vals, mask);
    apply_mean(&mut vals, mean, -1.0, mask);

    // Point-wise-error mode needs the conditioned originals for the
    // outlier search later on.
    let conditioned_orig = match target {
        RateTarget::FixedPwe { .. } => Some(vals.clone()),
        _ => None,
    };

    let mut pyramid = Pyramid::from_data(vals, dims.0, dims.1, dims.2)?;
    forward_transform(&mut pyramid, mask)?;

    let q = match target {
        RateTarget::FixedPwe { tolerance } => q_for_pwe(tolerance),
        RateTarget::FixedPsnr { db } => estimate_q_for_psnr(pyramid.data(), data_range, db),
        RateTarget::FixedSize { .. } => {
            let max_abs = pyramid.data().iter().fold(0.0f64, |m, &v| m.max(v.abs()));
            if max_abs == 0.0 {
                1.0
            } else {
                max_abs * 2f64.powi(FIXED_SIZE_Q_SHIFT)
            }
        }
    };

    let quantized = quant::quantize(pyramid.data(), q)?;
    let width = IntWidth::for_max_magnitude(quantized.max_magnitude);
    debug!(
        "q = {q:e}, max magnitude {} ({} byte ints)",
        quantized.max_magnitude,
        width.bytes()
    );

    let (subbands, parent_stride) = coding_geometry(&pyramid);
    let sb_mask = mask.map(|m| subband_domain_mask(&pyramid, m, pyramid.spatial_levels()));

    // Everything up to here is header-independent; figure out the payload
    // budget once the header sizes are known.
    let condi_len = match target {
        RateTarget::FixedPwe { .. } => conditioner::HEADER_LEN_PWE,
        _ => conditioner::HEADER_LEN,
    };
    let budget_bits = match target {
        RateTarget::FixedSize { budget_bytes } => Some(
            budget_bytes
                .saturating_sub((condi_len + STREAM_HEADER_LEN) as u64)
                .saturating_mul(8),
        ),
        _ => None,
    };

    let (payload, useful_bits, num_bitplanes) = dispatch_width!(width, T => {
        let mags = narrow::<T>(&quantized.magnitudes);
        let mut coder = EncodeEngine::<T>::new(
            engine,
            mags,
            quantized.signs.clone(),
            dims,
            &subbands,
            parent_stride,
            sb_mask.as_ref(),
            budget_bits,
        );
        let num_bitplanes = coder.num_bitplanes();
        coder.run(cancel)?;
        let (payload, useful_bits) = coder.finish();
        (payload, useful_bits, num_bitplanes)
    });

    // Point-wise-error mode: replay the decoder's reconstruction and
    // collect the samples still violating the tolerance.
    let mut outlier_section = None;
    let mut has_outlier = false;
    if let (RateTarget::FixedPwe { tolerance }, Some(orig)) = (target, conditioned_orig.as_ref()) {
        let recon = quant::dequantize(&quantized.magnitudes, &quantized.signs, q);
        let mut recon_p = Pyramid::from_data(recon, dims.0, dims.1, dims.2)?;
        recon_p.set_transform(
            pyramid.transform_type(),
            pyramid.temporal_levels(),
            pyramid.spatial_levels(),
        );
        inverse_transform(&mut recon_p, mask)?;

        let outliers: Vec<Outlier> = orig
            .iter()
            .zip(recon_p.data())
            .enumerate()
            .filter(|(i, _)| mask.is_none_or(|m| m.opaque_at(*i)))
            .filter_map(|(i, (&a, &b))| {
                let err = a - b;
                (err.abs() > tolerance).then_some(Outlier {
                    pos: i as u64,
                    err,
                })
            })
            .collect();

        if !outliers.is_empty() {
            debug!("{} outliers beyond {tolerance:e}", outliers.len());
            outlier_section = Some(outlier::encode(&outliers, total as u64, tolerance)?);
            has_outlier = true;
        }
    }

    let header = match target {
        RateTarget::FixedPwe { tolerance } => CondiHeader::Pwe {
            mean,
            q,
            tolerance,
            has_outlier,
        },
        _ => CondiHeader::Standard { mean, q },
    };

    let mut out = Vec::with_capacity(condi_len + STREAM_HEADER_LEN + payload.len());
    header.write(&mut out);
    out.push(num_bitplanes);
    out.extend_from_slice(&useful_bits.to_le_bytes());
    out.extend_from_slice(&payload);
    if let Some(section) = outlier_section {
        out.extend_from_slice(&section);
    }

    Ok(out)
}

/// Decompress a bitstream produced by [`compress`], or any byte-boundary
/// prefix of one.
pub fn decompress(
    stream: &[u8],
    dims: (usize, usize, usize),
    engine: EngineKind,
    mask: Option<&Mask>,
    cancel: &CancelToken,
) -> Result<Vec<f64>> {
    let total = dims.0 * dims.1 * dims.2;
    if total == 0 {
        bail!(CodecError::WrongDims);
    }
    if let Some(m) = mask {
        if m.dims() != dims {
            bail!(CodecError::WrongDims);
        }
    }

    let (header, mut pos) = CondiHeader::parse(stream)?;

    let (mean, q, outlier_info) = match header {
        CondiHeader::Constant { value, num_vals } => {
            if num_vals != total as u64 {
                bail!(CodecError::WrongDims);
            }
            return Ok(vec![value; total]);
        }
        CondiHeader::Standard { mean, q } => (mean, q, None),
        CondiHeader::Pwe {
            mean,
            q,
            tolerance,
            has_outlier,
        } => (mean, q, Some((tolerance, has_outlier))),
    };

    if stream.len() < pos + STREAM_HEADER_LEN {
        bail!(CodecError::BitstreamTruncated);
    }
    let num_bitplanes = stream[pos];
    let useful_bits = u64::from_le_bytes(stream[pos + 1..pos + 9].try_into().unwrap());
    pos += STREAM_HEADER_LEN;

    if num_bitplanes == 0 || num_bitplanes > MAX_BITPLANES {
        bail!(CodecError::BitstreamCorrupt);
    }
    // Integer magnitudes never need more than 64 planes.
    if num_bitplanes > 64 {
        bail!(CodecError::BitstreamCorrupt);
    }

    let announced_bytes = useful_bits.div_ceil(8) as usize;
    let available = stream.len() - pos;
    let payload_bytes = announced_bytes.min(available);
    let payload = &stream[pos..pos + payload_bytes];
    let effective_bits = useful_bits.min(payload_bytes as u64 * 8);

    // Geometry is derived from the dims alone, mirroring the encoder.
    let mut pyramid = Pyramid::new(dims.0, dims.1, dims.2)?;
    let levels = pyramid.max_levels();
    pyramid.set_transform(crate::pyramid::TransformType::Dyadic, levels, levels);
    let (subbands, parent_stride) = coding_geometry(&pyramid);
    let sb_mask = mask.map(|m| subband_domain_mask(&pyramid, m, levels));

    let width = IntWidth::for_bitplanes(num_bitplanes);
    let (magnitudes, signs) = dispatch_width!(width, T => {
        let mut coder = DecodeEngine::<T>::new(
            engine,
            payload,
            effective_bits,
            num_bitplanes,
            dims,
            &subbands,
            parent_stride,
            sb_mask.as_ref(),
        );
        coder.run(cancel)?;
        let (mags, signs) = coder.into_coeffs();
        (mags.iter().map(|m| crate::quant::MagInt::to_u64(*m)).collect::<Vec<u64>>(), signs)
    });

    let coeffs = quant::dequantize(&magnitudes, &signs, q);
    pyramid = Pyramid::from_data(coeffs, dims.0, dims.1, dims.2)?;
    pyramid.set_transform(crate::pyramid::TransformType::Dyadic, levels, levels);
    inverse_transform(&mut pyramid, mask)?;
    let mut vals = pyramid.into_data();

    // Outlier correction applies in the conditioned domain, and only when
    // the stream still contains the full section.
    if let Some((tolerance, true)) = outlier_info {
        let section_start = pos + announced_bytes;
        if stream.len() > section_start {
            let section = &stream[section_start..];
            if outlier::full_len(section, total as u64)? <= section.len() {
                for o in outlier::decode(section, total as u64, tolerance)? {
                    vals[o.pos as usize] += o.err;
                }
            }
        }
    }

    apply_mean(&mut vals, mean, 1.0, mask);

    Ok(vals)
}
