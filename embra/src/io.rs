//! Reading and writing subband pyramids as files, for offline debugging
//! and tests: a small textual header followed by little-endian binary
//! samples in row-major, z-major order.
//!
//! ```text
//! EMBRA-SBP
//! 1 0
//! dyadic | packet
//! levels | temporal spatial
//! num_cols num_rows num_frames
//! <f64 or i32 samples>
//! ```

use std::io::{self, BufRead, BufReader, Read, Write};

use crate::error::{CodecError, Result, bail};
use crate::pyramid::{Pyramid, TransformType};

const MAGIC: &str = "EMBRA-SBP";
const VERSION_MAJOR: u32 = 1;
const VERSION_MINOR: u32 = 0;

/// On-disk sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// IEEE-754 binary64.
    F64,
    /// Signed 32-bit integers; samples are rounded on write.
    I32,
}

/// Write a pyramid to a stream.
pub fn write_pyramid(
    pyramid: &Pyramid,
    format: SampleFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    let (nx, ny, nz) = pyramid.dims();

    writeln!(writer, "{MAGIC}")?;
    writeln!(writer, "{VERSION_MAJOR} {VERSION_MINOR}")?;
    match pyramid.transform_type() {
        TransformType::Dyadic => {
            writeln!(writer, "dyadic")?;
            writeln!(writer, "{}", pyramid.spatial_levels())?;
        }
        TransformType::Packet => {
            writeln!(writer, "packet")?;
            writeln!(
                writer,
                "{} {}",
                pyramid.temporal_levels(),
                pyramid.spatial_levels()
            )?;
        }
    }
    writeln!(writer, "{nx} {ny} {nz}")?;

    match format {
        SampleFormat::F64 => {
            for &v in pyramid.data() {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        SampleFormat::I32 => {
            for &v in pyramid.data() {
                writer.write_all(&(v.round_ties_even() as i32).to_le_bytes())?;
            }
        }
    }

    Ok(())
}

fn next_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<()> {
    line.clear();
    if reader
        .read_line(line)
        .map_err(|_| CodecError::BitstreamTruncated)?
        == 0
    {
        return Err(CodecError::BitstreamTruncated);
    }
    Ok(())
}

/// Read a pyramid written by [`write_pyramid`].
pub fn read_pyramid(reader: &mut impl Read, format: SampleFormat) -> Result<Pyramid> {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let reader = &mut reader;

    next_line(reader, &mut line)?;
    if line.trim_end() != MAGIC {
        bail!(CodecError::BitstreamCorrupt);
    }

    next_line(reader, &mut line)?;
    let mut parts = line.split_whitespace();
    let major: u32 = parse(parts.next())?;
    let _minor: u32 = parse(parts.next())?;
    if major != VERSION_MAJOR {
        bail!(CodecError::VersionMismatch);
    }

    next_line(reader, &mut line)?;
    let transform_type = match line.trim_end() {
        "dyadic" => TransformType::Dyadic,
        "packet" => TransformType::Packet,
        _ => bail!(CodecError::BitstreamCorrupt),
    };

    next_line(reader, &mut line)?;
    let mut parts = line.split_whitespace();
    let (temporal_levels, spatial_levels) = match transform_type {
        TransformType::Dyadic => {
            let levels: usize = parse(parts.next())?;
            (levels, levels)
        }
        TransformType::Packet => {
            let t: usize = parse(parts.next())?;
            let s: usize = parse(parts.next())?;
            (t, s)
        }
    };

    next_line(reader, &mut line)?;
    let mut parts = line.split_whitespace();
    let nx: usize = parse(parts.next())?;
    let ny: usize = parse(parts.next())?;
    let nz: usize = parse(parts.next())?;

    let total = nx
        .checked_mul(ny)
        .and_then(|v| v.checked_mul(nz))
        .ok_or(CodecError::BitstreamCorrupt)?;
    if total == 0 {
        bail!(CodecError::BitstreamCorrupt);
    }

    let mut data = Vec::with_capacity(total);
    match format {
        SampleFormat::F64 => {
            let mut buf = [0u8; 8];
            for _ in 0..total {
                reader
                    .read_exact(&mut buf)
                    .map_err(|_| CodecError::BitstreamTruncated)?;
                data.push(f64::from_le_bytes(buf));
            }
        }
        SampleFormat::I32 => {
            let mut buf = [0u8; 4];
            for _ in 0..total {
                reader
                    .read_exact(&mut buf)
                    .map_err(|_| CodecError::BitstreamTruncated)?;
                data.push(i32::from_le_bytes(buf) as f64);
            }
        }
    }

    let mut pyramid = Pyramid::from_data(data, nx, ny, nz)?;
    pyramid.set_transform(transform_type, temporal_levels, spatial_levels);
    Ok(pyramid)
}

fn parse<T: std::str::FromStr>(field: Option<&str>) -> Result<T> {
    field
        .and_then(|s| s.parse().ok())
        .ok_or(CodecError::BitstreamCorrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pyramid() -> Pyramid {
        let data: Vec<f64> = (0..4 * 3 * 2).map(|i| i as f64 * 1.25 - 3.0).collect();
        let mut p = Pyramid::from_data(data, 4, 3, 2).unwrap();
        p.set_transform(TransformType::Dyadic, 1, 1);
        p
    }

    #[test]
    fn f64_round_trip() {
        let p = sample_pyramid();
        let mut buf = Vec::new();
        write_pyramid(&p, SampleFormat::F64, &mut buf).unwrap();

        let read = read_pyramid(&mut buf.as_slice(), SampleFormat::F64).unwrap();
        assert_eq!(read.dims(), p.dims());
        assert_eq!(read.transform_type(), TransformType::Dyadic);
        assert_eq!(read.spatial_levels(), 1);
        assert_eq!(read.data(), p.data());
    }

    #[test]
    fn i32_rounds_on_write() {
        let p = sample_pyramid();
        let mut buf = Vec::new();
        write_pyramid(&p, SampleFormat::I32, &mut buf).unwrap();

        let read = read_pyramid(&mut buf.as_slice(), SampleFormat::I32).unwrap();
        for (&a, &b) in p.data().iter().zip(read.data()) {
            assert_eq!(a.round_ties_even(), b);
        }
    }

    #[test]
    fn packet_header_round_trip() {
        let data = vec![0.0; 8 * 8 * 4];
        let mut p = Pyramid::from_data(data, 8, 8, 4).unwrap();
        p.set_transform(TransformType::Packet, 2, 1);

        let mut buf = Vec::new();
        write_pyramid(&p, SampleFormat::F64, &mut buf).unwrap();
        let read = read_pyramid(&mut buf.as_slice(), SampleFormat::F64).unwrap();

        assert_eq!(read.transform_type(), TransformType::Packet);
        assert_eq!(read.temporal_levels(), 2);
        assert_eq!(read.spatial_levels(), 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = b"NOT-A-PYRAMID\n1 0\ndyadic\n1\n2 2 1\n".to_vec();
        assert_eq!(
            read_pyramid(&mut buf.as_slice(), SampleFormat::F64),
            Err(CodecError::BitstreamCorrupt)
        );
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let p = sample_pyramid();
        let mut buf = Vec::new();
        write_pyramid(&p, SampleFormat::F64, &mut buf).unwrap();
        // Bump the major version in place.
        let pos = MAGIC.len() + 1;
        buf[pos] = b'9';

        assert_eq!(
            read_pyramid(&mut buf.as_slice(), SampleFormat::F64),
            Err(CodecError::VersionMismatch)
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let p = sample_pyramid();
        let mut buf = Vec::new();
        write_pyramid(&p, SampleFormat::F64, &mut buf).unwrap();
        buf.truncate(buf.len() - 4);

        assert_eq!(
            read_pyramid(&mut buf.as_slice(), SampleFormat::F64),
            Err(CodecError::BitstreamTruncated)
        );
    }
}
