//! A progressive wavelet compressor for scientific floating-point volumes.
//!
//! Given a 2D image or 3D volume of real-valued samples, the encoder
//! produces an embedded, bit-exact, rate-scalable bitstream: any prefix
//! cut at a byte boundary decodes to a valid lossy reconstruction, and
//! longer prefixes only improve it. The pipeline is a multi-level CDF 9/7
//! wavelet transform (optionally shape-adaptive under a transparency
//! mask), midtread quantization to integers, and a bit-plane
//! set-partitioning coder whose every output bit is serialized through a
//! context-adaptive binary arithmetic coder.
//!
//! The encoder aims at one of three targets: a byte budget, a PSNR, or a
//! point-wise error bound (the latter backed by an exact outlier
//! correction section). Two coding engines are available: the default
//! set-partitioning engine and a filtered-probability engine; the engine
//! choice, like the mask, is agreed out of band and never transmitted.
//!
//! ```
//! use embra::{CancelToken, EngineKind, RateTarget, compress, decompress};
//!
//! let dims = (16, 16, 16);
//! let data: Vec<f64> = (0..16 * 16 * 16).map(|i| (i as f64 * 0.01).sin()).collect();
//!
//! let stream = compress(
//!     data.clone(),
//!     dims,
//!     RateTarget::FixedPwe { tolerance: 1e-6 },
//!     EngineKind::Speck,
//!     None,
//!     &CancelToken::new(),
//! )
//! .unwrap();
//!
//! let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();
//! for (a, b) in data.iter().zip(&recon) {
//!     assert!((a - b).abs() <= 1e-6);
//! }
//! ```

#![forbid(unsafe_code)]

mod arith;
mod conditioner;
mod controller;
mod driver;
mod error;
pub mod io;
mod lifting;
mod mask;
mod math;
mod outlier;
mod pyramid;
mod quant;
mod shape;
mod speck;
mod tarp;
mod transform;

pub use controller::{CancelToken, EngineKind, RateTarget};
pub use driver::{compress, decompress};
pub use error::{CodecError, Result, Termination};
pub use mask::Mask;
pub use math::{Stats, calc_stats};
pub use pyramid::{Pyramid, TransformType};
pub use quant::IntWidth;
pub use shape::{inverse_shape_adaptive_dwt, shape_adaptive_dwt};
