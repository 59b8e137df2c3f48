//! The bit-plane controller: drives a coding engine plane by plane until
//! the planes run out, the bit budget is met, or (while decoding) the
//! stream ends. Cancellation is by polling at pass boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, Termination};
use crate::mask::Mask;
use crate::quant::{MagInt, estimate_mse_midtread};
use crate::speck::{SpeckDecoder, SpeckEncoder, SubbandSpec};
use crate::tarp::{TarpDecoder, TarpEncoder};

/// What the encoder aims for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateTarget {
    /// Stop once this many bytes of payload have been produced.
    FixedSize {
        /// Payload budget in bytes.
        budget_bytes: u64,
    },
    /// Choose the quantization step for a reconstruction quality target.
    FixedPsnr {
        /// Target peak signal-to-noise ratio in dB.
        db: f64,
    },
    /// Bound the point-wise reconstruction error, with outlier correction.
    FixedPwe {
        /// Maximum absolute per-sample error.
        tolerance: f64,
    },
}

/// Which bit-plane engine codes the coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineKind {
    /// Set-partitioning coder.
    Speck,
    /// Filtered-probability coder with the given decay.
    Tarp {
        /// IIR filter decay.
        alpha: f64,
    },
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Speck
    }
}

impl EngineKind {
    /// The Tarp engine with its canonical decay.
    pub fn tarp() -> Self {
        Self::Tarp {
            alpha: crate::tarp::ALPHA_DEFAULT,
        }
    }
}

/// A cooperative cancellation token. The controller checks it at pass
/// boundaries; a cancelled encode terminates its stream like a met budget,
/// a cancelled decode stops like a truncated stream. Either way the result
/// is a valid lower-quality state, never an error.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that never fires unless [`CancelToken::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next pass boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Terminal quantization step for a PSNR target, from the relation
/// `q = 2·√3·rmse`, tightened by `2^(-1/4)` while the midtread remainder
/// estimate still exceeds the target mean squared error.
pub(crate) fn estimate_q_for_psnr(coeffs: &[f64], data_range: f64, psnr_db: f64) -> f64 {
    debug_assert!(data_range > 0.0);

    let target_mse = data_range * data_range * 10f64.powf(-psnr_db / 10.0);
    let mut q = 2.0 * (3.0 * target_mse).sqrt();

    // Four adjustments effectively halve q.
    while estimate_mse_midtread(coeffs, q) > target_mse {
        q /= 2f64.powf(0.25);
    }

    q
}

/// Quantization step for a point-wise error tolerance.
pub(crate) fn q_for_pwe(tolerance: f64) -> f64 {
    1.5 * tolerance
}

/// Tagged engine dispatch for the encode direction.
#[derive(Debug)]
pub(crate) enum EncodeEngine<'a, T> {
    Speck(SpeckEncoder<'a, T>),
    Tarp(TarpEncoder<'a, T>),
}

impl<'a, T: MagInt> EncodeEngine<'a, T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: EngineKind,
        mags: Vec<T>,
        signs: Vec<bool>,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        parent_stride: usize,
        mask: Option<&'a Mask>,
        budget_bits: Option<u64>,
    ) -> Self {
        match kind {
            EngineKind::Speck => Self::Speck(SpeckEncoder::new(
                mags,
                signs,
                dims,
                subbands,
                mask,
                budget_bits,
            )),
            EngineKind::Tarp { alpha } => Self::Tarp(TarpEncoder::new(
                mags,
                signs,
                dims,
                subbands,
                parent_stride,
                mask,
                alpha,
                budget_bits,
            )),
        }
    }

    pub(crate) fn num_bitplanes(&self) -> u8 {
        match self {
            Self::Speck(e) => e.num_bitplanes(),
            Self::Tarp(e) => e.num_bitplanes(),
        }
    }

    pub(crate) fn finish(self) -> (Vec<u8>, u64) {
        match self {
            Self::Speck(e) => e.finish(),
            Self::Tarp(e) => e.finish(),
        }
    }

    /// Run sorting + refinement pairs over every bit-plane. Returns the
    /// termination condition, if any fired before the planes ran out.
    pub(crate) fn run(&mut self, cancel: &CancelToken) -> Result<Option<Termination>> {
        macro_rules! drive {
            ($e:expr) => {{
                let e = $e;
                while e.planes_remaining() > 0 {
                    if cancel.is_cancelled() {
                        return Ok(Some(Termination::BudgetMet));
                    }
                    if let Some(t) = e.sorting_pass()? {
                        return Ok(Some(t));
                    }
                    if let Some(t) = e.refinement_pass()? {
                        return Ok(Some(t));
                    }
                    e.next_plane();
                }
                Ok(None)
            }};
        }

        match self {
            Self::Speck(e) => drive!(e),
            Self::Tarp(e) => drive!(e),
        }
    }
}

/// Tagged engine dispatch for the decode direction.
#[derive(Debug)]
pub(crate) enum DecodeEngine<'a, T> {
    Speck(SpeckDecoder<'a, T>),
    Tarp(TarpDecoder<'a, T>),
}

impl<'a, T: MagInt> DecodeEngine<'a, T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: EngineKind,
        payload: &'a [u8],
        num_useful_bits: u64,
        num_bitplanes: u8,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        parent_stride: usize,
        mask: Option<&'a Mask>,
    ) -> Self {
        match kind {
            EngineKind::Speck => Self::Speck(SpeckDecoder::new(
                payload,
                num_useful_bits,
                num_bitplanes,
                dims,
                subbands,
                mask,
            )),
            EngineKind::Tarp { alpha } => Self::Tarp(TarpDecoder::new(
                payload,
                num_useful_bits,
                num_bitplanes,
                dims,
                subbands,
                parent_stride,
                mask,
                alpha,
            )),
        }
    }

    pub(crate) fn into_coeffs(self) -> (Vec<T>, Vec<bool>) {
        match self {
            Self::Speck(e) => e.into_coeffs(),
            Self::Tarp(e) => e.into_coeffs(),
        }
    }

    pub(crate) fn run(&mut self, cancel: &CancelToken) -> Result<Option<Termination>> {
        macro_rules! drive {
            ($e:expr) => {{
                let e = $e;
                while e.planes_remaining() > 0 {
                    if cancel.is_cancelled() {
                        return Ok(Some(Termination::EndOfStream));
                    }
                    if let Some(t) = e.sorting_pass()? {
                        return Ok(Some(t));
                    }
                    if let Some(t) = e.refinement_pass()? {
                        return Ok(Some(t));
                    }
                    e.next_plane();
                }
                Ok(None)
            }};
        }

        match self {
            Self::Speck(e) => drive!(e),
            Self::Tarp(e) => drive!(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psnr_step_tracks_the_lindstrom_relation() {
        // A spread of coefficient values whose remainders behave like
        // uniform noise: the first estimate should already satisfy the
        // target, so q stays close to 2·√3·rmse.
        let coeffs: Vec<f64> = (0..4096)
            .map(|i| ((i as f64 * 0.613).sin() + (i as f64 * 0.173).cos()) * 50.0)
            .collect();
        let range = 100.0;

        let q = estimate_q_for_psnr(&coeffs, range, 40.0);
        let target_mse = range * range * 10f64.powf(-4.0);

        assert!(q > 0.0);
        assert!(estimate_mse_midtread(&coeffs, q) <= target_mse);
        // Never smaller than two full halvings below the analytic start.
        assert!(q > 2.0 * (3.0 * target_mse).sqrt() / 4.0);
    }

    #[test]
    fn pwe_step_is_fixed_multiple() {
        assert_eq!(q_for_pwe(1e-5), 1.5e-5);
    }

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
