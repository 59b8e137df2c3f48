//! The Tarp coder: bit-plane coding with filtered probability estimation.
//!
//! An alternative to the SPECK engine over the same pyramid. Instead of
//! set partitioning, every subband is raster-scanned and each coefficient's
//! significance probability is maintained by a separable IIR filter with
//! decay `alpha`; the probability drives a non-adaptive arithmetic model,
//! so the filter itself is the adaptation. A cross-scale predictor blends
//! in the parent subband's significance density when the local estimate is
//! very small. Per-coefficient states follow
//! `Z -> NZN_NEW -> NZN -> S_NEW -> S`, where the `NZN` flavors mark
//! neighbors of significant coefficients and pay a dedicated context, and
//! the `NEW` flavors convert to their stable forms at the end of each pass.

use crate::arith::{ArithDecoder, ArithEncoder, ContextBank};
use crate::error::{PassResult, Termination};
use crate::mask::Mask;
use crate::quant::MagInt;
use crate::speck::{MAX_BITPLANES, SubbandSpec};

pub(crate) const CTX_SIGNIFICANCE: usize = 0;
/// Significance of a coefficient with a non-zero neighbor.
pub(crate) const CTX_NZN: usize = 1;
pub(crate) const CTX_SIGN: usize = 2;
pub(crate) const CTX_REFINEMENT: usize = 3;
pub(crate) const NUM_CONTEXTS: usize = 4;

/// Filter decay for the general (isotropic) case.
pub(crate) const ALPHA_DEFAULT: f64 = 0.4;
/// Opaque decay pair for effectively one-dimensional subbands; preserved
/// verbatim from the reference constants.
const ALPHA_1D: f64 = 0.995;
const ALPHA_1D_O: f64 = 0.005;

/// Prior given to coefficients with a significant neighbor.
const NZN_HOLDER: f64 = 0.3;
/// Below this estimate the cross-scale predictor kicks in.
const PREDICT_THRESHOLD: f64 = 0.05;
const CURRENT_SCALE: f64 = 0.7;
const PARENT_SCALE: f64 = 0.3;

const BOUNDARY_VALUE: f64 = 0.0;

/// Per-coefficient coding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum CoeffState {
    Z = 0,
    NznNew = 2,
    S = 3,
    SNew = 4,
    Nzn = 5,
}

impl CoeffState {
    #[inline]
    fn significant(self) -> bool {
        matches!(self, Self::S | Self::SNew)
    }

    #[inline]
    fn has_nonzero_neighbor(self) -> bool {
        matches!(self, Self::Nzn | Self::NznNew)
    }
}

/// The separable IIR probability filter of one subband pass.
///
/// `p1` and `p4` hold the causal/anticausal row accumulators, `p2` and
/// `p5` the column accumulators, and `p3` carries information across
/// frames, which is what makes the filter three-dimensional.
#[derive(Debug)]
struct TarpFilter {
    alpha: f64,
    beta: f64,
    nr: usize,
    nc: usize,
    p1: Vec<f64>,
    p2: Vec<f64>,
    p3: Vec<f64>,
    p4: Vec<f64>,
    p5: Vec<f64>,
}

impl TarpFilter {
    fn new(alpha: f64, nr: usize, nc: usize) -> Self {
        let beta = (1.0 - alpha).powi(3) / (3.0 * alpha + alpha.powi(3));
        Self {
            alpha,
            beta,
            nr,
            nc,
            p1: vec![BOUNDARY_VALUE; nr * nc],
            p2: vec![BOUNDARY_VALUE; nc],
            p3: vec![BOUNDARY_VALUE; nr * nc],
            p4: vec![BOUNDARY_VALUE; nr * nc],
            p5: vec![BOUNDARY_VALUE; nc],
        }
    }

    fn start_frame(&mut self) {
        self.p2.fill(BOUNDARY_VALUE);
    }

    #[inline]
    fn idx(&self, row: usize, col: usize) -> usize {
        row * self.nc + col
    }

    /// Probability estimate for the coefficient about to be coded.
    #[inline]
    fn estimate(&self, row: usize, col: usize) -> f64 {
        let left = if col == 0 {
            BOUNDARY_VALUE
        } else {
            self.p1[self.idx(row, col - 1)]
        };
        self.alpha * (left + self.p2[col] + self.p3[self.idx(row, col)])
    }

    /// Causal update after the coefficient's significance is known.
    #[inline]
    fn update_forward(&mut self, row: usize, col: usize, significant: bool) {
        let left = if col == 0 {
            BOUNDARY_VALUE
        } else {
            self.p1[self.idx(row, col - 1)]
        };
        let v = if significant { 1.0 } else { 0.0 };
        let i = self.idx(row, col);
        self.p1[i] = self.alpha * left + self.beta * v;
        self.p2[col] = self.p1[i] + self.alpha * self.p2[col];
    }

    /// Anticausal sweep over one finished row. Masked-out columns are not
    /// folded into the accumulators; their prior state stays in place.
    fn update_backward(
        &mut self,
        row: usize,
        significant: impl Fn(usize) -> bool,
        transparent: impl Fn(usize) -> bool,
    ) {
        for col in (0..self.nc).rev() {
            if transparent(col) {
                continue;
            }

            let right = if col == self.nc - 1 {
                BOUNDARY_VALUE
            } else {
                self.p4[self.idx(row, col + 1)]
            };
            self.p2[col] += self.alpha * right;
            let i = self.idx(row, col);
            self.p3[i] = self.p2[col] + self.alpha * self.p3[i];

            let v = if significant(col) { 1.0 } else { 0.0 };
            self.p4[i] = self.alpha * right + self.beta * v;
        }
    }

    /// Bottom-up sweep folding the frame into `p3` for the next frame,
    /// again skipping masked-out positions.
    fn finish_frame(&mut self, transparent: impl Fn(usize, usize) -> bool) {
        self.p5.fill(BOUNDARY_VALUE);
        for row in (0..self.nr).rev() {
            for col in 0..self.nc {
                if transparent(row, col) {
                    continue;
                }

                let i = self.idx(row, col);
                self.p3[i] += self.alpha * self.p5[col];

                let right = if col == self.nc - 1 {
                    BOUNDARY_VALUE
                } else {
                    self.p4[self.idx(row, col + 1)]
                };
                self.p5[col] = self.p1[i] + self.alpha * self.p5[col] + self.alpha * right;
            }
        }
    }
}

/// State shared by both halves of the Tarp engine.
#[derive(Debug)]
struct TarpState<'a, T> {
    mags: Vec<T>,
    signs: Vec<bool>,
    dims: (usize, usize, usize),
    subbands: Vec<SubbandSpec>,
    /// Parent-group stride: 7 for 3D dyadic, 3 for 2D, 0 disables the
    /// cross-scale predictor.
    parent_stride: usize,
    mask: Option<&'a Mask>,
    states: Vec<CoeffState>,
    /// Running count of significant coefficients per subband.
    sig_counts: Vec<u64>,
    alpha: f64,
    threshold: u64,
    bank: ContextBank,
    /// Running 1D estimate used for effectively one-dimensional subbands.
    p_line: f64,
}

impl<'a, T: MagInt> TarpState<'a, T> {
    fn new(
        mags: Vec<T>,
        signs: Vec<bool>,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        parent_stride: usize,
        mask: Option<&'a Mask>,
        alpha: f64,
    ) -> Self {
        let total = dims.0 * dims.1 * dims.2;
        Self {
            mags,
            signs,
            dims,
            subbands: subbands.to_vec(),
            parent_stride,
            mask,
            states: vec![CoeffState::Z; total],
            sig_counts: vec![0; subbands.len()],
            alpha,
            threshold: 0,
            bank: ContextBank::new(NUM_CONTEXTS, false),
            p_line: 0.0,
        }
    }

    #[inline]
    fn linearize(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims.1 + y) * self.dims.0 + x
    }

    #[inline]
    fn transparent(&self, x: usize, y: usize, z: usize) -> bool {
        self.mask.is_some_and(|m| m.transparent(x, y, z))
    }

    fn parent_of(&self, subband: usize) -> Option<usize> {
        if self.parent_stride == 0 || subband == 0 {
            None
        } else if subband > self.parent_stride {
            Some(subband - self.parent_stride)
        } else {
            Some(0)
        }
    }

    fn density(&self, subband: usize) -> f64 {
        let (sx, sy, sz) = self.subbands[subband].size;
        let n = (sx * sy * sz).max(1) as f64;
        self.sig_counts[subband] as f64 / n
    }

    /// Blend the parent subband's significance density into a small local
    /// estimate.
    fn cross_scale(&self, subband: usize, p: f64) -> f64 {
        if p >= PREDICT_THRESHOLD {
            return p;
        }
        let Some(parent) = self.parent_of(subband) else {
            return p;
        };

        // A parent coefficient covers up to eight children, so its density
        // is scaled before blending, and capped.
        let p_parent = (self.density(parent) * 4.0).min(0.8);
        CURRENT_SCALE * p + PARENT_SCALE * p_parent
    }

    /// Probability and context for the significance symbol at a position.
    fn significance_model(&mut self, subband: usize, p_filter: f64, state: CoeffState) -> usize {
        let p = self.cross_scale(subband, p_filter);
        if state.has_nonzero_neighbor() {
            self.bank.set_probability(CTX_NZN, p.max(NZN_HOLDER));
            CTX_NZN
        } else {
            self.bank.set_probability(CTX_SIGNIFICANCE, p);
            CTX_SIGNIFICANCE
        }
    }

    /// Mark the in-subband neighbors of a newly significant coefficient.
    fn mark_neighbors(&mut self, sb: &SubbandSpec, lx: usize, ly: usize, lz: usize) {
        let (sx, sy, sz) = sb.size;
        let (ox, oy, oz) = sb.origin;

        let mut visit = |dx: isize, dy: isize, dz: isize| {
            let nx = lx as isize + dx;
            let ny = ly as isize + dy;
            let nz = lz as isize + dz;
            if nx < 0 || ny < 0 || nz < 0 {
                return;
            }
            let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
            if nx >= sx || ny >= sy || nz >= sz {
                return;
            }

            let idx = self.linearize(ox + nx, oy + ny, oz + nz);
            if self.states[idx] == CoeffState::Z {
                self.states[idx] = CoeffState::NznNew;
            }
        };

        visit(-1, 0, 0);
        visit(1, 0, 0);
        visit(0, -1, 0);
        visit(0, 1, 0);
        visit(0, 0, -1);
        visit(0, 0, 1);
    }

    /// Convert the `NEW` state flavors to their stable forms.
    fn stabilize_states(&mut self) {
        for s in &mut self.states {
            *s = match *s {
                CoeffState::SNew => CoeffState::S,
                CoeffState::NznNew => CoeffState::Nzn,
                other => other,
            };
        }
    }

    /// Whether a subband is effectively one-dimensional.
    fn is_line_subband(sb: &SubbandSpec) -> bool {
        let (sx, sy, sz) = sb.size;
        (sx == 1) as u8 + (sy == 1) as u8 + (sz == 1) as u8 >= 2
    }
}

/// The encoder half of the Tarp engine.
#[derive(Debug)]
pub(crate) struct TarpEncoder<'a, T> {
    state: TarpState<'a, T>,
    coder: ArithEncoder,
    num_bitplanes: u8,
    planes_done: u8,
}

/// The decoder half of the Tarp engine. The filter state depends only on
/// the per-coefficient states, so both halves stay in lockstep.
#[derive(Debug)]
pub(crate) struct TarpDecoder<'a, T> {
    state: TarpState<'a, T>,
    coder: ArithDecoder<'a>,
    num_bitplanes: u8,
    planes_done: u8,
}

/// The pass structure is identical on both sides; only the leaf coding
/// calls differ.
macro_rules! tarp_passes {
    ($name:ident) => {
        impl<'a, T: MagInt> $name<'a, T> {
            pub(crate) fn planes_remaining(&self) -> u8 {
                self.num_bitplanes - self.planes_done
            }

            pub(crate) fn next_plane(&mut self) {
                self.state.threshold /= 2;
                self.planes_done += 1;
            }

            /// The significance pass: every subband raster-scanned under
            /// the filtered probability model.
            pub(crate) fn sorting_pass(&mut self) -> PassResult {
                for subband in 0..self.state.subbands.len() {
                    if let Some(t) = self.significance_pass_subband(subband)? {
                        return Ok(Some(t));
                    }
                }
                Ok(None)
            }

            fn significance_pass_subband(&mut self, subband: usize) -> PassResult {
                let sb = self.state.subbands[subband];
                let (sx, sy, sz) = sb.size;
                if sx == 0 || sy == 0 || sz == 0 {
                    return Ok(None);
                }

                if TarpState::<T>::is_line_subband(&sb) {
                    return self.significance_pass_line(subband);
                }

                let (ox, oy, oz) = sb.origin;
                let mut filter = TarpFilter::new(self.state.alpha, sy, sx);

                for lz in 0..sz {
                    filter.start_frame();
                    for ly in 0..sy {
                        for lx in 0..sx {
                            let (x, y, z) = (ox + lx, oy + ly, oz + lz);
                            if self.state.transparent(x, y, z) {
                                continue;
                            }

                            let idx = self.state.linearize(x, y, z);
                            let state = self.state.states[idx];
                            if !state.significant() {
                                let p = filter.estimate(ly, lx);
                                if let Some(t) =
                                    self.code_significance(subband, &sb, idx, (lx, ly, lz), p)?
                                {
                                    return Ok(Some(t));
                                }
                            }

                            let v = self.state.states[idx].significant();
                            filter.update_forward(ly, lx, v);
                        }

                        let states = &self.state.states;
                        let mask = self.state.mask;
                        let dims = self.state.dims;
                        let row_base = ((oz + lz) * dims.1 + (oy + ly)) * dims.0 + ox;
                        filter.update_backward(
                            ly,
                            |col| states[row_base + col].significant(),
                            |col| {
                                mask.is_some_and(|m| m.transparent(ox + col, oy + ly, oz + lz))
                            },
                        );
                    }

                    let mask = self.state.mask;
                    filter.finish_frame(|row, col| {
                        mask.is_some_and(|m| m.transparent(ox + col, oy + row, oz + lz))
                    });
                }

                Ok(None)
            }

            /// Degenerate subbands use a running exponential average with
            /// the slow 1D decay pair instead of the separable filter.
            fn significance_pass_line(&mut self, subband: usize) -> PassResult {
                let sb = self.state.subbands[subband];
                let (sx, sy, sz) = sb.size;
                let (ox, oy, oz) = sb.origin;
                self.state.p_line = BOUNDARY_VALUE;

                for lz in 0..sz {
                    for ly in 0..sy {
                        for lx in 0..sx {
                            let (x, y, z) = (ox + lx, oy + ly, oz + lz);
                            if self.state.transparent(x, y, z) {
                                continue;
                            }

                            let idx = self.state.linearize(x, y, z);
                            let state = self.state.states[idx];
                            if !state.significant() {
                                let p = self.state.p_line;
                                if let Some(t) =
                                    self.code_significance(subband, &sb, idx, (lx, ly, lz), p)?
                                {
                                    return Ok(Some(t));
                                }
                            }

                            let v = self.state.states[idx].significant() as u8 as f64;
                            self.state.p_line = self.state.p_line * ALPHA_1D + v * ALPHA_1D_O;
                        }
                    }
                }

                Ok(None)
            }

            /// The refinement pass also stabilizes the `NEW` states.
            pub(crate) fn refinement_pass(&mut self) -> PassResult {
                for subband in 0..self.state.subbands.len() {
                    let sb = self.state.subbands[subband];
                    let (sx, sy, sz) = sb.size;
                    let (ox, oy, oz) = sb.origin;

                    for lz in 0..sz {
                        for ly in 0..sy {
                            for lx in 0..sx {
                                let (x, y, z) = (ox + lx, oy + ly, oz + lz);
                                if self.state.transparent(x, y, z) {
                                    continue;
                                }

                                let idx = self.state.linearize(x, y, z);
                                if self.state.states[idx] == CoeffState::S {
                                    if let Some(t) = self.code_refinement(idx)? {
                                        return Ok(Some(t));
                                    }
                                }
                            }
                        }
                    }
                }

                self.state.stabilize_states();
                Ok(None)
            }
        }
    };
}

tarp_passes!(TarpEncoder);
tarp_passes!(TarpDecoder);

impl<'a, T: MagInt> TarpEncoder<'a, T> {
    pub(crate) fn new(
        mags: Vec<T>,
        signs: Vec<bool>,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        parent_stride: usize,
        mask: Option<&'a Mask>,
        alpha: f64,
        budget_bits: Option<u64>,
    ) -> Self {
        let max_mag = mags.iter().map(|m| m.to_u64()).max().unwrap_or(0);
        let mut threshold = 1u64;
        let mut num_bitplanes = 1u8;
        while threshold * 2 <= max_mag {
            threshold *= 2;
            num_bitplanes += 1;
        }
        debug_assert!(num_bitplanes <= MAX_BITPLANES);

        let mut state = TarpState::new(mags, signs, dims, subbands, parent_stride, mask, alpha);
        state.threshold = threshold;

        Self {
            state,
            coder: ArithEncoder::new(budget_bits),
            num_bitplanes,
            planes_done: 0,
        }
    }

    pub(crate) fn num_bitplanes(&self) -> u8 {
        self.num_bitplanes
    }

    pub(crate) fn finish(self) -> (Vec<u8>, u64) {
        self.coder.finish()
    }

    fn code_significance(
        &mut self,
        subband: usize,
        sb: &SubbandSpec,
        idx: usize,
        local: (usize, usize, usize),
        p_filter: f64,
    ) -> PassResult {
        let state = self.state.states[idx];
        let ctx = self.state.significance_model(subband, p_filter, state);

        let bit = self.state.mags[idx].to_u64() >= self.state.threshold;
        if let Some(t) = self.coder.encode(&mut self.state.bank, ctx, bit) {
            return Ok(Some(t));
        }

        if bit {
            self.state.bank.set_probability(CTX_SIGN, 0.5);
            let sign = self.state.signs[idx];
            if let Some(t) = self.coder.encode(&mut self.state.bank, CTX_SIGN, sign) {
                return Ok(Some(t));
            }

            let m = self.state.mags[idx].to_u64() - self.state.threshold;
            self.state.mags[idx] = T::from_u64(m);
            self.state.states[idx] = CoeffState::SNew;
            self.state.sig_counts[subband] += 1;
            self.state.mark_neighbors(sb, local.0, local.1, local.2);
        }

        Ok(None)
    }

    fn code_refinement(&mut self, idx: usize) -> PassResult {
        let t = self.state.threshold;
        let m = self.state.mags[idx].to_u64();
        let bit = m >= t;

        self.state.bank.set_probability(CTX_REFINEMENT, 0.5);
        if let Some(term) = self.coder.encode(&mut self.state.bank, CTX_REFINEMENT, bit) {
            return Ok(Some(term));
        }

        if bit {
            self.state.mags[idx] = T::from_u64(m - t);
        }
        Ok(None)
    }
}

impl<'a, T: MagInt> TarpDecoder<'a, T> {
    pub(crate) fn new(
        payload: &'a [u8],
        num_useful_bits: u64,
        num_bitplanes: u8,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        parent_stride: usize,
        mask: Option<&'a Mask>,
        alpha: f64,
    ) -> Self {
        let total = dims.0 * dims.1 * dims.2;
        let mut state = TarpState::new(
            vec![T::default(); total],
            vec![true; total],
            dims,
            subbands,
            parent_stride,
            mask,
            alpha,
        );
        state.threshold = 1u64 << (num_bitplanes.clamp(1, 64) - 1);

        Self {
            state,
            coder: ArithDecoder::new(payload, num_useful_bits),
            num_bitplanes,
            planes_done: 0,
        }
    }

    pub(crate) fn into_coeffs(self) -> (Vec<T>, Vec<bool>) {
        (self.state.mags, self.state.signs)
    }

    fn code_significance(
        &mut self,
        subband: usize,
        sb: &SubbandSpec,
        idx: usize,
        local: (usize, usize, usize),
        p_filter: f64,
    ) -> PassResult {
        let state = self.state.states[idx];
        let ctx = self.state.significance_model(subband, p_filter, state);

        let bit = match self.coder.decode(&mut self.state.bank, ctx) {
            Ok(b) => b,
            Err(t) => return Ok(Some(t)),
        };

        if bit {
            self.state.bank.set_probability(CTX_SIGN, 0.5);
            let sign = match self.coder.decode(&mut self.state.bank, CTX_SIGN) {
                Ok(b) => b,
                Err(t) => return Ok(Some(t)),
            };

            self.state.signs[idx] = sign;
            self.state.mags[idx] = T::from_u64(self.state.threshold);
            self.state.states[idx] = CoeffState::SNew;
            self.state.sig_counts[subband] += 1;
            self.state.mark_neighbors(sb, local.0, local.1, local.2);
        }

        Ok(None)
    }

    fn code_refinement(&mut self, idx: usize) -> PassResult {
        self.state.bank.set_probability(CTX_REFINEMENT, 0.5);
        let bit = match self.coder.decode(&mut self.state.bank, CTX_REFINEMENT) {
            Ok(b) => b,
            Err(term) => return Ok(Some(term)),
        };

        if bit {
            let m = self.state.mags[idx].to_u64() + self.state.threshold;
            self.state.mags[idx] = T::from_u64(m);
        }
        Ok(None)
    }
}
