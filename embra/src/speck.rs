//! The SPECK set-partitioning coder.
//!
//! Bit-plane coding of integer coefficient magnitudes through recursive
//! octree partitioning. The encoder keeps three structures: `LIS`, the
//! lists of insignificant sets bucketed by partition depth; `LIP`, the
//! insignificant pixels broken out of partitioned sets; and the `LSP`
//! mask marking pixels that already crossed a threshold. Each sorting pass
//! tests sets against the current threshold and splits the significant
//! ones; each refinement pass sends one more magnitude bit of every
//! previously significant pixel. Every emitted bit flows through the
//! arithmetic coder under a small context table, and sets that degenerate
//! along an axis are simply not split along it, which makes the same
//! engine serve volumes, slices and lines.

use smallvec::SmallVec;

use crate::arith::{ArithDecoder, ArithEncoder, ContextBank};
use crate::error::{PassResult, Termination};
use crate::mask::Mask;
use crate::quant::MagInt;

/// Context table shared by the encoder and decoder.
pub(crate) const CTX_SIGNIFICANCE: usize = 0;
/// Child set following an insignificant sibling.
pub(crate) const CTX_SIG_S0: usize = 1;
/// Child set following a skipped (empty) sibling.
pub(crate) const CTX_SIG_S1: usize = 2;
/// Child set following a significant sibling.
pub(crate) const CTX_SIG_S2: usize = 3;
pub(crate) const CTX_SIGN: usize = 4;
pub(crate) const CTX_REFINEMENT: usize = 5;
pub(crate) const NUM_CONTEXTS: usize = 6;

/// Hard cap on the number of bit-planes a stream may announce.
pub(crate) const MAX_BITPLANES: u8 = 128;

/// Sentinel marking a swept `LIP` entry.
const LIP_GARBAGE: u64 = u64::MAX;

/// Significance knowledge a parent passes down about a child set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigHint {
    /// Not known; the encoder must scan (the decoder must read).
    Dunno,
    Sig,
    Insig,
}

/// An axis-aligned box of coefficients. A set is a pixel iff every length
/// is one; a set is empty iff any length is zero.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Set3 {
    x: u32,
    y: u32,
    z: u32,
    lx: u32,
    ly: u32,
    lz: u32,
    /// Partition depth; doubles as the LIS bucket index.
    part_level: u16,
    garbage: bool,
}

impl Set3 {
    #[inline]
    fn is_pixel(&self) -> bool {
        self.lx == 1 && self.ly == 1 && self.lz == 1
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.lx == 0 || self.ly == 0 || self.lz == 0
    }
}

/// One subband the engine covers, in coefficient-domain coordinates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubbandSpec {
    pub(crate) origin: (usize, usize, usize),
    pub(crate) size: (usize, usize, usize),
    /// Initial partition depth of the covering set.
    pub(crate) level: usize,
}

/// Octree split in the fixed sibling order: child index bit 0 selects the
/// X-high half, bit 1 the Y-high half, bit 2 the Z-high half. Low halves
/// take `len - len/2` samples; axes of length one are not split.
fn partition(set: &Set3) -> SmallVec<[Set3; 8]> {
    let hx = set.lx / 2;
    let hy = set.ly / 2;
    let hz = set.lz / 2;
    let lx0 = set.lx - hx;
    let ly0 = set.ly - hy;
    let lz0 = set.lz - hz;

    let mut children = SmallVec::new();
    for i in 0..8u32 {
        let x_high = i & 1 != 0;
        let y_high = i & 2 != 0;
        let z_high = i & 4 != 0;

        children.push(Set3 {
            x: set.x + if x_high { lx0 } else { 0 },
            y: set.y + if y_high { ly0 } else { 0 },
            z: set.z + if z_high { lz0 } else { 0 },
            lx: if x_high { hx } else { lx0 },
            ly: if y_high { hy } else { ly0 },
            lz: if z_high { hz } else { lz0 },
            part_level: set.part_level + 1,
            garbage: false,
        });
    }

    children
}

/// State shared by the encoder and decoder halves.
#[derive(Debug)]
struct SpeckState<'a, T> {
    mags: Vec<T>,
    signs: Vec<bool>,
    dims: (usize, usize, usize),
    mask: Option<&'a Mask>,
    lis: Vec<Vec<Set3>>,
    lip: Vec<u64>,
    lsp_new: Vec<u64>,
    lsp_mask: Vec<bool>,
    threshold: u64,
    bank: ContextBank,
}

impl<'a, T: MagInt> SpeckState<'a, T> {
    fn new(
        mags: Vec<T>,
        signs: Vec<bool>,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        mask: Option<&'a Mask>,
    ) -> Self {
        let total = dims.0 * dims.1 * dims.2;
        debug_assert_eq!(mags.len(), total);
        debug_assert_eq!(signs.len(), total);

        // Deepest bucket any set can reach: the initial depth of a subband
        // plus one partition step per halving of each of its axes.
        let max_depth = subbands
            .iter()
            .map(|s| {
                s.level
                    + crate::math::num_of_partitions(s.size.0)
                    + crate::math::num_of_partitions(s.size.1)
                    + crate::math::num_of_partitions(s.size.2)
            })
            .max()
            .unwrap_or(0);

        let mut state = Self {
            mags,
            signs,
            dims,
            mask,
            lis: vec![Vec::new(); max_depth + 2],
            lip: Vec::with_capacity(total / 4),
            lsp_new: Vec::with_capacity(total / 8),
            lsp_mask: vec![false; total],
            threshold: 0,
            bank: ContextBank::new(NUM_CONTEXTS, true),
        };

        for sb in subbands {
            let set = Set3 {
                x: sb.origin.0 as u32,
                y: sb.origin.1 as u32,
                z: sb.origin.2 as u32,
                lx: sb.size.0 as u32,
                ly: sb.size.1 as u32,
                lz: sb.size.2 as u32,
                part_level: sb.level as u16,
                garbage: false,
            };

            if set.is_empty() || state.set_transparent(&set) {
                continue;
            }

            state.lis[set.part_level as usize].push(set);
        }

        state
    }

    #[inline]
    fn linearize(&self, x: u32, y: u32, z: u32) -> u64 {
        ((z as u64 * self.dims.1 as u64) + y as u64) * self.dims.0 as u64 + x as u64
    }

    /// Whether every sample of the set is masked out.
    fn set_transparent(&self, set: &Set3) -> bool {
        let Some(mask) = self.mask else {
            return false;
        };

        for z in set.z..set.z + set.lz {
            for y in set.y..set.y + set.ly {
                for x in set.x..set.x + set.lx {
                    if !mask.transparent(x as usize, y as usize, z as usize) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Child-set context from the previous sibling's outcome, per the
    /// three-way table: insignificant, skipped, significant.
    fn child_context(prior: ChildOutcome) -> usize {
        match prior {
            ChildOutcome::Insig => CTX_SIG_S0,
            ChildOutcome::Empty => CTX_SIG_S1,
            ChildOutcome::Sig => CTX_SIG_S2,
        }
    }

    /// Sweep garbage entries accumulated during the last pass.
    fn clean_lists(&mut self) {
        for bucket in &mut self.lis {
            bucket.retain(|s| !s.garbage);
        }
        self.lip.retain(|&idx| idx != LIP_GARBAGE);
    }

    /// Merge the pixels that became significant this plane into the mask.
    fn promote_newly_significant(&mut self) {
        for &idx in &self.lsp_new {
            self.lsp_mask[idx as usize] = true;
        }
        self.lsp_new.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildOutcome {
    Insig,
    Sig,
    Empty,
}

/// The encoder half of the SPECK engine.
#[derive(Debug)]
pub(crate) struct SpeckEncoder<'a, T> {
    state: SpeckState<'a, T>,
    coder: ArithEncoder,
    num_bitplanes: u8,
    planes_done: u8,
}

impl<'a, T: MagInt> SpeckEncoder<'a, T> {
    pub(crate) fn new(
        mags: Vec<T>,
        signs: Vec<bool>,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        mask: Option<&'a Mask>,
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

        let mut state = SpeckState::new(mags, signs, dims, subbands, mask);
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

    pub(crate) fn planes_remaining(&self) -> u8 {
        self.num_bitplanes - self.planes_done
    }

    /// Advance to the next bit-plane after a sorting + refinement pair.
    pub(crate) fn next_plane(&mut self) {
        self.state.threshold /= 2;
        self.state.clean_lists();
        self.planes_done += 1;
    }

    /// Terminate the arithmetic stream; returns the payload and its useful
    /// bit count.
    pub(crate) fn finish(self) -> (Vec<u8>, u64) {
        self.coder.finish()
    }

    /// Decide a set's significance by scanning in (z, y, x) order. On a
    /// hit, also reports the position relative to the set origin so the
    /// caller can deduce child significance.
    fn decide_significance(&self, set: &Set3) -> Option<(u32, u32, u32)> {
        let t = self.state.threshold;
        for z in set.z..set.z + set.lz {
            for y in set.y..set.y + set.ly {
                let row = self.state.linearize(set.x, y, z) as usize;
                for dx in 0..set.lx {
                    if self.state.mags[row + dx as usize].to_u64() >= t {
                        return Some((dx, y - set.y, z - set.z));
                    }
                }
            }
        }

        None
    }

    /// One sorting pass over the current threshold: `LIP` first, then the
    /// LIS buckets from the deepest (coarsest subband) to the shallowest.
    pub(crate) fn sorting_pass(&mut self) -> PassResult {
        let mut dummy = 0usize;

        for loc in 0..self.state.lip.len() {
            if let Some(t) = self.process_p(loc, SigHint::Dunno, &mut dummy, true)? {
                return Ok(Some(t));
            }
        }

        for bucket in (0..self.state.lis.len()).rev() {
            for idx in 0..self.state.lis[bucket].len() {
                if let Some(t) =
                    self.process_s(bucket, idx, SigHint::Dunno, &mut dummy, true, CTX_SIGNIFICANCE)?
                {
                    return Ok(Some(t));
                }
            }
        }

        Ok(None)
    }

    fn process_p(
        &mut self,
        loc: usize,
        hint: SigHint,
        counter: &mut usize,
        emit: bool,
    ) -> PassResult {
        self.process_p_ctx(loc, hint, counter, emit, CTX_SIGNIFICANCE)
    }

    fn process_p_ctx(
        &mut self,
        loc: usize,
        hint: SigHint,
        counter: &mut usize,
        emit: bool,
        ctx: usize,
    ) -> PassResult {
        let pixel_idx = self.state.lip[loc];
        let is_sig = match hint {
            SigHint::Dunno => {
                self.state.mags[pixel_idx as usize].to_u64() >= self.state.threshold
            }
            SigHint::Sig => true,
            SigHint::Insig => false,
        };

        if emit {
            if let Some(t) = self.coder.encode(&mut self.state.bank, ctx, is_sig) {
                return Ok(Some(t));
            }
        }

        if is_sig {
            *counter += 1;

            let sign = self.state.signs[pixel_idx as usize];
            if let Some(t) = self.coder.encode(&mut self.state.bank, CTX_SIGN, sign) {
                return Ok(Some(t));
            }

            let m = self.state.mags[pixel_idx as usize].to_u64() - self.state.threshold;
            self.state.mags[pixel_idx as usize] = T::from_u64(m);
            self.state.lsp_new.push(pixel_idx);
            self.state.lip[loc] = LIP_GARBAGE;
        }

        Ok(None)
    }

    fn process_s(
        &mut self,
        bucket: usize,
        idx: usize,
        hint: SigHint,
        counter: &mut usize,
        emit: bool,
        ctx: usize,
    ) -> PassResult {
        let set = self.state.lis[bucket][idx];

        let mut child_hints = [SigHint::Dunno; 8];
        let is_sig = match hint {
            SigHint::Dunno => {
                if let Some((dx, dy, dz)) = self.decide_significance(&set) {
                    // The scan order proves which child octant fired, and a
                    // hit in the Z-high half proves the four Z-low children
                    // hold nothing above the threshold.
                    let mut sub_i = 0usize;
                    sub_i += usize::from(dx >= set.lx - set.lx / 2);
                    sub_i += 2 * usize::from(dy >= set.ly - set.ly / 2);
                    sub_i += 4 * usize::from(dz >= set.lz - set.lz / 2);
                    child_hints[sub_i] = SigHint::Sig;

                    if sub_i >= 4 {
                        for h in child_hints.iter_mut().take(4) {
                            *h = SigHint::Insig;
                        }
                    }

                    true
                } else {
                    false
                }
            }
            SigHint::Sig => true,
            SigHint::Insig => false,
        };

        if emit {
            if let Some(t) = self.coder.encode(&mut self.state.bank, ctx, is_sig) {
                return Ok(Some(t));
            }
        }

        if is_sig {
            *counter += 1;
            let result = self.code_s(&set, child_hints)?;
            self.state.lis[bucket][idx].garbage = true;
            if result.is_some() {
                return Ok(result);
            }
        }

        Ok(None)
    }

    /// Partition a significant set and process its children in sibling
    /// order. The last surviving child is inferred significant (and pays
    /// no bit) when no earlier sibling was.
    fn code_s(&mut self, set: &Set3, child_hints: [SigHint; 8]) -> PassResult {
        let children = partition(set);

        // Empty children (degenerate axes or fully masked) drop out but
        // still steer the context of their successor.
        let mut live: SmallVec<[(Set3, SigHint); 8]> = SmallVec::new();
        let mut contexts: SmallVec<[usize; 8]> = SmallVec::new();
        let mut prior = ChildOutcome::Insig;

        for (child, hint) in children.into_iter().zip(child_hints) {
            if child.is_empty() || self.state.set_transparent(&child) {
                prior = ChildOutcome::Empty;
                continue;
            }
            contexts.push(SpeckState::<T>::child_context(prior));
            live.push((child, hint));
            prior = ChildOutcome::Insig;
        }

        let last = live.len().saturating_sub(1);
        let mut sig_counter = 0usize;
        let mut prev_sig = false;

        for (i, (child, mut hint)) in live.into_iter().enumerate() {
            let mut ctx = contexts[i];
            if i > 0 && prev_sig {
                ctx = CTX_SIG_S2;
            }

            let mut emit = true;
            if i == last && sig_counter == 0 {
                emit = false;
                hint = SigHint::Sig;
            }

            let before = sig_counter;
            if child.is_pixel() {
                let pixel_idx = self.state.linearize(child.x, child.y, child.z);
                self.state.lip.push(pixel_idx);
                let loc = self.state.lip.len() - 1;
                if let Some(t) = self.process_p_ctx(loc, hint, &mut sig_counter, emit, ctx)? {
                    return Ok(Some(t));
                }
            } else {
                let bucket = child.part_level as usize;
                self.state.lis[bucket].push(child);
                let idx = self.state.lis[bucket].len() - 1;
                if let Some(t) = self.process_s(bucket, idx, hint, &mut sig_counter, emit, ctx)? {
                    return Ok(Some(t));
                }
            }

            prev_sig = sig_counter > before;
        }

        Ok(None)
    }

    /// One refinement pass: every previously significant pixel sends the
    /// next magnitude bit.
    pub(crate) fn refinement_pass(&mut self) -> PassResult {
        let t = self.state.threshold;

        for i in 0..self.state.lsp_mask.len() {
            if !self.state.lsp_mask[i] {
                continue;
            }

            let m = self.state.mags[i].to_u64();
            let bit = m >= t;
            if let Some(term) = self.coder.encode(&mut self.state.bank, CTX_REFINEMENT, bit) {
                return Ok(Some(term));
            }
            if bit {
                self.state.mags[i] = T::from_u64(m - t);
            }
        }

        self.state.promote_newly_significant();
        Ok(None)
    }
}

/// The decoder half of the SPECK engine. It mirrors the encoder's control
/// flow exactly; the two sides stay in lockstep because every branch is
/// driven either by decoded bits or by geometry both sides share.
#[derive(Debug)]
pub(crate) struct SpeckDecoder<'a, T> {
    state: SpeckState<'a, T>,
    coder: ArithDecoder<'a>,
    num_bitplanes: u8,
    planes_done: u8,
}

impl<'a, T: MagInt> SpeckDecoder<'a, T> {
    pub(crate) fn new(
        payload: &'a [u8],
        num_useful_bits: u64,
        num_bitplanes: u8,
        dims: (usize, usize, usize),
        subbands: &[SubbandSpec],
        mask: Option<&'a Mask>,
    ) -> Self {
        let total = dims.0 * dims.1 * dims.2;
        let mut state = SpeckState::new(
            vec![T::default(); total],
            vec![true; total],
            dims,
            subbands,
            mask,
        );
        state.threshold = 1u64 << (num_bitplanes.clamp(1, 64) - 1);

        Self {
            state,
            coder: ArithDecoder::new(payload, num_useful_bits),
            num_bitplanes,
            planes_done: 0,
        }
    }

    pub(crate) fn planes_remaining(&self) -> u8 {
        self.num_bitplanes - self.planes_done
    }

    pub(crate) fn next_plane(&mut self) {
        self.state.threshold /= 2;
        self.state.clean_lists();
        self.planes_done += 1;
    }

    pub(crate) fn into_coeffs(self) -> (Vec<T>, Vec<bool>) {
        (self.state.mags, self.state.signs)
    }

    fn read(&mut self, ctx: usize) -> core::result::Result<bool, Termination> {
        self.coder.decode(&mut self.state.bank, ctx)
    }

    pub(crate) fn sorting_pass(&mut self) -> PassResult {
        let mut dummy = 0usize;

        for loc in 0..self.state.lip.len() {
            if let Some(t) = self.process_p(loc, &mut dummy, true, CTX_SIGNIFICANCE)? {
                return Ok(Some(t));
            }
        }

        for bucket in (0..self.state.lis.len()).rev() {
            for idx in 0..self.state.lis[bucket].len() {
                if let Some(t) = self.process_s(bucket, idx, &mut dummy, true, CTX_SIGNIFICANCE)? {
                    return Ok(Some(t));
                }
            }
        }

        Ok(None)
    }

    fn process_p(
        &mut self,
        loc: usize,
        counter: &mut usize,
        read: bool,
        ctx: usize,
    ) -> PassResult {
        let pixel_idx = self.state.lip[loc];

        let is_sig = if read {
            match self.read(ctx) {
                Ok(b) => b,
                Err(t) => return Ok(Some(t)),
            }
        } else {
            true
        };

        if is_sig {
            *counter += 1;

            let sign = match self.read(CTX_SIGN) {
                Ok(b) => b,
                Err(t) => return Ok(Some(t)),
            };
            self.state.signs[pixel_idx as usize] = sign;
            self.state.mags[pixel_idx as usize] = T::from_u64(self.state.threshold);
            self.state.lsp_new.push(pixel_idx);
            self.state.lip[loc] = LIP_GARBAGE;
        }

        Ok(None)
    }

    fn process_s(
        &mut self,
        bucket: usize,
        idx: usize,
        counter: &mut usize,
        read: bool,
        ctx: usize,
    ) -> PassResult {
        let set = self.state.lis[bucket][idx];

        let is_sig = if read {
            match self.read(ctx) {
                Ok(b) => b,
                Err(t) => return Ok(Some(t)),
            }
        } else {
            true
        };

        if is_sig {
            *counter += 1;
            let result = self.code_s(&set)?;
            self.state.lis[bucket][idx].garbage = true;
            if result.is_some() {
                return Ok(result);
            }
        }

        Ok(None)
    }

    fn code_s(&mut self, set: &Set3) -> PassResult {
        let children = partition(set);

        let mut live: SmallVec<[Set3; 8]> = SmallVec::new();
        let mut contexts: SmallVec<[usize; 8]> = SmallVec::new();
        let mut prior = ChildOutcome::Insig;

        for child in children {
            if child.is_empty() || self.state.set_transparent(&child) {
                prior = ChildOutcome::Empty;
                continue;
            }
            contexts.push(SpeckState::<T>::child_context(prior));
            live.push(child);
            prior = ChildOutcome::Insig;
        }

        let last = live.len().saturating_sub(1);
        let mut sig_counter = 0usize;
        let mut prev_sig = false;

        for (i, child) in live.into_iter().enumerate() {
            let mut ctx = contexts[i];
            if i > 0 && prev_sig {
                ctx = CTX_SIG_S2;
            }

            let read = !(i == last && sig_counter == 0);

            let before = sig_counter;
            if child.is_pixel() {
                let pixel_idx = self.state.linearize(child.x, child.y, child.z);
                self.state.lip.push(pixel_idx);
                let loc = self.state.lip.len() - 1;
                if let Some(t) = self.process_p(loc, &mut sig_counter, read, ctx)? {
                    return Ok(Some(t));
                }
            } else {
                let bucket = child.part_level as usize;
                self.state.lis[bucket].push(child);
                let idx = self.state.lis[bucket].len() - 1;
                if let Some(t) = self.process_s(bucket, idx, &mut sig_counter, read, ctx)? {
                    return Ok(Some(t));
                }
            }

            prev_sig = sig_counter > before;
        }

        Ok(None)
    }

    pub(crate) fn refinement_pass(&mut self) -> PassResult {
        let t = self.state.threshold;

        for i in 0..self.state.lsp_mask.len() {
            if !self.state.lsp_mask[i] {
                continue;
            }

            let bit = match self.read(CTX_REFINEMENT) {
                Ok(b) => b,
                Err(term) => return Ok(Some(term)),
            };
            if bit {
                let m = self.state.mags[i].to_u64() + t;
                self.state.mags[i] = T::from_u64(m);
            }
        }

        self.state.promote_newly_significant();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A single subband covering the whole extent, for tests that do not
    /// involve a wavelet decomposition.
    fn whole_volume(dims: (usize, usize, usize)) -> Vec<SubbandSpec> {
        vec![SubbandSpec {
            origin: (0, 0, 0),
            size: dims,
            level: 0,
        }]
    }

    fn round_trip(
        mags: Vec<u64>,
        signs: Vec<bool>,
        dims: (usize, usize, usize),
    ) -> (Vec<u64>, Vec<bool>) {
        let subbands = whole_volume(dims);
        let mut enc = SpeckEncoder::new(mags, signs, dims, &subbands, None, None);
        let num_bitplanes = enc.num_bitplanes();

        while enc.planes_remaining() > 0 {
            assert_eq!(enc.sorting_pass().unwrap(), None);
            assert_eq!(enc.refinement_pass().unwrap(), None);
            enc.next_plane();
        }
        let (payload, useful_bits) = enc.finish();

        let mut dec: SpeckDecoder<'_, u64> =
            SpeckDecoder::new(&payload, useful_bits, num_bitplanes, dims, &subbands, None);
        while dec.planes_remaining() > 0 {
            assert_eq!(dec.sorting_pass().unwrap(), None);
            assert_eq!(dec.refinement_pass().unwrap(), None);
            dec.next_plane();
        }

        dec.into_coeffs()
    }

    #[test]
    fn sparse_volume_round_trip() {
        // A handful of non-zero entries in a 4×3×8 volume.
        let dims = (4, 3, 8);
        let mut mags = vec![0u64; 4 * 3 * 8];
        let mut signs = vec![true; 4 * 3 * 8];
        for &(idx, mag, negative) in &[
            (4usize, 1u64, false),
            (7, 3, true),
            (10, 7, false),
            (11, 9, true),
            (16, 10, false),
            (19, 12, true),
            (26, 18, false),
            (29, 19, true),
            (32, 32, false),
            (39, 32, true),
        ] {
            mags[idx] = mag;
            signs[idx] = !negative;
        }

        let (out_mags, out_signs) = round_trip(mags.clone(), signs.clone(), dims);

        assert_eq!(out_mags, mags);
        // Signs are only defined for non-zero magnitudes.
        for i in 0..mags.len() {
            if mags[i] != 0 {
                assert_eq!(out_signs[i], signs[i], "sign mismatch at {i}");
            }
        }
    }

    #[test]
    fn dense_volume_round_trip() {
        let dims = (7, 5, 6);
        let mags: Vec<u64> = (0..7 * 5 * 6).map(|i| (i * i % 97) as u64).collect();
        let signs: Vec<bool> = (0..7 * 5 * 6).map(|i| i % 3 != 0).collect();

        let (out_mags, out_signs) = round_trip(mags.clone(), signs.clone(), dims);

        assert_eq!(out_mags, mags);
        for i in 0..mags.len() {
            if mags[i] != 0 {
                assert_eq!(out_signs[i], signs[i]);
            }
        }
    }

    #[test]
    fn one_dimensional_round_trip() {
        // A line degenerates the octree split into the bisection rule.
        let dims = (33, 1, 1);
        let mags: Vec<u64> = (0..33).map(|i| if i % 5 == 0 { i as u64 * 3 } else { 0 }).collect();
        let signs: Vec<bool> = (0..33).map(|i| i % 2 == 0).collect();

        let (out_mags, out_signs) = round_trip(mags.clone(), signs.clone(), dims);

        assert_eq!(out_mags, mags);
        for i in 0..mags.len() {
            if mags[i] != 0 {
                assert_eq!(out_signs[i], signs[i]);
            }
        }
    }

    #[test]
    fn all_zero_volume_round_trip() {
        let dims = (6, 6, 6);
        let (out_mags, _) = round_trip(vec![0; 216], vec![true; 216], dims);
        assert!(out_mags.iter().all(|&m| m == 0));
    }

    #[test]
    fn narrow_width_round_trip() {
        let dims = (5, 4, 3);
        let mags: Vec<u8> = (0..60u32).map(|i| (i * 7 % 256) as u8).collect();
        let signs = vec![true; 60];
        let subbands = whole_volume(dims);

        let mut enc = SpeckEncoder::new(mags.clone(), signs, dims, &subbands, None, None);
        let num_bitplanes = enc.num_bitplanes();
        assert!(num_bitplanes <= 8);

        while enc.planes_remaining() > 0 {
            enc.sorting_pass().unwrap();
            enc.refinement_pass().unwrap();
            enc.next_plane();
        }
        let (payload, useful_bits) = enc.finish();

        let mut dec: SpeckDecoder<'_, u8> =
            SpeckDecoder::new(&payload, useful_bits, num_bitplanes, dims, &subbands, None);
        while dec.planes_remaining() > 0 {
            dec.sorting_pass().unwrap();
            dec.refinement_pass().unwrap();
            dec.next_plane();
        }

        let (out_mags, _) = dec.into_coeffs();
        assert_eq!(out_mags, mags);
    }

    #[test]
    fn budget_stops_encoding_cleanly() {
        let dims = (16, 16, 4);
        let mags: Vec<u64> = (0..1024u64).map(|i| i * 31 % 1023).collect();
        let signs = vec![true; 1024];
        let subbands = whole_volume(dims);

        let mut enc = SpeckEncoder::new(mags, signs, dims, &subbands, None, Some(512));
        let mut terminated = false;
        while enc.planes_remaining() > 0 {
            if enc.sorting_pass().unwrap() == Some(Termination::BudgetMet)
                || enc.refinement_pass().unwrap() == Some(Termination::BudgetMet)
            {
                terminated = true;
                break;
            }
            enc.next_plane();
        }
        assert!(terminated);

        let (payload, _) = enc.finish();
        assert!(payload.len() < 200);
    }

    #[test]
    fn truncated_stream_decodes_partially() {
        let dims = (8, 8, 8);
        let mags: Vec<u64> = (0..512u64).map(|i| (i * 13) % 300).collect();
        let signs = vec![true; 512];
        let subbands = whole_volume(dims);

        let mut enc = SpeckEncoder::new(mags.clone(), signs, dims, &subbands, None, None);
        let num_bitplanes = enc.num_bitplanes();
        while enc.planes_remaining() > 0 {
            enc.sorting_pass().unwrap();
            enc.refinement_pass().unwrap();
            enc.next_plane();
        }
        let (payload, useful_bits) = enc.finish();

        // Decode from a prefix; the decoder must stop via EndOfStream and
        // still hand back a coefficient array.
        let cut = payload.len() / 3;
        let mut dec: SpeckDecoder<'_, u64> = SpeckDecoder::new(
            &payload[..cut],
            (cut as u64) * 8,
            num_bitplanes,
            dims,
            &subbands,
            None,
        );

        let mut ended = false;
        while dec.planes_remaining() > 0 {
            if dec.sorting_pass().unwrap() == Some(Termination::EndOfStream)
                || dec.refinement_pass().unwrap() == Some(Termination::EndOfStream)
            {
                ended = true;
                break;
            }
            dec.next_plane();
        }
        assert!(ended);

        // Partial magnitudes never exceed what a full decode yields plus
        // the current threshold.
        let (out_mags, _) = dec.into_coeffs();
        assert_eq!(out_mags.len(), 512);
    }

    #[test]
    fn masked_positions_are_never_coded() {
        use crate::mask::Mask;

        let dims = (8, 6, 4);
        let total = 8 * 6 * 4;
        let mask = Mask::from_fn(8, 6, 4, |x, _, _| x < 4).unwrap();

        let mut mags = vec![0u64; total];
        for (i, m) in mags.iter_mut().enumerate() {
            if mask.opaque_at(i) {
                *m = (i as u64 * 7) % 50;
            }
        }
        let signs = vec![true; total];
        let subbands = whole_volume(dims);

        let mut enc =
            SpeckEncoder::new(mags.clone(), signs, dims, &subbands, Some(&mask), None);
        let num_bitplanes = enc.num_bitplanes();
        while enc.planes_remaining() > 0 {
            enc.sorting_pass().unwrap();
            enc.refinement_pass().unwrap();
            enc.next_plane();
        }
        let (payload, useful_bits) = enc.finish();

        let mut dec: SpeckDecoder<'_, u64> = SpeckDecoder::new(
            &payload,
            useful_bits,
            num_bitplanes,
            dims,
            &subbands,
            Some(&mask),
        );
        while dec.planes_remaining() > 0 {
            dec.sorting_pass().unwrap();
            dec.refinement_pass().unwrap();
            dec.next_plane();
        }

        let (out_mags, _) = dec.into_coeffs();
        assert_eq!(out_mags, mags);
    }

    #[test]
    fn partition_orders_children_and_skips_degenerate_axes() {
        let set = Set3 {
            x: 0,
            y: 0,
            z: 0,
            lx: 5,
            ly: 1,
            lz: 2,
            part_level: 0,
            garbage: false,
        };

        let children = partition(&set);
        assert_eq!(children.len(), 8);

        // X splits 5 -> 3 + 2, Y cannot split, Z splits 1 + 1.
        assert_eq!((children[0].lx, children[0].ly, children[0].lz), (3, 1, 1));
        assert_eq!((children[1].x, children[1].lx), (3, 2));
        assert!(children[2].is_empty());
        assert_eq!(children[4].z, 1);

        let live = children.iter().filter(|c| !c.is_empty()).count();
        assert_eq!(live, 4);
    }
}
