//! The context-adaptive binary arithmetic coder.
//!
//! A 16-bit range coder in the classic incremental style, with a bank of
//! per-context frequency models. The set-partitioning engines select a
//! context before each symbol; every bit they emit is serialized through
//! this coder. The encoder honors an optional bit budget and the decoder
//! tolerates truncated streams, which together give the bitstream its
//! embedded property.

use crate::error::Termination;
use embra_common::bit::{BitReader, BitWriter};

const CODE_BITS: u32 = 16;
const TOP: u32 = (1 << CODE_BITS) - 1;
const FIRST_QTR: u32 = TOP / 4 + 1;
const HALF: u32 = 2 * FIRST_QTR;
const THIRD_QTR: u32 = 3 * FIRST_QTR;

/// Adaptive counts are halved once their total reaches this value.
const MAX_FREQUENCY: u32 = (1 << 14) - 1;

/// Resolution used when converting caller-supplied probabilities to counts.
const PROB_RESOLUTION: u32 = 1 << 12;

/// Number of zero bits the decoder may fabricate past the end of the stream
/// before reporting `EndOfStream`. The encoder's flush leaves the decoder
/// registers this far ahead of the last useful bit.
const GARBAGE_ALLOWANCE: u32 = CODE_BITS - 2;

/// One binary probability model.
#[derive(Debug, Clone, Copy)]
struct Context {
    /// Occurrence count of symbol 0.
    c0: u32,
    /// Occurrence count of symbol 1.
    c1: u32,
}

impl Context {
    fn new() -> Self {
        Self { c0: 1, c1: 1 }
    }

    #[inline]
    fn total(&self) -> u32 {
        self.c0 + self.c1
    }

    fn update(&mut self, symbol: bool) {
        if symbol {
            self.c1 += 1;
        } else {
            self.c0 += 1;
        }

        if self.total() >= MAX_FREQUENCY {
            self.c0 = (self.c0 + 1) / 2;
            self.c1 = (self.c1 + 1) / 2;
        }
    }
}

/// A bank of per-context probability models shared by an encoder/decoder
/// pair. Both sides must create the bank with identical parameters and
/// drive it with the identical context sequence.
#[derive(Debug, Clone)]
pub(crate) struct ContextBank {
    contexts: Vec<Context>,
    /// When false, the frequency tables are frozen after initialization.
    adaptive: bool,
}

impl ContextBank {
    pub(crate) fn new(num_contexts: usize, adaptive: bool) -> Self {
        Self {
            contexts: vec![Context::new(); num_contexts],
            adaptive,
        }
    }

    /// Overwrite one context with a fixed probability of symbol 1.
    ///
    /// Used by the Tarp engine, which derives a fresh estimate for every
    /// coefficient; its bank is non-adaptive by construction.
    pub(crate) fn set_probability(&mut self, ctx: usize, p_one: f64) {
        let scaled = (p_one * PROB_RESOLUTION as f64) as u32;
        let c1 = scaled.clamp(1, PROB_RESOLUTION - 1);
        self.contexts[ctx] = Context {
            c0: PROB_RESOLUTION - c1,
            c1,
        };
    }
}

/// The encoder half of the coder.
///
/// The register state is explicit so that the coder can be driven
/// incrementally, pass by pass, by the bit-plane controller.
#[derive(Debug)]
pub(crate) struct ArithEncoder {
    low: u32,
    high: u32,
    /// Underflow bits waiting for the next determined bit.
    pending: u64,
    writer: BitWriter,
    budget_bits: Option<u64>,
}

impl ArithEncoder {
    pub(crate) fn new(budget_bits: Option<u64>) -> Self {
        Self {
            low: 0,
            high: TOP,
            pending: 0,
            writer: BitWriter::new(),
            budget_bits,
        }
    }

    /// Code one symbol under the given context.
    ///
    /// Returns `Some(BudgetMet)` once the bit budget is exhausted; the
    /// caller must stop coding and flush.
    pub(crate) fn encode(
        &mut self,
        bank: &mut ContextBank,
        ctx: usize,
        symbol: bool,
    ) -> Option<Termination> {
        if let Some(budget) = self.budget_bits {
            if self.writer.bit_count() >= budget {
                return Some(Termination::BudgetMet);
            }
        }

        let model = &mut bank.contexts[ctx];
        let total = model.total() as u64;
        let (cum_low, cum_high) = if symbol {
            (model.c0 as u64, total)
        } else {
            (0, model.c0 as u64)
        };

        let range = (self.high - self.low + 1) as u64;
        self.high = self.low + (range * cum_high / total) as u32 - 1;
        self.low += (range * cum_low / total) as u32;

        loop {
            if self.high < HALF {
                self.emit(false);
            } else if self.low >= HALF {
                self.emit(true);
                self.low -= HALF;
                self.high -= HALF;
            } else if self.low >= FIRST_QTR && self.high < THIRD_QTR {
                self.pending += 1;
                self.low -= FIRST_QTR;
                self.high -= FIRST_QTR;
            } else {
                break;
            }

            self.low <<= 1;
            self.high = (self.high << 1) + 1;
        }

        if bank.adaptive {
            bank.contexts[ctx].update(symbol);
        }

        None
    }

    fn emit(&mut self, bit: bool) {
        self.writer.put_bit(bit);
        while self.pending > 0 {
            self.writer.put_bit(!bit);
            self.pending -= 1;
        }
    }

    /// Terminate the stream and return the payload bytes together with the
    /// number of useful bits (before byte-alignment padding).
    pub(crate) fn finish(mut self) -> (Vec<u8>, u64) {
        // Two more bits disambiguate the final interval.
        self.pending += 1;
        self.emit(self.low >= FIRST_QTR);

        let useful_bits = self.writer.bit_count();
        (self.writer.finish(), useful_bits)
    }
}

/// The decoder half of the coder.
#[derive(Debug)]
pub(crate) struct ArithDecoder<'a> {
    low: u32,
    high: u32,
    value: u32,
    reader: BitReader<'a>,
    /// Bits remaining per the stream header; reads beyond are fabricated.
    bits_left: u64,
    garbage_bits: u32,
}

impl<'a> ArithDecoder<'a> {
    pub(crate) fn new(data: &'a [u8], num_useful_bits: u64) -> Self {
        let mut decoder = Self {
            low: 0,
            high: TOP,
            value: 0,
            reader: BitReader::new(data),
            bits_left: num_useful_bits,
            garbage_bits: 0,
        };

        for _ in 0..CODE_BITS {
            decoder.value = (decoder.value << 1) | decoder.next_bit() as u32;
        }

        decoder
    }

    /// Read the next raw bit, fabricating zeros past the end of the stream.
    fn next_bit(&mut self) -> bool {
        if self.bits_left == 0 {
            self.garbage_bits += 1;
            return false;
        }

        self.bits_left -= 1;
        self.reader.get_bit().unwrap_or_else(|| {
            self.garbage_bits += 1;
            false
        })
    }

    /// Decode one symbol under the given context, or report `EndOfStream`
    /// once the fabricated-bit allowance is used up.
    pub(crate) fn decode(
        &mut self,
        bank: &mut ContextBank,
        ctx: usize,
    ) -> core::result::Result<bool, Termination> {
        if self.garbage_bits > GARBAGE_ALLOWANCE {
            return Err(Termination::EndOfStream);
        }

        let model = &bank.contexts[ctx];
        let total = model.total() as u64;
        let range = (self.high - self.low + 1) as u64;

        let cum = (((self.value - self.low + 1) as u64 * total - 1) / range) as u32;
        let symbol = cum >= model.c0;

        let (cum_low, cum_high) = if symbol {
            (model.c0 as u64, total)
        } else {
            (0, model.c0 as u64)
        };

        self.high = self.low + (range * cum_high / total) as u32 - 1;
        self.low += (range * cum_low / total) as u32;

        loop {
            if self.high < HALF {
                // Nothing to adjust.
            } else if self.low >= HALF {
                self.value -= HALF;
                self.low -= HALF;
                self.high -= HALF;
            } else if self.low >= FIRST_QTR && self.high < THIRD_QTR {
                self.value -= FIRST_QTR;
                self.low -= FIRST_QTR;
                self.high -= FIRST_QTR;
            } else {
                break;
            }

            self.low <<= 1;
            self.high = (self.high << 1) + 1;
            self.value = (self.value << 1) | self.next_bit() as u32;
        }

        if bank.adaptive {
            bank.contexts[ctx].update(symbol);
        }

        Ok(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random_symbols(len: usize) -> Vec<(usize, bool)> {
        // A fixed xorshift sequence; three contexts with different biases.
        let mut state = 0x9E3779B97F4A7C15u64;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let ctx = (state % 3) as usize;
            let bias = [13u64, 64, 230][ctx];
            out.push((ctx, (state >> 8) % 256 < bias));
        }
        out
    }

    #[test]
    fn adaptive_round_trip() {
        let symbols = pseudo_random_symbols(5000);

        let mut bank = ContextBank::new(3, true);
        let mut encoder = ArithEncoder::new(None);
        for &(ctx, symbol) in &symbols {
            assert_eq!(encoder.encode(&mut bank, ctx, symbol), None);
        }
        let (data, useful_bits) = encoder.finish();
        assert!(useful_bits <= data.len() as u64 * 8);

        let mut bank = ContextBank::new(3, true);
        let mut decoder = ArithDecoder::new(&data, useful_bits);
        for &(ctx, symbol) in &symbols {
            assert_eq!(decoder.decode(&mut bank, ctx), Ok(symbol));
        }
    }

    #[test]
    fn skewed_symbols_compress() {
        // 5000 highly predictable symbols should code well below one bit
        // per symbol once the model adapts.
        let mut bank = ContextBank::new(1, true);
        let mut encoder = ArithEncoder::new(None);
        for i in 0..5000 {
            encoder.encode(&mut bank, 0, i % 100 == 0);
        }
        let (_, useful_bits) = encoder.finish();
        assert!(useful_bits < 2500);
    }

    #[test]
    fn non_adaptive_probabilities_round_trip() {
        let symbols = pseudo_random_symbols(2000);

        let mut bank = ContextBank::new(1, false);
        let mut encoder = ArithEncoder::new(None);
        for (i, &(_, symbol)) in symbols.iter().enumerate() {
            // The caller re-derives a probability before every symbol, the
            // way the Tarp engine does.
            let p = 0.05 + 0.9 * ((i % 17) as f64 / 17.0);
            bank.set_probability(0, p);
            encoder.encode(&mut bank, 0, symbol);
        }
        let (data, useful_bits) = encoder.finish();

        let mut bank = ContextBank::new(1, false);
        let mut decoder = ArithDecoder::new(&data, useful_bits);
        for (i, &(_, symbol)) in symbols.iter().enumerate() {
            let p = 0.05 + 0.9 * ((i % 17) as f64 / 17.0);
            bank.set_probability(0, p);
            assert_eq!(decoder.decode(&mut bank, 0), Ok(symbol));
        }
    }

    #[test]
    fn budget_terminates_encoding() {
        let mut bank = ContextBank::new(1, true);
        let mut encoder = ArithEncoder::new(Some(64));

        let mut coded = 0;
        for i in 0..10000 {
            match encoder.encode(&mut bank, 0, i % 2 == 0) {
                None => coded += 1,
                Some(Termination::BudgetMet) => break,
                Some(other) => panic!("unexpected termination {other:?}"),
            }
        }

        assert!(coded < 10000);
        let (data, useful_bits) = encoder.finish();
        // The flush may run a few bits past the budget, but not more than
        // the termination sequence needs.
        assert!(useful_bits >= 64);
        assert!(data.len() <= 64 / 8 + 5);
    }

    #[test]
    fn truncated_stream_reports_end() {
        let mut bank = ContextBank::new(1, true);
        let mut encoder = ArithEncoder::new(None);
        for i in 0..4000 {
            encoder.encode(&mut bank, 0, i % 3 == 0);
        }
        let (data, useful_bits) = encoder.finish();

        // Cut the stream at a byte boundary and decode until the decoder
        // gives up. It must neither panic nor loop forever.
        let cut = data.len() / 2;
        let mut bank2 = ContextBank::new(1, true);
        let mut decoder = ArithDecoder::new(&data[..cut], useful_bits.min(cut as u64 * 8));

        let mut decoded = 0;
        for _ in 0..4000 {
            match decoder.decode(&mut bank2, 0) {
                Ok(_) => decoded += 1,
                Err(Termination::EndOfStream) => break,
                Err(other) => panic!("unexpected termination {other:?}"),
            }
        }

        assert!(decoded < 4000);
    }
}
