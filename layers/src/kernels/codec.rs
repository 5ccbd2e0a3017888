//! Channel Coding Kernels
//!
//! A rate-1/2 systematic block code: the codeword is the information bits
//! followed by an equal-length parity section, each parity bit an XOR of a
//! fixed tap pattern over the information bits. Lifting-style structure
//! keeps encode and the parity check O(K) per bit with small constants.
//! The decoder hard-decides the soft bits, recovers the systematic section,
//! and counts parity failures as a link-quality signal.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::kernels::demul::DEMOD_LANES;
use crate::kernels::Kernel;
use common::{EventKind, Tag};
use std::sync::Arc;
use tracing::debug;

/// Tap offsets combined into each parity bit.
const PARITY_TAPS: [usize; 5] = [0, 3, 7, 12, 19];

/// Codeword length in bits for `k` information bits.
pub fn codeword_bits(k: usize) -> usize {
    2 * k
}

/// Encode `info` (bytes, MSB first) into `cw` as one bit per byte.
/// `cw.len()` must be `codeword_bits(info.len() * 8)`.
pub fn encode_block(info: &[u8], cw: &mut [u8]) {
    let k = info.len() * 8;
    debug_assert_eq!(cw.len(), codeword_bits(k));
    for bit in 0..k {
        cw[bit] = (info[bit / 8] >> (7 - bit % 8)) & 1;
    }
    for p in 0..k {
        let mut parity = 0u8;
        for &tap in PARITY_TAPS.iter() {
            parity ^= cw[(p + tap) % k];
        }
        cw[k + p] = parity;
    }
}

/// Decode a codeword from per-bit soft values (`llr(i)` positive means bit
/// i is 0). Writes the recovered information bytes and returns the number
/// of failed parity checks.
pub fn decode_block<F: Fn(usize) -> i8>(llr: F, info_out: &mut [u8]) -> usize {
    let k = info_out.len() * 8;
    let hard = |i: usize| -> u8 {
        if llr(i) < 0 {
            1
        } else {
            0
        }
    };

    info_out.fill(0);
    for bit in 0..k {
        info_out[bit / 8] |= hard(bit) << (7 - bit % 8);
    }

    let mut errors = 0;
    for p in 0..k {
        let mut parity = 0u8;
        for &tap in PARITY_TAPS.iter() {
            parity ^= hard((p + tap) % k);
        }
        if parity != hard(k + p) {
            errors += 1;
        }
    }
    errors
}

pub struct DoEncode {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
}

impl DoEncode {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        Self { cfg, buffers }
    }
}

impl Kernel for DoEncode {
    fn kind(&self) -> EventKind {
        EventKind::Encode
    }

    fn process(&mut self, tag: Tag) {
        let (frame, symbol, cb) = (tag.frame(), tag.symbol(), tag.cb_id());
        let cfg = &self.cfg;
        let blocks = cfg.num_blocks_in_symbol;
        let (ue, blk) = (cb / blocks, cb % blocks);
        let dl_idx = cfg.frame.dl_symbol_idx(symbol).unwrap();
        let k_bytes = cfg.num_bytes_per_cb;
        let cw_len = codeword_bits(k_bytes * 8);

        let bits_row = self.buffers.dl_bits_row(frame, ue);
        // SAFETY: downlink bits for this frame were complete before Encode
        // was scheduled (MAC trigger or static pattern).
        let bits = unsafe { self.buffers.dl_bits.row(bits_row) };
        let info = &bits[(dl_idx * blocks + blk) * k_bytes..][..k_bytes];

        let enc_row = self.buffers.dl_sym_row(frame, dl_idx);
        // SAFETY: disjoint (ue, block) stripe of the row; Precode runs only
        // after the symbol's encode completes.
        let cw_all = unsafe { self.buffers.dl_encoded.row_mut(enc_row) };
        let cw = &mut cw_all[(ue * blocks + blk) * cw_len..][..cw_len];
        encode_block(info, cw);
    }
}

pub struct DoDecode {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    scratch: Vec<u8>,
}

impl DoDecode {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        let scratch = vec![0u8; cfg.num_bytes_per_cb];
        Self { cfg, buffers, scratch }
    }
}

impl Kernel for DoDecode {
    fn kind(&self) -> EventKind {
        EventKind::Decode
    }

    fn process(&mut self, tag: Tag) {
        let (frame, symbol, cb) = (tag.frame(), tag.symbol(), tag.cb_id());
        let cfg = &self.cfg;
        let blocks = cfg.num_blocks_in_symbol;
        let (ue, blk) = (cb / blocks, cb % blocks);
        let ul_idx = cfg.frame.ul_symbol_idx(symbol).unwrap();
        let order = cfg.mod_order();
        let cw_len = codeword_bits(cfg.num_bytes_per_cb * 8);

        let demod_row = self.buffers.ul_ue_row(frame, ul_idx, ue);
        // SAFETY: the symbol's Demul completed before Decode was scheduled.
        let llrs = unsafe { self.buffers.demod.row(demod_row) };
        let base_bit = blk * cw_len;
        // Bits past the symbol's subcarrier capacity were never transmitted;
        // they read as erasures.
        let capacity = cfg.ofdm_data_num * order;
        let llr = |i: usize| {
            let bit = base_bit + i;
            if bit >= capacity {
                return 0i8;
            }
            llrs[(bit / order) * DEMOD_LANES + bit % order]
        };

        let errors = decode_block(llr, &mut self.scratch);
        if errors > 0 {
            debug!(frame, symbol, cb, errors, "parity check failures in codeblock");
        }

        let out_row = self.buffers.ul_ue_row(frame, ul_idx, ue);
        // SAFETY: Decode owns this (frame, symbol, ue) stripe until the
        // master observes its completion.
        let out = unsafe { self.buffers.decoded.row_mut(out_row) };
        out[blk * cfg.decoded_bytes_per_cb()..][..cfg.num_bytes_per_cb]
            .copy_from_slice(&self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let info: Vec<u8> = (0u8..12).map(|b| b.wrapping_mul(37).wrapping_add(5)).collect();
        let mut cw = vec![0u8; codeword_bits(info.len() * 8)];
        encode_block(&info, &mut cw);

        // Perfect channel: +/-127 soft bits straight from the codeword
        let mut out = vec![0u8; info.len()];
        let errors = decode_block(|i| if cw[i] == 1 { -127 } else { 127 }, &mut out);
        assert_eq!(errors, 0);
        assert_eq!(out, info);
    }

    #[test]
    fn test_parity_detects_corruption() {
        let info = vec![0xA5u8; 8];
        let mut cw = vec![0u8; codeword_bits(64)];
        encode_block(&info, &mut cw);
        cw[10] ^= 1;

        let mut out = vec![0u8; 8];
        let errors = decode_block(|i| if cw[i] == 1 { -127 } else { 127 }, &mut out);
        assert!(errors > 0);
        // Systematic section still carries the flipped bit
        assert_ne!(out, info);
    }

    #[test]
    fn test_codeword_is_systematic() {
        let info = vec![0xF0u8, 0x0F];
        let mut cw = vec![0u8; codeword_bits(16)];
        encode_block(&info, &mut cw);
        for bit in 0..16 {
            let expect = (info[bit / 8] >> (7 - bit % 8)) & 1;
            assert_eq!(cw[bit], expect);
        }
    }
}
