//! Downlink Precoding Kernel
//!
//! For a block of subcarriers of one downlink symbol: map each user's
//! encoded bits onto constellation points, multiply by the downlink
//! precoding matrix, and place the per-antenna result on the symbol's
//! occupied subcarriers of the IFFT input pool.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::kernels::codec::codeword_bits;
use crate::kernels::{modulate, Kernel};
use common::{EventKind, Tag};
use num_complex::Complex32;
use std::sync::Arc;

pub struct DoPrecode {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    symbols: Vec<Complex32>,
}

impl DoPrecode {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        let ue = cfg.ue_ant_num;
        Self {
            cfg,
            buffers,
            symbols: vec![Complex32::new(0.0, 0.0); ue],
        }
    }
}

impl Kernel for DoPrecode {
    fn kind(&self) -> EventKind {
        EventKind::Precode
    }

    fn process(&mut self, tag: Tag) {
        let (frame, symbol, base_sc) = (tag.frame(), tag.symbol(), tag.sc_id());
        let cfg = &self.cfg;
        let bs = cfg.bs_ant_num;
        let ue = cfg.ue_ant_num;
        let order = cfg.mod_order();
        let dl_idx = cfg.frame.dl_symbol_idx(symbol).unwrap();
        let stream_bits = cfg.num_blocks_in_symbol * codeword_bits(cfg.num_bytes_per_cb * 8);
        let off = (cfg.ofdm_ca_num - cfg.ofdm_data_num) / 2;

        let enc_row = self.buffers.dl_sym_row(frame, dl_idx);
        // SAFETY: the symbol's Encode completed before Precode was
        // dispatched; the row is read-only now.
        let encoded = unsafe { self.buffers.dl_encoded.row(enc_row) };

        let end = (base_sc + cfg.demul_block_size).min(cfg.ofdm_data_num);
        for sc in base_sc..end {
            for u in 0..ue {
                let stream = &encoded[u * stream_bits..][..stream_bits];
                let mut bits = 0u8;
                for b in 0..order {
                    bits |= stream[(sc * order + b) % stream_bits] << b;
                }
                self.symbols[u] = modulate(bits, order);
            }

            let zf_row = self.buffers.zf_row(frame, sc);
            let w = unsafe { self.buffers.dl_zf.row(zf_row) };
            for a in 0..bs {
                let mut acc = Complex32::new(0.0, 0.0);
                for u in 0..ue {
                    acc += w[a * ue + u] * self.symbols[u];
                }
                let ifft_row = self.buffers.dl_row(frame, dl_idx, a);
                // SAFETY: Precode blocks cover disjoint subcarriers; IFFT of
                // this symbol runs only after the last Precode block.
                let fd = unsafe { self.buffers.dl_ifft.row_mut(ifft_row) };
                fd[off + sc] = acc;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;
    use crate::kernels::codec::encode_block;

    /// With an identity precoder, antenna u carries exactly user u's
    /// constellation stream.
    #[test]
    fn test_precode_identity_channel() {
        let cfg = Arc::new(small_config());
        let buffers = Arc::new(Buffers::new(&cfg));
        let ue = cfg.ue_ant_num;
        let bs = cfg.bs_ant_num;
        let dl_abs = cfg.frame.dl_symbol(0);
        let cw_len = codeword_bits(cfg.num_bytes_per_cb * 8);
        let off = (cfg.ofdm_ca_num - cfg.ofdm_data_num) / 2;

        unsafe {
            for sc in 0..cfg.ofdm_data_num {
                let w = buffers.dl_zf.row_mut(buffers.zf_row(0, sc));
                w.fill(Complex32::new(0.0, 0.0));
                for u in 0..ue {
                    w[u * ue + u] = Complex32::new(1.0, 0.0);
                }
            }
            let enc = buffers.dl_encoded.row_mut(buffers.dl_sym_row(0, 0));
            for u in 0..ue {
                let info: Vec<u8> = (0..cfg.num_bytes_per_cb).map(|b| (b + u) as u8).collect();
                encode_block(&info, &mut enc[u * cw_len..][..cw_len]);
            }
        }

        let mut precode = DoPrecode::new(cfg.clone(), buffers.clone());
        precode.process(Tag::frm_sym_sc(0, dl_abs, 0));
        precode.process(Tag::frm_sym_sc(0, dl_abs, 4));

        let enc = unsafe { buffers.dl_encoded.row(buffers.dl_sym_row(0, 0)) };
        for u in 0..ue {
            let fd = unsafe { buffers.dl_ifft.row(buffers.dl_row(0, 0, u)) };
            for sc in 0..cfg.ofdm_data_num {
                let bits = enc[u * cw_len + (sc * 2) % cw_len]
                    | (enc[u * cw_len + (sc * 2 + 1) % cw_len] << 1);
                let expect = modulate(bits, 2);
                assert!(
                    (fd[off + sc] - expect).norm() < 1e-5,
                    "ue {} sc {}",
                    u,
                    sc
                );
            }
        }
        // Antennas beyond the user count carry nothing in this setup
        for a in ue..bs {
            let fd = unsafe { buffers.dl_ifft.row(buffers.dl_row(0, 0, a)) };
            assert!(fd.iter().all(|c| c.norm_sqr() == 0.0));
        }
    }
}
