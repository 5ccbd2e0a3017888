//! Demodulation Kernel
//!
//! For a block of subcarriers of one uplink symbol: apply the uplink ZF
//! matrix to the received antenna vector, store the equalized per-user
//! symbols, and demap them to signed 8-bit soft bits for the decoder.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::kernels::{demod_soft, Kernel};
use common::{EventKind, Tag};
use num_complex::Complex32;
use std::sync::Arc;

/// Soft-bit lanes reserved per subcarrier in the demod pool, independent of
/// the live modulation order.
pub const DEMOD_LANES: usize = 8;

pub struct DoDemul {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    equalized: Vec<Complex32>,
}

impl DoDemul {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        let ue = cfg.ue_ant_num;
        Self {
            cfg,
            buffers,
            equalized: vec![Complex32::new(0.0, 0.0); ue],
        }
    }
}

impl Kernel for DoDemul {
    fn kind(&self) -> EventKind {
        EventKind::Demul
    }

    fn process(&mut self, tag: Tag) {
        let (frame, symbol, base_sc) = (tag.frame(), tag.symbol(), tag.sc_id());
        let cfg = &self.cfg;
        let bs = cfg.bs_ant_num;
        let ue = cfg.ue_ant_num;
        let sc_num = cfg.ofdm_data_num;
        let order = cfg.mod_order();
        let ul_idx = cfg.frame.ul_symbol_idx(symbol).unwrap();

        let fd_row = self.buffers.ul_row(frame, ul_idx);
        // SAFETY: all antenna FFTs of this symbol completed (scheduler
        // precondition); ZF matrices for this frame are final.
        let fd = unsafe { self.buffers.fd_data.row(fd_row) };
        let eq = unsafe { self.buffers.equal.row_mut(fd_row) };

        let end = (base_sc + cfg.demul_block_size).min(sc_num);
        for sc in base_sc..end {
            let zf_row = self.buffers.zf_row(frame, sc);
            let w = unsafe { self.buffers.ul_zf.row(zf_row) };
            for u in 0..ue {
                let mut acc = Complex32::new(0.0, 0.0);
                for a in 0..bs {
                    acc += w[u * bs + a] * fd[a * sc_num + sc];
                }
                self.equalized[u] = acc;
                eq[u * sc_num + sc] = acc;
            }
            for u in 0..ue {
                let demod_row = self.buffers.ul_ue_row(frame, ul_idx, u);
                // SAFETY: Demul blocks over disjoint subcarriers of the row;
                // Decode is dispatched only after the symbol's last block.
                let llr = unsafe { self.buffers.demod.row_mut(demod_row) };
                demod_soft(
                    self.equalized[u],
                    order,
                    &mut llr[sc * DEMOD_LANES..sc * DEMOD_LANES + order],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;
    use crate::kernels::modulate;

    /// Through an identity channel (W = I on the used users), transmitted
    /// constellation points come back as matching hard decisions.
    #[test]
    fn test_equalize_and_demap() {
        let cfg = Arc::new(small_config());
        let buffers = Arc::new(Buffers::new(&cfg));
        let bs = cfg.bs_ant_num;
        let ue = cfg.ue_ant_num;
        let sc_num = cfg.ofdm_data_num;
        let ul_abs = cfg.frame.ul_symbol(0);

        // W picks antenna u for user u
        unsafe {
            for sc in 0..sc_num {
                let w = buffers.ul_zf.row_mut(buffers.zf_row(0, sc));
                w.fill(Complex32::new(0.0, 0.0));
                for u in 0..ue {
                    w[u * bs + u] = Complex32::new(1.0, 0.0);
                }
            }
            let fd = buffers.fd_data.row_mut(buffers.ul_row(0, 0));
            for sc in 0..sc_num {
                for u in 0..ue {
                    let bits = ((sc + u) % 4) as u8;
                    fd[u * sc_num + sc] = modulate(bits, 2);
                }
            }
        }

        let mut demul = DoDemul::new(cfg.clone(), buffers.clone());
        demul.process(Tag::frm_sym_sc(0, ul_abs, 0));
        demul.process(Tag::frm_sym_sc(0, ul_abs, 4));

        for u in 0..ue {
            let llr = unsafe { buffers.demod.row(buffers.ul_ue_row(0, 0, u)) };
            for sc in 0..sc_num {
                let expect = ((sc + u) % 4) as u8;
                let hard = (if llr[sc * DEMOD_LANES] < 0 { 1 } else { 0 })
                    | (if llr[sc * DEMOD_LANES + 1] < 0 { 2 } else { 0 });
                assert_eq!(hard, expect, "ue {} sc {}", u, sc);
            }
        }

        // Equalized pool mirrors the constellation
        let eq = unsafe { buffers.equal.row(buffers.ul_row(0, 0)) };
        assert!((eq[0].norm_sqr() - 1.0).abs() < 1e-5);
    }
}
