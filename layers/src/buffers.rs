//! Per-frame DSP Buffer Pools
//!
//! Every pool is allocated once at startup, sized to the frame window, and
//! indexed by `frame_id % FRAME_WND`. Rows are cache-line aligned. Each
//! (frame, symbol) cell has exactly one producer stage and one consumer
//! stage; the master's dispatch order keeps their accesses disjoint in time,
//! so the pools need no locks (see `common::buffers`).

use crate::config::StationConfig;
use common::{SharedSlab, FRAME_WND};
use num_complex::Complex32;
use std::sync::Arc;

/// All sample and bit storage of the pipeline.
pub struct Buffers {
    /// Received time-domain I/Q, interleaved i16, one row per
    /// (frame, symbol, antenna). Written by socket threads, read by FFT.
    pub rx_samples: Arc<SharedSlab<i16>>,
    /// Downlink time-domain I/Q ready for transmission, one row per
    /// (frame, DL symbol, antenna). Written by IFFT, read by socket threads.
    pub tx_samples: Arc<SharedSlab<i16>>,

    /// Channel estimates, one row per frame slot, laid out
    /// `[subcarrier][bs_ant][ue]`. Written by pilot FFT, read by ZF.
    pub csi: SharedSlab<Complex32>,
    /// Uplink zero-forcing matrices, one row per (frame, subcarrier), laid
    /// out `[ue][bs_ant]`. Written by ZF, read by Demul.
    pub ul_zf: SharedSlab<Complex32>,
    /// Downlink precoding matrices, one row per (frame, subcarrier), laid
    /// out `[bs_ant][ue]`. Written by ZF, read by Precode.
    pub dl_zf: SharedSlab<Complex32>,

    /// Frequency-domain uplink data, one row per (frame, UL symbol), laid
    /// out `[bs_ant][subcarrier]`. Written by FFT, read by Demul.
    pub fd_data: SharedSlab<Complex32>,
    /// Equalized uplink symbols, one row per (frame, UL symbol), laid out
    /// `[ue][subcarrier]`. Written by Demul; the embedding API reads it.
    pub equal: SharedSlab<Complex32>,
    /// Demapped soft bits, one row per (frame, UL symbol, ue). Written by
    /// Demul, read by Decode.
    pub demod: SharedSlab<i8>,
    /// Decoded uplink payload, one row per (frame, UL symbol, ue). Written
    /// by Decode, read at shutdown / by MAC.
    pub decoded: SharedSlab<u8>,

    /// Downlink information bits, one row per (frame, ue). Written by the
    /// MAC thread (or statically patterned without MAC), read by Encode.
    pub dl_bits: Arc<SharedSlab<u8>>,
    /// Encoded downlink bits, one row per (frame, DL symbol), laid out
    /// `[ue][codeword bit]`. Written by Encode, read by Precode.
    pub dl_encoded: SharedSlab<u8>,
    /// Precoded frequency-domain downlink, one row per
    /// (frame, DL symbol, antenna). Written by Precode, read by IFFT.
    pub dl_ifft: SharedSlab<Complex32>,

    /// Reciprocity calibration captures, one row per frame slot.
    pub calib_dl: SharedSlab<Complex32>,
    pub calib_ul: SharedSlab<Complex32>,

    total_syms: usize,
    ul_syms: usize,
    dl_syms: usize,
    bs_ant: usize,
    ue_ant: usize,
}

impl Buffers {
    pub fn new(cfg: &StationConfig) -> Self {
        let total_syms = cfg.frame.num_total_syms();
        let ul_syms = cfg.frame.num_ul_syms().max(1);
        let dl_syms = cfg.frame.num_dl_syms().max(1);
        let bs = cfg.bs_ant_num;
        let ue = cfg.ue_ant_num;
        let sc = cfg.ofdm_data_num;
        let cb_bits = cfg.num_bytes_per_cb * 8;

        Self {
            rx_samples: Arc::new(SharedSlab::new(
                FRAME_WND * total_syms * bs,
                cfg.samps_per_symbol * 2,
            )),
            tx_samples: Arc::new(SharedSlab::new(
                FRAME_WND * dl_syms * bs,
                cfg.samps_per_symbol * 2,
            )),
            csi: SharedSlab::new(FRAME_WND, sc * bs * ue),
            ul_zf: SharedSlab::new(FRAME_WND * sc, ue * bs),
            dl_zf: SharedSlab::new(FRAME_WND * sc, bs * ue),
            fd_data: SharedSlab::new(FRAME_WND * ul_syms, bs * sc),
            equal: SharedSlab::new(FRAME_WND * ul_syms, ue * sc),
            demod: SharedSlab::new(FRAME_WND * ul_syms * ue, 8 * sc),
            decoded: SharedSlab::new(
                FRAME_WND * ul_syms * ue,
                cfg.num_blocks_in_symbol * cfg.decoded_bytes_per_cb(),
            ),
            dl_bits: Arc::new(SharedSlab::new(
                FRAME_WND * ue,
                dl_syms * cfg.num_blocks_in_symbol * cfg.num_bytes_per_cb,
            )),
            dl_encoded: SharedSlab::new(
                FRAME_WND * dl_syms,
                ue * cfg.num_blocks_in_symbol * cb_bits * 2,
            ),
            dl_ifft: SharedSlab::new(FRAME_WND * dl_syms * bs, cfg.ofdm_ca_num),
            calib_dl: SharedSlab::new(FRAME_WND, bs * sc),
            calib_ul: SharedSlab::new(FRAME_WND, bs * sc),
            total_syms,
            ul_syms,
            dl_syms,
            bs_ant: bs,
            ue_ant: ue,
        }
    }

    /// Row of `rx_samples` for (frame, absolute symbol, antenna).
    pub fn rx_row(&self, frame: u32, symbol: usize, ant: usize) -> usize {
        let slot = frame as usize % FRAME_WND;
        (slot * self.total_syms + symbol) * self.bs_ant + ant
    }

    /// Row of `tx_samples` / `dl_ifft` for (frame, logical DL symbol, antenna).
    pub fn dl_row(&self, frame: u32, dl_symbol_idx: usize, ant: usize) -> usize {
        let slot = frame as usize % FRAME_WND;
        (slot * self.dl_syms + dl_symbol_idx) * self.bs_ant + ant
    }

    /// Row of `fd_data` / `equal` for (frame, logical UL symbol).
    pub fn ul_row(&self, frame: u32, ul_symbol_idx: usize) -> usize {
        frame as usize % FRAME_WND * self.ul_syms + ul_symbol_idx
    }

    /// Row of `demod` / `decoded` for (frame, logical UL symbol, ue).
    pub fn ul_ue_row(&self, frame: u32, ul_symbol_idx: usize, ue: usize) -> usize {
        self.ul_row(frame, ul_symbol_idx) * self.ue_ant + ue
    }

    /// Row of `ul_zf` / `dl_zf` for (frame, subcarrier).
    pub fn zf_row(&self, frame: u32, sc: usize) -> usize {
        frame as usize % FRAME_WND * self.csi_sc_count() + sc
    }

    /// Row of `dl_encoded` for (frame, logical DL symbol).
    pub fn dl_sym_row(&self, frame: u32, dl_symbol_idx: usize) -> usize {
        frame as usize % FRAME_WND * self.dl_syms + dl_symbol_idx
    }

    /// Row of `dl_bits` for (frame, ue).
    pub fn dl_bits_row(&self, frame: u32, ue: usize) -> usize {
        frame as usize % FRAME_WND * self.ue_ant + ue
    }

    fn csi_sc_count(&self) -> usize {
        self.ul_zf.rows() / FRAME_WND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;

    #[test]
    fn test_pool_dimensions() {
        let cfg = small_config();
        let b = Buffers::new(&cfg);
        // 8 slots x 5 symbols x 4 antennas
        assert_eq!(b.rx_samples.rows(), FRAME_WND * 5 * 4);
        assert_eq!(b.rx_samples.row_len(), 40);
        assert_eq!(b.csi.rows(), FRAME_WND);
        assert_eq!(b.csi.row_len(), 8 * 4 * 2);
        assert_eq!(b.ul_zf.rows(), FRAME_WND * 8);
        assert_eq!(b.fd_data.rows(), FRAME_WND * 2);
    }

    #[test]
    fn test_row_indexing_disjoint() {
        let cfg = small_config();
        let b = Buffers::new(&cfg);
        // Different coordinates never alias within the window
        let a = b.rx_row(0, 0, 0);
        let c = b.rx_row(0, 0, 1);
        let d = b.rx_row(1, 0, 0);
        assert_ne!(a, c);
        assert_ne!(a, d);
        // Window wrap: frame 8 reuses frame 0's rows
        assert_eq!(b.rx_row(8, 0, 0), b.rx_row(0, 0, 0));
        assert_eq!(b.ul_row(9, 1), b.ul_row(1, 1));
    }
}
