//! FFT and IFFT Kernels
//!
//! `DoFft` turns one antenna's received time-domain symbol into frequency
//! domain and routes it by symbol kind: pilots into the CSI pool, uplink
//! data into the FD data pool, calibration symbols into the calibration
//! captures. `DoIfft` turns one antenna's precoded downlink symbol into
//! time-domain samples with cyclic prefix, ready for the socket threads.
//!
//! Plans are created once per worker at startup.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::frame::SymbolKind;
use crate::kernels::Kernel;
use common::{EventKind, Tag};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Scale applied when converting i16 I/Q to float.
const RX_SCALE: f32 = 1.0 / 32768.0;
/// Scale applied when converting float I/Q back to i16.
const TX_SCALE: f32 = 8192.0;

pub struct DoFft {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    plan: Arc<dyn Fft<f32>>,
    work: Vec<Complex32>,
}

impl DoFft {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        let plan = FftPlanner::new().plan_fft_forward(cfg.ofdm_ca_num);
        let work = vec![Complex32::new(0.0, 0.0); cfg.ofdm_ca_num];
        Self { cfg, buffers, plan, work }
    }

    /// First occupied bin of the data subcarriers.
    fn data_offset(&self) -> usize {
        (self.cfg.ofdm_ca_num - self.cfg.ofdm_data_num) / 2
    }
}

impl Kernel for DoFft {
    fn kind(&self) -> EventKind {
        EventKind::Fft
    }

    fn process(&mut self, tag: Tag) {
        let (frame, symbol, ant) = (tag.frame(), tag.symbol(), tag.ant_id());
        let cfg = &self.cfg;
        let n = cfg.ofdm_ca_num;
        let cp = cfg.samps_per_symbol - n;

        let rx_row = self.buffers.rx_row(frame, symbol, ant);
        // SAFETY: the socket thread finished this row before the RX event
        // reached the master; FFT is its only consumer.
        let rx = unsafe { self.buffers.rx_samples.row(rx_row) };
        for (i, w) in self.work.iter_mut().enumerate() {
            let re = rx[2 * (cp + i)] as f32 * RX_SCALE;
            let im = rx[2 * (cp + i) + 1] as f32 * RX_SCALE;
            *w = Complex32::new(re, im);
        }
        self.plan.process(&mut self.work);

        let off = self.data_offset();
        let sc_num = cfg.ofdm_data_num;
        let bs = cfg.bs_ant_num;
        let ue = cfg.ue_ant_num;
        match cfg.frame.kind(symbol) {
            SymbolKind::Pilot => {
                // One pilot symbol sounds one user's channel
                let pilot_idx = cfg.frame.pilot_symbol_idx(symbol).unwrap();
                let ue_idx = pilot_idx % ue;
                let slot = frame as usize % common::FRAME_WND;
                // SAFETY: disjoint (antenna, ue) cells within the row; ZF is
                // dispatched only after all pilot FFTs complete.
                let csi = unsafe { self.buffers.csi.row_mut(slot) };
                for sc in 0..sc_num {
                    csi[(sc * bs + ant) * ue + ue_idx] = self.work[off + sc];
                }
            }
            SymbolKind::Uplink => {
                let ul_idx = cfg.frame.ul_symbol_idx(symbol).unwrap();
                let row = self.buffers.ul_row(frame, ul_idx);
                // SAFETY: per-antenna stripe of the row; Demul runs after
                // all antennas of this symbol complete.
                let fd = unsafe { self.buffers.fd_data.row_mut(row) };
                fd[ant * sc_num..(ant + 1) * sc_num]
                    .copy_from_slice(&self.work[off..off + sc_num]);
            }
            SymbolKind::CalibDl | SymbolKind::CalibUl => {
                let slot = frame as usize % common::FRAME_WND;
                let dest = if cfg.frame.kind(symbol) == SymbolKind::CalibDl {
                    &self.buffers.calib_dl
                } else {
                    &self.buffers.calib_ul
                };
                // SAFETY: per-antenna stripe, consumed only after the frame's
                // calibration counter completes.
                let cal = unsafe { dest.row_mut(slot) };
                cal[ant * sc_num..(ant + 1) * sc_num]
                    .copy_from_slice(&self.work[off..off + sc_num]);
            }
            SymbolKind::Downlink | SymbolKind::Guard => {
                // Nothing to transform for these symbols
            }
        }
    }
}

pub struct DoIfft {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    plan: Arc<dyn Fft<f32>>,
    work: Vec<Complex32>,
}

impl DoIfft {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        let plan = FftPlanner::new().plan_fft_inverse(cfg.ofdm_ca_num);
        let work = vec![Complex32::new(0.0, 0.0); cfg.ofdm_ca_num];
        Self { cfg, buffers, plan, work }
    }
}

impl Kernel for DoIfft {
    fn kind(&self) -> EventKind {
        EventKind::Ifft
    }

    fn process(&mut self, tag: Tag) {
        let (frame, symbol, ant) = (tag.frame(), tag.symbol(), tag.ant_id());
        let cfg = &self.cfg;
        let n = cfg.ofdm_ca_num;
        let cp = cfg.samps_per_symbol - n;
        let dl_idx = cfg.frame.dl_symbol_idx(symbol).unwrap();

        let row = self.buffers.dl_row(frame, dl_idx, ant);
        // SAFETY: Precode completed this row before IFFT was dispatched.
        let fd = unsafe { self.buffers.dl_ifft.row(row) };
        self.work.copy_from_slice(fd);
        self.plan.process(&mut self.work);

        let norm = TX_SCALE / n as f32;
        // SAFETY: this (frame, symbol, antenna) row belongs to IFFT until
        // its completion reaches the master and TX is dispatched.
        let tx = unsafe { self.buffers.tx_samples.row_mut(row) };
        // Cyclic prefix: the tail of the symbol leads the transmission
        for i in 0..cp {
            let s = self.work[n - cp + i] * norm;
            tx[2 * i] = s.re as i16;
            tx[2 * i + 1] = s.im as i16;
        }
        for i in 0..n {
            let s = self.work[i] * norm;
            tx[2 * (cp + i)] = s.re as i16;
            tx[2 * (cp + i) + 1] = s.im as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;

    /// An IFFT'd downlink row, re-read as RX samples and FFT'd back, lands
    /// on the original subcarrier values.
    #[test]
    fn test_ifft_fft_roundtrip_through_buffers() {
        let cfg = Arc::new(small_config());
        let buffers = Arc::new(Buffers::new(&cfg));
        let mut ifft = DoIfft::new(cfg.clone(), buffers.clone());
        let mut fft = DoFft::new(cfg.clone(), buffers.clone());

        let dl_abs = cfg.frame.dl_symbol(0);
        let off = (cfg.ofdm_ca_num - cfg.ofdm_data_num) / 2;
        let row = buffers.dl_row(0, 0, 1);
        unsafe {
            let fd = buffers.dl_ifft.row_mut(row);
            for sc in 0..cfg.ofdm_data_num {
                fd[off + sc] = Complex32::new(0.5, if sc % 2 == 0 { 0.25 } else { -0.25 });
            }
        }
        ifft.process(Tag::frm_sym_ant(0, dl_abs, 1));

        // Feed the produced samples back through the RX path of a UL symbol
        let ul_abs = cfg.frame.ul_symbol(0);
        let rx_row = buffers.rx_row(0, ul_abs, 1);
        unsafe {
            let tx = buffers.tx_samples.row(row);
            buffers.rx_samples.row_mut(rx_row).copy_from_slice(tx);
        }
        fft.process(Tag::frm_sym_ant(0, ul_abs, 1));

        let fd_row = buffers.ul_row(0, 0);
        let got = unsafe { buffers.fd_data.row(fd_row) };
        let scale = TX_SCALE * RX_SCALE;
        for sc in 0..cfg.ofdm_data_num {
            let v = got[cfg.ofdm_data_num + sc]; // antenna 1 stripe
            assert!(
                (v.re - 0.5 * scale).abs() < 0.01 * scale,
                "sc {}: {:?}",
                sc,
                v
            );
        }
    }
}
