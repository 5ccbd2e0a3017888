//! Zero-forcing Kernel
//!
//! Per subcarrier, builds the channel matrix H (bs_ant x ue) from the CSI
//! pool and computes the uplink equalizer W = (H^H H)^-1 H^H and the
//! downlink precoder W^H. The per-user Gram matrix stays small (ue x ue),
//! so a dense Gauss-Jordan inversion with partial pivoting is sufficient.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::kernels::Kernel;
use common::{EventKind, Tag, FRAME_WND};
use num_complex::Complex32;
use std::sync::Arc;
use tracing::warn;

pub struct DoZf {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    /// Gram matrix and its inverse, ue x ue each.
    gram: Vec<Complex32>,
    inv: Vec<Complex32>,
}

impl DoZf {
    pub fn new(cfg: Arc<StationConfig>, buffers: Arc<Buffers>) -> Self {
        let ue = cfg.ue_ant_num;
        Self {
            cfg,
            buffers,
            gram: vec![Complex32::new(0.0, 0.0); ue * ue],
            inv: vec![Complex32::new(0.0, 0.0); ue * ue],
        }
    }

    fn compute_subcarrier(&mut self, frame: u32, sc: usize) {
        let bs = self.cfg.bs_ant_num;
        let ue = self.cfg.ue_ant_num;
        let slot = frame as usize % FRAME_WND;

        // SAFETY: all pilot FFTs of this frame completed before ZF was
        // dispatched; CSI is read-only from here on.
        let csi = unsafe { self.buffers.csi.row(slot) };
        let h = |a: usize, u: usize| csi[(sc * bs + a) * ue + u];

        // G = H^H H
        for i in 0..ue {
            for j in 0..ue {
                let mut acc = Complex32::new(0.0, 0.0);
                for a in 0..bs {
                    acc += h(a, i).conj() * h(a, j);
                }
                self.gram[i * ue + j] = acc;
            }
        }

        if !invert_in_place(&mut self.gram, &mut self.inv, ue) {
            warn!(frame, sc, "singular channel gram matrix, keeping zero equalizer");
            return;
        }

        let zf_row = self.buffers.zf_row(frame, sc);
        // SAFETY: ZF is the sole writer of this (frame, subcarrier) row;
        // Demul/Precode consume it only after the frame's ZF completes.
        let ul = unsafe { self.buffers.ul_zf.row_mut(zf_row) };
        let dl = unsafe { self.buffers.dl_zf.row_mut(zf_row) };
        // W = G^-1 H^H, laid out [ue][bs]; precoder is W^H laid out [bs][ue]
        for u in 0..ue {
            for a in 0..bs {
                let mut acc = Complex32::new(0.0, 0.0);
                for k in 0..ue {
                    acc += self.inv[u * ue + k] * h(a, k).conj();
                }
                ul[u * bs + a] = acc;
                dl[a * ue + u] = acc.conj();
            }
        }
    }
}

impl Kernel for DoZf {
    fn kind(&self) -> EventKind {
        EventKind::Zf
    }

    fn process(&mut self, tag: Tag) {
        let frame = tag.frame();
        let base_sc = tag.sc_id();
        let end = (base_sc + self.cfg.zf_block_size).min(self.cfg.ofdm_data_num);
        for sc in base_sc..end {
            self.compute_subcarrier(frame, sc);
        }
    }
}

/// Gauss-Jordan inversion with partial pivoting. `a` is destroyed; the
/// inverse lands in `out`. Returns false on a singular matrix.
fn invert_in_place(a: &mut [Complex32], out: &mut [Complex32], n: usize) -> bool {
    out.fill(Complex32::new(0.0, 0.0));
    for i in 0..n {
        out[i * n + i] = Complex32::new(1.0, 0.0);
    }

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| {
                a[r1 * n + col]
                    .norm_sqr()
                    .partial_cmp(&a[r2 * n + col].norm_sqr())
                    .unwrap()
            })
            .unwrap();
        if a[pivot_row * n + col].norm_sqr() < 1e-12 {
            return false;
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap(col * n + k, pivot_row * n + k);
                out.swap(col * n + k, pivot_row * n + k);
            }
        }
        let pivot = a[col * n + col];
        for k in 0..n {
            a[col * n + k] /= pivot;
            out[col * n + k] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor.norm_sqr() == 0.0 {
                continue;
            }
            for k in 0..n {
                let sub_a = a[col * n + k] * factor;
                let sub_o = out[col * n + k] * factor;
                a[row * n + k] -= sub_a;
                out[row * n + k] -= sub_o;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;

    fn close(a: Complex32, b: Complex32) -> bool {
        (a - b).norm() < 1e-4
    }

    #[test]
    fn test_invert_identity() {
        let n = 3;
        let mut a = vec![Complex32::new(0.0, 0.0); n * n];
        let mut out = a.clone();
        for i in 0..n {
            a[i * n + i] = Complex32::new(2.0, 0.0);
        }
        assert!(invert_in_place(&mut a, &mut out, n));
        for i in 0..n {
            assert!(close(out[i * n + i], Complex32::new(0.5, 0.0)));
        }
    }

    #[test]
    fn test_invert_singular() {
        let n = 2;
        let mut a = vec![Complex32::new(1.0, 0.0); n * n]; // rank 1
        let mut out = a.clone();
        assert!(!invert_in_place(&mut a, &mut out, n));
    }

    /// W H must equal the identity: each user's stream is recovered free of
    /// inter-user interference.
    #[test]
    fn test_zero_forcing_property() {
        let cfg = Arc::new(small_config());
        let buffers = Arc::new(Buffers::new(&cfg));
        let bs = cfg.bs_ant_num;
        let ue = cfg.ue_ant_num;
        let sc = 3;

        // A well-conditioned synthetic channel
        unsafe {
            let csi = buffers.csi.row_mut(0);
            for a in 0..bs {
                for u in 0..ue {
                    csi[(sc * bs + a) * ue + u] = Complex32::new(
                        1.0 + (a as f32) * 0.3 + (u as f32) * 0.1,
                        0.2 * (a as f32 + 1.0) * if u == 0 { 1.0 } else { -0.5 },
                    );
                }
            }
        }

        let mut zf = DoZf::new(cfg.clone(), buffers.clone());
        zf.process(Tag::frm_sym_sc(0, 0, sc));

        let zf_row = buffers.zf_row(0, sc);
        let w = unsafe { buffers.ul_zf.row(zf_row) };
        let csi = unsafe { buffers.csi.row(0) };
        let h = |a: usize, u: usize| csi[(sc * bs + a) * ue + u];
        for i in 0..ue {
            for j in 0..ue {
                let mut acc = Complex32::new(0.0, 0.0);
                for a in 0..bs {
                    acc += w[i * bs + a] * h(a, j);
                }
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!(
                    close(acc, Complex32::new(expect, 0.0)),
                    "W·H[{}][{}] = {:?}",
                    i,
                    j,
                    acc
                );
            }
        }
    }
}
