//! Stage Kernels
//!
//! Each worker owns one kernel object per stage it may execute. A kernel's
//! contract with the scheduler is [`Kernel::try_launch`]: dequeue exactly one
//! event, run the computation for every tag it carries, emit exactly one
//! completion event with the same tag list, and never block.

pub mod codec;
pub mod demul;
pub mod fft;
pub mod precode;
pub mod zf;

pub use codec::{DoDecode, DoEncode};
pub use demul::DoDemul;
pub use fft::{DoFft, DoIfft};
pub use precode::DoPrecode;
pub use zf::DoZf;

use common::{EventKind, EventQueue, Tag};
use num_complex::Complex32;

use std::f32::consts::FRAC_1_SQRT_2;

pub trait Kernel {
    /// The event kind this kernel serves.
    fn kind(&self) -> EventKind;

    /// Run the computation for one tag.
    fn process(&mut self, tag: Tag);

    /// Serve one event from `stage_q` if available. Returns whether work was
    /// done. An event of the wrong kind is a scheduler bug and aborts.
    fn try_launch(&mut self, stage_q: &EventQueue, comp_q: &EventQueue) -> bool {
        let Some(ev) = stage_q.try_recv() else {
            return false;
        };
        assert_eq!(
            ev.kind,
            self.kind(),
            "kernel for {:?} dequeued a {:?} event",
            self.kind(),
            ev.kind
        );
        for i in 0..ev.num_tags {
            self.process(ev.tag(i));
        }
        comp_q.send(ev);
        true
    }
}

const QAM16_LEVEL: f32 = 0.316_227_77; // 1/sqrt(10)

/// Map `order` bits (LSB first) onto one constellation point.
pub fn modulate(bits: u8, order: usize) -> Complex32 {
    match order {
        2 => {
            // Gray QPSK: bit0 -> I sign, bit1 -> Q sign
            let re = if bits & 1 == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
            let im = if bits & 2 == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
            Complex32::new(re, im)
        }
        4 => {
            // Gray 16QAM, bits (b0 b1) -> I, (b2 b3) -> Q
            let level = |b_sign: bool, b_mag: bool| {
                let mag = if b_mag { QAM16_LEVEL } else { 3.0 * QAM16_LEVEL };
                if b_sign {
                    -mag
                } else {
                    mag
                }
            };
            Complex32::new(
                level(bits & 1 != 0, bits & 2 != 0),
                level(bits & 4 != 0, bits & 8 != 0),
            )
        }
        other => panic!("unsupported modulation order: {} bits", other),
    }
}

/// Demap one equalized symbol to `order` signed 8-bit LLRs (positive means
/// bit 0). Exact inverse of [`modulate`] under hard decision.
pub fn demod_soft(sym: Complex32, order: usize, out: &mut [i8]) {
    let clamp = |x: f32| (x.clamp(-1.0, 1.0) * 127.0) as i8;
    match order {
        2 => {
            out[0] = clamp(sym.re * std::f32::consts::SQRT_2);
            out[1] = clamp(sym.im * std::f32::consts::SQRT_2);
        }
        4 => {
            // Sign bits then magnitude bits (distance from the +-2/sqrt(10)
            // decision boundary; outer points carry magnitude bit 0)
            let boundary = 2.0 * QAM16_LEVEL;
            out[0] = clamp(sym.re);
            out[1] = clamp(sym.re.abs() - boundary);
            out[2] = clamp(sym.im);
            out[3] = clamp(sym.im.abs() - boundary);
        }
        other => panic!("unsupported modulation order: {} bits", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qpsk_roundtrip() {
        let mut llr = [0i8; 2];
        for bits in 0..4u8 {
            let sym = modulate(bits, 2);
            demod_soft(sym, 2, &mut llr);
            let hard = (if llr[0] < 0 { 1 } else { 0 }) | (if llr[1] < 0 { 2 } else { 0 });
            assert_eq!(hard, bits);
        }
    }

    #[test]
    fn test_qam16_roundtrip() {
        let mut llr = [0i8; 4];
        for bits in 0..16u8 {
            let sym = modulate(bits, 4);
            demod_soft(sym, 4, &mut llr);
            let mut hard = 0u8;
            for (b, &l) in llr.iter().enumerate() {
                if l < 0 {
                    hard |= 1 << b;
                }
            }
            assert_eq!(hard, bits, "bits {:04b} mapped to {:?}", bits, sym);
        }
    }

    #[test]
    fn test_unit_energy() {
        for bits in 0..16u8 {
            let e = modulate(bits, 4).norm_sqr();
            assert!(e > 0.19 && e < 1.81);
        }
        assert!((modulate(1, 2).norm_sqr() - 1.0).abs() < 1e-6);
    }
}
