//! Frame Timestamp Ledger and Shutdown Artifacts
//!
//! The master stamps a timestamp per (frame slot, milestone) as the
//! pipeline progresses. The ledger backs the per-frame progress logging,
//! the shutdown summary, and the optional binary dumps of decoded uplink
//! bits and downlink TX samples.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::PhyError;
use common::utils::delta_ms;
use common::FRAME_WND;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Milestones stamped per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsType {
    FirstSymbolRx,
    PilotAllRx,
    RcAllRx,
    RxDone,
    ProcessingStarted,
    FftPilotsDone,
    RcDone,
    ZfDone,
    DemulDone,
    DecodeDone,
    EncodeDone,
    PrecodeDone,
    IfftDone,
    TxFirstDone,
    TxDone,
}

pub const NUM_TS_TYPES: usize = 15;

/// Milestones included in the shutdown summary, with labels.
const SUMMARY: [(TsType, &str); 7] = [
    (TsType::FftPilotsDone, "pilot FFT"),
    (TsType::ZfDone, "zero-forcing"),
    (TsType::DemulDone, "demodulation"),
    (TsType::DecodeDone, "decoding"),
    (TsType::EncodeDone, "encoding"),
    (TsType::IfftDone, "IFFT"),
    (TsType::TxDone, "TX"),
];

pub struct Stats {
    stamps: [[Option<Instant>; NUM_TS_TYPES]; FRAME_WND],
    /// Sum of (milestone - FirstSymbolRx) per milestone, for averaging.
    sums_ms: [f64; NUM_TS_TYPES],
    frames_counted: u64,
    last_frame: u32,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            stamps: [[None; NUM_TS_TYPES]; FRAME_WND],
            sums_ms: [0.0; NUM_TS_TYPES],
            frames_counted: 0,
            last_frame: 0,
        }
    }

    pub fn set(&mut self, ts: TsType, frame: u32) {
        self.stamps[frame as usize % FRAME_WND][ts as usize] = Some(Instant::now());
    }

    pub fn get(&self, ts: TsType, frame: u32) -> Option<Instant> {
        self.stamps[frame as usize % FRAME_WND][ts as usize]
    }

    /// Milliseconds from `from` to `to` within one frame; 0 when either
    /// stamp is missing (direction with no symbols).
    pub fn delta_ms(&self, to: TsType, from: TsType, frame: u32) -> f64 {
        match (self.get(from, frame), self.get(to, frame)) {
            (Some(a), Some(b)) => delta_ms(a, b),
            _ => 0.0,
        }
    }

    /// Milliseconds since the milestone was stamped.
    pub fn ms_since(&self, ts: TsType, frame: u32) -> f64 {
        self.get(ts, frame)
            .map(|t| delta_ms(t, Instant::now()))
            .unwrap_or(0.0)
    }

    /// Fold the retiring frame into the running averages and clear its slot.
    pub fn update_frame(&mut self, frame: u32) {
        for (ts, _) in SUMMARY.iter() {
            self.sums_ms[*ts as usize] += self.delta_ms(*ts, TsType::FirstSymbolRx, frame);
        }
        self.frames_counted += 1;
        self.last_frame = frame;
        self.stamps[frame as usize % FRAME_WND] = [None; NUM_TS_TYPES];
    }

    pub fn last_frame(&self) -> u32 {
        self.last_frame
    }

    pub fn frames_counted(&self) -> u64 {
        self.frames_counted
    }

    /// Log per-stage averages over every retired frame.
    pub fn print_summary(&self) {
        if self.frames_counted == 0 {
            info!("no frames completed");
            return;
        }
        info!(
            "processed {} frames (last frame {})",
            self.frames_counted, self.last_frame
        );
        for (ts, label) in SUMMARY.iter() {
            let avg = self.sums_ms[*ts as usize] / self.frames_counted as f64;
            if avg > 0.0 {
                info!("  avg {} done +{:.3} ms after first RX", label, avg);
            }
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Dump the last frame's decoded uplink payload: for each uplink symbol,
/// for each user, `num_bytes_per_cb x num_blocks_in_symbol` raw bytes.
pub fn save_decode_data(
    cfg: &StationConfig,
    buffers: &Buffers,
    frame: u32,
    path: &Path,
) -> Result<(), PhyError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    info!("saving decode data to {}", path.display());
    let mut out = BufWriter::new(File::create(path)?);
    for ul_idx in 0..cfg.frame.num_ul_syms() {
        for ue in 0..cfg.ue_ant_num {
            let row_idx = buffers.ul_ue_row(frame, ul_idx, ue);
            // SAFETY: the pipeline is drained at shutdown.
            let row = unsafe { buffers.decoded.row(row_idx) };
            for blk in 0..cfg.num_blocks_in_symbol {
                let bytes = &row[blk * cfg.decoded_bytes_per_cb()..][..cfg.num_bytes_per_cb];
                out.write_all(bytes)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Dump the last frame's TX samples: for each downlink symbol, for each BS
/// antenna, `samps_per_symbol x 2` little-endian i16 I/Q values.
pub fn save_tx_data(
    cfg: &StationConfig,
    buffers: &Buffers,
    frame: u32,
    path: &Path,
) -> Result<(), PhyError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    info!("saving frame {} TX data to {}", frame, path.display());
    let mut out = BufWriter::new(File::create(path)?);
    for dl_idx in 0..cfg.frame.num_dl_syms() {
        for ant in 0..cfg.bs_ant_num {
            let row_idx = buffers.dl_row(frame, dl_idx, ant);
            // SAFETY: the pipeline is drained at shutdown.
            let row = unsafe { buffers.tx_samples.row(row_idx) };
            for &s in row.iter() {
                out.write_all(&s.to_le_bytes())?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_stamp_and_delta() {
        let mut stats = Stats::new();
        stats.set(TsType::FirstSymbolRx, 3);
        sleep(Duration::from_millis(5));
        stats.set(TsType::ZfDone, 3);
        let d = stats.delta_ms(TsType::ZfDone, TsType::FirstSymbolRx, 3);
        assert!(d >= 4.0, "delta was {}", d);
        // Missing stamps read as zero
        assert_eq!(stats.delta_ms(TsType::TxDone, TsType::FirstSymbolRx, 3), 0.0);
    }

    #[test]
    fn test_update_clears_slot() {
        let mut stats = Stats::new();
        stats.set(TsType::FirstSymbolRx, 2);
        stats.set(TsType::ZfDone, 2);
        stats.update_frame(2);
        assert_eq!(stats.frames_counted(), 1);
        assert_eq!(stats.last_frame(), 2);
        assert!(stats.get(TsType::ZfDone, 2).is_none());
        // Slot is clean for frame 10 (same slot)
        assert!(stats.get(TsType::FirstSymbolRx, 10).is_none());
    }

    #[test]
    fn test_dumps_write_expected_sizes() {
        use crate::config::small_config;
        let cfg = small_config();
        let buffers = Buffers::new(&cfg);
        let dir = std::env::temp_dir().join("halcyon_stats_test");
        let decode_path = dir.join("decode_data.bin");
        let tx_path = dir.join("tx_data.bin");

        save_decode_data(&cfg, &buffers, 0, &decode_path).unwrap();
        save_tx_data(&cfg, &buffers, 0, &tx_path).unwrap();

        let decode_len = std::fs::metadata(&decode_path).unwrap().len() as usize;
        // 2 UL syms x 2 UEs x 1 block x 4 bytes
        assert_eq!(decode_len, 2 * 2 * 4);
        let tx_len = std::fs::metadata(&tx_path).unwrap().len() as usize;
        // 2 DL syms x 4 ants x 20 samps x 2 shorts x 2 bytes
        assert_eq!(tx_len, 2 * 4 * 20 * 2 * 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
