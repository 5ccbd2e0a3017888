//! Station Configuration
//!
//! A single immutable configuration object built before any thread starts
//! and shared as `Arc<StationConfig>`. There is no runtime reconfiguration;
//! the only live parameter is the modulation order, which a `RanUpdate`
//! event may change while the pipeline runs.

use crate::frame::FrameSchedule;
use crate::PhyError;
use common::types::round_up;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

fn default_fft_block_size() -> usize {
    4
}
fn default_zf_block_size() -> usize {
    1
}
fn default_zf_batch_size() -> usize {
    16
}
fn default_demul_block_size() -> usize {
    48
}
fn default_encode_block_size() -> usize {
    1
}
fn default_mod_order_bits() -> AtomicUsize {
    AtomicUsize::new(2)
}
fn default_worker_flip_threshold() -> usize {
    5
}
fn default_message_queue_base() -> usize {
    512
}
fn default_worker_queue_base() -> usize {
    256
}
fn default_frames_to_test() -> u32 {
    1000
}

/// Complete configuration surface of the base station.
#[derive(Debug, Deserialize)]
pub struct StationConfig {
    /// Number of base-station antennas.
    pub bs_ant_num: usize,
    /// Number of user (UE) antennas served.
    pub ue_ant_num: usize,
    /// Data subcarriers per OFDM symbol.
    pub ofdm_data_num: usize,
    /// FFT size (occupied + guard subcarriers).
    pub ofdm_ca_num: usize,
    /// Time-domain samples per symbol including cyclic prefix.
    pub samps_per_symbol: usize,
    /// Symbol schedule of one frame, e.g. "PPUUDD".
    pub frame: FrameSchedule,

    /// Codeblocks per symbol per user.
    pub num_blocks_in_symbol: usize,
    /// Information bytes per codeblock.
    pub num_bytes_per_cb: usize,
    /// Live modulation order in bits per subcarrier (2 = QPSK, 4 = 16QAM).
    #[serde(default = "default_mod_order_bits")]
    pub mod_order_bits: AtomicUsize,

    /// Antennas per FFT/IFFT dispatch block.
    #[serde(default = "default_fft_block_size")]
    pub fft_block_size: usize,
    /// Subcarriers per ZF task.
    #[serde(default = "default_zf_block_size")]
    pub zf_block_size: usize,
    /// ZF tasks batched into one event.
    #[serde(default = "default_zf_batch_size")]
    pub zf_batch_size: usize,
    /// Subcarriers per Demul/Precode task.
    #[serde(default = "default_demul_block_size")]
    pub demul_block_size: usize,
    /// Codeblocks per Encode/Decode event.
    #[serde(default = "default_encode_block_size")]
    pub encode_block_size: usize,

    /// Number of worker threads.
    pub worker_thread_num: usize,
    /// Number of socket (I/O) threads.
    pub socket_thread_num: usize,
    /// First CPU core of the station; master runs here, socket threads and
    /// workers follow at increasing offsets.
    #[serde(default)]
    pub core_offset: usize,

    /// Empty sweeps before a worker flips its queue parity.
    #[serde(default = "default_worker_flip_threshold")]
    pub worker_flip_threshold: usize,
    /// Intake/completion queue size per data symbol.
    #[serde(default = "default_message_queue_base")]
    pub message_queue_base: usize,
    /// Stage queue size per data symbol.
    #[serde(default = "default_worker_queue_base")]
    pub worker_queue_base: usize,

    /// Run the MAC thread and gate downlink on PacketFromMac.
    #[serde(default)]
    pub enable_mac: bool,
    /// Partition workers into per-stage groups instead of the unified pool.
    #[serde(default)]
    pub bigstation_mode: bool,
    /// Dump decoded uplink bits to data/decode_data.bin at shutdown.
    #[serde(default)]
    pub save_decode_data: bool,
    /// Dump downlink TX samples to data/tx_data.bin at shutdown.
    #[serde(default)]
    pub save_tx_data: bool,

    /// Stop cleanly after this many frames.
    #[serde(default = "default_frames_to_test")]
    pub frames_to_test: u32,

    /// Bigstation worker split; remaining workers decode.
    #[serde(default)]
    pub fft_thread_num: usize,
    #[serde(default)]
    pub zf_thread_num: usize,
    #[serde(default)]
    pub demul_thread_num: usize,
}

impl StationConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, PhyError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PhyError::InvalidConfiguration(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let cfg: StationConfig = serde_yaml::from_str(&contents)
            .map_err(|e| PhyError::InvalidConfiguration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject inconsistent configurations before any thread runs.
    pub fn validate(&self) -> Result<(), PhyError> {
        let fail = |msg: String| Err(PhyError::InvalidConfiguration(msg));

        if self.bs_ant_num == 0 || self.ue_ant_num == 0 {
            return fail("antenna counts must be non-zero".to_string());
        }
        if self.ue_ant_num > self.bs_ant_num {
            return fail(format!(
                "{} UE antennas exceed {} BS antennas",
                self.ue_ant_num, self.bs_ant_num
            ));
        }
        if self.ofdm_data_num == 0 || self.ofdm_ca_num < self.ofdm_data_num {
            return fail(format!(
                "OFDM sizes invalid: {} data / {} total",
                self.ofdm_data_num, self.ofdm_ca_num
            ));
        }
        if self.samps_per_symbol < self.ofdm_ca_num {
            return fail(format!(
                "samps_per_symbol {} shorter than FFT size {}",
                self.samps_per_symbol, self.ofdm_ca_num
            ));
        }
        if self.frame.num_pilot_syms() == 0 {
            return fail("frame schedule has no pilot symbols".to_string());
        }
        if self.frame.num_ul_syms() == 0 && self.frame.num_dl_syms() == 0 {
            return fail("frame schedule has no data symbols".to_string());
        }
        if self.fft_block_size == 0
            || self.zf_block_size == 0
            || self.zf_batch_size == 0
            || self.demul_block_size == 0
            || self.encode_block_size == 0
        {
            return fail("block sizes must be non-zero".to_string());
        }
        let max_tags = common::MAX_TAGS_PER_EVENT;
        if self.fft_block_size > max_tags
            || self.zf_batch_size > max_tags
            || self.encode_block_size > max_tags
        {
            return fail(format!(
                "event batch sizes must not exceed {} tags",
                max_tags
            ));
        }
        if self.worker_thread_num == 0 || self.socket_thread_num == 0 {
            return fail("thread counts must be non-zero".to_string());
        }
        if self.frames_to_test == 0 {
            return fail("frames_to_test must be non-zero".to_string());
        }
        let order = self.mod_order_bits.load(Ordering::Relaxed);
        if order != 2 && order != 4 {
            return fail(format!("unsupported modulation order: {} bits", order));
        }
        if self.bigstation_mode {
            let grouped = self.fft_thread_num + self.zf_thread_num + self.demul_thread_num;
            if grouped >= self.worker_thread_num {
                return fail(format!(
                    "bigstation groups ({}) leave no decode workers of {}",
                    grouped, self.worker_thread_num
                ));
            }
        }
        Ok(())
    }

    /// Demul/Precode tasks per symbol (last block may be short).
    pub fn demul_events_per_symbol(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.demul_block_size)
    }

    /// ZF tasks per frame.
    pub fn zf_events_per_symbol(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.zf_block_size)
    }

    /// Codeblock tasks per symbol across all users.
    pub fn blocks_per_symbol(&self) -> usize {
        self.ue_ant_num * self.num_blocks_in_symbol
    }

    /// RX packets expected per frame.
    pub fn num_rx_pkts_per_frame(&self) -> usize {
        self.bs_ant_num
            * (self.frame.num_pilot_syms()
                + self.frame.num_ul_syms()
                + self.frame.num_calib_syms())
    }

    pub fn num_pilot_pkts_per_frame(&self) -> usize {
        self.bs_ant_num * self.frame.num_pilot_syms()
    }

    pub fn num_reciprocity_pkts_per_frame(&self) -> usize {
        self.bs_ant_num * self.frame.num_calib_syms()
    }

    /// Decoded payload bytes per codeblock, padded for aligned rows.
    pub fn decoded_bytes_per_cb(&self) -> usize {
        round_up(self.num_bytes_per_cb, 64)
    }

    pub fn mod_order(&self) -> usize {
        self.mod_order_bits.load(Ordering::Relaxed)
    }

    pub fn set_mod_order(&self, bits: usize) {
        self.mod_order_bits.store(bits, Ordering::Relaxed);
    }

    /// Core of worker thread 0: after the master and the socket threads.
    pub fn base_worker_core(&self) -> usize {
        self.core_offset + 1 + self.socket_thread_num
    }
}

/// Minimal configuration used across the crate's unit tests.
#[cfg(test)]
pub(crate) fn small_config() -> StationConfig {
    StationConfig {
        bs_ant_num: 4,
        ue_ant_num: 2,
        ofdm_data_num: 8,
        ofdm_ca_num: 16,
        samps_per_symbol: 20,
        frame: FrameSchedule::parse("PUUDD").unwrap(),
        num_blocks_in_symbol: 1,
        num_bytes_per_cb: 4,
        mod_order_bits: AtomicUsize::new(2),
        fft_block_size: 2,
        zf_block_size: 1,
        zf_batch_size: 1,
        demul_block_size: 4,
        encode_block_size: 1,
        worker_thread_num: 2,
        socket_thread_num: 1,
        core_offset: 0,
        worker_flip_threshold: 5,
        message_queue_base: 512,
        worker_queue_base: 256,
        enable_mac: false,
        bigstation_mode: false,
        save_decode_data: false,
        save_tx_data: false,
        frames_to_test: 3,
        fft_thread_num: 0,
        zf_thread_num: 0,
        demul_thread_num: 0,
    }
}
