//! Station Assembly
//!
//! Builds queues, buffer pools, the worker pool, the sample transport and
//! the optional MAC thread from one configuration, then runs the master
//! loop on the calling thread. Shutdown joins every thread and writes the
//! configured binary dumps.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::master::Master;
use crate::queues::{SchedQueues, SchedulePosition};
use crate::stats::{save_decode_data, save_tx_data};
use crate::worker::WorkerPool;
use crate::PhyError;
use interfaces::mac::{MacConfig, MacThread};
use interfaces::txrx::{TxRxConfig, TxRxHandles, UdpTxRx};
use num_complex::Complex32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Default transport endpoints; embedders override via [`Station::with_transport`].
const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_BASE_PORT: u16 = 8200;
const DEFAULT_REMOTE_ADDR: &str = "127.0.0.1:8100";

pub struct Station {
    cfg: Arc<StationConfig>,
    queues: Arc<SchedQueues>,
    buffers: Arc<Buffers>,
    pos: Arc<SchedulePosition>,
    running: Arc<AtomicBool>,
    workers: Option<WorkerPool>,
    txrx: UdpTxRx,
    mac: Option<MacThread>,
    data_dir: PathBuf,
}

impl Station {
    pub fn new(cfg: StationConfig) -> Result<Self, PhyError> {
        Self::with_transport(
            cfg,
            DEFAULT_BIND_ADDR.to_string(),
            DEFAULT_BASE_PORT,
            DEFAULT_REMOTE_ADDR.to_string(),
        )
    }

    pub fn with_transport(
        cfg: StationConfig,
        bind_addr: String,
        base_port: u16,
        remote_addr: String,
    ) -> Result<Self, PhyError> {
        cfg.validate()?;
        let cfg = Arc::new(cfg);
        let queues = Arc::new(SchedQueues::new(&cfg));
        let buffers = Arc::new(Buffers::new(&cfg));
        let pos = Arc::new(SchedulePosition::new());
        let running = Arc::new(AtomicBool::new(true));

        let dl_symbol_idx = (0..cfg.frame.num_total_syms())
            .map(|s| cfg.frame.dl_symbol_idx(s))
            .collect();
        let txrx = UdpTxRx::new(TxRxConfig {
            bind_addr,
            base_port,
            remote_addr,
            socket_thread_num: cfg.socket_thread_num,
            core_offset: cfg.core_offset,
            bs_ant_num: cfg.bs_ant_num,
            samps_per_symbol: cfg.samps_per_symbol,
            num_total_syms: cfg.frame.num_total_syms(),
            num_dl_syms: cfg.frame.num_dl_syms(),
            dl_symbol_idx,
        });

        info!(
            "station: master core {}, socket cores {}..{}, worker cores {}..{}",
            cfg.core_offset,
            cfg.core_offset + 1,
            cfg.core_offset + cfg.socket_thread_num,
            cfg.base_worker_core(),
            cfg.base_worker_core() + cfg.worker_thread_num - 1
        );

        Ok(Self {
            cfg,
            queues,
            buffers,
            pos,
            running,
            workers: None,
            txrx,
            mac: None,
            data_dir: PathBuf::from("data"),
        })
    }

    /// Directory the shutdown dumps are written into (default `data/`).
    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.data_dir = dir;
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Start all threads and run the master loop to completion on the
    /// calling thread.
    pub fn start(&mut self) -> Result<(), PhyError> {
        self.workers = Some(WorkerPool::spawn(
            self.cfg.clone(),
            self.buffers.clone(),
            self.queues.clone(),
            self.pos.clone(),
            self.running.clone(),
        ));

        self.txrx
            .start(
                TxRxHandles {
                    rx_samples: self.buffers.rx_samples.clone(),
                    tx_samples: self.buffers.tx_samples.clone(),
                    intake: self.queues.intake.clone(),
                    tx: self.queues.tx.clone(),
                },
                self.running.clone(),
            )
            .map_err(|e| PhyError::Io(std::io::Error::other(e.to_string())))?;

        if self.cfg.enable_mac {
            self.mac = Some(MacThread::spawn(
                MacConfig {
                    ue_ant_num: self.cfg.ue_ant_num,
                    core_offset: self.cfg.base_worker_core(),
                    core_index: self.cfg.worker_thread_num,
                },
                self.queues.mac_request.clone(),
                self.queues.mac_response.clone(),
                self.buffers.dl_bits.clone(),
                self.running.clone(),
            ));
        }

        let mut master = Master::new(
            self.cfg.clone(),
            self.queues.clone(),
            self.buffers.clone(),
            self.pos.clone(),
            self.running.clone(),
        );
        master.run();
        let last_frame = master.stats().last_frame();

        // Master exited: stop everyone and drain
        self.running.store(false, Ordering::Relaxed);
        if let Some(workers) = self.workers.take() {
            workers.join();
        }
        if let Some(mut mac) = self.mac.take() {
            mac.join();
        }
        self.txrx.join();

        if self.cfg.save_decode_data {
            save_decode_data(
                &self.cfg,
                &self.buffers,
                last_frame,
                &self.data_dir.join("decode_data.bin"),
            )?;
        }
        if self.cfg.save_tx_data {
            save_tx_data(
                &self.cfg,
                &self.buffers,
                last_frame,
                &self.data_dir.join("tx_data.bin"),
            )?;
        }
        info!("station shutdown complete");
        Ok(())
    }

    /// Request a cooperative stop; the master observes the flag between
    /// event batches.
    pub fn stop(&self) {
        info!("station: stop requested");
        self.running.store(false, Ordering::Relaxed);
    }

    /// The equalized constellation of the most recently demodulated frame's
    /// first uplink data symbol, `[ue][subcarrier]` interleaved re/im.
    pub fn equal_data(&self) -> Vec<f32> {
        if self.cfg.frame.num_ul_syms() == 0 {
            return Vec::new();
        }
        let frame = self.pos.max_equaled_frame();
        let row_idx = self.buffers.ul_row(frame, 0);
        // SAFETY: a quiescent or retired row; snapshot semantics are enough
        // for the embedding API.
        let row: &[Complex32] = unsafe { self.buffers.equal.row(row_idx) };
        let mut out = Vec::with_capacity(row.len() * 2);
        for c in row {
            out.push(c.re);
            out.push(c.im);
        }
        out
    }
}
