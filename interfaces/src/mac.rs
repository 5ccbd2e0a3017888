//! MAC-layer Thread
//!
//! Optional collaborator between the baseband core and the upper stack. It
//! consumes `PacketToMac` (decoded uplink data ready for a user) and
//! `SnrReport` events from the master, and supplies downlink bits: for each
//! frame it writes every user's payload into the downlink bit pool and
//! emits one `PacketFromMac` event per user, which is the master's downlink
//! trigger in MAC mode.
//!
//! Downlink payload generation is paced by uplink progress: bits for frame
//! F are produced when the first `PacketToMac` of frame F arrives, keeping
//! MAC-side production inside the scheduler's deferral horizon.

use common::types::ThreadRole;
use common::utils::pin_to_core;
use common::{Event, EventKind, EventQueue, SharedSlab, Tag, FRAME_WND};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct MacConfig {
    pub ue_ant_num: usize,
    /// MAC thread core: after the worker pool.
    pub core_offset: usize,
    pub core_index: usize,
}

pub struct MacThread {
    handle: Option<JoinHandle<()>>,
}

impl MacThread {
    pub fn spawn(
        cfg: MacConfig,
        request_q: Arc<EventQueue>,
        response_q: Arc<EventQueue>,
        dl_bits: Arc<SharedSlab<u8>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("mac".to_string())
            .spawn(move || mac_loop(cfg, request_q, response_q, dl_bits, running))
            .expect("spawn mac thread");
        Self { handle: Some(handle) }
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn mac_loop(
    cfg: MacConfig,
    request_q: Arc<EventQueue>,
    response_q: Arc<EventQueue>,
    dl_bits: Arc<SharedSlab<u8>>,
    running: Arc<AtomicBool>,
) {
    pin_to_core(ThreadRole::Mac, cfg.core_offset, cfg.core_index);
    // Downlink bits for frame 0 exist before any uplink is decoded
    let mut next_dl_frame: u32 = 0;
    produce_downlink_bits(&cfg, &dl_bits, &response_q, 0);
    next_dl_frame += 1;

    while running.load(Ordering::Relaxed) {
        let Some(ev) = request_q.try_recv() else {
            thread::sleep(Duration::from_micros(100));
            continue;
        };
        match ev.kind {
            EventKind::PacketToMac => {
                let tag = ev.tag(0);
                trace!(
                    frame = tag.frame(),
                    symbol = tag.symbol(),
                    ue = tag.ue_id(),
                    "uplink data handed to MAC"
                );
                // Uplink progress paces downlink payload production
                while next_dl_frame <= tag.frame() + 1 {
                    produce_downlink_bits(&cfg, &dl_bits, &response_q, next_dl_frame);
                    next_dl_frame += 1;
                }
            }
            EventKind::SnrReport => {
                let tag = ev.tag(0);
                debug!(
                    frame = tag.frame(),
                    ue = tag.ue_id(),
                    snr_db = ev.snr_db(),
                    "SNR report"
                );
            }
            other => panic!("MAC thread received {:?} event", other),
        }
    }
    debug!("mac thread exit");
}

/// Write one frame's downlink payload for every user and notify the master.
fn produce_downlink_bits(
    cfg: &MacConfig,
    dl_bits: &SharedSlab<u8>,
    response_q: &EventQueue,
    frame: u32,
) {
    let slot = frame as usize % FRAME_WND;
    for ue in 0..cfg.ue_ant_num {
        let row_idx = slot * cfg.ue_ant_num + ue;
        // SAFETY: the master schedules Encode for this frame only after all
        // users' PacketFromMac events below have been observed.
        let row = unsafe { dl_bits.row_mut(row_idx) };
        for (i, byte) in row.iter_mut().enumerate() {
            *byte = (frame as usize)
                .wrapping_add(ue * 31)
                .wrapping_add(i * 7) as u8;
        }
        response_q.send(Event::new(
            EventKind::PacketFromMac,
            Tag::frm_sym_ue(frame, 0, ue),
        ));
    }
    debug!(frame, "downlink bits written for all users");
}
