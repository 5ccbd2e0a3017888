//! Pipeline Queue Wiring
//!
//! One stage queue per (worker stage, parity class), one completion queue
//! per parity class, one intake queue per socket thread (the per-producer
//! shard standing in for producer tokens), one TX queue per socket thread,
//! and the MAC request/response pair. All bounded; sized proportionally to
//! the number of data symbols per frame.

use crate::config::StationConfig;
use common::{EventKind, EventQueue, SCHEDULE_QUEUES};
use std::array;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Stages served by the worker pool, in the order a unified worker sweeps
/// them.
pub const WORKER_STAGES: [EventKind; 7] = [
    EventKind::Zf,
    EventKind::Fft,
    EventKind::Decode,
    EventKind::Demul,
    EventKind::Ifft,
    EventKind::Precode,
    EventKind::Encode,
];

pub const NUM_WORKER_STAGES: usize = WORKER_STAGES.len();

fn stage_slot(kind: EventKind) -> usize {
    match kind {
        EventKind::Zf => 0,
        EventKind::Fft => 1,
        EventKind::Decode => 2,
        EventKind::Demul => 3,
        EventKind::Ifft => 4,
        EventKind::Precode => 5,
        EventKind::Encode => 6,
        other => panic!("{:?} is not a worker stage", other),
    }
}

/// All queues of one station instance.
pub struct SchedQueues {
    stage: [[EventQueue; SCHEDULE_QUEUES]; NUM_WORKER_STAGES],
    /// Worker completions, indexed by parity class.
    pub completion: [EventQueue; SCHEDULE_QUEUES],
    /// RX intake, one shard per socket thread. Shared with the socket
    /// threads, which also report TX completions through their shard.
    pub intake: Vec<Arc<EventQueue>>,
    /// PacketTx events, one queue per socket thread.
    pub tx: Vec<Arc<EventQueue>>,
    /// Master -> MAC (PacketToMac, SnrReport). Shared with the MAC thread.
    pub mac_request: Arc<EventQueue>,
    /// MAC -> master (PacketFromMac, RanUpdate).
    pub mac_response: Arc<EventQueue>,
}

impl SchedQueues {
    pub fn new(cfg: &StationConfig) -> Self {
        let data_syms = cfg.frame.num_data_syms().max(1);
        let message_cap = cfg.message_queue_base * data_syms;
        let worker_cap = cfg.worker_queue_base * data_syms;

        Self {
            stage: array::from_fn(|_| array::from_fn(|_| EventQueue::new(worker_cap))),
            completion: array::from_fn(|_| EventQueue::new(message_cap)),
            intake: (0..cfg.socket_thread_num)
                .map(|_| Arc::new(EventQueue::new(message_cap)))
                .collect(),
            tx: (0..cfg.socket_thread_num)
                .map(|_| Arc::new(EventQueue::new(worker_cap)))
                .collect(),
            mac_request: Arc::new(EventQueue::new(message_cap)),
            mac_response: Arc::new(EventQueue::new(message_cap)),
        }
    }

    /// The stage queue of `kind` for parity class `qid`.
    pub fn stage(&self, kind: EventKind, qid: usize) -> &EventQueue {
        &self.stage[stage_slot(kind)][qid]
    }
}

/// The master's frame positions, published for the workers' queue-parity
/// heuristic and for the embedding API. The master is the only writer.
pub struct SchedulePosition {
    cur_sche_frame: AtomicU32,
    cur_proc_frame: AtomicU32,
    max_equaled_frame: AtomicU32,
}

impl SchedulePosition {
    pub fn new() -> Self {
        Self {
            cur_sche_frame: AtomicU32::new(0),
            cur_proc_frame: AtomicU32::new(0),
            max_equaled_frame: AtomicU32::new(0),
        }
    }

    pub fn cur_sche_frame(&self) -> u32 {
        self.cur_sche_frame.load(Ordering::Relaxed)
    }

    pub fn cur_proc_frame(&self) -> u32 {
        self.cur_proc_frame.load(Ordering::Relaxed)
    }

    pub fn max_equaled_frame(&self) -> u32 {
        self.max_equaled_frame.load(Ordering::Relaxed)
    }

    pub fn set_cur_sche_frame(&self, frame: u32) {
        self.cur_sche_frame.store(frame, Ordering::Relaxed);
    }

    pub fn set_cur_proc_frame(&self, frame: u32) {
        self.cur_proc_frame.store(frame, Ordering::Relaxed);
    }

    pub fn set_max_equaled_frame(&self, frame: u32) {
        self.max_equaled_frame.store(frame, Ordering::Relaxed);
    }
}

impl Default for SchedulePosition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;
    use common::{Event, Tag};

    #[test]
    fn test_queue_sizing() {
        let cfg = small_config();
        let q = SchedQueues::new(&cfg);
        // 4 data symbols x configured bases
        assert_eq!(q.completion[0].capacity(), 512 * 4);
        assert_eq!(q.stage(EventKind::Fft, 0).capacity(), 256 * 4);
        assert_eq!(q.intake.len(), 1);
        assert_eq!(q.tx.len(), 1);
    }

    #[test]
    fn test_stage_parity_classes_disjoint() {
        let cfg = small_config();
        let q = SchedQueues::new(&cfg);
        q.stage(EventKind::Demul, 0)
            .send(Event::new(EventKind::Demul, Tag::frm_sym_sc(0, 1, 0)));
        assert!(q.stage(EventKind::Demul, 1).is_empty());
        assert_eq!(q.stage(EventKind::Demul, 0).len(), 1);
    }
}
