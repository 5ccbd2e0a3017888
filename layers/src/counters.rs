//! Stage Completion Counters
//!
//! Per-frame-slot bookkeeping of how much of each pipeline stage has
//! finished. Counters are plain values owned exclusively by the master
//! thread; workers report progress only through completion events.

use common::FRAME_WND;

/// Completion counter for one stage.
///
/// Stages with per-symbol granularity (FFT, Demul, Decode, ...) track a task
/// count per (frame slot, logical symbol) plus a symbols-complete count per
/// frame slot. Stages that complete once per frame (ZF, reciprocity
/// calibration, MAC-to-PHY) use [`FrameCounters::new_single`] and
/// [`FrameCounters::complete_single`].
#[derive(Debug)]
pub struct FrameCounters {
    /// Tasks finished, per frame slot and logical symbol.
    task_count: Vec<Vec<usize>>,
    /// Symbols finished, per frame slot.
    symbol_count: [usize; FRAME_WND],
    tasks_per_symbol: usize,
    symbols_per_frame: usize,
}

impl FrameCounters {
    pub fn new(symbols_per_frame: usize, tasks_per_symbol: usize) -> Self {
        Self {
            task_count: (0..FRAME_WND).map(|_| vec![0; symbols_per_frame]).collect(),
            symbol_count: [0; FRAME_WND],
            tasks_per_symbol,
            symbols_per_frame,
        }
    }

    /// Counter for a stage that completes once per frame.
    pub fn new_single(tasks_per_frame: usize) -> Self {
        Self::new(1, tasks_per_frame)
    }

    /// Record one finished task; returns true when it was the last task of
    /// that (frame, symbol).
    pub fn complete_task(&mut self, frame: u32, symbol_idx: usize) -> bool {
        let slot = frame as usize % FRAME_WND;
        let count = &mut self.task_count[slot][symbol_idx];
        debug_assert!(*count < self.tasks_per_symbol, "task counter overflow");
        *count += 1;
        *count == self.tasks_per_symbol
    }

    /// Single-count form for per-frame stages.
    pub fn complete_single(&mut self, frame: u32) -> bool {
        self.complete_task(frame, 0)
    }

    /// Record one finished symbol; returns true when it was the frame's last.
    pub fn complete_symbol(&mut self, frame: u32) -> bool {
        let slot = frame as usize % FRAME_WND;
        debug_assert!(self.symbol_count[slot] < self.symbols_per_frame);
        self.symbol_count[slot] += 1;
        self.symbol_count[slot] == self.symbols_per_frame
    }

    /// Clear the frame's slot for reuse by frame `frame + FRAME_WND`.
    pub fn reset(&mut self, frame: u32) {
        let slot = frame as usize % FRAME_WND;
        self.task_count[slot].fill(0);
        self.symbol_count[slot] = 0;
    }

    pub fn task_count(&self, frame: u32, symbol_idx: usize) -> usize {
        self.task_count[frame as usize % FRAME_WND][symbol_idx]
    }

    pub fn symbol_count(&self, frame: u32) -> usize {
        self.symbol_count[frame as usize % FRAME_WND]
    }

    /// Whether all of the frame's symbols have completed.
    pub fn is_last_symbol(&self, frame: u32) -> bool {
        self.symbol_count[frame as usize % FRAME_WND] == self.symbols_per_frame
    }

    pub fn max_symbol_count(&self) -> usize {
        self.symbols_per_frame
    }

    pub fn max_task_count(&self) -> usize {
        self.tasks_per_symbol
    }
}

/// RX packet accounting per frame slot.
#[derive(Debug)]
pub struct RxCounters {
    pub num_pkts: [usize; FRAME_WND],
    pub num_pilot_pkts: [usize; FRAME_WND],
    pub num_reciprocity_pkts: [usize; FRAME_WND],
    pub num_pkts_per_frame: usize,
    pub num_pilot_pkts_per_frame: usize,
    pub num_reciprocity_pkts_per_frame: usize,
}

impl RxCounters {
    pub fn new(
        num_pkts_per_frame: usize,
        num_pilot_pkts_per_frame: usize,
        num_reciprocity_pkts_per_frame: usize,
    ) -> Self {
        Self {
            num_pkts: [0; FRAME_WND],
            num_pilot_pkts: [0; FRAME_WND],
            num_reciprocity_pkts: [0; FRAME_WND],
            num_pkts_per_frame,
            num_pilot_pkts_per_frame,
            num_reciprocity_pkts_per_frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_and_symbol_completion() {
        // 2 symbols x 3 tasks
        let mut c = FrameCounters::new(2, 3);
        assert!(!c.complete_task(0, 0));
        assert!(!c.complete_task(0, 0));
        assert!(c.complete_task(0, 0));
        assert_eq!(c.task_count(0, 0), 3);
        assert_eq!(c.task_count(0, 1), 0);

        assert!(!c.complete_symbol(0));
        assert!(!c.is_last_symbol(0));
        assert!(c.complete_symbol(0));
        assert!(c.is_last_symbol(0));
    }

    #[test]
    fn test_single_count_stage() {
        let mut zf = FrameCounters::new_single(4);
        for _ in 0..3 {
            assert!(!zf.complete_single(5));
        }
        assert!(zf.complete_single(5));
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut c = FrameCounters::new(2, 2);
        c.complete_task(3, 0);
        c.complete_task(3, 0);
        c.complete_symbol(3);
        c.reset(3);
        assert_eq!(c.task_count(3, 0), 0);
        assert_eq!(c.symbol_count(3), 0);
        assert!(!c.is_last_symbol(3));
        // Slot behaves exactly like a fresh counter afterwards
        assert!(!c.complete_task(3, 0));
        assert!(c.complete_task(3, 0));
    }

    #[test]
    fn test_slots_independent() {
        let mut c = FrameCounters::new(1, 2);
        c.complete_task(0, 0);
        c.complete_task(1, 0);
        assert_eq!(c.task_count(0, 0), 1);
        assert_eq!(c.task_count(1, 0), 1);
        // Frame 8 aliases slot 0 only after frame 0 is reset
        c.reset(0);
        assert_eq!(c.task_count(8, 0), 0);
    }

    #[test]
    #[should_panic]
    fn test_overflow_asserts() {
        let mut c = FrameCounters::new(1, 1);
        c.complete_task(0, 0);
        c.complete_task(0, 0);
    }
}
