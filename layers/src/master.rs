//! Master Scheduler
//!
//! One thread, one event loop. The master ingests RX packets and worker
//! completions, advances the per-frame stage counters, fans out follow-on
//! work to the stage queues, and retires frames in order. It alternates
//! fairly between the I/O intake shards and the completion queue of the
//! frame being processed so neither side can starve the other.
//!
//! All counters and rendezvous tables live here as plain values; workers
//! communicate only through completion events.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::counters::{FrameCounters, RxCounters};
use crate::frame::SymbolKind;
use crate::kernels::modulate;
use crate::queues::{SchedQueues, SchedulePosition};
use crate::stats::{Stats, TsType};
use common::types::ThreadRole;
use common::utils::pin_to_core;
use common::{Event, EventKind, Tag, FRAME_WND, SCHEDULE_QUEUES};
use std::array;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Events pulled per intake shard per I/O turn.
const DEQUEUE_BULK_IO: usize = 32;

/// Directions of the scheduled frame that have finished fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleFlags(u8);

impl ScheduleFlags {
    pub const UPLINK_COMPLETE: u8 = 1 << 0;
    pub const DOWNLINK_COMPLETE: u8 = 1 << 1;
    const ALL: u8 = Self::UPLINK_COMPLETE | Self::DOWNLINK_COMPLETE;

    pub fn set(&mut self, bits: u8) {
        self.0 |= bits;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn all_complete(&self) -> bool {
        self.0 == Self::ALL
    }
}

pub struct Master {
    cfg: Arc<StationConfig>,
    queues: Arc<SchedQueues>,
    buffers: Arc<Buffers>,
    pos: Arc<SchedulePosition>,
    running: Arc<AtomicBool>,
    stats: Stats,

    cur_sche_frame: u32,
    cur_proc_frame: u32,
    sched_flags: ScheduleFlags,

    rx: RxCounters,
    pilot_fft: FrameCounters,
    uplink_fft: FrameCounters,
    rc: FrameCounters,
    zf: FrameCounters,
    demul: FrameCounters,
    decode: FrameCounters,
    tomac: FrameCounters,
    mac_to_phy: FrameCounters,
    encode: FrameCounters,
    precode: FrameCounters,
    ifft: FrameCounters,
    tx: FrameCounters,

    /// Frame whose uplink FFT last completed, per logical UL symbol.
    fft_cur_frame_for_symbol: Vec<Option<u32>>,
    /// Frame whose encoding last completed, per logical DL symbol.
    encode_cur_frame_for_symbol: Vec<Option<u32>>,
    /// Frame whose IFFT last completed, per logical DL symbol.
    ifft_cur_frame_for_symbol: Vec<Option<u32>>,
    zf_last_frame: Option<u32>,
    rc_last_frame: Option<u32>,
    /// Next downlink symbol allowed to transmit, enforcing in-order TX.
    ifft_next_symbol: usize,

    /// RX tags awaiting FFT dispatch, per frame slot.
    fft_backlog: [VecDeque<Tag>; FRAME_WND],
    fft_created_count: usize,

    /// Frames whose downlink work arrived too early, FIFO.
    encode_deferral: VecDeque<u32>,
}

impl Master {
    pub fn new(
        cfg: Arc<StationConfig>,
        queues: Arc<SchedQueues>,
        buffers: Arc<Buffers>,
        pos: Arc<SchedulePosition>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let frame = &cfg.frame;
        let mut master = Self {
            rx: RxCounters::new(
                cfg.num_rx_pkts_per_frame(),
                cfg.num_pilot_pkts_per_frame(),
                cfg.num_reciprocity_pkts_per_frame(),
            ),
            pilot_fft: FrameCounters::new(frame.num_pilot_syms(), cfg.bs_ant_num),
            uplink_fft: FrameCounters::new(frame.num_ul_syms(), cfg.bs_ant_num),
            rc: FrameCounters::new_single(cfg.num_reciprocity_pkts_per_frame().max(1)),
            zf: FrameCounters::new_single(cfg.zf_events_per_symbol()),
            demul: FrameCounters::new(frame.num_ul_syms(), cfg.demul_events_per_symbol()),
            decode: FrameCounters::new(frame.num_ul_syms(), cfg.blocks_per_symbol()),
            tomac: FrameCounters::new(frame.num_ul_syms(), cfg.ue_ant_num),
            mac_to_phy: FrameCounters::new_single(cfg.ue_ant_num),
            encode: FrameCounters::new(frame.num_dl_syms(), cfg.blocks_per_symbol()),
            precode: FrameCounters::new(frame.num_dl_syms(), cfg.demul_events_per_symbol()),
            ifft: FrameCounters::new(frame.num_dl_syms(), cfg.bs_ant_num),
            tx: FrameCounters::new(frame.num_dl_syms(), cfg.bs_ant_num),
            fft_cur_frame_for_symbol: vec![None; frame.num_ul_syms()],
            encode_cur_frame_for_symbol: vec![None; frame.num_dl_syms()],
            ifft_cur_frame_for_symbol: vec![None; frame.num_dl_syms()],
            zf_last_frame: None,
            rc_last_frame: None,
            ifft_next_symbol: 0,
            fft_backlog: array::from_fn(|_| VecDeque::new()),
            fft_created_count: 0,
            encode_deferral: VecDeque::new(),
            cur_sche_frame: 0,
            cur_proc_frame: 0,
            sched_flags: ScheduleFlags::default(),
            stats: Stats::new(),
            cfg,
            queues,
            buffers,
            pos,
            running,
        };
        master.preset_missing_directions();
        master
    }

    /// Run the event loop until the last frame retires or `running` clears.
    pub fn run(&mut self) {
        pin_to_core(ThreadRole::Master, self.cfg.core_offset, 0);
        info!(
            "master loop starting: {} frames, window {}, {} workers",
            self.cfg.frames_to_test, FRAME_WND, self.cfg.worker_thread_num
        );

        let max_events = (DEQUEUE_BULK_IO * (self.cfg.socket_thread_num + 1)).max(512);
        let mut events = vec![Event::empty(EventKind::RxPacket); max_events];
        let mut io_turn = true;
        let mut finished = false;

        while !finished && self.running.load(Ordering::Relaxed) {
            let mut num_events = 0usize;
            if io_turn {
                for shard in self.queues.intake.iter() {
                    let end = (num_events + DEQUEUE_BULK_IO).min(events.len());
                    num_events += shard.recv_bulk(&mut events[num_events..end]);
                }
                if self.cfg.enable_mac {
                    let end = (num_events + DEQUEUE_BULK_IO).min(events.len());
                    num_events += self.queues.mac_response.recv_bulk(&mut events[num_events..end]);
                }
            } else {
                let qid = (self.cur_proc_frame & 1) as usize;
                num_events += self.queues.completion[qid].recv_bulk(&mut events);
            }
            io_turn = !io_turn;

            for ev in events.iter().take(num_events) {
                if self.handle_event(*ev) {
                    finished = true;
                    break;
                }
            }
            // Opportunistic FFT dispatch for the frame being scheduled
            self.dispatch_pending_fft();
        }

        info!("master loop exiting");
        self.stats.print_summary();
        self.running.store(false, Ordering::Relaxed);
    }

    /// Process one event; returns true when the final frame has retired.
    pub fn handle_event(&mut self, ev: Event) -> bool {
        match ev.kind {
            EventKind::RxPacket => self.handle_rx_packet(ev.tag(0)),
            EventKind::Fft => {
                for i in 0..ev.num_tags {
                    self.handle_fft_done(ev.tag(i));
                }
                false
            }
            EventKind::Zf => {
                for i in 0..ev.num_tags {
                    self.handle_zf_done(ev.tag(i));
                }
                false
            }
            EventKind::Demul => self.handle_demul_done(ev.tag(0)),
            EventKind::Decode => {
                let mut finished = false;
                for i in 0..ev.num_tags {
                    finished |= self.handle_decode_done(ev.tag(i));
                }
                finished
            }
            EventKind::PacketToMac => self.handle_tomac_done(ev.tag(0)),
            EventKind::PacketFromMac => self.handle_mac_bits(ev.tag(0)),
            EventKind::Encode => {
                for i in 0..ev.num_tags {
                    self.handle_encode_done(ev.tag(i));
                }
                false
            }
            EventKind::Precode => self.handle_precode_done(ev.tag(0)),
            EventKind::Ifft => {
                let mut finished = false;
                for i in 0..ev.num_tags {
                    finished |= self.handle_ifft_done(ev.tag(i));
                }
                finished
            }
            EventKind::PacketTx => self.handle_tx_done(ev.tag(0)),
            EventKind::RanUpdate => {
                let mod_order_bits = ev.tags[1] as usize;
                info!(mod_order_bits, "applying RAN reconfiguration");
                self.cfg.set_mod_order(mod_order_bits);
                false
            }
            EventKind::SnrReport => {
                panic!("master received an outbound SnrReport event");
            }
        }
    }

    fn handle_rx_packet(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        if frame >= self.cur_sche_frame + FRAME_WND as u32 {
            error!(
                frame,
                symbol = tag.symbol(),
                cur_sche_frame = self.cur_sche_frame,
                window = FRAME_WND,
                "received packet beyond the frame window; buffers reused, stopping"
            );
            self.running.store(false, Ordering::Relaxed);
            return false;
        }
        self.update_rx_counters(frame, tag.symbol());
        self.fft_backlog[frame as usize % FRAME_WND].push_back(tag);
        false
    }

    fn update_rx_counters(&mut self, frame: u32, symbol: usize) {
        let slot = frame as usize % FRAME_WND;
        match self.cfg.frame.kind(symbol) {
            SymbolKind::Pilot => {
                self.rx.num_pilot_pkts[slot] += 1;
                if self.rx.num_pilot_pkts[slot] == self.rx.num_pilot_pkts_per_frame {
                    self.rx.num_pilot_pkts[slot] = 0;
                    self.stats.set(TsType::PilotAllRx, frame);
                    debug!(
                        frame,
                        ms = self.stats.delta_ms(TsType::PilotAllRx, TsType::FirstSymbolRx, frame),
                        "received all pilots"
                    );
                }
            }
            SymbolKind::CalibDl | SymbolKind::CalibUl => {
                self.rx.num_reciprocity_pkts[slot] += 1;
                if self.rx.num_reciprocity_pkts[slot] == self.rx.num_reciprocity_pkts_per_frame {
                    self.rx.num_reciprocity_pkts[slot] = 0;
                    self.stats.set(TsType::RcAllRx, frame);
                }
            }
            _ => {}
        }

        if self.rx.num_pkts[slot] == 0 {
            self.stats.set(TsType::FirstSymbolRx, frame);
            debug!(frame, symbol, "first packet of frame");
            if !self.cfg.enable_mac {
                // Downlink bits are static without a MAC; the first packet
                // of a frame is the downlink trigger.
                self.trigger_downlink(frame);
            }
        }

        self.rx.num_pkts[slot] += 1;
        if self.rx.num_pkts[slot] == self.rx.num_pkts_per_frame {
            self.rx.num_pkts[slot] = 0;
            self.stats.set(TsType::RxDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::RxDone, TsType::FirstSymbolRx, frame),
                "received all packets"
            );
        }
    }

    /// Downlink trigger: schedule encode now, or defer the frame when it is
    /// too far ahead of the processed frame (or behind earlier deferrals).
    fn trigger_downlink(&mut self, frame: u32) {
        if self.cfg.frame.num_dl_syms() == 0 {
            return;
        }
        if !self.encode_deferral.is_empty()
            || frame >= self.cur_proc_frame + SCHEDULE_QUEUES as u32
        {
            debug!(frame, "deferring downlink encoding");
            self.encode_deferral.push_back(frame);
        } else {
            self.schedule_downlink_processing(frame);
        }
    }

    fn schedule_downlink_processing(&mut self, frame: u32) {
        for i in 0..self.cfg.frame.num_dl_syms() {
            self.schedule_codeblocks(EventKind::Encode, frame, self.cfg.frame.dl_symbol(i));
        }
    }

    /// Drain RX backlog of the scheduled frame into FFT events.
    pub fn dispatch_pending_fft(&mut self) {
        let slot = self.cur_sche_frame as usize % FRAME_WND;
        let qid = (self.cur_sche_frame & 1) as usize;
        let block = self.cfg.fft_block_size;
        while self.fft_backlog[slot].len() >= block {
            let mut ev = Event::empty(EventKind::Fft);
            for _ in 0..block {
                let tag = self.fft_backlog[slot].pop_front().unwrap();
                if self.fft_created_count == 0 {
                    self.stats.set(TsType::ProcessingStarted, self.cur_sche_frame);
                }
                self.fft_created_count += 1;
                if self.fft_created_count == self.rx.num_pkts_per_frame {
                    self.fft_created_count = 0;
                    if self.cfg.bigstation_mode {
                        // With partitioned workers, all-FFT-dispatched is the
                        // uplink half of schedule completion.
                        self.check_increment_schedule_frame(
                            self.cur_sche_frame,
                            ScheduleFlags::UPLINK_COMPLETE,
                        );
                    }
                }
                ev.push_tag(tag);
            }
            self.queues.stage(EventKind::Fft, qid).send(ev);
        }
    }

    fn handle_fft_done(&mut self, tag: Tag) {
        let frame = tag.frame();
        let symbol = tag.symbol();
        match self.cfg.frame.kind(symbol) {
            SymbolKind::Pilot => {
                let pilot_idx = self.cfg.frame.pilot_symbol_idx(symbol).unwrap();
                let last_task = self.pilot_fft.complete_task(frame, pilot_idx);
                if !last_task {
                    return;
                }
                trace!(frame, symbol, "pilot symbol FFT complete");
                let cal_ready = !self.cfg.frame.is_rec_cal_enabled()
                    || self.rc_last_frame == Some(frame);
                if !cal_ready {
                    return;
                }
                if self.pilot_fft.complete_symbol(frame) {
                    self.stats.set(TsType::FftPilotsDone, frame);
                    debug!(
                        frame,
                        ms = self
                            .stats
                            .delta_ms(TsType::FftPilotsDone, TsType::FirstSymbolRx, frame),
                        "FFT-ed all pilots"
                    );
                    self.pilot_fft.reset(frame);
                    if self.cfg.enable_mac {
                        self.send_snr_report(frame, symbol);
                    }
                    self.schedule_subcarriers(EventKind::Zf, frame, 0);
                }
            }
            SymbolKind::Uplink => {
                let ul_idx = self.cfg.frame.ul_symbol_idx(symbol).unwrap();
                if self.uplink_fft.complete_task(frame, ul_idx) {
                    self.fft_cur_frame_for_symbol[ul_idx] = Some(frame);
                    trace!(frame, symbol, "uplink symbol FFT complete");
                    // Demodulate now if the frame's equalizer already exists
                    if self.zf_last_frame == Some(frame) {
                        self.schedule_subcarriers(EventKind::Demul, frame, symbol);
                    }
                    if self.uplink_fft.complete_symbol(frame) {
                        self.uplink_fft.reset(frame);
                    }
                }
            }
            SymbolKind::CalibDl | SymbolKind::CalibUl => {
                if self.rc.complete_single(frame) {
                    self.rc.reset(frame);
                    self.stats.set(TsType::RcDone, frame);
                    self.rc_last_frame = Some(frame);
                    debug!(frame, "reciprocity calibration complete");
                }
            }
            SymbolKind::Downlink | SymbolKind::Guard => {
                panic!("FFT completion for a {:?} symbol", self.cfg.frame.kind(symbol));
            }
        }
    }

    fn handle_zf_done(&mut self, tag: Tag) {
        let frame = tag.frame();
        trace!(frame, count = self.zf.task_count(frame, 0), "ZF task done");
        if !self.zf.complete_single(frame) {
            return;
        }
        self.stats.set(TsType::ZfDone, frame);
        self.zf_last_frame = Some(frame);
        self.zf.reset(frame);
        debug!(
            frame,
            ms = self.stats.delta_ms(TsType::ZfDone, TsType::FirstSymbolRx, frame),
            "completed zero-forcing"
        );

        // Flush uplink symbols whose FFT finished before the equalizer
        for i in 0..self.cfg.frame.num_ul_syms() {
            if self.fft_cur_frame_for_symbol[i] == Some(frame) {
                self.schedule_subcarriers(EventKind::Demul, frame, self.cfg.frame.ul_symbol(i));
            }
        }
        // Flush downlink symbols whose encoding finished before the precoder
        for i in 0..self.cfg.frame.num_dl_syms() {
            if self.encode_cur_frame_for_symbol[i].is_some_and(|f| f >= frame) {
                self.schedule_subcarriers(EventKind::Precode, frame, self.cfg.frame.dl_symbol(i));
            }
        }
    }

    fn handle_demul_done(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let ul_idx = self.cfg.frame.ul_symbol_idx(symbol).unwrap();
        trace!(frame, symbol, sc = tag.sc_id(), "demul block done");
        if !self.demul.complete_task(frame, ul_idx) {
            return false;
        }
        self.schedule_codeblocks(EventKind::Decode, frame, symbol);
        debug!(frame, symbol, "completed demodulation of symbol");
        if self.demul.complete_symbol(frame) {
            self.demul.reset(frame);
            self.pos.set_max_equaled_frame(frame);
            if !self.cfg.bigstation_mode {
                debug_assert_eq!(self.cur_sche_frame, frame);
                self.check_increment_schedule_frame(frame, ScheduleFlags::UPLINK_COMPLETE);
            }
            self.stats.set(TsType::DemulDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::DemulDone, TsType::FirstSymbolRx, frame),
                "completed demodulation"
            );
        }
        false
    }

    fn handle_decode_done(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let ul_idx = self.cfg.frame.ul_symbol_idx(symbol).unwrap();
        if !self.decode.complete_task(frame, ul_idx) {
            return false;
        }
        if self.cfg.enable_mac {
            self.schedule_users(frame, symbol);
        }
        debug!(frame, symbol, "completed decoding of symbol");
        if self.decode.complete_symbol(frame) {
            self.stats.set(TsType::DecodeDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::DecodeDone, TsType::FirstSymbolRx, frame),
                ul_syms = self.cfg.frame.num_ul_syms(),
                "completed decoding"
            );
            if !self.cfg.enable_mac {
                debug_assert_eq!(self.cur_proc_frame, frame);
                return self.check_frame_complete(frame);
            }
        }
        false
    }

    fn handle_tomac_done(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let ul_idx = self.cfg.frame.ul_symbol_idx(symbol).unwrap();
        if !self.tomac.complete_task(frame, ul_idx) {
            return false;
        }
        debug!(frame, symbol, "delivered symbol to MAC");
        if self.tomac.complete_symbol(frame) {
            debug_assert_eq!(self.cur_proc_frame, frame);
            debug!(frame, "completed MAC TX");
            return self.check_frame_complete(frame);
        }
        false
    }

    fn handle_mac_bits(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        if self.mac_to_phy.complete_single(frame) {
            self.trigger_downlink(frame);
            self.mac_to_phy.reset(frame);
            debug!(frame, "downlink bits complete");
        }
        false
    }

    fn handle_encode_done(&mut self, tag: Tag) {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let dl_idx = self.cfg.frame.dl_symbol_idx(symbol).unwrap();
        if !self.encode.complete_task(frame, dl_idx) {
            return;
        }
        self.encode_cur_frame_for_symbol[dl_idx] = Some(frame);
        // Precode immediately if the frame's precoder exists
        if self.zf_last_frame == Some(frame) {
            self.schedule_subcarriers(EventKind::Precode, frame, symbol);
        }
        debug!(frame, symbol, "completed encoding of symbol");
        if self.encode.complete_symbol(frame) {
            self.encode.reset(frame);
            self.stats.set(TsType::EncodeDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::EncodeDone, TsType::FirstSymbolRx, frame),
                "completed encoding"
            );
        }
    }

    fn handle_precode_done(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let dl_idx = self.cfg.frame.dl_symbol_idx(symbol).unwrap();
        trace!(frame, symbol, sc = tag.sc_id(), "precode block done");
        if !self.precode.complete_task(frame, dl_idx) {
            return false;
        }
        self.schedule_antennas(EventKind::Ifft, frame, symbol);
        debug!(frame, symbol, "completed precoding of symbol");
        if self.precode.complete_symbol(frame) {
            self.precode.reset(frame);
            self.stats.set(TsType::PrecodeDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::PrecodeDone, TsType::FirstSymbolRx, frame),
                "completed precoding"
            );
        }
        false
    }

    fn handle_ifft_done(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let dl_idx = self.cfg.frame.dl_symbol_idx(symbol).unwrap();
        trace!(frame, symbol, ant = tag.ant_id(), "IFFT done");
        if !self.ifft.complete_task(frame, dl_idx) {
            return false;
        }
        self.ifft_cur_frame_for_symbol[dl_idx] = Some(frame);
        // Release transmission strictly in symbol order: starting from the
        // next expected symbol, walk the contiguous run that is ready.
        if dl_idx == self.ifft_next_symbol {
            while self.ifft_next_symbol < self.cfg.frame.num_dl_syms()
                && self.ifft_cur_frame_for_symbol[self.ifft_next_symbol] == Some(frame)
            {
                let abs = self.cfg.frame.dl_symbol(self.ifft_next_symbol);
                self.schedule_antennas_tx(frame, abs);
                self.ifft_next_symbol += 1;
            }
        }
        debug!(frame, symbol, "completed IFFT of symbol");
        if self.ifft.complete_symbol(frame) {
            self.ifft_next_symbol = 0;
            self.stats.set(TsType::IfftDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::IfftDone, TsType::FirstSymbolRx, frame),
                "completed IFFT"
            );
            debug_assert_eq!(self.cur_proc_frame, frame);
            self.check_increment_schedule_frame(frame, ScheduleFlags::DOWNLINK_COMPLETE);
            return self.check_frame_complete(frame);
        }
        false
    }

    fn handle_tx_done(&mut self, tag: Tag) -> bool {
        let frame = tag.frame();
        let symbol = tag.symbol();
        let dl_idx = self.cfg.frame.dl_symbol_idx(symbol).unwrap();
        trace!(frame, symbol, ant = tag.ant_id(), "TX done");
        if !self.tx.complete_task(frame, dl_idx) {
            return false;
        }
        if dl_idx == 0 {
            self.stats.set(TsType::TxFirstDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::TxFirstDone, TsType::FirstSymbolRx, frame),
                "completed TX of first symbol"
            );
        }
        debug!(frame, symbol, "completed TX of symbol");
        if self.tx.complete_symbol(frame) {
            self.stats.set(TsType::TxDone, frame);
            debug!(
                frame,
                ms = self.stats.delta_ms(TsType::TxDone, TsType::FirstSymbolRx, frame),
                dl_syms = self.cfg.frame.num_dl_syms(),
                "completed TX"
            );
            return self.check_frame_complete(frame);
        }
        false
    }

    /// Fan one symbol's antennas out over FFT/IFFT blocks.
    fn schedule_antennas(&mut self, kind: EventKind, frame: u32, symbol: usize) {
        debug_assert!(kind == EventKind::Fft || kind == EventKind::Ifft);
        let qid = (frame & 1) as usize;
        let block = self.cfg.fft_block_size;
        let mut ant = 0;
        while ant < self.cfg.bs_ant_num {
            let mut ev = Event::empty(kind);
            for a in ant..(ant + block).min(self.cfg.bs_ant_num) {
                ev.push_tag(Tag::frm_sym_ant(frame, symbol, a));
            }
            ant += block;
            self.queues.stage(kind, qid).send(ev);
        }
    }

    /// Spread one symbol's TX over the socket threads, contiguous antenna
    /// ranges per thread.
    fn schedule_antennas_tx(&mut self, frame: u32, symbol: usize) {
        let total = self.cfg.bs_ant_num;
        let handlers = self.cfg.socket_thread_num;
        let per_handler = total.div_ceil(handlers);
        let mut ant = 0;
        for handler in 0..handlers {
            let end = ((handler + 1) * per_handler).min(total);
            while ant < end {
                self.queues.tx[handler]
                    .send(Event::new(EventKind::PacketTx, Tag::frm_sym_ant(frame, symbol, ant)));
                ant += 1;
            }
        }
    }

    /// Fan one symbol's subcarriers out over ZF batches or Demul/Precode
    /// blocks.
    fn schedule_subcarriers(&mut self, kind: EventKind, frame: u32, symbol: usize) {
        let qid = (frame & 1) as usize;
        match kind {
            EventKind::Zf => {
                let num_tasks = self.cfg.zf_events_per_symbol();
                let batch = self.cfg.zf_batch_size;
                let mut task = 0;
                while task < num_tasks {
                    let mut ev = Event::empty(kind);
                    for t in task..(task + batch).min(num_tasks) {
                        ev.push_tag(Tag::frm_sym_sc(frame, symbol, t * self.cfg.zf_block_size));
                    }
                    task += batch;
                    self.queues.stage(kind, qid).send(ev);
                }
            }
            EventKind::Demul | EventKind::Precode => {
                let block = self.cfg.demul_block_size;
                for i in 0..self.cfg.demul_events_per_symbol() {
                    self.queues
                        .stage(kind, qid)
                        .send(Event::new(kind, Tag::frm_sym_sc(frame, symbol, i * block)));
                }
            }
            other => panic!("{:?} is not a subcarrier stage", other),
        }
    }

    /// Fan one symbol's codeblocks out over Encode/Decode events.
    fn schedule_codeblocks(&mut self, kind: EventKind, frame: u32, symbol: usize) {
        debug_assert!(kind == EventKind::Encode || kind == EventKind::Decode);
        let qid = (frame & 1) as usize;
        let num_tasks = self.cfg.blocks_per_symbol();
        let block = self.cfg.encode_block_size;
        let mut cb = 0;
        while cb < num_tasks {
            let mut ev = Event::empty(kind);
            for c in cb..(cb + block).min(num_tasks) {
                ev.push_tag(Tag::frm_sym_cb(frame, symbol, c));
            }
            cb += block;
            self.queues.stage(kind, qid).send(ev);
        }
    }

    /// One PacketToMac per user for a decoded symbol.
    fn schedule_users(&mut self, frame: u32, symbol: usize) {
        for ue in 0..self.cfg.ue_ant_num {
            self.queues
                .mac_request
                .send(Event::new(EventKind::PacketToMac, Tag::frm_sym_ue(frame, symbol, ue)));
        }
    }

    /// One SnrReport per user after the frame's pilots are in.
    fn send_snr_report(&mut self, frame: u32, symbol: usize) {
        for ue in 0..self.cfg.ue_ant_num {
            let snr = self.evm_snr_db(ue);
            self.queues
                .mac_request
                .send(Event::snr_report(frame, symbol, ue, snr));
        }
    }

    /// EVM-based SNR estimate from the most recently equalized frame.
    fn evm_snr_db(&self, ue: usize) -> f32 {
        if self.cfg.frame.num_ul_syms() == 0 {
            return 0.0;
        }
        let frame = self.pos.max_equaled_frame();
        let sc_num = self.cfg.ofdm_data_num;
        let order = self.cfg.mod_order();
        let row = self.buffers.ul_row(frame, 0);
        // SAFETY: reading a retired or quiescent equalizer row; the value
        // is a report, not a pipeline input.
        let eq = unsafe { self.buffers.equal.row(row) };
        let mut evm = 0.0f32;
        for sc in 0..sc_num {
            let sym = eq[ue * sc_num + sc];
            let best = (0..1u8 << order)
                .map(|b| (sym - modulate(b, order)).norm_sqr())
                .fold(f32::MAX, f32::min);
            evm += best;
        }
        evm /= sc_num as f32;
        if evm <= f32::EPSILON {
            50.0
        } else {
            -10.0 * evm.log10()
        }
    }

    /// Mark one direction of the scheduled frame complete; advance when
    /// both are, pre-setting the bits of directions the schedule lacks.
    fn check_increment_schedule_frame(&mut self, frame: u32, completed: u8) {
        debug_assert_eq!(self.cur_sche_frame, frame);
        self.sched_flags.set(completed);
        if self.sched_flags.all_complete() {
            self.cur_sche_frame += 1;
            self.pos.set_cur_sche_frame(self.cur_sche_frame);
            self.sched_flags.clear();
            self.preset_missing_directions();
        }
    }

    fn preset_missing_directions(&mut self) {
        if self.cfg.frame.num_ul_syms() == 0 {
            self.sched_flags.set(ScheduleFlags::UPLINK_COMPLETE);
        }
        if self.cfg.frame.num_dl_syms() == 0 {
            self.sched_flags.set(ScheduleFlags::DOWNLINK_COMPLETE);
        }
    }

    /// Retire the frame if its terminal stages are all last-symbol. Returns
    /// true when the retired frame was the run's last.
    fn check_frame_complete(&mut self, frame: u32) -> bool {
        let terminal_ul_done = if self.cfg.enable_mac {
            self.tomac.is_last_symbol(frame)
        } else {
            self.decode.is_last_symbol(frame)
        };
        if !(self.ifft.is_last_symbol(frame) && self.tx.is_last_symbol(frame) && terminal_ul_done)
        {
            return false;
        }

        self.stats.update_frame(frame);
        debug_assert_eq!(self.cur_proc_frame, frame);
        self.decode.reset(frame);
        self.tomac.reset(frame);
        self.ifft.reset(frame);
        self.tx.reset(frame);
        self.cur_proc_frame += 1;
        self.pos.set_cur_proc_frame(self.cur_proc_frame);
        info!(frame, "frame retired");

        // Retirement freed a schedule slot: flush deferred downlink frames
        // in FIFO order until one is still too far ahead.
        for _ in 0..SCHEDULE_QUEUES {
            let Some(&deferred) = self.encode_deferral.front() else {
                break;
            };
            if deferred >= self.cur_proc_frame + SCHEDULE_QUEUES as u32 {
                break;
            }
            assert!(
                deferred >= self.cur_proc_frame,
                "deferred frame {} fell behind processed frame {}",
                deferred,
                self.cur_proc_frame
            );
            debug!(deferred, "scheduling deferred downlink frame");
            self.schedule_downlink_processing(deferred);
            self.encode_deferral.pop_front();
        }

        frame + 1 == self.cfg.frames_to_test
    }

    pub fn cur_sche_frame(&self) -> u32 {
        self.cur_sche_frame
    }

    pub fn cur_proc_frame(&self) -> u32 {
        self.cur_proc_frame
    }

    pub fn zf_last_frame(&self) -> Option<u32> {
        self.zf_last_frame
    }

    pub fn fft_rendezvous(&self, ul_idx: usize) -> Option<u32> {
        self.fft_cur_frame_for_symbol[ul_idx]
    }

    pub fn encode_rendezvous(&self, dl_idx: usize) -> Option<u32> {
        self.encode_cur_frame_for_symbol[dl_idx]
    }

    pub fn deferral_len(&self) -> usize {
        self.encode_deferral.len()
    }

    pub fn deferred_frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.encode_deferral.iter().copied()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}
