//! Scheduler Scenario Tests
//!
//! These tests drive the master state machine single-threaded: the test
//! plays the worker role by draining stage queues and feeding the events
//! back as completions, which makes every interleaving deterministic.

use common::{Event, EventKind, EventQueue, Tag, FRAME_WND, SCHEDULE_QUEUES};
use layers::buffers::Buffers;
use layers::config::StationConfig;
use layers::frame::FrameSchedule;
use layers::master::Master;
use layers::queues::{SchedQueues, SchedulePosition, WORKER_STAGES};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// The minimal scheduler configuration: 4 BS antennas, 2 users, 8 data
/// subcarriers, one pilot + two UL + two DL symbols.
fn test_config(frames_to_test: u32) -> StationConfig {
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
        frames_to_test,
        fft_thread_num: 0,
        zf_thread_num: 0,
        demul_thread_num: 0,
    }
}

struct Harness {
    master: Master,
    queues: Arc<SchedQueues>,
    running: Arc<AtomicBool>,
}

fn harness(frames_to_test: u32) -> Harness {
    let cfg = Arc::new(test_config(frames_to_test));
    let queues = Arc::new(SchedQueues::new(&cfg));
    let buffers = Arc::new(Buffers::new(&cfg));
    let pos = Arc::new(SchedulePosition::new());
    let running = Arc::new(AtomicBool::new(true));
    let master = Master::new(cfg, queues.clone(), buffers, pos, running.clone());
    Harness { master, queues, running }
}

fn rx_event(frame: u32, symbol: usize, ant: usize) -> Event {
    Event::new(EventKind::RxPacket, Tag::frm_sym_ant(frame, symbol, ant))
}

fn drain(q: &EventQueue) -> Vec<Event> {
    let mut out = Vec::new();
    while let Some(ev) = q.try_recv() {
        out.push(ev);
    }
    out
}

/// Inject one frame's RX packets (pilot + uplink symbols, all antennas).
fn inject_frame_rx(h: &mut Harness, frame: u32) -> bool {
    let mut finished = false;
    for symbol in [0usize, 1, 2] {
        for ant in 0..4 {
            finished |= h.master.handle_event(rx_event(frame, symbol, ant));
        }
    }
    h.master.dispatch_pending_fft();
    finished
}

/// Play the worker role until the pipeline quiesces. Returns per-kind event
/// counts and whether the run finished, asserting the window bound and the
/// TX symbol order along the way.
fn pump(h: &mut Harness) -> (HashMap<EventKind, usize>, bool) {
    let mut counts: HashMap<EventKind, usize> = HashMap::new();
    let mut finished = false;
    let mut last_tx_symbol: HashMap<u32, usize> = HashMap::new();
    loop {
        let mut progressed = false;
        for qid in 0..SCHEDULE_QUEUES {
            for kind in WORKER_STAGES {
                for ev in drain(h.queues.stage(kind, qid)) {
                    *counts.entry(kind).or_default() += 1;
                    progressed = true;
                    finished |= h.master.handle_event(ev);
                    // P1: the scheduled frame never runs further ahead than
                    // the schedule-queue depth
                    assert!(
                        h.master.cur_sche_frame()
                            <= h.master.cur_proc_frame() + SCHEDULE_QUEUES as u32
                    );
                }
            }
        }
        for txq in h.queues.tx.iter() {
            for ev in drain(txq) {
                // P4: TX is released in strictly increasing symbol order
                let tag = ev.tag(0);
                if let Some(&prev) = last_tx_symbol.get(&tag.frame()) {
                    assert!(tag.symbol() >= prev, "TX out of order");
                }
                last_tx_symbol.insert(tag.frame(), tag.symbol());
                *counts.entry(EventKind::PacketTx).or_default() += 1;
                progressed = true;
                finished |= h.master.handle_event(ev);
            }
        }
        h.master.dispatch_pending_fft();
        if !progressed {
            break;
        }
    }
    (counts, finished)
}

/// Scenario 1: all packets arrive in order; frames retire 0, 1, 2 and the
/// run finishes with the expected event counts per frame.
#[test]
fn happy_path_retires_frames_in_order() {
    let mut h = harness(3);
    let mut total: HashMap<EventKind, usize> = HashMap::new();
    let mut finished = false;

    for frame in 0..3u32 {
        assert_eq!(h.master.cur_proc_frame(), frame);
        assert!(!finished);
        inject_frame_rx(&mut h, frame);
        let (counts, f) = pump(&mut h);
        finished = f;
        for (k, v) in counts {
            *total.entry(k).or_default() += v;
        }
        // P5: frames retire in strictly increasing order
        assert_eq!(h.master.cur_proc_frame(), frame + 1);
    }

    assert!(finished, "run should finish when the last frame retires");
    // 12 RX packets -> 6 FFT events of 2 tags per frame
    assert_eq!(total[&EventKind::Fft], 6 * 3);
    // 8 single-subcarrier ZF batches per frame
    assert_eq!(total[&EventKind::Zf], 8 * 3);
    // 2 demul blocks x 2 UL symbols, same for decode
    assert_eq!(total[&EventKind::Demul], 4 * 3);
    assert_eq!(total[&EventKind::Decode], 4 * 3);
    // 2 encode tasks x 2 DL symbols
    assert_eq!(total[&EventKind::Encode], 4 * 3);
    assert_eq!(total[&EventKind::Precode], 4 * 3);
    // 2 antenna blocks x 2 DL symbols
    assert_eq!(total[&EventKind::Ifft], 4 * 3);
    // 4 antennas x 2 DL symbols transmitted per frame
    assert_eq!(total[&EventKind::PacketTx], 8 * 3);
}

/// P7: every RX packet of a frame becomes exactly one FFT tag.
#[test]
fn rx_packets_map_to_fft_tags() {
    let mut h = harness(3);
    inject_frame_rx(&mut h, 0);
    let events = drain(h.queues.stage(EventKind::Fft, 0));
    let tags: usize = events.iter().map(|e| e.num_tags).sum();
    assert_eq!(tags, 12); // == num_rx_pkts_per_frame
    assert!(events.iter().all(|e| e.num_tags == 2));
}

/// Scenario 2: uplink FFT completes before ZF. The rendezvous table records
/// the frame, and ZF completion flushes both demul dispatches at once.
#[test]
fn zf_after_fft_uses_rendezvous_table() {
    let mut h = harness(3);
    inject_frame_rx(&mut h, 0);

    // Run every FFT, holding ZF results back
    for ev in drain(h.queues.stage(EventKind::Fft, 0)) {
        h.master.handle_event(ev);
    }
    assert_eq!(h.master.fft_rendezvous(0), Some(0));
    assert_eq!(h.master.fft_rendezvous(1), Some(0));
    assert_eq!(h.master.zf_last_frame(), None);
    assert!(h.queues.stage(EventKind::Demul, 0).is_empty());

    // ZF completes late: both uplink symbols flush immediately
    for ev in drain(h.queues.stage(EventKind::Zf, 0)) {
        h.master.handle_event(ev);
    }
    assert_eq!(h.master.zf_last_frame(), Some(0));
    assert_eq!(h.queues.stage(EventKind::Demul, 0).len(), 4);
}

/// Scenario 3: ZF completes before uplink FFT. Each uplink FFT completion
/// dispatches demul directly.
#[test]
fn fft_after_zf_dispatches_demul_directly() {
    let mut h = harness(3);
    inject_frame_rx(&mut h, 0);

    // Pilot FFTs first (the first two dispatched events), uplink held back
    let fft_events = drain(h.queues.stage(EventKind::Fft, 0));
    assert_eq!(fft_events.len(), 6);
    for ev in &fft_events[..2] {
        h.master.handle_event(*ev);
    }
    for ev in drain(h.queues.stage(EventKind::Zf, 0)) {
        h.master.handle_event(ev);
    }
    assert_eq!(h.master.zf_last_frame(), Some(0));
    assert!(h.queues.stage(EventKind::Demul, 0).is_empty());

    // First uplink symbol's FFTs complete: demul for it fires at once
    for ev in &fft_events[2..4] {
        h.master.handle_event(*ev);
    }
    assert_eq!(h.queues.stage(EventKind::Demul, 0).len(), 2);
    for ev in &fft_events[4..6] {
        h.master.handle_event(*ev);
    }
    assert_eq!(h.queues.stage(EventKind::Demul, 0).len(), 4);
}

/// Scenario 4: downlink work arriving too far ahead of the processed frame
/// is deferred, and retirement flushes the deferral FIFO in order.
#[test]
fn early_downlink_is_deferred_until_retirement() {
    let mut h = harness(5);

    // Frame 0's first packet schedules its downlink immediately
    h.master.handle_event(rx_event(0, 0, 0));
    assert_eq!(h.master.deferral_len(), 0);
    assert_eq!(h.queues.stage(EventKind::Encode, 0).len(), 4);

    // Frame 1 is within the schedule horizon
    h.master.handle_event(rx_event(1, 0, 0));
    assert_eq!(h.master.deferral_len(), 0);
    assert_eq!(h.queues.stage(EventKind::Encode, 1).len(), 4);

    // Frames 2 and 3 are too far ahead while frame 0 is unretired
    h.master.handle_event(rx_event(2, 0, 0));
    h.master.handle_event(rx_event(3, 0, 0));
    assert_eq!(h.master.deferral_len(), 2);
    let deferred: Vec<u32> = h.master.deferred_frames().collect();
    assert_eq!(deferred, vec![2, 3]);
    // Only frame 0's encode events sit in parity class 0; frame 2's were
    // withheld
    assert_eq!(h.queues.stage(EventKind::Encode, 0).len(), 4);

    // Finish frame 0: the rest of its packets, then pump to retirement
    for symbol in [0usize, 1, 2] {
        for ant in 0..4 {
            if symbol == 0 && ant == 0 {
                continue;
            }
            h.master.handle_event(rx_event(0, symbol, ant));
        }
    }
    h.master.dispatch_pending_fft();
    pump(&mut h);
    assert_eq!(h.master.cur_proc_frame(), 1);

    // P6: the FIFO head (frame 2) was flushed at retirement; frame 3 is
    // still one frame beyond the schedule horizon and stays queued
    let deferred: Vec<u32> = h.master.deferred_frames().collect();
    assert_eq!(deferred, vec![3]);
}

/// Scenario 5: a packet beyond the frame window is unrecoverable; the
/// station stops cleanly instead of corrupting reused buffers.
#[test]
fn future_frame_packet_is_fatal() {
    let mut h = harness(3);
    h.master.handle_event(rx_event(0, 0, 0));
    assert!(h.running.load(Ordering::Relaxed));

    let finished = h
        .master
        .handle_event(rx_event(FRAME_WND as u32, 0, 1));
    assert!(!finished);
    assert!(!h.running.load(Ordering::Relaxed), "running flag must clear");
    // The fatal packet was not admitted into the pipeline
    h.master.dispatch_pending_fft();
    assert!(h.queues.stage(EventKind::Fft, 0).is_empty());
}

/// IFFT completions arriving out of symbol order must not reorder TX: the
/// later symbol waits until the earlier one is ready.
#[test]
fn tx_release_waits_for_in_order_ifft() {
    let mut h = harness(3);
    inject_frame_rx(&mut h, 0);
    // Run uplink + encode + precode far enough to reach IFFT dispatch
    for ev in drain(h.queues.stage(EventKind::Fft, 0)) {
        h.master.handle_event(ev);
    }
    for ev in drain(h.queues.stage(EventKind::Zf, 0)) {
        h.master.handle_event(ev);
    }
    for ev in drain(h.queues.stage(EventKind::Encode, 0)) {
        h.master.handle_event(ev);
    }
    for ev in drain(h.queues.stage(EventKind::Precode, 0)) {
        h.master.handle_event(ev);
    }
    let ifft_events = drain(h.queues.stage(EventKind::Ifft, 0));
    assert_eq!(ifft_events.len(), 4); // 2 antenna blocks x 2 DL symbols

    // Complete the SECOND downlink symbol's IFFT first: no TX may fire
    h.master.handle_event(ifft_events[2]);
    h.master.handle_event(ifft_events[3]);
    assert!(h.queues.tx[0].is_empty(), "TX released out of order");

    // Completing the first symbol releases both, in order
    h.master.handle_event(ifft_events[0]);
    h.master.handle_event(ifft_events[1]);
    let tx: Vec<usize> = drain(&h.queues.tx[0]).iter().map(|e| e.tag(0).symbol()).collect();
    assert_eq!(tx.len(), 8);
    assert!(tx[..4].iter().all(|&s| s == 3)); // first DL symbol
    assert!(tx[4..].iter().all(|&s| s == 4)); // second DL symbol
}

/// A runtime RAN update changes the live modulation order.
#[test]
fn ran_update_applies_mod_order() {
    let mut h = harness(3);
    h.master.handle_event(Event::ran_update(4, 4, 0));
    // Indirectly visible through the config shared with the kernels
    inject_frame_rx(&mut h, 0);
    let (_, finished) = pump(&mut h);
    assert!(!finished);
}
