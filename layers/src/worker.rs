//! Worker Pool
//!
//! Fixed-size, core-pinned threads created once at startup. A unified
//! worker sweeps every stage queue of its current parity class and serves
//! at most one event per sweep; after `worker_flip_threshold` consecutive
//! empty sweeps it reconsiders which parity class to drain. In bigstation
//! mode workers are partitioned into per-stage groups instead and alternate
//! parity classes round-robin.

use crate::buffers::Buffers;
use crate::config::StationConfig;
use crate::kernels::{DoDecode, DoDemul, DoEncode, DoFft, DoIfft, DoPrecode, DoZf, Kernel};
use crate::queues::{SchedQueues, SchedulePosition};
use common::types::ThreadRole;
use common::utils::pin_to_core;
use common::{EventKind, SCHEDULE_QUEUES};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

struct WorkerCtx {
    cfg: Arc<StationConfig>,
    buffers: Arc<Buffers>,
    queues: Arc<SchedQueues>,
    pos: Arc<SchedulePosition>,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn spawn(
        cfg: Arc<StationConfig>,
        buffers: Arc<Buffers>,
        queues: Arc<SchedQueues>,
        pos: Arc<SchedulePosition>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let mk_ctx = || WorkerCtx {
            cfg: cfg.clone(),
            buffers: buffers.clone(),
            queues: queues.clone(),
            pos: pos.clone(),
            running: running.clone(),
        };

        let mut handles = Vec::with_capacity(cfg.worker_thread_num);
        if cfg.bigstation_mode {
            let fft_end = cfg.fft_thread_num;
            let zf_end = fft_end + cfg.zf_thread_num;
            let demul_end = zf_end + cfg.demul_thread_num;
            info!(
                "spawning bigstation workers: {} fft, {} zf, {} demul, {} decode",
                cfg.fft_thread_num,
                cfg.zf_thread_num,
                cfg.demul_thread_num,
                cfg.worker_thread_num - demul_end
            );
            for tid in 0..cfg.worker_thread_num {
                let stages: &'static [EventKind] = if tid < fft_end {
                    &[EventKind::Fft, EventKind::Ifft]
                } else if tid < zf_end {
                    &[EventKind::Zf]
                } else if tid < demul_end {
                    &[EventKind::Demul, EventKind::Precode]
                } else {
                    &[EventKind::Decode, EventKind::Encode]
                };
                let ctx = mk_ctx();
                handles.push(
                    thread::Builder::new()
                        .name(format!("worker-{}", tid))
                        .spawn(move || grouped_worker(tid, stages, ctx))
                        .expect("spawn worker thread"),
                );
            }
        } else {
            info!("spawning {} unified workers", cfg.worker_thread_num);
            for tid in 0..cfg.worker_thread_num {
                let ctx = mk_ctx();
                handles.push(
                    thread::Builder::new()
                        .name(format!("worker-{}", tid))
                        .spawn(move || unified_worker(tid, ctx))
                        .expect("spawn worker thread"),
                );
            }
        }
        Self { handles }
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

/// Kernels a worker may run, in sweep order. ZF first: a stalled ZF gates
/// both directions of its frame.
fn build_kernels(ctx: &WorkerCtx, stages: &[EventKind]) -> Vec<Box<dyn Kernel>> {
    let cfg = &ctx.cfg;
    let mut kernels: Vec<Box<dyn Kernel>> = Vec::new();
    for &stage in stages {
        let kernel: Box<dyn Kernel> = match stage {
            EventKind::Zf => Box::new(DoZf::new(cfg.clone(), ctx.buffers.clone())),
            EventKind::Fft => Box::new(DoFft::new(cfg.clone(), ctx.buffers.clone())),
            EventKind::Decode => Box::new(DoDecode::new(cfg.clone(), ctx.buffers.clone())),
            EventKind::Demul => Box::new(DoDemul::new(cfg.clone(), ctx.buffers.clone())),
            EventKind::Ifft => Box::new(DoIfft::new(cfg.clone(), ctx.buffers.clone())),
            EventKind::Precode => Box::new(DoPrecode::new(cfg.clone(), ctx.buffers.clone())),
            EventKind::Encode => Box::new(DoEncode::new(cfg.clone(), ctx.buffers.clone())),
            other => panic!("{:?} is not a worker stage", other),
        };
        kernels.push(kernel);
    }
    kernels
}

/// Stage list of a unified worker, trimmed to the directions the frame
/// schedule actually contains.
fn unified_stages(cfg: &StationConfig) -> Vec<EventKind> {
    let mut stages = vec![EventKind::Zf, EventKind::Fft];
    if cfg.frame.num_ul_syms() > 0 {
        stages.push(EventKind::Decode);
        stages.push(EventKind::Demul);
    }
    if cfg.frame.num_dl_syms() > 0 {
        stages.push(EventKind::Ifft);
        stages.push(EventKind::Precode);
        stages.push(EventKind::Encode);
    }
    stages
}

fn unified_worker(tid: usize, ctx: WorkerCtx) {
    pin_to_core(ThreadRole::Worker, ctx.cfg.base_worker_core(), tid);
    let stages = unified_stages(&ctx.cfg);
    let mut kernels = build_kernels(&ctx, &stages);
    let flip_threshold = ctx.cfg.worker_flip_threshold;

    let mut qid = 0usize;
    let mut empty_sweeps = 0usize;
    while ctx.running.load(Ordering::Relaxed) {
        let mut served = false;
        for (kernel, &stage) in kernels.iter_mut().zip(stages.iter()) {
            if kernel.try_launch(ctx.queues.stage(stage, qid), &ctx.queues.completion[qid]) {
                served = true;
                break;
            }
        }
        if served {
            empty_sweeps = 0;
            continue;
        }
        empty_sweeps += 1;
        if empty_sweeps == flip_threshold {
            // When scheduling runs ahead of processing both classes carry
            // work, so flip; otherwise align with the scheduled frame.
            let sche = ctx.pos.cur_sche_frame();
            if sche != ctx.pos.cur_proc_frame() {
                qid ^= 1;
            } else {
                qid = (sche & 1) as usize;
            }
            empty_sweeps = 0;
        }
    }
    debug!("worker {} exit", tid);
}

/// Bigstation-mode worker: a fixed stage group, alternating parity classes.
fn grouped_worker(tid: usize, stages: &[EventKind], ctx: WorkerCtx) {
    pin_to_core(ThreadRole::Worker, ctx.cfg.base_worker_core(), tid);
    let mut kernels = build_kernels(&ctx, stages);

    let mut qid = 0usize;
    while ctx.running.load(Ordering::Relaxed) {
        let mut served = false;
        for (kernel, &stage) in kernels.iter_mut().zip(stages.iter()) {
            if kernel.try_launch(ctx.queues.stage(stage, qid), &ctx.queues.completion[qid]) {
                served = true;
                break;
            }
        }
        if !served {
            qid = (qid + 1) % SCHEDULE_QUEUES;
        }
    }
    debug!("worker {} exit", tid);
}
