//! UDP Sample Transport
//!
//! Socket threads sit between the radio front-end and the master scheduler.
//! Each RX thread reads sample packets with a bounded timeout, copies the
//! payload into its (frame, symbol, antenna) row of the RX slab, and pushes
//! an `RxPacket` event into its own intake shard. The same threads drain
//! their `PacketTx` queue, sending the IFFT output and reporting the send
//! back to the master as a `PacketTx` completion through the intake shard.
//!
//! The wire format is a carrier, not a contract: a fixed 16-byte header
//! (frame, symbol, cell, antenna, little-endian) followed by
//! `samps_per_symbol` interleaved i16 I/Q pairs.

use crate::InterfaceError;
use bytes::{Buf, BufMut, BytesMut};
use common::types::ThreadRole;
use common::utils::pin_to_core;
use common::{Event, EventKind, EventQueue, SharedSlab, Tag, FRAME_WND};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sample packet header length on the wire.
pub const PACKET_HEADER_BYTES: usize = 16;

/// Socket read timeout; bounds the only kernel-level blocking in the
/// steady-state system.
const RX_TIMEOUT: Duration = Duration::from_millis(10);

/// Parsed sample packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub frame: u32,
    pub symbol: u16,
    pub cell: u16,
    pub ant: u16,
}

impl PacketHeader {
    pub fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.frame);
        out.put_u16_le(self.symbol);
        out.put_u16_le(self.cell);
        out.put_u16_le(self.ant);
        // Reserved
        out.put_u16_le(0);
        out.put_u32_le(0);
    }

    pub fn parse(mut buf: &[u8]) -> Result<Self, InterfaceError> {
        if buf.len() < PACKET_HEADER_BYTES {
            return Err(InterfaceError::InvalidPacket);
        }
        let frame = buf.get_u32_le();
        let symbol = buf.get_u16_le();
        let cell = buf.get_u16_le();
        let ant = buf.get_u16_le();
        Ok(Self { frame, symbol, cell, ant })
    }
}

/// Transport configuration, derived from the station configuration by the
/// caller.
#[derive(Debug, Clone)]
pub struct TxRxConfig {
    /// Local address the RX sockets bind to; thread i uses `base_port + i`.
    pub bind_addr: String,
    pub base_port: u16,
    /// Remote radio address TX packets are sent to.
    pub remote_addr: String,
    pub socket_thread_num: usize,
    /// Socket threads are pinned at `core_offset + 1 + tid`.
    pub core_offset: usize,
    pub bs_ant_num: usize,
    pub samps_per_symbol: usize,
    pub num_total_syms: usize,
    pub num_dl_syms: usize,
    /// Absolute symbol index -> logical downlink index, for locating TX rows.
    pub dl_symbol_idx: Vec<Option<usize>>,
}

/// Buffer and queue handles the transport needs from the core.
pub struct TxRxHandles {
    pub rx_samples: Arc<SharedSlab<i16>>,
    pub tx_samples: Arc<SharedSlab<i16>>,
    /// One intake shard per socket thread.
    pub intake: Vec<Arc<EventQueue>>,
    /// One TX queue per socket thread.
    pub tx: Vec<Arc<EventQueue>>,
}

/// The UDP transport; owns the socket threads.
pub struct UdpTxRx {
    cfg: TxRxConfig,
    handles: Vec<JoinHandle<()>>,
}

impl UdpTxRx {
    pub fn new(cfg: TxRxConfig) -> Self {
        Self { cfg, handles: Vec::new() }
    }

    /// Start the socket threads. Returns an error if any socket cannot be
    /// bound.
    pub fn start(
        &mut self,
        handles: TxRxHandles,
        running: Arc<AtomicBool>,
    ) -> Result<(), InterfaceError> {
        assert_eq!(handles.intake.len(), self.cfg.socket_thread_num);
        assert_eq!(handles.tx.len(), self.cfg.socket_thread_num);
        let rx_samples = handles.rx_samples;
        let tx_samples = handles.tx_samples;

        for tid in 0..self.cfg.socket_thread_num {
            let cfg = self.cfg.clone();
            let socket = UdpSocket::bind((cfg.bind_addr.as_str(), cfg.base_port + tid as u16))?;
            socket.set_read_timeout(Some(RX_TIMEOUT))?;
            info!(
                "socket thread {} bound to {}:{}",
                tid,
                cfg.bind_addr,
                cfg.base_port + tid as u16
            );
            let ctx = SocketCtx {
                cfg,
                socket,
                rx_samples: rx_samples.clone(),
                tx_samples: tx_samples.clone(),
                intake: handles.intake[tid].clone(),
                tx: handles.tx[tid].clone(),
                running: running.clone(),
            };
            self.handles.push(
                thread::Builder::new()
                    .name(format!("socket-{}", tid))
                    .spawn(move || socket_loop(tid, ctx))
                    .expect("spawn socket thread"),
            );
        }
        Ok(())
    }

    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

struct SocketCtx {
    cfg: TxRxConfig,
    socket: UdpSocket,
    rx_samples: Arc<SharedSlab<i16>>,
    tx_samples: Arc<SharedSlab<i16>>,
    intake: Arc<EventQueue>,
    tx: Arc<EventQueue>,
    running: Arc<AtomicBool>,
}

fn socket_loop(tid: usize, ctx: SocketCtx) {
    pin_to_core(ThreadRole::Socket, ctx.cfg.core_offset + 1, tid);
    let payload_len = ctx.cfg.samps_per_symbol * 2 * 2;
    let mut rx_buf = vec![0u8; PACKET_HEADER_BYTES + payload_len];
    let mut tx_buf = BytesMut::with_capacity(PACKET_HEADER_BYTES + payload_len);

    while ctx.running.load(Ordering::Relaxed) {
        match ctx.socket.recv(&mut rx_buf) {
            Ok(len) => {
                if let Err(e) = handle_rx(&ctx, &rx_buf[..len]) {
                    warn!("socket thread {}: dropping malformed packet: {}", tid, e);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                error!("socket thread {}: receive failed: {}", tid, e);
                ctx.running.store(false, Ordering::Relaxed);
                break;
            }
        }
        drain_tx(&ctx, &mut tx_buf);
    }
    debug!("socket thread {} exit", tid);
}

fn handle_rx(ctx: &SocketCtx, pkt: &[u8]) -> Result<(), InterfaceError> {
    let header = PacketHeader::parse(pkt)?;
    let payload = &pkt[PACKET_HEADER_BYTES..];
    if payload.len() != ctx.cfg.samps_per_symbol * 4 {
        return Err(InterfaceError::InvalidPacket);
    }
    if header.ant as usize >= ctx.cfg.bs_ant_num
        || header.symbol as usize >= ctx.cfg.num_total_syms
    {
        return Err(InterfaceError::InvalidPacket);
    }

    let row_idx = rx_row(&ctx.cfg, header.frame, header.symbol as usize, header.ant as usize);
    // SAFETY: this (frame, symbol, antenna) row is untouched until the
    // master observes the RxPacket event pushed below.
    let row = unsafe { ctx.rx_samples.row_mut(row_idx) };
    for (dst, src) in row.iter_mut().zip(payload.chunks_exact(2)) {
        *dst = i16::from_le_bytes([src[0], src[1]]);
    }

    ctx.intake.send(Event::new(
        EventKind::RxPacket,
        Tag::frm_sym_ant(header.frame, header.symbol as usize, header.ant as usize),
    ));
    Ok(())
}

fn drain_tx(ctx: &SocketCtx, tx_buf: &mut BytesMut) {
    while let Some(ev) = ctx.tx.try_recv() {
        debug_assert_eq!(ev.kind, EventKind::PacketTx);
        let tag = ev.tag(0);
        let Some(dl_idx) = ctx.cfg.dl_symbol_idx.get(tag.symbol()).copied().flatten() else {
            warn!("TX event for non-downlink symbol {}", tag.symbol());
            continue;
        };
        let row_idx = dl_row(&ctx.cfg, tag.frame(), dl_idx, tag.ant_id());
        // SAFETY: IFFT finished this row before TX was scheduled.
        let row = unsafe { ctx.tx_samples.row(row_idx) };

        tx_buf.clear();
        PacketHeader {
            frame: tag.frame(),
            symbol: tag.symbol() as u16,
            cell: 0,
            ant: tag.ant_id() as u16,
        }
        .write(tx_buf);
        for &s in row.iter() {
            tx_buf.put_i16_le(s);
        }
        if let Err(e) = ctx.socket.send_to(tx_buf, ctx.cfg.remote_addr.as_str()) {
            warn!("TX send failed: {}", e);
        }
        // Report the send as a completion through this thread's shard
        ctx.intake.send(ev);
    }
}

fn rx_row(cfg: &TxRxConfig, frame: u32, symbol: usize, ant: usize) -> usize {
    let slot = frame as usize % FRAME_WND;
    (slot * cfg.num_total_syms + symbol) * cfg.bs_ant_num + ant
}

fn dl_row(cfg: &TxRxConfig, frame: u32, dl_idx: usize, ant: usize) -> usize {
    let slot = frame as usize % FRAME_WND;
    (slot * cfg.num_dl_syms.max(1) + dl_idx) * cfg.bs_ant_num + ant
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader { frame: 1_234_567, symbol: 9, cell: 0, ant: 31 };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_BYTES);
        assert_eq!(PacketHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_too_short() {
        assert!(PacketHeader::parse(&[0u8; 8]).is_err());
    }
}
