//! Event and Tag Codec
//!
//! Every message between the master scheduler, the workers, and the I/O
//! threads is a fixed-size [`Event`]: a kind plus a short inline array of
//! packed 64-bit coordinate words ([`Tag`]). Tags carry
//! `(frame, symbol, index)` where the index is an antenna, subcarrier,
//! codeblock or user id depending on the stage that consumes the event; the
//! bit layout is identical for all four interpretations.

/// Maximum number of tags one event can carry.
pub const MAX_TAGS_PER_EVENT: usize = 16;

const SYMBOL_SHIFT: u32 = 32;
const INDEX_SHIFT: u32 = 48;

/// Kinds of events flowing through the pipeline queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A received sample packet (I/O thread -> master).
    RxPacket,
    /// FFT of one antenna's symbol.
    Fft,
    /// Zero-forcing matrix computation for a subcarrier batch.
    Zf,
    /// Equalization + demapping for a subcarrier block.
    Demul,
    /// Channel decoding of a codeblock.
    Decode,
    /// Channel encoding of a codeblock.
    Encode,
    /// Downlink precoding for a subcarrier block.
    Precode,
    /// Inverse FFT of one antenna's downlink symbol.
    Ifft,
    /// Transmission of one antenna's samples (master -> I/O thread).
    PacketTx,
    /// Decoded uplink data for one user (master -> MAC).
    PacketToMac,
    /// Downlink bits available for a frame (MAC -> master).
    PacketFromMac,
    /// Per-user SNR measurement (master -> MAC).
    SnrReport,
    /// Runtime RAN reconfiguration (modulation order update).
    RanUpdate,
}

/// A packed 64-bit pipeline coordinate.
///
/// Layout: bits 0..32 frame, 32..48 symbol, 48..64 index. The 32-bit frame
/// field leaves ample headroom above the 2^20 frames a long soak run
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(pub u64);

impl Tag {
    /// `(frame, symbol, antenna)` - consumed by FFT/IFFT/TX stages.
    pub fn frm_sym_ant(frame: u32, symbol: usize, ant: usize) -> Self {
        Self::pack(frame, symbol, ant)
    }

    /// `(frame, symbol, subcarrier)` - consumed by ZF/Demul/Precode stages.
    pub fn frm_sym_sc(frame: u32, symbol: usize, sc: usize) -> Self {
        Self::pack(frame, symbol, sc)
    }

    /// `(frame, symbol, codeblock)` - consumed by Encode/Decode stages.
    pub fn frm_sym_cb(frame: u32, symbol: usize, cb: usize) -> Self {
        Self::pack(frame, symbol, cb)
    }

    /// `(frame, symbol, user)` - consumed by MAC-facing stages.
    pub fn frm_sym_ue(frame: u32, symbol: usize, ue: usize) -> Self {
        Self::pack(frame, symbol, ue)
    }

    fn pack(frame: u32, symbol: usize, index: usize) -> Self {
        debug_assert!(symbol < (1 << 16));
        debug_assert!(index < (1 << 16));
        Tag((frame as u64)
            | ((symbol as u64) << SYMBOL_SHIFT)
            | ((index as u64) << INDEX_SHIFT))
    }

    pub fn frame(&self) -> u32 {
        self.0 as u32
    }

    pub fn symbol(&self) -> usize {
        ((self.0 >> SYMBOL_SHIFT) & 0xFFFF) as usize
    }

    fn index(&self) -> usize {
        (self.0 >> INDEX_SHIFT) as usize
    }

    pub fn ant_id(&self) -> usize {
        self.index()
    }

    pub fn sc_id(&self) -> usize {
        self.index()
    }

    pub fn cb_id(&self) -> usize {
        self.index()
    }

    pub fn ue_id(&self) -> usize {
        self.index()
    }
}

/// A fixed-size pipeline message: one kind, up to [`MAX_TAGS_PER_EVENT`]
/// coordinate words. Copied by value through the queues.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub num_tags: usize,
    pub tags: [u64; MAX_TAGS_PER_EVENT],
}

impl Event {
    /// An event carrying a single tag.
    pub fn new(kind: EventKind, tag: Tag) -> Self {
        let mut tags = [0u64; MAX_TAGS_PER_EVENT];
        tags[0] = tag.0;
        Self { kind, num_tags: 1, tags }
    }

    /// An event with no tags yet; fill with [`Event::push_tag`].
    pub fn empty(kind: EventKind) -> Self {
        Self { kind, num_tags: 0, tags: [0u64; MAX_TAGS_PER_EVENT] }
    }

    pub fn push_tag(&mut self, tag: Tag) {
        assert!(self.num_tags < MAX_TAGS_PER_EVENT, "event tag overflow");
        self.tags[self.num_tags] = tag.0;
        self.num_tags += 1;
    }

    pub fn tag(&self, i: usize) -> Tag {
        debug_assert!(i < self.num_tags);
        Tag(self.tags[i])
    }

    /// SNR report for one user: the measurement rides in the second tag word.
    pub fn snr_report(frame: u32, symbol: usize, ue: usize, snr_db: f32) -> Self {
        let mut ev = Event::new(EventKind::SnrReport, Tag::frm_sym_ue(frame, symbol, ue));
        ev.tags[1] = f32::to_bits(snr_db) as u64;
        ev.num_tags = 2;
        ev
    }

    /// The SNR value of a [`EventKind::SnrReport`] event.
    pub fn snr_db(&self) -> f32 {
        debug_assert_eq!(self.kind, EventKind::SnrReport);
        f32::from_bits(self.tags[1] as u32)
    }

    /// RAN reconfiguration: raw parameters in the first three tag words.
    pub fn ran_update(n_antennas: u64, mod_order_bits: u64, frame: u64) -> Self {
        let mut ev = Event::empty(EventKind::RanUpdate);
        ev.tags[0] = n_antennas;
        ev.tags[1] = mod_order_bits;
        ev.tags[2] = frame;
        ev.num_tags = 3;
        ev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        let tag = Tag::frm_sym_ant(7, 12, 3);
        assert_eq!(tag.frame(), 7);
        assert_eq!(tag.symbol(), 12);
        assert_eq!(tag.ant_id(), 3);

        // All four interpretations share one layout
        let tag = Tag::frm_sym_sc(7, 12, 3);
        assert_eq!(tag.sc_id(), 3);
        assert_eq!(Tag::frm_sym_cb(7, 12, 3), tag);
        assert_eq!(Tag::frm_sym_ue(7, 12, 3), tag);
    }

    #[test]
    fn test_large_frame_id() {
        let tag = Tag::frm_sym_sc(3_000_000, 65_535, 65_535);
        assert_eq!(tag.frame(), 3_000_000);
        assert_eq!(tag.symbol(), 65_535);
        assert_eq!(tag.sc_id(), 65_535);
    }

    #[test]
    fn test_event_tags() {
        let mut ev = Event::empty(EventKind::Fft);
        for ant in 0..4 {
            ev.push_tag(Tag::frm_sym_ant(1, 2, ant));
        }
        assert_eq!(ev.num_tags, 4);
        assert_eq!(ev.tag(3).ant_id(), 3);
    }

    #[test]
    fn test_snr_report() {
        let ev = Event::snr_report(5, 0, 1, 23.5);
        assert_eq!(ev.tag(0).frame(), 5);
        assert_eq!(ev.tag(0).ue_id(), 1);
        assert_eq!(ev.snr_db(), 23.5);
    }
}
