//! Bounded Event Queues
//!
//! All inter-thread traffic rides on bounded lock-free queues. A full queue
//! is the pipeline's back-pressure mechanism: the producer spins until space
//! frees up, which stalls the master, which stops accepting RX work, which
//! pushes back on the NIC. Events are never dropped.
//!
//! `ArrayQueue` carries no per-producer tokens, so producers that need
//! contention-free intake (the socket threads) each get their own queue and
//! the master drains the shards round-robin.

use crate::event::Event;
use crossbeam_queue::ArrayQueue;
use std::hint;
use std::thread;

/// Spin this many times before yielding the core to the OS while waiting for
/// queue space. Steady-state contention resolves within a few iterations.
const SPINS_BEFORE_YIELD: usize = 64;

/// A bounded MPMC queue of [`Event`]s.
pub struct EventQueue {
    inner: ArrayQueue<Event>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: ArrayQueue::new(capacity) }
    }

    /// Enqueue, spinning with back-off until the queue has room. This is the
    /// only way events enter a queue: queue-full is back-pressure, not loss.
    pub fn send(&self, ev: Event) {
        let mut ev = ev;
        let mut spins = 0usize;
        loop {
            match self.inner.push(ev) {
                Ok(()) => return,
                Err(rejected) => {
                    ev = rejected;
                    spins += 1;
                    if spins % SPINS_BEFORE_YIELD == 0 {
                        thread::yield_now();
                    } else {
                        hint::spin_loop();
                    }
                }
            }
        }
    }

    /// Enqueue without blocking. Returns the event back on a full queue.
    pub fn try_send(&self, ev: Event) -> Result<(), Event> {
        self.inner.push(ev)
    }

    /// Bulk enqueue; spins per element as [`EventQueue::send`] does.
    pub fn send_bulk(&self, events: &[Event]) {
        for ev in events {
            self.send(*ev);
        }
    }

    /// Dequeue one event without blocking.
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.pop()
    }

    /// Dequeue up to `out.len()` events without blocking; returns the count.
    pub fn recv_bulk(&self, out: &mut [Event]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.inner.pop() {
                Some(ev) => {
                    out[n] = ev;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Tag};
    use std::sync::Arc;
    use std::time::Duration;

    fn rx_event(frame: u32) -> Event {
        Event::new(EventKind::RxPacket, Tag::frm_sym_ant(frame, 0, 0))
    }

    #[test]
    fn test_fifo_order() {
        let q = EventQueue::new(8);
        for f in 0..5 {
            q.try_send(rx_event(f)).unwrap();
        }
        for f in 0..5 {
            assert_eq!(q.try_recv().unwrap().tag(0).frame(), f);
        }
        assert!(q.try_recv().is_none());
    }

    #[test]
    fn test_bulk_ops() {
        let q = EventQueue::new(16);
        let events: Vec<Event> = (0..10).map(rx_event).collect();
        q.send_bulk(&events);

        let mut out = [Event::empty(EventKind::RxPacket); 16];
        let n = q.recv_bulk(&mut out);
        assert_eq!(n, 10);
        assert_eq!(out[9].tag(0).frame(), 9);
    }

    #[test]
    fn test_try_send_full() {
        let q = EventQueue::new(2);
        q.try_send(rx_event(0)).unwrap();
        q.try_send(rx_event(1)).unwrap();
        assert!(q.try_send(rx_event(2)).is_err());
    }

    /// A burst into a capacity-2 queue with a slow consumer loses nothing:
    /// the producer just stalls until the consumer catches up.
    #[test]
    fn test_backpressure_no_loss() {
        let q = Arc::new(EventQueue::new(2));
        let producer_q = q.clone();

        let producer = std::thread::spawn(move || {
            for f in 0..100 {
                producer_q.send(rx_event(f));
            }
        });

        let mut received = Vec::new();
        while received.len() < 100 {
            match q.try_recv() {
                Some(ev) => received.push(ev.tag(0).frame()),
                None => std::thread::sleep(Duration::from_micros(50)),
            }
        }
        producer.join().unwrap();

        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(received, expected);
    }
}
