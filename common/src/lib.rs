//! Common Types and Primitives
//!
//! Shared leaf crate for the Halcyon base station: the event/tag codec,
//! bounded event queues, cache-aligned sample storage, and thread utilities.

pub mod buffers;
pub mod event;
pub mod queues;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use buffers::{AlignedVec, SharedSlab};
pub use event::{Event, EventKind, Tag, MAX_TAGS_PER_EVENT};
pub use queues::EventQueue;
pub use types::{FRAME_WND, SCHEDULE_QUEUES};
