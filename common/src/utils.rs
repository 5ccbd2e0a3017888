//! Thread and Timing Utilities

use crate::types::ThreadRole;
use std::time::Instant;
use tracing::{debug, warn};

/// Pin the calling thread to core `offset + index`. Logs and continues if
/// the machine has fewer cores than the configuration assumes; the pipeline
/// still runs, just without the cache locality pinning buys.
pub fn pin_to_core(role: ThreadRole, offset: usize, index: usize) {
    let target = offset + index;
    match core_affinity::get_core_ids() {
        Some(cores) if target < cores.len() => {
            if core_affinity::set_for_current(cores[target]) {
                debug!("{} thread {} pinned to core {}", role.name(), index, target);
            } else {
                warn!("{} thread {}: failed to pin to core {}", role.name(), index, target);
            }
        }
        Some(cores) => {
            warn!(
                "{} thread {}: core {} out of range ({} cores available), not pinning",
                role.name(),
                index,
                target,
                cores.len()
            );
        }
        None => warn!("core enumeration unavailable, not pinning"),
    }
}

/// Milliseconds elapsed between two instants, as f64 for log formatting.
pub fn delta_ms(from: Instant, to: Instant) -> f64 {
    to.duration_since(from).as_secs_f64() * 1e3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_delta_ms() {
        let a = Instant::now();
        let b = a + Duration::from_millis(250);
        let ms = delta_ms(a, b);
        assert!((ms - 250.0).abs() < 1.0);
    }
}
