//! Publish sequence numbers.
//!
//! A single coordinator thread owns the counter and hands values out over a
//! rendezvous channel, so issuance is totally ordered without callers
//! taking a lock. Values are produced only when someone asks for one.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread;

/// Upper bound of the sequence range. Never emitted itself.
pub const MAX_SEQUENCE: u16 = 65535;

/// Cycling source of publish sequence numbers in `1..MAX_SEQUENCE`.
#[derive(Clone)]
pub struct SequenceGenerator {
    receiver: Receiver<u16>,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::with_max(MAX_SEQUENCE)
    }

    /// Generator wrapping back to 1 when `max` would be reached.
    pub fn with_max(max: u16) -> Self {
        assert!(max > 1, "sequence range must hold at least one value");
        let (sender, receiver) = bounded(0);
        thread::Builder::new()
            .name("pubwire-sequence".to_string())
            .spawn(move || run_coordinator(max, sender))
            .expect("failed to spawn sequence coordinator");
        Self { receiver }
    }

    /// Next sequence value. Safe to call from any number of threads.
    pub fn next(&self) -> u16 {
        // The coordinator only exits once every receiver is gone, and we
        // hold one.
        self.receiver
            .recv()
            .expect("sequence coordinator terminated")
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequenceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceGenerator").finish_non_exhaustive()
    }
}

fn run_coordinator(max: u16, sender: Sender<u16>) {
    let mut value: u16 = 1;
    // Exits when all generators (receivers) have been dropped.
    while sender.send(value).is_ok() {
        value += 1;
        if value == max {
            value = 1;
        }
    }
    tracing::debug!("sequence coordinator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one_and_increments() {
        let seq = SequenceGenerator::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.next(), 3);
    }

    #[test]
    fn test_full_cycle_never_emits_max() {
        let seq = SequenceGenerator::new();
        let mut last = 0;
        for i in 1..MAX_SEQUENCE {
            last = seq.next();
            assert_eq!(last, i);
        }
        assert_eq!(last, MAX_SEQUENCE - 1);
        // Call number 65535 wraps.
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn test_small_range_wraps() {
        let seq = SequenceGenerator::with_max(4);
        let values: Vec<u16> = (0..7).map(|_| seq.next()).collect();
        assert_eq!(values, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_concurrent_callers_get_distinct_values() {
        let seq = Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || (0..1000).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate sequence value {value}");
            }
        }
        assert_eq!(seen.len(), 8000);
        // No gaps under contention.
        assert_eq!(*seen.iter().max().unwrap(), 8000);
    }

    #[test]
    fn test_cloned_generators_share_counter() {
        let a = SequenceGenerator::new();
        let b = a.clone();
        assert_eq!(a.next(), 1);
        assert_eq!(b.next(), 2);
    }
}
