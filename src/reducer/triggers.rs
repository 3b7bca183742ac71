//! Pure flush and backpressure predicates
//!
//! No I/O here. The consume loop asks these before every receive.

/// Whether enough messages accumulated to start a checkpoint flush
pub fn should_flush(pending: usize, checkpoint_interval: usize) -> bool {
    pending >= checkpoint_interval
}

/// Whether consumption must stop until the in-flight flush completes.
///
/// `in_flight` is the number of messages the running flush covers, `None`
/// when no flush is running. Messages consumed since the last completed
/// checkpoint are those plus the ones still pending.
pub fn must_wait_for_flush(in_flight: Option<usize>, pending: usize, threshold: usize) -> bool {
    in_flight.is_some_and(|covered| covered + pending >= threshold)
}

/// Whether the consume loop has seen every batch it was promised
pub fn is_drained(completed_batches: u64, expected_batches: u64) -> bool {
    completed_batches >= expected_batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_flush_at_interval() {
        assert!(!should_flush(99_999, 100_000));
        assert!(should_flush(100_000, 100_000));
        assert!(should_flush(100_001, 100_000));
    }

    #[test]
    fn test_backpressure_only_with_flush_in_flight() {
        assert!(!must_wait_for_flush(None, 500_000, 115_000));
        assert!(!must_wait_for_flush(Some(100_000), 14_999, 115_000));
        assert!(must_wait_for_flush(Some(100_000), 15_000, 115_000));
    }

    #[test]
    fn test_zero_expected_batches_is_drained() {
        assert!(is_drained(0, 0));
        assert!(!is_drained(1, 2));
        assert!(is_drained(2, 2));
    }
}
