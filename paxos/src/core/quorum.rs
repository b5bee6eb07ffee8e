//! Quorum arithmetic shared by the proposer core and the driver.

/// Majority size for `num_acceptors`: `⌊N/2⌋ + 1`.
///
/// Any two sets of this size intersect, which is what Paxos safety rests on.
#[must_use]
pub fn majority(num_acceptors: usize) -> usize {
    num_acceptors / 2 + 1
}
