//! Pure acceptor state machine - no I/O, no async, no synchronization
//!
//! This module contains the core state transition logic for a Paxos acceptor.
//! Durable stores call [`SlotState::prepare`]/[`SlotState::accept`] between
//! their read and their write so the decision rule lives in exactly one place.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

use super::types::{AcceptResponse, PrepareResponse, ProposalId, SlotState};

/// Pure decision rules, shared with the persistent stores.
pub mod decision {
    use super::ProposalId;

    /// A prepare is promised iff it is strictly greater than the current promise.
    #[must_use]
    pub fn should_promise(proposal: &ProposalId, promised: Option<&ProposalId>) -> bool {
        promised.is_none_or(|p| proposal > p)
    }

    /// An accept is allowed iff no higher promise has been made since.
    #[must_use]
    pub fn should_accept(proposal: &ProposalId, promised: Option<&ProposalId>) -> bool {
        promised.is_none_or(|p| proposal >= p)
    }
}

impl<V: Clone> SlotState<V> {
    /// Handle a Prepare request - pure state transition.
    ///
    /// Returns the response and whether the state changed (and so must be
    /// persisted before the response is sent).
    pub fn prepare(&mut self, proposal: &ProposalId) -> (PrepareResponse<V>, bool) {
        if decision::should_promise(proposal, self.promised.as_ref()) {
            self.promised = Some(proposal.clone());
            let response = PrepareResponse::Promise {
                accepted: self.accepted.clone(),
            };
            (response, true)
        } else {
            let promised = self
                .promised
                .clone()
                .unwrap_or_else(|| proposal.clone());
            (PrepareResponse::Nack { promised }, false)
        }
    }

    /// Handle an Accept request - pure state transition.
    ///
    /// On success both `accepted` and `promised` move to `proposal`, which keeps
    /// `accepted <= promised` for every slot.
    pub fn accept(&mut self, proposal: &ProposalId, value: V) -> (AcceptResponse, bool) {
        if decision::should_accept(proposal, self.promised.as_ref()) {
            self.promised = Some(proposal.clone());
            self.accepted = Some((proposal.clone(), value));
            (AcceptResponse::Accepted, true)
        } else {
            let promised = self
                .promised
                .clone()
                .unwrap_or_else(|| proposal.clone());
            (AcceptResponse::Rejected { promised }, false)
        }
    }
}

/// In-memory acceptor state keyed by slot.
///
/// `R` is the slot key; multi-scope callers use a `(scope, sequence)` tuple so
/// that [`highest_accepted_in`](Self::highest_accepted_in) can range over one scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptorCore<R: Ord, V> {
    slots: BTreeMap<R, SlotState<V>>,
}

impl<R: Ord, V> Default for AcceptorCore<R, V> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }
}

impl<R, V> AcceptorCore<R, V>
where
    R: Ord + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state for a slot
    #[must_use]
    pub fn get(&self, slot: &R) -> SlotState<V> {
        self.slots.get(slot).cloned().unwrap_or_default()
    }

    /// Overwrite the state of a slot
    pub fn set(&mut self, slot: R, state: SlotState<V>) {
        self.slots.insert(slot, state);
    }

    pub fn prepare(&mut self, slot: R, proposal: &ProposalId) -> PrepareResponse<V> {
        self.slots.entry(slot).or_default().prepare(proposal).0
    }

    pub fn accept(&mut self, slot: R, proposal: &ProposalId, value: V) -> AcceptResponse {
        self.slots.entry(slot).or_default().accept(proposal, value).0
    }

    /// Get the highest slot within `range` that has an accepted value
    #[must_use]
    pub fn highest_accepted_in(&self, range: impl RangeBounds<R>) -> Option<&R> {
        self.slots
            .range(range)
            .rev()
            .find(|(_, state)| state.accepted.is_some())
            .map(|(slot, _)| slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(round: u64, proposer: &str) -> ProposalId {
        ProposalId::new(round, proposer)
    }

    #[test]
    fn test_ordering_breaks_ties_by_proposer() {
        assert!(pid(1, "b") > pid(1, "a"));
        assert!(pid(2, "a") > pid(1, "z"));
        assert_eq!(pid(3, "a"), pid(3, "a"));
    }

    #[test]
    fn test_prepare_empty() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        let result = core.prepare(1, &pid(1, "a"));
        assert_eq!(result, PrepareResponse::Promise { accepted: None });
        assert_eq!(core.get(&1).promised, Some(pid(1, "a")));
    }

    #[test]
    fn test_prepare_higher_succeeds() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(1, "a"));
        let result = core.prepare(1, &pid(2, "a"));
        assert_eq!(result, PrepareResponse::Promise { accepted: None });
        assert_eq!(core.get(&1).promised, Some(pid(2, "a")));
    }

    #[test]
    fn test_prepare_equal_is_nacked() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(1, "a"));
        let result = core.prepare(1, &pid(1, "a"));
        assert_eq!(
            result,
            PrepareResponse::Nack {
                promised: pid(1, "a")
            }
        );
    }

    #[test]
    fn test_prepare_lower_rejected() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(5, "b"));
        let result = core.prepare(1, &pid(4, "z"));
        assert_eq!(
            result,
            PrepareResponse::Nack {
                promised: pid(5, "b")
            }
        );
        // State unchanged
        assert_eq!(core.get(&1).promised, Some(pid(5, "b")));
    }

    #[test]
    fn test_promise_carries_prior_accepted() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(1, "a"));
        core.accept(1, &pid(1, "a"), "first".to_string());
        let result = core.prepare(1, &pid(2, "b"));
        assert_eq!(
            result,
            PrepareResponse::Promise {
                accepted: Some((pid(1, "a"), "first".to_string()))
            }
        );
    }

    #[test]
    fn test_accept_after_prepare() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(1, "a"));
        let result = core.accept(1, &pid(1, "a"), "hello".to_string());
        assert_eq!(result, AcceptResponse::Accepted);
        assert_eq!(
            core.get(&1).accepted,
            Some((pid(1, "a"), "hello".to_string()))
        );
    }

    #[test]
    fn test_accept_without_prepare_allowed() {
        // No higher promise exists, so the accept may proceed
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        let result = core.accept(1, &pid(1, "a"), "hello".to_string());
        assert_eq!(result, AcceptResponse::Accepted);
        assert_eq!(core.get(&1).promised, Some(pid(1, "a")));
    }

    #[test]
    fn test_accept_dominated_by_promise() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(2, "b"));
        let result = core.accept(1, &pid(1, "a"), "hello".to_string());
        assert_eq!(
            result,
            AcceptResponse::Rejected {
                promised: pid(2, "b")
            }
        );
        assert_eq!(core.get(&1).accepted, None);
    }

    #[test]
    fn test_accept_raises_promise() {
        let mut core: AcceptorCore<u64, String> = AcceptorCore::new();
        core.prepare(1, &pid(1, "a"));
        core.accept(1, &pid(3, "c"), "x".to_string());
        // A prepare between the old promise and the accepted id is now stale
        let result = core.prepare(1, &pid(2, "b"));
        assert!(matches!(result, PrepareResponse::Nack { .. }));
    }

    #[test]
    fn test_slots_are_independent() {
        let mut core: AcceptorCore<(u8, u64), String> = AcceptorCore::new();
        core.prepare((0, 1), &pid(9, "a"));
        let result = core.prepare((1, 1), &pid(1, "a"));
        assert_eq!(result, PrepareResponse::Promise { accepted: None });
    }

    #[test]
    fn test_highest_accepted_in_scope() {
        let mut core: AcceptorCore<(u8, u64), String> = AcceptorCore::new();
        core.accept((0, 3), &pid(1, "a"), "x".to_string());
        core.accept((0, 7), &pid(1, "a"), "y".to_string());
        core.prepare((0, 9), &pid(1, "a"));
        core.accept((1, 20), &pid(1, "a"), "z".to_string());

        assert_eq!(core.highest_accepted_in((0, 0)..=(0, u64::MAX)), Some(&(0, 7)));
        assert_eq!(
            core.highest_accepted_in((1, 0)..=(1, u64::MAX)),
            Some(&(1, 20))
        );
        assert_eq!(core.highest_accepted_in((2, 0)..=(2, u64::MAX)), None);
    }
}
