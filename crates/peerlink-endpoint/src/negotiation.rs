//! Per-peer negotiation record.
//!
//! Everything the orchestrator knows about one remote id lives in a
//! single [`Negotiation`]: the connectivity object, the candidate queue,
//! the phase and the pending timer. Removing the record from the map
//! removes all of it at once, and a reconnection always builds a new
//! record, so candidates queued for an old attempt can never leak into
//! a new one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use peerlink_protocol::{IceCandidate, PeerId};

use crate::phase::{Input, Phase, Role};
use crate::scheduler::{TimerHandle, TimerReason};
use crate::{Connectivity, InvalidTransition};

/// Counter for record generations, unique for the process.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh generation stamp.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// CandidateQueue
// ---------------------------------------------------------------------------

/// Holds remote candidates until the remote description is accepted.
///
/// Before [`release`](Self::release): candidates are queued in arrival
/// order. `release` hands them all back exactly once; afterwards
/// [`admit`](Self::admit) passes candidates straight through.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    released: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate if it can be applied now, or queues it.
    pub fn admit(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.released {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Marks the remote description as accepted and drains the queue.
    pub fn release(&mut self) -> Vec<IceCandidate> {
        self.released = true;
        self.pending.drain(..).collect()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// What to do with an inbound offer for a peer that already has a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Glare, and we are impolite: drop the inbound offer, keep ours.
    Ignore,
    /// Discard our record and answer the inbound offer on a fresh one.
    /// Either glare with us polite, or the remote restarted.
    Replace,
}

/// One negotiation with one remote peer.
#[derive(Debug)]
pub struct Negotiation<C> {
    remote: PeerId,
    role: Role,
    generation: u64,
    phase: Phase,
    connectivity: C,
    candidates: CandidateQueue,
    timer: Option<TimerHandle>,
}

impl<C: Connectivity> Negotiation<C> {
    pub fn new(
        remote: PeerId,
        role: Role,
        generation: u64,
        connectivity: C,
        phase: Phase,
    ) -> Self {
        Self {
            remote,
            role,
            generation,
            phase,
            connectivity,
            candidates: CandidateQueue::new(),
            timer: None,
        }
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn connectivity(&self) -> &C {
        &self.connectivity
    }

    pub fn candidates_mut(&mut self) -> &mut CandidateQueue {
        &mut self.candidates
    }

    /// Advances the phase through the transition table.
    pub fn apply(&mut self, input: Input) -> Result<Phase, InvalidTransition> {
        let next = self.phase.apply(input)?;
        tracing::debug!(
            peer = %self.remote,
            generation = self.generation,
            from = %self.phase,
            to = %next,
            "phase transition"
        );
        self.phase = next;
        Ok(next)
    }

    /// Decides how an inbound offer is handled, given our phase and role.
    ///
    /// Reads the phase synchronously; the orchestrator acts on the result
    /// before processing anything else.
    pub fn offer_decision(&self) -> OfferDecision {
        if self.phase.is_offering() && self.role == Role::Impolite {
            OfferDecision::Ignore
        } else {
            OfferDecision::Replace
        }
    }

    /// Arms `timer`, replacing (and thereby cancelling) any previous one.
    pub fn set_timer(&mut self, timer: TimerHandle) {
        self.timer = Some(timer);
    }

    /// Cancels the pending timer, if any.
    pub fn cancel_timer(&mut self) {
        self.timer = None;
    }

    /// Cancels the pending timer only if it was armed for `reason`.
    pub fn cancel_timer_for(&mut self, reason: TimerReason) {
        if self.timer_reason() == Some(reason) {
            self.timer = None;
        }
    }

    pub fn timer_seq(&self) -> Option<u64> {
        self.timer.as_ref().map(TimerHandle::seq)
    }

    pub fn timer_reason(&self) -> Option<TimerReason> {
        self.timer.as_ref().map(TimerHandle::reason)
    }

    /// Tears the negotiation down: cancels the timer, drops queued
    /// candidates, closes the connectivity object.
    pub async fn close(&mut self) {
        self.timer = None;
        self.candidates = CandidateQueue::new();
        self.connectivity.close().await;
        if let Err(e) = self.apply(Input::Close) {
            tracing::debug!(error = %e, "close transition");
        }
    }
}
