//! One-shot timers that post back into the orchestrator.
//!
//! A timer is a spawned sleep that, when it wakes, sends a
//! [`TimerFired`] carrying the peer, the record generation it was armed
//! for, and its own sequence number. The orchestrator compares all three
//! against the live record before acting, so a timer that fires after
//! its record was replaced or rescheduled does nothing.

use std::fmt;
use std::time::Duration;

use peerlink_protocol::PeerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Why a timer was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerReason {
    /// The link failed or the channel closed.
    Reconnect,
    /// The link went `disconnected` and may still recover.
    DisconnectGrace,
    /// An offer or answer has not produced an open channel.
    NegotiationTimeout,
}

impl fmt::Display for TimerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnect => write!(f, "reconnect"),
            Self::DisconnectGrace => write!(f, "disconnect-grace"),
            Self::NegotiationTimeout => write!(f, "negotiation-timeout"),
        }
    }
}

/// Posted to the orchestrator when a timer expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub remote: PeerId,
    pub generation: u64,
    pub seq: u64,
    pub reason: TimerReason,
}

/// An armed timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    seq: u64,
    reason: TimerReason,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn reason(&self) -> TimerReason {
        self.reason
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Arms timers for one orchestrator.
pub struct Scheduler {
    tx: mpsc::UnboundedSender<TimerFired>,
    next_seq: u64,
}

impl Scheduler {
    /// Creates a scheduler and the receiver its timers fire into.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, next_seq: 1 }, rx)
    }

    /// Arms a timer for `remote` at `generation`.
    pub fn schedule(
        &mut self,
        remote: PeerId,
        generation: u64,
        delay: Duration,
        reason: TimerReason,
    ) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired {
                remote,
                generation,
                seq,
                reason,
            });
        });

        TimerHandle { seq, reason, task }
    }
}
