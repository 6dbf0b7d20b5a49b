//! Client sync session state machine and inbox cursor.
//!
//! Every (re)connect walks Disconnected → Connecting → CatchingUp → Live.
//! CatchingUp is entered on every connect; the transition to Live happens
//! only after missed-event replay completes and is acknowledged. Events
//! arriving live while CatchingUp are buffered and flushed afterwards,
//! never interleaved with the replay.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, ErrorCode, EventEnvelope, Sequence};

/// Phase of one connection's sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Disconnected,
    Connecting,
    CatchingUp,
    Live,
}

/// Per-connection sync session.
///
/// Owned by the connection task; not shared, so no locking.
#[derive(Debug)]
pub struct SyncSession {
    phase: SyncPhase,
    /// Live events held back while catch-up replay is in flight.
    buffered: VecDeque<EventEnvelope>,
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Disconnected,
            buffered: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Disconnected → Connecting, at handshake.
    pub fn begin_connect(&mut self) -> Result<(), DomainError> {
        self.transition(SyncPhase::Disconnected, SyncPhase::Connecting)
    }

    /// Connecting → CatchingUp, once the connection is registered.
    pub fn begin_catch_up(&mut self) -> Result<(), DomainError> {
        self.transition(SyncPhase::Connecting, SyncPhase::CatchingUp)
    }

    /// Holds back a live event during catch-up.
    ///
    /// In Live phase the caller forwards directly; buffering then is a
    /// programming error.
    pub fn buffer_live(&mut self, event: EventEnvelope) -> Result<(), DomainError> {
        if self.phase != SyncPhase::CatchingUp {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("cannot buffer live events in phase {:?}", self.phase),
            ));
        }
        self.buffered.push_back(event);
        Ok(())
    }

    /// CatchingUp → Live, after the client acknowledged the replay.
    ///
    /// Returns the buffered live events that still need forwarding:
    /// ascending in sequence, with everything at or below the replay
    /// high-water mark dropped (the replay already delivered those).
    pub fn complete_catch_up(
        &mut self,
        replayed_up_to: Sequence,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        self.transition(SyncPhase::CatchingUp, SyncPhase::Live)?;

        let mut pending: Vec<EventEnvelope> = self
            .buffered
            .drain(..)
            .filter(|e| e.sequence > replayed_up_to)
            .collect();
        pending.sort_by_key(|e| e.sequence);
        pending.dedup_by_key(|e| e.sequence);
        Ok(pending)
    }

    /// Any phase → Disconnected. Buffered events are dropped; the cursor
    /// makes the next catch-up cover them.
    pub fn disconnect(&mut self) {
        self.phase = SyncPhase::Disconnected;
        self.buffered.clear();
    }

    fn transition(&mut self, from: SyncPhase, to: SyncPhase) -> Result<(), DomainError> {
        if self.phase != from {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("expected phase {:?}, was {:?}", from, self.phase),
            ));
        }
        self.phase = to;
        Ok(())
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user replay cursor.
///
/// `last_acked_seq` only moves forward; `degraded` forces a full resync at
/// the next connect instead of incremental replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxCursor {
    pub last_acked_seq: Sequence,
    pub degraded: bool,
}

impl InboxCursor {
    pub fn new() -> Self {
        Self {
            last_acked_seq: Sequence::ZERO,
            degraded: false,
        }
    }

    /// Advances the cursor; stale acknowledgements are ignored.
    /// Returns true if the cursor moved.
    pub fn advance(&mut self, seq: Sequence) -> bool {
        if seq > self.last_acked_seq {
            self.last_acked_seq = seq;
            true
        } else {
            false
        }
    }

    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    /// Clears the degraded flag after the client completed a full resync
    /// at the given sequence.
    pub fn mark_resynced(&mut self, seq: Sequence) {
        self.degraded = false;
        self.advance(seq);
    }
}

impl Default for InboxCursor {
    fn default() -> Self {
        Self::new()
    }
}
