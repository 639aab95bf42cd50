//! Retry state machine for the head of the outgoing queue
//!
//! ```text
//!            mark_sent             latch / timeout
//!   Idle ───────────────► Sent ───────────────────► Idle
//!                                  │
//!                                  ├─ Confirmed ─► record_success   (attempts = 1)
//!                                  └─ Failed ────► record_failure
//!                                                   ├─ attempts < max: Retry
//!                                                   └─ otherwise:      Exhausted (attempts = 1)
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    /// Nothing outstanding
    Idle,
    /// Frame handed to the transport at `at` (ms)
    Sent { at: u64 },
}

/// Final outcome of one transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Next hop acknowledged the frame
    Confirmed,
    /// Next hop did not acknowledge; `timed_out` if the transport never
    /// reported at all
    Failed { timed_out: bool },
}

/// What to do with a frame after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the frame at the head; `attempt` is the number of the next try
    Retry { attempt: u32 },
    /// Give up after `attempts` tries
    Exhausted { attempts: u32 },
}

/// Tracks the outstanding send and the shared attempt counter
#[derive(Debug)]
pub struct TransmissionTracker {
    state: TxState,
    attempts: u32,
    result_timeout_ms: u64,
}

impl TransmissionTracker {
    pub fn new(result_timeout_ms: u64) -> Self {
        Self {
            state: TxState::Idle,
            attempts: 1,
            result_timeout_ms,
        }
    }

    /// Check if no send is outstanding
    pub fn is_idle(&self) -> bool {
        self.state == TxState::Idle
    }

    /// Attempt number of the current head frame (starts at 1)
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Takes effect at the next poll, including for a send already outstanding
    pub fn set_result_timeout(&mut self, ms: u64) {
        self.result_timeout_ms = ms;
    }

    /// Record a frame handed to the transport
    pub fn mark_sent(&mut self, now: u64) {
        self.state = TxState::Sent { at: now };
    }

    /// Combine the latched transport report with the clock.
    ///
    /// Returns an outcome once per send, then the tracker is idle again. A
    /// report latched while idle is stale and ignored.
    pub fn poll(&mut self, latched: Option<bool>, now: u64) -> Option<SendOutcome> {
        let TxState::Sent { at } = self.state else {
            return None;
        };

        let outcome = match latched {
            Some(true) => SendOutcome::Confirmed,
            Some(false) => SendOutcome::Failed { timed_out: false },
            None if now.saturating_sub(at) >= self.result_timeout_ms => {
                SendOutcome::Failed { timed_out: true }
            }
            None => return None,
        };
        self.state = TxState::Idle;
        Some(outcome)
    }

    /// Head frame delivered to its next hop
    pub fn record_success(&mut self) {
        self.attempts = 1;
    }

    /// Head frame failed; decide between retry and escalation
    pub fn record_failure(&mut self, max_attempts: u32) -> RetryDecision {
        if self.attempts < max_attempts {
            self.attempts += 1;
            RetryDecision::Retry {
                attempt: self.attempts,
            }
        } else {
            let attempts = self.attempts;
            self.attempts = 1;
            RetryDecision::Exhausted { attempts }
        }
    }
}
