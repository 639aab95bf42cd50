//! Seams between the engine and its environment
//!
//! The engine never talks to a radio or reads the wall clock directly. A
//! [`Transport`] hands frames to the radio, and a [`Clock`] supplies
//! monotonic milliseconds. Send completion travels the other way through
//! [`RadioHandle`](super::radio::RadioHandle).

use super::address::NodeAddress;
use super::packet::FRAME_SIZE;
use crate::error::TransportError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Connectionless, broadcast-capable radio link
///
/// `send` only starts a transmission. The outcome is reported later, from
/// the radio's callback context, via
/// [`RadioHandle::on_send_complete`](super::radio::RadioHandle::on_send_complete).
/// An `Err` means the frame never left and is treated as a failed send.
pub trait Transport {
    /// Start transmitting `frame` to `next_hop` (or to everyone in range
    /// when `next_hop` is the broadcast address)
    fn send(&mut self, next_hop: NodeAddress, frame: &[u8; FRAME_SIZE]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, next_hop: NodeAddress, frame: &[u8; FRAME_SIZE]) -> Result<(), TransportError> {
        (**self).send(next_hop, frame)
    }
}

/// Monotonic millisecond time source
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
}

/// Clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move time forward
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
