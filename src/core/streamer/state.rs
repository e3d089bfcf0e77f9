use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a carrier stream.
///
/// Transitions only move forward. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Connecting = 1,
    Active = 2,
    Draining = 3,
    Closed = 4,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Idle,
            1 => StreamState::Connecting,
            2 => StreamState::Active,
            3 => StreamState::Draining,
            _ => StreamState::Closed,
        }
    }

    /// Whether outbound sends are still delivered.
    pub fn accepts_sends(&self) -> bool {
        *self < StreamState::Draining
    }
}

/// Lock-free holder for a [`StreamState`].
#[derive(Debug)]
pub struct StreamStateCell(AtomicU8);

impl Default for StreamStateCell {
    fn default() -> Self {
        Self(AtomicU8::new(StreamState::Idle as u8))
    }
}

impl StreamStateCell {
    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns `true` when this call performed the transition.
    pub fn advance(&self, next: StreamState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= next as u8 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
