// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay status

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug)]
pub(super) struct AtomicRelayStatus {
    value: AtomicU8,
}

impl Default for AtomicRelayStatus {
    fn default() -> Self {
        Self::new(RelayStatus::Initialized)
    }
}

impl AtomicRelayStatus {
    #[inline]
    pub(super) fn new(status: RelayStatus) -> Self {
        Self {
            value: AtomicU8::new(status as u8),
        }
    }

    /// Store the new status and return the previous one.
    ///
    /// A terminated status is final.
    pub(super) fn set(&self, status: RelayStatus) -> RelayStatus {
        let mut current: u8 = self.value.load(Ordering::SeqCst);
        loop {
            if current == RelayStatus::Terminated as u8 {
                return RelayStatus::Terminated;
            }

            match self.value.compare_exchange(
                current,
                status as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(prev) => return RelayStatus::from_u8(prev),
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    pub(super) fn load(&self) -> RelayStatus {
        RelayStatus::from_u8(self.value.load(Ordering::SeqCst))
    }
}

/// Relay connection status
///
/// `Connecting -> Connected -> (Disconnected -> Connecting)*`. Frames bypass the outbound
/// queue only while [`RelayStatus::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelayStatus {
    /// Created, the connection task hasn't started yet
    Initialized = 0,
    /// Opening the socket
    Connecting = 1,
    /// Socket open
    Connected = 2,
    /// Socket closed, a new attempt is scheduled
    Disconnected = 3,
    /// Shut down, no retry will occur
    Terminated = 4,
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "Initialized"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

impl RelayStatus {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Initialized,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            _ => Self::Terminated,
        }
    }

    /// Check if is [`RelayStatus::Connected`]
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if is [`RelayStatus::Disconnected`] or [`RelayStatus::Terminated`]
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Terminated)
    }

    /// Check if is [`RelayStatus::Terminated`]
    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_is_sticky() {
        let status = AtomicRelayStatus::default();
        assert_eq!(status.set(RelayStatus::Connecting), RelayStatus::Initialized);
        assert_eq!(status.set(RelayStatus::Terminated), RelayStatus::Connecting);

        // Late updates from the connection task are ignored
        status.set(RelayStatus::Disconnected);
        assert_eq!(status.load(), RelayStatus::Terminated);
    }
}
