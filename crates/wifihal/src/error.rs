//! Error types for HAL control-plane operations.

use std::io;

/// Result type for HAL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during HAL operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Generic netlink family not found.
    #[error("generic netlink family not found: {name}")]
    FamilyNotFound {
        /// The family name that was not found.
        name: String,
    },

    /// All request ids in the bounded id space are in flight.
    #[error("request id space exhausted: all {capacity} ids in flight")]
    ExhaustedRequestIds {
        /// Size of the id space that was exhausted.
        capacity: usize,
    },

    /// Write addressed to a ring buffer name that is not configured.
    #[error("unknown ring buffer: {name}")]
    UnknownRingBuffer {
        /// The ring name that did not match any slot.
        name: String,
    },

    /// A single log record exceeds the ring buffer's total capacity.
    #[error("record of {size} bytes does not fit ring '{ring}' ({capacity} bytes)")]
    RecordTooLarge {
        /// The ring the write was addressed to.
        ring: String,
        /// Size of the rejected record.
        size: usize,
        /// Total capacity of the ring.
        capacity: usize,
    },

    /// Interface handle or name did not resolve.
    #[error("interface not found: {name}")]
    InterfaceNotFound {
        /// The interface name (or stringified handle) that was not found.
        name: String,
    },
}

impl Error {
    /// Create a kernel error from an errno value.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV, etc.).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, libc::ENOENT | libc::ENODEV),
            Self::FamilyNotFound { .. } | Self::InterfaceNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, libc::EPERM | libc::EACCES),
            _ => false,
        }
    }

    /// Check if this is a capacity failure (id space, ring record).
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::ExhaustedRequestIds { .. } | Self::RecordTooLarge { .. }
        )
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        let err = Error::from_errno(-libc::EPERM);
        assert!(err.is_permission_denied());
        assert_eq!(err.errno(), Some(libc::EPERM));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::from_errno(-libc::ENOENT).is_not_found());
        assert!(Error::from_errno(-libc::ENODEV).is_not_found());
        assert!(
            Error::InterfaceNotFound {
                name: "wlan0".into()
            }
            .is_not_found()
        );
        assert!(
            Error::FamilyNotFound {
                name: "nl80211".into()
            }
            .is_not_found()
        );
        assert!(!Error::from_errno(-libc::EPERM).is_not_found());
    }

    #[test]
    fn test_is_capacity() {
        assert!(Error::ExhaustedRequestIds { capacity: 1000 }.is_capacity());
        assert!(
            Error::RecordTooLarge {
                ring: "pkt_stats_rb".into(),
                size: 8192,
                capacity: 4096,
            }
            .is_capacity()
        );
        assert!(!Error::from_errno(-libc::ENOENT).is_capacity());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::UnknownRingBuffer {
            name: "bogus_rb".into(),
        };
        assert_eq!(err.to_string(), "unknown ring buffer: bogus_rb");

        let err = Error::ExhaustedRequestIds { capacity: 1000 };
        assert_eq!(
            err.to_string(),
            "request id space exhausted: all 1000 ids in flight"
        );

        let err = Error::InterfaceNotFound {
            name: "wlan1".into(),
        };
        assert_eq!(err.to_string(), "interface not found: wlan1");
    }
}
