//! A/B partition identifiers and boot validation states

use serde::{Deserialize, Serialize};

/// Firmware partition identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    /// Partition A
    A,
    /// Partition B
    B,
}

impl Partition {
    /// Get the other partition
    pub fn other(self) -> Self {
        match self {
            Partition::A => Partition::B,
            Partition::B => Partition::A,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::A => write!(f, "A"),
            Partition::B => write!(f, "B"),
        }
    }
}

/// Validation state of the running partition, as kept by the flash service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PartitionState {
    /// Freshly flashed image booted but not yet confirmed
    PendingVerify,

    /// Image confirmed good
    Valid,

    /// Image marked bad
    Invalid,

    /// Metadata could not be read
    #[default]
    Unknown,
}

impl PartitionState {
    /// Whether the image still awaits confirmation
    pub fn is_pending(&self) -> bool {
        matches!(self, PartitionState::PendingVerify)
    }

    /// Upper-case label used in status reports
    pub fn label(&self) -> &'static str {
        match self {
            PartitionState::PendingVerify => "PENDING_VERIFY",
            PartitionState::Valid => "VALID",
            PartitionState::Invalid => "INVALID",
            PartitionState::Unknown => "UNKNOWN",
        }
    }

    /// Human readable status line, `None` when the state is unknown
    pub fn status_message(&self) -> Option<String> {
        match self {
            PartitionState::Unknown => None,
            known => Some(format!("OTA: Image is {}", known.label())),
        }
    }
}

impl std::fmt::Display for PartitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_other() {
        assert_eq!(Partition::A.other(), Partition::B);
        assert_eq!(Partition::B.other(), Partition::A);
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(format!("{}", Partition::A), "A");
        assert_eq!(format!("{}", Partition::B), "B");
    }

    #[test]
    fn test_state_status_message() {
        assert_eq!(
            PartitionState::PendingVerify.status_message().as_deref(),
            Some("OTA: Image is PENDING_VERIFY")
        );
        assert_eq!(
            PartitionState::Valid.status_message().as_deref(),
            Some("OTA: Image is VALID")
        );
        assert_eq!(
            PartitionState::Invalid.status_message().as_deref(),
            Some("OTA: Image is INVALID")
        );
        assert_eq!(PartitionState::Unknown.status_message(), None);
    }

    #[test]
    fn test_state_default_is_unknown() {
        assert_eq!(PartitionState::default(), PartitionState::Unknown);
        assert!(PartitionState::PendingVerify.is_pending());
        assert!(!PartitionState::Valid.is_pending());
    }
}
