//! Flash partition primitives and the scoped write session
//!
//! [`FlashService`] is the device collaborator: every primitive is atomic on
//! its own and the service owns the partition metadata. [`WriteSession`] owns
//! one open write context and aborts it on drop unless it was committed.

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::OtaError;
use crate::partition::{Partition, PartitionState};
use crate::pump::BlockSink;

/// Open write context on the inactive partition
#[derive(Debug, PartialEq, Eq)]
pub struct WriteHandle {
    /// Service-assigned handle id
    pub id: u64,
    /// Partition being written
    pub partition: Partition,
}

/// Flash partition primitives provided by the device
pub trait FlashService: Send + Sync {
    /// Open a write context on the next update partition
    fn begin_write(&self) -> Result<WriteHandle>;

    /// Append bytes to an open write context
    fn write(&self, handle: &WriteHandle, data: &[u8]) -> Result<()>;

    /// Close a write context after the last byte; consumes the context
    /// whether or not it succeeds
    fn end_write(&self, handle: &WriteHandle) -> Result<()>;

    /// Discard a write context without touching the boot target
    fn abort_write(&self, handle: &WriteHandle) -> Result<()>;

    /// Select the partition to boot next
    fn set_boot_partition(&self, partition: Partition) -> Result<()>;

    /// Validation state of the running partition
    fn running_partition_state(&self) -> Result<PartitionState>;

    /// Confirm the running image
    fn mark_valid(&self) -> Result<()>;

    /// Mark the running image bad and revert the boot target. On hardware
    /// this normally reboots and does not return.
    fn mark_invalid_and_rollback(&self) -> Result<()>;

    /// Restart the device
    fn restart(&self) -> Result<()>;
}

/// Result of a committed write session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    /// Partition now selected for boot
    pub partition: Partition,
    /// Bytes written
    pub bytes_written: u64,
    /// Hex SHA-256 of the written image
    pub sha256: String,
}

/// Scoped ownership of one flash write context.
///
/// Dropping the session without [`commit`](Self::commit) aborts the write,
/// so every failure path leaves the boot target untouched.
pub struct WriteSession<'a> {
    flash: &'a dyn FlashService,
    handle: Option<WriteHandle>,
    hasher: Sha256,
    bytes_written: u64,
}

impl<'a> WriteSession<'a> {
    /// Open a write context
    pub fn begin(flash: &'a dyn FlashService) -> Result<Self, OtaError> {
        let handle = flash
            .begin_write()
            .map_err(|e| OtaError::Flash(format!("begin write failed: {e:#}")))?;
        info!(partition = %handle.partition, handle = handle.id, "Flash write session opened");
        Ok(Self {
            flash,
            handle: Some(handle),
            hasher: Sha256::new(),
            bytes_written: 0,
        })
    }

    /// Partition being written
    pub fn partition(&self) -> Option<Partition> {
        self.handle.as_ref().map(|h| h.partition)
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write bytes and fold them into the image hash
    pub fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| OtaError::Flash("write session already closed".to_string()))?;
        self.flash
            .write(handle, data)
            .map_err(|e| OtaError::Flash(format!("write failed: {e:#}")))?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// End the write and select the written partition for the next boot
    pub fn commit(mut self) -> Result<WriteSummary, OtaError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| OtaError::Flash("write session already closed".to_string()))?;

        self.flash.end_write(&handle).map_err(|e| {
            error!(partition = %handle.partition, "End write failed: {e:#}");
            OtaError::Flash(format!("end write failed: {e:#}"))
        })?;
        self.flash.set_boot_partition(handle.partition).map_err(|e| {
            error!(partition = %handle.partition, "Set boot partition failed: {e:#}");
            OtaError::Flash(format!("set boot partition failed: {e:#}"))
        })?;

        let hasher = std::mem::take(&mut self.hasher);
        let summary = WriteSummary {
            partition: handle.partition,
            bytes_written: self.bytes_written,
            sha256: hex::encode(hasher.finalize()),
        };
        info!(
            partition = %summary.partition,
            bytes = summary.bytes_written,
            sha256 = %summary.sha256,
            "Boot partition updated"
        );
        Ok(summary)
    }
}

impl BlockSink for WriteSession<'_> {
    fn write_block(&mut self, data: &[u8]) -> Result<(), OtaError> {
        self.write(data)
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(
                partition = %handle.partition,
                bytes = self.bytes_written,
                "Aborting uncommitted flash write"
            );
            if let Err(e) = self.flash.abort_write(&handle) {
                error!("Abort write failed: {e:#}");
            } else {
                debug!(handle = handle.id, "Flash write aborted");
            }
        }
    }
}

impl std::fmt::Debug for WriteSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSession")
            .field("handle", &self.handle)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFlash {
        log: Mutex<Vec<String>>,
        fail_end: bool,
    }

    impl RecordingFlash {
        fn push(&self, entry: impl Into<String>) {
            if let Ok(mut log) = self.log.lock() {
                log.push(entry.into());
            }
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().map(|l| l.clone()).unwrap_or_default()
        }
    }

    impl FlashService for RecordingFlash {
        fn begin_write(&self) -> Result<WriteHandle> {
            self.push("begin");
            Ok(WriteHandle {
                id: 1,
                partition: Partition::B,
            })
        }
        fn write(&self, _handle: &WriteHandle, data: &[u8]) -> Result<()> {
            self.push(format!("write {}", data.len()));
            Ok(())
        }
        fn end_write(&self, _handle: &WriteHandle) -> Result<()> {
            self.push("end");
            if self.fail_end {
                anyhow::bail!("image validation failed");
            }
            Ok(())
        }
        fn abort_write(&self, _handle: &WriteHandle) -> Result<()> {
            self.push("abort");
            Ok(())
        }
        fn set_boot_partition(&self, partition: Partition) -> Result<()> {
            self.push(format!("boot {partition}"));
            Ok(())
        }
        fn running_partition_state(&self) -> Result<PartitionState> {
            Ok(PartitionState::Valid)
        }
        fn mark_valid(&self) -> Result<()> {
            Ok(())
        }
        fn mark_invalid_and_rollback(&self) -> Result<()> {
            Ok(())
        }
        fn restart(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_commit_sets_boot_partition() -> Result<(), OtaError> {
        let flash = RecordingFlash::default();
        let mut session = WriteSession::begin(&flash)?;
        session.write(b"abc")?;
        let summary = session.commit()?;

        assert_eq!(summary.partition, Partition::B);
        assert_eq!(summary.bytes_written, 3);
        assert_eq!(
            summary.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(flash.entries(), vec!["begin", "write 3", "end", "boot B"]);
        Ok(())
    }

    #[test]
    fn test_drop_aborts_uncommitted() -> Result<(), OtaError> {
        let flash = RecordingFlash::default();
        {
            let mut session = WriteSession::begin(&flash)?;
            session.write(b"abc")?;
        }
        assert_eq!(flash.entries(), vec!["begin", "write 3", "abort"]);
        Ok(())
    }

    #[test]
    fn test_failed_end_does_not_set_boot() -> Result<(), OtaError> {
        let flash = RecordingFlash {
            fail_end: true,
            ..Default::default()
        };
        let session = WriteSession::begin(&flash)?;
        let result = session.commit();
        assert!(matches!(result, Err(OtaError::Flash(_))));
        assert_eq!(flash.entries(), vec!["begin", "end"]);
        Ok(())
    }
}
