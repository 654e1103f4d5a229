//! Update attempt state machine
//!
//! One attempt runs on its own tokio task:
//!
//! ```text
//! Idle -> Scanning -> Downloading -> Writing -> Finalizing -> RebootPending
//!                                                          \-> Failed
//! ```
//!
//! At most one attempt is in flight; further launches are dropped, never
//! queued. Every failure path leaves the boot target untouched because the
//! write context is only committed after the last block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OtaConfig;
use crate::device::DeviceIdentity;
use crate::error::OtaError;
use crate::flash::{FlashService, WriteSession};
use crate::partition::Partition;
use crate::pump::{BlockDecompressor, BlockSink};
use crate::scanner::{IndexScanner, ScanMode};
use crate::transport::{HttpTransport, join_url};

/// Observable phase of the update engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UpdateState {
    /// No attempt has run yet
    #[default]
    Idle,

    /// Reading index listings
    Scanning,

    /// Opening the firmware download
    Downloading,

    /// Decompressing into the inactive partition
    Writing {
        /// Bytes written so far
        bytes_written: u64,
    },

    /// Closing the write context and switching the boot target
    Finalizing,

    /// New image selected for boot; restart pending
    RebootPending,

    /// Attempt ended without switching the boot target
    Failed {
        /// Error description
        reason: String,
    },
}

impl UpdateState {
    /// Check if an attempt is currently in progress
    pub fn is_in_progress(&self) -> bool {
        !matches!(
            self,
            UpdateState::Idle | UpdateState::RebootPending | UpdateState::Failed { .. }
        )
    }
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Image written and selected for boot
    RebootPending,
    /// No newer or matching firmware listed; the device is up to date
    NoCandidate,
    /// Attempt aborted
    Failed {
        /// Error description
        reason: String,
    },
}

/// Record of one orchestrated update run; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAttempt {
    /// Attempt identifier
    pub id: Uuid,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// Requested version, `None` for latest
    pub target: Option<String>,

    /// Index the firmware was found in
    pub index_url: Option<String>,

    /// Resolved firmware filename
    pub filename: Option<String>,

    /// Partition that was written
    pub partition: Option<Partition>,

    /// Blocks decoded
    pub blocks: u64,

    /// Bytes written to flash
    pub bytes_written: u64,

    /// Hex SHA-256 of the written image
    pub image_sha256: Option<String>,

    /// Wall time of the attempt
    #[serde(with = "duration_serde")]
    pub duration: Duration,

    /// Final outcome
    pub outcome: AttemptOutcome,
}

impl UpdateAttempt {
    fn new(target: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            target,
            index_url: None,
            filename: None,
            partition: None,
            blocks: 0,
            bytes_written: 0,
            image_sha256: None,
            duration: Duration::ZERO,
            outcome: AttemptOutcome::Failed {
                reason: "not finished".to_string(),
            },
        }
    }

    /// Whether the new image awaits a restart
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::RebootPending
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

struct Inner {
    config: OtaConfig,
    transport: Arc<dyn HttpTransport>,
    flash: Arc<dyn FlashService>,
    identity: Arc<dyn DeviceIdentity>,
    state: watch::Sender<UpdateState>,
    in_flight: AtomicBool,
}

/// Releases the in-flight slot on every exit path of an attempt
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightGuard {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                inner: Arc::clone(inner),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
        debug!("Update slot released");
    }
}

/// Forwards decompressed blocks into flash and publishes write progress
struct ProgressSink<'s, 'f> {
    session: &'s mut WriteSession<'f>,
    state: &'s watch::Sender<UpdateState>,
}

impl BlockSink for ProgressSink<'_, '_> {
    fn write_block(&mut self, data: &[u8]) -> Result<(), OtaError> {
        self.session.write(data)?;
        self.state.send_replace(UpdateState::Writing {
            bytes_written: self.session.bytes_written(),
        });
        Ok(())
    }
}

/// Drives update attempts against the device collaborators
#[derive(Clone)]
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
}

impl UpdateOrchestrator {
    /// Create an orchestrator. The configuration is validated up front.
    pub fn new(
        config: OtaConfig,
        transport: Arc<dyn HttpTransport>,
        flash: Arc<dyn FlashService>,
        identity: Arc<dyn DeviceIdentity>,
    ) -> Result<Self, OtaError> {
        config.validate()?;
        let (state, _) = watch::channel(UpdateState::Idle);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                flash,
                identity,
                state,
                in_flight: AtomicBool::new(false),
            }),
        })
    }

    /// Current phase
    pub fn state(&self) -> UpdateState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to phase changes
    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.inner.state.subscribe()
    }

    /// Whether an attempt currently owns the update slot
    pub fn is_running(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Configuration in use
    pub fn config(&self) -> &OtaConfig {
        &self.inner.config
    }

    /// Start an attempt in the background.
    ///
    /// `None` or an empty string updates to the newest listed version;
    /// anything else pins the components it contains. Returns `None` when an
    /// attempt is already running.
    pub fn launch(&self, target: Option<&str>) -> Option<JoinHandle<UpdateAttempt>> {
        self.launch_with(target, |_| {})
    }

    /// Like [`launch`](Self::launch), calling `on_complete` with the finished
    /// attempt before any restart
    pub fn launch_with<F>(&self, target: Option<&str>, on_complete: F) -> Option<JoinHandle<UpdateAttempt>>
    where
        F: FnOnce(&UpdateAttempt) + Send + 'static,
    {
        self.try_launch_with(target, on_complete).ok()
    }

    /// Like [`launch_with`](Self::launch_with), failing with
    /// [`OtaError::UpdateInProgress`] when the update slot is taken
    pub fn try_launch_with<F>(
        &self,
        target: Option<&str>,
        on_complete: F,
    ) -> Result<JoinHandle<UpdateAttempt>, OtaError>
    where
        F: FnOnce(&UpdateAttempt) + Send + 'static,
    {
        let Some(guard) = InFlightGuard::acquire(&self.inner) else {
            warn!("Update already in progress, request dropped");
            return Err(OtaError::UpdateInProgress);
        };

        let target = target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned);
        self.inner.state.send_replace(UpdateState::Scanning);

        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            let attempt = inner.run_attempt(target).await;
            on_complete(&attempt);
            if attempt.is_success() {
                inner.restart_after_delay().await;
            }
            attempt
        }))
    }
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    async fn run_attempt(&self, target: Option<String>) -> UpdateAttempt {
        let started = Instant::now();
        let mut attempt = UpdateAttempt::new(target);
        info!(
            attempt = %attempt.id,
            target = attempt.target.as_deref().unwrap_or("latest"),
            "Starting OTA update"
        );

        let result = self.execute(&mut attempt).await;
        attempt.duration = started.elapsed();

        attempt.outcome = match result {
            Ok(()) => {
                info!(
                    attempt = %attempt.id,
                    bytes = attempt.bytes_written,
                    duration_ms = u64::try_from(attempt.duration.as_millis()).unwrap_or(u64::MAX),
                    "OTA update written, reboot pending"
                );
                self.state.send_replace(UpdateState::RebootPending);
                AttemptOutcome::RebootPending
            }
            Err(e) => {
                if e.is_recoverable() {
                    info!(attempt = %attempt.id, "No update available: {e}");
                } else {
                    error!(attempt = %attempt.id, "OTA update failed: {e}");
                }
                self.state.send_replace(UpdateState::Failed {
                    reason: e.to_string(),
                });
                match e {
                    OtaError::NoCandidate => AttemptOutcome::NoCandidate,
                    other => AttemptOutcome::Failed {
                        reason: other.to_string(),
                    },
                }
            }
        };
        attempt
    }

    async fn execute(&self, attempt: &mut UpdateAttempt) -> Result<(), OtaError> {
        let (index_url, filename) = self.resolve(attempt.target.as_deref()).await?;
        attempt.index_url = Some(index_url.clone());
        attempt.filename = Some(filename.clone());

        self.state.send_replace(UpdateState::Downloading);
        let url = join_url(&index_url, &filename);
        info!(%url, "Downloading firmware");
        let mut response = self
            .transport
            .get(&url)
            .await
            .map_err(|e| OtaError::Transport(format!("{url}: {e:#}")))?;
        if !response.is_ok() {
            error!(%url, status = response.status, "Firmware download refused");
            return Err(OtaError::HttpStatus(response.status));
        }

        let mut session = WriteSession::begin(self.flash.as_ref())?;
        attempt.partition = session.partition();
        self.state
            .send_replace(UpdateState::Writing { bytes_written: 0 });

        let mut decompressor = BlockDecompressor::from_config(&self.config);
        let stats = {
            let mut sink = ProgressSink {
                session: &mut session,
                state: &self.state,
            };
            decompressor.pump(&mut response.body, &mut sink).await?
        };
        attempt.blocks = stats.blocks;
        attempt.bytes_written = session.bytes_written();

        self.state.send_replace(UpdateState::Finalizing);
        let summary = session.commit()?;
        attempt.partition = Some(summary.partition);
        attempt.image_sha256 = Some(summary.sha256);
        Ok(())
    }

    /// Scan the index sources in order until one yields a target file
    async fn resolve(&self, target: Option<&str>) -> Result<(String, String), OtaError> {
        let project_id = self.identity.project_id();
        let (reference, mode) = match target {
            Some(version) => (version, ScanMode::Specific),
            None => (self.identity.firmware_version(), ScanMode::Latest),
        };
        info!(project_id, reference, ?mode, "Scanning firmware index");

        for index_url in self.config.index_urls() {
            match self.scan_index(index_url, project_id, reference, mode).await {
                Ok(Some(filename)) => {
                    info!(index_url, filename, "Firmware target selected");
                    return Ok((index_url.to_string(), filename));
                }
                Ok(None) => info!(index_url, "No candidate in index"),
                Err(e) if e.is_recoverable() => warn!(index_url, "{e}"),
                Err(e) => return Err(e),
            }
        }
        Err(OtaError::NoCandidate)
    }

    async fn scan_index(
        &self,
        index_url: &str,
        project_id: &str,
        reference: &str,
        mode: ScanMode,
    ) -> Result<Option<String>, OtaError> {
        let mut scanner =
            IndexScanner::with_limits(project_id, reference, mode, self.config.scanner)?;

        let mut response = self
            .transport
            .get(index_url)
            .await
            .map_err(|e| OtaError::IndexUnavailable(format!("{index_url}: {e:#}")))?;
        if !response.is_ok() {
            return Err(OtaError::IndexUnavailable(format!(
                "{index_url}: HTTP {}",
                response.status
            )));
        }

        let scanned = scanner
            .ingest_reader(&mut response.body, self.config.read_chunk_size)
            .await
            .map_err(|e| OtaError::IndexUnavailable(format!("{index_url}: {e}")))?;
        debug!(index_url, scanned, best = %scanner.best_version(), "Index scan complete");

        Ok(scanner.target_file().map(str::to_owned))
    }

    async fn restart_after_delay(&self) {
        let delay = self.config.restart_delay();
        info!(delay_ms = self.config.restart_delay_ms, "Restarting into new firmware");
        tokio::time::sleep(delay).await;
        if let Err(e) = self.flash.restart() {
            error!("Restart failed: {e:#}");
        }
    }
}
