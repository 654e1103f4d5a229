//! Post-boot validation and rollback of the running image
//!
//! A freshly flashed image boots in [`PartitionState::PendingVerify`]. The
//! application confirms it with [`PartitionLifecycleManager::validate`] or lets
//! [`PartitionLifecycleManager::boot_check`] decide from registered self-checks.
//! A negative verdict marks the image invalid and reverts the boot target.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::OtaConfig;
use crate::flash::FlashService;
use crate::partition::PartitionState;

/// Result of a validation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidateOutcome {
    /// Running image was not pending; nothing changed
    NotPending(PartitionState),
    /// Pending image marked valid
    Confirmed,
    /// Pending image marked invalid and the boot target reverted
    RolledBack,
    /// A flash primitive failed
    Failed(String),
}

impl std::fmt::Display for ValidateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidateOutcome::NotPending(state) => {
                write!(f, "OTA: Image is {state}, nothing to validate")
            }
            ValidateOutcome::Confirmed => write!(f, "OTA: Image marked VALID"),
            ValidateOutcome::RolledBack => write!(f, "OTA: Image marked INVALID, rolling back"),
            ValidateOutcome::Failed(reason) => write!(f, "OTA: Validation failed: {reason}"),
        }
    }
}

/// Application-provided check run before confirming a pending image
#[async_trait]
pub trait SelfCheck: Send + Sync {
    /// Check identifier
    fn id(&self) -> &str;

    /// Whether a failure should reject the image
    fn critical(&self) -> bool {
        true
    }

    /// Run the check
    async fn run(&self) -> Result<()>;
}

/// Result of a single self-check
#[derive(Debug, Clone)]
pub struct SelfCheckResult {
    /// Index of the check in registration order
    pub index: usize,
    /// Check identifier
    pub check_id: String,
    /// Whether the check passed
    pub success: bool,
    /// Whether the check was critical
    pub critical: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// Duration of the check
    pub duration: Duration,
}

/// Summary of a self-check run
#[derive(Debug, Clone, Default)]
pub struct SelfCheckSummary {
    /// Total number of checks
    pub total_checks: usize,
    /// Number of passed checks
    pub passed_checks: usize,
    /// Number of failed checks
    pub failed_checks: usize,
    /// Number of critical failures
    pub critical_failures: usize,
    /// Individual check results
    pub results: Vec<SelfCheckResult>,
}

impl SelfCheckSummary {
    /// Check if all critical checks passed
    pub fn all_critical_passed(&self) -> bool {
        self.critical_failures == 0
    }

    fn record(&mut self, result: SelfCheckResult) {
        self.total_checks += 1;
        if result.success {
            self.passed_checks += 1;
        } else {
            self.failed_checks += 1;
            if result.critical {
                self.critical_failures += 1;
            }
        }
        self.results.push(result);
    }
}

/// What the boot path found and did
#[derive(Debug, Clone)]
pub struct BootCheckReport {
    /// State read before any action
    pub initial_state: PartitionState,
    /// Self-check results, present only when the image was pending
    pub summary: Option<SelfCheckSummary>,
    /// Validation outcome
    pub outcome: ValidateOutcome,
}

/// Interprets and transitions the running partition's validation state
pub struct PartitionLifecycleManager {
    flash: Arc<dyn FlashService>,
    auto_confirm_on_status: bool,
    self_check_timeout: Duration,
    checks: Vec<Arc<dyn SelfCheck>>,
}

impl PartitionLifecycleManager {
    /// Create a manager over the flash service
    pub fn new(flash: Arc<dyn FlashService>, config: &OtaConfig) -> Self {
        Self {
            flash,
            auto_confirm_on_status: config.auto_confirm_on_status,
            self_check_timeout: config.self_check_timeout(),
            checks: Vec::new(),
        }
    }

    /// Register a boot self-check
    pub fn register_check(&mut self, check: Arc<dyn SelfCheck>) {
        self.checks.push(check);
    }

    /// Read the running partition state, mapping read failures to `Unknown`
    pub fn read_state(&self) -> PartitionState {
        match self.flash.running_partition_state() {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to read partition state: {e:#}");
                PartitionState::Unknown
            }
        }
    }

    /// Confirm or reject a pending image.
    ///
    /// Only a `PendingVerify` image is touched. Rejection calls the rollback
    /// primitive exactly once.
    pub fn validate(&self, ok: bool) -> ValidateOutcome {
        let state = self.read_state();
        if !state.is_pending() {
            debug!(%state, "Validate requested on non-pending image");
            return ValidateOutcome::NotPending(state);
        }

        if ok {
            info!("Marking firmware image as VALID");
            match self.flash.mark_valid() {
                Ok(()) => ValidateOutcome::Confirmed,
                Err(e) => {
                    error!("Failed to mark image valid: {e:#}");
                    ValidateOutcome::Failed(format!("{e:#}"))
                }
            }
        } else {
            error!("Marking firmware image as INVALID and rolling back");
            match self.flash.mark_invalid_and_rollback() {
                Ok(()) => ValidateOutcome::RolledBack,
                Err(e) => {
                    error!("Rollback failed: {e:#}");
                    ValidateOutcome::Failed(format!("{e:#}"))
                }
            }
        }
    }

    /// Report the running image state.
    ///
    /// With auto-confirm enabled a pending image is marked valid on the way,
    /// but the state read before confirming is what gets reported.
    pub fn status(&self) -> PartitionState {
        let state = self.read_state();
        if state.is_pending() && self.auto_confirm_on_status {
            info!("Pending image queried, confirming");
            if let Err(e) = self.flash.mark_valid() {
                warn!("Opportunistic confirm failed: {e:#}");
            }
        }
        state
    }

    /// Run all self-checks
    pub async fn run_self_checks(&self) -> SelfCheckSummary {
        let mut summary = SelfCheckSummary::default();
        for (index, check) in self.checks.iter().enumerate() {
            let started = Instant::now();
            let result = match timeout(self.self_check_timeout, check.run()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(_) => Err(format!(
                    "timed out after {} ms",
                    self.self_check_timeout.as_millis()
                )),
            };
            let duration = started.elapsed();

            match &result {
                Ok(()) => debug!(check = check.id(), ?duration, "Self-check passed"),
                Err(e) => warn!(check = check.id(), critical = check.critical(), "Self-check failed: {e}"),
            }

            summary.record(SelfCheckResult {
                index,
                check_id: check.id().to_string(),
                success: result.is_ok(),
                critical: check.critical(),
                error: result.err(),
                duration,
            });
        }
        summary
    }

    /// Boot path: when the image is pending, run self-checks and validate
    /// with "every critical check passed"
    pub async fn boot_check(&self) -> BootCheckReport {
        let initial_state = self.read_state();
        if !initial_state.is_pending() {
            info!(state = %initial_state, "No pending image at boot");
            return BootCheckReport {
                initial_state,
                summary: None,
                outcome: ValidateOutcome::NotPending(initial_state),
            };
        }

        info!(checks = self.checks.len(), "Pending image booted, running self-checks");
        let summary = self.run_self_checks().await;
        let outcome = self.validate(summary.all_critical_passed());
        BootCheckReport {
            initial_state,
            summary: Some(summary),
            outcome,
        }
    }
}

impl std::fmt::Debug for PartitionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionLifecycleManager")
            .field("auto_confirm_on_status", &self.auto_confirm_on_status)
            .field("self_check_timeout", &self.self_check_timeout)
            .field("checks", &self.checks.len())
            .finish()
    }
}
