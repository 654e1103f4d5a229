//! Remote command surface
//!
//! Commands arrive from the device's messaging layer already decoded into a
//! [`Command`]. Handlers never block the dispatcher: work runs on spawned
//! tasks and results travel back through an [`AckSink`], exactly one
//! acknowledgment per command.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::OtaError;
use crate::lifecycle::{PartitionLifecycleManager, ValidateOutcome};
use crate::orchestrator::{AttemptOutcome, UpdateAttempt, UpdateOrchestrator};

/// Start an update; param `default` holds the target version
pub const CMD_UPDATE: &str = "FWUP";

/// Confirm or reject the running image; param `default` holds the verdict
pub const CMD_VALIDATE: &str = "FWCO";

/// Report the running image state
pub const CMD_STATUS: &str = "FWQS";

/// Parameter carrying a command's single argument
pub const DEFAULT_PARAM: &str = "default";

/// Description of a command a provider accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command identifier
    pub id: String,
    /// Human-readable description
    pub description: String,
    /// Accepted parameter names
    pub params: Vec<String>,
}

impl CommandSpec {
    fn new(id: &str, description: &str, params: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

/// Incoming command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command identifier
    pub id: String,
    /// Echoed in the acknowledgment; empty when the sender gave none
    #[serde(default)]
    pub correlation_id: String,
    /// Named parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Command {
    /// Create a command without parameters
    pub fn new(id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            correlation_id: correlation_id.into(),
            params: HashMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Parameter value
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Acknowledgment result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckKind {
    /// Command succeeded
    Ok,
    /// Command failed
    Fail,
}

/// Acknowledgment sent back for a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Correlation id of the command
    pub correlation_id: String,
    /// Command identifier
    pub command_id: String,
    /// Result
    pub kind: AckKind,
    /// Message text
    pub payload: String,
}

impl Ack {
    /// Successful acknowledgment for `command`
    pub fn ok(command: &Command, payload: impl Into<String>) -> Self {
        Self::with_kind(command, AckKind::Ok, payload)
    }

    /// Failed acknowledgment for `command`
    pub fn fail(command: &Command, payload: impl Into<String>) -> Self {
        Self::with_kind(command, AckKind::Fail, payload)
    }

    fn with_kind(command: &Command, kind: AckKind, payload: impl Into<String>) -> Self {
        Self {
            correlation_id: command.correlation_id.clone(),
            command_id: command.id.clone(),
            kind,
            payload: payload.into(),
        }
    }
}

/// Delivers acknowledgments to the messaging layer
#[async_trait]
pub trait AckSink: Send + Sync {
    /// Deliver one acknowledgment
    async fn send(&self, ack: Ack) -> Result<()>;
}

/// Capability interface of a command provider
pub trait CommandProvider: Send + Sync {
    /// Commands this provider handles
    fn commands(&self) -> Vec<CommandSpec>;

    /// Start handling `command`. Must return without waiting for the work;
    /// exactly one acknowledgment is delivered through `acks`.
    fn handle(&self, command: Command, acks: Arc<dyn AckSink>);
}

/// Deliver `ack` on a background task
pub fn send_ack(acks: Arc<dyn AckSink>, ack: Ack) {
    tokio::spawn(async move {
        let correlation_id = ack.correlation_id.clone();
        if let Err(e) = acks.send(ack).await {
            error!(correlation_id, "Failed to deliver acknowledgment: {e:#}");
        }
    });
}

/// Routes commands to registered providers
pub struct CommandRegistry {
    acks: Arc<dyn AckSink>,
    providers: Vec<Arc<dyn CommandProvider>>,
    routes: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Create an empty registry delivering acknowledgments to `acks`
    pub fn new(acks: Arc<dyn AckSink>) -> Self {
        Self {
            acks,
            providers: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Register every command of `provider`.
    ///
    /// Fails without registering anything if one of its ids is taken.
    pub fn register(&mut self, provider: Arc<dyn CommandProvider>) -> Result<(), OtaError> {
        let specs = provider.commands();
        if let Some(taken) = specs.iter().find(|s| self.routes.contains_key(&s.id)) {
            return Err(OtaError::InvalidConfig(format!(
                "command {} already registered",
                taken.id
            )));
        }

        let index = self.providers.len();
        for spec in specs {
            debug!(command = %spec.id, "Command registered");
            self.routes.insert(spec.id, index);
        }
        self.providers.push(provider);
        Ok(())
    }

    /// All registered command specs
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.providers.iter().flat_map(|p| p.commands()).collect()
    }

    /// Hand `command` to its provider, or reject an unknown id
    pub fn dispatch(&self, command: Command) {
        let provider = self
            .routes
            .get(&command.id)
            .and_then(|&index| self.providers.get(index));
        match provider {
            Some(provider) => {
                debug!(command = %command.id, correlation_id = %command.correlation_id, "Dispatching command");
                provider.handle(command, Arc::clone(&self.acks));
            }
            None => {
                warn!(command = %command.id, "Unknown command");
                let payload = format!("unknown command {}", command.id);
                send_ack(Arc::clone(&self.acks), Ack::fail(&command, payload));
            }
        }
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

/// Parse a validation verdict; only an explicit negative rejects
pub fn parse_verdict(value: Option<&str>) -> bool {
    !matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("false" | "0" | "no")
    )
}

/// Firmware update commands
#[derive(Debug, Clone)]
pub struct OtaCommands {
    orchestrator: UpdateOrchestrator,
    lifecycle: Arc<PartitionLifecycleManager>,
}

impl OtaCommands {
    /// Create the provider
    pub fn new(orchestrator: UpdateOrchestrator, lifecycle: Arc<PartitionLifecycleManager>) -> Self {
        Self {
            orchestrator,
            lifecycle,
        }
    }

    fn handle_update(&self, command: Command, acks: Arc<dyn AckSink>) {
        let target = command.param(DEFAULT_PARAM).map(str::to_owned);
        info!(target = target.as_deref().unwrap_or(""), "OTA update requested");

        let completion = command.clone();
        let completion_acks = Arc::clone(&acks);
        let launched = self
            .orchestrator
            .try_launch_with(target.as_deref(), move |attempt| {
                send_ack(completion_acks, attempt_ack(&completion, attempt));
            });
        if let Err(e) = launched {
            send_ack(acks, Ack::fail(&command, e.to_string()));
        }
    }

    fn handle_validate(&self, command: Command, acks: Arc<dyn AckSink>) {
        let ok = parse_verdict(command.param(DEFAULT_PARAM));
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            let outcome = lifecycle.validate(ok);
            let ack = match &outcome {
                ValidateOutcome::Failed(_) => Ack::fail(&command, outcome.to_string()),
                _ => Ack::ok(&command, outcome.to_string()),
            };
            if let Err(e) = acks.send(ack).await {
                error!("Failed to deliver validate acknowledgment: {e:#}");
            }
        });
    }

    fn handle_status(&self, command: Command, acks: Arc<dyn AckSink>) {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            let state = lifecycle.status();
            let ack = match state.status_message() {
                Some(message) => Ack::ok(&command, message),
                None => Ack::fail(&command, "OTA: Image state unknown"),
            };
            if let Err(e) = acks.send(ack).await {
                error!("Failed to deliver status acknowledgment: {e:#}");
            }
        });
    }
}

fn attempt_ack(command: &Command, attempt: &UpdateAttempt) -> Ack {
    match &attempt.outcome {
        AttemptOutcome::RebootPending => {
            Ack::ok(command, attempt.filename.clone().unwrap_or_default())
        }
        AttemptOutcome::NoCandidate => Ack::ok(command, "no newer firmware available"),
        AttemptOutcome::Failed { reason } => Ack::fail(command, reason.clone()),
    }
}

impl CommandProvider for OtaCommands {
    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(
                CMD_UPDATE,
                "Download and install firmware; empty target selects the latest",
                &[DEFAULT_PARAM],
            ),
            CommandSpec::new(
                CMD_VALIDATE,
                "Confirm (true) or reject (false) the running firmware image",
                &[DEFAULT_PARAM],
            ),
            CommandSpec::new(CMD_STATUS, "Report the running firmware image state", &[]),
        ]
    }

    fn handle(&self, command: Command, acks: Arc<dyn AckSink>) {
        match command.id.as_str() {
            CMD_UPDATE => self.handle_update(command, acks),
            CMD_VALIDATE => self.handle_validate(command, acks),
            CMD_STATUS => self.handle_status(command, acks),
            other => {
                let payload = format!("unsupported command {other}");
                send_ack(acks, Ack::fail(&command, payload));
            }
        }
    }
}
