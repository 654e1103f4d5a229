//! Over-the-air firmware update engine
//!
//! This crate keeps an embedded device's firmware current without ever
//! leaving it unbootable:
//! - Incremental scanning of a remote firmware index with a bounded carryover
//! - Pin-aware version selection (latest, or a specific major/minor/patch)
//! - Block-framed streaming decompression with a rolling LZ4 dictionary
//! - A/B partition writes that only switch the boot target after the last block
//! - Post-boot validation with automatic rollback
//!
//! # Architecture
//!
//! - [`version`]: version tuples and the pin-aware comparator
//! - [`window`]: rolling byte windows for carryover and dictionary
//! - [`scanner`]: chunk-boundary-safe index scanner
//! - [`codec`]: block codec seam, LZ4 decoder and the matching encoder
//! - [`pump`]: length-prefixed block stream decompression
//! - [`partition`] and [`flash`]: partition states, flash primitives, write sessions
//! - [`transport`] and [`device`]: network and identity collaborators
//! - [`orchestrator`]: the update attempt state machine
//! - [`lifecycle`]: validate/status/boot self-checks
//! - [`commands`]: `FWUP`/`FWCO`/`FWQS` command provider
//! - [`config`] and [`error`]
//!
//! # Example
//!
//! ```ignore
//! use ota_engine::prelude::*;
//!
//! # async fn example(
//! #     transport: Arc<dyn HttpTransport>,
//! #     flash: Arc<dyn FlashService>,
//! # ) -> Result<(), OtaError> {
//! let identity = Arc::new(StaticIdentity::new("P025A", "v1.0.0-1"));
//! let orchestrator = UpdateOrchestrator::new(OtaConfig::default(), transport, flash, identity)?;
//!
//! if let Some(handle) = orchestrator.launch(None) {
//!     let attempt = handle.await.map_err(|e| OtaError::Transport(e.to_string()))?;
//!     println!("{:?}", attempt.outcome);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod flash;
pub mod lifecycle;
pub mod orchestrator;
pub mod partition;
pub mod prelude;
pub mod pump;
pub mod scanner;
pub mod transport;
pub mod version;
pub mod window;

pub use codec::{BlockByteOrder, BlockDecoder, BlockEncoder, Lz4BlockCodec};
pub use commands::{
    Ack, AckKind, AckSink, Command, CommandProvider, CommandRegistry, CommandSpec, OtaCommands,
};
pub use config::OtaConfig;
pub use device::{DeviceIdentity, StaticIdentity};
pub use error::{CodecError, OtaError};
pub use flash::{FlashService, WriteHandle, WriteSession, WriteSummary};
pub use lifecycle::{
    BootCheckReport, PartitionLifecycleManager, SelfCheck, SelfCheckResult, SelfCheckSummary,
    ValidateOutcome,
};
pub use orchestrator::{AttemptOutcome, UpdateAttempt, UpdateOrchestrator, UpdateState};
pub use partition::{Partition, PartitionState};
pub use pump::{BlockDecompressor, BlockSink, PumpStats};
pub use scanner::{Candidate, IndexScanner, ScanMode, ScannerLimits};
pub use transport::{HttpResponse, HttpTransport};
pub use version::{PinMask, VersionTuple, is_higher};
pub use window::{DictionaryWindow, RollingWindow};
