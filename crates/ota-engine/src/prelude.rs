//! Convenience re-exports for common update engine types

pub use std::sync::Arc;

pub use crate::codec::{BlockByteOrder, BlockDecoder, BlockEncoder, Lz4BlockCodec};
pub use crate::commands::{
    Ack, AckKind, AckSink, CMD_STATUS, CMD_UPDATE, CMD_VALIDATE, Command, CommandProvider,
    CommandRegistry, CommandSpec, DEFAULT_PARAM, OtaCommands,
};
pub use crate::config::OtaConfig;
pub use crate::device::{DeviceIdentity, StaticIdentity};
pub use crate::error::{CodecError, OtaError};
pub use crate::flash::{FlashService, WriteHandle, WriteSession, WriteSummary};
pub use crate::lifecycle::{
    BootCheckReport, PartitionLifecycleManager, SelfCheck, SelfCheckSummary, ValidateOutcome,
};
pub use crate::orchestrator::{AttemptOutcome, UpdateAttempt, UpdateOrchestrator, UpdateState};
pub use crate::partition::{Partition, PartitionState};
pub use crate::pump::{BlockDecompressor, BlockSink, PumpStats};
pub use crate::scanner::{IndexScanner, ScanMode, ScannerLimits};
pub use crate::transport::{HttpResponse, HttpTransport, join_url};
pub use crate::version::{PinMask, VersionTuple, is_higher};
pub use crate::window::{DEFAULT_DICTIONARY_SIZE, DictionaryWindow, RollingWindow};
