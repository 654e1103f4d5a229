//! Command implementations for otactl

pub mod config;
pub mod pack;
pub mod scan;
pub mod unpack;

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand, ValueEnum};
use ota_engine::codec::DEFAULT_CHUNK_SIZE;
use ota_engine::prelude::*;
use ota_engine::pump::DEFAULT_MAX_BLOCK_SIZE;

use crate::error::CliError;

#[derive(Args)]
pub struct PackArgs {
    /// Raw firmware image
    pub input: PathBuf,

    /// Block stream to write
    pub output: PathBuf,

    /// Raw bytes compressed into each block
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Dictionary window shared with the device
    #[arg(long, default_value_t = DEFAULT_DICTIONARY_SIZE)]
    pub dictionary_size: usize,

    /// Largest compressed block the device accepts
    #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_SIZE)]
    pub max_block_size: usize,

    /// Byte order of block length prefixes
    #[arg(long, value_enum, default_value_t = ByteOrderArg::Little)]
    pub byte_order: ByteOrderArg,
}

#[derive(Args)]
pub struct UnpackArgs {
    /// Block stream to decode
    pub input: PathBuf,

    /// Raw image to write
    pub output: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the dictionary window
    #[arg(long)]
    pub dictionary_size: Option<usize>,

    /// Override the compressed block limit
    #[arg(long)]
    pub max_block_size: Option<usize>,

    /// Override the length prefix byte order
    #[arg(long, value_enum)]
    pub byte_order: Option<ByteOrderArg>,
}

#[derive(Args)]
pub struct ScanArgs {
    /// Saved index listing (HTML)
    pub listing: PathBuf,

    /// Project identifier prefixing firmware filenames
    #[arg(short, long)]
    pub project: String,

    /// Reference version, e.g. v1.2.0-7
    #[arg(short, long, default_value = "")]
    pub reference: String,

    /// Match every component given in the reference instead of picking the newest
    #[arg(long)]
    pub specific: bool,

    /// Bytes fed to the scanner per read
    #[arg(long, default_value_t = 4096)]
    pub chunk_size: usize,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Configuration file; defaults are shown when omitted
        path: Option<PathBuf>,
    },

    /// Validate a configuration file
    Check {
        /// Configuration file
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ByteOrderArg {
    Little,
    Big,
}

impl From<ByteOrderArg> for BlockByteOrder {
    fn from(arg: ByteOrderArg) -> Self {
        match arg {
            ByteOrderArg::Little => BlockByteOrder::Little,
            ByteOrderArg::Big => BlockByteOrder::Big,
        }
    }
}

/// Fail with [`CliError::InputNotFound`] before opening a missing file
pub(crate) fn require_file(path: &Path) -> Result<(), CliError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::InputNotFound(path.display().to_string()))
    }
}

/// Load a configuration file, mapping engine errors to CLI errors
pub(crate) async fn load_config(path: &Path) -> Result<OtaConfig, CliError> {
    require_file(path)?;
    OtaConfig::load(path)
        .await
        .map_err(|e| CliError::InvalidConfiguration(format!("{}: {e}", path.display())))
}
