//! otactl - OTA firmware host tool
//!
//! Packs raw firmware into the block-framed stream devices consume, unpacks
//! such streams for inspection, and resolves which listed file a device
//! would pick from an index page.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::*;
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "otactl")]
#[command(about = "OTA firmware host tool - pack, unpack and resolve firmware images")]
#[command(version)]
#[command(long_about = "
otactl prepares and inspects firmware for over-the-air updates.

`pack` produces the length-prefixed LZ4 block stream with the rolling
dictionary the device decoder expects. `unpack` runs the device decoder on
the host. `scan` runs the device's index scanner against a saved listing.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a raw image into a block stream
    Pack(PackArgs),

    /// Decompress a block stream back into a raw image
    Unpack(UnpackArgs),

    /// Resolve the firmware file a device would select from an index listing
    Scan(ScanArgs),

    /// Engine configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("otactl={log_level},ota_engine={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let result = execute_command(&cli).await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            std::process::exit(exit_code);
        }
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Pack(args) => commands::pack::execute(args, cli.json).await,
        Commands::Unpack(args) => commands::unpack::execute(args, cli.json).await,
        Commands::Scan(args) => commands::scan::execute(args, cli.json).await,
        Commands::Config(cmd) => commands::config::execute(cmd, cli.json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_pack_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["otactl", "pack", "fw.bin", "fw.bin.lz4"])?;
        let Commands::Pack(args) = cli.command else {
            return Err("expected pack".into());
        };
        assert_eq!(args.input, Path::new("fw.bin"));
        assert_eq!(args.output, Path::new("fw.bin.lz4"));
        assert_eq!(args.chunk_size, ota_engine::codec::DEFAULT_CHUNK_SIZE);
        assert_eq!(args.dictionary_size, ota_engine::prelude::DEFAULT_DICTIONARY_SIZE);
        assert_eq!(args.max_block_size, 4096);
        assert_eq!(args.byte_order, ByteOrderArg::Little);
        Ok(())
    }

    #[test]
    fn parse_pack_big_endian() -> TestResult {
        let cli = Cli::try_parse_from([
            "otactl",
            "pack",
            "a",
            "b",
            "--byte-order",
            "big",
            "--chunk-size",
            "2048",
        ])?;
        let Commands::Pack(args) = cli.command else {
            return Err("expected pack".into());
        };
        assert_eq!(args.byte_order, ByteOrderArg::Big);
        assert_eq!(args.chunk_size, 2048);
        Ok(())
    }

    #[test]
    fn parse_global_json_flag_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from(["otactl", "unpack", "in", "out", "--json"])?;
        assert!(cli.json);
        Ok(())
    }

    #[test]
    fn parse_verbose_levels() -> TestResult {
        let cli0 = Cli::try_parse_from(["otactl", "config", "show"])?;
        assert_eq!(cli0.verbose, 0);

        let cli2 = Cli::try_parse_from(["otactl", "-vv", "config", "show"])?;
        assert_eq!(cli2.verbose, 2);
        Ok(())
    }

    #[test]
    fn parse_scan_specific() -> TestResult {
        let cli = Cli::try_parse_from([
            "otactl",
            "scan",
            "index.html",
            "--project",
            "P025A",
            "--reference",
            "v1.0",
            "--specific",
        ])?;
        let Commands::Scan(args) = cli.command else {
            return Err("expected scan".into());
        };
        assert_eq!(args.project, "P025A");
        assert_eq!(args.reference, "v1.0");
        assert!(args.specific);
        assert_eq!(args.chunk_size, 4096);
        Ok(())
    }

    #[test]
    fn parse_scan_requires_project() {
        let result = Cli::try_parse_from(["otactl", "scan", "index.html"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_unpack_overrides_are_optional() -> TestResult {
        let cli = Cli::try_parse_from(["otactl", "unpack", "in", "out"])?;
        let Commands::Unpack(args) = cli.command else {
            return Err("expected unpack".into());
        };
        assert!(args.config.is_none());
        assert!(args.dictionary_size.is_none());
        assert!(args.byte_order.is_none());
        Ok(())
    }

    #[test]
    fn parse_config_check_requires_path() {
        assert!(Cli::try_parse_from(["otactl", "config", "check"]).is_err());
    }
}
