//! Offline firmware resolution against a saved index listing

use anyhow::{Context, Result};
use ota_engine::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::commands::{ScanArgs, require_file};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub listing: String,
    pub project: String,
    pub mode: ScanMode,
    pub reference: String,
    pub bytes_scanned: u64,
    pub filename: String,
    pub version: String,
}

pub async fn execute(args: &ScanArgs, json: bool) -> Result<()> {
    require_file(&args.listing)?;
    if args.chunk_size == 0 {
        return Err(CliError::InvalidConfiguration("chunk size must be non-zero".to_string()).into());
    }

    let mode = if args.specific {
        ScanMode::Specific
    } else {
        ScanMode::Latest
    };
    let mut scanner = IndexScanner::new(&args.project, &args.reference, mode)
        .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?;

    let mut listing = tokio::fs::File::open(&args.listing)
        .await
        .with_context(|| format!("opening {}", args.listing.display()))?;
    let bytes_scanned = scanner
        .ingest_reader(&mut listing, args.chunk_size)
        .await
        .with_context(|| format!("reading {}", args.listing.display()))?;
    debug!(bytes_scanned, "Listing scanned");

    let Some(candidate) = scanner.candidate() else {
        let wanted = match mode {
            ScanMode::Latest => format!("newer than {}", scanner.reference()),
            ScanMode::Specific => format!("matching {}", scanner.reference()),
        };
        return Err(CliError::NoCandidate(format!("no {} firmware {wanted}", args.project)).into());
    };

    let report = ScanReport {
        listing: args.listing.display().to_string(),
        project: args.project.clone(),
        mode,
        reference: scanner.reference().to_string(),
        bytes_scanned,
        filename: candidate.filename.clone(),
        version: candidate.version.to_string(),
    };

    output::print_scan_report(&report, json);
    Ok(())
}
