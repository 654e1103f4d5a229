//! Output formatting for CLI responses

use std::path::Path;

use anyhow::Error;
use colored::*;
use ota_engine::prelude::*;
use serde::Serialize;
use serde_json::json;

use crate::commands::pack::PackReport;
use crate::commands::scan::ScanReport;
use crate::commands::unpack::UnpackReport;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format error as JSON: {}", e),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    use crate::error::CliError;

    match error.downcast_ref::<CliError>() {
        Some(CliError::InputNotFound(_)) => "input_not_found",
        Some(CliError::InvalidConfiguration(_)) => "invalid_configuration",
        Some(CliError::InvalidImage(_)) => "invalid_image",
        Some(CliError::NoCandidate(_)) => "no_candidate",
        Some(CliError::IoError(_)) => "io_error",
        Some(CliError::JsonError(_)) => "json_error",
        None => "error",
    }
}

fn print_success_json<T: Serialize>(key: &str, value: &T) {
    let output = json!({
        "success": true,
        key: value
    });
    match serde_json::to_string_pretty(&output) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format {} as JSON: {}", key, e),
    }
}

fn ratio(bytes_in: u64, bytes_out: u64) -> f64 {
    if bytes_in == 0 {
        0.0
    } else {
        bytes_out as f64 / bytes_in as f64 * 100.0
    }
}

/// Print the result of `pack`
pub fn print_pack_report(report: &PackReport, json: bool) {
    if json {
        print_success_json("pack", report);
        return;
    }

    println!("{} {} -> {}", "✓".green(), report.input, report.output.bold());
    println!("  Blocks: {}", report.blocks);
    println!(
        "  Size: {} -> {} bytes ({:.1}%)",
        report.bytes_in,
        report.bytes_out,
        ratio(report.bytes_in, report.bytes_out)
    );
    println!(
        "  Chunk: {} bytes, dictionary: {} bytes, {:?}-endian lengths",
        report.chunk_size, report.dictionary_size, report.byte_order
    );
    println!("  SHA-256: {}", report.sha256.dimmed());
}

/// Print the result of `unpack`
pub fn print_unpack_report(report: &UnpackReport, json: bool) {
    if json {
        print_success_json("unpack", report);
        return;
    }

    println!("{} {} -> {}", "✓".green(), report.input, report.output.bold());
    println!("  Blocks: {}", report.blocks);
    println!(
        "  Payload: {} compressed bytes -> {} bytes",
        report.bytes_in, report.bytes_out
    );
    println!("  SHA-256: {}", report.sha256.dimmed());
}

/// Print the result of `scan`
pub fn print_scan_report(report: &ScanReport, json: bool) {
    if json {
        print_success_json("scan", report);
        return;
    }

    println!("{} {}", "Selected:".bold(), report.filename.green());
    println!("  Version: {}", report.version);
    println!("  Mode: {:?} (reference {})", report.mode, report.reference);
    println!("  Scanned: {} bytes of {}", report.bytes_scanned, report.listing);
}

/// Print a configuration document; always JSON since that is the file format
pub fn print_config(config: &OtaConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Print the result of `config check`
pub fn print_config_ok(path: &Path, config: &OtaConfig, json: bool) {
    if json {
        print_success_json("config", config);
        return;
    }

    println!("{} {} is valid", "✓".green(), path.display());
    let urls: Vec<&str> = config.index_urls().collect();
    println!("  Index URLs: {}", urls.join(", "));
    println!(
        "  Blocks: max {} compressed / {} decompressed bytes",
        config.max_block_size, config.max_decompressed_block_size
    );
    println!("  Dictionary: {} bytes", config.dictionary_size);
}
