//! Raw image to block stream

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ota_engine::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::commands::{PackArgs, require_file};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
pub struct PackReport {
    pub input: String,
    pub output: String,
    pub blocks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunk_size: usize,
    pub dictionary_size: usize,
    pub byte_order: BlockByteOrder,
    pub sha256: String,
}

pub async fn execute(args: &PackArgs, json: bool) -> Result<()> {
    require_file(&args.input)?;
    let image = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    if image.is_empty() {
        return Err(CliError::InvalidImage(format!("{} is empty", args.input.display())).into());
    }

    let mut encoder = BlockEncoder::new(
        args.dictionary_size,
        args.chunk_size,
        args.max_block_size,
        args.byte_order.into(),
    )
    .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?;

    let pb = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
            .progress_chars("#>-");
        pb.set_style(style);
        pb
    };

    let mut packed = Vec::with_capacity(image.len() / 2 + 64);
    let mut blocks = 0u64;
    for chunk in image.chunks(encoder.chunk_size()) {
        encoder.encode_block(chunk, &mut packed);
        blocks += 1;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    tokio::fs::write(&args.output, &packed)
        .await
        .with_context(|| format!("writing {}", args.output.display()))?;

    let report = PackReport {
        input: args.input.display().to_string(),
        output: args.output.display().to_string(),
        blocks,
        bytes_in: image.len() as u64,
        bytes_out: packed.len() as u64,
        chunk_size: args.chunk_size,
        dictionary_size: args.dictionary_size,
        byte_order: args.byte_order.into(),
        sha256: hex::encode(Sha256::digest(&image)),
    };
    info!(blocks, bytes_out = report.bytes_out, "Image packed");

    output::print_pack_report(&report, json);
    Ok(())
}
