//! Block stream to raw image, using the device decoder

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use ota_engine::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::commands::{UnpackArgs, load_config, require_file};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
pub struct UnpackReport {
    pub input: String,
    pub output: String,
    pub blocks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub sha256: String,
}

/// Writes decoded blocks to a file while hashing them
struct FileSink {
    writer: BufWriter<File>,
    hasher: Sha256,
}

impl BlockSink for FileSink {
    fn write_block(&mut self, data: &[u8]) -> Result<(), OtaError> {
        self.writer.write_all(data)?;
        self.hasher.update(data);
        Ok(())
    }
}

pub async fn execute(args: &UnpackArgs, json: bool) -> Result<()> {
    require_file(&args.input)?;

    let mut config = match &args.config {
        Some(path) => load_config(path).await?,
        None => OtaConfig::default(),
    };
    if let Some(size) = args.dictionary_size {
        config.dictionary_size = size;
    }
    if let Some(size) = args.max_block_size {
        config.max_block_size = size;
    }
    if let Some(order) = args.byte_order {
        config.byte_order = order.into();
    }
    config
        .validate()
        .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?;

    let input = tokio::fs::File::open(&args.input)
        .await
        .with_context(|| format!("opening {}", args.input.display()))?;
    let mut reader = tokio::io::BufReader::new(input);

    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut sink = FileSink {
        writer: BufWriter::new(file),
        hasher: Sha256::new(),
    };

    let stats = BlockDecompressor::from_config(&config)
        .pump(&mut reader, &mut sink)
        .await
        .map_err(|e| match e {
            OtaError::Io(io) => anyhow::Error::new(io).context("writing decoded image"),
            other => CliError::InvalidImage(other.to_string()).into(),
        })?;
    sink.writer
        .flush()
        .with_context(|| format!("flushing {}", args.output.display()))?;

    let report = UnpackReport {
        input: args.input.display().to_string(),
        output: args.output.display().to_string(),
        blocks: stats.blocks,
        bytes_in: stats.bytes_in,
        bytes_out: stats.bytes_out,
        sha256: hex::encode(sink.hasher.finalize()),
    };
    info!(blocks = report.blocks, bytes_out = report.bytes_out, "Image unpacked");

    output::print_unpack_report(&report, json);
    Ok(())
}
