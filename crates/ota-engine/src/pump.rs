//! Block-framed streaming decompression
//!
//! The firmware payload is a sequence of `(u32 length, payload[length])`
//! frames. Each payload is decoded against the rolling dictionary of earlier
//! output, written to a [`BlockSink`], then appended to the dictionary.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info};

use crate::codec::{BlockByteOrder, BlockDecoder, Lz4BlockCodec};
use crate::config::OtaConfig;
use crate::error::{CodecError, OtaError};
use crate::window::DictionaryWindow;

/// Largest accepted compressed block
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4096;

/// Largest decompressed block the output buffer holds
pub const DEFAULT_MAX_DECOMPRESSED_BLOCK_SIZE: usize = 4096;

/// Destination of decompressed firmware bytes
pub trait BlockSink {
    /// Append one decompressed block
    fn write_block(&mut self, data: &[u8]) -> Result<(), OtaError>;
}

impl BlockSink for Vec<u8> {
    fn write_block(&mut self, data: &[u8]) -> Result<(), OtaError> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Totals of one pump run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Blocks decoded and written
    pub blocks: u64,
    /// Compressed payload bytes consumed, excluding length prefixes
    pub bytes_in: u64,
    /// Decompressed bytes written
    pub bytes_out: u64,
}

/// Stream decoder holding the dictionary window and block buffers
pub struct BlockDecompressor<D: BlockDecoder = Lz4BlockCodec> {
    decoder: D,
    window: DictionaryWindow,
    byte_order: BlockByteOrder,
    max_block_size: usize,
    compressed: Vec<u8>,
    decompressed: Vec<u8>,
}

impl BlockDecompressor<Lz4BlockCodec> {
    /// LZ4 decompressor sized from `config`
    pub fn from_config(config: &OtaConfig) -> Self {
        Self::with_decoder(
            Lz4BlockCodec,
            config.dictionary_size,
            config.max_block_size,
            config.max_decompressed_block_size,
            config.byte_order,
        )
    }
}

impl<D: BlockDecoder> BlockDecompressor<D> {
    /// Create a decompressor around a custom decoder
    pub fn with_decoder(
        decoder: D,
        dictionary_size: usize,
        max_block_size: usize,
        max_decompressed_block_size: usize,
        byte_order: BlockByteOrder,
    ) -> Self {
        Self {
            decoder,
            window: DictionaryWindow::new(dictionary_size),
            byte_order,
            max_block_size,
            compressed: vec![0u8; max_block_size],
            decompressed: vec![0u8; max_decompressed_block_size],
        }
    }

    /// Dictionary window as of the last decoded block
    pub fn window(&self) -> &DictionaryWindow {
        &self.window
    }

    /// Read, decode and write blocks until the stream ends.
    ///
    /// Any truncated frame, oversized length, decode error or sink error ends
    /// the run with an error; nothing from the failing block reaches the sink.
    /// A stream that ends before the first block is [`OtaError::EmptyImage`].
    pub async fn pump<R, S>(&mut self, reader: &mut R, sink: &mut S) -> Result<PumpStats, OtaError>
    where
        R: AsyncRead + Unpin + ?Sized,
        S: BlockSink + ?Sized,
    {
        let mut stats = PumpStats::default();
        info!("Starting OTA read loop");

        loop {
            let mut header = [0u8; 4];
            let got = read_full(reader, &mut header).await?;
            if got == 0 {
                info!(blocks = stats.blocks, bytes = stats.bytes_out, "End of OTA data stream");
                break;
            }
            if got != header.len() {
                error!(got, "Failed to read block size");
                return Err(OtaError::TruncatedHeader { got });
            }

            let declared = self.byte_order.read_u32(header) as usize;
            if declared > self.max_block_size {
                error!(declared, max = self.max_block_size, "Block too large");
                return Err(OtaError::BlockTooLarge {
                    declared,
                    max: self.max_block_size,
                });
            }
            if declared == 0 {
                error!(block = stats.blocks, "Zero-length block");
                return Err(OtaError::Decompression(CodecError::Corrupt(
                    "zero-length block".to_string(),
                )));
            }

            let payload = self
                .compressed
                .get_mut(..declared)
                .ok_or(OtaError::BlockTooLarge {
                    declared,
                    max: self.max_block_size,
                })?;
            let got = read_full(reader, payload).await?;
            if got != declared {
                error!(expected = declared, got, "Incomplete block read");
                return Err(OtaError::TruncatedBlock {
                    expected: declared,
                    got,
                });
            }

            let produced = self
                .decoder
                .decode(payload, &mut self.decompressed, self.window.as_slice())
                .inspect_err(|e| error!(block = stats.blocks, "Block decompression failed: {e}"))?;
            let output = self.decompressed.get(..produced).unwrap_or_default();

            sink.write_block(output)?;
            self.window.extend(output);

            stats.blocks += 1;
            stats.bytes_in += declared as u64;
            stats.bytes_out += produced as u64;
            debug!(
                block = stats.blocks,
                compressed = declared,
                decompressed = produced,
                "Block written"
            );
        }

        if stats.blocks == 0 {
            error!("No OTA data was written");
            return Err(OtaError::EmptyImage);
        }
        Ok(stats)
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes placed in `buf`.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, OtaError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        let n = reader
            .read(rest)
            .await
            .map_err(|e| OtaError::Transport(format!("read failed: {e}")))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
