//! Block codec used by the firmware stream
//!
//! Every block is an LZ4 block whose back-references may reach into the
//! previous `dictionary_size` bytes of decompressed output. The decoder seam is
//! a trait so deployments can plug in a different block format with the same
//! dictionary contract.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::window::DictionaryWindow;

/// Raw bytes per block used by the packer; worst-case LZ4 output stays under
/// the default 4 KiB block limit
pub const DEFAULT_CHUNK_SIZE: usize = 3584;

/// Byte order of the `u32` block length prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockByteOrder {
    /// Little-endian, the native order of the target MCUs
    #[default]
    Little,
    /// Big-endian
    Big,
}

impl BlockByteOrder {
    /// Decode a length prefix
    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            BlockByteOrder::Little => u32::from_le_bytes(bytes),
            BlockByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Encode a length prefix
    pub fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            BlockByteOrder::Little => value.to_le_bytes(),
            BlockByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Decodes one compressed block against a history dictionary
pub trait BlockDecoder: Send {
    /// Decode `input` into `output`, resolving back-references through
    /// `dictionary`, and return the number of bytes produced.
    fn decode(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        dictionary: &[u8],
    ) -> Result<usize, CodecError>;
}

/// LZ4 block format with an external dictionary
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4BlockCodec;

impl BlockDecoder for Lz4BlockCodec {
    fn decode(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        dictionary: &[u8],
    ) -> Result<usize, CodecError> {
        use lz4_flex::block::DecompressError;

        lz4_flex::block::decompress_into_with_dict(input, output, dictionary).map_err(|e| match e {
            DecompressError::OutputTooSmall { .. } => CodecError::OutputOverflow {
                capacity: output.len(),
            },
            other => CodecError::Corrupt(other.to_string()),
        })
    }
}

/// Produces the framed block stream the device consumes.
///
/// Mirrors the decoder's window policy exactly: after every block the raw
/// (uncompressed) chunk is appended to the dictionary.
#[derive(Debug)]
pub struct BlockEncoder {
    window: DictionaryWindow,
    chunk_size: usize,
    byte_order: BlockByteOrder,
}

impl BlockEncoder {
    /// Create an encoder.
    ///
    /// Fails when the worst-case LZ4 expansion of a `chunk_size` chunk would
    /// exceed `max_block_size`, since the device rejects such blocks.
    pub fn new(
        dictionary_size: usize,
        chunk_size: usize,
        max_block_size: usize,
        byte_order: BlockByteOrder,
    ) -> Result<Self, CodecError> {
        let worst_case = lz4_flex::block::get_maximum_output_size(chunk_size);
        if chunk_size == 0 || worst_case > max_block_size || max_block_size > u32::MAX as usize {
            return Err(CodecError::ChunkTooLarge {
                chunk: chunk_size,
                max: max_block_size,
            });
        }
        Ok(Self {
            window: DictionaryWindow::new(dictionary_size),
            chunk_size,
            byte_order,
        })
    }

    /// Compress one raw chunk and append the framed block to `out`
    pub fn encode_block(&mut self, raw: &[u8], out: &mut Vec<u8>) {
        let compressed = lz4_flex::block::compress_with_dict(raw, self.window.as_slice());
        // chunk_size bounds the compressed length well below u32::MAX
        let len = u32::try_from(compressed.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&self.byte_order.write_u32(len));
        out.extend_from_slice(&compressed);
        self.window.extend(raw);
    }

    /// Frame a whole image
    pub fn encode_image(&mut self, image: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(image.len() / 2 + 64);
        for chunk in image.chunks(self.chunk_size) {
            self.encode_block(chunk, &mut out);
        }
        out
    }

    /// Raw bytes per block
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encoder-side dictionary
    pub fn window(&self) -> &DictionaryWindow {
        &self.window
    }
}
