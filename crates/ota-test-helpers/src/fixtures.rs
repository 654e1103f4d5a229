//! Index listings and packed firmware images for tests.

use ota_engine::codec::{BlockByteOrder, BlockEncoder, DEFAULT_CHUNK_SIZE};
use ota_engine::pump::DEFAULT_MAX_BLOCK_SIZE;
use ota_engine::window::DEFAULT_DICTIONARY_SIZE;

/// Project identifier used across the test suites
pub const TEST_PROJECT: &str = "PROJ";

/// Primary index URL used across the test suites
pub const PRIMARY_INDEX: &str = "https://fw.test/fware/";

/// Fallback index URL used across the test suites
pub const FALLBACK_INDEX: &str = "https://fw.test/fware/obs/";

/// Render an autoindex-style HTML directory listing of `names`
pub fn index_html(names: &[&str]) -> String {
    let mut html = String::from(
        "<html>\r\n<head><title>Index of /fware/</title></head>\r\n<body>\r\n<h1>Index of /fware/</h1><hr><pre><a href=\"../\">../</a>\r\n",
    );
    for (i, name) in names.iter().enumerate() {
        html.push_str(&format!(
            "<a href=\"{name}\">{name}</a>{pad}0{day}-Sep-2025 10:{i:02}  {size}\r\n",
            pad = " ".repeat(52usize.saturating_sub(name.len()).max(1)),
            day = 1 + i % 9,
            size = 700_000 + i * 4096,
        ));
    }
    html.push_str("</pre><hr></body>\r\n</html>\r\n");
    html
}

/// Deterministic firmware-like image: repeated records with a varying tail,
/// so blocks compress and back-references cross block boundaries
pub fn firmware_image(len: usize, seed: u8) -> Vec<u8> {
    let record: Vec<u8> = (0u8..64).map(|b| b.wrapping_mul(3).wrapping_add(seed)).collect();
    let mut image = Vec::with_capacity(len);
    let mut counter = u32::from(seed);
    while image.len() < len {
        image.extend_from_slice(&record);
        image.extend_from_slice(&counter.to_le_bytes());
        counter = counter.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    }
    image.truncate(len);
    image
}

/// Pack `raw` with the default dictionary and block limits
pub fn pack_image(raw: &[u8]) -> Vec<u8> {
    pack_image_with(raw, DEFAULT_DICTIONARY_SIZE, DEFAULT_CHUNK_SIZE)
}

/// Pack `raw` with an explicit dictionary size and raw chunk size.
///
/// # Panics
///
/// Panics if `chunk_size` cannot fit the default block limit.
pub fn pack_image_with(raw: &[u8], dictionary_size: usize, chunk_size: usize) -> Vec<u8> {
    match BlockEncoder::new(
        dictionary_size,
        chunk_size,
        DEFAULT_MAX_BLOCK_SIZE,
        BlockByteOrder::Little,
    ) {
        Ok(mut encoder) => encoder.encode_image(raw),
        Err(e) => panic!("pack_image_with: {e}"),
    }
}

/// Frame a single block with an explicit declared length and payload
pub fn raw_block(declared: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = declared.to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}
