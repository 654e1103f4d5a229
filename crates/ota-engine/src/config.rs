//! Deployment configuration for the update engine

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::codec::BlockByteOrder;
use crate::error::OtaError;
use crate::pump::{DEFAULT_MAX_BLOCK_SIZE, DEFAULT_MAX_DECOMPRESSED_BLOCK_SIZE};
use crate::scanner::ScannerLimits;
use crate::window::DEFAULT_DICTIONARY_SIZE;

/// Largest dictionary an LZ4 block may reference
pub const MAX_DICTIONARY_SIZE: usize = 64 * 1024;

/// Update engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Index listing scanned first
    pub primary_index_url: String,

    /// Index listing scanned when the primary yields nothing
    pub fallback_index_url: String,

    /// Bytes requested per read while scanning an index
    pub read_chunk_size: usize,

    /// Scanner memory bounds
    pub scanner: ScannerLimits,

    /// Largest accepted compressed block
    pub max_block_size: usize,

    /// Largest decompressed block
    pub max_decompressed_block_size: usize,

    /// Dictionary window shared with the packer
    pub dictionary_size: usize,

    /// Byte order of block length prefixes
    pub byte_order: BlockByteOrder,

    /// Confirm a pending image when its status is queried
    pub auto_confirm_on_status: bool,

    /// Delay between reporting success and restarting
    pub restart_delay_ms: u64,

    /// Time budget of each boot self-check
    pub self_check_timeout_secs: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            primary_index_url: "https://raspi00/fware/".to_string(),
            fallback_index_url: "https://raspi00/fware/obs/".to_string(),
            read_chunk_size: 4096,
            scanner: ScannerLimits::default(),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            max_decompressed_block_size: DEFAULT_MAX_DECOMPRESSED_BLOCK_SIZE,
            dictionary_size: DEFAULT_DICTIONARY_SIZE,
            byte_order: BlockByteOrder::Little,
            auto_confirm_on_status: true,
            restart_delay_ms: 500,
            self_check_timeout_secs: 10,
        }
    }
}

impl OtaConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, OtaError> {
        let config: OtaConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, OtaError> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), OtaError> {
        if self.primary_index_url.is_empty() {
            return Err(OtaError::InvalidConfig(
                "primary_index_url must not be empty".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(OtaError::InvalidConfig(
                "read_chunk_size must be non-zero".to_string(),
            ));
        }
        if self.max_block_size == 0 || u32::try_from(self.max_block_size).is_err() {
            return Err(OtaError::InvalidConfig(format!(
                "max_block_size {} out of range",
                self.max_block_size
            )));
        }
        if self.max_decompressed_block_size == 0 {
            return Err(OtaError::InvalidConfig(
                "max_decompressed_block_size must be non-zero".to_string(),
            ));
        }
        if self.dictionary_size == 0 || self.dictionary_size > MAX_DICTIONARY_SIZE {
            return Err(OtaError::InvalidConfig(format!(
                "dictionary_size {} must be within 1..={MAX_DICTIONARY_SIZE}",
                self.dictionary_size
            )));
        }
        self.scanner.validate()
    }

    /// Delay before restarting into the new image
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Per-check boot self-check budget
    pub fn self_check_timeout(&self) -> Duration {
        Duration::from_secs(self.self_check_timeout_secs)
    }

    /// Index URLs in scan order
    pub fn index_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_index_url.as_str())
            .chain((!self.fallback_index_url.is_empty()).then_some(self.fallback_index_url.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = OtaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dictionary_size, 16 * 1024);
        assert_eq!(config.restart_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_uses_defaults() -> Result<(), OtaError> {
        let config = OtaConfig::from_json_str(
            r#"{ "primary_index_url": "https://fw.example/", "byte_order": "big" }"#,
        )?;
        assert_eq!(config.primary_index_url, "https://fw.example/");
        assert_eq!(config.byte_order, BlockByteOrder::Big);
        assert_eq!(config.max_block_size, 4096);
        Ok(())
    }

    #[test]
    fn test_rejects_large_dictionary() {
        let result = OtaConfig::from_json_str(r#"{ "dictionary_size": 131072 }"#);
        assert!(matches!(result, Err(OtaError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let result = OtaConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(OtaError::Serialization(_))));
    }

    #[test]
    fn test_index_urls_skip_empty_fallback() {
        let config = OtaConfig {
            fallback_index_url: String::new(),
            ..Default::default()
        };
        assert_eq!(config.index_urls().count(), 1);
        assert_eq!(OtaConfig::default().index_urls().count(), 2);
    }
}
