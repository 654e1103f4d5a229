//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use ota_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_some, must_with};

#[cfg(feature = "mock")]
pub use crate::must::{must_async, must_within};

#[cfg(feature = "mock")]
pub use crate::mock::{
    ChunkedReader, FlashEvent, MockFlash, MockSelfCheck, MockTransport, RecordingAcks,
};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{
    FALLBACK_INDEX, PRIMARY_INDEX, TEST_PROJECT, firmware_image, index_html, pack_image,
    pack_image_with, raw_block,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
