//! Incremental firmware index scanner
//!
//! Finds `href="<project>_vMAJ.MIN.PAT[-BUILD]...bin[.lz4]"` entries in a
//! directory listing delivered in arbitrarily sized chunks. Only a bounded
//! carryover of the previous chunk is kept, so the listing is never held in
//! memory as a whole and never re-scanned from the start.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::error::OtaError;
use crate::version::{PinMask, UNSET, VersionTuple, is_higher};
use crate::window::RollingWindow;

/// Bytes surrounding a filename in a match: `href="` and the closing quote
pub const MATCH_OVERHEAD: usize = 7;

/// How candidates are compared to the reference version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Newest version strictly above the reference
    Latest,
    /// Newest version matching every component given in the reference
    Specific,
}

/// Memory bounds of a scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerLimits {
    /// Bytes of the previous chunk re-presented with the next one
    pub carryover_size: usize,
    /// Longest accepted filename
    pub max_filename_len: usize,
}

impl Default for ScannerLimits {
    fn default() -> Self {
        Self {
            carryover_size: 256,
            max_filename_len: 128,
        }
    }
}

impl ScannerLimits {
    /// Check that every acceptable match fits in carryover plus one byte.
    ///
    /// That bound is what makes the scan result independent of chunk sizes.
    pub fn validate(&self) -> Result<(), OtaError> {
        if self.max_filename_len == 0 {
            return Err(OtaError::InvalidConfig(
                "max_filename_len must be non-zero".to_string(),
            ));
        }
        if self.carryover_size + 1 < self.max_filename_len + MATCH_OVERHEAD {
            return Err(OtaError::InvalidConfig(format!(
                "carryover_size {} cannot hold a {}-byte filename match",
                self.carryover_size, self.max_filename_len
            )));
        }
        Ok(())
    }
}

/// Best match seen so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Filename as listed in the index
    pub filename: String,
    /// Version parsed from the filename
    pub version: VersionTuple,
}

#[derive(Debug)]
struct ScanState {
    reference: VersionTuple,
    pins: PinMask,
    best: Option<Candidate>,
    max_filename_len: usize,
}

impl ScanState {
    fn best_version(&self) -> &VersionTuple {
        self.best
            .as_ref()
            .map(|c| &c.version)
            .unwrap_or(&self.reference)
    }

    fn consider(&mut self, filename: &[u8], version: [Option<&[u8]>; 4]) {
        if filename.len() > self.max_filename_len {
            debug!(len = filename.len(), "Skipping over-long firmware filename");
            return;
        }
        let Ok(filename) = std::str::from_utf8(filename) else {
            debug!("Skipping non UTF-8 firmware filename");
            return;
        };
        let Some(candidate) = parse_components(version) else {
            debug!(filename, "Skipping filename with unparsable version");
            return;
        };

        info!(filename, version = %candidate, "Evaluating candidate");

        if is_higher(&candidate, self.best_version(), &self.pins) {
            self.best = Some(Candidate {
                filename: filename.to_owned(),
                version: candidate,
            });
        }
    }
}

fn parse_components(parts: [Option<&[u8]>; 4]) -> Option<VersionTuple> {
    let mut slots = [UNSET; 4];
    for (slot, part) in slots.iter_mut().zip(parts) {
        if let Some(bytes) = part {
            *slot = std::str::from_utf8(bytes).ok()?.parse().ok()?;
        }
    }
    let [major, minor, patch, build] = slots;
    Some(VersionTuple::new(major, minor, patch, build))
}

/// Chunk-boundary-safe scanner over a firmware directory listing
#[derive(Debug)]
pub struct IndexScanner {
    pattern: Regex,
    carryover: RollingWindow,
    scratch: Vec<u8>,
    state: ScanState,
}

impl IndexScanner {
    /// Create a scanner with default limits
    pub fn new(project_id: &str, reference: &str, mode: ScanMode) -> Result<Self, OtaError> {
        Self::with_limits(project_id, reference, mode, ScannerLimits::default())
    }

    /// Create a scanner with explicit memory bounds.
    ///
    /// In [`ScanMode::Specific`] every component present in `reference` is
    /// pinned. A reference with no parsable version pins all slots to unset,
    /// which no listed file can match.
    pub fn with_limits(
        project_id: &str,
        reference: &str,
        mode: ScanMode,
        limits: ScannerLimits,
    ) -> Result<Self, OtaError> {
        limits.validate()?;

        let pattern = Regex::new(&format!(
            r#"href="({}_v([0-9]+)\.([0-9]+)\.([0-9]+)(?:-([0-9]+))?(?-u:[^"])*\.bin(?:\.lz4)?)""#,
            regex::escape(project_id)
        ))
        .map_err(|e| OtaError::InvalidConfig(format!("firmware filename pattern: {e}")))?;

        let parsed = VersionTuple::parse(reference);
        let reference_version = parsed.unwrap_or(VersionTuple::UNSET);
        let pins = match (mode, parsed) {
            (ScanMode::Latest, _) => PinMask::NONE,
            (ScanMode::Specific, Some(version)) => PinMask::from_parsed(&version),
            (ScanMode::Specific, None) => PinMask::ALL,
        };

        debug!(
            project_id,
            reference = %reference_version,
            ?mode,
            "Firmware scanner created"
        );

        Ok(Self {
            pattern,
            carryover: RollingWindow::new(limits.carryover_size),
            scratch: Vec::new(),
            state: ScanState {
                reference: reference_version,
                pins,
                best: None,
                max_filename_len: limits.max_filename_len,
            },
        })
    }

    /// Scan the carryover plus `chunk` for firmware entries.
    ///
    /// Matches are visited left to right without overlap. Afterwards only the
    /// bytes after the last match, at most the carryover size, are retained
    /// for the next call, so every listed file is evaluated once.
    pub fn ingest_chunk(&mut self, chunk: &[u8]) {
        self.scratch.clear();
        self.scratch.extend_from_slice(self.carryover.as_slice());
        self.scratch.extend_from_slice(chunk);

        let mut consumed = 0;
        for caps in self.pattern.captures_iter(&self.scratch) {
            if let Some(whole) = caps.get(0) {
                consumed = whole.end();
            }
            let Some(filename) = caps.get(1) else {
                continue;
            };
            let version = [
                caps.get(2).map(|m| m.as_bytes()),
                caps.get(3).map(|m| m.as_bytes()),
                caps.get(4).map(|m| m.as_bytes()),
                caps.get(5).map(|m| m.as_bytes()),
            ];
            self.state.consider(filename.as_bytes(), version);
        }

        self.carryover.clear();
        self.carryover
            .extend(self.scratch.get(consumed..).unwrap_or_default());
    }

    /// Feed an entire stream through the scanner in `chunk_size` reads.
    ///
    /// Returns the number of bytes scanned.
    pub async fn ingest_reader<R>(&mut self, reader: &mut R, chunk_size: usize) -> Result<u64, OtaError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if let Some(chunk) = buf.get(..n) {
                self.ingest_chunk(chunk);
            }
            total += n as u64;
        }
        Ok(total)
    }

    /// Best filename found so far
    pub fn target_file(&self) -> Option<&str> {
        self.state.best.as_ref().map(|c| c.filename.as_str())
    }

    /// Best candidate found so far
    pub fn candidate(&self) -> Option<&Candidate> {
        self.state.best.as_ref()
    }

    /// Version every new candidate is compared against
    pub fn best_version(&self) -> &VersionTuple {
        self.state.best_version()
    }

    /// Reference version parsed at construction
    pub fn reference(&self) -> &VersionTuple {
        &self.state.reference
    }

    /// Active pin mask
    pub fn pins(&self) -> &PinMask {
        &self.state.pins
    }

    /// Bytes currently retained between chunks
    pub fn carryover_len(&self) -> usize {
        self.carryover.len()
    }
}
