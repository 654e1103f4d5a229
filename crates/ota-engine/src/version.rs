//! Firmware version tuples and the pin-aware comparator
//!
//! Versions are four signed components `[major, minor, patch, build]` parsed
//! from `vMAJOR.MINOR.PATCH-BUILD`. A slot holding `-1` was not present in the
//! source text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Marker for a component that was absent or unparsed
pub const UNSET: i32 = -1;

/// Number of components in a version tuple
pub const SLOTS: usize = 4;

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"v([0-9]+)(?:\.([0-9]+)(?:\.([0-9]+)(?:-([0-9]+))?)?)?").ok())
        .as_ref()
}

/// Ordered four-component version key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTuple([i32; SLOTS]);

impl VersionTuple {
    /// Tuple with every slot unset
    pub const UNSET: VersionTuple = VersionTuple([UNSET; SLOTS]);

    /// Build a tuple from explicit components
    pub const fn new(major: i32, minor: i32, patch: i32, build: i32) -> Self {
        Self([major, minor, patch, build])
    }

    /// Parse the first `vD[.D[.D[-D]]]` occurrence in `text`.
    ///
    /// Missing trailing components are set to [`UNSET`]. Returns `None` when
    /// the text holds no version at all or a component overflows `i32`; the
    /// absence of a version in arbitrary text is expected, so this never errors.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = version_pattern()?.captures(text)?;
        let mut slots = [UNSET; SLOTS];
        for (slot, value) in slots.iter_mut().enumerate() {
            if let Some(m) = caps.get(slot + 1) {
                *value = m.as_str().parse().ok()?;
            }
        }
        Some(Self(slots))
    }

    /// Raw components
    pub fn components(&self) -> [i32; SLOTS] {
        self.0
    }

    /// Major component
    pub fn major(&self) -> i32 {
        self.0[0]
    }

    /// Build component
    pub fn build(&self) -> i32 {
        self.0[3]
    }

    /// Whether every slot is unset
    pub fn is_unset(&self) -> bool {
        self.0.iter().all(|&v| v == UNSET)
    }
}

impl Default for VersionTuple {
    fn default() -> Self {
        Self::UNSET
    }
}

impl std::fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [major, minor, patch, build] = self.0;
        if major == UNSET {
            return write!(f, "unset");
        }
        write!(f, "v{major}")?;
        if minor != UNSET {
            write!(f, ".{minor}")?;
            if patch != UNSET {
                write!(f, ".{patch}")?;
                if build != UNSET {
                    write!(f, "-{build}")?;
                }
            }
        }
        Ok(())
    }
}

/// Per-component exact-match flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinMask([bool; SLOTS]);

impl PinMask {
    /// Nothing pinned: plain ordering comparison
    pub const NONE: PinMask = PinMask([false; SLOTS]);

    /// Every component pinned
    pub const ALL: PinMask = PinMask([true; SLOTS]);

    /// Build a mask from explicit flags
    pub const fn new(flags: [bool; SLOTS]) -> Self {
        Self(flags)
    }

    /// Pin every slot of `version` that was actually parsed
    pub fn from_parsed(version: &VersionTuple) -> Self {
        let mut flags = [false; SLOTS];
        for (flag, value) in flags.iter_mut().zip(version.0) {
            *flag = value != UNSET;
        }
        Self(flags)
    }

    /// Whether a given slot is pinned
    pub fn is_pinned(&self, slot: usize) -> bool {
        self.0.get(slot).copied().unwrap_or(false)
    }

    /// Whether any slot is pinned
    pub fn any(&self) -> bool {
        self.0.iter().any(|&p| p)
    }
}

/// Decide whether `candidate` should replace `best`.
///
/// Any pinned slot that differs rejects, whatever the other slots hold. The
/// unpinned slots then decide by ordering, major first; ties move on. A full
/// tie rejects, so the same version is never preferred over itself.
pub fn is_higher(candidate: &VersionTuple, best: &VersionTuple, pins: &PinMask) -> bool {
    let slots = || candidate.0.iter().zip(best.0.iter()).zip(pins.0.iter());

    if slots().any(|((new, old), &pinned)| pinned && new != old) {
        return false;
    }

    for ((new, old), _) in slots().filter(|(_, pinned)| !**pinned) {
        if new != old {
            return new > old;
        }
    }
    false
}
