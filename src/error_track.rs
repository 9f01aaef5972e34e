// ============================================================================
// ERROR TRACK TABLE
// ============================================================================
// Failure counts per (fingerprint, error code) pair. A linear array with
// append-only slots: lookups scan the occupied prefix, new pairs go at the
// end, and once the array is full new pairs are dropped.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::constants::*;
use crate::types::{Fingerprint, Timestamp};

// ----------------------------------------------------------------------------
// ErrorCode - Packed SQLSTATE
// ----------------------------------------------------------------------------

const SQLSTATE_LEN: usize = 5;
const SIX_BITS: u32 = 0x3F;

/// Five-character SQLSTATE packed six bits per character, first character
/// in the lowest bits. `0` means "no code" and is never tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ErrorCode(u32);

impl ErrorCode {
    pub const NONE: ErrorCode = ErrorCode(0);

    #[inline]
    pub const fn from_raw(code: u32) -> Self {
        Self(code)
    }

    /// Pack a SQLSTATE such as `"23505"`. Returns `None` unless the text is
    /// exactly five digits or uppercase ASCII letters.
    pub fn from_sqlstate(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() != SQLSTATE_LEN {
            return None;
        }
        let mut code = 0u32;
        for (i, &b) in bytes.iter().enumerate() {
            if !(b.is_ascii_digit() || b.is_ascii_uppercase()) {
                return None;
            }
            code |= ((b - b'0') as u32 & SIX_BITS) << (6 * i);
        }
        Some(Self(code))
    }

    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for i in 0..SQLSTATE_LEN {
            let six = (self.0 >> (6 * i)) & SIX_BITS;
            write!(f, "{}", (b'0' + six as u8) as char)?;
        }
        Ok(())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ----------------------------------------------------------------------------
// The Table
// ----------------------------------------------------------------------------

/// Failure count for one (fingerprint, error code) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorTrackEntry {
    pub fingerprint: Fingerprint,
    pub error_code: ErrorCode,
    pub count: u64,
    pub last_error_at: Timestamp,
}

struct ErrorInner {
    entries: Box<[ErrorTrackEntry]>,
    num_entries: usize,
    full_warned: bool,
}

impl ErrorInner {
    fn position(&self, fingerprint: Fingerprint, code: ErrorCode) -> Option<usize> {
        self.entries[..self.num_entries]
            .iter()
            .position(|e| e.fingerprint == fingerprint && e.error_code == code)
    }
}

/// Bounded failure table, scanned linearly.
pub struct ErrorTrackTable {
    inner: RwLock<ErrorInner>,
}

impl ErrorTrackTable {
    /// Allocate `capacity` zeroed slots. A zero capacity leaves the table
    /// unallocated and every operation a no-op.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(ErrorInner {
                entries: vec![ErrorTrackEntry::default(); capacity].into_boxed_slice(),
                num_entries: 0,
                full_warned: false,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ERROR_BUFFER_SIZE)
    }

    /// Count one failure of `fingerprint` with `code`. Ignored when either
    /// key is zero, dropped when the pair is new and the table is full.
    pub fn record(&self, fingerprint: Fingerprint, code: ErrorCode) {
        if fingerprint.is_none() || code.is_none() {
            return;
        }
        let now = Timestamp::now();
        let mut inner = self.inner.write();

        if let Some(idx) = inner.position(fingerprint, code) {
            let entry = &mut inner.entries[idx];
            entry.count += 1;
            entry.last_error_at = now;
            return;
        }

        let idx = inner.num_entries;
        if idx >= inner.entries.len() {
            if !inner.full_warned && !inner.entries.is_empty() {
                inner.full_warned = true;
                warn!(
                    target: "querytrace::capacity",
                    capacity = inner.entries.len(),
                    fingerprint = %fingerprint,
                    error_code = %code,
                    "Error track table full, new error pairs are dropped"
                );
            }
            return;
        }

        inner.entries[idx] = ErrorTrackEntry {
            fingerprint,
            error_code: code,
            count: 1,
            last_error_at: now,
        };
        inner.num_entries += 1;
    }

    /// Entry for the pair, if tracked
    pub fn get(&self, fingerprint: Fingerprint, code: ErrorCode) -> Option<ErrorTrackEntry> {
        let inner = self.inner.read();
        inner.position(fingerprint, code).map(|idx| inner.entries[idx])
    }

    /// Tracked pairs
    pub fn count(&self) -> usize {
        self.inner.read().num_entries
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Tracked pairs in insertion order
    pub fn snapshot(&self) -> Vec<ErrorTrackEntry> {
        let inner = self.inner.read();
        inner.entries[..inner.num_entries].to_vec()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.fill(ErrorTrackEntry::default());
        inner.num_entries = 0;
        inner.full_warned = false;
    }
}

impl std::fmt::Debug for ErrorTrackTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTrackTable")
            .field("capacity", &self.capacity())
            .field("entries", &self.count())
            .finish()
    }
}
