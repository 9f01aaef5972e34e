// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// Value types shared by every structure: timestamps, the fingerprint identity
// and the fixed-width context tags stored inline in pre-allocated slots.
// ============================================================================

use std::fmt::{self, Debug, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

// ----------------------------------------------------------------------------
// Timestamp - Nanosecond Precision Time Handling
// ----------------------------------------------------------------------------

/// Wall-clock timestamp in nanoseconds since Unix epoch.
/// The zero value doubles as "never set" inside zeroed slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Zero timestamp (Unix epoch)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a new timestamp from nanoseconds since Unix epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a new timestamp from milliseconds since Unix epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Get the current timestamp with nanosecond precision
    #[inline]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// True for the zeroed "never set" value
    #[inline]
    pub const fn is_epoch(&self) -> bool {
        self.0 == 0
    }

    /// Calculate duration between two timestamps
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    /// Convert to chrono DateTime<Utc>
    #[inline]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.6f UTC"))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        let duration = st.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }
}

// ----------------------------------------------------------------------------
// Fingerprint - Identity of a Normalized Query Shape
// ----------------------------------------------------------------------------

/// 64-bit identity of a normalized query. The value `0` is reserved for
/// "no identity" and is never stored as a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Reserved "no identity" value
    pub const NONE: Fingerprint = Fingerprint(0);

    #[inline]
    pub const fn from_raw(hash: u64) -> Self {
        Self(hash)
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Start slot of the probe sequence in a table of `table_size` slots
    #[inline]
    pub const fn start_slot(&self, table_size: usize) -> usize {
        (self.0 % table_size as u64) as usize
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Fingerprint {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<Fingerprint> for u64 {
    #[inline]
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

// ----------------------------------------------------------------------------
// TagBuf - Fixed-Width Inline Context Tag
// ----------------------------------------------------------------------------

/// Inline, fixed-width UTF-8 string. Holds at most `N - 1` bytes (the last
/// byte mirrors the terminator slot of the shared-memory layout) and never
/// allocates. Truncation happens on a character boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TagBuf<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> TagBuf<N> {
    /// Maximum number of text bytes stored
    pub const MAX_LEN: usize = N.saturating_sub(1);

    pub const fn new() -> Self {
        Self { bytes: [0; N], len: 0 }
    }

    /// Build a tag from `value`, truncated to fit
    pub fn from_str_truncated(value: &str) -> Self {
        let mut tag = Self::new();
        tag.set(value);
        tag
    }

    /// Overwrite the tag with `value`, truncated to fit
    pub fn set(&mut self, value: &str) {
        let mut end = value.len().min(Self::MAX_LEN);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.bytes[..end].copy_from_slice(&value.as_bytes()[..end]);
        self.bytes[end..].fill(0);
        self.len = end;
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
        self.len = 0;
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for TagBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Debug for TagBuf<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> Display for TagBuf<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> Serialize for TagBuf<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_none() {
        assert!(Fingerprint::NONE.is_none());
        assert!(!Fingerprint::from_raw(7).is_none());
        assert_eq!(Fingerprint::default(), Fingerprint::NONE);
    }

    #[test]
    fn test_fingerprint_start_slot_wraps() {
        let fp = Fingerprint::from_raw(20_005);
        assert_eq!(fp.start_slot(20_000), 5);
        assert_eq!(format!("{}", Fingerprint::from_raw(0xabc)), "0000000000000abc");
    }

    #[test]
    fn test_tag_truncates_to_width() {
        let tag: TagBuf<8> = TagBuf::from_str_truncated("application");
        assert_eq!(tag.as_str(), "applica");
        assert_eq!(tag.len(), 7);
    }

    #[test]
    fn test_tag_truncates_on_char_boundary() {
        // "é" is two bytes; a cut at byte 7 would split it
        let tag: TagBuf<8> = TagBuf::from_str_truncated("abcdeé!");
        assert_eq!(tag.as_str(), "abcde");
    }

    #[test]
    fn test_tag_overwrite_shorter_value() {
        let mut tag: TagBuf<16> = TagBuf::from_str_truncated("long-value-here");
        tag.set("ab");
        assert_eq!(tag.as_str(), "ab");
        tag.clear();
        assert!(tag.is_empty());
    }

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = Timestamp::now();
        std::thread::sleep(Duration::from_millis(2));
        let ts2 = Timestamp::now();
        assert!(ts2 > ts1);
        assert!(Timestamp::default().is_epoch());
        assert_eq!(Timestamp::from_millis(1500).as_millis(), 1500);
    }
}
