// ============================================================================
// QUERY FINGERPRINTING
// ============================================================================
// Normalizes raw query text to its structural shape and hashes it to a 64-bit
// identity with FNV-1a. No collision handling happens here; the stats table
// treats colliding shapes as one query.
// ============================================================================

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::types::Fingerprint;

/// Placeholder emitted for literals and digit runs
const PLACEHOLDER: char = '?';

#[inline]
fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Reduce a query to its canonical shape.
///
/// - a single-quoted literal, delimiters included, becomes one `?`;
///   an unterminated literal swallows the rest of the input
/// - each maximal run of ASCII digits becomes one `?`, also inside
///   identifiers (`t1` and `t2` normalize alike)
/// - whitespace runs collapse to one space, trailing whitespace is trimmed
/// - ASCII letters are lowercased, everything else is copied as is
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut in_number = false;
    let mut prev_space = false;

    for c in text.chars() {
        if c == '\'' {
            in_string = !in_string;
            in_number = false;
            if !in_string {
                out.push(PLACEHOLDER);
                prev_space = false;
            }
            continue;
        }

        if in_string {
            continue;
        }

        if c.is_ascii_digit() {
            if !in_number {
                out.push(PLACEHOLDER);
                in_number = true;
                prev_space = false;
            }
            continue;
        }
        in_number = false;

        if is_space(c) {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
            continue;
        }

        out.push(c.to_ascii_lowercase());
        prev_space = false;
    }

    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// FNV-1a over the bytes of already-normalized text
#[inline]
pub fn fingerprint_normalized(canonical: &str) -> Fingerprint {
    let mut hasher = FnvHasher::default();
    hasher.write(canonical.as_bytes());
    Fingerprint::from_raw(hasher.finish())
}

/// Fingerprint raw query text. Empty input has no identity.
pub fn fingerprint(text: &str) -> Fingerprint {
    if text.is_empty() {
        return Fingerprint::NONE;
    }
    fingerprint_normalized(&normalize(text))
}

/// Fingerprint text that may be absent
#[inline]
pub fn fingerprint_opt(text: Option<&str>) -> Fingerprint {
    text.map(fingerprint).unwrap_or(Fingerprint::NONE)
}
