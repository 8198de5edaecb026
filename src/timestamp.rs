//! UTC timestamps as ISO-8601 strings with microsecond resolution.
//!
//! Timestamps are kept as strings throughout the crate: the serialised form
//! sorts lexicographically in chronological order, which is what both the
//! change feed and the as-of-timestamp lookups rely on.

use chrono::Utc;

use crate::error::Error;

const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current UTC wall-clock time, e.g. `2018-08-05T23:02:29.392990Z`.
pub fn utc_now() -> String {
    Utc::now().format(FORMAT).to_string()
}

/// Validates a caller-supplied timestamp and normalises its resolution.
///
/// Accepted forms, from coarsest to finest:
/// `YYYY-MM-DD`, `YYYY-MM-DDTHH:MMZ`, `YYYY-MM-DDTHH:MM:SSZ` and
/// `YYYY-MM-DDTHH:MM:SS.ffffffZ` (1 to 6 fractional digits). Day-resolution
/// inputs are padded to the end of that day so that "as of 2018-09-17" means
/// "anything recorded on or before that date".
pub fn normalize(input: &str) -> Result<String, Error> {
    if parse(input) {
        if input.len() == 10 {
            Ok(format!("{}T23:59:59.999999Z", input))
        } else {
            Ok(input.to_string())
        }
    } else {
        Err(Error::Validation(format!(
            "invalid format for timestamp: {}: must be an UTC ISO-8601 instant",
            input
        )))
    }
}

fn parse(input: &str) -> bool {
    let bytes = input.as_bytes();
    if !date_prefix(bytes) {
        return false;
    }
    if bytes.len() == 10 {
        return true;
    }
    // THH:MM
    if bytes.len() < 16 || bytes[10] != b'T' || !two_digits(bytes, 11) || bytes[13] != b':' {
        return false;
    }
    if !two_digits(bytes, 14) {
        return false;
    }
    if bytes.len() == 17 {
        return bytes[16] == b'Z';
    }
    // :SS
    if bytes.len() < 20 || bytes[16] != b':' || !two_digits(bytes, 17) {
        return false;
    }
    if bytes.len() == 20 {
        return bytes[19] == b'Z';
    }
    // .f{1,6}
    if bytes[19] != b'.' || bytes[bytes.len() - 1] != b'Z' {
        return false;
    }
    let fraction = &bytes[20..bytes.len() - 1];
    !fraction.is_empty() && fraction.len() <= 6 && fraction.iter().all(u8::is_ascii_digit)
}

fn date_prefix(bytes: &[u8]) -> bool {
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && two_digits(bytes, 5)
        && bytes[7] == b'-'
        && two_digits(bytes, 8)
}

fn two_digits(bytes: &[u8], at: usize) -> bool {
    bytes[at].is_ascii_digit() && bytes[at + 1].is_ascii_digit()
}
