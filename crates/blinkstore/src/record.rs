//! On-disk record codec
//!
//! One record per line:
//! ```text
//! <key>=<value>\n
//! ```
//! The first `=` separates key from value; later `=` bytes belong to the
//! value. Keys and values are raw bytes, so the format reserves `=` in keys
//! and the line terminator everywhere; [`validate_key`] and
//! [`validate_value`] reject such inputs before a record is formed.

use nom::{
    bytes::complete::{tag, take_till},
    combinator::rest,
    sequence::separated_pair,
    IResult,
};

use crate::error::{Error, Result};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 256;

/// Maximum value length in bytes
pub const MAX_VALUE_LEN: usize = 1024;

/// Parse one record line (without the trailing newline) into `(key, value)`.
///
/// Splits on the first `=`; lines without one fail to parse and are skipped
/// by the loader.
pub fn parse_record(line: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    separated_pair(take_till(|b| b == b'='), tag("="), rest)(line)
}

/// Append `key=value\n` to `out`
pub fn encode_record(key: &[u8], value: &[u8], out: &mut Vec<u8>) {
    out.reserve(key.len() + value.len() + 2);
    out.extend_from_slice(key);
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(b'\n');
}

/// Check a key against the size limit and the record format
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLarge(key.len()));
    }
    if let Some(&b) = key.iter().find(|&&b| b == b'=' || b == b'\n') {
        return Err(Error::ReservedByte(b));
    }
    Ok(())
}

/// Check a value against the size limit and the record format
pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(Error::EmptyValue);
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::ValueTooLarge(value.len()));
    }
    if value.contains(&b'\n') {
        return Err(Error::ReservedByte(b'\n'));
    }
    Ok(())
}
