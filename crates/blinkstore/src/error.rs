//! Error types for blinkstore

use std::fmt;
use std::io;

/// Result type alias for blinkstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for durable map operations
#[derive(Debug)]
pub enum Error {
    /// I/O error on the data file
    Io(io::Error),

    /// Malformed record data
    Parse(String),

    /// Key longer than [`MAX_KEY_LEN`](crate::MAX_KEY_LEN)
    KeyTooLarge(usize),

    /// Value longer than [`MAX_VALUE_LEN`](crate::MAX_VALUE_LEN)
    ValueTooLarge(usize),

    /// Empty values cannot be stored
    EmptyValue,

    /// Key or value contains a byte reserved by the record format
    ReservedByte(u8),

    /// Store is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::KeyTooLarge(len) => {
                write!(f, "key too long: {} bytes (max {})", len, crate::MAX_KEY_LEN)
            }
            Error::ValueTooLarge(len) => {
                write!(f, "value too long: {} bytes (max {})", len, crate::MAX_VALUE_LEN)
            }
            Error::EmptyValue => write!(f, "empty values are not allowed"),
            Error::ReservedByte(b) => write!(f, "key or value contains reserved byte {:#04x}", b),
            Error::Closed => write!(f, "store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
