//! RESP wire codec
//!
//! Parses the array-of-bulk-strings request form plus a space-separated
//! inline fallback for interactive clients, and encodes the reply types the
//! server emits. Bulk string bodies are byte-exact; an incomplete frame
//! leaves the buffer untouched so a later read can complete it.

use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use thiserror::Error;

/// Hard cap on a single bulk string body
const MAX_BULK_LEN: usize = 1024 * 1024;

/// Hard cap on request array arity
const MAX_ARRAY_LEN: usize = 128;

/// Errors from the RESP parser; all surface to the client as `-ERR` replies
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Array header with a bad or oversized count
    #[error("Protocol error: invalid multibulk length")]
    BadArrayLength,

    /// Bulk header with a bad or oversized length
    #[error("Protocol error: invalid bulk length")]
    BadBulkLength,

    /// Line that should be an integer but is not
    #[error("Protocol error: invalid integer")]
    BadInteger,

    /// Frame byte that no RESP type starts with
    #[error("Protocol error: unexpected byte {0:#04x}")]
    UnexpectedByte(u8),

    /// Missing CRLF after a length-prefixed body
    #[error("Protocol error: expected CRLF after bulk payload")]
    MissingCrlf,

    /// Simple string or error frame that is not UTF-8
    #[error("Protocol error: invalid UTF-8 in frame")]
    BadUtf8,

    /// Inline line with no tokens
    #[error("Protocol error: empty command")]
    EmptyCommand,
}

/// RESP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`; `None` encodes the null bulk `$-1\r\n`
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...\r\n`; `None` encodes the null array `*-1\r\n`
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Encode this frame, appending to `out`
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            RespValue::Simple(s) => {
                out.put_u8(b'+');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Error(msg) => {
                out.put_u8(b'-');
                out.put_slice(msg.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                out.put_u8(b':');
                out.put_slice(n.to_string().as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Bulk(None) => out.put_slice(b"$-1\r\n"),
            RespValue::Bulk(Some(data)) => {
                out.put_u8(b'$');
                out.put_slice(data.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            RespValue::Array(None) => out.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.put_u8(b'*');
                out.put_slice(items.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Try to decode one complete frame from the front of `buf`
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial frame; bytes
    /// are consumed only once a full frame decoded. A line that does not
    /// start with a RESP type byte is treated as an inline command.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, ParseError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&buf[..]);
        let parsed = match buf[0] {
            b'+' | b'-' | b':' | b'$' | b'*' => parse_value(&mut cursor)?,
            _ => parse_inline(&mut cursor)?,
        };

        match parsed {
            Some(value) => {
                let consumed = cursor.position() as usize;
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Bulk string payload, if this frame is a non-null bulk string
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            RespValue::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }
}

fn parse_value(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>, ParseError> {
    if !cursor.has_remaining() {
        return Ok(None);
    }

    match cursor.get_u8() {
        b'+' => match read_line(cursor) {
            Some(line) => Ok(Some(RespValue::Simple(into_utf8(line)?))),
            None => Ok(None),
        },
        b'-' => match read_line(cursor) {
            Some(line) => Ok(Some(RespValue::Error(into_utf8(line)?))),
            None => Ok(None),
        },
        b':' => match read_line(cursor) {
            Some(line) => Ok(Some(RespValue::Integer(
                parse_int(&line).ok_or(ParseError::BadInteger)?,
            ))),
            None => Ok(None),
        },
        b'$' => parse_bulk(cursor),
        b'*' => parse_array(cursor),
        other => Err(ParseError::UnexpectedByte(other)),
    }
}

fn parse_bulk(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>, ParseError> {
    let len = match read_line(cursor) {
        Some(line) => parse_int(&line).ok_or(ParseError::BadBulkLength)?,
        None => return Ok(None),
    };

    if len == -1 {
        return Ok(Some(RespValue::Bulk(None)));
    }
    if len < 0 || len as usize > MAX_BULK_LEN {
        return Err(ParseError::BadBulkLength);
    }
    let len = len as usize;

    if cursor.remaining() < len + 2 {
        return Ok(None);
    }

    let mut data = vec![0u8; len];
    cursor.copy_to_slice(&mut data);
    if cursor.get_u8() != b'\r' || cursor.get_u8() != b'\n' {
        return Err(ParseError::MissingCrlf);
    }

    Ok(Some(RespValue::Bulk(Some(data))))
}

fn parse_array(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>, ParseError> {
    let len = match read_line(cursor) {
        Some(line) => parse_int(&line).ok_or(ParseError::BadArrayLength)?,
        None => return Ok(None),
    };

    if len == -1 {
        return Ok(Some(RespValue::Array(None)));
    }
    if len < 0 || len as usize > MAX_ARRAY_LEN {
        return Err(ParseError::BadArrayLength);
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        match parse_value(cursor)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }

    Ok(Some(RespValue::Array(Some(items))))
}

/// Space-separated fallback for interactive clients: one command per line,
/// each whitespace-delimited token becomes a bulk string.
fn parse_inline(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>, ParseError> {
    let line = match read_line(cursor) {
        Some(line) => line,
        None => return Ok(None),
    };

    let parts: Vec<RespValue> = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|part| !part.is_empty())
        .map(|part| RespValue::Bulk(Some(part.to_vec())))
        .collect();

    if parts.is_empty() {
        return Err(ParseError::EmptyCommand);
    }
    Ok(Some(RespValue::Array(Some(parts))))
}

/// Read up to the next CRLF, returning the line body; `None` when the
/// terminator has not arrived yet
fn read_line(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let start = cursor.position() as usize;
    let slice = &cursor.get_ref()[start..];

    for (i, window) in slice.windows(2).enumerate() {
        if window == b"\r\n" {
            cursor.set_position((start + i + 2) as u64);
            return Some(slice[..i].to_vec());
        }
    }
    None
}

fn parse_int(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse().ok()
}

fn into_utf8(line: Vec<u8>) -> Result<String, ParseError> {
    String::from_utf8(line).map_err(|_| ParseError::BadUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: RespValue) {
        let mut encoded = BytesMut::new();
        value.encode(&mut encoded);
        let decoded = RespValue::parse(&mut encoded).unwrap().unwrap();
        assert_eq!(decoded, value);
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_reply_roundtrips() {
        roundtrip(RespValue::Simple("OK".into()));
        roundtrip(RespValue::Simple("PONG".into()));
        roundtrip(RespValue::Error("ERR unknown command 'FOO'".into()));
        roundtrip(RespValue::Integer(0));
        roundtrip(RespValue::Integer(1));
        roundtrip(RespValue::Integer(-42));
        roundtrip(RespValue::Bulk(Some(b"world".to_vec())));
        roundtrip(RespValue::Bulk(None));
        roundtrip(RespValue::Array(Some(vec![
            RespValue::Bulk(Some(b"GET".to_vec())),
            RespValue::Bulk(Some(b"hello".to_vec())),
        ])));
        roundtrip(RespValue::Array(None));
    }

    #[test]
    fn test_bulk_body_is_byte_exact() {
        // A body containing CRLF must survive untouched
        roundtrip(RespValue::Bulk(Some(b"line1\r\nline2".to_vec())));
    }

    #[test]
    fn test_parse_command_array() {
        let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n"[..]);
        let frame = RespValue::parse(&mut buf).unwrap().unwrap();

        assert_eq!(
            frame,
            RespValue::Array(Some(vec![
                RespValue::Bulk(Some(b"SET".to_vec())),
                RespValue::Bulk(Some(b"hello".to_vec())),
                RespValue::Bulk(Some(b"world".to_vec())),
            ]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_leaves_buffer() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$5\r\nhel"[..]);
        let before = buf.clone();

        assert_eq!(RespValue::parse(&mut buf).unwrap(), None);
        assert_eq!(buf, before);
    }

    #[test]
    fn test_partial_bulk_header() {
        let mut buf = BytesMut::from(&b"$6\r\nfoo"[..]);
        assert_eq!(RespValue::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_empty_buffer() {
        let mut buf = BytesMut::new();
        assert_eq!(RespValue::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_two_frames_parse_in_order() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n"[..]);

        assert!(RespValue::parse(&mut buf).unwrap().is_some());
        assert!(RespValue::parse(&mut buf).unwrap().is_some());
        assert_eq!(RespValue::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_inline_command() {
        let mut buf = BytesMut::from(&b"SET hello world\r\n"[..]);
        let frame = RespValue::parse(&mut buf).unwrap().unwrap();

        assert_eq!(
            frame,
            RespValue::Array(Some(vec![
                RespValue::Bulk(Some(b"SET".to_vec())),
                RespValue::Bulk(Some(b"hello".to_vec())),
                RespValue::Bulk(Some(b"world".to_vec())),
            ]))
        );
    }

    #[test]
    fn test_inline_collapses_repeated_spaces() {
        let mut buf = BytesMut::from(&b"PING  \r\n"[..]);
        let frame = RespValue::parse(&mut buf).unwrap().unwrap();

        assert_eq!(
            frame,
            RespValue::Array(Some(vec![RespValue::Bulk(Some(b"PING".to_vec()))]))
        );
    }

    #[test]
    fn test_inline_partial_line() {
        let mut buf = BytesMut::from(&b"PING"[..]);
        assert_eq!(RespValue::parse(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"PING");
    }

    #[test]
    fn test_empty_inline_line_is_error() {
        let mut buf = BytesMut::from(&b" \r\n"[..]);
        assert_eq!(
            RespValue::parse(&mut buf),
            Err(ParseError::EmptyCommand)
        );
    }

    #[test]
    fn test_bad_bulk_length() {
        let mut buf = BytesMut::from(&b"*1\r\n$abc\r\nxyz\r\n"[..]);
        assert_eq!(
            RespValue::parse(&mut buf),
            Err(ParseError::BadBulkLength)
        );
    }

    #[test]
    fn test_negative_array_length_rejected() {
        let mut buf = BytesMut::from(&b"*-3\r\n"[..]);
        assert_eq!(
            RespValue::parse(&mut buf),
            Err(ParseError::BadArrayLength)
        );
    }

    #[test]
    fn test_missing_crlf_after_bulk() {
        let mut buf = BytesMut::from(&b"$3\r\nfooXY"[..]);
        assert_eq!(RespValue::parse(&mut buf), Err(ParseError::MissingCrlf));
    }

    #[test]
    fn test_null_bulk_parses() {
        let mut buf = BytesMut::from(&b"$-1\r\n"[..]);
        assert_eq!(
            RespValue::parse(&mut buf).unwrap(),
            Some(RespValue::Bulk(None))
        );
    }
}
