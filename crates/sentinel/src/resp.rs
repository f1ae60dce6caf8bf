//! RESP2 framing for monitor and data-node conversations.
//!
//! Commands are always sent as arrays of bulk strings. Replies are decoded
//! incrementally from a [`BytesMut`] buffer: [`decode`] returns `Ok(None)`
//! until a complete value is buffered, so callers can keep reading from the
//! socket without re-parsing partial frames by hand.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{Snafu, ensure};

/// Upper bound for a single bulk string or array length.
///
/// Monitor replies are small; anything larger indicates a misbehaving peer.
const MAX_FRAME_LEN: i64 = 64 * 1024 * 1024;

/// Nesting depth limit for arrays.
const MAX_DEPTH: usize = 8;

/// Errors produced while decoding RESP frames.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RespError {
    /// The frame started with a byte that is not a RESP2 type marker.
    #[snafu(display("unknown type marker 0x{byte:02x}"))]
    InvalidMarker {
        /// Offending byte.
        byte: u8,
    },

    /// A length or integer line did not parse.
    #[snafu(display("invalid integer line {line:?}"))]
    InvalidInteger {
        /// Raw line contents.
        line: String,
    },

    /// A declared length exceeds the frame limit.
    #[snafu(display("declared length {len} exceeds limit"))]
    TooLarge {
        /// Declared length.
        len: i64,
    },

    /// A bulk string was not terminated by CRLF.
    #[snafu(display("bulk string missing CRLF terminator"))]
    MissingTerminator,

    /// Arrays nested deeper than the decoder accepts.
    #[snafu(display("array nesting exceeds {MAX_DEPTH} levels"))]
    TooDeep,
}

/// A decoded RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null bulk string or null array.
    Nil,
    /// Simple string (`+OK`).
    Simple(String),
    /// Error reply (`-ERR ...`).
    Error(String),
    /// Integer reply.
    Integer(i64),
    /// Bulk string.
    Bulk(Bytes),
    /// Array of values.
    Array(Vec<Value>),
}

impl Value {
    /// Creates a bulk string value.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    /// Returns the textual content of simple and UTF-8 bulk strings.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Simple(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the array items, if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Short human-readable rendering used in error messages.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Nil => "nil".to_owned(),
            Self::Simple(s) => s.clone(),
            Self::Error(e) => format!("error({e})"),
            Self::Integer(i) => i.to_string(),
            Self::Bulk(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Array(items) => format!("array({})", items.len()),
        }
    }
}

/// Packs a flat `[k1, v1, k2, v2, ...]` reply into a map.
///
/// Returns `None` when the value is not an array of strings or has an odd
/// number of items.
#[must_use]
pub fn pack_record(value: &Value) -> Option<HashMap<String, String>> {
    let items = value.as_array()?;
    if items.len() % 2 != 0 {
        return None;
    }
    items
        .chunks_exact(2)
        .map(|pair| Some((pair[0].as_str()?.to_owned(), pair[1].as_str()?.to_owned())))
        .collect()
}

/// Appends a command encoded as an array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Appends an arbitrary value. Used by the mock servers to write replies.
pub fn encode_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Nil => buf.put_slice(b"$-1\r\n"),
        Value::Simple(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        },
        Value::Error(e) => {
            buf.put_u8(b'-');
            buf.put_slice(e.as_bytes());
            buf.put_slice(b"\r\n");
        },
        Value::Integer(i) => {
            buf.put_u8(b':');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_slice(b"\r\n");
        },
        Value::Bulk(b) => {
            buf.put_u8(b'$');
            buf.put_slice(b.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(b);
            buf.put_slice(b"\r\n");
        },
        Value::Array(items) => {
            buf.put_u8(b'*');
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            for item in items {
                encode_value(item, buf);
            }
        },
    }
}

/// Decodes one value from the front of `buf`, consuming its bytes.
///
/// # Errors
///
/// Returns a [`RespError`] if the buffered bytes are not valid RESP2.
/// Returns `Ok(None)` if more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Value>, RespError> {
    match parse(buf, 0, 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        },
        None => Ok(None),
    }
}

fn parse(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(Value, usize)>, RespError> {
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match marker {
        b'+' => Ok(Some((Value::Simple(String::from_utf8_lossy(line).into_owned()), next))),
        b'-' => Ok(Some((Value::Error(String::from_utf8_lossy(line).into_owned()), next))),
        b':' => Ok(Some((Value::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Value::Nil, next)));
            }
            ensure!(len <= MAX_FRAME_LEN, TooLargeSnafu { len });
            let len = len as usize;
            if buf.len() < next + len + 2 {
                return Ok(None);
            }
            ensure!(&buf[next + len..next + len + 2] == b"\r\n", MissingTerminatorSnafu);
            let data = Bytes::copy_from_slice(&buf[next..next + len]);
            Ok(Some((Value::Bulk(data), next + len + 2)))
        },
        b'*' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Value::Nil, next)));
            }
            ensure!(len <= MAX_FRAME_LEN, TooLargeSnafu { len });
            ensure!(depth < MAX_DEPTH, TooDeepSnafu);
            let mut items = Vec::with_capacity((len as usize).min(64));
            let mut cursor = next;
            for _ in 0..len {
                match parse(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    },
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), cursor)))
        },
        byte => InvalidMarkerSnafu { byte }.fail(),
    }
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], start + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| InvalidIntegerSnafu { line: String::from_utf8_lossy(line) }.build())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Value {
        let mut buf = BytesMut::from(input);
        let value = decode(&mut buf).unwrap().expect("complete frame");
        assert!(buf.is_empty(), "frame should be fully consumed");
        value
    }

    #[test]
    fn test_encode_command() {
        let mut buf = BytesMut::new();
        encode_command(&["SENTINEL", "get-master-addr-by-name", "mymaster"], &mut buf);
        assert_eq!(
            &buf[..],
            b"*3\r\n$8\r\nSENTINEL\r\n$23\r\nget-master-addr-by-name\r\n$8\r\nmymaster\r\n"
        );
    }

    #[test]
    fn test_decode_master_address_reply() {
        let value = decode_all(b"*2\r\n$8\r\n10.0.0.1\r\n$4\r\n6379\r\n");
        assert_eq!(value, Value::Array(vec![Value::bulk("10.0.0.1"), Value::bulk("6379")]));
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode_all(b"+OK\r\n"), Value::Simple("OK".to_owned()));
        assert_eq!(decode_all(b"-ERR no such master\r\n"), Value::Error("ERR no such master".into()));
        assert_eq!(decode_all(b":42\r\n"), Value::Integer(42));
        assert_eq!(decode_all(b"$-1\r\n"), Value::Nil);
        assert_eq!(decode_all(b"*-1\r\n"), Value::Nil);
        assert_eq!(decode_all(b"$0\r\n\r\n"), Value::bulk(""));
    }

    #[test]
    fn test_decode_incomplete_frames() {
        let full = b"*2\r\n$8\r\n10.0.0.1\r\n$4\r\n6379\r\n";
        for cut in 0..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert!(decode(&mut buf).unwrap().is_none(), "prefix of {cut} bytes is incomplete");
            assert_eq!(buf.len(), cut, "incomplete decode must not consume");
        }
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut buf = BytesMut::from(&b"+OK\r\n:1\r\n"[..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(Value::Simple("OK".into())));
        assert_eq!(decode(&mut buf).unwrap(), Some(Value::Integer(1)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(matches!(decode(&mut buf), Err(RespError::InvalidMarker { byte: b'?' })));

        let mut buf = BytesMut::from(&b"$abc\r\n"[..]);
        assert!(matches!(decode(&mut buf), Err(RespError::InvalidInteger { .. })));

        let mut buf = BytesMut::from(&b"$2\r\nabcd"[..]);
        assert!(matches!(decode(&mut buf), Err(RespError::MissingTerminator)));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = BytesMut::from(&b"$999999999999\r\n"[..]);
        assert!(matches!(decode(&mut buf), Err(RespError::TooLarge { .. })));
    }

    #[test]
    fn test_pack_record() {
        let value = Value::Array(vec![
            Value::bulk("ip"),
            Value::bulk("10.0.0.2"),
            Value::bulk("port"),
            Value::bulk("6380"),
            Value::bulk("flags"),
            Value::bulk("slave"),
        ]);
        let record = pack_record(&value).expect("valid record");
        assert_eq!(record.get("ip").map(String::as_str), Some("10.0.0.2"));
        assert_eq!(record.get("port").map(String::as_str), Some("6380"));
        assert_eq!(record.get("flags").map(String::as_str), Some("slave"));
    }

    #[test]
    fn test_pack_record_rejects_odd_and_non_arrays() {
        assert!(pack_record(&Value::Array(vec![Value::bulk("ip")])).is_none());
        assert!(pack_record(&Value::Nil).is_none());
        assert!(pack_record(&Value::Array(vec![Value::bulk("ip"), Value::Integer(1)])).is_none());
    }

    #[test]
    fn test_encode_value_nested_array_decodes_back() {
        let original = Value::Array(vec![
            Value::Array(vec![Value::bulk("name"), Value::bulk("s1")]),
            Value::Nil,
            Value::Integer(-3),
        ]);
        let mut buf = BytesMut::new();
        encode_value(&original, &mut buf);
        assert_eq!(decode(&mut buf).unwrap(), Some(original));
    }
}
