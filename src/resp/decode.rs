//! # Incremental RESP Decoder
//!
//! Reconstructs [`Value`]s from a streaming, possibly fragmented byte source.
//!
//! The decoder is pure with respect to the buffer: it never mutates it, and
//! on an incomplete frame it reports nothing consumed, so the caller keeps
//! the unparsed bytes and re-presents them (plus whatever arrived since) on
//! the next call. Repeated calls with the same prefix return the same
//! outcome.
//!
//! Any parse error is final. RESP carries no request identifiers and no
//! resynchronization markers, so a connection that produced a malformed
//! frame cannot be trusted again and must be torn down.

use crate::constants::MAX_PARSE_DEPTH;
use crate::errors::RespError;
use crate::resp::cursor::ByteCursor;
use crate::resp::Value;
use bytes::Bytes;

/// Ceiling on speculative `Vec` pre-sizing for aggregates. The declared
/// count is untrusted until that many children have actually been parsed,
/// so capacity beyond this grows only as verified elements arrive.
const MAX_PREALLOC_ELEMENTS: usize = 64;

/// Parses one complete frame from the front of `buf`.
///
/// # Returns
/// - `Ok(Some((value, consumed)))` - a complete frame; the caller advances
///   its read cursor by `consumed` bytes
/// - `Ok(None)` - the buffer holds only a partial frame; nothing consumed
/// - `Err(_)` - the byte stream violates the protocol; fatal
///
/// The decoder never inspects bytes past the frame it returns, so trailing
/// pipelined frames are left untouched for subsequent calls.
pub fn decode(buf: &[u8]) -> Result<Option<(Value, usize)>, RespError> {
    let mut cur = ByteCursor::new(buf);
    match parse_value(&mut cur, 0)? {
        Some(value) => Ok(Some((value, cur.consumed()))),
        None => Ok(None),
    }
}

/// Parses one frame at the cursor, recursing into aggregate children.
///
/// `Ok(None)` propagates all the way out: a partially parsed aggregate keeps
/// nothing, and the outer cursor the caller sees stays where it was.
fn parse_value(cur: &mut ByteCursor, depth: usize) -> Result<Option<Value>, RespError> {
    if depth > MAX_PARSE_DEPTH {
        return Err(RespError::RecursionTooDeep);
    }
    let token = match cur.peek() {
        Some(token) => token,
        None => return Ok(None),
    };
    cur.take_u8();

    match token {
        b'+' => parse_line(cur, |body| Value::SimpleString(Bytes::copy_from_slice(body))),
        b'-' => parse_line(cur, |body| Value::Error(Bytes::copy_from_slice(body))),
        b':' => parse_integer(cur),
        b'$' => parse_bulk_string(cur),
        b'=' => parse_verbatim_string(cur),
        b'!' => parse_blob_error(cur),
        b'*' => parse_aggregate(cur, depth, Aggregate::Array),
        b'~' => parse_aggregate(cur, depth, Aggregate::Set),
        b'>' => parse_aggregate(cur, depth, Aggregate::Push),
        b'%' => parse_pairs(cur, depth, false),
        b'|' => parse_pairs(cur, depth, true),
        b'_' => parse_null(cur),
        b'#' => parse_boolean(cur),
        b',' => parse_double(cur),
        b'(' => parse_big_number(cur),
        other => Err(RespError::InvalidToken(other)),
    }
}

fn parse_line(
    cur: &mut ByteCursor,
    make: impl FnOnce(&[u8]) -> Value,
) -> Result<Option<Value>, RespError> {
    Ok(cur.take_line()?.map(make))
}

/// Parses the body of a length or integer line as a signed 64-bit decimal.
///
/// Empty, non-numeric and overflowing bodies are all [`RespError::MalformedInteger`].
fn parse_i64(body: &[u8]) -> Result<i64, RespError> {
    let s = std::str::from_utf8(body).map_err(|_| RespError::MalformedInteger)?;
    if s.is_empty() {
        return Err(RespError::MalformedInteger);
    }
    s.parse::<i64>().map_err(|_| RespError::MalformedInteger)
}

fn parse_integer(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    match cur.take_line()? {
        Some(body) => Ok(Some(Value::Integer(parse_i64(body)?))),
        None => Ok(None),
    }
}

/// `$<len>\r\n<payload>\r\n`
///
/// - `len == -1` is the null bulk string and decodes to [`Value::Null`]
/// - `len == 0` is the *empty* bulk string, distinct from null
/// - the payload must be followed by exactly `CRLF`, which is how a length
///   lie is caught
fn parse_bulk_string(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    match parse_blob(cur)? {
        Blob::Incomplete => Ok(None),
        Blob::Null => Ok(Some(Value::Null)),
        Blob::Payload(payload) => Ok(Some(Value::BulkString(Some(Bytes::copy_from_slice(
            payload,
        ))))),
    }
}

/// `!<len>\r\n<message>\r\n` - RESP3 blob error, a binary-safe variant of the
/// simple error. Decodes to [`Value::Error`]; a null length is not valid here.
fn parse_blob_error(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    match parse_blob(cur)? {
        Blob::Incomplete => Ok(None),
        Blob::Null => Err(RespError::InvalidBulkStringSize(-1)),
        Blob::Payload(payload) => Ok(Some(Value::Error(Bytes::copy_from_slice(payload)))),
    }
}

/// `=<len>\r\n<fmt>:<body>\r\n` where `<fmt>` is exactly three characters.
/// The declared length covers the marker and the colon.
fn parse_verbatim_string(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    let payload = match parse_blob(cur)? {
        Blob::Incomplete => return Ok(None),
        Blob::Null => return Err(RespError::InvalidBulkStringSize(-1)),
        Blob::Payload(payload) => payload,
    };
    if payload.len() < 4 || payload[3] != b':' {
        return Err(RespError::MalformedTerminator);
    }
    Ok(Some(Value::VerbatimString {
        format: [payload[0], payload[1], payload[2]],
        text: Bytes::copy_from_slice(&payload[4..]),
    }))
}

enum Blob<'a> {
    Incomplete,
    Null,
    Payload(&'a [u8]),
}

/// Shared length-prefixed payload framing for `$`, `=` and `!`
fn parse_blob<'a>(cur: &mut ByteCursor<'a>) -> Result<Blob<'a>, RespError> {
    let len = match cur.take_line()? {
        Some(body) => parse_i64(body)?,
        None => return Ok(Blob::Incomplete),
    };
    if len == -1 {
        return Ok(Blob::Null);
    }
    if len < -1 {
        return Err(RespError::InvalidBulkStringSize(len));
    }
    let len = len as usize;
    // Payload plus its own CRLF must be present in full.
    let payload = match cur.take(len) {
        Some(payload) => payload,
        None => return Ok(Blob::Incomplete),
    };
    match cur.take(2) {
        Some(b"\r\n") => Ok(Blob::Payload(payload)),
        Some(_) => Err(RespError::BulkStringSizeMismatch),
        None => Ok(Blob::Incomplete),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Aggregate {
    Array,
    Set,
    Push,
}

/// `*`/`~`/`>`: a count line followed by that many child frames.
///
/// `*-1` decodes to [`Value::Null`]; a negative count anywhere else is
/// malformed. A push frame must carry at least one element and its first
/// element must be a simple string tag.
fn parse_aggregate(
    cur: &mut ByteCursor,
    depth: usize,
    kind: Aggregate,
) -> Result<Option<Value>, RespError> {
    let count = match cur.take_line()? {
        Some(body) => parse_i64(body)?,
        None => return Ok(None),
    };
    if count == -1 && kind == Aggregate::Array {
        return Ok(Some(Value::Null));
    }
    if count < 0 {
        return Err(RespError::MalformedInteger);
    }
    if count == 0 && kind == Aggregate::Push {
        return Err(RespError::MalformedPush);
    }

    let count = count as usize;
    let mut items = Vec::with_capacity(count.min(MAX_PREALLOC_ELEMENTS));
    for i in 0..count {
        let item = match parse_value(cur, depth + 1)? {
            Some(item) => item,
            None => return Ok(None),
        };
        if i == 0 && kind == Aggregate::Push && !matches!(item, Value::SimpleString(_)) {
            return Err(RespError::MalformedPush);
        }
        items.push(item);
    }

    Ok(Some(match kind {
        Aggregate::Array => Value::Array(items),
        Aggregate::Set => Value::Set(items),
        Aggregate::Push => Value::Push(items),
    }))
}

/// `%`/`|`: the count line is the number of *pairs*; `2 * count` child frames
/// follow, interleaved key, value, key, value.
fn parse_pairs(
    cur: &mut ByteCursor,
    depth: usize,
    attribute: bool,
) -> Result<Option<Value>, RespError> {
    let count = match cur.take_line()? {
        Some(body) => parse_i64(body)?,
        None => return Ok(None),
    };
    if count < 0 {
        return Err(RespError::MalformedInteger);
    }

    let count = count as usize;
    let mut pairs = Vec::with_capacity(count.min(MAX_PREALLOC_ELEMENTS));
    for _ in 0..count {
        let key = match parse_value(cur, depth + 1)? {
            Some(key) => key,
            None => return Ok(None),
        };
        let value = match parse_value(cur, depth + 1)? {
            Some(value) => value,
            None => return Ok(None),
        };
        pairs.push((key, value));
    }

    Ok(Some(if attribute {
        Value::Attribute(pairs)
    } else {
        Value::Map(pairs)
    }))
}

/// `_\r\n` - the RESP3 bare null. The line body must be empty.
fn parse_null(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    match cur.take_line()? {
        Some(b"") => Ok(Some(Value::Null)),
        Some(_) => Err(RespError::MalformedTerminator),
        None => Ok(None),
    }
}

/// `#t\r\n` / `#f\r\n`
fn parse_boolean(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    match cur.take_line()? {
        Some(b"t") => Ok(Some(Value::Boolean(true))),
        Some(b"f") => Ok(Some(Value::Boolean(false))),
        Some(body) => Err(RespError::MalformedBoolean(
            body.first().copied().unwrap_or(0),
        )),
        None => Ok(None),
    }
}

/// `,<double>\r\n` with `inf`, `-inf` and `nan` for the non-finite values
fn parse_double(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    let body = match cur.take_line()? {
        Some(body) => body,
        None => return Ok(None),
    };
    let s = std::str::from_utf8(body).map_err(|_| RespError::MalformedInteger)?;
    if s.is_empty() {
        return Err(RespError::MalformedInteger);
    }
    let d = s.parse::<f64>().map_err(|_| RespError::MalformedInteger)?;
    Ok(Some(Value::Double(d)))
}

/// `(<decimal digits>\r\n` with an optional leading sign
fn parse_big_number(cur: &mut ByteCursor) -> Result<Option<Value>, RespError> {
    let body = match cur.take_line()? {
        Some(body) => body,
        None => return Ok(None),
    };
    let digits = match body.first() {
        Some(b'+') | Some(b'-') => &body[1..],
        _ => body,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(RespError::MalformedInteger);
    }
    Ok(Some(Value::BigNumber(Bytes::copy_from_slice(body))))
}
