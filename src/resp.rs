//! # RESP: Redis Serialization Protocol
//!
//! RESP is the wire protocol that Redis clients implement. It is binary-safe,
//! line-oriented and uses prefixed lengths for bulk data, so payloads never
//! need escaping.
//!
//! In RESP, the first byte of a frame determines its type:
//! - `+` simple string, `-` error, `:` integer, `$` bulk string, `*` array
//!   (the RESP2 set),
//! - `_` null, `#` boolean, `,` double, `(` big number, `=` verbatim string,
//!   `%` map, `~` set, `>` push, `|` attribute, `!` blob error (added by
//!   RESP3).
//!
//! Clients send commands to a Redis server as a RESP array of bulk strings;
//! the server replies with any of the types above. This module holds the
//! [`Value`] model; [`decode`] reconstructs values from a streaming byte
//! source and [`encode`] serializes them back with bit-exact output.
//!
//! [Redis serialization protocol specification](https://redis.io/docs/latest/develop/reference/protocol-spec/)

pub mod cursor;
pub mod decode;
pub mod encode;

pub use decode::decode;
pub use encode::{encode_command_args, encode_value};

use bytes::Bytes;
use std::fmt::{Display, Formatter};

/// A single decoded RESP value
///
/// Covers both RESP2 and RESP3. A value is only ever constructed from a
/// completely framed wire form; a partially parsed frame never escapes the
/// decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The canonical null. The wire forms `$-1\r\n` (null bulk string),
    /// `*-1\r\n` (null array) and `_\r\n` (RESP3 null) all decode to this
    /// variant.
    Null,

    /// Simple strings are encoded as a plus (`+`) character followed by the
    /// string contents, terminated by `CRLF`. The contents may not contain
    /// `CR` or `LF` characters.
    ///
    /// Example: `+OK\r\n`
    SimpleString(Bytes),

    /// A server-reported error. Encoded like a simple string but with a
    /// leading minus (`-`). The first whitespace-delimited token is the error
    /// prefix (`ERR`, `WRONGTYPE`, `MOVED`, ...); the full message is kept as
    /// is. RESP3 blob errors (`!`) decode to this variant as well.
    ///
    /// Example: `-ERR unknown command\r\n`
    Error(Bytes),

    /// A `CRLF`-terminated string representing a signed, base-10, 64-bit
    /// integer, prefixed by a colon (`:`).
    ///
    /// Example: `:1000\r\n`
    Integer(i64),

    /// A single binary-safe string, prefixed by its length.
    ///
    /// `None` is the *absent* bulk string and encodes as `$-1\r\n`;
    /// `Some` with zero length is the *empty* bulk string `$0\r\n\r\n`.
    /// The two are distinct: `GET` on a missing key yields the former,
    /// `GET` on a key holding `""` the latter. Note that on the read path the
    /// decoder canonicalizes `$-1\r\n` to [`Value::Null`], so `None` only
    /// appears on the write path.
    ///
    /// Example: `$6\r\nfoobar\r\n`
    BulkString(Option<Bytes>),

    /// An ordered sequence of values, possibly of mixed types and nested.
    /// Requests are always arrays of bulk strings.
    ///
    /// Example: `*2\r\n$3\r\nfoo\r\n:42\r\n`
    Array(Vec<Value>),

    /// RESP3 boolean: `#t\r\n` or `#f\r\n`
    Boolean(bool),

    /// RESP3 double: `,3.25\r\n`, with `,inf\r\n`, `,-inf\r\n` and `,nan\r\n`
    /// for the non-finite values
    Double(f64),

    /// RESP3 big number: an integer outside the `i64` range, kept as its
    /// decimal string form, e.g. `(3492890328409238509324850943850943825024385\r\n`
    BigNumber(Bytes),

    /// RESP3 verbatim string: a bulk string whose payload starts with a
    /// three-character format marker (`txt`, `mkd`, ...) and a colon
    ///
    /// Example: `=15\r\ntxt:Some string\r\n`
    VerbatimString {
        /// The three-character format marker
        format: [u8; 3],
        /// The body after the colon
        text: Bytes,
    },

    /// RESP3 map: ordered key/value pairs. The wire count is the number of
    /// pairs; keys and values are interleaved.
    Map(Vec<(Value, Value)>),

    /// RESP3 set: an unordered collection, decoded in wire order
    Set(Vec<Value>),

    /// RESP3 push: a server-initiated message not correlated with any client
    /// request. Has at least one element and the first is a simple string
    /// tag (`pubsub`, `invalidate`, ...).
    Push(Vec<Value>),

    /// RESP3 attribute: metadata pairs that precede another reply. Never
    /// matched to a pending request.
    Attribute(Vec<(Value, Value)>),
}

impl Value {
    /// Whether this is the canonical null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::BulkString(None))
    }

    /// Whether this is the simple string `OK`
    pub fn is_ok(&self) -> bool {
        matches!(self, Value::SimpleString(s) if s.as_ref() == b"OK")
    }

    /// The payload bytes of a string-like value
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::SimpleString(s) | Value::BigNumber(s) => Some(s),
            Value::BulkString(Some(s)) => Some(s),
            Value::VerbatimString { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The payload of a string-like value, lossily decoded as UTF-8
    pub fn as_string_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// The inner integer, if this is an [`Value::Integer`]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The server error message, if this is an [`Value::Error`]
    pub fn as_error(&self) -> Option<&Bytes> {
        match self {
            Value::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// The error prefix (`ERR`, `WRONGTYPE`, `MOVED`, ...), if this is an
    /// [`Value::Error`]: the first whitespace-delimited token of the message
    pub fn error_prefix(&self) -> Option<&[u8]> {
        let msg = self.as_error()?;
        let end = msg
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .unwrap_or(msg.len());
        Some(&msg[..end])
    }

    /// Consumes an aggregate into its elements
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) | Value::Set(items) | Value::Push(items) => Some(items),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "(nil)"),
            Value::SimpleString(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            Value::Error(msg) => write!(f, "(error) {}", String::from_utf8_lossy(msg)),
            Value::Integer(n) => write!(f, "(integer) {n}"),
            Value::BulkString(None) => write!(f, "(nil)"),
            Value::BulkString(Some(s)) => write!(f, "\"{}\"", String::from_utf8_lossy(s)),
            Value::Boolean(b) => write!(f, "(boolean) {}", if *b { "true" } else { "false" }),
            Value::Double(d) => write!(f, "(double) {d}"),
            Value::BigNumber(s) => write!(f, "(big number) {}", String::from_utf8_lossy(s)),
            Value::VerbatimString { text, .. } => {
                write!(f, "\"{}\"", String::from_utf8_lossy(text))
            }
            Value::Array(items) | Value::Set(items) | Value::Push(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, item)?;
                }
                if items.is_empty() {
                    write!(f, "(empty array)")?;
                }
                Ok(())
            }
            Value::Map(pairs) | Value::Attribute(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}# {} => {}", i + 1, k, v)?;
                }
                if pairs.is_empty() {
                    write!(f, "(empty map)")?;
                }
                Ok(())
            }
        }
    }
}
