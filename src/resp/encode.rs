//! # RESP Encoder
//!
//! Serializes [`Value`]s and command argument lists into the wire format.
//! Output is bit-exact: for every value this encoder produces, feeding the
//! bytes back through [`crate::resp::decode`] yields an equal value and
//! consumes the whole encoding.
//!
//! Requests are always RESP2 arrays of bulk strings; the reply-side RESP3
//! variants are encoded here as well so values can be round-tripped (and so
//! tests can fabricate server traffic).

use crate::resp::Value;
use bytes::{BufMut, Bytes, BytesMut};

/// Appends the RESP encoding of `value` to `buf`.
///
/// The canonical null form on the write path is `$-1\r\n`, for both
/// [`Value::Null`] and the absent bulk string - matching what the decoder
/// accepts as null. The empty bulk string stays distinct as `$0\r\n\r\n`.
pub fn encode_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Null | Value::BulkString(None) => buf.put_slice(b"$-1\r\n"),
        Value::SimpleString(s) => encode_line(b'+', s, buf),
        Value::Error(msg) => encode_line(b'-', msg, buf),
        Value::Integer(n) => encode_line(b':', format!("{n}").as_bytes(), buf),
        Value::BulkString(Some(payload)) => encode_blob(b'$', payload, buf),
        Value::Array(items) => encode_aggregate(b'*', items, buf),
        Value::Set(items) => encode_aggregate(b'~', items, buf),
        Value::Push(items) => encode_aggregate(b'>', items, buf),
        Value::Map(pairs) => encode_pairs(b'%', pairs, buf),
        Value::Attribute(pairs) => encode_pairs(b'|', pairs, buf),
        Value::Boolean(b) => buf.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
        Value::Double(d) => encode_double(*d, buf),
        Value::BigNumber(digits) => encode_line(b'(', digits, buf),
        Value::VerbatimString { format, text } => {
            buf.put_u8(b'=');
            buf.put_slice(format!("{}", format.len() + 1 + text.len()).as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(format);
            buf.put_u8(b':');
            buf.put_slice(text);
            buf.put_slice(b"\r\n");
        }
    }
}

/// Appends a command as an RESP2 array of bulk strings: the keyword first,
/// then its arguments. This is the only shape the request path ever emits.
pub fn encode_command_args(args: &[Bytes], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(format!("{}", args.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        encode_blob(b'$', arg, buf);
    }
}

/// `<token><body>\r\n` - the caller guarantees the body holds no CR or LF
fn encode_line(token: u8, body: &[u8], buf: &mut BytesMut) {
    buf.put_u8(token);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

/// `<token><len>\r\n<payload>\r\n`
fn encode_blob(token: u8, payload: &[u8], buf: &mut BytesMut) {
    buf.put_u8(token);
    buf.put_slice(format!("{}", payload.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");
}

fn encode_aggregate(token: u8, items: &[Value], buf: &mut BytesMut) {
    buf.put_u8(token);
    buf.put_slice(format!("{}", items.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for item in items {
        encode_value(item, buf);
    }
}

fn encode_pairs(token: u8, pairs: &[(Value, Value)], buf: &mut BytesMut) {
    buf.put_u8(token);
    buf.put_slice(format!("{}", pairs.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for (key, value) in pairs {
        encode_value(key, buf);
        encode_value(value, buf);
    }
}

/// Doubles use the shortest decimal form that reparses to the same value;
/// the non-finite values are spelled `inf`, `-inf` and `nan`.
fn encode_double(d: f64, buf: &mut BytesMut) {
    buf.put_u8(b',');
    if d.is_nan() {
        buf.put_slice(b"nan");
    } else if d == f64::INFINITY {
        buf.put_slice(b"inf");
    } else if d == f64::NEG_INFINITY {
        buf.put_slice(b"-inf");
    } else {
        buf.put_slice(format!("{d}").as_bytes());
    }
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::decode;

    fn encoded(value: &Value) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_value(value, &mut buf);
        buf
    }

    #[test]
    fn test_encode_set_command() {
        let args = [Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")];
        let mut buf = BytesMut::new();
        encode_command_args(&args, &mut buf);
        assert_eq!(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n".as_ref(), &buf[..]);
    }

    #[test]
    fn test_encode_null_forms() {
        assert_eq!(b"$-1\r\n".as_ref(), &encoded(&Value::Null)[..]);
        assert_eq!(b"$-1\r\n".as_ref(), &encoded(&Value::BulkString(None))[..]);
        assert_eq!(
            b"$0\r\n\r\n".as_ref(),
            &encoded(&Value::BulkString(Some(Bytes::new())))[..]
        );
    }

    #[test]
    fn test_encode_simple_types() {
        assert_eq!(
            b"+OK\r\n".as_ref(),
            &encoded(&Value::SimpleString(Bytes::from("OK")))[..]
        );
        assert_eq!(
            b"-ERR boom\r\n".as_ref(),
            &encoded(&Value::Error(Bytes::from("ERR boom")))[..]
        );
        assert_eq!(b":-42\r\n".as_ref(), &encoded(&Value::Integer(-42))[..]);
        assert_eq!(b"#t\r\n".as_ref(), &encoded(&Value::Boolean(true))[..]);
    }

    #[test]
    fn test_encode_doubles() {
        assert_eq!(b",3.25\r\n".as_ref(), &encoded(&Value::Double(3.25))[..]);
        assert_eq!(b",10\r\n".as_ref(), &encoded(&Value::Double(10.0))[..]);
        assert_eq!(
            b",inf\r\n".as_ref(),
            &encoded(&Value::Double(f64::INFINITY))[..]
        );
        assert_eq!(
            b",-inf\r\n".as_ref(),
            &encoded(&Value::Double(f64::NEG_INFINITY))[..]
        );
        assert_eq!(b",nan\r\n".as_ref(), &encoded(&Value::Double(f64::NAN))[..]);
    }

    #[test]
    fn test_encode_map_interleaves_pairs() {
        let value = Value::Map(vec![
            (Value::SimpleString(Bytes::from("a")), Value::Integer(1)),
            (Value::SimpleString(Bytes::from("b")), Value::Integer(2)),
        ]);
        assert_eq!(
            b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n".as_ref(),
            &encoded(&value)[..]
        );
    }

    #[test]
    fn test_encode_verbatim_string_length_covers_marker() {
        let value = Value::VerbatimString {
            format: *b"txt",
            text: Bytes::from("Some string"),
        };
        assert_eq!(b"=15\r\ntxt:Some string\r\n".as_ref(), &encoded(&value)[..]);
    }

    #[test]
    fn test_round_trip() {
        let values = [
            Value::Null,
            Value::SimpleString(Bytes::from("PONG")),
            Value::Error(Bytes::from("WRONGTYPE bad")),
            Value::Integer(i64::MIN),
            Value::BulkString(Some(Bytes::from_static(b"bin\0\r\ndata"))),
            Value::BulkString(Some(Bytes::new())),
            Value::Array(vec![]),
            Value::Array(vec![
                Value::Integer(7),
                Value::Array(vec![Value::Null, Value::Boolean(false)]),
                Value::BulkString(Some(Bytes::from("x"))),
            ]),
            Value::Boolean(true),
            Value::Double(-0.5),
            Value::Double(f64::INFINITY),
            Value::BigNumber(Bytes::from("-123456789012345678901234567890")),
            Value::VerbatimString {
                format: *b"mkd",
                text: Bytes::from("*hi*"),
            },
            Value::Map(vec![(
                Value::BulkString(Some(Bytes::from("k"))),
                Value::Set(vec![Value::Integer(1)]),
            )]),
            Value::Push(vec![
                Value::SimpleString(Bytes::from("pubsub")),
                Value::Integer(1),
            ]),
            Value::Attribute(vec![(
                Value::SimpleString(Bytes::from("ttl")),
                Value::Integer(3600),
            )]),
        ];
        for value in values {
            let wire = encoded(&value);
            let (back, consumed) = decode(&wire).unwrap().unwrap();
            assert_eq!(value, back, "wire {:?}", wire);
            assert_eq!(wire.len(), consumed, "wire {:?}", wire);
        }
    }

    #[test]
    fn test_round_trip_canonicalizes_null_bulk() {
        // The write path collapses the absent bulk string into the canonical
        // null wire form, which reads back as Null.
        let wire = encoded(&Value::BulkString(None));
        let (back, consumed) = decode(&wire).unwrap().unwrap();
        assert_eq!(Value::Null, back);
        assert_eq!(wire.len(), consumed);
    }
}
