//! Connection and pipeline behavior against a scripted server.

mod common;

use bytes::{Bytes, BytesMut};
use common::{command_args, read_frame, respond_in_order, serve_once};
use redis_pipeline_client::cmd::{self, Command};
use redis_pipeline_client::config::ConnectionConfig;
use redis_pipeline_client::conn::Connection;
use redis_pipeline_client::errors::{CloseCause, ConnectionError, RespError};
use redis_pipeline_client::resp::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(addr.to_string())
}

#[tokio::test]
async fn replies_resolve_in_issuance_order() {
    let addr = serve_once(|stream| {
        respond_in_order(
            stream,
            vec![b"$3\r\nfoo\r\n".as_ref(), b":42\r\n", b"+PONG\r\n"],
        )
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let (r1, r2, r3) = tokio::join!(
        conn.send(redis_pipeline_client::cmd!("GET", "a")),
        conn.send(redis_pipeline_client::cmd!("INCR", "b")),
        conn.send(cmd::ping()),
    );
    assert_eq!(Value::BulkString(Some(Bytes::from("foo"))), r1.unwrap());
    assert_eq!(Value::Integer(42), r2.unwrap());
    assert_eq!(Value::SimpleString(Bytes::from("PONG")), r3.unwrap());

    conn.close().await;
}

#[tokio::test]
async fn server_error_and_null_are_successful_replies() {
    let addr = serve_once(|stream| {
        respond_in_order(
            stream,
            vec![b"-WRONGTYPE Operation against a key\r\n".as_ref(), b"$-1\r\n"],
        )
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let reply = conn.send(Command::new("LPUSH").arg("k").arg("v")).await.unwrap();
    assert_eq!(Some(b"WRONGTYPE".as_ref()), reply.error_prefix());

    let reply = conn.send(Command::new("GET").arg("missing")).await.unwrap();
    assert_eq!(Value::Null, reply);

    conn.close().await;
}

#[tokio::test]
async fn fragmented_replies_reassemble() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();
        let _ = read_frame(&mut stream, &mut buf).await;
        for chunk in [b"*2\r\n:1\r\n".as_ref(), b"$3\r\nf", b"oo\r\n"] {
            stream.write_all(chunk).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        while read_frame(&mut stream, &mut buf).await.is_some() {}
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let reply = conn.send(Command::new("MGET").arg("a").arg("b")).await.unwrap();
    assert_eq!(
        Value::Array(vec![
            Value::Integer(1),
            Value::BulkString(Some(Bytes::from("foo"))),
        ]),
        reply
    );

    conn.close().await;
}

#[tokio::test]
async fn unexpected_eof_fails_pending_and_future_sends() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();
        let _ = read_frame(&mut stream, &mut buf).await;
        // Close without replying.
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let err = conn.send(cmd::ping()).await.unwrap_err();
    assert!(
        matches!(
            err,
            ConnectionError::Closed {
                cause: CloseCause::RemoteEof
            }
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(CloseCause::RemoteEof, conn.closed().await);
    assert!(conn.is_closed());

    let err = conn.send(cmd::ping()).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Closed { .. }));
}

#[tokio::test]
async fn protocol_error_tears_the_connection_down() {
    let addr =
        serve_once(|stream| respond_in_order(stream, vec![b"@boom\r\n".as_ref()])).await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let err = conn.send(cmd::ping()).await.unwrap_err();
    assert!(
        matches!(
            err,
            ConnectionError::Closed {
                cause: CloseCause::Protocol(RespError::InvalidToken(b'@'))
            }
        ),
        "unexpected error: {err:?}"
    );
    assert!(conn.is_closed());
}

#[tokio::test]
async fn push_frames_route_to_the_push_sink() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();
        let _ = read_frame(&mut stream, &mut buf).await;
        stream
            .write_all(b">3\r\n+message\r\n+ch\r\n$2\r\nhi\r\n:1\r\n")
            .await
            .unwrap();
        while read_frame(&mut stream, &mut buf).await.is_some() {}
    })
    .await;
    let mut conn = Connection::connect(&config(addr)).await.unwrap();
    let mut pushes = conn.take_push_receiver().unwrap();
    assert!(conn.take_push_receiver().is_none());

    // The push frame precedes the reply on the wire, yet the reply resolves
    // the request and the push arrives out of band.
    let reply = conn.send(Command::new("SUBSCRIBE").arg("ch")).await.unwrap();
    assert_eq!(Value::Integer(1), reply);

    let push = pushes.recv().await.unwrap();
    assert_eq!(
        Value::Push(vec![
            Value::SimpleString(Bytes::from("message")),
            Value::SimpleString(Bytes::from("ch")),
            Value::BulkString(Some(Bytes::from("hi"))),
        ]),
        push
    );

    conn.close().await;
}

#[tokio::test]
async fn attribute_frames_are_skipped_as_metadata() {
    let addr = serve_once(|stream| {
        respond_in_order(
            stream,
            vec![b"|1\r\n+key-popularity\r\n,0.1923\r\n:25\r\n".as_ref()],
        )
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let reply = conn.send(Command::new("GET").arg("k")).await.unwrap();
    assert_eq!(Value::Integer(25), reply);

    conn.close().await;
}

#[tokio::test]
async fn handshake_runs_auth_select_setname_in_order() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();

        let auth = read_frame(&mut stream, &mut buf).await.unwrap();
        assert_eq!(vec!["AUTH", "admin", "secret"], command_args(&auth));
        stream.write_all(b"+OK\r\n").await.unwrap();

        let select = read_frame(&mut stream, &mut buf).await.unwrap();
        assert_eq!(vec!["SELECT", "3"], command_args(&select));
        stream.write_all(b"+OK\r\n").await.unwrap();

        let setname = read_frame(&mut stream, &mut buf).await.unwrap();
        assert_eq!(vec!["CLIENT", "SETNAME", "demo"], command_args(&setname));
        stream.write_all(b"+OK\r\n").await.unwrap();

        let ping = read_frame(&mut stream, &mut buf).await.unwrap();
        assert_eq!(vec!["PING"], command_args(&ping));
        stream.write_all(b"+PONG\r\n").await.unwrap();

        while read_frame(&mut stream, &mut buf).await.is_some() {}
    })
    .await;

    let config = ConnectionConfig::new(addr.to_string())
        .username("admin")
        .password("secret")
        .database(3)
        .client_name("demo");
    let conn = Connection::connect(&config).await.unwrap();
    assert!(conn.is_ready());

    let reply = conn.send(cmd::ping()).await.unwrap();
    assert_eq!(Value::SimpleString(Bytes::from("PONG")), reply);

    conn.close().await;
}

#[tokio::test]
async fn handshake_rejection_surfaces_the_server_error() {
    let addr = serve_once(|stream| {
        respond_in_order(stream, vec![b"-ERR invalid password\r\n".as_ref()])
    })
    .await;

    let config = ConnectionConfig::new(addr.to_string()).password("wrong");
    let err = Connection::connect(&config).await.unwrap_err();
    match err {
        ConnectionError::Handshake(msg) => assert_eq!("ERR invalid password", msg),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn write_buffer_ceiling_rejects_without_enqueueing() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();
        while read_frame(&mut stream, &mut buf).await.is_some() {}
    })
    .await;

    let mut config = config(addr);
    config.write_buffer_limit = 4;
    let conn = Connection::connect(&config).await.unwrap();

    let err = conn.send(cmd::ping()).await.unwrap_err();
    assert!(
        matches!(err, ConnectionError::WriteBufferFull { limit: 4, .. }),
        "unexpected error: {err:?}"
    );
    // The connection itself is unharmed.
    assert!(conn.is_ready());

    conn.close().await;
}

#[tokio::test]
async fn close_drains_inflight_replies() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();
        let _ = read_frame(&mut stream, &mut buf).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream.write_all(b"+OK\r\n").await.unwrap();
        while read_frame(&mut stream, &mut buf).await.is_some() {}
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    // Close while a reply is still in flight; the reply must still resolve.
    let (reply, _) = tokio::join!(conn.send(Command::new("SET").arg("k").arg("v")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        conn.close().await;
    });
    assert_eq!(Value::SimpleString(Bytes::from("OK")), reply.unwrap());
    assert!(conn.is_closed());
    assert_eq!(CloseCause::Local, conn.close_cause());

    // Closing again is a no-op that resolves immediately.
    conn.close().await;

    let err = conn.send(cmd::ping()).await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Closed {
            cause: CloseCause::Local
        }
    ));
}

#[tokio::test]
async fn timed_out_request_keeps_the_fifo_aligned() {
    let addr = serve_once(|mut stream| async move {
        let mut buf = BytesMut::new();
        let _ = read_frame(&mut stream, &mut buf).await;
        let _ = read_frame(&mut stream, &mut buf).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        stream.write_all(b":1\r\n:2\r\n").await.unwrap();
        while read_frame(&mut stream, &mut buf).await.is_some() {}
    })
    .await;
    let conn = Connection::connect(&config(addr)).await.unwrap();

    let err = conn
        .send_timeout(cmd::ping(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Timeout(_)));

    // The stale reply belongs to the timed-out request and is discarded;
    // this request gets its own.
    let reply = conn.send(Command::new("GET").arg("k")).await.unwrap();
    assert_eq!(Value::Integer(2), reply);

    conn.close().await;
}
