//! Scripted in-process servers for the integration tests.
//!
//! The tests talk RESP to real sockets; these helpers play the server side
//! using the crate's own codec to frame incoming commands.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use redis_pipeline_client::resp::{decode, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Binds an ephemeral port and serves exactly one connection with `script`.
pub async fn serve_once<F, Fut>(script: F) -> SocketAddr
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            script(stream).await;
        }
    });
    addr
}

/// Counters a multi-connection server updates as clients come and go
#[derive(Debug, Default)]
pub struct ServerStats {
    pub accepted: AtomicUsize,
    pub disconnected: AtomicUsize,
}

impl ServerStats {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Accept loop that answers every command on every connection with `+OK`.
/// Used by the pool tests, which care about connection counts rather than
/// reply payloads.
pub async fn serve_many(stats: Arc<ServerStats>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            stats.accepted.fetch_add(1, Ordering::SeqCst);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                while read_frame(&mut stream, &mut buf).await.is_some() {
                    if stream.write_all(b"+OK\r\n").await.is_err() {
                        break;
                    }
                }
                stats.disconnected.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    addr
}

/// Reads one complete RESP frame off the stream, or `None` on EOF.
pub async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<Value> {
    loop {
        if let Some((value, consumed)) = decode(&buf[..]).unwrap() {
            buf.advance(consumed);
            return Some(value);
        }
        match stream.read_buf(buf).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Answers each incoming command with the next canned reply, then keeps
/// reading (QUIT included) until the client goes away.
pub async fn respond_in_order(mut stream: TcpStream, replies: Vec<&'static [u8]>) {
    let mut buf = BytesMut::new();
    for reply in replies {
        if read_frame(&mut stream, &mut buf).await.is_none() {
            return;
        }
        if stream.write_all(reply).await.is_err() {
            return;
        }
    }
    while read_frame(&mut stream, &mut buf).await.is_some() {}
}

/// The decoded form of a client command, for asserting on handshake traffic
pub fn command_args(frame: &Value) -> Vec<String> {
    match frame {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::BulkString(Some(arg)) => String::from_utf8_lossy(arg).into_owned(),
                other => panic!("command argument is not a bulk string: {other:?}"),
            })
            .collect(),
        other => panic!("command frame is not an array: {other:?}"),
    }
}

/// Polls `condition` until it holds or half a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    condition()
}
