//! # Command Pipeline
//!
//! One pipeline per connection. RESP carries no request identifiers: replies
//! arrive in the exact order requests were written, so correlating them is a
//! FIFO of pending completions.
//!
//! All pipeline state - the pending deque, the read and write buffers, the
//! socket - is owned by a single driver task. Callers submit work through a
//! channel and never touch that state, which makes the two ordering-critical
//! steps (queueing a frame's bytes and pushing its completion) trivially
//! atomic: both happen on the driver, in arrival order.
//!
//! Multiple requests arriving on the same tick are drained together and
//! flushed with a single write.
//!
//! Once a request is enqueued it cannot be withdrawn - the bytes are on the
//! wire and the server will reply. A caller that loses interest just drops
//! its receiver; the reply is discarded on arrival to keep the FIFO aligned.

use crate::cmd;
use crate::constants::{CLOSE_DRAIN_TIMEOUT, READ_BUFFER_CAPACITY};
use crate::errors::{CloseCause, ConnectionError, RespError};
use crate::resp::{decode, Value};
use crate::types::{Completion, PushSender};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::conn::ConnState;

/// Work submitted to a connection's driver task
#[derive(Debug)]
pub(crate) enum PipelineRequest {
    /// One encoded command frame plus the completion its reply resolves
    Send {
        frame: Bytes,
        completion: Completion,
        submitted_at: Instant,
    },
    /// Begin an orderly local close: `QUIT`, half-close, drain, done
    Shutdown,
}

/// A request whose bytes are queued to the socket and whose reply is awaited
#[derive(Debug)]
struct PendingRequest {
    completion: Completion,
    submitted_at: Instant,
}

/// How the main drive loop ended
enum Flow {
    /// `Shutdown` received (or every handle dropped): close gracefully
    LocalClose,
    /// The connection died under us
    Fatal(CloseCause),
}

/// Drives one connection: writes admitted frames, decodes inbound bytes and
/// resolves completions in FIFO order. Runs until the connection closes,
/// then fails whatever is still pending and publishes the close cause
/// exactly once.
pub(crate) async fn run_pipeline(
    mut stream: TcpStream,
    mut requests: mpsc::UnboundedReceiver<PipelineRequest>,
    buffered: Arc<AtomicUsize>,
    push_tx: PushSender,
    closed_tx: watch::Sender<Option<CloseCause>>,
    state_tx: Arc<watch::Sender<ConnState>>,
) {
    let mut pending: VecDeque<PendingRequest> = VecDeque::new();
    let mut read_buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    let mut write_buf = BytesMut::new();

    let (mut reader, mut writer) = stream.split();

    let flow = drive(
        &mut reader,
        &mut writer,
        &mut requests,
        &buffered,
        &mut pending,
        &mut read_buf,
        &mut write_buf,
        &push_tx,
    )
    .await;

    // No new work is accepted from here on; senders see a closed channel.
    requests.close();

    let cause = match flow {
        Flow::LocalClose => {
            let _ = state_tx.send(ConnState::Closing);
            finish_local_close(&mut reader, &mut writer, &mut pending, &mut read_buf, &push_tx)
                .await;
            CloseCause::Local
        }
        Flow::Fatal(cause) => cause,
    };

    if !cause.is_local() {
        // The one user-visible unexpected-closure notification; observers
        // get the cause through the watch below.
        warn!("connection closed unexpectedly: {cause}");
    }

    fail_all(&mut pending, &cause);
    drain_rejected_requests(&mut requests, &cause);

    let _ = state_tx.send(ConnState::Closed);
    let _ = closed_tx.send(Some(cause));
}

/// The steady-state loop: full duplex over one socket.
///
/// Writes happen inline in the request branch (coalescing everything already
/// queued on this tick into one flush); reads are decoded eagerly and each
/// complete frame resolves the head completion.
#[allow(clippy::too_many_arguments)]
async fn drive(
    reader: &mut ReadHalf<'_>,
    writer: &mut WriteHalf<'_>,
    requests: &mut mpsc::UnboundedReceiver<PipelineRequest>,
    buffered: &AtomicUsize,
    pending: &mut VecDeque<PendingRequest>,
    read_buf: &mut BytesMut,
    write_buf: &mut BytesMut,
    push_tx: &PushSender,
) -> Flow {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let mut shutdown = false;
                match request {
                    Some(request) => queue_request(request, write_buf, pending, &mut shutdown),
                    None => return Flow::LocalClose,
                }
                // Everything already submitted on this tick goes out in one
                // write, preserving order while saving syscalls.
                while let Ok(request) = requests.try_recv() {
                    queue_request(request, write_buf, pending, &mut shutdown);
                }
                if let Err(e) = flush(writer, write_buf, buffered).await {
                    return Flow::Fatal(CloseCause::Io(e.to_string()));
                }
                if shutdown {
                    return Flow::LocalClose;
                }
            }
            result = reader.read_buf(read_buf) => {
                match result {
                    Ok(0) => return Flow::Fatal(CloseCause::RemoteEof),
                    Ok(n) => {
                        trace!("read {n} bytes");
                        if let Err(e) = dispatch_frames(read_buf, pending, push_tx) {
                            return Flow::Fatal(CloseCause::Protocol(e));
                        }
                    }
                    Err(e) => return Flow::Fatal(CloseCause::Io(e.to_string())),
                }
            }
        }
    }
}

fn queue_request(
    request: PipelineRequest,
    write_buf: &mut BytesMut,
    pending: &mut VecDeque<PendingRequest>,
    shutdown: &mut bool,
) {
    match request {
        PipelineRequest::Send {
            frame,
            completion,
            submitted_at,
        } => {
            // The frame's bytes and its completion take the same relative
            // position: bytes here, completion at the deque tail.
            write_buf.extend_from_slice(&frame);
            pending.push_back(PendingRequest {
                completion,
                submitted_at,
            });
        }
        PipelineRequest::Shutdown => *shutdown = true,
    }
}

async fn flush(
    writer: &mut WriteHalf<'_>,
    write_buf: &mut BytesMut,
    buffered: &AtomicUsize,
) -> std::io::Result<()> {
    if write_buf.is_empty() {
        return Ok(());
    }
    let n = write_buf.len();
    writer.write_all(write_buf).await?;
    writer.flush().await?;
    write_buf.clear();
    buffered.fetch_sub(n, Ordering::AcqRel);
    trace!("flushed {n} bytes");
    Ok(())
}

/// Decodes every complete frame in the read buffer and routes it.
fn dispatch_frames(
    read_buf: &mut BytesMut,
    pending: &mut VecDeque<PendingRequest>,
    push_tx: &PushSender,
) -> Result<(), RespError> {
    while let Some((value, consumed)) = decode(&read_buf[..])? {
        read_buf.advance(consumed);
        dispatch(value, pending, push_tx);
    }
    Ok(())
}

/// Routes one decoded frame.
///
/// Push frames are server-initiated and never correlate with a request; they
/// go to the push sink. Attribute frames are reply metadata and consume no
/// completion either. Everything else resolves the head of the FIFO - a
/// server `Error` included, since at this layer it is a reply like any other.
fn dispatch(value: Value, pending: &mut VecDeque<PendingRequest>, push_tx: &PushSender) {
    match value {
        Value::Push(_) => {
            // Receiver may be gone; pushes are then dropped on the floor.
            let _ = push_tx.send(value);
        }
        Value::Attribute(pairs) => {
            debug!("skipping attribute metadata ({} pairs)", pairs.len());
        }
        value => match pending.pop_front() {
            Some(request) => {
                trace!(
                    "reply after {:?}",
                    Instant::now().duration_since(request.submitted_at)
                );
                // A dropped receiver means the caller gave up (timeout);
                // the reply is discarded but the FIFO stays aligned.
                let _ = request.completion.send(Ok(value));
            }
            None => debug!("discarding unsolicited frame"),
        },
    }
}

/// Orderly close: enqueue a final `QUIT`, half-close the write side, then
/// keep reading so in-flight replies (and the `QUIT` acknowledgement) can
/// resolve their completions before the socket is released.
async fn finish_local_close(
    reader: &mut ReadHalf<'_>,
    writer: &mut WriteHalf<'_>,
    pending: &mut VecDeque<PendingRequest>,
    read_buf: &mut BytesMut,
    push_tx: &PushSender,
) {
    let mut quit = BytesMut::new();
    quit.extend_from_slice(&cmd::quit().into_frame());
    // Best effort from here: the peer may already be gone.
    if writer.write_all(&quit).await.is_ok() {
        let _ = writer.flush().await;
    }
    let _ = writer.shutdown().await;

    let deadline = tokio::time::Instant::now() + CLOSE_DRAIN_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, reader.read_buf(read_buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                // The QUIT reply itself arrives with no pending completion
                // and is discarded by dispatch.
                if dispatch_frames(read_buf, pending, push_tx).is_err() {
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => {
                debug!("close drain timed out with {} request(s) pending", pending.len());
                break;
            }
        }
    }
}

/// Fails every pending completion with the connection's close cause.
/// Completions resolve exactly once: anything resolved by a reply already
/// left the deque.
fn fail_all(pending: &mut VecDeque<PendingRequest>, cause: &CloseCause) {
    for request in pending.drain(..) {
        let _ = request
            .completion
            .send(Err(ConnectionError::closed(cause.clone())));
    }
}

/// Fails requests that raced into the channel while the connection was
/// closing. Their bytes were never written.
fn drain_rejected_requests(
    requests: &mut mpsc::UnboundedReceiver<PipelineRequest>,
    cause: &CloseCause,
) {
    while let Ok(request) = requests.try_recv() {
        if let PipelineRequest::Send { completion, .. } = request {
            let _ = completion.send(Err(ConnectionError::closed(cause.clone())));
        }
    }
}
