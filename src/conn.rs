//! # Connection
//!
//! A handle over one duplex stream and its pipeline driver task.
//!
//! Lifecycle: `Opening -> Authenticating -> Ready -> Closing -> Closed`.
//! A connection authenticates once, serves requests while `Ready`, and never
//! reopens: any fatal error, remote EOF or local close is terminal. The pool
//! replaces dead connections instead of reviving them.

use crate::cmd::{self, Command};
use crate::config::ConnectionConfig;
use crate::errors::{CloseCause, ConnectionError};
use crate::pipeline::{run_pipeline, PipelineRequest};
use crate::resp::Value;
use crate::types::PushReceiver;
use log::{debug, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Transport being established
    Opening,
    /// Handshake (`AUTH`/`SELECT`/`CLIENT SETNAME`) in flight
    Authenticating,
    /// Serving requests
    Ready,
    /// `QUIT` sent, draining final replies
    Closing,
    /// Socket released; all pending requests resolved or failed
    Closed,
}

/// A live connection to one Redis server
///
/// Requests submitted through [`Connection::send`] resolve strictly in
/// issuance order. Dropping the handle without calling [`Connection::close`]
/// still shuts the driver down cleanly.
#[derive(Debug)]
pub struct Connection {
    requests: mpsc::UnboundedSender<PipelineRequest>,
    buffered: Arc<AtomicUsize>,
    write_buffer_limit: usize,
    state_tx: Arc<watch::Sender<ConnState>>,
    state_rx: watch::Receiver<ConnState>,
    closed_rx: watch::Receiver<Option<CloseCause>>,
    push_rx: Option<PushReceiver>,
}

impl Connection {
    /// Opens a TCP connection, spawns its driver task and runs the handshake.
    ///
    /// The handshake sends, in order and each only when configured:
    /// `AUTH [username] password`, `SELECT database`, `CLIENT SETNAME name`.
    /// A server rejection surfaces as [`ConnectionError::Handshake`] and the
    /// connection is closed before returning.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        config.validate()?;
        debug!("connecting to {}", config.address);
        let stream = TcpStream::connect(&config.address).await?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(ConnState::Opening);
        let state_tx = Arc::new(state_tx);
        let buffered = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_pipeline(
            stream,
            request_rx,
            Arc::clone(&buffered),
            push_tx,
            closed_tx,
            Arc::clone(&state_tx),
        ));

        let conn = Self {
            requests: request_tx,
            buffered,
            write_buffer_limit: config.write_buffer_limit,
            state_tx,
            state_rx,
            closed_rx,
            push_rx: Some(push_rx),
        };

        let _ = conn.state_tx.send(ConnState::Authenticating);
        if let Err(e) = conn.handshake(config).await {
            conn.close().await;
            return Err(e);
        }
        let _ = conn.state_tx.send(ConnState::Ready);
        debug!("connection to {} ready", config.address);

        Ok(conn)
    }

    async fn handshake(&self, config: &ConnectionConfig) -> Result<(), ConnectionError> {
        if let Some(password) = &config.password {
            let reply = self
                .submit(cmd::auth(config.username.as_deref(), password))
                .await?;
            Self::check_handshake_reply(reply)?;
        }
        if config.database != 0 {
            let reply = self.submit(cmd::select(config.database)).await?;
            Self::check_handshake_reply(reply)?;
        }
        if let Some(name) = &config.client_name {
            let reply = self.submit(cmd::client_setname(name)).await?;
            Self::check_handshake_reply(reply)?;
        }
        Ok(())
    }

    fn check_handshake_reply(reply: Value) -> Result<(), ConnectionError> {
        match reply {
            Value::Error(msg) => Err(ConnectionError::Handshake(
                String::from_utf8_lossy(&msg).into_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Whether the connection accepts new requests
    pub fn is_ready(&self) -> bool {
        self.state() == ConnState::Ready
    }

    /// Whether the connection has fully closed
    pub fn is_closed(&self) -> bool {
        self.state() == ConnState::Closed
    }

    /// Sends a command and suspends until its reply arrives or the
    /// connection closes.
    ///
    /// A server error reply resolves *successfully* as [`Value::Error`];
    /// whether that is an error is the caller's business. Outside `Ready`
    /// the request is rejected with [`ConnectionError::Closed`].
    pub async fn send(&self, command: Command) -> Result<Value, ConnectionError> {
        if !self.is_ready() {
            return Err(ConnectionError::closed(self.close_cause()));
        }
        self.submit(command).await
    }

    /// [`Connection::send`] with a per-request deadline.
    ///
    /// On expiry only the caller's view is cancelled: the request is already
    /// on the wire, the server will reply, and the reply is discarded to
    /// keep the FIFO aligned.
    pub async fn send_timeout(
        &self,
        command: Command,
        limit: Duration,
    ) -> Result<Value, ConnectionError> {
        match tokio::time::timeout(limit, self.send(command)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(limit)),
        }
    }

    /// Admission control plus the actual submit; used by `send` and, before
    /// the connection is `Ready`, by the handshake.
    async fn submit(&self, command: Command) -> Result<Value, ConnectionError> {
        let frame = command.into_frame();
        let len = frame.len();

        // Backpressure: admit the frame's bytes against the write ceiling
        // up front, or refuse without enqueueing anything.
        let admitted = self.buffered.fetch_add(len, Ordering::AcqRel) + len;
        if admitted > self.write_buffer_limit {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(ConnectionError::WriteBufferFull {
                buffered: admitted - len,
                limit: self.write_buffer_limit,
            });
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        let request = PipelineRequest::Send {
            frame,
            completion: completion_tx,
            submitted_at: Instant::now(),
        };
        if self.requests.send(request).is_err() {
            // Driver already gone; the frame was never written.
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(ConnectionError::closed(self.close_cause()));
        }

        match completion_rx.await {
            Ok(result) => result,
            // The driver fails every pending completion before exiting, so
            // a dropped sender can only mean it was torn down mid-flight.
            Err(_) => Err(ConnectionError::closed(self.close_cause())),
        }
    }

    /// Starts an orderly close: a final `QUIT` goes out, the write side
    /// half-closes, in-flight replies drain, then the socket is released.
    ///
    /// Idempotent - later calls (and concurrent ones) just await the first
    /// close finishing.
    pub async fn close(&self) {
        let mut initiate = false;
        self.state_tx.send_modify(|state| {
            if !matches!(*state, ConnState::Closing | ConnState::Closed) {
                *state = ConnState::Closing;
                initiate = true;
            }
        });
        if initiate {
            trace!("initiating local close");
            let _ = self.requests.send(PipelineRequest::Shutdown);
        }
        self.closed().await;
    }

    /// Resolves once, when the connection has fully closed, with the cause.
    /// For closures the local side did not initiate this is the
    /// unexpected-closure notification.
    pub async fn closed(&self) -> CloseCause {
        let mut closed_rx = self.closed_rx.clone();
        let result = closed_rx.wait_for(|cause| cause.is_some()).await;
        match result {
            Ok(cause) => cause.as_ref().cloned().unwrap_or(CloseCause::Local),
            // Driver vanished without publishing; nothing better to report.
            Err(_) => CloseCause::Local,
        }
    }

    /// The close cause, if the connection has one already
    pub fn close_cause(&self) -> CloseCause {
        self.closed_rx
            .borrow()
            .as_ref()
            .cloned()
            .unwrap_or(CloseCause::Local)
    }

    /// A detached observer of the close cause, for watching a connection
    /// without holding the handle
    pub(crate) fn close_watch(&self) -> watch::Receiver<Option<CloseCause>> {
        self.closed_rx.clone()
    }

    /// Takes the receiving end of the RESP3 push sink. Server-push frames
    /// (`pubsub`, `invalidate`, ...) arrive here instead of resolving
    /// request completions. Yields `None` after the first call.
    pub fn take_push_receiver(&mut self) -> Option<PushReceiver> {
        self.push_rx.take()
    }
}
