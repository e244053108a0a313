//! # Types
//!
//! Channel and result type aliases used throughout the library
//!
//! A request travels as a pre-encoded frame plus a one-shot completion.
//! The pipeline driver resolves every completion exactly once: with the
//! server's reply, or with [`ConnectionError::Closed`] when the connection
//! dies first.

use crate::errors::ConnectionError;
use crate::resp::Value;
use tokio::sync::{mpsc, oneshot};

/// The outcome of a single command: the server's reply, or a connection-level
/// failure. A server `-ERR …` reply is a *successful* outcome carrying
/// [`Value::Error`]; callers decide whether to treat it as an error.
pub type CommandResult = Result<Value, ConnectionError>;

/// Single-resolution handoff for one command's reply
pub(crate) type Completion = oneshot::Sender<CommandResult>;

/// Sink for RESP3 server-push frames, kept apart from request completions
pub(crate) type PushSender = mpsc::UnboundedSender<Value>;
/// Receiving side of the push sink; obtained via
/// [`crate::conn::Connection::take_push_receiver`]
pub type PushReceiver = mpsc::UnboundedReceiver<Value>;
