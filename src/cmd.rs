//! # Command Builder
//!
//! A Redis command is an ordered sequence of binary-safe arguments - the
//! keyword first - always sent as an RESP2 array of bulk strings. This crate
//! treats commands opaquely; the full command catalogue is a thin layer that
//! builds these argument lists and converts replies.
//!
//! The free functions below cover only the commands the core itself needs:
//! the connection handshake (`AUTH`, `SELECT`, `CLIENT SETNAME`, `HELLO`),
//! teardown (`QUIT`) and the liveness probes (`PING`, `ECHO`).
//!
//! [Sending commands to a Redis server](https://redis.io/docs/latest/develop/reference/protocol-spec/#sending-commands-to-a-redis-server)

use crate::resp::encode_command_args;
use bytes::{Bytes, BytesMut};

/// An outbound command: keyword plus arguments
///
/// ```
/// use redis_pipeline_client::cmd::Command;
///
/// let command = Command::new("SET").arg("key").arg("value");
/// assert_eq!(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n", &command.into_frame()[..]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Starts a command with the given keyword
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_ref())],
        }
    }

    /// Appends one binary-safe argument
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// The command keyword
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// All arguments, keyword included
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Serializes the command into its wire frame
    pub fn into_frame(self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_command_args(&self.args, &mut buf);
        buf.freeze()
    }
}

/// `PING`
pub fn ping() -> Command {
    Command::new("PING")
}

/// `ECHO message`
pub fn echo(message: impl AsRef<[u8]>) -> Command {
    Command::new("ECHO").arg(message)
}

/// `AUTH [username] password` - the username is omitted unless configured
pub fn auth(username: Option<&str>, password: &str) -> Command {
    match username {
        Some(username) => Command::new("AUTH").arg(username).arg(password),
        None => Command::new("AUTH").arg(password),
    }
}

/// `SELECT index`
pub fn select(database: i64) -> Command {
    Command::new("SELECT").arg(database.to_string())
}

/// `CLIENT SETNAME name`
pub fn client_setname(name: &str) -> Command {
    Command::new("CLIENT").arg("SETNAME").arg(name)
}

/// `HELLO protover` - protocol negotiation is a command like any other; the
/// core never infers the RESP version from context
pub fn hello(protocol_version: u8) -> Command {
    Command::new("HELLO").arg(protocol_version.to_string())
}

/// `QUIT`
pub fn quit() -> Command {
    Command::new("QUIT")
}
