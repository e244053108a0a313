//! # Constants
//!
//! Constants used throughout the library

use std::time::Duration;

/// The default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// The default local server address, used by the demo binary
pub const LOCAL_SOCKET_ADDR_STR: &str = "127.0.0.1";

/// Capacity hint for a connection's inbound read buffer
pub const READ_BUFFER_CAPACITY: usize = 4 * 1024;

/// Maximum nesting depth the decoder accepts before giving up on a frame.
/// Guards against pathological server input exhausting the stack.
pub const MAX_PARSE_DEPTH: usize = 128;

/// Default ceiling for bytes buffered on a connection's write side.
/// Requests that would exceed it fail immediately instead of queueing.
pub const DEFAULT_WRITE_BUFFER_LIMIT: usize = 1024 * 1024;

/// How long a closing connection keeps reading to let the server's final
/// replies (including the `QUIT` acknowledgement) arrive
pub const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-attempt timeout when building a new connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default first delay of the reconnection backoff schedule
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Default multiplier of the reconnection backoff schedule
pub const DEFAULT_RETRY_FACTOR: f64 = 2.0;

/// Default ceiling of the reconnection backoff schedule
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default deadline for a pool lease when the caller does not provide one
pub const DEFAULT_LEASE_DEADLINE: Duration = Duration::from_secs(30);

/// Number of hash slots in a Redis cluster
pub const CLUSTER_HASH_SLOTS: u16 = 16384;
