//! # Redis Client Core Library
//!
//! The building blocks of an asynchronous Redis client:
//! - the RESP2/RESP3 wire codec ([`resp`]),
//! - a pipelined connection that keeps replies matched to requests in
//!   issuance order ([`conn`], [`pipeline`]),
//! - a connection pool with fair-queued leases, deadlines and
//!   exponential-backoff reconnection ([`pool`]).
//!
//! Commands are treated opaquely as arrays of bulk strings ([`mod@cmd`]);
//! the command catalogue itself is a thin layer on top of this crate.

pub mod cli;
pub mod cluster;
pub mod cmd;
pub mod config;
pub mod conn;
pub mod constants;
pub mod errors;
#[macro_use]
pub mod macros;
pub mod pipeline;
pub mod pool;
pub mod resp;
pub mod types;
