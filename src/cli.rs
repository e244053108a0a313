//! # The Command-Line Arguments

use crate::constants::{DEFAULT_PORT, LOCAL_SOCKET_ADDR_STR};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "Redis Client Demo")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The server address, `host:port`
    #[arg(short, long, default_value_t = format!("{LOCAL_SOCKET_ADDR_STR}:{DEFAULT_PORT}"))]
    pub address: String,

    /// Username for AUTH
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for AUTH
    #[arg(short, long)]
    pub password: Option<String>,

    /// Database index to SELECT
    #[arg(short, long, default_value_t = 0)]
    pub database: i64,

    /// Connection name for CLIENT SETNAME
    #[arg(long)]
    pub client_name: Option<String>,

    /// The command to run, keyword first (defaults to PING)
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}
