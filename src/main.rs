//! # A Redis Client Demo
//!
//! Connects, runs the handshake, sends one command and prints the reply.

use anyhow::Result;
use clap::Parser;
use log::info;
use redis_pipeline_client::cli::Args;
use redis_pipeline_client::cmd::{self, Command};
use redis_pipeline_client::config::ConnectionConfig;
use redis_pipeline_client::conn::Connection;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut config = ConnectionConfig::new(&args.address).database(args.database);
    if let Some(username) = args.username {
        config = config.username(username);
    }
    if let Some(password) = args.password {
        config = config.password(password);
    }
    if let Some(client_name) = args.client_name {
        config = config.client_name(client_name);
    }

    info!("connecting to {}", config.address);
    let conn = Connection::connect(&config).await?;

    let command = match args.command.split_first() {
        Some((name, rest)) => rest
            .iter()
            .fold(Command::new(name), |command, arg| command.arg(arg)),
        None => cmd::ping(),
    };

    let reply = conn.send(command).await?;
    println!("{reply}");

    conn.close().await;

    Ok(())
}
