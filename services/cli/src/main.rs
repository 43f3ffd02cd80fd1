//! Command-line front-end for the identity-resolution daemon
//!
//! Dials the daemon's Unix sockets and speaks the line protocols: user
//! creation and sync over the management socket, key retrieval over the
//! data socket. A `NOTFOUND` reply becomes a non-zero exit code.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use common::config::Config;

#[derive(Parser)]
#[command(name = "ident", about = "Manage the local identity-resolution daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or replace a user record with one SSH key
    Adduser {
        username: String,
        algorithm: String,
        key: String,
        label: String,
    },
    /// Print the SSH keys published for a user
    Key { username: String },
    /// Trigger reconciliation against the identity provider
    Sync,
}

/// Send one request line and collect the full reply
async fn exchange(path: &str, line: String) -> Result<String> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("dial {}", path))?;
    stream
        .write_all(line.as_bytes())
        .await
        .context("send request")?;
    stream.shutdown().await.context("finish request")?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .context("read reply")?;
    Ok(reply)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Adduser {
            username,
            algorithm,
            key,
            label,
        } => {
            let line = format!("SETUSER {} {} {} {}\n", username, algorithm, key, label);
            let reply = exchange(&config.admin_socket_path, line).await?;
            if reply.trim_end() != "OK" {
                eprintln!("create user failed: {}", username);
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Key { username } => {
            let line = format!("GETSSHKEY {}\n", username);
            let reply = exchange(&config.data_socket_path, line).await?;
            if reply.contains("NOTFOUND") {
                eprintln!("user not found: {}", username);
                return Ok(ExitCode::from(2));
            }
            for line in reply.lines() {
                if let Some(key_line) = line.strip_prefix("OK ") {
                    println!("{}", key_line);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync => {
            let reply = exchange(&config.admin_socket_path, "SYNC\n".to_string()).await?;
            if reply.trim_end() != "OK" {
                eprintln!("sync failed");
                return Ok(ExitCode::FAILURE);
            }
            println!("sync completed");
            Ok(ExitCode::SUCCESS)
        }
    }
}
