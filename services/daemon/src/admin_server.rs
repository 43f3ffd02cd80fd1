//! Privileged management protocol on the owner-only socket
//!
//! Same single-line, single-request shape as the data protocol, but the
//! commands mutate: `SETUSER` admits a record and `SYNC` triggers
//! reconciliation. Failures of either map to a bare `NOTFOUND`; no detail
//! crosses the socket.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use common::models::{SshKey, UserRecord};

use crate::service::ResolverService;

/// Hard deadline on the socket reads and writes
///
/// The deadline bounds the I/O, not the dispatched command: a `SYNC` keeps
/// its own reconciliation deadline, so its failure reply still reaches the
/// client instead of the connection being cut mid-sync.
const IO_DEADLINE: Duration = Duration::from_secs(3);

const OK: &str = "OK\n";
const NOT_FOUND: &str = "NOTFOUND\n";

/// Accept connections until a fatal listener error
pub async fn run(listener: UnixListener, service: ResolverService) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("management socket accept")?;
        let service = service.clone();

        tokio::spawn(handle_connection(stream, service));
    }
}

async fn handle_connection(stream: UnixStream, service: ResolverService) {
    let (read_half, mut write_half) = stream.into_split();

    let mut line = String::new();
    match tokio::time::timeout(IO_DEADLINE, BufReader::new(read_half).read_line(&mut line)).await {
        Ok(Ok(_)) => {}
        Ok(Err(_)) | Err(_) => {
            debug!("management request not read in time");
            return;
        }
    }

    debug!("management request: {}", line.trim_end());

    let reply = respond(&service, &line).await;
    if tokio::time::timeout(IO_DEADLINE, write_half.write_all(reply.as_bytes()))
        .await
        .is_err()
    {
        debug!("management reply write dropped at deadline");
    }
}

/// Map one request line to its reply
async fn respond(service: &ResolverService, line: &str) -> String {
    let fields: Vec<&str> = line.split_whitespace().collect();

    match fields.as_slice() {
        ["SETUSER", username, algorithm, key_material, label] => {
            let record = UserRecord {
                username: (*username).to_string(),
                ssh_keys: vec![SshKey {
                    algorithm: (*algorithm).to_string(),
                    key_material: (*key_material).to_string(),
                    label: (*label).to_string(),
                }],
                ..UserRecord::default()
            };

            match service.add_user(record) {
                Ok(()) => OK.to_string(),
                Err(err) => {
                    warn!("SETUSER failed: {:#}", err);
                    NOT_FOUND.to_string()
                }
            }
        }
        ["SYNC"] => match service.sync().await {
            Ok(()) => OK.to_string(),
            Err(err) => {
                warn!("SYNC failed: {:#}", err);
                NOT_FOUND.to_string()
            }
        },
        _ => NOT_FOUND.to_string(),
    }
}
