//! Read-only resolution protocol on the public data socket
//!
//! One request per connection: a single line is read, tokenized on
//! whitespace, and answered with either `OK ...` or `NOTFOUND`. Every
//! connection carries a hard deadline from the moment it is accepted; name
//! resolution is on the callers' synchronous path and must never block them.
//! Malformed input is answered with `NOTFOUND`, never with a failure that
//! escapes the handler.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use common::error::StoreError;
use common::models::SearchQuery;

use crate::service::ResolverService;

/// Hard per-connection deadline
const CONNECTION_DEADLINE: Duration = Duration::from_secs(3);

const NOT_FOUND: &str = "NOTFOUND\n";

/// Accept connections until a fatal listener error
///
/// Each accepted connection is served by its own task; a slow client only
/// loses its own connection when the deadline fires.
pub async fn run(listener: UnixListener, service: ResolverService) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("data socket accept")?;
        let service = service.clone();

        tokio::spawn(async move {
            if tokio::time::timeout(CONNECTION_DEADLINE, handle_connection(stream, service))
                .await
                .is_err()
            {
                debug!("data connection dropped at deadline");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, service: ResolverService) {
    let (read_half, mut write_half) = stream.into_split();

    let mut line = String::new();
    if BufReader::new(read_half).read_line(&mut line).await.is_err() {
        return;
    }

    debug!("data request: {}", line.trim_end());

    let reply = respond(&service, &line);
    if write_half.write_all(reply.as_bytes()).await.is_err() {
        debug!("data reply write failed");
    }
}

/// Map one request line to its reply
fn respond(service: &ResolverService, line: &str) -> String {
    let fields: Vec<&str> = line.split_whitespace().collect();

    match fields.as_slice() {
        ["GETPWNAM", username] => {
            passwd_reply(service, &SearchQuery::ByUsername((*username).to_string()))
        }
        ["GETPWUID", raw_uid] => {
            // A malformed uid resolves like uid 0 and misses
            let uid = raw_uid.parse::<u32>().unwrap_or(0);
            passwd_reply(service, &SearchQuery::ByUid(uid))
        }
        ["GETSSHKEY", username] => {
            match service.find_user(&SearchQuery::ByUsername((*username).to_string())) {
                Ok(record) => record
                    .ssh_keys
                    .iter()
                    .map(|key| format!("OK {} {} {}\n", key.algorithm, key.key_material, key.label))
                    .collect(),
                Err(StoreError::NotFound) => NOT_FOUND.to_string(),
                Err(err) => {
                    warn!("key lookup failed: {}", err);
                    NOT_FOUND.to_string()
                }
            }
        }
        _ => NOT_FOUND.to_string(),
    }
}

fn passwd_reply(service: &ResolverService, query: &SearchQuery) -> String {
    match service.find_user(query) {
        Ok(record) => format!(
            "OK {} {} {} {} {}\n",
            record.username, record.uid, record.gid, record.home_dir, record.shell
        ),
        Err(StoreError::NotFound) => NOT_FOUND.to_string(),
        Err(err) => {
            warn!("resolution lookup failed: {}", err);
            NOT_FOUND.to_string()
        }
    }
}
