//! Unix socket binding helpers

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::net::UnixListener;

/// Bind a Unix listener at `path` with the given file mode
///
/// A stale socket file from a previous run is removed first. The mode is set
/// after binding, so the socket is never reachable with wider permissions
/// than requested.
pub fn bind(path: &str, mode: u32) -> Result<UnixListener> {
    let socket_path = Path::new(path);

    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket directory {}", parent.display()))?;
    }
    if socket_path.exists() {
        fs::remove_file(socket_path).with_context(|| format!("remove stale socket {}", path))?;
    }

    let listener = UnixListener::bind(socket_path).with_context(|| format!("bind {}", path))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {}", path))?;

    Ok(listener)
}
