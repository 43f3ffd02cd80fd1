//! User record model and related functionality

use serde::{Deserialize, Serialize};

/// A stored user record, keyed by username in the record store
///
/// This is both the unit of storage and the unit of protocol response. The
/// numeric ids are derived, not user-supplied; see the daemon's resolver
/// service for the derivation rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home_dir: String,
    pub shell: String,
    /// Gecos-style display text
    pub display_name: String,
    /// Placeholder only ("x"), never a real credential
    pub password: String,
    /// Insertion order preserved, not deduplicated
    pub ssh_keys: Vec<SshKey>,
}

/// A single published SSH public key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub algorithm: String,
    /// Base64 blob, opaque to the daemon
    pub key_material: String,
    /// Comment/name field
    pub label: String,
}

/// Selector for a record lookup: exactly one of username or uid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    ByUsername(String),
    ByUid(u32),
}
