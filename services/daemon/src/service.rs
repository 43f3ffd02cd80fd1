//! Resolution service and reconciliation
//!
//! The business-logic facade shared by both protocol servers: record lookup,
//! administrative creation, and the periodic reconciliation against the
//! identity provider.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use common::config::Config;
use common::error::StoreError;
use common::models::{SearchQuery, SshKey, UserRecord};
use common::store::UserStore;

use crate::provider::IdentityProvider;

/// Upper bound for one reconciliation run
const SYNC_DEADLINE: Duration = Duration::from_secs(10);

/// Derive the numeric-id offset for an identity string
///
/// SHA-256 of the input, first 8 digest bytes read as a big-endian integer,
/// truncated to 32 bits. Deterministic across platforms and restarts, so the
/// same identity always maps to the same local uid. There is no range clamp
/// and no collision check; two distinct identities can, rarely, derive the
/// same offset.
pub fn derive_id(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) as u32
}

/// Business-logic facade consumed by both protocol servers
#[derive(Clone)]
pub struct ResolverService {
    config: Config,
    store: Arc<UserStore>,
    provider: Arc<dyn IdentityProvider>,
}

impl ResolverService {
    /// Create a new resolver service
    pub fn new(
        config: Config,
        store: Arc<UserStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
        }
    }

    /// Find a record by the query's selector
    pub fn find_user(&self, query: &SearchQuery) -> Result<UserRecord, StoreError> {
        match query {
            SearchQuery::ByUsername(username) => self.store.get(username),
            SearchQuery::ByUid(uid) => self.store.get_by_uid(*uid),
        }
    }

    /// Admit a record, filling the derived fields
    ///
    /// The uid is derived from the username on this path. Overwrites any
    /// existing record for the same username unconditionally; the override
    /// policy only guards reconciliation.
    pub fn add_user(&self, mut record: UserRecord) -> Result<()> {
        record.uid = self.config.min_uid.wrapping_add(derive_id(&record.username));
        record.gid = self.config.group_id;
        record.home_dir = self.config.home_dir_for(&record.username);
        record.password = "x".to_string();
        if record.display_name.is_empty() {
            record.display_name = record.username.clone();
        }
        if record.shell.is_empty() {
            record.shell = self.config.shell.clone();
        }

        info!("creating user {}", record.username);

        self.store
            .put(&record.username, &record)
            .context("create user")?;

        Ok(())
    }

    /// Reconcile the local store against the identity provider
    pub async fn sync(&self) -> Result<()> {
        tokio::time::timeout(SYNC_DEADLINE, self.sync_all())
            .await
            .map_err(|_| anyhow::anyhow!("sync deadline exceeded"))?
    }

    async fn sync_all(&self) -> Result<()> {
        let identities = self.provider.fetch_users().await.context("fetch users")?;

        for identity in identities {
            if identity.raw_ssh_public_key.is_empty() {
                continue;
            }

            match self.store.get(&identity.username) {
                Ok(_) => {
                    if !self.config.override_on_sync {
                        warn!("override disabled, keeping record for {}", identity.username);
                        continue;
                    }
                }
                Err(StoreError::NotFound) => {}
                Err(err) => return Err(err).context("store read"),
            }

            info!("creating user {}", identity.username);

            // Expected shape is "algorithm key comment"; anything else is
            // logged and still indexed with the fields that are present.
            let parts: Vec<&str> = identity.raw_ssh_public_key.split_whitespace().collect();
            if parts.len() != 3 {
                error!("key format error for {}", identity.username);
            }
            let key = SshKey {
                algorithm: parts.first().copied().unwrap_or_default().to_string(),
                key_material: parts.get(1).copied().unwrap_or_default().to_string(),
                label: parts.get(2).copied().unwrap_or_default().to_string(),
            };

            let record = UserRecord {
                username: identity.username.clone(),
                uid: self.config.min_uid.wrapping_add(derive_id(&identity.id)),
                gid: self.config.group_id,
                home_dir: self.config.home_dir_for(&identity.username),
                shell: self.config.shell.clone(),
                display_name: identity.full_name,
                password: "x".to_string(),
                ssh_keys: vec![key],
            };

            self.store
                .put(&identity.username, &record)
                .context("store write")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ExternalIdentity;
    use async_trait::async_trait;
    use common::config::ProviderConfig;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct StaticProvider {
        identities: Vec<ExternalIdentity>,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn fetch_user(&self, username: &str) -> Result<ExternalIdentity> {
            self.identities
                .iter()
                .find(|identity| identity.username == username)
                .cloned()
                .context("not known")
        }

        async fn fetch_users(&self) -> Result<Vec<ExternalIdentity>> {
            Ok(self.identities.clone())
        }
    }

    struct UnreachableProvider;

    #[async_trait]
    impl IdentityProvider for UnreachableProvider {
        async fn fetch_user(&self, _username: &str) -> Result<ExternalIdentity> {
            anyhow::bail!("connection refused")
        }

        async fn fetch_users(&self) -> Result<Vec<ExternalIdentity>> {
            anyhow::bail!("connection refused")
        }
    }

    fn test_config(store_path: &str, override_on_sync: bool) -> Config {
        Config {
            data_socket_path: "/tmp/unused-data.sock".to_string(),
            admin_socket_path: "/tmp/unused-admin.sock".to_string(),
            store_path: store_path.to_string(),
            min_uid: 10_000,
            group_id: 1_000,
            home_template: "/home/%s".to_string(),
            shell: "/bin/bash".to_string(),
            override_on_sync,
            username_suffixes: Vec::new(),
            provider: ProviderConfig {
                server: "http://127.0.0.1:1".to_string(),
                realm: "master".to_string(),
                client_id: "admin-cli".to_string(),
                username: "svc".to_string(),
                password: "secret".to_string(),
            },
        }
    }

    fn service_with(
        tmp: &TempDir,
        override_on_sync: bool,
        provider: Arc<dyn IdentityProvider>,
    ) -> ResolverService {
        let store_path = tmp.path().join("users.db");
        let store_path = store_path.to_str().unwrap();
        let store = Arc::new(UserStore::open(store_path).unwrap());
        ResolverService::new(test_config(store_path, override_on_sync), store, provider)
    }

    fn identity(username: &str, key_line: &str) -> ExternalIdentity {
        ExternalIdentity {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            full_name: format!("{} Example", username),
            raw_ssh_public_key: key_line.to_string(),
        }
    }

    #[test]
    fn test_derive_id_is_deterministic() {
        assert_eq!(derive_id("alice"), derive_id("alice"));

        // Pinned values: SHA-256 is platform-independent, so these must
        // never change across runs or machines.
        assert_eq!(derive_id(""), 0x98fc_1c14);
        assert_eq!(derive_id("abc"), 0x8f01_cfea);
    }

    #[test]
    fn test_derive_id_distinguishes_distinct_inputs() {
        assert_ne!(
            derive_id("6b7c1a2e-0001-4000-8000-000000000001"),
            derive_id("6b7c1a2e-0001-4000-8000-000000000002")
        );
    }

    #[tokio::test]
    async fn test_add_user_fills_derived_fields() {
        let tmp = TempDir::new().unwrap();
        let service = service_with(&tmp, false, Arc::new(UnreachableProvider));

        service
            .add_user(UserRecord {
                username: "alice".to_string(),
                ssh_keys: vec![SshKey {
                    algorithm: "ssh-ed25519".to_string(),
                    key_material: "AAAAC3Nz".to_string(),
                    label: "alice-key".to_string(),
                }],
                ..UserRecord::default()
            })
            .unwrap();

        let record = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();
        assert_eq!(record.uid, 10_000u32.wrapping_add(derive_id("alice")));
        assert_eq!(record.gid, 1_000);
        assert_eq!(record.home_dir, "/home/alice");
        assert_eq!(record.shell, "/bin/bash");
        assert_eq!(record.display_name, "alice");
        assert_eq!(record.password, "x");
        assert_eq!(record.ssh_keys.len(), 1);
    }

    #[tokio::test]
    async fn test_add_user_keeps_supplied_shell_and_display_name() {
        let tmp = TempDir::new().unwrap();
        let service = service_with(&tmp, false, Arc::new(UnreachableProvider));

        service
            .add_user(UserRecord {
                username: "alice".to_string(),
                shell: "/bin/zsh".to_string(),
                display_name: "Alice Example".to_string(),
                ..UserRecord::default()
            })
            .unwrap();

        let record = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();
        assert_eq!(record.shell, "/bin/zsh");
        assert_eq!(record.display_name, "Alice Example");
    }

    #[tokio::test]
    async fn test_find_user_by_uid_dispatches_to_scan() {
        let tmp = TempDir::new().unwrap();
        let service = service_with(&tmp, false, Arc::new(UnreachableProvider));

        service
            .add_user(UserRecord {
                username: "alice".to_string(),
                ..UserRecord::default()
            })
            .unwrap();

        let uid = 10_000u32.wrapping_add(derive_id("alice"));
        let record = service.find_user(&SearchQuery::ByUid(uid)).unwrap();
        assert_eq!(record.username, "alice");
    }

    #[tokio::test]
    async fn test_sync_skips_identities_without_a_published_key() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(StaticProvider {
            identities: vec![identity("alice", "")],
        });
        let service = service_with(&tmp, true, provider);

        service.sync().await.unwrap();

        assert!(service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .is_err());
    }

    #[tokio::test]
    async fn test_sync_with_override_disabled_keeps_existing_record() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(StaticProvider {
            identities: vec![identity("alice", "ssh-ed25519 REMOTE remote-key")],
        });
        let service = service_with(&tmp, false, provider);

        service
            .add_user(UserRecord {
                username: "alice".to_string(),
                ssh_keys: vec![SshKey {
                    algorithm: "ssh-ed25519".to_string(),
                    key_material: "LOCAL".to_string(),
                    label: "local-key".to_string(),
                }],
                ..UserRecord::default()
            })
            .unwrap();

        service.sync().await.unwrap();

        let record = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();
        assert_eq!(record.ssh_keys[0].key_material, "LOCAL");
        // add_user derives from the username, so the uid is unchanged too
        assert_eq!(record.uid, 10_000u32.wrapping_add(derive_id("alice")));
    }

    #[tokio::test]
    async fn test_sync_with_override_enabled_overwrites_with_derived_values() {
        let tmp = TempDir::new().unwrap();
        let remote = identity("alice", "ssh-ed25519 REMOTE remote-key");
        let remote_id = remote.id.clone();
        let provider = Arc::new(StaticProvider {
            identities: vec![remote],
        });
        let service = service_with(&tmp, true, provider);

        service
            .add_user(UserRecord {
                username: "alice".to_string(),
                ..UserRecord::default()
            })
            .unwrap();

        service.sync().await.unwrap();

        let record = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();
        assert_eq!(record.uid, 10_000u32.wrapping_add(derive_id(&remote_id)));
        assert_eq!(record.display_name, "alice Example");
        assert_eq!(record.ssh_keys[0].key_material, "REMOTE");
        assert_eq!(record.ssh_keys[0].label, "remote-key");
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_for_new_identities() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(StaticProvider {
            identities: vec![identity("alice", "ssh-ed25519 REMOTE remote-key")],
        });
        let service = service_with(&tmp, false, provider);

        service.sync().await.unwrap();
        let first = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();

        service.sync().await.unwrap();
        let second = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sync_indexes_a_malformed_key_line_partially() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(StaticProvider {
            identities: vec![identity("alice", "ssh-ed25519 AAAAC3Nz")],
        });
        let service = service_with(&tmp, true, provider);

        service.sync().await.unwrap();

        let record = service
            .find_user(&SearchQuery::ByUsername("alice".to_string()))
            .unwrap();
        assert_eq!(record.ssh_keys[0].algorithm, "ssh-ed25519");
        assert_eq!(record.ssh_keys[0].key_material, "AAAAC3Nz");
        assert_eq!(record.ssh_keys[0].label, "");
    }

    #[tokio::test]
    async fn test_sync_reports_provider_failure() {
        let tmp = TempDir::new().unwrap();
        let service = service_with(&tmp, true, Arc::new(UnreachableProvider));

        assert!(service.sync().await.is_err());
    }
}
