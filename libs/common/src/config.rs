//! Service configuration loaded from environment variables
//!
//! Every option falls back to a hard-coded default, so a missing or partial
//! environment never prevents startup. The loaded value is passed by the
//! binaries into each component constructor; no component reads the
//! environment on its own.

use std::env;

/// Identity provider connection settings
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider, e.g. `https://sso.example.com`
    pub server: String,
    /// Realm queried for users
    pub realm: String,
    /// OAuth2 client id used for the token grant
    pub client_id: String,
    /// Service-account username for the password grant
    pub username: String,
    /// Service-account password for the password grant
    pub password: String,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unix socket serving read-only resolution queries (world-accessible)
    pub data_socket_path: String,
    /// Unix socket serving privileged mutations (owner-only)
    pub admin_socket_path: String,
    /// Backing file of the embedded record store
    pub store_path: String,
    /// Base added to every derived numeric id
    pub min_uid: u32,
    /// Group id stamped on every created record
    pub group_id: u32,
    /// Home directory template; `%s` is replaced with the username
    pub home_template: String,
    /// Shell stamped on records that do not supply one
    pub shell: String,
    /// Whether reconciliation may overwrite an existing local record
    pub override_on_sync: bool,
    /// Username suffix allow-list, consumed by the external NSS module only
    pub username_suffixes: Vec<String>,
    pub provider: ProviderConfig,
}

impl Config {
    /// Create a new Config from environment variables
    ///
    /// # Environment Variables
    /// - `IDENT_DATA_SOCKET`: data socket path (default: /run/ident/data.sock)
    /// - `IDENT_ADMIN_SOCKET`: management socket path (default: /run/ident/admin.sock)
    /// - `IDENT_STORE_PATH`: record store file (default: /var/lib/ident/users.db)
    /// - `IDENT_MIN_UID`: minimum numeric id (default: 10000)
    /// - `IDENT_GROUP_ID`: group id for created records (default: 1000)
    /// - `IDENT_HOME_TEMPLATE`: home directory template (default: /home/%s)
    /// - `IDENT_SHELL`: default shell (default: /bin/bash)
    /// - `IDENT_SYNC_OVERRIDE`: overwrite existing records on sync (default: false)
    /// - `IDENT_USERNAME_SUFFIXES`: comma-separated suffix allow-list (default: empty)
    /// - `IDENT_IDP_SERVER`, `IDENT_IDP_REALM`, `IDENT_IDP_CLIENT_ID`,
    ///   `IDENT_IDP_USERNAME`, `IDENT_IDP_PASSWORD`: identity provider access
    pub fn from_env() -> Self {
        let data_socket_path = env::var("IDENT_DATA_SOCKET")
            .unwrap_or_else(|_| "/run/ident/data.sock".to_string());
        let admin_socket_path = env::var("IDENT_ADMIN_SOCKET")
            .unwrap_or_else(|_| "/run/ident/admin.sock".to_string());
        let store_path = env::var("IDENT_STORE_PATH")
            .unwrap_or_else(|_| "/var/lib/ident/users.db".to_string());

        let min_uid = env::var("IDENT_MIN_UID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);
        let group_id = env::var("IDENT_GROUP_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1_000);

        let home_template =
            env::var("IDENT_HOME_TEMPLATE").unwrap_or_else(|_| "/home/%s".to_string());
        let shell = env::var("IDENT_SHELL").unwrap_or_else(|_| "/bin/bash".to_string());

        let override_on_sync = env::var("IDENT_SYNC_OVERRIDE")
            .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let username_suffixes = env::var("IDENT_USERNAME_SUFFIXES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let provider = ProviderConfig {
            server: env::var("IDENT_IDP_SERVER")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            realm: env::var("IDENT_IDP_REALM").unwrap_or_else(|_| "master".to_string()),
            client_id: env::var("IDENT_IDP_CLIENT_ID")
                .unwrap_or_else(|_| "admin-cli".to_string()),
            username: env::var("IDENT_IDP_USERNAME").unwrap_or_default(),
            password: env::var("IDENT_IDP_PASSWORD").unwrap_or_default(),
        };

        Config {
            data_socket_path,
            admin_socket_path,
            store_path,
            min_uid,
            group_id,
            home_template,
            shell,
            override_on_sync,
            username_suffixes,
            provider,
        }
    }

    /// Render the home directory for a username from the configured template
    pub fn home_dir_for(&self, username: &str) -> String {
        self.home_template.replacen("%s", username, 1)
    }
}
