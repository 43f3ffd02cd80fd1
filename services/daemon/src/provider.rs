//! Identity provider adapter
//!
//! The daemon is polymorphic over [`IdentityProvider`] so the directory
//! backend can be swapped without touching the resolver. The concrete
//! implementation talks to a Keycloak-style REST API: a resource-owner
//! password grant for the bearer token, then the realm's user listing.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ResourceOwnerPassword, ResourceOwnerUsername, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tracing::info;

use common::config::ProviderConfig;

/// Client-side bound on any single provider call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// A user identity as published by the remote provider; never persisted
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    /// Opaque provider identifier; input of the uid derivation
    pub id: String,
    pub username: String,
    pub full_name: String,
    /// Raw "algorithm key comment" line; empty means no key published
    pub raw_ssh_public_key: String,
}

/// Capability of a directory backend serving user identities
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch a single identity by exact username
    async fn fetch_user(&self, username: &str) -> Result<ExternalIdentity>;

    /// Fetch every identity of the realm
    async fn fetch_users(&self) -> Result<Vec<ExternalIdentity>>;
}

/// Keycloak REST implementation of [`IdentityProvider`]
pub struct KeycloakProvider {
    oauth: BasicClient,
    http: reqwest::Client,
    users_url: String,
    access_username: String,
    access_password: String,
}

/// One entry of the provider's user listing payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    id: String,
    username: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    attributes: HashMap<String, Vec<String>>,
}

impl KeycloakUser {
    /// The single-valued `ssh-key` attribute; absent or multi-valued means
    /// no published key
    fn ssh_key(&self) -> String {
        match self.attributes.get("ssh-key") {
            Some(values) if values.len() == 1 => values[0].clone(),
            _ => String::new(),
        }
    }

    fn into_identity(self) -> ExternalIdentity {
        let raw_ssh_public_key = self.ssh_key();
        ExternalIdentity {
            full_name: format!("{} {}", self.first_name, self.last_name),
            id: self.id,
            username: self.username,
            raw_ssh_public_key,
        }
    }
}

impl KeycloakProvider {
    /// Create a new provider client from the configured access settings
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let auth_url = format!(
            "{}/auth/realms/{}/protocol/openid-connect/auth",
            config.server, config.realm
        );
        let token_url = format!(
            "{}/auth/realms/{}/protocol/openid-connect/token",
            config.server, config.realm
        );
        let users_url = format!("{}/auth/admin/realms/{}/users", config.server, config.realm);

        let oauth = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            None,
            AuthUrl::new(auth_url).context("provider auth url")?,
            Some(TokenUrl::new(token_url).context("provider token url")?),
        );

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("provider http client")?;

        Ok(Self {
            oauth,
            http,
            users_url,
            access_username: config.username.clone(),
            access_password: config.password.clone(),
        })
    }

    /// Obtain a bearer token through the resource-owner password grant
    async fn access_token(&self) -> Result<String> {
        let token = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.oauth
                .exchange_password(
                    &ResourceOwnerUsername::new(self.access_username.clone()),
                    &ResourceOwnerPassword::new(self.access_password.clone()),
                )
                .request_async(oauth2::reqwest::async_http_client),
        )
        .await
        .context("token request timed out")?
        .context("token request")?;

        Ok(token.access_token().secret().clone())
    }

    async fn list_users(&self, query: &[(&str, &str)]) -> Result<Vec<KeycloakUser>> {
        let token = self.access_token().await.context("authentication")?;

        let response = self
            .http
            .get(&self.users_url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .context("user listing request")?;

        if !response.status().is_success() {
            anyhow::bail!("user listing failed: status {}", response.status());
        }

        response.json().await.context("user listing payload")
    }
}

#[async_trait]
impl IdentityProvider for KeycloakProvider {
    async fn fetch_user(&self, username: &str) -> Result<ExternalIdentity> {
        let users = self
            .list_users(&[("username", username), ("exact", "true")])
            .await?;

        users
            .into_iter()
            .find(|user| user.username == username)
            .map(KeycloakUser::into_identity)
            .with_context(|| format!("user '{}' not known to the provider", username))
    }

    async fn fetch_users(&self) -> Result<Vec<ExternalIdentity>> {
        let users = self.list_users(&[]).await?;
        info!("fetched {} identities from the provider", users.len());

        Ok(users.into_iter().map(KeycloakUser::into_identity).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_payload(attributes: serde_json::Value) -> KeycloakUser {
        serde_json::from_value(json!({
            "id": "8f6e1c1a-2a7a-4b0f-9f2b-1d51a5cf2f0e",
            "username": "alice",
            "firstName": "Alice",
            "lastName": "Example",
            "attributes": attributes,
        }))
        .expect("decode user payload")
    }

    #[test]
    fn test_single_valued_ssh_key_attribute_is_extracted() {
        let user = user_payload(json!({
            "ssh-key": ["ssh-ed25519 AAAAC3Nz alice@laptop"],
        }));

        assert_eq!(user.ssh_key(), "ssh-ed25519 AAAAC3Nz alice@laptop");
    }

    #[test]
    fn test_missing_or_multi_valued_ssh_key_means_no_key() {
        let user = user_payload(json!({}));
        assert_eq!(user.ssh_key(), "");

        let user = user_payload(json!({
            "ssh-key": ["one", "two"],
        }));
        assert_eq!(user.ssh_key(), "");
    }

    #[test]
    fn test_identity_mapping_keeps_id_and_joins_names() {
        let identity = user_payload(json!({
            "ssh-key": ["ssh-ed25519 AAAAC3Nz alice@laptop"],
        }))
        .into_identity();

        assert_eq!(identity.id, "8f6e1c1a-2a7a-4b0f-9f2b-1d51a5cf2f0e");
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.full_name, "Alice Example");
        assert_eq!(identity.raw_ssh_public_key, "ssh-ed25519 AAAAC3Nz alice@laptop");
    }

    #[test]
    fn test_payload_without_name_fields_still_decodes() {
        let user: KeycloakUser = serde_json::from_value(json!({
            "id": "b2c3",
            "username": "svc-backup",
        }))
        .expect("decode minimal payload");

        assert_eq!(user.into_identity().full_name, " ");
    }
}
