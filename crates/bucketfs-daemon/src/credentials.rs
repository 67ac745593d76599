//! Credential resolution for `auth.*` (§6): anonymous access, a token read
//! once from a local file, or a metadata-server-style bearer token fetched
//! over HTTP and refreshed on demand.
//!
//! A bucket mount has no interactive consent step: it either trusts an
//! already-provisioned token file or fetches one from a metadata endpoint
//! the way the instance it runs on already trusts, so this is a plain
//! `reqwest`-based token fetch with no PKCE/authorization-code machinery.

use anyhow::{Context, Result};
use bucketfs_core::config::AuthConfig;
use bucketfs_store::Credential;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Resolves a [`Credential`] from `auth.*` in priority order: explicit
/// anonymous access, a locally staged token file, then a metadata-server
/// endpoint (either the configured `token-url`/`reuse-token-from-url` or
/// the platform default).
pub async fn resolve_credential(config: &AuthConfig, http: &reqwest::Client) -> Result<Credential> {
    if config.anonymous_access {
        debug!("using anonymous credentials");
        return Ok(Credential::Anonymous);
    }

    if let Some(path) = &config.key_file {
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("reading key-file {}", path.display()))?;
        let token = token.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("key-file {} is empty", path.display());
        }
        return Ok(Credential::Bearer(token));
    }

    let url = config
        .token_url
        .as_deref()
        .or(config.reuse_token_from_url.as_deref())
        .unwrap_or(DEFAULT_METADATA_TOKEN_URL);

    fetch_bearer_token(http, url).await
}

async fn fetch_bearer_token(http: &reqwest::Client, url: &str) -> Result<Credential> {
    debug!(%url, "fetching bearer token");
    let response = http
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .with_context(|| format!("requesting token from {url}"))?
        .error_for_status()
        .with_context(|| format!("token endpoint {url} returned an error status"))?;

    let parsed: TokenResponse = response
        .json()
        .await
        .with_context(|| format!("parsing token response from {url}"))?;

    Ok(Credential::Bearer(parsed.access_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_access_skips_network() {
        let config = AuthConfig { anonymous_access: true, ..Default::default() };
        let http = reqwest::Client::new();
        let credential = resolve_credential(&config, &http).await.unwrap();
        assert!(matches!(credential, Credential::Bearer(_)) == false);
        assert!(matches!(credential, Credential::Anonymous));
    }

    #[tokio::test]
    async fn key_file_is_read_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "sekret-token\n").unwrap();

        let config = AuthConfig { key_file: Some(path), ..Default::default() };
        let http = reqwest::Client::new();
        let credential = resolve_credential(&config, &http).await.unwrap();
        match credential {
            Credential::Bearer(token) => assert_eq!(token, "sekret-token"),
            Credential::Anonymous => panic!("expected a bearer credential"),
        }
    }
}
