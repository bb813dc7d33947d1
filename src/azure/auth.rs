//! Azure Authentication
//!
//! Acquires Azure Resource Manager tokens from the ambient environment, trying
//! a client secret from environment variables, then workload identity, then
//! managed identity, then the Azure CLI.
//!
//! The chain only moves past a source that is unavailable (not configured, or
//! nothing answering). A source that is configured but rejects the request
//! ends the chain, so the query never runs as a different principal than the
//! one the environment names. The first source that succeeds is remembered for
//! the rest of the run.

use super::http::{AzureHttpClient, HttpError};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::RwLock;

/// Default Microsoft Entra ID authority
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Instance metadata token endpoint for VMs and scale sets
const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// How long to wait for the metadata endpoint to accept a connection
const IMDS_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Client assertion type for federated (workload identity) tokens
const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Token expiry buffer - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: chrono::Duration = chrono::Duration::minutes(5);

/// Default token TTL if the source does not report one
const DEFAULT_TOKEN_TTL: chrono::Duration = chrono::Duration::minutes(30);

/// A bearer token and when it stops being valid
#[derive(Clone, Debug, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_valid(&self) -> bool {
        Utc::now() + TOKEN_EXPIRY_BUFFER < self.expires_at
    }
}

/// Why a single source produced no token
#[derive(ThisError, Debug)]
pub enum CredentialError {
    /// Nothing to authenticate with here; the chain moves on
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The source is set up but authentication failed; the chain stops
    #[error("{0}")]
    Failed(String),
}

type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// One way of obtaining a token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name used in log and error messages
    fn name(&self) -> &'static str;

    async fn fetch_token(&self) -> CredentialResult<AccessToken>;
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    sources: Vec<Arc<dyn TokenSource>>,
    active: Arc<RwLock<Option<usize>>>,
    token_cache: Arc<RwLock<Option<AccessToken>>>,
}

impl AzureCredentials {
    /// Build a credential from an explicit list of sources, tried in order
    pub fn new(sources: Vec<Arc<dyn TokenSource>>) -> Self {
        Self {
            sources,
            active: Arc::new(RwLock::new(None)),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Build the default chain from environment variables
    pub fn from_env(http: &AzureHttpClient, resource: &str) -> Result<Self> {
        let mut sources: Vec<Arc<dyn TokenSource>> = Vec::new();

        if let Some(env) = EnvironmentCredential::from_env(http.clone(), resource) {
            sources.push(Arc::new(env));
        }
        if let Some(workload) = WorkloadIdentityCredential::from_env(http.clone(), resource) {
            sources.push(Arc::new(workload));
        }

        let imds_http = AzureHttpClient::with_connect_timeout(IMDS_CONNECT_TIMEOUT)
            .map_err(|e| Error::auth(format!("Failed to create HTTP client: {}", e)))?;
        sources.push(Arc::new(ManagedIdentityCredential::from_env(imds_http, resource)));
        sources.push(Arc::new(AzureCliCredential::new(resource)));

        Ok(Self::new(sources))
    }

    /// Get an access token for API calls
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = self.fetch_from_chain().await?;
        let token_str = token.token.clone();

        tracing::debug!("New token cached, expires at {}", token.expires_at);
        *self.token_cache.write().await = Some(token);

        Ok(token_str)
    }

    async fn fetch_from_chain(&self) -> Result<AccessToken> {
        let active = *self.active.read().await;
        if let Some(index) = active {
            let source = &self.sources[index];
            return source
                .fetch_token()
                .await
                .map_err(|e| Error::auth(format!("{}: {}", source.name(), e)));
        }

        let mut skipped = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            match source.fetch_token().await {
                Ok(token) => {
                    tracing::info!("Authenticated with {}", source.name());
                    *self.active.write().await = Some(index);
                    return Ok(token);
                }
                Err(CredentialError::Unavailable(reason)) => {
                    tracing::debug!("{} unavailable: {}", source.name(), reason);
                    skipped.push(format!("{}: {}", source.name(), reason));
                }
                Err(CredentialError::Failed(reason)) => {
                    return Err(Error::auth(format!("{}: {}", source.name(), reason)));
                }
            }
        }

        Err(Error::auth(format!(
            "no credential in the chain is available [{}]",
            skipped.join("; ")
        )))
    }
}

/// Read the authority host, honoring `AZURE_AUTHORITY_HOST`
fn authority_host() -> String {
    std::env::var("AZURE_AUTHORITY_HOST").unwrap_or_else(|_| DEFAULT_AUTHORITY_HOST.to_string())
}

fn token_url(authority_host: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        authority_host.trim_end_matches('/'),
        tenant_id
    )
}

fn default_scope(resource: &str) -> String {
    format!("{}/.default", resource.trim_end_matches('/'))
}

/// Service principal with a client secret, configured through
/// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`
pub struct EnvironmentCredential {
    http: AzureHttpClient,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl EnvironmentCredential {
    pub fn new(
        http: AzureHttpClient,
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        resource: &str,
    ) -> Self {
        Self {
            http,
            token_url: token_url(authority_host, tenant_id),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: default_scope(resource),
        }
    }

    /// Returns `None` unless all three variables are set
    pub fn from_env(http: AzureHttpClient, resource: &str) -> Option<Self> {
        let tenant = std::env::var("AZURE_TENANT_ID").ok();
        let client_id = std::env::var("AZURE_CLIENT_ID").ok();
        let secret = std::env::var("AZURE_CLIENT_SECRET").ok();

        match (tenant, client_id, secret) {
            (Some(tenant), Some(client_id), Some(secret)) => Some(Self::new(
                http,
                &authority_host(),
                &tenant,
                &client_id,
                &secret,
                resource,
            )),
            (_, _, Some(_)) => {
                tracing::warn!(
                    "AZURE_CLIENT_SECRET is set without AZURE_TENANT_ID and AZURE_CLIENT_ID; skipping environment credential"
                );
                None
            }
            _ => None,
        }
    }
}

#[async_trait]
impl TokenSource for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "EnvironmentCredential"
    }

    async fn fetch_token(&self) -> CredentialResult<AccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let request = self.http.post(&self.token_url).form(&form);
        let response = self.http.send(request).await.map_err(failed)?;

        token_from_response(&response, "access_token", &["expires_in"])
    }
}

/// Federated token exchange for Kubernetes workload identity, configured
/// through `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_FEDERATED_TOKEN_FILE`
pub struct WorkloadIdentityCredential {
    http: AzureHttpClient,
    token_url: String,
    client_id: String,
    token_file: PathBuf,
    scope: String,
}

impl WorkloadIdentityCredential {
    pub fn new(
        http: AzureHttpClient,
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        token_file: PathBuf,
        resource: &str,
    ) -> Self {
        Self {
            http,
            token_url: token_url(authority_host, tenant_id),
            client_id: client_id.to_string(),
            token_file,
            scope: default_scope(resource),
        }
    }

    /// Returns `None` unless all three variables are set
    pub fn from_env(http: AzureHttpClient, resource: &str) -> Option<Self> {
        let tenant = std::env::var("AZURE_TENANT_ID").ok()?;
        let client_id = std::env::var("AZURE_CLIENT_ID").ok()?;
        let token_file = std::env::var("AZURE_FEDERATED_TOKEN_FILE").ok()?;

        Some(Self::new(
            http,
            &authority_host(),
            &tenant,
            &client_id,
            PathBuf::from(token_file),
            resource,
        ))
    }
}

#[async_trait]
impl TokenSource for WorkloadIdentityCredential {
    fn name(&self) -> &'static str {
        "WorkloadIdentityCredential"
    }

    async fn fetch_token(&self) -> CredentialResult<AccessToken> {
        // Re-read on every exchange: the projected token is rotated on disk
        let assertion = tokio::fs::read_to_string(&self.token_file)
            .await
            .map_err(|e| {
                CredentialError::Failed(format!(
                    "failed to read {}: {}",
                    self.token_file.display(),
                    e
                ))
            })?;

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_assertion_type", JWT_BEARER_ASSERTION),
            ("client_assertion", assertion.trim()),
            ("scope", self.scope.as_str()),
        ];

        let request = self.http.post(&self.token_url).form(&form);
        let response = self.http.send(request).await.map_err(failed)?;

        token_from_response(&response, "access_token", &["expires_in"])
    }
}

/// Managed identity on App Service / Functions or through the instance
/// metadata endpoint
pub struct ManagedIdentityCredential {
    http: AzureHttpClient,
    endpoint: ManagedIdentityEndpoint,
    resource: String,
    client_id: Option<String>,
}

pub enum ManagedIdentityEndpoint {
    /// `IDENTITY_ENDPOINT` with its `IDENTITY_HEADER` secret
    AppService { url: String, secret: String },
    /// Instance metadata service
    Imds { url: String },
}

impl ManagedIdentityCredential {
    pub fn new(
        http: AzureHttpClient,
        endpoint: ManagedIdentityEndpoint,
        resource: &str,
        client_id: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            resource: resource.to_string(),
            client_id,
        }
    }

    pub fn from_env(http: AzureHttpClient, resource: &str) -> Self {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(url), Ok(secret)) => ManagedIdentityEndpoint::AppService { url, secret },
            _ => ManagedIdentityEndpoint::Imds {
                url: IMDS_TOKEN_URL.to_string(),
            },
        };

        Self::new(http, endpoint, resource, std::env::var("AZURE_CLIENT_ID").ok())
    }

    fn request_url(&self, base: &str, api_version: &str) -> CredentialResult<url::Url> {
        let mut params = vec![("api-version", api_version), ("resource", self.resource.as_str())];
        if let Some(client_id) = &self.client_id {
            params.push(("client_id", client_id.as_str()));
        }

        url::Url::parse_with_params(base, &params).map_err(|e| {
            CredentialError::Failed(format!("invalid managed identity endpoint: {}", e))
        })
    }
}

#[async_trait]
impl TokenSource for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }

    async fn fetch_token(&self) -> CredentialResult<AccessToken> {
        let response = match &self.endpoint {
            ManagedIdentityEndpoint::AppService { url, secret } => {
                let url = self.request_url(url, "2019-08-01")?;
                let request = self
                    .http
                    .get(url.as_str())
                    .header("X-IDENTITY-HEADER", secret.as_str());
                self.http.send(request).await.map_err(failed)?
            }
            ManagedIdentityEndpoint::Imds { url } => {
                let url = self.request_url(url, "2018-02-01")?;
                let request = self.http.get(url.as_str()).header("Metadata", "true");
                self.http.send(request).await.map_err(imds_error)?
            }
        };

        token_from_response(&response, "access_token", &["expires_on", "expires_in"])
    }
}

/// Token from a logged-in Azure CLI session
pub struct AzureCliCredential {
    resource: String,
}

impl AzureCliCredential {
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for AzureCliCredential {
    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }

    async fn fetch_token(&self) -> CredentialResult<AccessToken> {
        let program = if cfg!(windows) { "az.cmd" } else { "az" };

        let output = tokio::process::Command::new(program)
            .args([
                "account",
                "get-access-token",
                "--resource",
                self.resource.as_str(),
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CredentialError::Unavailable("Azure CLI not found on PATH".to_string())
                }
                _ => CredentialError::Failed(format!("failed to run Azure CLI: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(cli_failure(&output.status.to_string(), stderr.trim()));
        }

        let response: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            CredentialError::Failed(format!("unexpected Azure CLI output: {}", e))
        })?;

        token_from_response(&response, "accessToken", &["expires_on", "expiresOn"])
    }
}

/// A CLI with no signed-in account is unavailable; any other error is a failure
fn cli_failure(status: &str, stderr: &str) -> CredentialError {
    let message = format!(
        "Azure CLI exited with {}: {}",
        status,
        super::http::sanitize_for_log(stderr)
    );

    if stderr.contains("az login") || stderr.contains("az account set") {
        CredentialError::Unavailable(message)
    } else {
        CredentialError::Failed(message)
    }
}

fn failed(err: HttpError) -> CredentialError {
    CredentialError::Failed(err.to_string())
}

/// Metadata endpoint that cannot be reached, or answers that no identity is
/// assigned, means this host has no managed identity
fn imds_error(err: HttpError) -> CredentialError {
    match &err {
        HttpError::Transport(_) => CredentialError::Unavailable(err.to_string()),
        HttpError::Status { status, .. }
            if matches!(
                *status,
                StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ) =>
        {
            CredentialError::Unavailable(err.to_string())
        }
        _ => CredentialError::Failed(err.to_string()),
    }
}

/// Read a token and its expiry from a token endpoint response
///
/// `expiry_fields` are tried in order; each may hold seconds-from-now
/// (`expires_in`), a Unix timestamp (`expires_on`), or the CLI's local
/// `expiresOn` date string.
fn token_from_response(
    response: &Value,
    token_field: &str,
    expiry_fields: &[&str],
) -> CredentialResult<AccessToken> {
    let token = response
        .get(token_field)
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CredentialError::Failed(format!("token response has no {}", token_field)))?;

    let expires_at = expiry_fields
        .iter()
        .find_map(|field| response.get(*field).and_then(|v| parse_expiry(field, v)))
        .unwrap_or_else(|| Utc::now() + DEFAULT_TOKEN_TTL);

    Ok(AccessToken {
        token: token.to_string(),
        expires_at,
    })
}

fn parse_expiry(field: &str, value: &Value) -> Option<DateTime<Utc>> {
    let as_int = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match (field, as_int) {
        ("expires_in", Some(secs)) => Some(Utc::now() + chrono::Duration::seconds(secs)),
        (_, Some(epoch)) => Utc.timestamp_opt(epoch, 0).single(),
        (_, None) => {
            let text = value.as_str()?;
            let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()?;
            Local
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}
