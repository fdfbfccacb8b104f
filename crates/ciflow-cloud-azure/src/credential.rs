//! Azure Resource Manager credentials
//!
//! Tokens are resolved through a chain of sources, first success wins:
//!
//! 1. `AZURE_ACCESS_TOKEN` (pre-issued bearer token)
//! 2. Service principal secret (`AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`)
//! 3. Managed identity via the instance metadata service
//! 4. `az account get-access-token` from a logged-in az CLI

use crate::error::{AzureError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

const ARM_RESOURCE: &str = "https://management.azure.com/";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const AUTHORITY: &str = "https://login.microsoftonline.com";
const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Refresh tokens this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A bearer token and its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn expiring_in(token: String, seconds: i64) -> Self {
        Self {
            token,
            expires_at: Utc::now() + Duration::seconds(seconds),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.expires_at - Utc::now() > Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// One way of obtaining a token
#[derive(Debug, Clone)]
pub enum CredentialSource {
    StaticToken(String),
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    ManagedIdentity,
    AzureCli,
}

impl CredentialSource {
    fn describe(&self) -> &'static str {
        match self {
            Self::StaticToken(_) => "AZURE_ACCESS_TOKEN",
            Self::ClientSecret { .. } => "client secret",
            Self::ManagedIdentity => "managed identity",
            Self::AzureCli => "az CLI",
        }
    }
}

/// Ordered credential chain
#[derive(Debug, Clone)]
pub struct AzureCredential {
    sources: Vec<CredentialSource>,
}

impl AzureCredential {
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        Self { sources }
    }

    /// Build the chain from the environment
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let mut sources = Vec::new();

        if let Some(token) = var("AZURE_ACCESS_TOKEN") {
            sources.push(CredentialSource::StaticToken(token));
        }

        if let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
            var("AZURE_TENANT_ID"),
            var("AZURE_CLIENT_ID"),
            var("AZURE_CLIENT_SECRET"),
        ) {
            sources.push(CredentialSource::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            });
        }

        sources.push(CredentialSource::ManagedIdentity);
        sources.push(CredentialSource::AzureCli);

        Self { sources }
    }

    pub fn sources(&self) -> &[CredentialSource] {
        &self.sources
    }

    /// Acquire a token from the first source that succeeds
    pub async fn get_token(&self, http: &reqwest::Client) -> Result<AccessToken> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match fetch(source, http).await {
                Ok(token) => {
                    tracing::debug!("Acquired ARM token via {}", source.describe());
                    return Ok(token);
                }
                Err(e) => {
                    tracing::debug!("Credential source {} failed: {}", source.describe(), e);
                    failures.push(format!("{}: {}", source.describe(), e));
                }
            }
        }

        Err(AzureError::AuthenticationFailed(failures.join("; ")))
    }
}

async fn fetch(source: &CredentialSource, http: &reqwest::Client) -> Result<AccessToken> {
    match source {
        // lifetime unknown, assume the usual hour
        CredentialSource::StaticToken(token) => Ok(AccessToken::expiring_in(token.clone(), 3600)),
        CredentialSource::ClientSecret {
            tenant_id,
            client_id,
            client_secret,
        } => {
            let url = format!("{}/{}/oauth2/v2.0/token", AUTHORITY, tenant_id);
            let response = http
                .post(&url)
                .form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", ARM_SCOPE),
                ])
                .send()
                .await?;
            parse_oauth_response(response).await
        }
        CredentialSource::ManagedIdentity => {
            let response = http
                .get(IMDS_TOKEN_URL)
                .query(&[("api-version", "2018-02-01"), ("resource", ARM_RESOURCE)])
                .header("Metadata", "true")
                .timeout(std::time::Duration::from_secs(2))
                .send()
                .await?;
            parse_oauth_response(response).await
        }
        CredentialSource::AzureCli => az_cli_token().await,
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    /// IMDS sends this as a string, Entra ID as a number
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

fn seconds_from(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(3600),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(3600),
        _ => 3600,
    }
}

async fn parse_oauth_response(response: reqwest::Response) -> Result<AccessToken> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AzureError::AuthenticationFailed(format!("{}: {}", status, body)));
    }

    let parsed: OAuthTokenResponse = serde_json::from_str(&body)?;
    Ok(AccessToken::expiring_in(
        parsed.access_token,
        seconds_from(parsed.expires_in.as_ref()),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzCliToken {
    access_token: String,
    /// POSIX timestamp, emitted by az CLI 2.54+
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

async fn az_cli_token() -> Result<AccessToken> {
    let args = [
        "account",
        "get-access-token",
        "--resource",
        ARM_RESOURCE,
        "--output",
        "json",
    ];
    tracing::debug!("Running: az {}", args.join(" "));

    let output = Command::new("az")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AzureError::AzCliNotFound,
            _ => AzureError::IoError(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AzureError::AuthenticationFailed(stderr.trim().to_string()));
    }

    parse_az_cli_token(&String::from_utf8_lossy(&output.stdout))
}

fn parse_az_cli_token(stdout: &str) -> Result<AccessToken> {
    let parsed: AzCliToken = serde_json::from_str(stdout)?;
    let expires_at = parsed
        .expires_on
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(|| Utc::now() + Duration::seconds(3600));

    Ok(AccessToken {
        token: parsed.access_token,
        expires_at,
    })
}
