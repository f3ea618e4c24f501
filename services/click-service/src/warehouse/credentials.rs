use std::{
    env, fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{ApiError, WarehouseError};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const ASSERTION_LIFETIME_SECS: i64 = 3600;
// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where access tokens come from, resolved once at startup.
#[derive(Clone)]
pub enum CredentialSource {
    ServiceAccount(ServiceAccount),
    AuthorizedUser(AuthorizedUser),
    Metadata {
        host: String,
        project_id: Option<String>,
    },
}

#[derive(Clone)]
pub struct ServiceAccount {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    project_id: Option<String>,
    signing_key: EncodingKey,
}

#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    quota_project_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KeyFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

impl CredentialSource {
    /// Resolve credentials: the explicit key file when given, otherwise the
    /// ambient chain (`GOOGLE_APPLICATION_CREDENTIALS`, gcloud's well-known
    /// file, the compute metadata server).
    pub async fn discover(
        explicit: Option<&Path>,
        http: &reqwest::Client,
    ) -> Result<Self, WarehouseError> {
        if let Some(path) = explicit {
            tracing::info!(path = %path.display(), "using explicit credentials file");
            return Self::from_file(path);
        }

        if let Some(path) = env::var_os("GOOGLE_APPLICATION_CREDENTIALS").filter(|v| !v.is_empty()) {
            let path = PathBuf::from(path);
            tracing::info!(path = %path.display(), "using GOOGLE_APPLICATION_CREDENTIALS");
            return Self::from_file(&path);
        }

        if let Some(path) = well_known_file().filter(|path| path.is_file()) {
            tracing::info!(path = %path.display(), "using application default credentials");
            return Self::from_file(&path);
        }

        let host = env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());
        match probe_metadata(http, &host).await {
            Ok(project_id) => {
                tracing::info!(host = host.as_str(), "using compute metadata credentials");
                Ok(CredentialSource::Metadata { host, project_id })
            }
            Err(err) => Err(WarehouseError::Init(format!(
                "no credentials file configured and metadata server unreachable: {err}"
            ))),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, WarehouseError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            WarehouseError::Init(format!("read credentials {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|err| WarehouseError::Init(format!("credentials {}: {err}", path.display())))
    }

    fn from_json(raw: &str) -> Result<Self, String> {
        let key: KeyFile = serde_json::from_str(raw).map_err(|err| err.to_string())?;
        match key {
            KeyFile::ServiceAccount(key) => {
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .map_err(|err| format!("invalid private key: {err}"))?;
                Ok(CredentialSource::ServiceAccount(ServiceAccount {
                    client_email: key.client_email,
                    key_id: key.private_key_id,
                    token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                    project_id: key.project_id,
                    signing_key,
                }))
            }
            KeyFile::AuthorizedUser(user) => Ok(CredentialSource::AuthorizedUser(user)),
        }
    }

    /// Project the credentials belong to, if they say.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            CredentialSource::ServiceAccount(account) => account.project_id.as_deref(),
            CredentialSource::AuthorizedUser(user) => user.quota_project_id.as_deref(),
            CredentialSource::Metadata { project_id, .. } => project_id.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CredentialSource::ServiceAccount(_) => "service_account",
            CredentialSource::AuthorizedUser(_) => "authorized_user",
            CredentialSource::Metadata { .. } => "metadata",
        }
    }
}

fn well_known_file() -> Option<PathBuf> {
    if let Some(dir) = env::var_os("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    let base = if cfg!(windows) {
        PathBuf::from(env::var_os("APPDATA")?)
    } else {
        PathBuf::from(env::var_os("HOME")?).join(".config")
    };
    Some(base.join("gcloud").join("application_default_credentials.json"))
}

async fn probe_metadata(http: &reqwest::Client, host: &str) -> Result<Option<String>, reqwest::Error> {
    let response = http
        .get(format!("http://{host}/computeMetadata/v1/project/project-id"))
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_PROBE_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    let project = response.text().await?;
    Ok(Some(project.trim().to_string()).filter(|project| !project.is_empty()))
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Hands out bearer tokens, refreshing them shortly before they expire.
///
/// The cache lock is held across the refresh call, so concurrent requests
/// queue behind a single token fetch.
pub struct TokenProvider {
    source: CredentialSource,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(source: CredentialSource, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            cached: Mutex::new(None),
        }
    }

    pub async fn bearer(&self) -> Result<String, ApiError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        tracing::debug!(
            source = self.source.kind(),
            expires_in_secs = lifetime.as_secs(),
            "access token refreshed"
        );
        let value = response.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn fetch(&self) -> Result<TokenResponse, ApiError> {
        let request = match &self.source {
            CredentialSource::ServiceAccount(account) => {
                let assertion = signed_assertion(account, chrono::Utc::now().timestamp())?;
                self.http.post(account.token_uri.as_str()).form(&[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ])
            }
            CredentialSource::AuthorizedUser(user) => self.http.post(DEFAULT_TOKEN_URI).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ]),
            CredentialSource::Metadata { host, .. } => self
                .http
                .get(format!(
                    "http://{host}/computeMetadata/v1/instance/service-accounts/default/token"
                ))
                .query(&[("scopes", BIGQUERY_SCOPE)])
                .header("Metadata-Flavor", "Google"),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!("token endpoint returned {status}: {body}")));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| ApiError::Auth(format!("malformed token response: {err}")))
    }
}

fn signed_assertion(account: &ServiceAccount, now: i64) -> Result<String, ApiError> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = account.key_id.clone();
    let claims = AssertionClaims {
        iss: account.client_email.as_str(),
        scope: BIGQUERY_SCOPE,
        aud: account.token_uri.as_str(),
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    jsonwebtoken::encode(&header, &claims, &account.signing_key)
        .map_err(|err| ApiError::Auth(format!("sign assertion: {err}")))
}
