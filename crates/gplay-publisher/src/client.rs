//! Google Play Developer API client
//!
//! Authenticates with a Google Cloud service account (JWT bearer grant) and
//! talks to the `androidpublisher/v3` edits endpoints.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use gplay_edits::{EditsApi, RemoteError};

use crate::error::{PublisherError, Result};

const API_BASE_URL: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3";
const UPLOAD_BASE_URL: &str = "https://androidpublisher.googleapis.com/upload/androidpublisher/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";

/// Google service account credentials
#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Default)]
struct TokenCache {
    access_token: Option<String>,
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// Kind of binary accepted by the upload endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    /// Android App Bundle (`.aab`)
    Bundle,
    /// Legacy APK (`.apk`)
    Apk,
}

impl BinaryKind {
    /// Detect from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "aab" => Ok(Self::Bundle),
            "apk" => Ok(Self::Apk),
            _ => Err(PublisherError::InvalidArtifact(format!(
                "{} is not an .aab or .apk file",
                path.display()
            ))),
        }
    }

    fn collection(self) -> &'static str {
        match self {
            Self::Bundle => "bundles",
            Self::Apk => "apks",
        }
    }
}

/// Google Play Developer API client
pub struct PlayPublisher {
    client: Client,
    token_cache: Arc<RwLock<TokenCache>>,
    service_account: ServiceAccountKey,
}

impl PlayPublisher {
    /// Create a client from a service account key file
    pub fn new(service_account_key: &Path) -> Result<Self> {
        let key_content = std::fs::read_to_string(service_account_key).map_err(|e| {
            PublisherError::ConfigurationError(format!(
                "Failed to read service account key {}: {}",
                service_account_key.display(),
                e
            ))
        })?;
        Self::from_key_json(&key_content)
    }

    /// Create a client from the JSON content of a service account key
    pub fn from_key_json(key_content: &str) -> Result<Self> {
        let service_account: ServiceAccountKey = serde_json::from_str(key_content)
            .map_err(|e| PublisherError::InvalidCredentials(format!("Invalid service account key: {}", e)))?;

        if service_account.client_email.is_empty() || service_account.private_key.is_empty() {
            return Err(PublisherError::InvalidCredentials(
                "service account key has no client_email or private_key".to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            token_cache: Arc::new(RwLock::new(TokenCache::default())),
            service_account,
        })
    }

    /// Service account the client authenticates as
    pub fn client_email(&self) -> &str {
        &self.service_account.client_email
    }

    fn token_uri(&self) -> &str {
        self.service_account.token_uri.as_deref().unwrap_or(TOKEN_URL)
    }

    /// Get or refresh the OAuth2 access token
    async fn get_access_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let (Some(token), Some(expires)) = (&cache.access_token, cache.expires_at) {
                if Utc::now() < expires - Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        let now = Utc::now();
        let exp = now + Duration::hours(1);

        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        let claims = Claims {
            iss: &self.service_account.client_email,
            scope: SCOPE,
            aud: self.token_uri(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(self.service_account.private_key.as_bytes())
            .map_err(|e| PublisherError::InvalidCredentials(format!("Invalid private key: {}", e)))?;

        let jwt = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &encoding_key,
        )?;

        debug!(client_email = %self.service_account.client_email, "requesting access token");
        let response = self
            .client
            .post(self.token_uri())
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PublisherError::AuthenticationFailed(error_text));
        }

        let token_response: TokenResponse = response.json().await?;

        {
            let mut cache = self.token_cache.write().await;
            cache.access_token = Some(token_response.access_token.clone());
            cache.expires_at = Some(Utc::now() + Duration::seconds(token_response.expires_in));
        }

        Ok(token_response.access_token)
    }

    /// Send an authenticated request, failing on non-success status
    async fn send(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.get_access_token().await?;
        let url = format!("{}{}", API_BASE_URL, endpoint);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!(%method, %url, "api request");

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PublisherError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response)
    }

    /// Make an authenticated request and decode the JSON response
    async fn api_request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let response = self.send(method, endpoint, body).await?;
        Ok(response.json().await?)
    }

    /// Insert a new edit
    pub async fn insert_edit(&self, package: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct EditResponse {
            id: String,
        }

        let endpoint = format!("/applications/{}/edits", package);
        let response: EditResponse = self
            .api_request(reqwest::Method::POST, &endpoint, Some(serde_json::json!({})))
            .await?;

        info!(package, edit_id = %response.id, "edit created");
        Ok(response.id)
    }

    /// Validate an edit without committing it
    pub async fn validate(&self, package: &str, edit_id: &str) -> Result<()> {
        let endpoint = format!("/applications/{}/edits/{}:validate", package, edit_id);
        let _: serde_json::Value = self.api_request(reqwest::Method::POST, &endpoint, None).await?;
        Ok(())
    }

    /// Commit an edit
    pub async fn commit(&self, package: &str, edit_id: &str) -> Result<()> {
        let endpoint = format!("/applications/{}/edits/{}:commit", package, edit_id);
        let _: serde_json::Value = self.api_request(reqwest::Method::POST, &endpoint, None).await?;
        Ok(())
    }

    /// Delete an edit; the response has no body
    pub async fn delete(&self, package: &str, edit_id: &str) -> Result<()> {
        let endpoint = format!("/applications/{}/edits/{}", package, edit_id);
        self.send(reqwest::Method::DELETE, &endpoint, None).await?;
        Ok(())
    }

    /// Upload an AAB or APK to an edit, returning the assigned version code
    pub async fn upload_bundle(&self, package: &str, edit_id: &str, path: &Path) -> Result<i64> {
        let kind = BinaryKind::from_path(path)?;
        let token = self.get_access_token().await?;

        let url = format!(
            "{}/applications/{}/edits/{}/{}?uploadType=media",
            UPLOAD_BASE_URL,
            package,
            edit_id,
            kind.collection()
        );

        let file_content = tokio::fs::read(path).await?;
        info!(package, edit_id, path = %path.display(), bytes = file_content.len(), "uploading binary");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/octet-stream")
            .body(file_content)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PublisherError::UploadFailed(error_text));
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UploadResponse {
            version_code: i64,
        }

        let result: UploadResponse = response.json().await?;
        Ok(result.version_code)
    }

    /// Assign version codes to a track
    pub async fn assign_to_track(
        &self,
        package: &str,
        edit_id: &str,
        track: &str,
        version_codes: &[i64],
        rollout: Option<f64>,
        release_notes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let endpoint = format!("/applications/{}/edits/{}/tracks/{}", package, edit_id, track);
        let body = track_update(track, version_codes, rollout, release_notes)?;

        let _: serde_json::Value = self
            .api_request(reqwest::Method::PUT, &endpoint, Some(body))
            .await?;

        info!(package, edit_id, track, ?version_codes, "track updated");
        Ok(())
    }
}

impl std::fmt::Debug for PlayPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayPublisher")
            .field("client_email", &self.service_account.client_email)
            .finish_non_exhaustive()
    }
}

/// Body of a `tracks.update` call
///
/// A rollout below 1.0 makes a staged (`inProgress`) release; no rollout or
/// 1.0 completes it.
pub fn track_update(
    track: &str,
    version_codes: &[i64],
    rollout: Option<f64>,
    release_notes: &BTreeMap<String, String>,
) -> Result<serde_json::Value> {
    if let Some(fraction) = rollout {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(PublisherError::InvalidRollout(fraction));
        }
    }
    let staged = rollout.filter(|f| *f < 1.0);

    let notes: Vec<serde_json::Value> = release_notes
        .iter()
        .map(|(lang, text)| serde_json::json!({ "language": lang, "text": text }))
        .collect();

    let codes: Vec<String> = version_codes.iter().map(|v| v.to_string()).collect();
    let mut release = serde_json::json!({
        "versionCodes": codes,
        "status": if staged.is_some() { "inProgress" } else { "completed" }
    });

    if let Some(fraction) = staged {
        release["userFraction"] = serde_json::json!(fraction);
    }

    if !notes.is_empty() {
        release["releaseNotes"] = serde_json::json!(notes);
    }

    Ok(serde_json::json!({
        "track": track,
        "releases": [release]
    }))
}

fn boxed(e: PublisherError) -> RemoteError {
    Box::new(e)
}

#[async_trait::async_trait]
impl EditsApi for PlayPublisher {
    async fn create_edit(&self, package: &str) -> std::result::Result<String, RemoteError> {
        self.insert_edit(package).await.map_err(boxed)
    }

    async fn validate_edit(&self, package: &str, edit_id: &str) -> std::result::Result<(), RemoteError> {
        self.validate(package, edit_id).await.map_err(boxed)
    }

    async fn commit_edit(&self, package: &str, edit_id: &str) -> std::result::Result<(), RemoteError> {
        self.commit(package, edit_id).await.map_err(boxed)
    }

    async fn delete_edit(&self, package: &str, edit_id: &str) -> std::result::Result<(), RemoteError> {
        self.delete(package, edit_id).await.map_err(boxed)
    }
}
