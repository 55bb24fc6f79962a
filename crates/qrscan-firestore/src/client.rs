//! Firestore REST API client.
//!
//! - Service-account tokens with a refresh margin, or the emulator
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter around every request
//! - Tracing spans and metrics per operation

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::Credentials;
use crate::types::{CommitRequest, CommitResponse, Document, Index, Value, Write};

const PRODUCTION_API: &str = "https://firestore.googleapis.com";

// =============================================================================
// Configuration
// =============================================================================

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// `host:port` of a local emulator; production when unset
    pub emulator_host: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.trim().is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.trim().is_empty()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
        })
    }

    /// Config for a local emulator at `host`.
    pub fn emulator(project_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            emulator_host: Some(host.into()),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }

    pub fn is_emulator(&self) -> bool {
        self.emulator_host.is_some()
    }

    /// Base URL of the v1 API, without trailing slash.
    fn api_root(&self) -> String {
        match &self.emulator_host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                format!("{}/v1", host.trim_end_matches('/'))
            }
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => format!("{}/v1", PRODUCTION_API),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    /// `projects/{p}/databases/{d}`
    database_path: String,
    api_root: String,
    credentials: Credentials,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    ///
    /// Production requires `GOOGLE_APPLICATION_CREDENTIALS`; the emulator
    /// needs no credentials.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let credentials = if config.is_emulator() {
            Credentials::Emulator
        } else {
            Credentials::service_account_from_env()?
        };
        Self::with_credentials(config, credentials)
    }

    /// Create a client with explicit credentials.
    pub fn with_credentials(
        config: FirestoreConfig,
        credentials: Credentials,
    ) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("qrscan-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let database_path = format!(
            "projects/{}/databases/{}",
            config.project_id, config.database_id
        );
        let api_root = config.api_root();

        Ok(Self {
            http,
            config,
            database_path,
            api_root,
            credentials,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    pub fn is_emulator(&self) -> bool {
        self.config.is_emulator()
    }

    /// Full resource name of a document, as used in commit writes.
    pub fn full_document_name(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_path, collection, doc_id)
    }

    fn documents_url(&self) -> String {
        format!("{}/{}/documents", self.api_root, self.database_path)
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.documents_url(), collection, doc_id)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Get a document, `None` if it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);
        let url = url.as_str();

        self.execute_request("get_document", collection, Some(doc_id), || async move {
            let response = self.send(|token| self.http.get(url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                _ => Err(Self::error_from_response(url, response).await),
            }
        })
        .await
    }

    /// Create a document. Fails with `AlreadyExists` if the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!("{}/{}?documentId={}", self.documents_url(), collection, doc_id);
        let url = url.as_str();
        let body = Document::new(fields);
        let body = &body;

        self.execute_request("create_document", collection, Some(doc_id), || async move {
            let response = self
                .send(|token| self.http.post(url).bearer_auth(token).json(body))
                .await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                _ => Err(Self::error_from_response(url, response).await),
            }
        })
        .await
    }

    /// Write the fields named in `update_mask`, leaving all others untouched.
    ///
    /// Masked fields absent from `fields` are deleted. The document is
    /// created if it does not exist.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: &[&str],
    ) -> FirestoreResult<Document> {
        let mut url = self.document_url(collection, doc_id);
        if !update_mask.is_empty() {
            let params: Vec<String> = update_mask
                .iter()
                .map(|f| format!("updateMask.fieldPaths={}", f))
                .collect();
            url = format!("{}?{}", url, params.join("&"));
        }
        let url = url.as_str();
        let body = Document::new(fields);
        let body = &body;

        self.execute_request("update_document", collection, Some(doc_id), || async move {
            let response = self
                .send(|token| self.http.patch(url).bearer_auth(token).json(body))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                _ => Err(Self::error_from_response(url, response).await),
            }
        })
        .await
    }

    /// Apply writes atomically.
    pub async fn commit(&self, writes: Vec<Write>) -> FirestoreResult<CommitResponse> {
        if writes.is_empty() {
            return Ok(CommitResponse {
                write_results: Vec::new(),
                commit_time: None,
            });
        }
        if writes.len() > 500 {
            return Err(FirestoreError::request_failed("Commit exceeds 500 write limit"));
        }

        let url = format!("{}:commit", self.documents_url());
        let url = url.as_str();
        let request = CommitRequest { writes };
        let request = &request;

        self.execute_request("commit", "commit", None, || async move {
            let response = self
                .send(|token| self.http.post(url).bearer_auth(token).json(request))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                _ => Err(Self::error_from_response(url, response).await),
            }
        })
        .await
    }

    /// Request a composite index on a collection group.
    ///
    /// Returns `true` if creation started and `false` if the index
    /// already exists. Index builds run asynchronously on the server.
    pub async fn create_index(&self, collection_group: &str, index: &Index) -> FirestoreResult<bool> {
        let url = format!(
            "{}/{}/collectionGroups/{}/indexes",
            self.api_root, self.database_path, collection_group
        );
        let url = url.as_str();

        self.execute_request("create_index", collection_group, None, || async move {
            let response = self
                .send(|token| self.http.post(url).bearer_auth(token).json(index))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(true),
                StatusCode::CONFLICT => {
                    debug!(collection_group, "Index already exists");
                    Ok(false)
                }
                _ => Err(Self::error_from_response(url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Send a request, refreshing the token once if it expired.
    async fn send<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.credentials.bearer().await?;
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if Self::is_access_token_expired(&body) && self.credentials.invalidate().await {
            let token = self.credentials.bearer().await?;
            return Ok(build(&token).send().await?);
        }

        Err(FirestoreError::from_http_status(
            StatusCode::UNAUTHORIZED.as_u16(),
            body,
        ))
    }

    /// Execute a request with retries, tracing and metrics.
    async fn execute_request<T, F, Fut>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        op: F,
    ) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        let span = if let Some(id) = doc_id {
            info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id)
        } else {
            info_span!("firestore_request", operation = %operation, collection = %collection)
        };

        let start = Instant::now();
        let result = with_retry(&self.config.retry, operation, op)
            .instrument(span)
            .await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn error_from_response(url: &str, response: Response) -> FirestoreError {
        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body = response.text().await.unwrap_or_default();

        let mut error =
            FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body));
        if let FirestoreError::RateLimited {
            retry_after_ms: slot,
            ..
        } = &mut error
        {
            *slot = retry_after_ms;
        }
        error
    }
}
