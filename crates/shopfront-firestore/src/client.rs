//! Firestore REST API client.
//!
//! - Service-account JWT authentication with a token cache
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter for idempotent calls
//! - Observability (tracing spans, metrics)

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::codec::{encode_fields, Fields};
use crate::credential::ServiceAccountCredential;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::query::{quote_field_path, Query};
use crate::retry::{with_retry, RetryConfig};
use crate::store::DocumentData;
use crate::token::{TokenMinter, TOKEN_URL};
use crate::token_cache::TokenCache;
use crate::types::{Document, RunQueryRequest, RunQueryResponse};

/// Public REST root of Firestore.
pub const API_ROOT: &str = "https://firestore.googleapis.com/v1";

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
    /// REST root the documents URL is built on
    pub api_root: String,
    /// OAuth2 token endpoint (also the assertion audience)
    pub token_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    /// Defaults for a project on the public endpoint.
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            api_root: API_ROOT.to_string(),
            token_url: TOKEN_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Config for the credential's project, tuned from environment variables.
    pub fn from_credential(credential: &ServiceAccountCredential) -> Self {
        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Self {
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "(default)".to_string()),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::for_project(credential.tenant_id())
        }
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `{api_root}/projects/{project}/databases/{database}/documents`
    pub fn documents_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.api_root.trim_end_matches('/'),
            self.project_id,
            self.database_id
        )
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
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    pub fn new(config: FirestoreConfig, credential: ServiceAccountCredential) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("shopfront-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let minter = TokenMinter::new(http.clone(), Arc::new(credential))
            .with_token_url(config.token_url.clone());

        Ok(Self {
            http,
            base_url: config.documents_url(),
            config,
            token_cache: Arc::new(TokenCache::new(minter)),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let credential = ServiceAccountCredential::from_env()?;
        let config = FirestoreConfig::from_credential(&credential);
        Self::new(config, credential)
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection.trim_matches('/'))
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}", self.collection_url(collection), doc_id)
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Create a document with a generated id and return the id.
    ///
    /// Not retried: a repeated POST would create a second document.
    pub async fn create_document(&self, collection: &str, fields: Fields) -> FirestoreResult<String> {
        let url = self.collection_url(collection);
        let body = Document::new(encode_fields(&fields));

        self.execute_request("create_document", collection, None, async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;
            Self::created_id(response).await
        })
        .await
    }

    /// Create a document under an explicit id. Fails if it already exists.
    pub async fn create_document_with_id(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> FirestoreResult<String> {
        let url = format!(
            "{}?documentId={}",
            self.collection_url(collection),
            urlencoding::encode(doc_id)
        );
        let body = Document::new(encode_fields(&fields));

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;
            Self::created_id(response).await
        })
        .await
    }

    async fn created_id(response: Response) -> FirestoreResult<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::write_error(status, response).await);
        }

        let doc: Document = response.json().await?;
        doc.id()
            .map(str::to_string)
            .ok_or_else(|| FirestoreError::InvalidResponse("created document has no name".to_string()))
    }

    /// Update only the given fields.
    ///
    /// Each key is sent as an `updateMask.fieldPaths` parameter, so fields not
    /// named here keep their stored values. Keys are top-level field names and
    /// are quoted when needed. A missing document is created.
    pub async fn update_document(&self, collection: &str, doc_id: &str, fields: Fields) -> FirestoreResult<()> {
        if fields.is_empty() {
            debug!(collection = %collection, doc_id = %doc_id, "Skipping update with empty field mask");
            return Ok(());
        }

        let mask: Vec<String> = fields
            .keys()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(&quote_field_path(f))))
            .collect();
        let url = format!("{}?{}", self.document_url(collection, doc_id), mask.join("&"));
        let body = Document::new(encode_fields(&fields));
        let (url, body) = (&url, &body);

        self.execute_request(
            "update_document",
            collection,
            Some(doc_id),
            with_retry(&self.config.retry, "update_document", || async move {
                let response = self
                    .send_authorized(|token| self.http.patch(url).bearer_auth(token).json(body))
                    .await?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(Self::write_error(status, response).await)
                }
            }),
        )
        .await
    }

    /// Delete a document. A document that does not exist counts as deleted.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<()> {
        let url = self.document_url(collection, doc_id);
        let url = &url;

        self.execute_request(
            "delete_document",
            collection,
            Some(doc_id),
            with_retry(&self.config.retry, "delete_document", || async move {
                let response = self
                    .send_authorized(|token| self.http.delete(url).bearer_auth(token))
                    .await?;
                match response.status() {
                    status if status.is_success() => Ok(()),
                    StatusCode::NOT_FOUND => Ok(()),
                    status => Err(Self::write_error(status, response).await),
                }
            }),
        )
        .await
    }

    /// Read a document by its path relative to the documents root,
    /// e.g. `security_alerts/abc`. Returns `None` when it does not exist.
    pub async fn get_document_at(&self, path: &str) -> FirestoreResult<Option<DocumentData>> {
        let path = path.trim_matches('/');
        let url = format!("{}/{}", self.base_url, path);
        let url = &url;
        let (collection, doc_id) = path.rsplit_once('/').unwrap_or(("", path));

        self.execute_request(
            "get_document",
            collection,
            Some(doc_id),
            with_retry(&self.config.retry, "get_document", || async move {
                let response = self
                    .send_authorized(|token| self.http.get(url).bearer_auth(token))
                    .await?;
                match response.status() {
                    StatusCode::OK => {
                        let doc: Document = response.json().await?;
                        DocumentData::from_document(doc).map(Some)
                    }
                    StatusCode::NOT_FOUND => Ok(None),
                    status => Err(Self::read_error(status, response).await),
                }
            }),
        )
        .await
    }

    /// Read a document by collection and id.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<Option<DocumentData>> {
        self.get_document_at(&format!("{}/{}", collection.trim_matches('/'), doc_id))
            .await
    }

    /// Run a structured query and decode every returned document.
    pub async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentData>> {
        let (parent, _) = query.parent_and_collection_id();
        let url = if parent.is_empty() {
            format!("{}:runQuery", self.base_url)
        } else {
            format!("{}/{}:runQuery", self.base_url, parent)
        };
        let request = RunQueryRequest {
            structured_query: query.to_structured_query(),
        };
        let (url, request) = (&url, &request);

        self.execute_request(
            "run_query",
            query.collection(),
            None,
            with_retry(&self.config.retry, "run_query", || async move {
                let response = self
                    .send_authorized(|token| self.http.post(url).bearer_auth(token).json(request))
                    .await?;
                let status = response.status();
                if status != StatusCode::OK {
                    return Err(Self::read_error(status, response).await);
                }

                // runQuery returns a JSON array of RunQueryResponse objects
                let body = response.text().await?;
                let responses: Vec<RunQueryResponse> = serde_json::from_str(&body).map_err(|e| {
                    FirestoreError::InvalidResponse(format!(
                        "Failed to parse runQuery response: {} (body prefix: {})",
                        e,
                        body.chars().take(200).collect::<String>()
                    ))
                })?;

                responses
                    .into_iter()
                    .filter_map(|r| r.document)
                    .map(DocumentData::from_document)
                    .collect()
            }),
        )
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Send a request with a bearer token.
    ///
    /// A 401 reporting an expired token invalidates the cache and the request
    /// is sent once more with a freshly minted token.
    async fn send_authorized<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(token.as_str()).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::auth_failure(format!(
                "Firestore rejected the access token: {}",
                body
            )));
        }

        debug!("Access token expired, minting a new one");
        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(token.as_str()).send().await?)
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = if let Some(id) = doc_id {
            info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id)
        } else {
            info_span!("firestore_request", operation = %operation, collection = %collection)
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(0),
        };
        record_request(operation, collection, status, start.elapsed());

        result
    }

    async fn write_error(status: StatusCode, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::write_failure(status.as_u16(), body)
    }

    async fn read_error(status: StatusCode, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::read_failure(status.as_u16(), body)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn credential() -> ServiceAccountCredential {
        ServiceAccountCredential::new("edge@shop.iam", "unused", "shop-prod")
    }

    #[test]
    fn test_documents_url() {
        let config = FirestoreConfig::for_project("shop-prod");
        assert_eq!(
            config.documents_url(),
            "https://firestore.googleapis.com/v1/projects/shop-prod/databases/(default)/documents"
        );

        let config = config.with_api_root("http://127.0.0.1:9000/");
        assert_eq!(
            config.documents_url(),
            "http://127.0.0.1:9000/projects/shop-prod/databases/(default)/documents"
        );
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        std::env::remove_var("FIRESTORE_DATABASE_ID");
        std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
        let config = FirestoreConfig::from_credential(&credential());
        assert_eq!(config.project_id, "shop-prod");
        assert_eq!(config.database_id, "(default)");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_config_reads_database_id() {
        std::env::set_var("FIRESTORE_DATABASE_ID", "edge");
        let config = FirestoreConfig::from_credential(&credential());
        std::env::remove_var("FIRESTORE_DATABASE_ID");
        assert_eq!(config.database_id, "edge");
    }

    #[test]
    fn test_access_token_expired_detection() {
        assert!(FirestoreClient::is_access_token_expired(
            r#"{"error":{"status":"UNAUTHENTICATED","details":[{"reason":"ACCESS_TOKEN_EXPIRED"}]}}"#
        ));
        assert!(!FirestoreClient::is_access_token_expired(
            r#"{"error":{"status":"PERMISSION_DENIED"}}"#
        ));
    }
}
