//! Firestore REST client used by the market store.
//!
//! Reads (get, query, count) go through the retry loop. Commits never do:
//! their preconditions are what the market layer relies on to detect a
//! concurrent writer, so a failed precondition must reach the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::{record_commit, record_request, CommitOutcome};
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::{TokenCache, EMULATOR_TOKEN};
use crate::types::{
    Aggregation, CommitRequest, CommitResponse, CountAggregation, Document, FromFirestoreValue,
    RunAggregationQueryRequest, RunAggregationQueryResponse, RunQueryRequest, RunQueryResponse,
    StructuredAggregationQuery, StructuredQuery, Write,
};

/// Firestore commits accept at most this many writes.
pub const MAX_COMMIT_WRITES: usize = 500;

/// Connection settings, read from the environment.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Usually `(default)`.
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a Firestore emulator. Disables Google authentication.
    pub emulator_host: Option<String>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl FirestoreConfig {
    /// `GCP_PROJECT_ID` (or `FIREBASE_PROJECT_ID`) is required.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = env_nonempty("GCP_PROJECT_ID")
            .or_else(|| env_nonempty("FIREBASE_PROJECT_ID"))
            .ok_or_else(|| {
                FirestoreError::auth_error("GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to use the Firestore store")
            })?;

        let secs = |key: &str, default: u64| {
            env_nonempty(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(default))
        };

        Ok(Self {
            project_id,
            database_id: env_nonempty("FIRESTORE_DATABASE_ID").unwrap_or_else(|| "(default)".to_string()),
            timeout: secs("FIRESTORE_TIMEOUT_SECS", 30),
            connect_timeout: secs("FIRESTORE_CONNECT_TIMEOUT_SECS", 5),
            retry: RetryConfig::from_env(),
            emulator_host: env_nonempty("FIRESTORE_EMULATOR_HOST"),
        })
    }

    /// Documents root URL for this project and database.
    fn base_url(&self) -> String {
        let root = match &self.emulator_host {
            Some(host) => {
                let host = host
                    .trim_start_matches("http://")
                    .trim_start_matches("https://")
                    .trim_end_matches('/');
                format!("http://{}", host)
            }
            None => "https://firestore.googleapis.com".to_string(),
        };
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            root, self.project_id, self.database_id
        )
    }
}

/// Handle to one Firestore database. Cheap to clone.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let token_cache = match &config.emulator_host {
            Some(host) => {
                info!(emulator = %host, "Using Firestore emulator");
                TokenCache::fixed(EMULATOR_TOKEN)
            }
            None => TokenCache::new(Self::create_auth_provider()?),
        };

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vswap-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            config,
            token_cache: Arc::new(token_cache),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Build full document name for writes.
    pub fn full_document_name(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "projects/{}/databases/{}/documents/{}/{}",
            self.config.project_id, self.config.database_id, collection, doc_id
        )
    }

    /// Send a request, refreshing the token once if it expired mid-flight.
    async fn send<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(401, body));
        }

        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(&token).send().await?)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a document.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        with_retry(&self.config.retry, "get_document", move || {
            self.get_document_once(collection, doc_id)
        })
        .await
    }

    async fn get_document_once(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = format!("{}/{}/{}", self.base_url, collection, urlencoding::encode(doc_id));

        self.execute_request("get_document", collection, Some(doc_id), async {
            let response = self.send(|token| self.http.get(&url).bearer_auth(token)).await?;

            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Run a structured query.
    ///
    /// `parent_path` is the path containing the collection, e.g.
    /// "users/USER_ID" for a subcollection, or "" for top-level collections.
    pub async fn run_query(
        &self,
        parent_path: &str,
        query: StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let query = &query;
        with_retry(&self.config.retry, "run_query", move || {
            self.run_query_once(parent_path, query)
        })
        .await
    }

    async fn run_query_once(
        &self,
        parent_path: &str,
        query: &StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let url = self.parent_url(parent_path, "runQuery");
        let request = RunQueryRequest {
            structured_query: query.clone(),
        };
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.as_str())
            .unwrap_or(parent_path);

        self.execute_request("run_query", collection, None, async {
            let response = self
                .send(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    // runQuery returns a JSON array of RunQueryResponse objects
                    let responses: Vec<RunQueryResponse> =
                        serde_json::from_str(&body).map_err(|e| {
                            FirestoreError::InvalidResponse(format!(
                                "Failed to parse runQuery response: {} (body prefix: {})",
                                e,
                                &body[..body.len().min(200)]
                            ))
                        })?;

                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Count the documents a query matches without fetching them.
    pub async fn count(&self, parent_path: &str, query: StructuredQuery) -> FirestoreResult<u64> {
        let query = &query;
        with_retry(&self.config.retry, "count", move || {
            self.count_once(parent_path, query)
        })
        .await
    }

    async fn count_once(&self, parent_path: &str, query: &StructuredQuery) -> FirestoreResult<u64> {
        const ALIAS: &str = "total";

        let url = self.parent_url(parent_path, "runAggregationQuery");
        let request = RunAggregationQueryRequest {
            structured_aggregation_query: StructuredAggregationQuery {
                structured_query: query.clone(),
                aggregations: vec![Aggregation {
                    alias: ALIAS.to_string(),
                    count: CountAggregation::default(),
                }],
            },
        };

        self.execute_request("count", parent_path, None, async {
            let response = self
                .send(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let responses: Vec<RunAggregationQueryResponse> = response.json().await?;
                    responses
                        .iter()
                        .filter_map(|r| r.result.as_ref())
                        .filter_map(|r| r.aggregate_fields.as_ref())
                        .filter_map(|fields| fields.get(ALIAS))
                        .find_map(u64::from_firestore_value)
                        .ok_or_else(|| {
                            FirestoreError::InvalidResponse(
                                "Aggregation response has no count".to_string(),
                            )
                        })
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    fn parent_url(&self, parent_path: &str, method: &str) -> String {
        if parent_path.is_empty() {
            format!("{}:{}", self.base_url, method)
        } else {
            format!("{}/{}:{}", self.base_url, parent_path, method)
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply writes atomically. Either every write applies or none does.
    ///
    /// Not retried: a failed precondition surfaces as `PreconditionFailed`,
    /// `AlreadyExists` or `NotFound` for the caller to resolve.
    pub async fn commit(&self, writes: Vec<Write>) -> FirestoreResult<CommitResponse> {
        if writes.is_empty() {
            return Ok(CommitResponse {
                write_results: Vec::new(),
                commit_time: None,
            });
        }
        if writes.len() > MAX_COMMIT_WRITES {
            return Err(FirestoreError::request_failed(format!(
                "Commit of {} writes exceeds the {} write limit",
                writes.len(),
                MAX_COMMIT_WRITES
            )));
        }

        let url = format!("{}:commit", self.base_url);
        let count = writes.len();
        let request = CommitRequest { writes };

        let result = self
            .execute_request("commit", "batch", None, async {
                let response = self
                    .send(|token| self.http.post(&url).bearer_auth(token).json(&request))
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(response.json::<CommitResponse>().await?),
                    status => Err(Self::handle_error_response(status, &url, response).await),
                }
            })
            .await;

        record_commit(count, CommitOutcome::of(&result));
        if let Err(e) = &result {
            debug!(writes = count, error = %e, "Commit rejected");
        }
        result
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

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
        let span = match doc_id {
            Some(id) => info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id),
            None => info_span!("firestore_request", operation = %operation, collection = %collection),
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, collection, status, start.elapsed());

        result
    }

    async fn handle_error_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}
