//! HTTP fetch utilities + persisted local dashboard state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "kamdash-storage";

pub const COMPLETED_IDS_FILE: &str = "completed_actionable_ids.json";

/// Locally completed ids, kept across restarts as a JSON string array.
#[derive(Debug, Clone)]
pub struct CompletedIdsStore {
    path: PathBuf,
}

impl CompletedIdsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join(COMPLETED_IDS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or malformed state reads as empty.
    pub async fn load(&self) -> HashSet<String> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashSet::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unreadable completed-ids state; starting empty");
                return HashSet::new();
            }
        };
        match serde_json::from_str::<Vec<String>>(&text) {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "malformed completed-ids state; starting empty");
                HashSet::new()
            }
        }
    }

    /// Rewrites the whole set through a temp file and an atomic rename.
    pub async fn save(&self, ids: &HashSet<String>) -> anyhow::Result<()> {
        let sorted = ids.iter().collect::<BTreeSet<_>>();
        let bytes = serde_json::to_vec(&sorted).context("serializing completed ids")?;

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating state directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp state file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp state file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp state file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp state {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

/// What to do after one attempt that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Retry after the backoff delay, or after the server's `Retry-After` when given.
    Retry { server_wait: Option<Duration> },
    GiveUp,
}

/// Throttling (429) and server errors retry; a `Retry-After` header overrides the backoff.
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retry {
            server_wait: retry_after(headers),
        }
    } else {
        RetryDisposition::GiveUp
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retry { server_wait: None }
    } else {
        RetryDisposition::GiveUp
    }
}

/// Delta-seconds form only; HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt).unwrap_or(u32::MAX).min(16);
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Upper bound on a server-requested wait. Airtable asks for 30s after a 429.
    pub retry_after_cap: Duration,
    pub rate_limit: Option<RateLimit>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 4,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
            retry_after_cap: Duration::from_secs(30),
            rate_limit: Some(RateLimit::airtable()),
        }
    }
}

/// Request budget applied separately to every source key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u32,
    pub burst: u32,
}

impl RateLimit {
    /// Airtable allows five requests per second per base.
    pub fn airtable() -> Self {
        Self {
            per_second: 5,
            burst: 5,
        }
    }

    fn spacing(&self) -> Duration {
        Duration::from_secs(1) / self.per_second.max(1)
    }
}

/// Per-key limiter tracking the theoretical arrival time of the next request.
/// A key may run `burst` requests ahead of its steady `per_second` pace.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    limit: RateLimit,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl KeyedRateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// How long the caller must wait before sending; reserves the slot.
    async fn reserve(&self, key: &str) -> Duration {
        let spacing = self.limit.spacing();
        let allowance = spacing * self.limit.burst.max(1).saturating_sub(1);
        let now = Instant::now();

        let mut slots = self.next_slot.lock().await;
        let slot = slots.entry(key.to_string()).or_insert(now);
        let start = (*slot).max(now);
        *slot = start + spacing;
        (start.saturating_duration_since(now)).saturating_sub(allowance)
    }

    pub async fn acquire(&self, key: &str) {
        let wait = self.reserve(key).await;
        if !wait.is_zero() {
            debug!(key, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::Decode { .. } => None,
        }
    }
}

/// Outgoing request description, rebuilt on every retry attempt.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json_body: Option<serde_json::Value>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            json_body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            json_body: Some(serde_json::to_value(body)?),
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

enum Attempt {
    Done(Result<FetchedResponse, FetchError>),
    Again { error: FetchError, server_wait: Option<Duration> },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    rate_limiter: Option<KeyedRateLimiter>,
    backoff: BackoffPolicy,
    retry_after_cap: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            rate_limiter: config.rate_limit.map(KeyedRateLimiter::new),
            backoff: config.backoff,
            retry_after_cap: config.retry_after_cap,
        })
    }

    async fn per_source_semaphore(&self, source_key: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_key: &str,
        spec: RequestSpec,
    ) -> Result<T, FetchError> {
        let resp = self.execute(source_key, spec).await?;
        serde_json::from_slice(&resp.body).map_err(|source| FetchError::Decode {
            url: resp.final_url.clone(),
            source,
        })
    }

    pub async fn execute(&self, source_key: &str, spec: RequestSpec) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_key, method = %spec.method, url = %spec.url);
        self.execute_with_retries(source_key, &spec).instrument(span).await
    }

    async fn execute_with_retries(&self, source_key: &str, spec: &RequestSpec) -> Result<FetchedResponse, FetchError> {
        // Semaphores are never closed, so acquire only fails on a programming error.
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source_key).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");

        let mut attempt = 0;
        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire(source_key).await;
            }

            let (error, server_wait) = match self.send_once(spec).await {
                Attempt::Done(result) => return result,
                Attempt::Again { error, server_wait } => (error, server_wait),
            };
            if attempt >= self.backoff.max_retries {
                return Err(error);
            }

            let wait = server_wait
                .map(|w| w.min(self.retry_after_cap))
                .unwrap_or_else(|| self.backoff.delay_for_attempt(attempt));
            warn!(attempt, wait_ms = wait.as_millis() as u64, error = %error, "retrying request");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn send_once(&self, spec: &RequestSpec) -> Attempt {
        let mut request = self.client.request(spec.method.clone(), &spec.url);
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &spec.json_body {
            request = request.json(body);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                return match classify_reqwest_error(&err) {
                    RetryDisposition::Retry { server_wait } => Attempt::Again {
                        error: err.into(),
                        server_wait,
                    },
                    RetryDisposition::GiveUp => Attempt::Done(Err(err.into())),
                };
            }
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        if status.is_success() {
            return Attempt::Done(match resp.bytes().await {
                Ok(body) => Ok(FetchedResponse {
                    status,
                    final_url,
                    body: body.to_vec(),
                }),
                Err(err) => Err(err.into()),
            });
        }

        let disposition = classify_status(status, resp.headers());
        let error = FetchError::HttpStatus {
            status: status.as_u16(),
            url: final_url,
            body: resp.text().await.unwrap_or_default(),
        };
        match disposition {
            RetryDisposition::Retry { server_wait } => Attempt::Again { error, server_wait },
            RetryDisposition::GiveUp => Attempt::Done(Err(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_state_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CompletedIdsStore::in_dir(dir.path());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_state_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CompletedIdsStore::in_dir(dir.path());
        std::fs::write(store.path(), b"{not json").expect("write");
        assert!(store.load().await.is_empty());
        std::fs::write(store.path(), br#"{"ids": ["a"]}"#).expect("write");
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn saved_ids_round_trip_sorted() {
        let dir = tempdir().expect("tempdir");
        let store = CompletedIdsStore::in_dir(dir.path().join("nested"));
        let ids = ["recB", "recA"].into_iter().map(String::from).collect::<HashSet<_>>();
        store.save(&ids).await.expect("save");

        let text = std::fs::read_to_string(store.path()).expect("read");
        assert_eq!(text, r#"["recA","recB"]"#);
        assert_eq!(store.load().await, ids);

        let leftovers = std::fs::read_dir(dir.path().join("nested"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        let none = HeaderMap::new();
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, &none),
            RetryDisposition::Retry { server_wait: None }
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND, &none), RetryDisposition::GiveUp);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, &none), RetryDisposition::GiveUp);

        let mut throttled = HeaderMap::new();
        throttled.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &throttled),
            RetryDisposition::Retry {
                server_wait: Some(Duration::from_secs(30))
            }
        );
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 2 "));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn post_spec_carries_json_and_headers() {
        let spec = RequestSpec::post_json("https://backend.test/update", &serde_json::json!({"a": 1}))
            .expect("spec")
            .header("weekdayidentityid", "id-1");
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.json_body, Some(serde_json::json!({"a": 1})));
        assert_eq!(spec.headers, vec![("weekdayidentityid".to_string(), "id-1".to_string())]);
    }

    #[tokio::test]
    async fn rate_limiter_allows_a_burst_then_paces() {
        let limiter = KeyedRateLimiter::new(RateLimit {
            per_second: 5,
            burst: 3,
        });
        for _ in 0..3 {
            assert_eq!(limiter.reserve("POST_TBR").await, Duration::ZERO);
        }
        let wait = limiter.reserve("POST_TBR").await;
        assert!(wait > Duration::from_millis(150) && wait <= Duration::from_millis(200), "{wait:?}");
    }

    #[tokio::test]
    async fn rate_limiter_keys_are_independent() {
        let limiter = KeyedRateLimiter::new(RateLimit {
            per_second: 1,
            burst: 1,
        });
        assert_eq!(limiter.reserve("POST_TBR").await, Duration::ZERO);
        assert_eq!(limiter.reserve("IC").await, Duration::ZERO);
        assert!(limiter.reserve("POST_TBR").await > Duration::from_millis(900));
    }
}
