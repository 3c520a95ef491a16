//! Retrying, throttled HTTP client.
//!
//! [`RetryHttpClient`] wraps a `reqwest::Client` built from a [`ClientConfig`]
//! (headers, proxy, timeouts) and adds two policies on top:
//!
//! - a single-slot [`RequestGate`] with a fixed pre-request delay, so one client
//!   never has more than one request in flight;
//! - [`execute_with_retry`](RetryHttpClient::execute_with_retry), which retries
//!   transport failures with capped exponential backoff. Non-2xx responses are
//!   returned to the caller untouched.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::{Client, Method, Proxy, Request, Response};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_PROXY_PROBE_URL, DEFAULT_REFERER,
    DEFAULT_REQUEST_DELAY, REQUEST_TIMEOUT_SECS,
};
use super::error::DownloadError;
use super::retry::{RetryDecision, RetryPolicy};
use super::throttle::{GatePermit, RequestGate};
use crate::user_agent;

/// Configuration for a [`RetryHttpClient`].
///
/// Replacing the configuration with [`RetryHttpClient::set_config`] rebuilds
/// the underlying connection pool, header set and proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// User-Agent header.
    pub user_agent: String,
    /// Referer header, if any.
    pub referer: Option<String>,
    /// Accept-Language header, if any.
    pub accept_language: Option<String>,
    /// Raw Cookie header, if any.
    pub cookie: Option<String>,
    /// Proxy URL applied to all schemes; `None` disables the proxy.
    pub proxy: Option<String>,
    /// Fixed delay applied before every request.
    pub request_delay: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Overall request timeout.
    pub request_timeout: Duration,
    /// Retry policy for [`RetryHttpClient::execute_with_retry`] and downloads.
    pub retry_policy: RetryPolicy,
    /// URL requested by [`RetryHttpClient::test_proxy_connection`].
    pub proxy_probe_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: user_agent::default_browser_user_agent().to_string(),
            referer: Some(DEFAULT_REFERER.to_string()),
            accept_language: Some(DEFAULT_ACCEPT_LANGUAGE.to_string()),
            cookie: None,
            proxy: None,
            request_delay: DEFAULT_REQUEST_DELAY,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry_policy: RetryPolicy::default(),
            proxy_probe_url: DEFAULT_PROXY_PROBE_URL.to_string(),
        }
    }
}

/// HTTP client with a single in-flight request slot and transport-level retry.
///
/// Cheap to clone; clones share the connection pool and the request slot.
///
/// # Example
///
/// ```no_run
/// use reqwest::Method;
/// use taskhub_core::download::{ClientConfig, RetryHttpClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RetryHttpClient::new(ClientConfig::default())?;
/// let request = client.create_request(Method::GET, "https://example.com/api", None)?;
/// let response = client.execute_with_retry(request).await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryHttpClient {
    state: Arc<RwLock<ClientState>>,
}

#[derive(Debug)]
struct ClientState {
    client: Client,
    gate: Arc<RequestGate>,
    config: ClientConfig,
}

impl ClientState {
    fn build(config: ClientConfig) -> Result<Self, DownloadError> {
        let client = build_client(&config)?;
        let gate = Arc::new(RequestGate::new(config.request_delay));
        Ok(Self {
            client,
            gate,
            config,
        })
    }
}

impl RetryHttpClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidProxy`], [`DownloadError::InvalidHeader`]
    /// or [`DownloadError::ClientBuild`] when the configuration is rejected.
    #[instrument(level = "debug", skip(config), fields(proxy = config.proxy.is_some()))]
    pub fn new(config: ClientConfig) -> Result<Self, DownloadError> {
        let state = ClientState::build(config)?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        self.read_state().config.clone()
    }

    /// Returns the retry policy currently in effect.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.read_state().config.retry_policy.clone()
    }

    /// Replaces the configuration, rebuilding the client, headers and proxy.
    ///
    /// Requests already in flight finish on the previous client.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`new`](Self::new); on error the previous
    /// configuration stays in effect.
    #[instrument(level = "debug", skip(self, config), fields(proxy = config.proxy.is_some()))]
    pub fn set_config(&self, config: ClientConfig) -> Result<(), DownloadError> {
        let rebuilt = ClientState::build(config)?;
        let mut state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *state = rebuilt;
        debug!("HTTP client configuration replaced");
        Ok(())
    }

    /// Builds a request with the client's default headers.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if `url` does not parse, or
    /// [`DownloadError::Network`] if the request cannot be assembled.
    pub fn create_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Request, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let client = self.read_state().client.clone();
        let mut builder = client.request(method, parsed);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder.build().map_err(|e| DownloadError::network(url, e))
    }

    /// Builds a JSON POST request.
    ///
    /// # Errors
    ///
    /// Same as [`create_request`](Self::create_request).
    pub fn create_json_request<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<Request, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let client = self.read_state().client.clone();
        client
            .post(parsed)
            .json(body)
            .build()
            .map_err(|e| DownloadError::network(url, e))
    }

    /// Sends one request through the single-slot gate.
    ///
    /// The fixed politeness delay is applied after the slot is acquired. The
    /// slot is released once response headers arrive, so the body is read
    /// outside it; use [`execute_holding_slot`](Self::execute_holding_slot)
    /// when the body transfer must count as in flight too.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Timeout`] or [`DownloadError::Network`] on
    /// transport failure. HTTP error statuses are not errors here.
    pub async fn execute(&self, request: Request) -> Result<Response, DownloadError> {
        let (response, _permit) = self.execute_holding_slot(request).await?;
        Ok(response)
    }

    /// Like [`execute`](Self::execute), but hands back the gate permit.
    ///
    /// No other request on this client starts until the permit is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    #[instrument(level = "debug", skip(self, request), fields(url = %request.url(), method = %request.method()))]
    pub async fn execute_holding_slot(
        &self,
        request: Request,
    ) -> Result<(Response, GatePermit), DownloadError> {
        let (client, gate) = {
            let state = self.read_state();
            (state.client.clone(), Arc::clone(&state.gate))
        };
        let url = request.url().to_string();

        let permit = gate.acquire().await;
        let response = client
            .execute(request)
            .await
            .map_err(|e| DownloadError::network(&url, e))?;
        debug!(status = response.status().as_u16(), "response received");
        Ok((response, permit))
    }

    /// Sends a request, retrying transport failures with capped backoff.
    ///
    /// At most `retry_count + 1` attempts are made. The delay before attempt
    /// `k` (k ≥ 2) is `min(2^(k-2) s, 30 s)` with the default policy. A non-2xx
    /// response is returned as-is; callers inspect the status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::RetriesExhausted`] wrapping the last error when
    /// every attempt fails, or [`DownloadError::RequestNotCloneable`] when the
    /// request body cannot be replayed.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn execute_with_retry(&self, request: Request) -> Result<Response, DownloadError> {
        let policy = self.retry_policy();
        let url = request.url().to_string();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_request = request
                .try_clone()
                .ok_or_else(|| DownloadError::RequestNotCloneable { url: url.clone() })?;

            match self.execute(attempt_request).await {
                Ok(response) => {
                    if attempt > 1 {
                        info!(attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(error) => match policy.should_retry(attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        warn!(
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(%reason, "not retrying request");
                        return Err(DownloadError::retries_exhausted(attempt, error));
                    }
                },
            }
        }
    }

    /// Convenience wrapper: `GET url` with retry.
    ///
    /// # Errors
    ///
    /// Same as [`execute_with_retry`](Self::execute_with_retry).
    pub async fn get_with_retry(&self, url: &str) -> Result<Response, DownloadError> {
        let request = self.create_request(Method::GET, url, None)?;
        self.execute_with_retry(request).await
    }

    /// Issues one lightweight request through the configured proxy.
    ///
    /// Any HTTP response counts as reachable; only transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns the transport error from the single probe request.
    #[instrument(skip(self))]
    pub async fn test_proxy_connection(&self) -> Result<(), DownloadError> {
        let (probe_url, proxy) = {
            let state = self.read_state();
            (
                state.config.proxy_probe_url.clone(),
                state.config.proxy.clone(),
            )
        };
        let request = self.create_request(Method::GET, &probe_url, None)?;
        let response = self.execute(request).await?;
        info!(
            probe_url = %probe_url,
            proxy = proxy.as_deref().unwrap_or("none"),
            status = response.status().as_u16(),
            "connectivity check passed"
        );
        Ok(())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ClientState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_client(config: &ClientConfig) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .gzip(true)
        .user_agent(config.user_agent.clone())
        .default_headers(default_headers(config)?);

    builder = match config.proxy.as_deref().map(str::trim) {
        Some(proxy_url) if !proxy_url.is_empty() => {
            let proxy = Proxy::all(proxy_url).map_err(|source| DownloadError::InvalidProxy {
                url: proxy_url.to_string(),
                source,
            })?;
            builder.proxy(proxy)
        }
        _ => builder.no_proxy(),
    };

    builder.build().map_err(DownloadError::ClientBuild)
}

fn default_headers(config: &ClientConfig) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, REFERER, "referer", config.referer.as_deref())?;
    insert_header(
        &mut headers,
        ACCEPT_LANGUAGE,
        "accept-language",
        config.accept_language.as_deref(),
    )?;
    insert_header(&mut headers, COOKIE, "cookie", config.cookie.as_deref())?;
    Ok(headers)
}

fn insert_header(
    headers: &mut HeaderMap,
    name: HeaderName,
    label: &'static str,
    value: Option<&str>,
) -> Result<(), DownloadError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    let value =
        HeaderValue::from_str(value).map_err(|_| DownloadError::InvalidHeader { name: label })?;
    headers.insert(name, value);
    Ok(())
}
