use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use eyre::{Result, WrapErr};
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode, Version, body::Incoming, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls_native_certs::load_native_certs;
use tokio::time::{sleep, timeout};
use tracing::Instrument;

use crate::{
    config::OutboundConfig,
    core::rewrite::OutboundRequest,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult, destination_of},
    utils::backoff::calculate_backoff,
};

/// Bounded retry schedule for transient delivery failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OutboundConfig) -> Result<Self> {
        Ok(Self {
            max_retries: config.max_retries,
            wait_min: config.retry_wait_min()?,
            wait_max: config.retry_wait_max()?,
        })
    }

    /// Total attempts including the first one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// HTTP client adapter using Hyper with Rustls over a shared connection pool.
///
/// Responsibilities:
/// * Sets a default User-Agent when the relayed request has none
/// * Bounds each attempt with the configured request timeout
/// * Retries connection errors, timeouts, `429` and `5xx` (but not `501`)
///   with exponential backoff until the retry policy is exhausted
/// * Reads the response body under the same timeout and hands it back
///   buffered as an Axum body
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
    retry: RetryPolicy,
    user_agent: Option<HeaderValue>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new(config: &OutboundConfig) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let request_timeout = config.request_timeout()?;
        let retry = RetryPolicy::from_config(config)?;
        let user_agent = config
            .user_agent
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .wrap_err("Invalid outbound.user_agent")?;

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(request_timeout));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.pool_idle_timeout()?)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build::<_, Full<Bytes>>(https_connector);

        tracing::info!(
            "Created outbound HTTP client (timeout {:?}, up to {} attempt(s))",
            request_timeout,
            retry.attempts()
        );
        Ok(Self {
            client,
            request_timeout,
            retry,
            user_agent,
        })
    }

    /// Inject the default User-Agent if the relayed request carries none.
    fn add_common_headers(&self, req: &mut OutboundRequest) {
        if let Some(agent) = &self.user_agent {
            let headers = req.headers_mut();
            if !headers.contains_key(header::USER_AGENT) {
                headers.insert(header::USER_AGENT, agent.clone());
            }
        }
    }

    /// Statuses worth another attempt.
    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
    }

    fn check_request(req: &OutboundRequest) -> HttpClientResult<()> {
        match req.uri().scheme_str() {
            Some("http") | Some("https") => {}
            other => {
                return Err(HttpClientError::InvalidRequest(format!(
                    "Unsupported scheme {other:?} in {}",
                    req.uri()
                )));
            }
        }
        if req.uri().host().is_none() {
            return Err(HttpClientError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        }
        Ok(())
    }

    /// One attempt; the buffered body is cloned so the request can be replayed.
    async fn attempt(&self, req: &OutboundRequest) -> HttpClientResult<Response<Incoming>> {
        let mut outgoing = Request::new(Full::new(req.body().clone()));
        *outgoing.method_mut() = req.method().clone();
        *outgoing.uri_mut() = req.uri().clone();
        *outgoing.headers_mut() = req.headers().clone();
        *outgoing.version_mut() = Version::HTTP_11;

        match timeout(self.request_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(HttpClientError::ConnectionError(format!(
                "Request to {} {} failed: {e}",
                req.method(),
                req.uri()
            ))),
            Err(_) => Err(HttpClientError::Timeout(self.request_timeout)),
        }
    }

    /// Read a response body, giving up after the request timeout.
    ///
    /// Dropping an unfinished body closes its connection instead of
    /// returning it to the pool.
    async fn drain_body(&self, body: Incoming) -> Option<Bytes> {
        match timeout(self.request_timeout, body.collect()).await {
            Ok(Ok(collected)) => Some(collected.to_bytes()),
            Ok(Err(e)) => {
                tracing::debug!("Failed to read response body: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Response body not finished after {:?}, dropping connection",
                    self.request_timeout
                );
                None
            }
        }
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, mut req: OutboundRequest) -> HttpClientResult<Response<AxumBody>> {
        Self::check_request(&req)?;
        self.add_common_headers(&mut req);

        let span = tracing::info_span!(
            "outbound_request",
            destination = %destination_of(&req),
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        async move {
            let attempts = self.retry.attempts();
            let mut attempt = 0;

            loop {
                attempt += 1;

                let error = match self.attempt(&req).await {
                    Ok(response) if Self::is_retryable_status(response.status()) => {
                        let status = response.status();
                        // Read the error body so the connection can go back to the pool
                        let _ = self.drain_body(response.into_body()).await;
                        HttpClientError::BackendError {
                            url: req.uri().to_string(),
                            status,
                        }
                    }
                    Ok(response) => {
                        tracing::Span::current().record("http.status_code", response.status().as_u16());

                        let (mut parts, body) = response.into_parts();
                        let body = self.drain_body(body).await.unwrap_or_default();
                        parts.headers.remove(header::TRANSFER_ENCODING);
                        parts.headers.remove(header::CONTENT_LENGTH);
                        return Ok(Response::from_parts(parts, AxumBody::from(body)));
                    }
                    Err(e) if e.is_transient() => e,
                    Err(e) => return Err(e),
                };

                if attempt >= attempts {
                    return Err(HttpClientError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }

                let wait = calculate_backoff(attempt, self.retry.wait_min, self.retry.wait_max);
                tracing::warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    attempts,
                    error,
                    wait
                );
                sleep(wait).await;
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use axum::{Router, routing::any};
    use futures_util::stream;
    use tokio::{net::TcpListener, time::Instant};

    use super::*;

    fn fast_config(max_retries: u32) -> OutboundConfig {
        OutboundConfig {
            request_timeout: "2s".to_string(),
            max_retries,
            retry_wait_min: "5ms".to_string(),
            retry_wait_max: "20ms".to_string(),
            ..OutboundConfig::default()
        }
    }

    fn outbound(uri: &str) -> OutboundRequest {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Bytes::from_static(b"hello"))
            .unwrap()
    }

    /// Serves `failures` 503 answers, then 200s; returns the address and hit counter.
    async fn flaky_server(failures: u32) -> (std::net::SocketAddr, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/{*path}",
            any(move || {
                let counter = counter.clone();
                async move {
                    let seen = counter.fetch_add(1, Ordering::SeqCst);
                    if seen < failures {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    /// Answers 200 with a body that trickles one byte every 100ms and never ends.
    async fn endless_body_server() -> std::net::SocketAddr {
        let app = Router::new().fallback(|| async {
            let trickle = stream::unfold((), |()| async {
                sleep(Duration::from_millis(100)).await;
                Some((Ok::<_, std::io::Error>(Bytes::from_static(b".")), ()))
            });
            AxumBody::from_stream(trickle)
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClientAdapter::new(&OutboundConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_add_common_headers() {
        let client = HttpClientAdapter::new(&OutboundConfig::default()).unwrap();

        let mut req = outbound("https://example.com/");
        client.add_common_headers(&mut req);
        assert!(
            req.headers()
                .get(header::USER_AGENT)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("delayhttp/")
        );

        let mut req = outbound("https://example.com/");
        req.headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("caller/2.0"));
        client.add_common_headers(&mut req);
        assert_eq!(req.headers().get(header::USER_AGENT).unwrap(), "caller/2.0");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(HttpClientAdapter::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(HttpClientAdapter::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!HttpClientAdapter::is_retryable_status(StatusCode::NOT_IMPLEMENTED));
        assert!(!HttpClientAdapter::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!HttpClientAdapter::is_retryable_status(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_retried() {
        let client = HttpClientAdapter::new(&fast_config(3)).unwrap();
        let err = client.send_request(outbound("/relative")).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (addr, hits) = flaky_server(2).await;
        let client = HttpClientAdapter::new(&fast_config(3)).unwrap();

        let response = client
            .send_request(outbound(&format!("http://{addr}/hook")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_policy_is_exhausted() {
        let (addr, hits) = flaky_server(u32::MAX).await;
        let client = HttpClientAdapter::new(&fast_config(1)).unwrap();

        let err = client
            .send_request(outbound(&format!("http://{addr}/hook")))
            .await
            .unwrap_err();
        match err {
            HttpClientError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, HttpClientError::BackendError { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_endless_body_is_cut_at_request_timeout() {
        let addr = endless_body_server().await;
        let client = HttpClientAdapter::new(&OutboundConfig {
            request_timeout: "300ms".to_string(),
            ..fast_config(0)
        })
        .unwrap();

        let started = Instant::now();
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            client.send_request(outbound(&format!("http://{addr}/stream"))),
        )
        .await
        .expect("send_request must not wait for the body forever")
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_secs(2));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClientAdapter::new(&fast_config(0)).unwrap();
        let err = client
            .send_request(outbound(&format!("http://{addr}/")))
            .await
            .unwrap_err();
        match err {
            HttpClientError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, HttpClientError::ConnectionError(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
