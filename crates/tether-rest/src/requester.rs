//! REST requester
//!
//! Owns the route → bucket table and the global lock for one client. Callers
//! await [`Requester::request`]; the HTTP exchange itself runs on the route's
//! bucket worker, so calls to one route are serialized while different routes
//! proceed independently.

use crate::error::{RequestError, RequestResult};
use crate::headers::{deadline, seconds_to_duration, RateLimitHeaders};
use crate::request::ApiRequest;
use crate::transport::{HttpRequest, HttpTransport, RawResponse, ReqwestTransport};
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_common::RestConfig;
use tether_core::{Bucket, GlobalLock, Job, RateLimitUpdate};
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

/// Wait applied to a 429 that carries no retry hint
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Outcome of one HTTP exchange that does not end the request with an error
#[derive(Debug)]
enum Attempt {
    Done(Option<Value>),
    RateLimited { retry_after: Duration, global: bool },
    ServerError(StatusCode),
}

/// Body of a 429 response
#[derive(Debug, Default, Deserialize)]
struct RateLimitedBody {
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    token: String,
    config: RestConfig,
    global: GlobalLock,
    buckets: DashMap<String, Bucket>,
}

/// Rate-limited REST client
///
/// Cloning is cheap and shares the bucket table and global lock.
#[derive(Clone)]
pub struct Requester {
    inner: Arc<Inner>,
}

impl Requester {
    /// Create a requester backed by `reqwest`
    pub fn new(token: impl Into<String>, config: RestConfig) -> RequestResult<Self> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(token, config, Arc::new(transport)))
    }

    /// Create a requester over a custom transport
    pub fn with_transport(
        token: impl Into<String>,
        config: RestConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                token: token.into(),
                config,
                global: GlobalLock::new(),
                buckets: DashMap::new(),
            }),
        }
    }

    /// Get the global lock shared by every route of this requester
    pub fn global_lock(&self) -> &GlobalLock {
        &self.inner.global
    }

    /// Get the bucket for a route key, if one has been created
    pub fn bucket(&self, route: &str) -> Option<Bucket> {
        self.inner.buckets.get(route).map(|bucket| bucket.clone())
    }

    fn bucket_for(&self, route: &str) -> Bucket {
        self.inner
            .buckets
            .entry(route.to_string())
            .or_insert_with(|| Bucket::reported(route, self.inner.global.clone()))
            .clone()
    }

    /// Perform a request, absorbing rate limits and retrying server errors
    ///
    /// Returns the decoded JSON body, or `None` when the response had no body.
    pub async fn request(&self, request: ApiRequest) -> RequestResult<Option<Value>> {
        let route = request.route_key();
        let http = self.build(&request)?;
        let mut server_errors = 0u32;

        loop {
            match self.attempt(&http, route.as_deref()).await? {
                Attempt::Done(payload) => return Ok(payload),
                Attempt::RateLimited {
                    retry_after,
                    global,
                } => {
                    tracing::debug!(
                        method = %request.method,
                        path = %request.path,
                        retry_after_ms = retry_after.as_millis(),
                        global,
                        "Rate limited, re-submitting"
                    );

                    // Without a bucket nothing else holds a route-scoped retry back
                    if !global && route.is_none() {
                        sleep(retry_after).await;
                    }
                }
                Attempt::ServerError(status) => {
                    server_errors += 1;
                    if self
                        .inner
                        .config
                        .max_server_error_retries
                        .is_some_and(|max| server_errors > max)
                    {
                        tracing::error!(
                            method = %request.method,
                            path = %request.path,
                            status = status.as_u16(),
                            attempts = server_errors,
                            "Giving up after repeated server errors"
                        );
                        return Err(RequestError::ServerError {
                            status: status.as_u16(),
                            attempts: server_errors,
                        });
                    }

                    let delay = self.inner.config.server_error_retry_delay();
                    tracing::warn!(
                        method = %request.method,
                        path = %request.path,
                        status = status.as_u16(),
                        retry_in_ms = delay.as_millis(),
                        "Server error, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn build(&self, request: &ApiRequest) -> RequestResult<HttpRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&self.inner.config.user_agent)?);

        if request.authenticated {
            let mut authorization = header_value(&format!("Bot {}", self.inner.token))?;
            authorization.set_sensitive(true);
            headers.insert(AUTHORIZATION, authorization);
        }

        let body = match &request.body {
            Some(body) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(
                    serde_json::to_vec(body)
                        .map_err(|e| RequestError::Unknown(format!("unencodable body: {e}")))?,
                )
            }
            None => None,
        };

        Ok(HttpRequest {
            method: request.method.clone(),
            url: format!(
                "{}{}",
                self.inner.config.base_url.trim_end_matches('/'),
                request.path
            ),
            headers,
            body,
        })
    }

    /// Submit one exchange through the global lock and the route bucket
    async fn attempt(&self, http: &HttpRequest, route: Option<&str>) -> RequestResult<Attempt> {
        let (tx, rx) = oneshot::channel();
        let requester = self.clone();
        let http = http.clone();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                let (outcome, update) = requester.execute(http).await;
                let _ = tx.send(outcome);
                update
            })
        });

        let bucket = route.map(|route| self.bucket_for(route));
        self.inner.global.run_or_defer(move || match bucket {
            Some(bucket) => {
                // On failure the job is dropped and the receiver below reports it
                let _ = bucket.submit(job);
            }
            None => {
                tokio::spawn(job());
            }
        });

        rx.await
            .map_err(|_| RequestError::Unknown("request dropped before completion".to_string()))?
    }

    /// Run the HTTP exchange and classify the response
    async fn execute(
        &self,
        http: HttpRequest,
    ) -> (RequestResult<Attempt>, Option<RateLimitUpdate>) {
        let method = http.method.clone();
        let url = http.url.clone();

        let response = match self.inner.transport.execute(http).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%method, %url, error = %e, "Request failed in transport");
                return (Err(e), None);
            }
        };

        tracing::trace!(%method, %url, status = response.status.as_u16(), "Response received");
        self.classify(response, Instant::now())
    }

    fn classify(
        &self,
        response: RawResponse,
        now: Instant,
    ) -> (RequestResult<Attempt>, Option<RateLimitUpdate>) {
        let headers = RateLimitHeaders::from_headers(&response.headers);
        let status = response.status;

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body: RateLimitedBody = serde_json::from_slice(&response.body).unwrap_or_default();
            let retry_after = headers
                .retry_after()
                .or_else(|| body.retry_after.map(seconds_to_duration))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            let global = headers.global || body.global;

            if global {
                self.inner.global.engage(retry_after);
            }

            // A route-scoped 429 holds the route's bucket until the retry is due
            let update = (!global).then(|| RateLimitUpdate {
                limit: headers.limit.unwrap_or(1),
                remaining: 0,
                reset_at: deadline(now, retry_after),
            });

            return (
                Ok(Attempt::RateLimited {
                    retry_after,
                    global,
                }),
                update,
            );
        }

        if status.is_server_error() {
            return (Ok(Attempt::ServerError(status)), None);
        }

        if status.is_success() {
            let update = headers.update(now);
            if response.body.is_empty() {
                return (Ok(Attempt::Done(None)), update);
            }

            let outcome = serde_json::from_slice(&response.body)
                .map(|payload| Attempt::Done(Some(payload)))
                .map_err(|e| RequestError::Unknown(format!("malformed response body: {e}")));
            return (outcome, update);
        }

        (
            Err(RequestError::Client {
                status: status.as_u16(),
                body: serde_json::from_slice(&response.body).ok(),
            }),
            None,
        )
    }
}

fn header_value(value: &str) -> RequestResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| RequestError::Unknown(format!("invalid header: {e}")))
}

impl std::fmt::Debug for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requester")
            .field("base_url", &self.inner.config.base_url)
            .field("routes", &self.inner.buckets.len())
            .field("global", &self.inner.global)
            .finish()
    }
}
