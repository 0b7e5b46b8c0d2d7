//! Request description

use crate::route::route_key;
use reqwest::Method;
use serde_json::Value;

/// One REST call: method, path relative to the API base, optional JSON body
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path with resource ids filled in, e.g. `/channels/123/messages`
    pub path: String,
    pub body: Option<Value>,
    /// Send `Authorization: Bot <token>`
    pub authenticated: bool,
    /// Route the call through a per-route bucket
    pub rate_limited: bool,
}

impl ApiRequest {
    /// Create an authenticated, rate-limited request without a body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authenticated: true,
            rate_limited: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set the JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Do not send the `Authorization` header
    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Bypass per-route buckets (the global lock still applies)
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.rate_limited = false;
        self
    }

    /// Get the bucket key, or `None` for unlimited requests
    #[must_use]
    pub fn route_key(&self) -> Option<String> {
        self.rate_limited.then(|| route_key(&self.method, &self.path))
    }
}
