//! # tether-rest
//!
//! Request layer for the REST surface. Every call is passed through the
//! requester's [`GlobalLock`](tether_core::GlobalLock) and the per-route
//! [`Bucket`](tether_core::Bucket), then classified:
//!
//! - 2xx: payload returned (`None` for an empty body)
//! - 429: absorbed, the request is re-submitted after `retry-after`
//! - 5xx: retried after a fixed delay, up to the configured ceiling
//! - other statuses and transport failures: surfaced as [`RequestError`]

pub mod endpoints;
mod error;
mod headers;
mod request;
mod requester;
mod route;
mod transport;

pub use endpoints::{BotGatewayInfo, GatewayInfo, SessionStartLimit};
pub use error::{RequestError, RequestResult};
pub use headers::RateLimitHeaders;
pub use request::ApiRequest;
pub use requester::Requester;
pub use reqwest::{header::HeaderMap, Method, StatusCode};
pub use route::route_key;
pub use transport::{HttpRequest, HttpTransport, RawResponse, ReqwestTransport};
