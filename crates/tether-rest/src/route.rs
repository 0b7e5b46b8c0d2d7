//! Route keys
//!
//! Requests sharing a key share a bucket. Ids are templated out except for the
//! major parameter (the id right after `channels`, `guilds` or `webhooks`),
//! which the server limits independently.

use reqwest::Method;
use tether_core::Snowflake;

const MAJOR_PARAMETERS: &[&str] = &["channels", "guilds", "webhooks"];

/// Resolve the bucket key for a request
pub fn route_key(method: &Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();

    let mut previous: Option<&str> = None;
    let mut templated = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let part = match previous {
            Some(prev) if MAJOR_PARAMETERS.contains(&prev) => segment,
            Some("reactions") => ":reaction",
            _ if Snowflake::parse(segment).is_ok() => ":id",
            _ => segment,
        };
        templated.push(part);
        previous = Some(segment);
    }

    format!("{} /{}", method, templated.join("/"))
}
