//! Typed wrappers over [`Requester::request`](crate::Requester::request)

mod gateway;

pub use gateway::{BotGatewayInfo, GatewayInfo, SessionStartLimit};

use crate::error::{RequestError, RequestResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a response payload into `T`
fn decode<T: DeserializeOwned>(payload: Option<Value>) -> RequestResult<T> {
    let payload =
        payload.ok_or_else(|| RequestError::Unknown("expected a response body".to_string()))?;
    serde_json::from_value(payload)
        .map_err(|e| RequestError::Unknown(format!("unexpected response shape: {e}")))
}
