//! Events surfaced to the caller

use crate::error::GatewayError;
use serde_json::Value;

/// A dispatch frame as received: name, sequence and raw payload
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub name: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

/// Event emitted by one shard onto the merged stream
#[derive(Debug, Clone, PartialEq)]
pub struct ShardEvent {
    pub shard_id: u32,
    pub kind: ShardEventKind,
}

/// Every shard ends its stream with exactly one `Fatal` or `Stopped`
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEventKind {
    Dispatch(DispatchEvent),
    /// The shard closed for good with a non-recoverable close code
    Fatal(GatewayError),
    /// The shard was stopped by its owner
    Stopped,
}

impl ShardEvent {
    /// Get the dispatch carried by this event, if any
    #[must_use]
    pub fn as_dispatch(&self) -> Option<&DispatchEvent> {
        match &self.kind {
            ShardEventKind::Dispatch(event) => Some(event),
            _ => None,
        }
    }

    /// Check if this is the last event the shard will emit
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ShardEventKind::Fatal(_) | ShardEventKind::Stopped)
    }
}
