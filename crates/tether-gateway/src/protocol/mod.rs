//! Gateway protocol definitions
//!
//! Op codes, close codes, the JSON envelope and the payloads this client reads
//! or writes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload,
};

/// Gateway protocol version requested in the connection URL
pub const GATEWAY_VERSION: u8 = 10;
