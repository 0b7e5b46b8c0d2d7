//! Resume state kept across reconnects

use crate::protocol::{ReadyPayload, ResumePayload};

/// Session established by the last `READY`
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    id: Option<String>,
    resume_url: Option<String>,
}

impl Session {
    pub fn establish(&mut self, ready: ReadyPayload) {
        self.id = Some(ready.session_id);
        self.resume_url = ready.resume_gateway_url;
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.resume_url = None;
    }

    /// Host to dial next: the resume host while a session can be resumed
    pub fn dial_url<'a>(&'a self, base: &'a str, sequence: Option<u64>) -> &'a str {
        match (&self.id, &self.resume_url, sequence) {
            (Some(_), Some(url), Some(_)) => url,
            _ => base,
        }
    }

    /// Build a resume frame if both a session and a sequence are known
    pub fn resume(&self, token: &str, sequence: Option<u64>) -> Option<ResumePayload> {
        Some(ResumePayload {
            token: token.to_string(),
            session_id: self.id.clone()?,
            seq: sequence?,
        })
    }
}

/// Append the version and encoding query to a gateway host
pub(crate) fn connect_url(base: &str) -> String {
    format!(
        "{}/?v={}&encoding=json",
        base.trim_end_matches('/'),
        crate::protocol::GATEWAY_VERSION
    )
}
