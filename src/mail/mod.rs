pub mod imap;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub secret: String,
}

/// Lower bound for a fetch: everything after a known UID, or a bounded
/// historical window when no watermark exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSince {
    Uid(u32),
    Window {
        days: i64,
    },
}

/// A message as delivered by the transport. Consumed within one sync
/// cycle, never persisted directly.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub body_html: String,
}

#[derive(Debug, Default)]
pub struct FetchBatch {
    pub messages: Vec<RawMessage>,
}

impl FetchBatch {
    pub fn max_uid(&self) -> Option<u32> {
        self.messages
            .iter()
            .map(|m| m.uid)
            .max()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mailbox credentials rejected: {0}")] Auth(String),

    #[error("mail transport unavailable: {0}")] Connection(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Round-trip credential check, used by login/switch-account so bad
    /// mailbox credentials fail the request instead of the next poll.
    async fn check_credentials(&self, creds: &Credentials) -> Result<(), TransportError>;

    /// Fetch messages newer than `since` for the given mailbox.
    async fn fetch_since(
        &self,
        creds: &Credentials,
        since: FetchSince
    ) -> anyhow::Result<FetchBatch>;
}
