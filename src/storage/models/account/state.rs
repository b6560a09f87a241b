use chrono::{ DateTime, Utc };
use sqlx::FromRow;

// The secret is the mailbox password and has to be replayed verbatim to
// the remote IMAP server, so it is stored as-is. It is never serialized
// into API responses (see api::AccountView).
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub login: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
