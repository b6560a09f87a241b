use anyhow::{ Context, Result };
use async_imap::types::Fetch;
use async_imap::{ Client, Session };
use async_native_tls::{ TlsConnector, TlsStream };
use async_trait::async_trait;
use chrono::{ Duration, Utc };
use futures::{ AsyncRead, AsyncWrite, TryStreamExt };
use mail_parser::MessageParser;
use tokio::net::TcpStream;
use tokio_util::compat::{ Compat, TokioAsyncReadCompatExt };
use tracing::{ debug, info, warn };

use super::{ Credentials, FetchBatch, FetchSince, MailTransport, RawMessage, TransportError };
use crate::utils::config::Config;

const MAILBOX: &str = "INBOX";

/// IMAP-backed mail transport. One connection per operation: connect,
/// login, fetch, logout. The sync engine drives it infrequently enough
/// that holding sessions open buys nothing.
pub struct ImapTransport {
    host: String,
    port: u16,
    tls: bool,
}

impl ImapTransport {
    pub fn from_config(config: &Config) -> Self {
        if !config.is_section_exists("imap") {
            warn!("No [imap] section in config, using transport defaults");
        }
        Self {
            host: config.get_value("imap", "host").unwrap_or("imap.gmail.com").to_string(),
            port: config.get_int("imap", "port", 993) as u16,
            tls: config.get_bool("imap", "tls", true),
        }
    }

    async fn connect(&self, creds: &Credentials) -> Result<ImapSessionKind, TransportError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await.map_err(|e|
            TransportError::Connection(format!("TCP connect to {}:{} failed: {}", self.host, self.port, e))
        )?;

        if self.tls {
            let connector = TlsConnector::new();
            let stream = connector
                .connect(&self.host, tcp.compat()).await
                .map_err(|e| TransportError::Connection(format!("TLS handshake failed: {}", e)))?;
            let client = Client::new(stream);
            let session = client
                .login(&creds.login, &creds.secret).await
                .map_err(|(e, _)| TransportError::Auth(e.to_string()))?;
            Ok(ImapSessionKind::Tls(session))
        } else {
            let client = Client::new(tcp.compat());
            let session = client
                .login(&creds.login, &creds.secret).await
                .map_err(|(e, _)| TransportError::Auth(e.to_string()))?;
            Ok(ImapSessionKind::Plain(session))
        }
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn check_credentials(&self, creds: &Credentials) -> Result<(), TransportError> {
        let mut session = self.connect(creds).await?;
        session.logout().await;
        Ok(())
    }

    async fn fetch_since(&self, creds: &Credentials, since: FetchSince) -> Result<FetchBatch> {
        let mut session = self.connect(creds).await?;
        info!("Connected to IMAP as {}", creds.login);

        let fetched = session.fetch(since).await;
        session.logout().await;

        let messages = fetched?;
        debug!("Fetched {} messages for {}", messages.len(), creds.login);
        Ok(FetchBatch { messages })
    }
}

// An IMAP session is generic over the stream type; the TLS and plain
// variants only differ there.
enum ImapSessionKind {
    Tls(Session<TlsStream<Compat<TcpStream>>>),
    Plain(Session<Compat<TcpStream>>),
}

impl ImapSessionKind {
    async fn fetch(&mut self, since: FetchSince) -> Result<Vec<RawMessage>> {
        match self {
            Self::Tls(session) => fetch_messages(session, since).await,
            Self::Plain(session) => fetch_messages(session, since).await,
        }
    }

    async fn logout(&mut self) {
        let result = match self {
            Self::Tls(session) => session.logout().await,
            Self::Plain(session) => session.logout().await,
        };
        if let Err(e) = result {
            debug!("IMAP logout failed: {}", e);
        }
    }
}

async fn fetch_messages<S>(session: &mut Session<S>, since: FetchSince) -> Result<Vec<RawMessage>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug
{
    session.select(MAILBOX).await.context("SELECT INBOX failed")?;

    let query = match since {
        FetchSince::Uid(last) => format!("UID {}:*", last + 1),
        FetchSince::Window { days } => {
            let cutoff = Utc::now() - Duration::days(days.max(1));
            format!("SINCE {}", cutoff.format("%d-%b-%Y"))
        }
    };

    let uid_set = session.uid_search(&query).await.context("UID SEARCH failed")?;

    // "UID n:*" always returns the last message when n exceeds the
    // mailbox's highest UID, so filter on the watermark again.
    let uids: Vec<u32> = uid_set
        .into_iter()
        .filter(|&uid| {
            match since {
                FetchSince::Uid(last) => uid > last,
                FetchSince::Window { .. } => true,
            }
        })
        .collect();

    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let uid_list: String = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let fetches: Vec<Fetch> = session
        .uid_fetch(&uid_list, "(UID BODY.PEEK[])").await
        .context("UID FETCH failed")?
        .try_collect().await
        .context("FETCH stream failed")?;

    let parser = MessageParser::default();
    let mut messages = Vec::with_capacity(fetches.len());

    for fetch in &fetches {
        let uid = match fetch.uid {
            Some(uid) => uid,
            None => {
                continue;
            }
        };
        let body = match fetch.body() {
            Some(body) => body,
            None => {
                warn!("UID {} returned no body, skipping", uid);
                continue;
            }
        };
        match parser.parse(body) {
            Some(parsed) => messages.push(raw_from_parsed(uid, &parsed)),
            None => warn!("UID {} failed to parse, skipping", uid),
        }
    }

    Ok(messages)
}

fn raw_from_parsed(uid: u32, parsed: &mail_parser::Message<'_>) -> RawMessage {
    let from = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| {
            match (addr.name(), addr.address()) {
                (Some(name), Some(email)) => Some(format!("{} <{}>", name, email)),
                (None, Some(email)) => Some(email.to_string()),
                (Some(name), None) => Some(name.to_string()),
                (None, None) => None,
            }
        });

    let subject = parsed.subject().map(str::to_string);

    let date = parsed
        .date()
        .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0));

    // mail-parser synthesizes an HTML rendition for text-only messages,
    // so this is populated for either body kind.
    let body_html = parsed
        .body_html(0)
        .map(|c| c.into_owned())
        .unwrap_or_default();

    RawMessage {
        uid,
        from,
        subject,
        date,
        body_html,
    }
}
