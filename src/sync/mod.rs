pub mod classify;
pub mod normalize;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ Context, Result };
use chrono::{ DateTime, Utc };
use sha2::{ Digest, Sha256 };
use tokio::sync::Mutex;
use tracing::{ debug, error, info, warn };

use crate::mail::{ Credentials, FetchSince };
use crate::runtime::Runtime;
use crate::storage::models::account::state::Account;
use crate::storage::models::email::{ self, EmailDocument };
use crate::sync::classify::Label;
use crate::sync::normalize::{ normalize, SanitizePolicy };

/// Snapshot of "who we are syncing for". Documents produced by a cycle
/// are tagged from this snapshot, never from live shared state, so a
/// switch during an in-flight cycle cannot relabel its output.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub account: Account,
    /// Highest UID already ingested; None means never synced (or just
    /// reset), which triggers the bounded historical backfill.
    pub cursor: Option<u32>,
    epoch: u64,
}

/// The sync state machine. The session is the only mutable shared
/// state; the cycle lock enforces at most one in-flight cycle, and a
/// tick arriving while one runs is dropped rather than queued.
pub struct SyncEngine {
    session: Mutex<Option<ActiveSession>>,
    cycle_lock: Mutex<()>,
    sanitize: SanitizePolicy,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            cycle_lock: Mutex::new(()),
            sanitize: SanitizePolicy::new(),
        }
    }

    /// Activate an account. Always resets the cursor, including for the
    /// already-active account (an idempotent re-set is allowed and just
    /// causes another bounded backfill).
    pub async fn set_active(&self, account: Account) {
        let mut session = self.session.lock().await;
        let epoch = session.as_ref().map_or(0, |s| s.epoch + 1);
        info!("Active account set to {}", account.login);
        *session = Some(ActiveSession { account, cursor: None, epoch });
    }

    pub async fn snapshot(&self) -> Option<ActiveSession> {
        self.session.lock().await.clone()
    }

    /// Run one sync cycle for the active account, if any. No-op when no
    /// account is active or when a cycle is already in flight.
    pub async fn tick(&self, rt: &Runtime) {
        let _guard = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sync cycle already in flight, skipping tick");
                return;
            }
        };

        let snapshot = self.session.lock().await.clone();
        let session = match snapshot {
            Some(session) => session,
            None => {
                return;
            }
        };

        match self.run_cycle(rt, &session).await {
            Ok(Some(max_uid)) => self.advance_cursor(session.epoch, max_uid).await,
            Ok(None) => {}
            Err(e) => error!("Sync cycle failed for {}: {:#}", session.account.login, e),
        }
    }

    // Cursor write-back happens only when the session that started the
    // cycle is still the active one; a switch mid-flight wins.
    async fn advance_cursor(&self, epoch: u64, max_uid: u32) {
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(s) if s.epoch == epoch => {
                s.cursor = Some(s.cursor.map_or(max_uid, |c| c.max(max_uid)));
            }
            _ => debug!("Active session changed during cycle, dropping cursor update"),
        }
    }

    /// One fetch -> normalize -> classify -> upsert pass. Returns the
    /// highest UID observed, or None when the fetch came back empty (in
    /// which case the store is never contacted). Any error leaves the
    /// cursor untouched; the next tick retries from the same watermark.
    async fn run_cycle(&self, rt: &Runtime, session: &ActiveSession) -> Result<Option<u32>> {
        let account = &session.account;
        info!("Polling mailbox for {}", account.login);

        let backfill_days = rt.config.get_int("sync", "backfill_days", 30);
        let fetch_timeout = Duration::from_secs(
            rt.config.get_int("sync", "fetch_timeout_secs", 60).max(1) as u64
        );
        let upsert_timeout = Duration::from_secs(
            rt.config.get_int("sync", "upsert_timeout_secs", 30).max(1) as u64
        );

        let since = match session.cursor {
            Some(uid) => FetchSince::Uid(uid),
            None => FetchSince::Window { days: backfill_days },
        };
        let creds = Credentials {
            login: account.login.clone(),
            secret: account.secret.clone(),
        };

        let batch = tokio::time
            ::timeout(fetch_timeout, rt.transport.fetch_since(&creds, since)).await
            .context("mailbox fetch timed out")??;

        if batch.messages.is_empty() {
            debug!("No new messages for {}", account.login);
            return Ok(None);
        }

        let classifier = rt.classifier();
        if classifier.is_none() {
            warn!("Classifier not ready, labeling batch as {}", Label::Unclassified.as_str());
        }

        let max_uid = batch.max_uid();
        let mut docs = Vec::with_capacity(batch.messages.len());
        for raw in &batch.messages {
            let normalized = normalize(&self.sanitize, raw);
            let label = classifier
                .as_ref()
                .and_then(|c| c.classify(&format!("{} {}", normalized.subject, normalized.body_text)))
                .unwrap_or(Label::Unclassified);
            let id = document_id(&normalized.subject, &normalized.date, &account.login);
            docs.push(EmailDocument {
                id,
                account_id: account.id,
                account_login: account.login.clone(),
                from_addr: normalized.from,
                subject: normalized.subject,
                date: normalized.date,
                body_html: normalized.body_html,
                body_text: normalized.body_text,
                label: label.as_str().to_string(),
            });
        }

        let db = rt.db.get().context("database not initialized")?;
        let report = tokio::time
            ::timeout(upsert_timeout, email::upsert_batch(db.pool(), &docs)).await
            .context("document upsert timed out")??;

        if report.failed.is_empty() {
            info!("Indexed {} emails for {}", report.succeeded, account.login);
        } else {
            // Rejected documents stay out until re-fetched; the cursor
            // still advances (retry needs them back inside the lookback
            // window or a cursor reset).
            warn!(
                "Indexed {} emails for {}, {} rejected by the store",
                report.succeeded,
                account.login,
                report.failed.len()
            );
        }

        Ok(max_uid)
    }
}

/// Stable document identity: the same underlying message hashes to the
/// same id on every re-fetch, which is what makes the bulk upsert
/// idempotent.
pub fn document_id(subject: &str, date: &DateTime<Utc>, account_login: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(date.to_rfc3339().as_bytes());
    hasher.update(account_login.as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// Kick off an immediate cycle without waiting for the next timer tick.
/// Shares the single-slot semantics of `tick`: dropped if a cycle is
/// already running.
pub fn request_cycle(rt: &Arc<Runtime>) {
    let rt = Arc::clone(rt);
    tokio::spawn(async move {
        rt.sync.tick(&rt).await;
    });
}

/// Periodic driver: one tick per poll interval for as long as the
/// process lives.
pub async fn run_sync_worker(rt: Arc<Runtime>) {
    let poll_interval = rt.config.get_int("sync", "poll_interval_secs", 60).max(1) as u64;
    info!("Sync worker started interval={}s", poll_interval);

    loop {
        tokio::time::sleep(Duration::from_secs(poll_interval)).await;
        rt.sync.tick(&rt).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{ FetchBatch, MailTransport, RawMessage, TransportError };
    use crate::storage::db::{ Database, DatabaseConfig };
    use crate::utils::config::Config;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedTransport {
        batches: StdMutex<VecDeque<anyhow::Result<FetchBatch>>>,
        calls: StdMutex<Vec<FetchSince>>,
    }

    impl ScriptedTransport {
        fn new(batches: Vec<anyhow::Result<FetchBatch>>) -> Self {
            Self {
                batches: StdMutex::new(batches.into_iter().collect()),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<FetchSince> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn check_credentials(&self, _creds: &Credentials) -> Result<(), TransportError> {
            Ok(())
        }

        async fn fetch_since(
            &self,
            _creds: &Credentials,
            since: FetchSince
        ) -> anyhow::Result<FetchBatch> {
            self.calls.lock().unwrap().push(since);
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FetchBatch::default()))
        }
    }

    fn message(uid: u32, subject: &str) -> RawMessage {
        RawMessage {
            uid,
            from: Some("Alice <alice@example.com>".to_string()),
            subject: Some(subject.to_string()),
            date: Some(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() +
                    chrono::Duration::seconds(uid as i64)
            ),
            body_html: format!("<p>body of {}</p>", subject),
        }
    }

    fn batch(uids: &[u32]) -> FetchBatch {
        FetchBatch {
            messages: uids
                .iter()
                .map(|&uid| message(uid, &format!("message {}", uid)))
                .collect(),
        }
    }

    fn account(id: i64, login: &str) -> Account {
        Account {
            id,
            login: login.to_string(),
            secret: "pw".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn test_runtime(transport: Arc<dyn MailTransport>) -> Arc<Runtime> {
        let runtime = Arc::new(Runtime::new(Arc::new(Config::new()), transport));
        let db = Database::new(DatabaseConfig {
            path: ":memory:".to_string(),
            pool_size: None,
            connect_timeout: None,
        }).await.unwrap();
        email::ensure_schema(db.pool()).await.unwrap();
        assert!(runtime.db.set(db).is_ok());
        runtime
    }

    async fn doc_count(rt: &Runtime) -> i64 {
        email::count_all(rt.db.get().unwrap().pool()).await.unwrap()
    }

    #[tokio::test]
    async fn first_cycle_backfills_and_advances_cursor() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(batch(&[5, 6, 7]))]));
        let rt = test_runtime(transport.clone()).await;

        rt.sync.set_active(account(1, "a@example.com")).await;
        rt.sync.tick(&rt).await;

        assert_eq!(doc_count(&rt).await, 3);
        assert_eq!(rt.sync.snapshot().await.unwrap().cursor, Some(7));
        assert_eq!(transport.calls(), vec![FetchSince::Window { days: 30 }]);
    }

    #[tokio::test]
    async fn empty_cycle_leaves_cursor_and_store_untouched() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![Ok(batch(&[5, 6, 7])), Ok(FetchBatch::default())])
        );
        let rt = test_runtime(transport.clone()).await;

        rt.sync.set_active(account(1, "a@example.com")).await;
        rt.sync.tick(&rt).await;
        rt.sync.tick(&rt).await;

        assert_eq!(doc_count(&rt).await, 3);
        assert_eq!(rt.sync.snapshot().await.unwrap().cursor, Some(7));
        assert_eq!(
            transport.calls(),
            vec![FetchSince::Window { days: 30 }, FetchSince::Uid(7)]
        );
    }

    #[tokio::test]
    async fn failed_fetch_keeps_cursor_for_retry() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![Ok(batch(&[5, 6, 7])), Err(anyhow::anyhow!("imap down"))])
        );
        let rt = test_runtime(transport.clone()).await;

        rt.sync.set_active(account(1, "a@example.com")).await;
        rt.sync.tick(&rt).await;
        rt.sync.tick(&rt).await;

        // cursor never regresses on failure; next tick retries from 7
        assert_eq!(rt.sync.snapshot().await.unwrap().cursor, Some(7));
        rt.sync.tick(&rt).await;
        assert_eq!(transport.calls().last(), Some(&FetchSince::Uid(7)));
    }

    #[tokio::test]
    async fn switching_accounts_resets_cursor() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(batch(&[5, 6, 7]))]));
        let rt = test_runtime(transport.clone()).await;

        rt.sync.set_active(account(1, "a@example.com")).await;
        rt.sync.tick(&rt).await;
        assert_eq!(rt.sync.snapshot().await.unwrap().cursor, Some(7));

        rt.sync.set_active(account(2, "b@example.com")).await;
        let session = rt.sync.snapshot().await.unwrap();
        assert_eq!(session.account.id, 2);
        assert_eq!(session.cursor, None);

        // next cycle for b is a bounded backfill, not an unbounded fetch
        rt.sync.tick(&rt).await;
        assert_eq!(transport.calls().last(), Some(&FetchSince::Window { days: 30 }));
    }

    #[tokio::test]
    async fn reingesting_the_same_message_is_idempotent() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![Ok(batch(&[5])), Ok(batch(&[5]))])
        );
        let rt = test_runtime(transport.clone()).await;

        rt.sync.set_active(account(1, "a@example.com")).await;
        rt.sync.tick(&rt).await;
        rt.sync.tick(&rt).await;

        assert_eq!(doc_count(&rt).await, 1);
    }

    #[tokio::test]
    async fn tick_without_active_account_is_a_noop() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let rt = test_runtime(transport.clone()).await;

        rt.sync.tick(&rt).await;

        assert!(transport.calls().is_empty());
        assert_eq!(doc_count(&rt).await, 0);
    }

    #[tokio::test]
    async fn documents_are_tagged_with_the_session_account() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(batch(&[9]))]));
        let rt = test_runtime(transport.clone()).await;

        rt.sync.set_active(account(7, "tagged@example.com")).await;
        rt.sync.tick(&rt).await;

        let stored = email::newest(rt.db.get().unwrap().pool(), 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].account_id, 7);
        assert_eq!(stored[0].account_login, "tagged@example.com");
        assert_eq!(stored[0].label, Label::Unclassified.as_str());
    }

    #[test]
    fn document_id_is_stable_and_account_scoped() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let a = document_id("subject", &date, "a@example.com");
        let b = document_id("subject", &date, "a@example.com");
        let c = document_id("subject", &date, "b@example.com");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
