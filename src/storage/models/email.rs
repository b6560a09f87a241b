use chrono::{ DateTime, Utc };
use serde::Serialize;
use sqlx::{ FromRow, SqlitePool };
use tracing::warn;

/// Upper bound on search responses.
pub const SEARCH_RESULT_CAP: i64 = 1000;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailDocument {
    pub id: String,
    pub account_id: i64,
    pub account_login: String,
    #[serde(rename = "from")]
    pub from_addr: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body_html: String,
    pub body_text: String,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct UpsertReport {
    pub succeeded: usize,
    /// (document id, error) for entries the store rejected. Succeeded
    /// entries stay committed regardless.
    pub failed: Vec<(String, String)>,
}

/// Idempotent: creates the emails table, its full-text index and the
/// triggers keeping both in sync. Safe to call on every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emails (
            id TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL,
            account_login TEXT NOT NULL,
            from_addr TEXT NOT NULL,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            body_html TEXT NOT NULL,
            body_text TEXT NOT NULL,
            label TEXT NOT NULL
        )
    "#
    ).execute(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_date ON emails(date DESC)").execute(
        pool
    ).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_account ON emails(account_id)").execute(
        pool
    ).await?;

    // Full-text search over the fields the search endpoint matches on
    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS emails_fts USING fts5(
            from_addr,
            subject,
            body_text,
            label,
            content='emails',
            content_rowid='rowid'
        )
    "#
    ).execute(pool).await?;

    // Triggers to keep the FTS table in sync
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS emails_fts_insert AFTER INSERT ON emails BEGIN
            INSERT INTO emails_fts(rowid, from_addr, subject, body_text, label)
            VALUES (new.rowid, new.from_addr, new.subject, new.body_text, new.label);
        END
    "#
    ).execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS emails_fts_delete AFTER DELETE ON emails BEGIN
            INSERT INTO emails_fts(emails_fts, rowid, from_addr, subject, body_text, label)
            VALUES ('delete', old.rowid, old.from_addr, old.subject, old.body_text, old.label);
        END
    "#
    ).execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS emails_fts_update AFTER UPDATE ON emails BEGIN
            INSERT INTO emails_fts(emails_fts, rowid, from_addr, subject, body_text, label)
            VALUES ('delete', old.rowid, old.from_addr, old.subject, old.body_text, old.label);
            INSERT INTO emails_fts(rowid, from_addr, subject, body_text, label)
            VALUES (new.rowid, new.from_addr, new.subject, new.body_text, new.label);
        END
    "#
    ).execute(pool).await?;

    Ok(())
}

/// Writes are keyed by document id: re-submitting an id overwrites the
/// stored document instead of duplicating it. A rejected entry is
/// reported without rolling back the rest of the batch.
pub async fn upsert_batch(pool: &SqlitePool, docs: &[EmailDocument]) -> anyhow::Result<UpsertReport> {
    let mut report = UpsertReport::default();

    for doc in docs {
        let result = sqlx::query(
            r#"
            INSERT INTO emails
                (id, account_id, account_login, from_addr, subject, date, body_html, body_text, label)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                account_login = excluded.account_login,
                from_addr = excluded.from_addr,
                subject = excluded.subject,
                date = excluded.date,
                body_html = excluded.body_html,
                body_text = excluded.body_text,
                label = excluded.label
        "#
        )
            .bind(&doc.id)
            .bind(doc.account_id)
            .bind(&doc.account_login)
            .bind(&doc.from_addr)
            .bind(&doc.subject)
            .bind(doc.date)
            .bind(&doc.body_html)
            .bind(&doc.body_text)
            .bind(&doc.label)
            .execute(pool).await;

        match result {
            Ok(_) => {
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("Upsert failed for document {}: {}", doc.id, e);
                report.failed.push((doc.id.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Full-text search over from/subject/body_text/label. Terms are
/// prefix-expanded and OR-combined, so partial words still match. An
/// account filter is a hard AND, not a ranking factor. Results are
/// ordered newest first and capped.
pub async fn search(
    pool: &SqlitePool,
    query: &str,
    account_id: Option<i64>,
    limit: i64
) -> anyhow::Result<Vec<EmailDocument>> {
    let limit = limit.clamp(1, SEARCH_RESULT_CAP);
    let trimmed = query.trim();

    // The UI sends "*" (and "from:*") for "show everything"
    if trimmed.is_empty() || trimmed == "*" || trimmed == "from:*" {
        return match_all(pool, account_id, limit).await;
    }

    let match_expr = match fts_match_expression(trimmed) {
        Some(expr) => expr,
        None => {
            return Ok(Vec::new());
        }
    };

    let mut sql = String::from(
        "SELECT e.* FROM emails e JOIN emails_fts ON emails_fts.rowid = e.rowid \
         WHERE emails_fts MATCH ?"
    );
    if account_id.is_some() {
        sql.push_str(" AND e.account_id = ?");
    }
    sql.push_str(" ORDER BY e.date DESC LIMIT ?");

    let mut q = sqlx::query_as::<_, EmailDocument>(&sql).bind(match_expr);
    if let Some(id) = account_id {
        q = q.bind(id);
    }
    let docs = q.bind(limit).fetch_all(pool).await?;
    Ok(docs)
}

async fn match_all(
    pool: &SqlitePool,
    account_id: Option<i64>,
    limit: i64
) -> anyhow::Result<Vec<EmailDocument>> {
    let docs = match account_id {
        Some(id) =>
            sqlx
                ::query_as::<_, EmailDocument>(
                    "SELECT * FROM emails WHERE account_id = ? ORDER BY date DESC LIMIT ?"
                )
                .bind(id)
                .bind(limit)
                .fetch_all(pool).await?,
        None =>
            sqlx
                ::query_as::<_, EmailDocument>("SELECT * FROM emails ORDER BY date DESC LIMIT ?")
                .bind(limit)
                .fetch_all(pool).await?,
    };
    Ok(docs)
}

pub async fn count_all(pool: &SqlitePool) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM emails").fetch_one(pool).await?;
    Ok(count)
}

pub async fn newest(pool: &SqlitePool, limit: i64) -> anyhow::Result<Vec<EmailDocument>> {
    match_all(pool, None, limit.clamp(1, SEARCH_RESULT_CAP)).await
}

// FTS5 match string: each alphanumeric term quoted and prefix-expanded,
// OR-joined. Returns None when the query has no usable terms.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
