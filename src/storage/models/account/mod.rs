pub mod state;
use state::Account;

use chrono::Utc;
use sqlx::SqlitePool;

pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            login TEXT NOT NULL UNIQUE,
            secret TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
    "#
    ).execute(pool).await?;
    Ok(())
}

pub async fn find_by_login(pool: &SqlitePool, login: &str) -> anyhow::Result<Option<Account>> {
    let query = "SELECT * FROM accounts WHERE login = ?";
    let account = sqlx::query_as::<_, Account>(query).bind(login).fetch_optional(pool).await?;
    Ok(account)
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<Account>> {
    let query = "SELECT * FROM accounts WHERE id = ?";
    let account = sqlx::query_as::<_, Account>(query).bind(id).fetch_optional(pool).await?;
    Ok(account)
}

pub async fn list_accounts(pool: &SqlitePool) -> anyhow::Result<Vec<Account>> {
    let query = "SELECT * FROM accounts ORDER BY id";
    let accounts = sqlx::query_as::<_, Account>(query).fetch_all(pool).await?;
    Ok(accounts)
}

/// Returns the existing account for `login`, creating it on first sight.
/// An existing record keeps its stored secret.
pub async fn find_or_create(
    pool: &SqlitePool,
    login: &str,
    secret: &str
) -> anyhow::Result<Account> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO accounts (login, secret, created_at, updated_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(login) DO NOTHING"
    )
        .bind(login)
        .bind(secret)
        .bind(now)
        .bind(now)
        .execute(pool).await?;

    let account = find_by_login(pool, login).await?;
    account.ok_or_else(|| anyhow::anyhow!("Account not found after insert: {}", login))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:").await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn find_or_create_reuses_existing_record() {
        let pool = test_pool().await;
        let first = find_or_create(&pool, "a@example.com", "pw1").await.unwrap();
        let second = find_or_create(&pool, "a@example.com", "pw2").await.unwrap();
        assert_eq!(first.id, second.id);
        // existing account keeps its original secret
        assert_eq!(second.secret, "pw1");
        assert_eq!(list_accounts(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_id_misses_unknown_account() {
        let pool = test_pool().await;
        assert!(find_by_id(&pool, 42).await.unwrap().is_none());
    }
}
