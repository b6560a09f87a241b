use axum::{
    routing::{ get, post },
    Router,
    extract::{ Query, State },
    http::StatusCode,
    Json,
};
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::mail::{ Credentials, TransportError };
use crate::runtime::Runtime;
use crate::storage::models::account::{ self, state::Account };
use crate::storage::models::email::{ self, EmailDocument, SEARCH_RESULT_CAP };
use crate::sync;

pub async fn run_api(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let config = &runtime.config;
    let bind_addr = config.get_value("api", "bind").unwrap_or("0.0.0.0").to_string();
    let port = config.get_value("api", "port").unwrap_or("8080").to_string();
    let addr = format!("{}:{}", bind_addr, port);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/switch-account", post(switch_account))
        .route("/accounts", get(list_accounts))
        .route("/search", get(search_emails))
        .route("/debug/emails-count", get(emails_count))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime);

    info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

type ErrorResponse = (StatusCode, Json<ApiError>);

fn bad_request(message: &str) -> ErrorResponse {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.to_string() }))
}

fn internal_error() -> ErrorResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: "internal error".to_string() }))
}

fn transport_error(e: TransportError) -> ErrorResponse {
    let status = match e {
        TransportError::Auth(_) => StatusCode::UNAUTHORIZED,
        TransportError::Connection(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ApiError { error: e.to_string() }))
}

// The account as exposed over the API: the secret never leaves the
// process.
#[derive(Serialize)]
struct AccountView {
    id: i64,
    login: String,
    created_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            login: account.login,
            created_at: account.created_at,
        }
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    login: String,
    secret: String,
}

#[derive(Serialize)]
struct AccountResponse {
    message: String,
    account: AccountView,
}

async fn login(
    State(runtime): State<Arc<Runtime>>,
    Json(req): Json<LoginRequest>
) -> Result<Json<AccountResponse>, ErrorResponse> {
    if req.login.trim().is_empty() || req.secret.is_empty() {
        return Err(bad_request("login and secret are required"));
    }

    // Bad mailbox credentials fail here, synchronously, instead of as a
    // background sync failure later
    let creds = Credentials { login: req.login.clone(), secret: req.secret.clone() };
    runtime.transport.check_credentials(&creds).await.map_err(transport_error)?;

    let db = runtime.db.get().ok_or_else(internal_error)?;
    let account = account
        ::find_or_create(db.pool(), &req.login, &req.secret).await
        .map_err(|_| internal_error())?;

    runtime.sync.set_active(account.clone()).await;
    sync::request_cycle(&runtime);

    Ok(
        Json(AccountResponse {
            message: format!("Active account set to {}", account.login),
            account: account.into(),
        })
    )
}

#[derive(Deserialize)]
struct SwitchAccountRequest {
    #[serde(rename = "accountId")]
    account_id: i64,
}

async fn switch_account(
    State(runtime): State<Arc<Runtime>>,
    Json(req): Json<SwitchAccountRequest>
) -> Result<Json<AccountResponse>, ErrorResponse> {
    let db = runtime.db.get().ok_or_else(internal_error)?;
    let account = account
        ::find_by_id(db.pool(), req.account_id).await
        .map_err(|_| internal_error())?
        .ok_or((StatusCode::NOT_FOUND, Json(ApiError { error: "Account not found".to_string() })))?;

    let creds = Credentials { login: account.login.clone(), secret: account.secret.clone() };
    runtime.transport.check_credentials(&creds).await.map_err(transport_error)?;

    runtime.sync.set_active(account.clone()).await;
    sync::request_cycle(&runtime);

    Ok(
        Json(AccountResponse {
            message: format!("Switched to {}", account.login),
            account: account.into(),
        })
    )
}

#[derive(Serialize)]
struct AccountsResponse {
    accounts: Vec<AccountView>,
}

async fn list_accounts(
    State(runtime): State<Arc<Runtime>>
) -> Result<Json<AccountsResponse>, ErrorResponse> {
    let db = runtime.db.get().ok_or_else(internal_error)?;
    let accounts = account
        ::list_accounts(db.pool()).await
        .map_err(|_| internal_error())?
        .into_iter()
        .map(AccountView::from)
        .collect();
    Ok(Json(AccountsResponse { accounts }))
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    account_id: Option<i64>,
}

#[derive(Serialize)]
struct EmailsResponse {
    emails: Vec<EmailDocument>,
}

async fn search_emails(
    State(runtime): State<Arc<Runtime>>,
    Query(params): Query<SearchParams>
) -> Result<Json<EmailsResponse>, ErrorResponse> {
    let query = match params.q {
        Some(q) if !q.trim().is_empty() => q,
        _ => {
            return Err(bad_request("Query missing"));
        }
    };

    let db = runtime.db.get().ok_or_else(internal_error)?;
    let emails = email
        ::search(db.pool(), &query, params.account_id, SEARCH_RESULT_CAP).await
        .map_err(|_| internal_error())?;
    Ok(Json(EmailsResponse { emails }))
}

#[derive(Serialize)]
struct EmailsCountResponse {
    total: i64,
    sample: Vec<EmailDocument>,
}

async fn emails_count(
    State(runtime): State<Arc<Runtime>>
) -> Result<Json<EmailsCountResponse>, ErrorResponse> {
    let db = runtime.db.get().ok_or_else(internal_error)?;
    let total = email::count_all(db.pool()).await.map_err(|_| internal_error())?;
    let sample = email::newest(db.pool(), 5).await.map_err(|_| internal_error())?;
    Ok(Json(EmailsCountResponse { total, sample }))
}
