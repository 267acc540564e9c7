use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine as _;
use metrics_exporter_prometheus::PrometheusHandle;
use registrar::accounts::{AccountService, CredentialVerifier};
use registrar::blocking::run_blocking;
use registrar::config::DatabaseLocation;
use registrar::error::RegistrarError;
use registrar::storage::{RegistrarStore, RepositoryError, SqliteRegistrarStore};
use serde_json::json;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn open_store(
    location: &DatabaseLocation,
) -> Result<SqliteRegistrarStore, RepositoryError> {
    match location {
        DatabaseLocation::InMemory => {
            tracing::warn!("using an in-memory database; data is lost on exit");
            SqliteRegistrarStore::open_in_memory()
        }
        DatabaseLocation::File(path) => SqliteRegistrarStore::open(path),
    }
}

/// Salted bcrypt hashes in the usual `$2b$<cost>$...` form.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BcryptCredentialVerifier {
    cost: u32,
}

impl BcryptCredentialVerifier {
    pub(crate) fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptCredentialVerifier {
    fn default() -> Self {
        Self::with_cost(bcrypt::DEFAULT_COST)
    }
}

impl CredentialVerifier for BcryptCredentialVerifier {
    fn hash(&self, secret: &str) -> Result<String, RegistrarError> {
        bcrypt::hash(secret, self.cost)
            .map_err(|err| RegistrarError::Internal(format!("password hashing failed: {err}")))
    }

    fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        bcrypt::verify(secret, stored_hash).unwrap_or(false)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CredentialsError {
    UnsupportedScheme,
    Malformed,
}

/// `Authorization: Basic <base64 user:password>`. `Ok(None)` when the header is absent.
pub(crate) fn basic_credentials(
    headers: &HeaderMap,
) -> Result<Option<(String, String)>, CredentialsError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| CredentialsError::Malformed)?;
    let (kind, encoded) = value
        .split_once(' ')
        .ok_or(CredentialsError::Malformed)?;
    if !kind.eq_ignore_ascii_case("basic") {
        return Err(CredentialsError::UnsupportedScheme);
    }

    let decoded = b64
        .decode(encoded.trim())
        .map_err(|_| CredentialsError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| CredentialsError::Malformed)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(CredentialsError::Malformed)?;
    Ok(Some((username.to_string(), password.to_string())))
}

fn challenge(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"registrar\"")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Attach the caller's `AccessContext` to the request. Requests without credentials
/// continue anonymously and are refused by whichever operation needs a role.
pub(crate) async fn resolve_caller<R, V>(
    State(accounts): State<Arc<AccountService<R, V>>>,
    mut request: Request,
    next: Next,
) -> Response
where
    R: RegistrarStore + 'static,
    V: CredentialVerifier + 'static,
{
    let (username, password) = match basic_credentials(request.headers()) {
        Ok(None) => return next.run(request).await,
        Ok(Some(credentials)) => credentials,
        Err(CredentialsError::UnsupportedScheme) => {
            return challenge("only basic authentication is supported")
        }
        Err(CredentialsError::Malformed) => return challenge("malformed authorization header"),
    };

    match run_blocking(move || accounts.authenticate(&username, &password)).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(RegistrarError::Unauthorized(_)) => challenge("invalid username or password"),
        Err(error) => error.into_response(),
    }
}
