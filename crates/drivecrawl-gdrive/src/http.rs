//! Shared HTTP runtime and response handling for Google APIs.
//!
//! Uses async reqwest internally but presents a sync interface, since
//! crawl workers are plain threads.

use std::sync::LazyLock;
use std::time::Duration;

use drivecrawl_core::RemoteError;
use serde::Deserialize;
use serde::de::DeserializeOwned;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build HTTP client")
});

pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// Build a [`RemoteError`] from a failed response.
///
/// The message keeps the service text and appends the error reasons, so
/// rate-limit and backend failures are recognised as transient.
pub fn error_from_response(status: u16, body: &str, id: Option<&str>) -> RemoteError {
    if status == 404 {
        if let Some(id) = id {
            return RemoteError::NotFound { id: id.to_string() };
        }
    }
    if status == 401 {
        return RemoteError::Auth(format!("unauthorized: {}", body.trim()));
    }
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reasons: Vec<&str> = envelope
                .error
                .errors
                .iter()
                .map(|e| e.reason.as_str())
                .filter(|r| !r.is_empty())
                .collect();
            if reasons.is_empty() {
                envelope.error.message
            } else {
                format!("{} ({})", envelope.error.message, reasons.join(", "))
            }
        }
        Err(_) => body.trim().to_string(),
    };
    RemoteError::http(Some(status), message)
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    let status = e.status().map(|s| s.as_u16());
    // query strings carry ids and page tokens
    RemoteError::http(status, e.without_url().to_string())
}

/// Send `request` and decode a JSON response.
///
/// A 404 becomes [`RemoteError::NotFound`] for `id` when given.
pub fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    id: Option<&str>,
) -> Result<T, RemoteError> {
    SHARED_RUNTIME.handle().block_on(async {
        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), &body, id));
        }
        let bytes = resp.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    })
}
