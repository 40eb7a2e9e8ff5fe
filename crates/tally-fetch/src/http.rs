//! Response classification shared by discovery and resource requests.
//!
//! Maps a raw status code onto the retry decision the client loop takes:
//! 429 waits for `Retry-After`, 401 triggers one forced re-auth, 5xx backs off,
//! anything else non-successful ends the request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;

/// Why a response was not accepted.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// 429. `retry_after` is `None` when the header is absent or unusable.
    RateLimited { retry_after: Option<Duration> },
    /// 401.
    Unauthorized,
    /// 5xx.
    Server { status: u16, message: String },
    /// Any other non-success status.
    Api { status: u16, message: String },
}

/// Return the response unchanged on success or `304 Not Modified`, otherwise
/// classify it.
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, Rejection> {
    let status = resp.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Rejection::RateLimited {
            retry_after: parse_retry_after(resp.headers(), Utc::now()),
        });
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(Rejection::Unauthorized);
    }
    let message = resp.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(Rejection::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(Rejection::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &reqwest::header::HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
