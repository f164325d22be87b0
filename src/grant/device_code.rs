use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::Instant;

use super::response::{parse_json_fields, TokenFields};
use crate::error::OAuthError;
use crate::token::Token;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Device-code session details returned by the device authorization
/// endpoint (RFC 8628 §3.2).
///
/// `expires_at` is the wall-clock expiry shown to users; polling stops at
/// the monotonic [`deadline`](Self::deadline) derived from the same
/// `expires_in`.
#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub verification_url: String,
    pub verification_url_complete: Option<String>,
    pub user_code: String,
    pub device_code: String,
    pub interval: Duration,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
}

impl DeviceCodeSession {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Polling outcome for a device-code session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCodePoll {
    Pending { interval: Duration },
    SlowDown { interval: Duration },
    Authorized { token: Token },
    AccessDenied,
    Expired,
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_url")]
    verification_uri: String,
    #[serde(default, alias = "verification_url_complete")]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

/// Parse the device authorization response.
pub fn parse_device_authorization(
    status: u16,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<DeviceCodeSession, OAuthError> {
    if !(200..300).contains(&status) {
        return Err(super::response::error_from_status(status, body));
    }
    let payload: DeviceAuthorizationResponse = serde_json::from_slice(body).map_err(|err| {
        OAuthError::InvalidTokenResponse(format!("invalid device authorization response: {err}"))
    })?;
    if payload.expires_in == 0 {
        return Err(OAuthError::InvalidTokenResponse(
            "device code expires_in must be positive".to_string(),
        ));
    }
    let out_of_range = || {
        OAuthError::InvalidTokenResponse(format!(
            "device code expires_in out of range: {}",
            payload.expires_in
        ))
    };
    let expires_at = i64::try_from(payload.expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(out_of_range)?;
    let deadline = Instant::now()
        .checked_add(Duration::from_secs(payload.expires_in))
        .ok_or_else(out_of_range)?;
    Ok(DeviceCodeSession {
        verification_url: payload.verification_uri,
        verification_url_complete: payload.verification_uri_complete,
        user_code: payload.user_code,
        device_code: payload.device_code,
        interval: Duration::from_secs(payload.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS).max(1)),
        expires_at,
        deadline,
    })
}

/// Interpret one poll of the token endpoint.
///
/// Providers answer pending polls with 400 and an `error` body, so the body
/// decides the outcome and the status only matters when it carries nothing.
pub fn parse_device_poll(
    status: u16,
    body: &[u8],
    session: &DeviceCodeSession,
    issued_at: DateTime<Utc>,
) -> Result<DeviceCodePoll, OAuthError> {
    let fields: TokenFields = match parse_json_fields(body) {
        Ok(fields) => fields,
        Err(_) if !(200..300).contains(&status) => {
            return Err(OAuthError::InvalidTokenResponse(format!(
                "device token poll returned status {status}"
            )))
        }
        Err(err) => return Err(err),
    };
    if fields.has_access_token() && fields.error.is_none() {
        return Ok(DeviceCodePoll::Authorized {
            token: fields.into_token(issued_at)?,
        });
    }
    match fields.error.as_deref() {
        Some("authorization_pending") => Ok(DeviceCodePoll::Pending {
            interval: session.interval,
        }),
        Some("slow_down") => Ok(DeviceCodePoll::SlowDown {
            interval: session.interval.saturating_add(SLOW_DOWN_STEP),
        }),
        Some("expired_token") => Ok(DeviceCodePoll::Expired),
        Some("access_denied") => Ok(DeviceCodePoll::AccessDenied),
        Some(other) => Err(OAuthError::denied(other, fields.error_description.clone())),
        None => Err(OAuthError::InvalidTokenResponse(
            "device poll response missing token and error".to_string(),
        )),
    }
}
