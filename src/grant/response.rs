//! Token endpoint response parsing.
//!
//! Every grant except the implicit one receives a JSON body; the implicit
//! grant receives the same fields form-encoded in the redirect fragment.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::OAuthError;
use crate::token::Token;

/// Raw token fields before validation.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenFields {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<Value>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
}

impl TokenFields {
    pub(crate) fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    /// Provider-reported OAuth error, if the response carries one.
    pub(crate) fn oauth_error(&self) -> Option<OAuthError> {
        self.error
            .as_ref()
            .map(|error| OAuthError::denied(error.clone(), self.error_description.clone()))
    }

    pub(crate) fn into_token(self, issued_at: DateTime<Utc>) -> Result<Token, OAuthError> {
        if let Some(err) = self.oauth_error() {
            return Err(err);
        }
        let access_token = self
            .access_token
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing access_token"))?;
        let token_type = self
            .token_type
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| invalid("missing token_type"))?;
        let expires_at = match self.expires_in {
            None | Some(Value::Null) => None,
            Some(value) => {
                let secs = parse_expires_in(&value)?;
                let expires_at = Duration::try_seconds(secs)
                    .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
                    .ok_or_else(|| invalid(format!("expires_in out of range: {secs}")))?;
                Some(expires_at)
            }
        };
        Ok(Token {
            access_token,
            token_type,
            expires_at,
            refresh_token: self.refresh_token.filter(|value| !value.is_empty()),
            scope: self.scope.as_ref().and_then(parse_scope),
            id_token: self.id_token.filter(|value| !value.is_empty()),
        })
    }
}

/// Parse a JSON object body into its token fields.
pub(crate) fn parse_json_fields(body: &[u8]) -> Result<TokenFields, OAuthError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| invalid(format!("body is not valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(invalid("body is not a JSON object"));
    }
    serde_json::from_value(value).map_err(|err| invalid(err.to_string()))
}

/// JSON token response (authorization code, client credentials, password,
/// refresh and device-code grants).
pub fn parse_json_token(body: &[u8], issued_at: DateTime<Utc>) -> Result<Token, OAuthError> {
    parse_json_fields(body)?.into_token(issued_at)
}

/// Form-encoded token response carried in an implicit-grant redirect
/// fragment (without the leading `#`).
pub fn parse_fragment_token(fragment: &[u8], issued_at: DateTime<Utc>) -> Result<Token, OAuthError> {
    let pairs: HashMap<String, String> = url::form_urlencoded::parse(fragment)
        .into_owned()
        .collect();
    if pairs.is_empty() {
        return Err(invalid("empty fragment"));
    }
    let fields = TokenFields {
        access_token: pairs.get("access_token").cloned(),
        token_type: pairs.get("token_type").cloned(),
        expires_in: pairs.get("expires_in").cloned().map(Value::String),
        refresh_token: pairs.get("refresh_token").cloned(),
        scope: pairs.get("scope").cloned().map(Value::String),
        id_token: pairs.get("id_token").cloned(),
        error: pairs.get("error").cloned(),
        error_description: pairs.get("error_description").cloned(),
    };
    fields.into_token(issued_at)
}

/// Map a non-success token endpoint response to an error.
pub(crate) fn error_from_status(status: u16, body: &[u8]) -> OAuthError {
    match parse_json_fields(body).ok().and_then(|fields| fields.oauth_error()) {
        Some(err) => err,
        None => invalid(format!("token endpoint returned status {status}")),
    }
}

fn parse_expires_in(value: &Value) -> Result<i64, OAuthError> {
    let secs = match value {
        Value::Number(num) => num
            .as_i64()
            .or_else(|| {
                num.as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| invalid("expires_in out of range"))?,
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("expires_in is not a number: {text}")))?,
        _ => return Err(invalid("expires_in has an unexpected type")),
    };
    if secs <= 0 {
        return Err(invalid(format!("expires_in must be positive, got {secs}")));
    }
    Ok(secs)
}

fn parse_scope(value: &Value) -> Option<BTreeSet<String>> {
    let scopes: BTreeSet<String> = match value {
        Value::String(text) => text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    (!scopes.is_empty()).then_some(scopes)
}

fn invalid(message: impl Into<String>) -> OAuthError {
    OAuthError::InvalidTokenResponse(message.into())
}
