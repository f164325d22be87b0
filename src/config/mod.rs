//! Client configuration, built in code or loaded from a TOML file or
//! `OAUTH2_*` environment variables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::error::OAuthError;

const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const MAX_DURATION_SETTING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How the client authenticates itself at the token endpoint.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `Authorization: Basic base64(client_id:client_secret)`.
    #[default]
    BasicHeader,
    /// `client_id` and `client_secret` as form fields.
    RequestBody,
}

/// Where the access token goes on an authorized request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenPlacement {
    /// `Authorization: <Type> <token>`.
    #[default]
    AuthorizationHeader,
    /// Raw token in a custom header.
    Header { name: String },
    /// Raw token as a query parameter.
    QueryParameter { name: String },
}

/// Configuration for one OAuth2 client against one provider.
///
/// # Example
/// ```
/// use oauth2_engine::config::ClientConfig;
/// use url::Url;
///
/// let config = ClientConfig::builder()
///     .client_id("my-app")
///     .token_url(Url::parse("https://auth.example.com/token").unwrap())
///     .authorize_url(Url::parse("https://auth.example.com/authorize").unwrap())
///     .redirect_uri(Url::parse("myapp://callback").unwrap())
///     .build();
/// assert!(config.is_public());
/// assert!(config.pkce_required());
/// ```
#[derive(Clone, Builder, Serialize, Deserialize)]
pub struct ClientConfig {
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub authorize_url: Option<Url>,
    pub token_url: Url,
    #[serde(default)]
    pub device_authorization_url: Option<Url>,
    #[serde(default)]
    pub redirect_uri: Option<Url>,
    #[builder(default)]
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Use PKCE for confidential clients too. Public clients always use it.
    #[builder(default)]
    #[serde(default)]
    pub use_pkce: bool,
    #[builder(default)]
    #[serde(default)]
    pub client_auth: ClientAuthMethod,
    #[builder(default)]
    #[serde(default)]
    pub token_placement: TokenPlacement,
    /// How long a pending redirect flow stays valid.
    #[builder(default = DEFAULT_AUTHORIZATION_TIMEOUT)]
    #[serde(default = "default_authorization_timeout", with = "duration_secs")]
    pub authorization_timeout: Duration,
    /// Tokens expiring within this margin are refreshed before use.
    #[builder(default = DEFAULT_REFRESH_MARGIN)]
    #[serde(default = "default_refresh_margin", with = "duration_secs")]
    pub refresh_margin: Duration,
    /// Extra query parameters appended to the authorize URL.
    #[builder(default)]
    #[serde(default)]
    pub authorize_params: BTreeMap<String, String>,
    /// Extra form fields sent with every token request.
    #[builder(default)]
    #[serde(default)]
    pub token_params: BTreeMap<String, String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authorize_url", &self.authorize_url.as_ref().map(Url::as_str))
            .field("token_url", &self.token_url.as_str())
            .field(
                "device_authorization_url",
                &self.device_authorization_url.as_ref().map(Url::as_str),
            )
            .field("redirect_uri", &self.redirect_uri.as_ref().map(Url::as_str))
            .field("scopes", &self.scopes)
            .field("use_pkce", &self.use_pkce)
            .field("client_auth", &self.client_auth)
            .field("token_placement", &self.token_placement)
            .field("authorization_timeout", &self.authorization_timeout)
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// A client without a secret cannot keep one and must use PKCE.
    pub fn is_public(&self) -> bool {
        self.client_secret
            .as_deref()
            .map_or(true, |secret| secret.is_empty())
    }

    pub fn pkce_required(&self) -> bool {
        self.is_public() || self.use_pkce
    }

    /// Reject configurations no grant can work with.
    pub fn validate(&self) -> Result<(), OAuthError> {
        if self.client_id.trim().is_empty() {
            return Err(OAuthError::Configuration(
                "client_id must not be empty".to_string(),
            ));
        }
        for (name, value) in [
            ("authorization_timeout", self.authorization_timeout),
            ("refresh_margin", self.refresh_margin),
        ] {
            if value > MAX_DURATION_SETTING {
                return Err(OAuthError::Configuration(format!(
                    "{name} must be at most {} seconds, got {}",
                    MAX_DURATION_SETTING.as_secs(),
                    value.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// Parse a TOML document.
    ///
    /// ```toml
    /// client_id = "my-app"
    /// token_url = "https://auth.example.com/token"
    /// scopes = ["read", "write"]
    /// refresh_margin = 30
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self, OAuthError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, OAuthError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load from `OAUTH2_*` environment variables (a `.env` file is honored).
    ///
    /// `OAUTH2_CLIENT_ID` and `OAUTH2_TOKEN_URL` are required; see
    /// [`ClientConfig::from_lookup`] for the full list.
    pub fn from_env() -> Result<Self, OAuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup using the `OAUTH2_*` names:
    /// `CLIENT_ID`, `CLIENT_SECRET`, `AUTHORIZE_URL`, `TOKEN_URL`,
    /// `DEVICE_AUTHORIZATION_URL`, `REDIRECT_URI`, `SCOPES` (space separated),
    /// `USE_PKCE`, `CLIENT_AUTH` (`basic_header` | `request_body`),
    /// `AUTHORIZATION_TIMEOUT_SECS`, `REFRESH_MARGIN_SECS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, OAuthError> {
        let var = |name: &str| {
            lookup(&format!("OAUTH2_{name}")).filter(|value| !value.trim().is_empty())
        };
        let url = |name: &str| -> Result<Option<Url>, OAuthError> {
            var(name).map(|raw| Url::parse(raw.trim())).transpose().map_err(|err| {
                OAuthError::Configuration(format!("OAUTH2_{name} is not a valid URL: {err}"))
            })
        };
        let secs = |name: &str, default: Duration| -> Result<Duration, OAuthError> {
            match var(name) {
                Some(raw) => raw.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    OAuthError::Configuration(format!("OAUTH2_{name} must be a number of seconds"))
                }),
                None => Ok(default),
            }
        };

        let client_id = var("CLIENT_ID")
            .ok_or_else(|| OAuthError::Configuration("OAUTH2_CLIENT_ID is not set".to_string()))?;
        let token_url = url("TOKEN_URL")?
            .ok_or_else(|| OAuthError::Configuration("OAUTH2_TOKEN_URL is not set".to_string()))?;
        let client_auth = match var("CLIENT_AUTH") {
            Some(raw) => raw.trim().parse::<ClientAuthMethod>().map_err(|_| {
                OAuthError::Configuration(format!("unknown OAUTH2_CLIENT_AUTH: {raw}"))
            })?,
            None => ClientAuthMethod::default(),
        };
        let use_pkce = var("USE_PKCE")
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            client_id,
            client_secret: var("CLIENT_SECRET"),
            authorize_url: url("AUTHORIZE_URL")?,
            token_url,
            device_authorization_url: url("DEVICE_AUTHORIZATION_URL")?,
            redirect_uri: url("REDIRECT_URI")?,
            scopes: var("SCOPES")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            use_pkce,
            client_auth,
            token_placement: TokenPlacement::default(),
            authorization_timeout: secs(
                "AUTHORIZATION_TIMEOUT_SECS",
                DEFAULT_AUTHORIZATION_TIMEOUT,
            )?,
            refresh_margin: secs("REFRESH_MARGIN_SECS", DEFAULT_REFRESH_MARGIN)?,
            authorize_params: BTreeMap::new(),
            token_params: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn default_authorization_timeout() -> Duration {
    DEFAULT_AUTHORIZATION_TIMEOUT
}

fn default_refresh_margin() -> Duration {
    DEFAULT_REFRESH_MARGIN
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
