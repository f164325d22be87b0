//! Grant strategies.
//!
//! [`Grant`] is a closed set of OAuth2 grants. Each operation below is a
//! single `match` over the variants: building the authorization request,
//! building the token request, and interpreting the token response.

pub mod device_code;
pub mod pkce;
pub mod response;

pub use device_code::{DeviceCodePoll, DeviceCodeSession};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::config::{ClientAuthMethod, ClientConfig};
use crate::error::OAuthError;
use crate::token::Token;

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Payload-free tag of a [`Grant`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GrantKind {
    AuthorizationCode,
    Implicit,
    ClientCredentials,
    #[serde(rename = "password")]
    #[strum(serialize = "password")]
    ResourceOwnerPassword,
    RefreshToken,
    DeviceCode,
}

/// How a grant obtains the user's (or client's) consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Browser round trip ending in a redirect to the client.
    Redirect,
    /// User approves on another device while the client polls.
    DevicePoll,
    /// Straight to the token endpoint.
    Direct,
}

/// An OAuth2 grant, with the inputs it needs beyond [`ClientConfig`].
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    Implicit,
    ClientCredentials,
    ResourceOwnerPassword { username: String, password: String },
    RefreshToken { refresh_token: String },
    DeviceCode,
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceOwnerPassword { username, .. } => f
                .debug_struct("ResourceOwnerPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::RefreshToken { .. } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &"<redacted>")
                .finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// One authorization attempt's request, built fresh per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub endpoint: Url,
    pub client_id: String,
    pub redirect_uri: Option<Url>,
    pub scope: BTreeSet<String>,
    pub state: Option<String>,
    pub code_verifier: Option<String>,
    pub grant: GrantKind,
    pub extra_params: BTreeMap<String, String>,
}

impl AuthorizationRequest {
    /// Render the request as the URL handed to the presenter.
    ///
    /// Only meaningful for redirect grants; other grants get their endpoint
    /// with the client id and scope attached.
    pub fn authorize_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            match self.grant {
                GrantKind::AuthorizationCode => {
                    query.append_pair("response_type", "code");
                }
                GrantKind::Implicit => {
                    query.append_pair("response_type", "token");
                }
                _ => {}
            }
            query.append_pair("client_id", &self.client_id);
            if let Some(redirect_uri) = &self.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri.as_str());
            }
            if !self.scope.is_empty() {
                query.append_pair("scope", &join_scope(&self.scope));
            }
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
            if let Some(verifier) = &self.code_verifier {
                query.append_pair("code_challenge", &pkce::code_challenge(verifier));
                query.append_pair("code_challenge_method", pkce::CODE_CHALLENGE_METHOD);
            }
            for (key, value) in &self.extra_params {
                query.append_pair(key, value);
            }
        }
        url
    }
}

/// A token endpoint call, ready for the network collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub url: Url,
    pub form: Vec<(String, String)>,
    /// `(client_id, client_secret)` for HTTP Basic client authentication.
    pub basic_auth: Option<(String, String)>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.form.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("TokenRequest")
            .field("url", &self.url.as_str())
            .field("form_keys", &keys)
            .field("basic_auth", &self.basic_auth.as_ref().map(|(id, _)| id))
            .finish()
    }
}

impl TokenRequest {
    /// Value of a form field, mostly for assertions.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl Grant {
    pub fn kind(&self) -> GrantKind {
        match self {
            Self::AuthorizationCode => GrantKind::AuthorizationCode,
            Self::Implicit => GrantKind::Implicit,
            Self::ClientCredentials => GrantKind::ClientCredentials,
            Self::ResourceOwnerPassword { .. } => GrantKind::ResourceOwnerPassword,
            Self::RefreshToken { .. } => GrantKind::RefreshToken,
            Self::DeviceCode => GrantKind::DeviceCode,
        }
    }

    pub fn interaction(&self) -> Interaction {
        match self.kind() {
            GrantKind::AuthorizationCode | GrantKind::Implicit => Interaction::Redirect,
            GrantKind::DeviceCode => Interaction::DevicePoll,
            GrantKind::ClientCredentials
            | GrantKind::ResourceOwnerPassword
            | GrantKind::RefreshToken => Interaction::Direct,
        }
    }

    /// Build the request for one attempt, generating a fresh `state` (and
    /// PKCE verifier where the policy asks for one).
    pub fn build_authorization_request(
        &self,
        config: &ClientConfig,
    ) -> Result<AuthorizationRequest, OAuthError> {
        config.validate()?;
        let kind = self.kind();
        let base = |endpoint: Url| AuthorizationRequest {
            endpoint,
            client_id: config.client_id.clone(),
            redirect_uri: None,
            scope: config.scopes.clone(),
            state: None,
            code_verifier: None,
            grant: kind,
            extra_params: BTreeMap::new(),
        };
        match self {
            Self::AuthorizationCode | Self::Implicit => {
                let endpoint = config.authorize_url.clone().ok_or_else(|| {
                    OAuthError::Configuration(format!("authorize_url is required for {kind}"))
                })?;
                let redirect_uri = config.redirect_uri.clone().ok_or_else(|| {
                    OAuthError::Configuration(format!("redirect_uri is required for {kind}"))
                })?;
                let code_verifier = (kind == GrantKind::AuthorizationCode
                    && config.pkce_required())
                .then(pkce::generate_code_verifier);
                Ok(AuthorizationRequest {
                    redirect_uri: Some(redirect_uri),
                    state: Some(pkce::generate_state()),
                    code_verifier,
                    extra_params: config.authorize_params.clone(),
                    ..base(endpoint)
                })
            }
            Self::DeviceCode => {
                let endpoint = config.device_authorization_url.clone().ok_or_else(|| {
                    OAuthError::Configuration(
                        "device_authorization_url is required for device_code".to_string(),
                    )
                })?;
                Ok(base(endpoint))
            }
            Self::ClientCredentials => {
                if config.is_public() {
                    return Err(OAuthError::Configuration(
                        "client_credentials requires a client_secret".to_string(),
                    ));
                }
                Ok(base(config.token_url.clone()))
            }
            Self::ResourceOwnerPassword { .. } | Self::RefreshToken { .. } => {
                Ok(base(config.token_url.clone()))
            }
        }
    }

    /// Form fields for the device authorization endpoint.
    pub fn device_authorization_request(
        &self,
        config: &ClientConfig,
        request: &AuthorizationRequest,
    ) -> Result<TokenRequest, OAuthError> {
        if !matches!(self, Self::DeviceCode) {
            return Err(OAuthError::InvalidState(format!(
                "{} has no device authorization step",
                self.kind()
            )));
        }
        let mut form = Vec::new();
        if !request.scope.is_empty() {
            form.push(("scope".to_string(), join_scope(&request.scope)));
        }
        Ok(with_client_auth(config, request.endpoint.clone(), form))
    }

    /// Build the token endpoint call. `code` is the authorization code for
    /// the code grant and the device code for the device grant.
    pub fn token_request(
        &self,
        config: &ClientConfig,
        request: &AuthorizationRequest,
        code: Option<&str>,
    ) -> Result<TokenRequest, OAuthError> {
        let mut form: Vec<(String, String)> = Vec::new();
        let mut push = |key: &str, value: &str| form.push((key.to_string(), value.to_string()));
        let require_code = || {
            code.ok_or_else(|| {
                OAuthError::InvalidState(format!("{} token request needs a code", self.kind()))
            })
        };
        match self {
            Self::AuthorizationCode => {
                push("grant_type", "authorization_code");
                push("code", require_code()?);
                if let Some(redirect_uri) = &request.redirect_uri {
                    push("redirect_uri", redirect_uri.as_str());
                }
                if let Some(verifier) = &request.code_verifier {
                    push("code_verifier", verifier.as_str());
                }
            }
            Self::Implicit => {
                return Err(OAuthError::InvalidState(
                    "implicit grant has no token request".to_string(),
                ));
            }
            Self::ClientCredentials => {
                push("grant_type", "client_credentials");
                if !request.scope.is_empty() {
                    push("scope", join_scope(&request.scope).as_str());
                }
            }
            Self::ResourceOwnerPassword { username, password } => {
                push("grant_type", "password");
                push("username", username.as_str());
                push("password", password.as_str());
                if !request.scope.is_empty() {
                    push("scope", join_scope(&request.scope).as_str());
                }
            }
            Self::RefreshToken { refresh_token } => {
                push("grant_type", "refresh_token");
                push("refresh_token", refresh_token.as_str());
            }
            Self::DeviceCode => {
                push("grant_type", DEVICE_CODE_GRANT_TYPE);
                push("device_code", require_code()?);
            }
        }
        for (key, value) in &config.token_params {
            form.push((key.clone(), value.clone()));
        }
        Ok(with_client_auth(config, config.token_url.clone(), form))
    }

    /// Parse a successful token response body.
    pub fn parse_token_response(
        &self,
        raw_body: &[u8],
        issued_at: DateTime<Utc>,
    ) -> Result<Token, OAuthError> {
        match self {
            Self::Implicit => response::parse_fragment_token(raw_body, issued_at),
            _ => response::parse_json_token(raw_body, issued_at),
        }
    }

    /// Interpret a token endpoint response including its HTTP status.
    pub fn interpret_token_response(
        &self,
        status: u16,
        raw_body: &[u8],
        issued_at: DateTime<Utc>,
    ) -> Result<Token, OAuthError> {
        if !(200..300).contains(&status) {
            return Err(response::error_from_status(status, raw_body));
        }
        self.parse_token_response(raw_body, issued_at)
    }
}

fn with_client_auth(config: &ClientConfig, url: Url, mut form: Vec<(String, String)>) -> TokenRequest {
    let secret = config.client_secret.as_deref().filter(|s| !s.is_empty());
    let basic_auth = match (secret, config.client_auth) {
        (Some(secret), ClientAuthMethod::BasicHeader) => {
            Some((config.client_id.clone(), secret.to_string()))
        }
        (Some(secret), ClientAuthMethod::RequestBody) => {
            form.push(("client_id".to_string(), config.client_id.clone()));
            form.push(("client_secret".to_string(), secret.to_string()));
            None
        }
        (None, _) => {
            form.push(("client_id".to_string(), config.client_id.clone()));
            None
        }
    };
    TokenRequest {
        url,
        form,
        basic_auth,
    }
}

fn join_scope(scope: &BTreeSet<String>) -> String {
    scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .client_id("app")
            .token_url(Url::parse("https://auth.example.com/token").unwrap())
            .authorize_url(Url::parse("https://auth.example.com/authorize").unwrap())
            .device_authorization_url(Url::parse("https://auth.example.com/device").unwrap())
            .redirect_uri(Url::parse("http://127.0.0.1:8765/cb").unwrap())
            .scopes(BTreeSet::from(["read".to_string(), "write".to_string()]))
            .build()
    }

    fn confidential() -> ClientConfig {
        ClientConfig {
            client_secret: Some("s3cret".to_string()),
            ..config()
        }
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn grant_kind_parses_and_displays() {
        assert_eq!(GrantKind::ResourceOwnerPassword.to_string(), "password");
        assert_eq!(
            "client_credentials".parse::<GrantKind>().unwrap(),
            GrantKind::ClientCredentials
        );
        assert_eq!("device_code".parse::<GrantKind>().unwrap(), GrantKind::DeviceCode);
        assert!("bogus".parse::<GrantKind>().is_err());
    }

    #[test]
    fn interaction_per_variant() {
        assert_eq!(Grant::AuthorizationCode.interaction(), Interaction::Redirect);
        assert_eq!(Grant::Implicit.interaction(), Interaction::Redirect);
        assert_eq!(Grant::DeviceCode.interaction(), Interaction::DevicePoll);
        assert_eq!(Grant::ClientCredentials.interaction(), Interaction::Direct);
        assert_eq!(
            Grant::RefreshToken {
                refresh_token: "r".into()
            }
            .interaction(),
            Interaction::Direct
        );
    }

    #[test]
    fn public_authorization_code_request_uses_pkce() {
        let request = Grant::AuthorizationCode
            .build_authorization_request(&config())
            .unwrap();
        let verifier = request.code_verifier.clone().expect("pkce verifier");
        let params = query(&request.authorize_url());
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "app");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8765/cb");
        assert_eq!(params["scope"], "read write");
        assert_eq!(params["state"], request.state.clone().unwrap());
        assert_eq!(params["code_challenge"], pkce::code_challenge(&verifier));
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[test]
    fn confidential_client_skips_pkce_unless_enabled() {
        let request = Grant::AuthorizationCode
            .build_authorization_request(&confidential())
            .unwrap();
        assert!(request.code_verifier.is_none());
        assert!(!query(&request.authorize_url()).contains_key("code_challenge"));

        let opted_in = ClientConfig {
            use_pkce: true,
            ..confidential()
        };
        let request = Grant::AuthorizationCode
            .build_authorization_request(&opted_in)
            .unwrap();
        assert!(request.code_verifier.is_some());
    }

    #[test]
    fn each_attempt_gets_fresh_state_and_verifier() {
        let a = Grant::AuthorizationCode.build_authorization_request(&config()).unwrap();
        let b = Grant::AuthorizationCode.build_authorization_request(&config()).unwrap();
        assert_ne!(a.state, b.state);
        assert_ne!(a.code_verifier, b.code_verifier);
    }

    #[test]
    fn implicit_request_asks_for_token_without_pkce() {
        let request = Grant::Implicit.build_authorization_request(&config()).unwrap();
        assert!(request.code_verifier.is_none());
        let params = query(&request.authorize_url());
        assert_eq!(params["response_type"], "token");
        assert!(params.contains_key("state"));
    }

    #[test]
    fn authorize_params_are_appended() {
        let mut config = config();
        config
            .authorize_params
            .insert("prompt".to_string(), "consent".to_string());
        let request = Grant::AuthorizationCode.build_authorization_request(&config).unwrap();
        assert_eq!(query(&request.authorize_url())["prompt"], "consent");
    }

    #[test]
    fn redirect_grants_require_endpoints() {
        let mut config = config();
        config.redirect_uri = None;
        let err = Grant::AuthorizationCode
            .build_authorization_request(&config)
            .unwrap_err();
        assert!(err.to_string().contains("redirect_uri"));

        config.authorize_url = None;
        let err = Grant::Implicit.build_authorization_request(&config).unwrap_err();
        assert!(err.to_string().contains("authorize_url"));
    }

    #[test]
    fn client_credentials_omits_redirect_and_state() {
        let request = Grant::ClientCredentials
            .build_authorization_request(&confidential())
            .unwrap();
        assert!(request.redirect_uri.is_none());
        assert!(request.state.is_none());
        assert!(request.code_verifier.is_none());
        assert_eq!(request.endpoint.as_str(), "https://auth.example.com/token");
    }

    #[test]
    fn client_credentials_needs_secret() {
        let err = Grant::ClientCredentials
            .build_authorization_request(&config())
            .unwrap_err();
        assert!(matches!(err, OAuthError::Configuration(_)));
    }

    #[test]
    fn device_request_targets_device_endpoint() {
        let request = Grant::DeviceCode.build_authorization_request(&config()).unwrap();
        assert_eq!(request.endpoint.as_str(), "https://auth.example.com/device");
        assert!(request.state.is_none());
        let call = Grant::DeviceCode
            .device_authorization_request(&config(), &request)
            .unwrap();
        assert_eq!(call.param("scope"), Some("read write"));
        assert_eq!(call.param("client_id"), Some("app"));
    }

    #[test]
    fn code_exchange_form_for_public_client() {
        let request = Grant::AuthorizationCode
            .build_authorization_request(&config())
            .unwrap();
        let call = Grant::AuthorizationCode
            .token_request(&config(), &request, Some("the-code"))
            .unwrap();
        assert_eq!(call.url.as_str(), "https://auth.example.com/token");
        assert_eq!(call.param("grant_type"), Some("authorization_code"));
        assert_eq!(call.param("code"), Some("the-code"));
        assert_eq!(call.param("redirect_uri"), Some("http://127.0.0.1:8765/cb"));
        assert_eq!(call.param("code_verifier"), request.code_verifier.as_deref());
        assert_eq!(call.param("client_id"), Some("app"));
        assert!(call.basic_auth.is_none());
    }

    #[test]
    fn code_exchange_requires_code() {
        let request = Grant::AuthorizationCode
            .build_authorization_request(&config())
            .unwrap();
        let err = Grant::AuthorizationCode
            .token_request(&config(), &request, None)
            .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidState(_)));
    }

    #[test]
    fn client_auth_methods() {
        let request = Grant::ClientCredentials
            .build_authorization_request(&confidential())
            .unwrap();
        let call = Grant::ClientCredentials
            .token_request(&confidential(), &request, None)
            .unwrap();
        assert_eq!(
            call.basic_auth,
            Some(("app".to_string(), "s3cret".to_string()))
        );
        assert_eq!(call.param("client_secret"), None);
        assert_eq!(call.param("scope"), Some("read write"));

        let in_body = ClientConfig {
            client_auth: ClientAuthMethod::RequestBody,
            ..confidential()
        };
        let call = Grant::ClientCredentials
            .token_request(&in_body, &request, None)
            .unwrap();
        assert!(call.basic_auth.is_none());
        assert_eq!(call.param("client_id"), Some("app"));
        assert_eq!(call.param("client_secret"), Some("s3cret"));
    }

    #[test]
    fn password_and_refresh_forms() {
        let grant = Grant::ResourceOwnerPassword {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let request = grant.build_authorization_request(&config()).unwrap();
        let call = grant.token_request(&config(), &request, None).unwrap();
        assert_eq!(call.param("grant_type"), Some("password"));
        assert_eq!(call.param("username"), Some("alice"));
        assert_eq!(call.param("password"), Some("hunter2"));

        let grant = Grant::RefreshToken {
            refresh_token: "rt".to_string(),
        };
        let request = grant.build_authorization_request(&config()).unwrap();
        let call = grant.token_request(&config(), &request, None).unwrap();
        assert_eq!(call.param("grant_type"), Some("refresh_token"));
        assert_eq!(call.param("refresh_token"), Some("rt"));
        assert_eq!(call.param("scope"), None);
    }

    #[test]
    fn token_params_are_appended() {
        let mut config = confidential();
        config
            .token_params
            .insert("audience".to_string(), "api".to_string());
        let request = Grant::ClientCredentials.build_authorization_request(&config).unwrap();
        let call = Grant::ClientCredentials
            .token_request(&config, &request, None)
            .unwrap();
        assert_eq!(call.param("audience"), Some("api"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let grant = Grant::ResourceOwnerPassword {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{grant:?}").contains("hunter2"));
        let grant = Grant::RefreshToken {
            refresh_token: "rt-secret".to_string(),
        };
        assert!(!format!("{grant:?}").contains("rt-secret"));
        assert_eq!(format!("{:?}", Grant::DeviceCode), "device_code");
    }

    #[test]
    fn interpret_maps_error_status() {
        let err = Grant::ClientCredentials
            .interpret_token_response(401, br#"{"error":"invalid_client"}"#, Utc::now())
            .unwrap_err();
        assert_eq!(err, OAuthError::denied("invalid_client", None));
    }
}
