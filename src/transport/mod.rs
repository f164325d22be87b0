//! Collaborator seams: the network exchange with the authorization server and
//! the presenter that shows an authorization request to the user.

use async_trait::async_trait;
use url::Url;

use crate::error::OAuthError;
use crate::grant::{AuthorizationRequest, DeviceCodeSession};

/// Status and raw body of an authorization server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Form-encoded POSTs to the token and device authorization endpoints.
///
/// Implementations only move bytes; interpreting the body is the grant's
/// job. Transport failures map to [`OAuthError::Network`].
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn post_form(
        &self,
        url: &Url,
        form: &[(String, String)],
        basic_auth: Option<(&str, &str)>,
    ) -> Result<RawResponse, OAuthError>;
}

/// [`HttpExchange`] over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestExchange {
    client: reqwest::Client,
}

impl ReqwestExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn post_form(
        &self,
        url: &Url,
        form: &[(String, String)],
        basic_auth: Option<(&str, &str)>,
    ) -> Result<RawResponse, OAuthError> {
        let mut request = self
            .client
            .post(url.clone())
            .header("Accept", "application/json")
            .form(form);
        if let Some((client_id, client_secret)) = basic_auth {
            request = request.basic_auth(client_id, Some(client_secret));
        }
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        tracing::debug!(url = %url, status, "token endpoint responded");
        Ok(RawResponse { status, body })
    }
}

/// What the presenter did with an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationOutcome {
    /// The user completed the browser step; this is the redirect URL.
    Redirect(Url),
    /// The user abandoned the flow.
    Cancelled,
    /// The redirect will arrive later through `handle_redirect`.
    Deferred,
}

/// Shows authorization requests to the user.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Present a redirect-based request; `authorize_url` is the URL to open.
    async fn present(
        &self,
        request: &AuthorizationRequest,
        authorize_url: &Url,
    ) -> Result<PresentationOutcome, OAuthError>;

    /// Show the verification URL and user code of a device-code flow.
    async fn present_device_code(&self, session: &DeviceCodeSession) -> Result<(), OAuthError> {
        tracing::info!(
            verification_url = %session.verification_url,
            user_code = %session.user_code,
            "device authorization pending"
        );
        Ok(())
    }
}

/// Presenter for hosts that deliver the redirect themselves (custom URL
/// scheme handlers, local callback servers). Every request is deferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredPresenter;

#[async_trait]
impl Presenter for DeferredPresenter {
    async fn present(
        &self,
        _request: &AuthorizationRequest,
        authorize_url: &Url,
    ) -> Result<PresentationOutcome, OAuthError> {
        tracing::info!(url = %authorize_url, "authorization URL ready");
        Ok(PresentationOutcome::Deferred)
    }
}
