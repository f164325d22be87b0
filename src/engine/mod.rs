//! Authorization flow state machine.
//!
//! One [`AuthorizationEngine`] runs at most one flow at a time. Every flow is
//! tagged with an attempt number; results that come back after the flow was
//! cancelled or replaced are dropped instead of being applied.

mod state;

pub use state::{FlowState, StartOutcome};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

use crate::config::ClientConfig;
use crate::error::OAuthError;
use crate::grant::device_code::{parse_device_authorization, parse_device_poll};
use crate::grant::{
    AuthorizationRequest, DeviceCodePoll, DeviceCodeSession, Grant, GrantKind, Interaction,
    TokenRequest,
};
use crate::store::TokenStore;
use crate::token::Token;
use crate::transport::{HttpExchange, PresentationOutcome, Presenter, RawResponse};
use state::{Flow, PendingAuthorization};

/// What a validated callback carries.
enum Callback {
    Code(String),
    Fragment(String),
}

/// Drives authorization flows and writes their tokens into the shared
/// [`TokenStore`].
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use oauth2_engine::config::ClientConfig;
/// use oauth2_engine::engine::{AuthorizationEngine, StartOutcome};
/// use oauth2_engine::grant::Grant;
/// use oauth2_engine::store::TokenStore;
/// use oauth2_engine::transport::{DeferredPresenter, ReqwestExchange};
/// use url::Url;
///
/// # async fn run() -> Result<(), oauth2_engine::OAuthError> {
/// let config = ClientConfig::builder()
///     .client_id("my-app")
///     .token_url(Url::parse("https://auth.example.com/token")?)
///     .authorize_url(Url::parse("https://auth.example.com/authorize")?)
///     .redirect_uri(Url::parse("myapp://callback")?)
///     .build();
/// let engine = AuthorizationEngine::new(
///     Arc::new(config),
///     Arc::new(TokenStore::new()),
///     Arc::new(ReqwestExchange::new()),
///     Arc::new(DeferredPresenter),
/// );
/// if let StartOutcome::AwaitingRedirect(request) = engine.start(Grant::AuthorizationCode).await? {
///     println!("open {}", request.authorize_url());
/// }
/// # Ok(())
/// # }
/// ```
pub struct AuthorizationEngine {
    config: Arc<ClientConfig>,
    store: Arc<TokenStore>,
    exchange: Arc<dyn HttpExchange>,
    presenter: Arc<dyn Presenter>,
    flow: Mutex<Flow>,
    cancelled: Notify,
}

impl AuthorizationEngine {
    pub fn new(
        config: Arc<ClientConfig>,
        store: Arc<TokenStore>,
        exchange: Arc<dyn HttpExchange>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            config,
            store,
            exchange,
            presenter,
            flow: Mutex::new(Flow::default()),
            cancelled: Notify::new(),
        }
    }

    pub fn state(&self) -> FlowState {
        self.lock().state
    }

    /// Request of the flow currently awaiting its redirect.
    pub fn pending_request(&self) -> Option<AuthorizationRequest> {
        self.lock()
            .pending
            .as_ref()
            .map(|pending| pending.request.clone())
    }

    /// Start a flow for `grant`.
    ///
    /// Rejected with [`OAuthError::AlreadyInProgress`] while another flow is
    /// live. A pending redirect past its deadline no longer counts as live.
    pub async fn start(&self, grant: Grant) -> Result<StartOutcome, OAuthError> {
        let attempt = self.begin(&grant)?;
        let request = match grant.build_authorization_request(&self.config) {
            Ok(request) => request,
            Err(err) => return Err(self.fail(attempt, err)),
        };
        match grant.interaction() {
            Interaction::Direct => self
                .run_direct(attempt, &grant, &request)
                .await
                .map(StartOutcome::Authorized),
            Interaction::Redirect => self.run_redirect(attempt, grant, request).await,
            Interaction::DevicePoll => self
                .run_device(attempt, &grant, &request)
                .await
                .map(StartOutcome::Authorized),
        }
    }

    /// Resume a redirect flow with the callback URL the provider sent the
    /// user back to.
    pub async fn handle_redirect(&self, callback: &Url) -> Result<Token, OAuthError> {
        self.redirect(None, callback).await
    }

    /// Abandon the live flow, if any. Returns whether a flow was cancelled.
    pub fn cancel(&self) -> bool {
        {
            let mut flow = self.lock();
            if !flow.state.is_in_progress() {
                return false;
            }
            flow.attempt += 1;
            flow.pending = None;
            set_state(&mut flow, FlowState::Cancelled);
        }
        self.cancelled.notify_waiters();
        true
    }

    fn begin(&self, grant: &Grant) -> Result<u64, OAuthError> {
        let mut flow = self.lock();
        if flow.state.is_in_progress() {
            let expired = flow.state == FlowState::AwaitingRedirect
                && flow
                    .pending
                    .as_ref()
                    .is_some_and(PendingAuthorization::is_expired);
            if !expired {
                return Err(OAuthError::AlreadyInProgress);
            }
            tracing::debug!(attempt = flow.attempt, "discarding expired pending authorization");
        }
        flow.attempt += 1;
        flow.pending = None;
        tracing::debug!(attempt = flow.attempt, grant = %grant.kind(), "starting authorization");
        set_state(&mut flow, FlowState::Requesting);
        Ok(flow.attempt)
    }

    async fn run_direct(
        &self,
        attempt: u64,
        grant: &Grant,
        request: &AuthorizationRequest,
    ) -> Result<Token, OAuthError> {
        self.advance(attempt, FlowState::Exchanging)?;
        match self.exchange_token(grant, request, None).await {
            Ok(token) => self.complete(attempt, token),
            Err(err) => Err(self.fail(attempt, err)),
        }
    }

    async fn run_redirect(
        &self,
        attempt: u64,
        grant: Grant,
        request: AuthorizationRequest,
    ) -> Result<StartOutcome, OAuthError> {
        let authorize_url = request.authorize_url();
        {
            let mut flow = self.lock();
            if !flow.is_current(attempt) {
                return Err(OAuthError::Cancelled);
            }
            let now = Instant::now();
            let Some(deadline) = now.checked_add(self.config.authorization_timeout) else {
                drop(flow);
                return Err(self.fail(
                    attempt,
                    OAuthError::Configuration("authorization_timeout is out of range".to_string()),
                ));
            };
            flow.pending = Some(PendingAuthorization {
                grant,
                request: request.clone(),
                created_at: now,
                deadline,
            });
            set_state(&mut flow, FlowState::AwaitingRedirect);
        }
        let outcome = match self.presenter.present(&request, &authorize_url).await {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.fail(attempt, err)),
        };
        match outcome {
            PresentationOutcome::Deferred => Ok(StartOutcome::AwaitingRedirect(request)),
            PresentationOutcome::Cancelled => {
                tracing::debug!(attempt, "user cancelled authorization");
                Err(self.fail(attempt, OAuthError::Cancelled))
            }
            PresentationOutcome::Redirect(callback) => self
                .redirect(Some(attempt), &callback)
                .await
                .map(StartOutcome::Authorized),
        }
    }

    async fn redirect(&self, expected: Option<u64>, url: &Url) -> Result<Token, OAuthError> {
        let (attempt, grant, request, callback) = {
            let mut flow = self.lock();
            if expected.is_some_and(|attempt| !flow.is_current(attempt)) {
                return Err(OAuthError::Cancelled);
            }
            if flow.state != FlowState::AwaitingRedirect {
                return Err(OAuthError::InvalidState(format!(
                    "no authorization is awaiting a redirect (state: {})",
                    flow.state
                )));
            }
            let Some(pending) = flow.pending.take() else {
                return Err(OAuthError::InvalidState(
                    "pending authorization is missing".to_string(),
                ));
            };
            if pending.is_expired() {
                tracing::debug!(
                    attempt = flow.attempt,
                    waited_secs = pending.created_at.elapsed().as_secs(),
                    "pending authorization expired"
                );
                set_state(&mut flow, FlowState::Cancelled);
                return Err(OAuthError::AuthorizationExpired);
            }
            match validate_callback(&pending, url) {
                Ok(callback) => {
                    set_state(&mut flow, FlowState::Exchanging);
                    (flow.attempt, pending.grant, pending.request, callback)
                }
                Err(err) => {
                    tracing::debug!(attempt = flow.attempt, error = %err, "rejected redirect");
                    set_state(&mut flow, FlowState::Failed);
                    return Err(err);
                }
            }
        };
        let result = match callback {
            Callback::Code(code) => self.exchange_token(&grant, &request, Some(&code)).await,
            Callback::Fragment(fragment) => {
                grant.parse_token_response(fragment.as_bytes(), Utc::now())
            }
        };
        match result {
            Ok(token) => self.complete(attempt, token),
            Err(err) => Err(self.fail(attempt, err)),
        }
    }

    async fn run_device(
        &self,
        attempt: u64,
        grant: &Grant,
        request: &AuthorizationRequest,
    ) -> Result<Token, OAuthError> {
        let session = match self.request_device_code(grant, request).await {
            Ok(session) => session,
            Err(err) => return Err(self.fail(attempt, err)),
        };
        if let Err(err) = self.presenter.present_device_code(&session).await {
            return Err(self.fail(attempt, err));
        }
        self.advance(attempt, FlowState::Polling)?;

        let mut interval = session.interval;
        loop {
            // Registered before the state check so a cancel in between still wakes us.
            let cancelled = self.cancelled.notified();
            tokio::pin!(cancelled);
            cancelled.as_mut().enable();
            self.ensure_current(attempt)?;

            let wake = Instant::now()
                .checked_add(interval)
                .map_or(session.deadline(), |at| at.min(session.deadline()));
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = &mut cancelled => return Err(OAuthError::Cancelled),
            }
            if session.is_expired() {
                return Err(self.fail(attempt, OAuthError::AuthorizationExpired));
            }
            let polled = tokio::select! {
                polled = self.poll_device_once(grant, request, &session) => polled,
                _ = &mut cancelled => return Err(OAuthError::Cancelled),
            };
            self.ensure_current(attempt)?;
            match polled {
                Ok(DeviceCodePoll::Pending { .. }) => {
                    tracing::debug!(attempt, "device authorization pending");
                }
                Ok(DeviceCodePoll::SlowDown { interval: next }) => {
                    tracing::debug!(attempt, interval_secs = next.as_secs(), "device poll slowed down");
                    interval = next;
                }
                Ok(DeviceCodePoll::Authorized { token }) => return self.complete(attempt, token),
                Ok(DeviceCodePoll::AccessDenied) => {
                    return Err(self.fail(attempt, OAuthError::denied("access_denied", None)))
                }
                Ok(DeviceCodePoll::Expired) => {
                    return Err(self.fail(attempt, OAuthError::AuthorizationExpired))
                }
                Err(err) => return Err(self.fail(attempt, err)),
            }
        }
    }

    async fn request_device_code(
        &self,
        grant: &Grant,
        request: &AuthorizationRequest,
    ) -> Result<DeviceCodeSession, OAuthError> {
        let call = grant.device_authorization_request(&self.config, request)?;
        let resp = self.post(&call).await?;
        parse_device_authorization(resp.status, &resp.body, Utc::now())
    }

    async fn poll_device_once(
        &self,
        grant: &Grant,
        request: &AuthorizationRequest,
        session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, OAuthError> {
        let call = grant.token_request(&self.config, request, Some(&session.device_code))?;
        let resp = self.post(&call).await?;
        parse_device_poll(resp.status, &resp.body, session, Utc::now())
    }

    async fn exchange_token(
        &self,
        grant: &Grant,
        request: &AuthorizationRequest,
        code: Option<&str>,
    ) -> Result<Token, OAuthError> {
        let call = grant.token_request(&self.config, request, code)?;
        let resp = self.post(&call).await?;
        grant.interpret_token_response(resp.status, &resp.body, Utc::now())
    }

    async fn post(&self, call: &TokenRequest) -> Result<RawResponse, OAuthError> {
        let basic_auth = call
            .basic_auth
            .as_ref()
            .map(|(id, secret)| (id.as_str(), secret.as_str()));
        self.exchange.post_form(&call.url, &call.form, basic_auth).await
    }

    fn ensure_current(&self, attempt: u64) -> Result<(), OAuthError> {
        if self.lock().is_current(attempt) {
            Ok(())
        } else {
            Err(OAuthError::Cancelled)
        }
    }

    fn advance(&self, attempt: u64, to: FlowState) -> Result<(), OAuthError> {
        let mut flow = self.lock();
        if !flow.is_current(attempt) {
            return Err(OAuthError::Cancelled);
        }
        set_state(&mut flow, to);
        Ok(())
    }

    /// Store the token and finish the flow, unless the flow is gone.
    fn complete(&self, attempt: u64, token: Token) -> Result<Token, OAuthError> {
        let mut flow = self.lock();
        if !flow.is_current(attempt) {
            tracing::warn!(attempt, "dropping token from a cancelled authorization");
            return Err(OAuthError::Cancelled);
        }
        flow.pending = None;
        self.store.set(token.clone());
        set_state(&mut flow, FlowState::Authorized);
        Ok(token)
    }

    /// Record a failure for `attempt`; a superseded attempt reports
    /// `Cancelled` and leaves the current flow alone.
    fn fail(&self, attempt: u64, err: OAuthError) -> OAuthError {
        let mut flow = self.lock();
        if !flow.is_current(attempt) {
            tracing::warn!(attempt, error = %err, "dropping result of a cancelled authorization");
            return OAuthError::Cancelled;
        }
        flow.pending = None;
        let to = if err == OAuthError::Cancelled {
            FlowState::Cancelled
        } else {
            FlowState::Failed
        };
        set_state(&mut flow, to);
        err
    }

    fn lock(&self) -> MutexGuard<'_, Flow> {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn set_state(flow: &mut Flow, to: FlowState) {
    tracing::debug!(attempt = flow.attempt, from = %flow.state, to = %to, "flow transition");
    flow.state = to;
}

fn validate_callback(pending: &PendingAuthorization, url: &Url) -> Result<Callback, OAuthError> {
    let expected = pending.request.redirect_uri.as_ref().ok_or_else(|| {
        OAuthError::InvalidState("pending authorization has no redirect_uri".to_string())
    })?;
    if !same_endpoint(expected, url) {
        return Err(OAuthError::InvalidRedirect(format!(
            "callback does not match redirect_uri {expected}"
        )));
    }

    let implicit = pending.grant.kind() == GrantKind::Implicit;
    let fragment = url.fragment().unwrap_or_default();
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if implicit {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }

    // An error callback must echo our state before it is attributed to the provider.
    let expected_state = pending.request.state.as_deref().unwrap_or_default();
    match params.get("state") {
        Some(state) if state.as_bytes() == expected_state.as_bytes() => {}
        _ => return Err(OAuthError::StateMismatch),
    }
    if let Some(error) = params.get("error") {
        return Err(OAuthError::denied(
            error.clone(),
            params.get("error_description").cloned(),
        ));
    }

    if implicit {
        return Ok(Callback::Fragment(fragment.to_string()));
    }
    params
        .remove("code")
        .filter(|code| !code.is_empty())
        .map(Callback::Code)
        .ok_or_else(|| OAuthError::InvalidRedirect("callback carries no authorization code".to_string()))
}

/// Scheme, host, port and path must match; the query is ignored.
fn same_endpoint(expected: &Url, actual: &Url) -> bool {
    expected.scheme() == actual.scheme()
        && expected.host_str() == actual.host_str()
        && expected.port_or_known_default() == actual.port_or_known_default()
        && expected.path().trim_end_matches('/') == actual.path().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn endpoint_match_ignores_query_and_default_port() {
        assert!(same_endpoint(
            &url("https://app.example.com/cb"),
            &url("https://app.example.com:443/cb?code=x&state=y")
        ));
        assert!(same_endpoint(
            &url("myapp://callback"),
            &url("myapp://callback?code=x")
        ));
        assert!(!same_endpoint(
            &url("http://127.0.0.1:8765/cb"),
            &url("http://127.0.0.1:9999/cb")
        ));
        assert!(!same_endpoint(
            &url("https://app.example.com/cb"),
            &url("https://evil.example.com/cb")
        ));
    }
}
