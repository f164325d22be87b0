//! Attaching credentials to outgoing requests.
//!
//! Expired tokens are refreshed on the way out. Concurrent callers that need
//! a refresh at the same time share one in-flight refresh instead of each
//! hitting the token endpoint.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;

use crate::config::{ClientConfig, TokenPlacement};
use crate::error::OAuthError;
use crate::grant::Grant;
use crate::store::TokenStore;
use crate::token::Token;
use crate::transport::HttpExchange;

type SharedRefresh = Shared<BoxFuture<'static, Result<Token, OAuthError>>>;

#[derive(Default)]
struct RefreshSlot {
    next_id: u64,
    in_flight: Option<(u64, SharedRefresh)>,
}

/// Decides whether the stored token is usable, refreshes it when needed, and
/// attaches it to requests.
pub struct RequestAuthorizer {
    config: Arc<ClientConfig>,
    store: Arc<TokenStore>,
    exchange: Arc<dyn HttpExchange>,
    refresh: Mutex<RefreshSlot>,
}

impl fmt::Debug for RequestAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAuthorizer")
            .field("token_placement", &self.config.token_placement)
            .field("refreshing", &self.lock().in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestAuthorizer {
    pub fn new(
        config: Arc<ClientConfig>,
        store: Arc<TokenStore>,
        exchange: Arc<dyn HttpExchange>,
    ) -> Self {
        Self {
            config,
            store,
            exchange,
            refresh: Mutex::new(RefreshSlot::default()),
        }
    }

    /// Attach a usable access token to `request`.
    ///
    /// Fails with [`OAuthError::Unauthenticated`] when no token is stored,
    /// [`OAuthError::TokenExpired`] when the token is expired and cannot be
    /// refreshed, and [`OAuthError::RefreshFailed`] when a needed refresh
    /// fails. A stale token is never attached.
    pub async fn authorize(&self, request: reqwest::Request) -> Result<reqwest::Request, OAuthError> {
        let token = self.valid_token().await?;
        self.attach(request, &token)
    }

    /// The stored token, refreshed first if it is expired or about to be.
    pub async fn valid_token(&self) -> Result<Token, OAuthError> {
        let (generation, current) = self.store.snapshot();
        let token = current.ok_or(OAuthError::Unauthenticated)?;
        let now = Utc::now();
        if !self.needs_refresh(&token, now) {
            return Ok(token);
        }
        if !token.can_refresh() {
            if token.is_expired(now) {
                return Err(OAuthError::TokenExpired);
            }
            // Inside the margin but not yet expired.
            return Ok(token);
        }
        self.refresh_from(generation).await
    }

    /// Refresh now, even if the stored token still looks valid. Joins a
    /// refresh that is already running.
    pub async fn refresh_now(&self) -> Result<Token, OAuthError> {
        self.refresh_from(self.store.generation()).await
    }

    /// Authorize and execute `request`. When the resource server answers
    /// 401, force one refresh and retry once; a second 401 is returned as is.
    pub async fn send(
        &self,
        client: &reqwest::Client,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, OAuthError> {
        let retry = request.try_clone();
        let token = self.valid_token().await?;
        let generation = self.store.generation();
        let resp = client.execute(self.attach(request, &token)?).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let Some(retry) = retry else {
            tracing::debug!("request body cannot be replayed; not retrying after 401");
            return Ok(resp);
        };
        let token = match self.refresh_from(generation).await {
            Ok(token) => token,
            Err(OAuthError::TokenExpired) => return Ok(resp),
            Err(err) => return Err(err),
        };
        tracing::debug!("retrying request after 401 with refreshed token");
        Ok(client.execute(self.attach(retry, &token)?).await?)
    }

    /// Place `token` on `request` according to the configured placement.
    pub fn attach(
        &self,
        mut request: reqwest::Request,
        token: &Token,
    ) -> Result<reqwest::Request, OAuthError> {
        match &self.config.token_placement {
            TokenPlacement::AuthorizationHeader => {
                let raw = if token.is_bearer() {
                    format!("Bearer {}", token.access_token)
                } else {
                    format!("{} {}", token.token_type, token.access_token)
                };
                request.headers_mut().insert(AUTHORIZATION, header_value(&raw)?);
            }
            TokenPlacement::Header { name } => {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                    OAuthError::Configuration(format!("invalid token header name {name:?}: {err}"))
                })?;
                request
                    .headers_mut()
                    .insert(name, header_value(&token.access_token)?);
            }
            TokenPlacement::QueryParameter { name } => {
                let url = request.url_mut();
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .into_owned()
                    .filter(|(key, _)| key != name)
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(name, &token.access_token);
            }
        }
        Ok(request)
    }

    fn needs_refresh(&self, token: &Token, now: DateTime<Utc>) -> bool {
        let margin =
            chrono::Duration::from_std(self.config.refresh_margin).unwrap_or(chrono::Duration::zero());
        token.expires_within(now, margin)
    }

    /// Join the in-flight refresh or start one based on the token stored at
    /// `observed`. If the store has moved on to a usable token since, that
    /// token is returned without a network call.
    async fn refresh_from(&self, observed: u64) -> Result<Token, OAuthError> {
        let (id, flight) = {
            let mut slot = self.lock();
            match slot.in_flight.clone() {
                Some(joined) => joined,
                None => {
                    let (generation, current) = self.store.snapshot();
                    let token = current.ok_or(OAuthError::Unauthenticated)?;
                    if generation != observed && !self.needs_refresh(&token, Utc::now()) {
                        return Ok(token);
                    }
                    if !token.can_refresh() {
                        return Err(OAuthError::TokenExpired);
                    }
                    slot.next_id += 1;
                    let id = slot.next_id;
                    let flight = run_refresh(
                        self.config.clone(),
                        self.store.clone(),
                        self.exchange.clone(),
                        generation,
                        token,
                    )
                    .boxed()
                    .shared();
                    slot.in_flight = Some((id, flight.clone()));
                    tracing::debug!(refresh = id, generation, "starting token refresh");
                    (id, flight)
                }
            }
        };

        let result = flight.await;
        let mut slot = self.lock();
        if slot
            .in_flight
            .as_ref()
            .is_some_and(|(current, _)| *current == id)
        {
            slot.in_flight = None;
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, RefreshSlot> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_refresh(
    config: Arc<ClientConfig>,
    store: Arc<TokenStore>,
    exchange: Arc<dyn HttpExchange>,
    generation: u64,
    previous: Token,
) -> Result<Token, OAuthError> {
    let refreshed = match request_refresh(&config, exchange.as_ref(), &previous).await {
        Ok(token) => token.inherit_from(&previous),
        Err(err) => {
            tracing::warn!(error = %err, "token refresh failed");
            return Err(OAuthError::RefreshFailed(err.to_string()));
        }
    };
    if store.replace_if(generation, refreshed.clone()) {
        tracing::debug!(generation, "access token refreshed");
        return Ok(refreshed);
    }
    // Logout or a new login landed while the refresh was on the wire.
    tracing::warn!(generation, "token changed during refresh; discarding refreshed token");
    store.current().ok_or(OAuthError::Unauthenticated)
}

async fn request_refresh(
    config: &ClientConfig,
    exchange: &dyn HttpExchange,
    previous: &Token,
) -> Result<Token, OAuthError> {
    let refresh_token = previous
        .refresh_token
        .clone()
        .ok_or(OAuthError::TokenExpired)?;
    let grant = Grant::RefreshToken { refresh_token };
    let request = grant.build_authorization_request(config)?;
    let call = grant.token_request(config, &request, None)?;
    let basic_auth = call
        .basic_auth
        .as_ref()
        .map(|(id, secret)| (id.as_str(), secret.as_str()));
    let resp = exchange.post_form(&call.url, &call.form, basic_auth).await?;
    grant.interpret_token_response(resp.status, &resp.body, Utc::now())
}

fn header_value(raw: &str) -> Result<HeaderValue, OAuthError> {
    let mut value = HeaderValue::from_str(raw).map_err(|err| {
        OAuthError::InvalidTokenResponse(format!("access token is not a valid header value: {err}"))
    })?;
    value.set_sensitive(true);
    Ok(value)
}
