#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use oauth2_engine::config::ClientConfig;
use oauth2_engine::grant::{AuthorizationRequest, DeviceCodeSession};
use oauth2_engine::transport::{HttpExchange, PresentationOutcome, Presenter, RawResponse};
use oauth2_engine::{OAuthError, Token};
use serde_json::Value;
use tokio::sync::Semaphore;
use url::Url;

pub const TOKEN_URL: &str = "https://auth.example.com/token";
pub const AUTHORIZE_URL: &str = "https://auth.example.com/authorize";
pub const DEVICE_URL: &str = "https://auth.example.com/device";
pub const REDIRECT_URI: &str = "http://127.0.0.1:8765/callback";

pub fn public_config() -> ClientConfig {
    ClientConfig::builder()
        .client_id("test-app")
        .token_url(Url::parse(TOKEN_URL).expect("token url"))
        .authorize_url(Url::parse(AUTHORIZE_URL).expect("authorize url"))
        .device_authorization_url(Url::parse(DEVICE_URL).expect("device url"))
        .redirect_uri(Url::parse(REDIRECT_URI).expect("redirect uri"))
        .scopes(BTreeSet::from(["read".to_string()]))
        .build()
}

pub fn confidential_config() -> ClientConfig {
    ClientConfig {
        client_secret: Some("s3cret".to_string()),
        ..public_config()
    }
}

pub fn json(status: u16, body: Value) -> Result<RawResponse, OAuthError> {
    Ok(RawResponse::new(
        status,
        serde_json::to_vec(&body).expect("serialize body"),
    ))
}

pub fn token_body(access_token: &str, expires_in: i64, refresh_token: Option<&str>) -> Value {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = Value::String(refresh_token.to_string());
    }
    body
}

pub fn expiring_token(access_token: &str, expires_in_secs: i64, refresh_token: Option<&str>) -> Token {
    Token {
        expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        refresh_token: refresh_token.map(str::to_string),
        ..Token::bearer(access_token)
    }
}

/// Redirect back to the client carrying `params` in the query.
pub fn callback(params: &[(&str, &str)]) -> Url {
    let mut url = Url::parse(REDIRECT_URI).expect("redirect uri");
    url.query_pairs_mut().extend_pairs(params);
    url
}

/// Code callback for `request` with its own state.
pub fn code_callback(request: &AuthorizationRequest, code: &str) -> Url {
    let state = request.state.clone().expect("request state");
    callback(&[("code", code), ("state", state.as_str())])
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub form: HashMap<String, String>,
    pub basic_auth: Option<(String, String)>,
}

/// Scripted token endpoint: answers from a queue, then repeats the fallback.
#[derive(Default)]
pub struct ScriptedExchange {
    responses: Mutex<VecDeque<Result<RawResponse, OAuthError>>>,
    fallback: Mutex<Option<Result<RawResponse, OAuthError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    count: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: Result<RawResponse, OAuthError>) -> &Self {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(response);
        self
    }

    pub fn repeat(&self, response: Result<RawResponse, OAuthError>) -> &Self {
        *self.fallback.lock().expect("fallback lock poisoned") = Some(response);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().expect("delay lock poisoned") = Some(delay);
        self
    }

    /// Hold every call until a permit is released on the returned semaphore.
    pub fn gated(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().expect("gate lock poisoned") = Some(gate.clone());
        gate
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn last_call(&self) -> RecordedCall {
        self.calls()
            .last()
            .cloned()
            .expect("at least one call recorded")
    }
}

#[async_trait]
impl HttpExchange for ScriptedExchange {
    async fn post_form(
        &self,
        url: &Url,
        form: &[(String, String)],
        basic_auth: Option<(&str, &str)>,
    ) -> Result<RawResponse, OAuthError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(RecordedCall {
                url: url.to_string(),
                form: form.iter().cloned().collect(),
                basic_auth: basic_auth.map(|(id, secret)| (id.to_string(), secret.to_string())),
            });

        let delay = *self.delay.lock().expect("delay lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let gate = self.gate.lock().expect("gate lock poisoned").clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let next = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .pop_front();
        match next {
            Some(response) => response,
            None => self
                .fallback
                .lock()
                .expect("fallback lock poisoned")
                .clone()
                .unwrap_or_else(|| Err(OAuthError::Network("no scripted response".to_string()))),
        }
    }
}

/// How the presenter answers redirect requests.
#[derive(Debug, Clone)]
pub enum PresenterScript {
    Defer,
    Cancel,
    /// Redirect with a code and the request's own state.
    ApproveWithCode(String),
    /// Redirect to a fixed URL.
    RedirectTo(Url),
}

pub struct RecordingPresenter {
    script: PresenterScript,
    presented: Mutex<Vec<(AuthorizationRequest, Url)>>,
    device_sessions: Mutex<Vec<DeviceCodeSession>>,
}

impl RecordingPresenter {
    pub fn new(script: PresenterScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            presented: Mutex::new(Vec::new()),
            device_sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn presented(&self) -> Vec<(AuthorizationRequest, Url)> {
        self.presented.lock().expect("presented lock poisoned").clone()
    }

    pub fn device_sessions(&self) -> Vec<DeviceCodeSession> {
        self.device_sessions
            .lock()
            .expect("sessions lock poisoned")
            .clone()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn present(
        &self,
        request: &AuthorizationRequest,
        authorize_url: &Url,
    ) -> Result<PresentationOutcome, OAuthError> {
        self.presented
            .lock()
            .expect("presented lock poisoned")
            .push((request.clone(), authorize_url.clone()));
        Ok(match &self.script {
            PresenterScript::Defer => PresentationOutcome::Deferred,
            PresenterScript::Cancel => PresentationOutcome::Cancelled,
            PresenterScript::ApproveWithCode(code) => {
                PresentationOutcome::Redirect(code_callback(request, code))
            }
            PresenterScript::RedirectTo(url) => PresentationOutcome::Redirect(url.clone()),
        })
    }

    async fn present_device_code(&self, session: &DeviceCodeSession) -> Result<(), OAuthError> {
        self.device_sessions
            .lock()
            .expect("sessions lock poisoned")
            .push(session.clone());
        Ok(())
    }
}
