//! High-level facade wiring the engine, the token store and the request
//! authorizer for one configured client.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::authorizer::RequestAuthorizer;
use crate::config::ClientConfig;
use crate::engine::{AuthorizationEngine, FlowState, StartOutcome};
use crate::error::OAuthError;
use crate::grant::Grant;
use crate::store::{CredentialStore, TokenStore};
use crate::token::Token;
use crate::transport::{DeferredPresenter, HttpExchange, Presenter, ReqwestExchange};

/// OAuth2 client for one provider.
///
/// All I/O decisions (opening browsers, printing codes) belong to the
/// [`Presenter`]; the client only returns typed results and errors.
///
/// # Example
/// ```no_run
/// use oauth2_engine::client::OAuthClient;
/// use oauth2_engine::config::ClientConfig;
/// use oauth2_engine::grant::Grant;
///
/// # async fn run() -> Result<(), oauth2_engine::OAuthError> {
/// let client = OAuthClient::new(ClientConfig::from_env()?);
/// client.login(Grant::ClientCredentials).await?;
///
/// let http = reqwest::Client::new();
/// let request = http.get("https://api.example.com/me").build()?;
/// let response = client.send(&http, request).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct OAuthClient {
    config: Arc<ClientConfig>,
    store: Arc<TokenStore>,
    exchange: Arc<dyn HttpExchange>,
    presenter: Arc<dyn Presenter>,
    engine: Arc<AuthorizationEngine>,
    authorizer: Arc<RequestAuthorizer>,
}

impl OAuthClient {
    /// Client using `reqwest` for the token endpoint and deferring redirects
    /// to [`OAuthClient::handle_redirect`].
    pub fn new(config: ClientConfig) -> Self {
        Self::assemble(
            Arc::new(config),
            Arc::new(TokenStore::new()),
            Arc::new(ReqwestExchange::new()),
            Arc::new(DeferredPresenter),
        )
    }

    pub fn with_exchange(self, exchange: Arc<dyn HttpExchange>) -> Self {
        Self::assemble(self.config, self.store, exchange, self.presenter)
    }

    pub fn with_presenter(self, presenter: Arc<dyn Presenter>) -> Self {
        Self::assemble(self.config, self.store, self.exchange, presenter)
    }

    /// Persist tokens through `credentials`. Replaces the token store, so
    /// call this before logging in or restoring.
    pub fn with_credential_store(self, credentials: Arc<dyn CredentialStore>) -> Self {
        let store = Arc::new(TokenStore::new().with_credential_store(credentials));
        Self::assemble(self.config, store, self.exchange, self.presenter)
    }

    fn assemble(
        config: Arc<ClientConfig>,
        store: Arc<TokenStore>,
        exchange: Arc<dyn HttpExchange>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let engine = Arc::new(AuthorizationEngine::new(
            config.clone(),
            store.clone(),
            exchange.clone(),
            presenter.clone(),
        ));
        let authorizer = Arc::new(RequestAuthorizer::new(
            config.clone(),
            store.clone(),
            exchange.clone(),
        ));
        Self {
            config,
            store,
            exchange,
            presenter,
            engine,
            authorizer,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<AuthorizationEngine> {
        &self.engine
    }

    pub fn authorizer(&self) -> &Arc<RequestAuthorizer> {
        &self.authorizer
    }

    pub fn state(&self) -> FlowState {
        self.engine.state()
    }

    pub fn current_token(&self) -> Option<Token> {
        self.store.current()
    }

    pub async fn login(&self, grant: Grant) -> Result<StartOutcome, OAuthError> {
        self.engine.start(grant).await
    }

    pub async fn handle_redirect(&self, callback: &Url) -> Result<Token, OAuthError> {
        self.engine.handle_redirect(callback).await
    }

    pub fn cancel(&self) -> bool {
        self.engine.cancel()
    }

    pub async fn authorize(
        &self,
        request: reqwest::Request,
    ) -> Result<reqwest::Request, OAuthError> {
        self.authorizer.authorize(request).await
    }

    pub async fn send(
        &self,
        client: &reqwest::Client,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, OAuthError> {
        self.authorizer.send(client, request).await
    }

    /// Load the persisted token into memory.
    pub fn restore(&self) -> Result<Option<Token>, OAuthError> {
        self.store.restore()
    }

    /// Cancel any live flow and forget the token, including its persisted
    /// copy.
    pub fn logout(&self) {
        self.engine.cancel();
        self.store.clear();
        tracing::debug!(client_id = %self.config.client_id, "logged out");
    }

    /// A token is stored and is either unexpired or refreshable.
    pub fn is_authorized(&self) -> bool {
        self.store
            .current()
            .is_some_and(|token| !token.is_expired(Utc::now()) || token.can_refresh())
    }
}
