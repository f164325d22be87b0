//! CLI command handlers for login, status, token and logout.

use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use super::LoginArgs;
use crate::client::OAuthClient;
use crate::config::ClientConfig;
use crate::engine::StartOutcome;
use crate::error::OAuthError;
use crate::grant::{AuthorizationRequest, DeviceCodeSession, Grant, GrantKind};
use crate::store::{CredentialStoreConfig, FileCredentialStore};
use crate::token::Token;
use crate::transport::{PresentationOutcome, Presenter};

/// Presenter that prints URLs and reads the redirect back from stdin.
#[derive(Debug, Default)]
pub struct TerminalPresenter;

#[async_trait]
impl Presenter for TerminalPresenter {
    async fn present(
        &self,
        _request: &AuthorizationRequest,
        authorize_url: &Url,
    ) -> Result<PresentationOutcome, OAuthError> {
        println!("🔗 Visit: {authorize_url}");
        println!("📋 After authorizing, paste the URL you were redirected to:");
        let line = prompt("> ").await?;
        if line.is_empty() {
            return Ok(PresentationOutcome::Cancelled);
        }
        let callback = Url::parse(&line)
            .map_err(|err| OAuthError::InvalidRedirect(format!("not a URL: {err}")))?;
        Ok(PresentationOutcome::Redirect(callback))
    }

    async fn present_device_code(&self, session: &DeviceCodeSession) -> Result<(), OAuthError> {
        println!("🔗 Visit: {}", session.verification_url);
        if let Some(complete) = &session.verification_url_complete {
            println!("   (or open {complete})");
        }
        println!("📋 Enter code: {}", session.user_code);
        println!("⏳ Waiting for authorization...");
        Ok(())
    }
}

async fn prompt(label: &str) -> Result<String, OAuthError> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

/// Build the client for CLI commands: config from `path` or the environment,
/// tokens persisted under the default data directory.
pub fn load_client(path: Option<&Path>, profile: Option<&str>) -> Result<OAuthClient, OAuthError> {
    let config = match path {
        Some(path) => ClientConfig::from_toml_file(path)?,
        None => ClientConfig::from_env()?,
    };
    let key = profile.map_or_else(|| config.client_id.clone(), str::to_string);
    let credentials = FileCredentialStore::new(
        CredentialStoreConfig::new(CredentialStoreConfig::default_dir()),
        key,
    );
    let client = OAuthClient::new(config)
        .with_credential_store(Arc::new(credentials))
        .with_presenter(Arc::new(TerminalPresenter));
    if let Err(err) = client.restore() {
        tracing::warn!(error = %err, "ignoring unreadable stored token");
    }
    Ok(client)
}

/// Handle `oauth2-engine login`.
pub async fn handle_login(client: &OAuthClient, args: &LoginArgs) -> Result<(), Box<dyn Error>> {
    let grant = grant_from_args(client, args).await?;
    match client.login(grant).await {
        Ok(StartOutcome::Authorized(token)) => {
            println!("✅ Login successful ({})", args.grant);
            print_token_summary(&token);
            Ok(())
        }
        Ok(StartOutcome::AwaitingRedirect(request)) => {
            println!("🔗 Visit: {}", request.authorize_url());
            println!("⏳ Deliver the redirect to finish logging in");
            Ok(())
        }
        Err(OAuthError::Cancelled) => {
            eprintln!("❌ Login cancelled");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

async fn grant_from_args(client: &OAuthClient, args: &LoginArgs) -> Result<Grant, Box<dyn Error>> {
    let grant = match args.grant {
        GrantKind::AuthorizationCode => Grant::AuthorizationCode,
        GrantKind::Implicit => Grant::Implicit,
        GrantKind::ClientCredentials => Grant::ClientCredentials,
        GrantKind::DeviceCode => Grant::DeviceCode,
        GrantKind::ResourceOwnerPassword => {
            let username = args
                .username
                .clone()
                .ok_or("--username is required for the password grant")?;
            let password = match &args.password {
                Some(password) => password.clone(),
                None => prompt("Password: ").await?,
            };
            Grant::ResourceOwnerPassword { username, password }
        }
        GrantKind::RefreshToken => {
            let refresh_token = client
                .current_token()
                .and_then(|token| token.refresh_token)
                .ok_or("no stored refresh token; log in first")?;
            Grant::RefreshToken { refresh_token }
        }
    };
    Ok(grant)
}

/// Handle `oauth2-engine status`.
pub async fn handle_status(client: &OAuthClient) -> Result<(), Box<dyn Error>> {
    println!("🔐 Authentication Status\n");
    println!("  Client: {}", client.config().client_id);
    match client.current_token() {
        Some(token) => {
            let status = match token.expires_at {
                Some(expires) if expires > Utc::now() => format!(
                    "✅ Logged in (expires {})",
                    expires.format("%Y-%m-%d %H:%M")
                ),
                Some(_) if token.can_refresh() => {
                    "⚠️  Token expired (will refresh on next use)".to_string()
                }
                Some(_) => "⚠️  Token expired, log in again".to_string(),
                None => "✅ Logged in".to_string(),
            };
            println!("  Token: {status}");
            if let Some(scope) = &token.scope {
                let scope: Vec<&str> = scope.iter().map(String::as_str).collect();
                println!("  Scope: {}", scope.join(" "));
            }
        }
        None => println!("  Token: ❌ Not logged in"),
    }
    Ok(())
}

/// Handle `oauth2-engine token`.
pub async fn handle_token(client: &OAuthClient) -> Result<(), Box<dyn Error>> {
    let token = client.authorizer().valid_token().await?;
    println!("{}", token.access_token);
    Ok(())
}

/// Handle `oauth2-engine logout`.
pub async fn handle_logout(client: &OAuthClient) -> Result<(), Box<dyn Error>> {
    client.logout();
    println!("✅ Logged out of {}", client.config().client_id);
    Ok(())
}

fn print_token_summary(token: &Token) {
    println!("   Type: {}", token.token_type);
    if let Some(secs) = token.seconds_until_expiry(Utc::now()) {
        println!("   Expires in: {secs}s");
    }
    if token.can_refresh() {
        println!("   Refresh token: stored");
    }
}
