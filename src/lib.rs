//! oauth2-engine — OAuth2 client engine
//!
//! Runs OAuth2 grant flows (authorization code with PKCE, implicit, client
//! credentials, resource owner password, refresh token, device code), keeps
//! the resulting token, and attaches it to outgoing requests, refreshing it
//! when it is about to expire.
//!
//! # Quick Start
//!
//! ```no_run
//! use oauth2_engine::prelude::*;
//! use url::Url;
//!
//! # async fn example() -> oauth2_engine::error::Result<()> {
//! let config = ClientConfig::builder()
//!     .client_id("my-app")
//!     .client_secret("s3cret")
//!     .token_url(Url::parse("https://auth.example.com/token")?)
//!     .build();
//! let client = OAuthClient::new(config);
//! client.login(Grant::ClientCredentials).await?;
//!
//! let http = reqwest::Client::new();
//! let request = client.authorize(http.get("https://api.example.com/items").build()?).await?;
//! let response = http.execute(request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod authorizer;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod grant;
pub mod prelude;
pub mod store;
pub mod token;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::OAuthError;
pub use token::Token;
