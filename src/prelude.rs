//! Convenience re-exports for common use.

pub use crate::authorizer::RequestAuthorizer;
pub use crate::client::OAuthClient;
pub use crate::config::{ClientAuthMethod, ClientConfig, TokenPlacement};
pub use crate::engine::{AuthorizationEngine, FlowState, StartOutcome};
pub use crate::error::{OAuthError, Result};
pub use crate::grant::{AuthorizationRequest, Grant, GrantKind};
pub use crate::store::{CredentialStore, FileCredentialStore, TokenStore};
pub use crate::token::Token;
pub use crate::transport::{HttpExchange, PresentationOutcome, Presenter, ReqwestExchange};
