//! CLI entry point for oauth2-engine.

pub mod auth;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::grant::GrantKind;

/// OAuth2 client CLI
#[derive(Parser, Debug)]
#[command(name = "oauth2-engine", version, about = "OAuth2 client engine CLI")]
pub struct Cli {
    /// Client configuration file (TOML). Without it, OAUTH2_* variables are used.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Name of the stored credential file (defaults to the client id)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an authorization flow and store the token
    Login(LoginArgs),
    /// Show the stored token's status
    Status,
    /// Print a valid access token, refreshing it if needed
    Token,
    /// Forget the stored token
    Logout,
}

/// Arguments for `oauth2-engine login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Grant to use (authorization_code, implicit, client_credentials,
    /// password, refresh_token, device_code)
    #[arg(short, long, default_value = "authorization_code")]
    pub grant: GrantKind,

    /// Username for the password grant
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for the password grant (prompted when omitted)
    #[arg(long)]
    pub password: Option<String>,
}
