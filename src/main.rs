//! oauth2-engine CLI binary entry point.

use clap::Parser;
use oauth2_engine::cli::{auth, Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let client = match auth::load_client(cli.config.as_deref(), cli.profile.as_deref()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Login(args) => auth::handle_login(&client, &args).await,
        Commands::Status => auth::handle_status(&client).await,
        Commands::Token => auth::handle_token(&client).await,
        Commands::Logout => auth::handle_logout(&client).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
