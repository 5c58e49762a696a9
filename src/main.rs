use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use histwarden::{app, cli::Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Select the rustls crypto provider up front so reqwest TLS setup is
    // unambiguous when more than one provider is linked in.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    app::run(cli).await
}
